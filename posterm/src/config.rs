//! Configuration types for sessions, devices and transactions.
//!
//! The protocol defines no timeout or lifetime values of its own, so every one
//! of them is explicit configuration here. All durations are whole seconds so
//! the structs deserialize directly from TOML or JSON.
//!
//! # Example
//!
//! ```rust
//! use posterm::config::{OrchestratorConfig, PaymentInterface};
//!
//! let config: OrchestratorConfig = serde_json::from_value(serde_json::json!({
//!     "transaction_timeout_secs": 90,
//!     "payment_interface": "tap_to_pay"
//! }))
//! .unwrap();
//! assert_eq!(config.transaction_timeout().as_secs(), 90);
//! assert_eq!(config.abort_timeout().as_secs(), 10);
//! assert_eq!(config.payment_interface, PaymentInterface::TapToPay);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether the terminal flow shows its own UI or runs headless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentationMode {
    /// The device presents a blocking visual flow to the cardholder.
    #[default]
    Interactive,
    /// The device runs the transaction without presenting UI.
    Headless,
}

/// Which card acceptance interface the device should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentInterface {
    /// An external card reader paired with the device.
    #[default]
    CardReader,
    /// The device's built-in contactless reader.
    TapToPay,
}

/// Session-issuance parameters sent with every setup-token exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Merchant account the session is issued for.
    pub merchant_account: String,

    /// Store identifier within the merchant account.
    pub store: String,

    /// Lifetime applied when the session payload carries no `expiresAt`.
    /// Defaults to 3600 seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl SessionConfig {
    /// Creates a session configuration with the default TTL.
    #[must_use]
    pub fn new(merchant_account: impl Into<String>, store: impl Into<String>) -> Self {
        Self {
            merchant_account: merchant_account.into(),
            store: store.into(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }

    /// Returns the fallback session lifetime.
    #[must_use]
    pub const fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

/// Device connection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// How long a connect attempt may take before the session is marked
    /// failed. Defaults to 30 seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl DeviceConfig {
    /// Returns the connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Transaction submission parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How long to wait for the terminal's response. Defaults to 120 seconds.
    #[serde(default = "default_transaction_timeout_secs")]
    pub transaction_timeout_secs: u64,

    /// How long to wait for the transport to confirm an abort after a
    /// cancellation or timeout. Defaults to 10 seconds.
    #[serde(default = "default_abort_timeout_secs")]
    pub abort_timeout_secs: u64,

    /// Default card acceptance interface.
    #[serde(default)]
    pub payment_interface: PaymentInterface,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_secs: default_transaction_timeout_secs(),
            abort_timeout_secs: default_abort_timeout_secs(),
            payment_interface: PaymentInterface::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Returns the transaction timeout.
    #[must_use]
    pub const fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }

    /// Returns the abort confirmation timeout.
    #[must_use]
    pub const fn abort_timeout(&self) -> Duration {
        Duration::from_secs(self.abort_timeout_secs)
    }
}

const fn default_session_ttl_secs() -> u64 {
    3600
}

const fn default_connect_timeout_secs() -> u64 {
    30
}

const fn default_transaction_timeout_secs() -> u64 {
    120
}

const fn default_abort_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let device: DeviceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(device, DeviceConfig::default());
        assert_eq!(device.connect_timeout(), Duration::from_secs(30));

        let orchestrator: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(orchestrator.transaction_timeout(), Duration::from_secs(120));
        assert_eq!(orchestrator.payment_interface, PaymentInterface::CardReader);
    }

    #[test]
    fn test_session_config_requires_merchant_and_store() {
        assert!(serde_json::from_str::<SessionConfig>(r#"{"store": "r10538"}"#).is_err());
        let config: SessionConfig =
            serde_json::from_str(r#"{"merchant_account": "ChowbusUS", "store": "r10538"}"#)
                .unwrap();
        assert_eq!(config.session_ttl(), Duration::from_secs(3600));
    }
}

//! Demo configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! url = "https://checkout-test.adyen.com/checkout/possdk/v68/"
//! api_key = "$POS_API_KEY"
//! timeout_secs = 15
//!
//! [session]
//! merchant_account = "ChowbusUS"
//! store = "r10538"
//!
//! [orchestrator]
//! transaction_timeout_secs = 90
//! payment_interface = "tap_to_pay"
//!
//! [terminal]
//! latency_ms = 800
//! decline_above = "500.00"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `posterm.toml`)
//! - `SESSIONS_URL` - Override the backend base URL
//! - `POS_API_KEY` - Conventionally referenced by `api_key`

use std::path::Path;

use posterm::config::{DeviceConfig, OrchestratorConfig, SessionConfig};
use posterm_http::constants::DEFAULT_SESSIONS_URL;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level demo configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Session-issuance backend.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Merchant account and store the sessions are issued for.
    #[serde(default = "default_session")]
    pub session: SessionConfig,

    /// Device connection settings.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Transaction settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Behavior of the simulated terminal.
    #[serde(default)]
    pub terminal: TerminalConfig,
}

/// Session-issuance backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL; `/sessions` is resolved below it.
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// API key sent as `X-API-Key`. Supports `$VAR` expansion.
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds.
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            api_key: String::new(),
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

/// Simulated terminal settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Time the terminal takes to answer, in milliseconds.
    #[serde(default)]
    pub latency_ms: u64,

    /// Amounts above this are declined.
    #[serde(default)]
    pub decline_above: Option<Decimal>,
}

fn default_session() -> SessionConfig {
    SessionConfig::new("DemoMerchantPOS", "DemoStore")
}

fn default_backend_url() -> String {
    DEFAULT_SESSIONS_URL.to_owned()
}

const fn default_backend_timeout_secs() -> u64 {
    15
}

impl DemoConfig {
    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the defaults. After loading, all `$VAR` /
    /// `${VAR}` references are expanded from the process environment and
    /// `SESSIONS_URL` overrides the backend URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };

        let expanded = expand_env_vars(&content);
        let mut config: Self = toml::from_str(&expanded)?;

        if let Ok(url) = std::env::var("SESSIONS_URL") {
            config.backend.url = url;
        }

        Ok(config)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut var_name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    closed = true;
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        let resolved = if var_name.is_empty() || (braced && !closed) {
            None
        } else {
            lookup(&var_name)
        };
        match resolved {
            Some(value) => result.push_str(&value),
            None => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if closed {
                    result.push('}');
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use posterm::config::PaymentInterface;

    fn lookup(name: &str) -> Option<String> {
        (name == "POS_API_KEY").then(|| "secret-key".to_owned())
    }

    #[test]
    fn test_expands_plain_and_braced_vars() {
        assert_eq!(
            expand_with("a = \"$POS_API_KEY\"\nb = \"${POS_API_KEY}x\"", lookup),
            "a = \"secret-key\"\nb = \"secret-keyx\""
        );
    }

    #[test]
    fn test_unresolved_vars_are_left_alone() {
        assert_eq!(expand_with("$MISSING ${MISSING} $", lookup), "$MISSING ${MISSING} $");
    }

    #[test]
    fn test_unterminated_brace_is_copied_verbatim() {
        assert_eq!(expand_with("key = ${POS_API_KEY", lookup), "key = ${POS_API_KEY");
        assert_eq!(expand_with("${", lookup), "${");
        assert_eq!(expand_with("${}", lookup), "${}");
    }

    #[test]
    fn test_parses_full_file() {
        let raw = r#"
            [backend]
            api_key = "$POS_API_KEY"

            [session]
            merchant_account = "ChowbusUS"
            store = "r10538"

            [orchestrator]
            payment_interface = "tap_to_pay"

            [terminal]
            decline_above = "500.00"
        "#;
        let config: DemoConfig = toml::from_str(&expand_with(raw, lookup)).unwrap();
        assert_eq!(config.backend.api_key, "secret-key");
        assert_eq!(config.backend.url, DEFAULT_SESSIONS_URL);
        assert_eq!(config.session.merchant_account, "ChowbusUS");
        assert_eq!(config.orchestrator.payment_interface, PaymentInterface::TapToPay);
        assert_eq!(config.orchestrator.transaction_timeout_secs, 120);
        assert_eq!(config.terminal.decline_above, Some(Decimal::new(50000, 2)));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: DemoConfig = toml::from_str("").unwrap();
        assert_eq!(config.session.store, "DemoStore");
        assert_eq!(config.device.connect_timeout_secs, 30);
        assert!(config.terminal.decline_above.is_none());
    }
}

//! Installation identity and session token lifecycle.
//!
//! A payment device is usable only under a valid session. Sessions are
//! obtained by exchanging a one-time setup token, issued on the device side,
//! with a backend [`SessionAuthority`]. The [`SessionManager`] caches the
//! resulting [`SessionToken`] and the installation identity the backend
//! assigns on first registration.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::SessionConfig;
use crate::error::{PosError, SessionError};
use crate::gate::TransportGate;
use crate::proto::Base64Bytes;
use crate::timestamp::UnixTimestamp;

/// Identity of this application installation, registered with the backend.
///
/// Used as the `POIID` of every outgoing message header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstallationId(String);

impl InstallationId {
    /// Creates an installation identity.
    ///
    /// # Errors
    ///
    /// Returns [`PosError::MalformedPayload`] if `id` is empty.
    pub fn new(id: impl Into<String>) -> Result<Self, PosError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(PosError::malformed("installation id is empty"));
        }
        Ok(Self(id))
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InstallationId {
    type Error = PosError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<InstallationId> for String {
    fn from(value: InstallationId) -> Self {
        value.0
    }
}

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque session credential handed to the device with every exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    sdk_data: String,
    expires_at: UnixTimestamp,
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("sdk_data", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl SessionToken {
    /// Creates a session token.
    #[must_use]
    pub fn new(sdk_data: impl Into<String>, expires_at: UnixTimestamp) -> Self {
        Self {
            sdk_data: sdk_data.into(),
            expires_at,
        }
    }

    /// Returns the opaque session payload.
    #[must_use]
    pub fn sdk_data(&self) -> &str {
        &self.sdk_data
    }

    /// Returns when the session stops being valid.
    #[must_use]
    pub const fn expires_at(&self) -> UnixTimestamp {
        self.expires_at
    }

    /// Returns `true` if the session is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: UnixTimestamp) -> bool {
        self.expires_at.has_passed(now)
    }

    /// Returns `true` if the session is expired now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(UnixTimestamp::now())
    }
}

/// Body of a session-issuance request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    /// Merchant account the session is issued for.
    pub merchant_account: String,
    /// The one-time setup token from the device side.
    pub setup_token: String,
    /// Store identifier.
    pub store: String,
}

/// Body of a successful session-issuance response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// Opaque session payload for the device.
    pub sdk_data: String,
    /// Installation identity assigned by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<String>,
    /// Session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Echo of the merchant account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_account: Option<String>,
    /// Echo of the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

/// Fields read from the base64 JSON inside `sdkData`, when it has that shape.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SdkDataPayload {
    #[serde(default)]
    expires_at: Option<UnixTimestamp>,
    #[serde(default)]
    installation_id: Option<String>,
}

impl SdkDataPayload {
    fn read(sdk_data: &str) -> Self {
        Base64Bytes::from(sdk_data)
            .decode_json()
            .unwrap_or_default()
    }
}

/// Backend endpoint that exchanges setup tokens for sessions.
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    /// Performs one session-issuance call.
    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<SessionResponse, SessionError>;
}

/// Produces setup tokens, typically by asking the device SDK for one.
#[async_trait]
pub trait SetupTokenSource: Send + Sync {
    /// Returns a fresh one-time setup token.
    async fn setup_token(&self) -> Result<String, PosError>;
}

#[derive(Debug, Default)]
struct SessionState {
    installation_id: Option<InstallationId>,
    session: Option<SessionToken>,
}

/// Holds the installation identity and the current session token.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`.
pub struct SessionManager {
    authority: Arc<dyn SessionAuthority>,
    setup_tokens: Option<Arc<dyn SetupTokenSource>>,
    config: SessionConfig,
    gate: TransportGate,
    state: RwLock<SessionState>,
    refresh: Mutex<()>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("has_setup_token_source", &self.setup_tokens.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager with no identity, no session and its own gate.
    #[must_use]
    pub fn new(authority: Arc<dyn SessionAuthority>, config: SessionConfig) -> Self {
        Self {
            authority,
            setup_tokens: None,
            config,
            gate: TransportGate::new(),
            state: RwLock::new(SessionState::default()),
            refresh: Mutex::new(()),
        }
    }

    /// Starts with a known installation identity.
    #[must_use]
    pub fn with_installation_id(mut self, id: InstallationId) -> Self {
        self.state.get_mut().installation_id = Some(id);
        self
    }

    /// Sets the source used by [`warm_up`](Self::warm_up) and
    /// [`ensure_session`](Self::ensure_session) to refresh the session.
    #[must_use]
    pub fn with_setup_token_source(mut self, source: Arc<dyn SetupTokenSource>) -> Self {
        self.setup_tokens = Some(source);
        self
    }

    /// Shares `gate` with other components instead of a private one.
    #[must_use]
    pub fn with_gate(mut self, gate: TransportGate) -> Self {
        self.gate = gate;
        self
    }

    /// Returns the gate session calls hold while talking to the authority.
    #[must_use]
    pub const fn gate(&self) -> &TransportGate {
        &self.gate
    }

    /// Returns the installation identity.
    ///
    /// # Errors
    ///
    /// Returns [`PosError::NotProvisioned`] until an identity was configured
    /// or learned from a session response.
    pub async fn installation_id(&self) -> Result<InstallationId, PosError> {
        self.state
            .read()
            .await
            .installation_id
            .clone()
            .ok_or(PosError::NotProvisioned)
    }

    /// Returns the cached session if it has not expired.
    pub async fn current_session(&self) -> Option<SessionToken> {
        let now = UnixTimestamp::now();
        self.state
            .read()
            .await
            .session
            .as_ref()
            .filter(|s| !s.is_expired_at(now))
            .cloned()
    }

    /// Exchanges a setup token for a new session.
    ///
    /// On success the new token replaces the cached one, and the installation
    /// identity is learned if none was known. On failure the cache is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// - [`PosError::NetworkError`] if the authority could not be reached
    /// - [`PosError::AuthRejected`] if the authority refused the token
    /// - [`PosError::MalformedPayload`] if the response could not be used
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "posterm.session.exchange", skip_all, err)
    )]
    pub async fn exchange_setup_token(&self, setup_token: &str) -> Result<SessionToken, PosError> {
        let request = SessionRequest {
            merchant_account: self.config.merchant_account.clone(),
            setup_token: setup_token.to_owned(),
            store: self.config.store.clone(),
        };
        let response = {
            let _shared = self.gate.shared().await;
            self.authority.create_session(&request).await?
        };

        if response.sdk_data.is_empty() {
            return Err(PosError::malformed("session response has empty sdkData"));
        }
        let payload = SdkDataPayload::read(&response.sdk_data);
        let expires_at = payload
            .expires_at
            .unwrap_or_else(|| UnixTimestamp::now() + self.config.session_ttl());
        let learned = response
            .installation_id
            .or(payload.installation_id)
            .and_then(|id| InstallationId::new(id).ok());
        let token = SessionToken::new(response.sdk_data, expires_at);

        let mut state = self.state.write().await;
        match (&state.installation_id, learned) {
            (None, Some(id)) => {
                #[cfg(feature = "telemetry")]
                tracing::info!(installation_id = %id, "posterm.session.provisioned");
                state.installation_id = Some(id);
            }
            (Some(known), Some(id)) if *known != id => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(
                    known = %known,
                    reported = %id,
                    "posterm.session.installation_id_mismatch"
                );
            }
            _ => {}
        }
        state.session = Some(token.clone());
        drop(state);

        #[cfg(feature = "telemetry")]
        tracing::debug!(expires_at = %token.expires_at(), "posterm.session.refreshed");
        Ok(token)
    }

    /// Returns a valid session, refreshing it through the setup-token source
    /// when the cached one is missing or expired.
    ///
    /// Concurrent callers share a single refresh.
    ///
    /// # Errors
    ///
    /// Returns [`PosError::AuthRejected`] when no valid session exists and no
    /// setup-token source is configured, or when the refreshed session is
    /// already expired. Any error from the refresh is passed through.
    pub async fn ensure_session(&self) -> Result<SessionToken, PosError> {
        if let Some(session) = self.current_session().await {
            return Ok(session);
        }
        let source = self
            .setup_tokens
            .as_ref()
            .ok_or_else(|| PosError::AuthRejected("no valid session".to_owned()))?;

        let _refresh = self.refresh.lock().await;
        if let Some(session) = self.current_session().await {
            return Ok(session);
        }
        let setup_token = source.setup_token().await?;
        let session = self.exchange_setup_token(&setup_token).await?;
        if session.is_expired() {
            return Err(PosError::AuthRejected(
                "issued session already expired".to_owned(),
            ));
        }
        Ok(session)
    }

    /// Refreshes the session ahead of time if it is missing or expired.
    ///
    /// Failures are logged and otherwise ignored; the next transaction
    /// retries through [`ensure_session`](Self::ensure_session).
    pub async fn warm_up(&self) {
        if self.setup_tokens.is_none() {
            return;
        }
        let result = self.ensure_session().await;
        log_warm_up_failure(&result);
    }
}

#[cfg(feature = "telemetry")]
fn log_warm_up_failure(result: &Result<SessionToken, PosError>) {
    if let Err(error) = result {
        tracing::warn!(error = %error, "posterm.session.warm_up_failed");
    }
}

#[cfg(not(feature = "telemetry"))]
const fn log_warm_up_failure(_result: &Result<SessionToken, PosError>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StaticAuthority, StaticSetupTokens};
    use serde_json::json;
    use std::time::Duration;

    fn config() -> SessionConfig {
        SessionConfig::new("ChowbusUS", "r10538")
    }

    fn sdk_data(expires_at: u64) -> String {
        Base64Bytes::encode_json(&json!({
            "environment": "checkoutpos-test",
            "expiresAt": expires_at,
            "sessionToken": "eyJhbGciOiJQUzI1NiJ9.e30.c2ln"
        }))
        .unwrap()
        .into_string()
    }

    fn far_future() -> u64 {
        UnixTimestamp::now().as_secs() + 3600
    }

    fn response(sdk_data: String, installation_id: Option<&str>) -> SessionResponse {
        SessionResponse {
            sdk_data,
            installation_id: installation_id.map(str::to_owned),
            id: Some("df564a4b-2d1b-4555-baa7-b903476e9a22".into()),
            merchant_account: None,
            store: None,
        }
    }

    #[tokio::test]
    async fn test_not_provisioned_before_first_session() {
        let authority = Arc::new(StaticAuthority::new(Err(SessionError::Transport(
            "offline".into(),
        ))));
        let manager = SessionManager::new(authority, config());
        assert_eq!(
            manager.installation_id().await,
            Err(PosError::NotProvisioned)
        );
        assert!(manager.current_session().await.is_none());
    }

    #[tokio::test]
    async fn test_exchange_caches_token_and_learns_identity() {
        let data = sdk_data(far_future());
        let authority = Arc::new(StaticAuthority::new(Ok(response(
            data.clone(),
            Some("BFCBF842-02DF-4D7F-AAED-F6535BFB5D48.352"),
        ))));
        let manager = SessionManager::new(authority.clone(), config());

        let token = manager.exchange_setup_token("setup-1").await.unwrap();
        assert_eq!(token.sdk_data(), data);
        assert_eq!(manager.current_session().await, Some(token));
        assert_eq!(
            manager.installation_id().await.unwrap().as_str(),
            "BFCBF842-02DF-4D7F-AAED-F6535BFB5D48.352"
        );

        let sent = authority.requests();
        assert_eq!(
            sent,
            vec![SessionRequest {
                merchant_account: "ChowbusUS".into(),
                setup_token: "setup-1".into(),
                store: "r10538".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_identity_is_learned_once() {
        let authority = Arc::new(StaticAuthority::new(Ok(response(
            sdk_data(far_future()),
            Some("second"),
        ))));
        let manager = SessionManager::new(authority, config())
            .with_installation_id(InstallationId::new("first").unwrap());
        manager.exchange_setup_token("setup").await.unwrap();
        assert_eq!(manager.installation_id().await.unwrap().as_str(), "first");
    }

    #[tokio::test]
    async fn test_identity_from_sdk_data_payload() {
        let data = Base64Bytes::encode_json(&json!({
            "expiresAt": far_future(),
            "installationId": "from-payload"
        }))
        .unwrap()
        .into_string();
        let authority = Arc::new(StaticAuthority::new(Ok(response(data, None))));
        let manager = SessionManager::new(authority, config());
        manager.exchange_setup_token("setup").await.unwrap();
        assert_eq!(
            manager.installation_id().await.unwrap().as_str(),
            "from-payload"
        );
    }

    #[tokio::test]
    async fn test_expiry_read_from_sdk_data() {
        let authority = Arc::new(StaticAuthority::new(Ok(response(
            sdk_data(1_722_496_898),
            None,
        ))));
        let manager = SessionManager::new(authority, config());
        let token = manager.exchange_setup_token("setup").await.unwrap();
        assert_eq!(token.expires_at(), UnixTimestamp::from_secs(1_722_496_898));
        assert!(token.is_expired());
        assert!(manager.current_session().await.is_none());
    }

    #[tokio::test]
    async fn test_opaque_sdk_data_uses_configured_ttl() {
        let authority = Arc::new(StaticAuthority::new(Ok(response(
            "not base64 json".into(),
            None,
        ))));
        let manager = SessionManager::new(authority, config());
        let before = UnixTimestamp::now();
        let token = manager.exchange_setup_token("setup").await.unwrap();
        assert!(token.expires_at() >= before + Duration::from_secs(3600));
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn test_rejection_leaves_cache_untouched() {
        let authority = Arc::new(StaticAuthority::new(Ok(response(
            sdk_data(far_future()),
            Some("install-1"),
        ))));
        let manager = SessionManager::new(authority.clone(), config());
        let first = manager.exchange_setup_token("setup-1").await.unwrap();

        authority.respond_with(Err(SessionError::Rejected {
            status: 401,
            body: "invalid setup token".into(),
        }));
        let err = manager.exchange_setup_token("setup-2").await.unwrap_err();
        assert!(matches!(err, PosError::AuthRejected(_)));
        assert_eq!(manager.current_session().await, Some(first));
    }

    #[tokio::test]
    async fn test_empty_sdk_data_is_malformed() {
        let authority = Arc::new(StaticAuthority::new(Ok(response(String::new(), None))));
        let manager = SessionManager::new(authority, config());
        let err = manager.exchange_setup_token("setup").await.unwrap_err();
        assert!(matches!(err, PosError::MalformedPayload(_)));
        assert!(manager.current_session().await.is_none());
    }

    #[tokio::test]
    async fn test_ensure_session_without_source() {
        let authority = Arc::new(StaticAuthority::new(Ok(response(
            sdk_data(far_future()),
            None,
        ))));
        let manager = SessionManager::new(authority.clone(), config());
        let err = manager.ensure_session().await.unwrap_err();
        assert_eq!(err, PosError::AuthRejected("no valid session".into()));
        assert!(authority.requests().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_session_refreshes_once() {
        let authority = Arc::new(StaticAuthority::new(Ok(response(
            sdk_data(far_future()),
            None,
        ))));
        let tokens = Arc::new(StaticSetupTokens::new("setup-from-device"));
        let manager = SessionManager::new(authority.clone(), config())
            .with_setup_token_source(tokens.clone());

        let (a, b) = tokio::join!(manager.ensure_session(), manager.ensure_session());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(authority.requests().len(), 1);
        assert_eq!(tokens.issued(), 1);
        assert_eq!(authority.requests()[0].setup_token, "setup-from-device");
    }

    #[tokio::test]
    async fn test_ensure_session_rejects_already_expired_refresh() {
        let authority = Arc::new(StaticAuthority::new(Ok(response(sdk_data(1), None))));
        let manager = SessionManager::new(authority.clone(), config())
            .with_setup_token_source(Arc::new(StaticSetupTokens::new("setup")));
        let err = manager.ensure_session().await.unwrap_err();
        assert_eq!(
            err,
            PosError::AuthRejected("issued session already expired".into())
        );
        assert_eq!(authority.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_warm_up_swallows_failures() {
        let authority = Arc::new(StaticAuthority::new(Err(SessionError::Transport(
            "connection refused".into(),
        ))));
        let manager = SessionManager::new(authority.clone(), config())
            .with_setup_token_source(Arc::new(StaticSetupTokens::new("setup")));
        manager.warm_up().await;
        assert!(manager.current_session().await.is_none());
        assert_eq!(authority.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_warm_up_skips_valid_session() {
        let authority = Arc::new(StaticAuthority::new(Ok(response(
            sdk_data(far_future()),
            None,
        ))));
        let manager = SessionManager::new(authority.clone(), config())
            .with_setup_token_source(Arc::new(StaticSetupTokens::new("setup")));
        manager.warm_up().await;
        manager.warm_up().await;
        assert_eq!(authority.requests().len(), 1);
        assert!(manager.current_session().await.is_some());
    }

    #[test]
    fn test_installation_id_rejects_empty() {
        assert!(InstallationId::new("  ").is_err());
        let parsed: Result<InstallationId, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_token_debug_redacts_payload() {
        let token = SessionToken::new("secret", UnixTimestamp::from_secs(1));
        assert!(!format!("{token:?}").contains("secret"));
    }
}

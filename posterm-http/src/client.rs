//! A [`SessionAuthority`] that issues sessions over HTTP.
//!
//! [`HttpSessionAuthority`] sends the setup token to the backend's
//! `/sessions` endpoint and returns the session descriptor it answers with.
//! The backend authenticates the call with an API key sent in the
//! [`API_KEY_HEADER`] header.
//!
//! ## Error Handling
//!
//! [`SessionClientError`] captures the failure context (URL construction,
//! transport, unexpected status, JSON decoding) and converts into the
//! [`SessionError`] taxonomy the session manager understands.

use std::fmt::{self, Display};
use std::time::Duration;

use async_trait::async_trait;
use http::header::{ACCEPT, HeaderValue};
use posterm::error::SessionError;
use posterm::session::{SessionAuthority, SessionRequest, SessionResponse};
use reqwest::Client;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::{Span, instrument};

use crate::constants::{API_KEY_HEADER, JSON_MEDIA_TYPE, SESSIONS_PATH};
use crate::error::SessionClientError;

/// A client for the backend session-issuance endpoint.
#[derive(Clone)]
pub struct HttpSessionAuthority {
    /// Base URL of the backend (e.g. `https://checkout-test.example/possdk/v68/`)
    base_url: Url,
    /// Full URL to `POST /sessions` requests
    sessions_url: Url,
    /// Shared Reqwest HTTP client
    client: Client,
    /// API key, marked sensitive
    api_key: HeaderValue,
    /// Optional request timeout
    timeout: Option<Duration>,
}

impl fmt::Debug for HttpSessionAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSessionAuthority")
            .field("sessions_url", &self.sessions_url.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpSessionAuthority {
    /// Constructs a client from a base URL and an API key.
    ///
    /// The `/sessions` endpoint URL is resolved relative to `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClientError`] if URL construction fails or the API
    /// key is not a valid header value.
    pub fn try_new(base_url: Url, api_key: &str) -> Result<Self, SessionClientError> {
        let sessions_url =
            base_url
                .join(SESSIONS_PATH)
                .map_err(|e| SessionClientError::UrlParse {
                    context: "Failed to construct ./sessions URL",
                    source: e,
                })?;
        let mut api_key =
            HeaderValue::from_str(api_key).map_err(SessionClientError::InvalidApiKey)?;
        api_key.set_sensitive(true);
        Ok(Self {
            base_url,
            sessions_url,
            client: Client::new(),
            api_key,
            timeout: None,
        })
    }

    /// Constructs a client from a base URL string and an API key.
    ///
    /// Trailing slashes are normalized so the endpoint always resolves
    /// below the given path.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClientError`] if the URL cannot be parsed, or for any
    /// reason [`try_new`](Self::try_new) fails.
    pub fn from_base(base_url: &str, api_key: &str) -> Result<Self, SessionClientError> {
        let mut normalized = base_url.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| SessionClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url, api_key)
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the base URL used by this client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the computed `./sessions` URL relative to [`HttpSessionAuthority::base_url`].
    #[must_use]
    pub const fn sessions_url(&self) -> &Url {
        &self.sessions_url
    }

    /// Returns the configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Sends a `POST /sessions` request.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClientError`] if the HTTP request fails, the backend
    /// answers with a non-success status, or the body is not a session
    /// descriptor.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "posterm.session_client.create_session", skip_all, err)
    )]
    pub async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<SessionResponse, SessionClientError> {
        let context = "POST /sessions";
        let mut req = self
            .client
            .post(self.sessions_url.clone())
            .header(ACCEPT, JSON_MEDIA_TYPE)
            .header(API_KEY_HEADER, self.api_key.clone())
            .json(request);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| SessionClientError::Http { context, source: e })?;

        let result = if http_response.status().is_success() {
            http_response
                .json::<SessionResponse>()
                .await
                .map_err(|e| SessionClientError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| SessionClientError::ResponseBodyRead { context, source: e })?;
            Err(SessionClientError::HttpStatus {
                context,
                status,
                body,
            })
        };

        record_result_on_span(&result);

        result
    }
}

#[async_trait]
impl SessionAuthority for HttpSessionAuthority {
    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<SessionResponse, SessionError> {
        Ok(Self::create_session(self, request).await?)
    }
}

/// Records the outcome of a request on the current span.
#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
        }
    }
}

/// Records the outcome of a request on the current span.
/// Noop if telemetry feature is off.
#[cfg(not(feature = "telemetry"))]
const fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use posterm::config::SessionConfig;
    use posterm::error::PosError;
    use posterm::proto::Base64Bytes;
    use posterm::session::SessionManager;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const API_KEY: &str = "AQEmgXvdQM2NG2Yd7nqx-test";

    fn request() -> SessionRequest {
        SessionRequest {
            merchant_account: "ChowbusUS".into(),
            setup_token: "setup-token-1".into(),
            store: "r10538".into(),
        }
    }

    fn sdk_data() -> String {
        Base64Bytes::encode_json(&json!({ "expiresAt": 4_102_444_800_u64 }))
            .unwrap()
            .into_string()
    }

    fn client(server: &MockServer) -> HttpSessionAuthority {
        HttpSessionAuthority::from_base(&server.uri(), API_KEY).unwrap()
    }

    #[tokio::test]
    async fn test_posts_headers_and_body() {
        let server = MockServer::start().await;
        let data = sdk_data();
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .and(header("X-API-Key", API_KEY))
            .and(header("Accept", "application/json"))
            .and(header("Content-Type", "application/json"))
            .and(body_json(json!({
                "merchantAccount": "ChowbusUS",
                "setupToken": "setup-token-1",
                "store": "r10538"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "df564a4b-2d1b-4555-baa7-b903476e9a22",
                "installationId": "BFCBF842-02DF-4D7F-AAED-F6535BFB5D48.352",
                "merchantAccount": "ChowbusUS",
                "sdkData": data,
                "store": "ST32CMK22322775L48G4S4VDH"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = HttpSessionAuthority::create_session(&client(&server), &request())
            .await
            .unwrap();
        assert_eq!(response.sdk_data, data);
        assert_eq!(
            response.installation_id.as_deref(),
            Some("BFCBF842-02DF-4D7F-AAED-F6535BFB5D48.352")
        );
    }

    #[tokio::test]
    async fn test_rejection_maps_to_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string("HTTP Status Response - Unauthorized"),
            )
            .mount(&server)
            .await;

        let err = SessionAuthority::create_session(&client(&server), &request())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::Rejected {
                status: 401,
                body: "HTTP Status Response - Unauthorized".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_undecodable_body_maps_to_decode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let err = SessionAuthority::create_session(&client(&server), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Decode(_)));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "sdkData": sdk_data() }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let authority = client(&server).with_timeout(Duration::from_millis(50));
        let err = SessionAuthority::create_session(&authority, &request())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
    }

    #[tokio::test]
    async fn test_session_manager_keeps_token_after_rejection() {
        let server = MockServer::start().await;
        let data = sdk_data();
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "installationId": "install-1",
                "sdkData": data
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let manager = SessionManager::new(
            Arc::new(client(&server)),
            SessionConfig::new("ChowbusUS", "r10538"),
        );
        let first = manager.exchange_setup_token("setup-1").await.unwrap();
        assert_eq!(first.sdk_data(), data);

        let err = manager.exchange_setup_token("setup-2").await.unwrap_err();
        assert_eq!(err, PosError::AuthRejected("status 403: forbidden".into()));
        assert_eq!(manager.current_session().await, Some(first));
        assert_eq!(manager.installation_id().await.unwrap().as_str(), "install-1");
    }

    #[test]
    fn test_sessions_url_resolves_below_base_path() {
        let authority =
            HttpSessionAuthority::from_base(crate::constants::DEFAULT_SESSIONS_URL, API_KEY)
                .unwrap();
        assert_eq!(
            authority.sessions_url().as_str(),
            "https://checkout-test.adyen.com/checkout/possdk/v68/sessions"
        );
        assert!(!format!("{authority:?}").contains(API_KEY));
    }

    #[test]
    fn test_rejects_unsendable_api_key() {
        let err = HttpSessionAuthority::from_base("http://localhost/", "bad\nkey").unwrap_err();
        assert!(matches!(err, SessionClientError::InvalidApiKey(_)));
    }
}

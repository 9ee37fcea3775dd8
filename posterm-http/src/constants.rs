//! HTTP constants for the session-issuance endpoint.

/// Header carrying the backend API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Path of the session-issuance endpoint, relative to the base URL.
pub const SESSIONS_PATH: &str = "./sessions";

/// Media type for request and response bodies.
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// Default session-issuance base URL (test environment).
pub const DEFAULT_SESSIONS_URL: &str = "https://checkout-test.adyen.com/checkout/possdk/v68/";

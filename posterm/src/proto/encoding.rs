//! Base64 helpers for opaque payloads carried inside terminal messages.
//!
//! Two fields on the wire are base64 text wrapping JSON: the
//! `SaleToAcquirerData` of a payment request and the `sdkData` session blob
//! returned by the session authority.

use std::fmt::{self, Display, Formatter};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PosError;

/// A wrapper for base64-encoded byte data.
///
/// This type holds bytes that represent base64-encoded data and provides
/// methods for encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    /// Decodes the base64 string bytes to raw binary data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Encodes raw binary data into base64 string bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Self {
        let encoded = b64.encode(input.as_ref());
        Self(encoded.into_bytes())
    }

    /// Serializes `value` as JSON and base64-encodes the result.
    ///
    /// # Errors
    ///
    /// Returns [`PosError::MalformedPayload`] if `value` cannot be serialized.
    pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, PosError> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::encode(json))
    }

    /// Base64-decodes the data and parses the result as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PosError::MalformedPayload`] if the data is not base64, or the
    /// decoded bytes are not JSON of the expected shape.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, PosError> {
        let raw = self.decode().map_err(PosError::malformed)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Returns the base64 text.
    #[must_use]
    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl AsRef<[u8]> for Base64Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Base64Bytes {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl Display for Base64Bytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_payload_through_base64() {
        let metadata = json!({"metadata": {"employeeNumber": "1"}});
        let encoded = Base64Bytes::encode_json(&metadata).unwrap();
        let text = encoded.to_string();
        let decoded: serde_json::Value = Base64Bytes::from(text.as_str()).decode_json().unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_decode_json_rejects_non_base64() {
        let err = Base64Bytes::from("%%%").decode_json::<serde_json::Value>();
        assert!(matches!(err, Err(PosError::MalformedPayload(_))));
    }
}

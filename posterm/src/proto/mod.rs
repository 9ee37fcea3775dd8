//! Wire format types for terminal protocol messages.
//!
//! Every message exchanged with a payment terminal is an envelope made of a
//! [`MessageHeader`] and a typed body. On the wire the envelope is a JSON
//! object keyed by direction, with the body keyed by its own name:
//!
//! ```json
//! {
//!   "SaleToPOIRequest": {
//!     "MessageHeader": {
//!       "ProtocolVersion": "3.0",
//!       "MessageClass": "Service",
//!       "MessageCategory": "Payment",
//!       "MessageType": "Request",
//!       "ServiceID": "1A2B3C",
//!       "SaleID": "8F6A…",
//!       "POIID": "BFCBF842-02DF-4D7F-AAED-F6535BFB5D48.352"
//!     },
//!     "PaymentRequest": { … }
//!   }
//! }
//! ```
//!
//! Responses use `SaleToPOIResponse` as the outer key.
//!
//! # Key Types
//!
//! - [`Message`] - Header plus typed body
//! - [`MessageBody`] / [`RequestBody`] - Bind a body type to its wire key and header kind
//! - [`encode`] / [`decode`] - The message codec
//! - [`Base64Bytes`] - Base64 helper for opaque nested payloads

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::PosError;

mod encoding;
pub mod payment;

pub use encoding::Base64Bytes;
pub use payment::*;

/// Protocol version written into every outgoing header.
pub const PROTOCOL_VERSION: &str = "3.0";

const HEADER_KEY: &str = "MessageHeader";

/// Broad class of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageClass {
    /// A sale-system service request such as a payment.
    Service,
    /// A request addressed to a device (display, printer, input).
    Device,
    /// An unsolicited event notification from the terminal.
    Event,
}

/// Functional category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MessageCategory {
    /// Card payment.
    Payment,
    /// Abort of an in-progress transaction.
    Abort,
    /// Reversal of a completed payment.
    Reversal,
    /// Transaction status enquiry.
    TransactionStatus,
    /// Terminal diagnosis.
    Diagnosis,
}

/// Direction of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Sale system to terminal.
    Request,
    /// Terminal to sale system.
    Response,
}

impl MessageType {
    /// Returns the outer JSON key for envelopes travelling in this direction.
    #[must_use]
    pub const fn envelope_key(self) -> &'static str {
        match self {
            Self::Request => "SaleToPOIRequest",
            Self::Response => "SaleToPOIResponse",
        }
    }
}

/// Header carried by every terminal message.
///
/// Fields are fixed at construction; use the accessors to read them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    #[serde(rename = "ProtocolVersion")]
    protocol_version: String,
    #[serde(rename = "MessageClass")]
    message_class: MessageClass,
    #[serde(rename = "MessageCategory")]
    message_category: MessageCategory,
    #[serde(rename = "MessageType")]
    message_type: MessageType,
    #[serde(rename = "ServiceID")]
    service_id: String,
    #[serde(rename = "SaleID")]
    sale_id: String,
    #[serde(rename = "POIID")]
    poi_id: String,
}

impl MessageHeader {
    /// Creates a header for body type `B` with [`PROTOCOL_VERSION`].
    #[must_use]
    pub fn for_body<B: MessageBody>(
        service_id: impl Into<String>,
        sale_id: impl Into<String>,
        poi_id: impl Into<String>,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            message_class: B::CLASS,
            message_category: B::CATEGORY,
            message_type: B::TYPE,
            service_id: service_id.into(),
            sale_id: sale_id.into(),
            poi_id: poi_id.into(),
        }
    }

    /// Returns the protocol version string.
    #[must_use]
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Returns the message class.
    #[must_use]
    pub const fn message_class(&self) -> MessageClass {
        self.message_class
    }

    /// Returns the message category.
    #[must_use]
    pub const fn message_category(&self) -> MessageCategory {
        self.message_category
    }

    /// Returns the message type.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Returns the service identifier, unique per transaction attempt.
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Returns the sale identifier, unique per transaction attempt.
    #[must_use]
    pub fn sale_id(&self) -> &str {
        &self.sale_id
    }

    /// Returns the point-of-interaction identifier (the installation id).
    #[must_use]
    pub fn poi_id(&self) -> &str {
        &self.poi_id
    }
}

/// A body that can travel inside a [`Message`].
///
/// Associates the Rust type with its JSON key and with the header fields a
/// well-formed envelope around it must carry.
pub trait MessageBody: Serialize + DeserializeOwned {
    /// JSON key of the body inside the envelope (e.g. `"PaymentRequest"`).
    const BODY_KEY: &'static str;
    /// Header class for this body.
    const CLASS: MessageClass;
    /// Header category for this body.
    const CATEGORY: MessageCategory;
    /// Header type for this body.
    const TYPE: MessageType;
}

/// A request body that the orchestrator can submit to a terminal.
pub trait RequestBody: MessageBody + Send {
    /// The body expected back from the terminal.
    type Response: MessageBody + Send;

    /// Stamps the sale-side transaction identifier onto the request.
    fn assign_transaction(&mut self, id: SaleTransactionId);

    /// Returns the sale-side transaction identifier, once assigned.
    fn transaction(&self) -> Option<&SaleTransactionId>;
}

/// A terminal protocol envelope: header plus typed body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<B> {
    header: MessageHeader,
    body: B,
}

impl<B> Message<B> {
    /// Creates a message from a header and a body.
    pub const fn new(header: MessageHeader, body: B) -> Self {
        Self { header, body }
    }

    /// Returns the header.
    pub const fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Returns the body.
    pub const fn body(&self) -> &B {
        &self.body
    }

    /// Splits the message into its header and body.
    pub fn into_parts(self) -> (MessageHeader, B) {
        (self.header, self.body)
    }
}

/// Serializes `{ HEADER_KEY: header, B::BODY_KEY: body }`.
struct EnvelopeContent<'a, B>(&'a Message<B>);

impl<B: MessageBody> Serialize for EnvelopeContent<'_, B> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(HEADER_KEY, &self.0.header)?;
        map.serialize_entry(B::BODY_KEY, &self.0.body)?;
        map.end()
    }
}

/// Serializes `{ B::TYPE.envelope_key(): content }`.
struct Envelope<'a, B>(&'a Message<B>);

impl<B: MessageBody> Serialize for Envelope<'_, B> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(B::TYPE.envelope_key(), &EnvelopeContent(self.0))?;
        map.end()
    }
}

/// Encodes a message into transport-ready JSON bytes.
///
/// # Errors
///
/// Returns [`PosError::MalformedPayload`] only if the body's own `Serialize`
/// implementation fails; the bodies defined in this crate never do.
pub fn encode<B: MessageBody>(message: &Message<B>) -> Result<Vec<u8>, PosError> {
    Ok(serde_json::to_vec(&Envelope(message))?)
}

/// Decodes transport bytes into a message with body type `B`.
///
/// # Errors
///
/// Returns [`PosError::MalformedPayload`] if the bytes are not JSON (including
/// truncated input), the envelope key or body key does not match `B`, the
/// header disagrees with `B`'s category or type, or any field fails to parse.
pub fn decode<B: MessageBody>(bytes: &[u8]) -> Result<Message<B>, PosError> {
    let root: Map<String, Value> = serde_json::from_slice(bytes)?;
    let expected = B::TYPE.envelope_key();
    let mut content = match take_single(root, expected)? {
        Value::Object(content) => content,
        other => {
            return Err(PosError::malformed(format!(
                "{expected} must be an object, got {}",
                json_kind(&other)
            )));
        }
    };

    let header: MessageHeader = content
        .remove(HEADER_KEY)
        .ok_or_else(|| PosError::malformed(format!("{expected} is missing {HEADER_KEY}")))
        .and_then(|v| serde_json::from_value(v).map_err(PosError::from))?;

    if header.message_category != B::CATEGORY || header.message_type != B::TYPE {
        return Err(PosError::malformed(format!(
            "header {:?}/{:?} does not match {}",
            header.message_category,
            header.message_type,
            B::BODY_KEY
        )));
    }

    let body: B = content
        .remove(B::BODY_KEY)
        .ok_or_else(|| PosError::malformed(format!("{expected} is missing {}", B::BODY_KEY)))
        .and_then(|v| serde_json::from_value(v).map_err(PosError::from))?;

    if let Some(extra) = content.keys().next() {
        return Err(PosError::malformed(format!(
            "unexpected field {extra} in {expected}"
        )));
    }

    Ok(Message { header, body })
}

fn take_single(mut root: Map<String, Value>, key: &str) -> Result<Value, PosError> {
    let value = root
        .remove(key)
        .ok_or_else(|| PosError::malformed(format!("expected top-level {key}")))?;
    if root.is_empty() {
        Ok(value)
    } else {
        Err(PosError::malformed(format!(
            "unexpected top-level fields beside {key}"
        )))
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

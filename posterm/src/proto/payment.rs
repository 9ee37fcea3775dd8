//! Payment request and response bodies.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{MessageBody, MessageCategory, MessageClass, MessageType, RequestBody};

/// Sale-side identification of one transaction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTransactionId {
    /// Unique transaction identifier chosen by the sale system.
    #[serde(rename = "TransactionID")]
    pub transaction_id: String,
    /// When the sale system created the transaction (RFC 3339).
    #[serde(rename = "TimeStamp")]
    pub timestamp: DateTime<Utc>,
}

impl SaleTransactionId {
    /// Creates a new sale transaction identifier.
    #[must_use]
    pub fn new(transaction_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            timestamp,
        }
    }
}

/// Sale-side data attached to a payment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleData {
    /// Transaction identification, assigned when the request is submitted.
    #[serde(
        rename = "SaleTransactionID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sale_transaction_id: Option<SaleTransactionId>,
    /// Opaque base64 JSON passed through to the acquirer (e.g. metadata).
    #[serde(
        rename = "SaleToAcquirerData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sale_to_acquirer_data: Option<String>,
}

/// Requested amount and currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountsReq {
    /// ISO 4217 currency code (e.g. `"USD"`).
    #[serde(rename = "Currency")]
    pub currency: String,
    /// Amount in major units (e.g. `101` or `10.50`). Written as a JSON
    /// number with every digit kept.
    #[serde(
        rename = "RequestedAmount",
        with = "rust_decimal::serde::arbitrary_precision"
    )]
    pub requested_amount: Decimal,
}

/// Transaction part of a payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    /// Amounts being requested.
    #[serde(rename = "AmountsReq")]
    pub amounts_req: AmountsReq,
}

/// A card payment request.
///
/// # JSON Format
///
/// ```json
/// {
///   "SaleData": {
///     "SaleTransactionID": { "TransactionID": "…", "TimeStamp": "2024-07-31T12:00:00Z" },
///     "SaleToAcquirerData": "ewogICAgIm1ldGFkYXRhIjoge30KfQ=="
///   },
///   "PaymentTransaction": { "AmountsReq": { "Currency": "USD", "RequestedAmount": 101 } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Sale-side data.
    #[serde(rename = "SaleData")]
    pub sale_data: SaleData,
    /// Amounts and currency.
    #[serde(rename = "PaymentTransaction")]
    pub payment_transaction: PaymentTransaction,
}

impl PaymentRequest {
    /// Creates a payment request for `amount` in `currency`.
    ///
    /// The transaction identifier is assigned later, at submission time.
    #[must_use]
    pub fn new(currency: impl Into<String>, amount: Decimal) -> Self {
        Self {
            sale_data: SaleData::default(),
            payment_transaction: PaymentTransaction {
                amounts_req: AmountsReq {
                    currency: currency.into(),
                    requested_amount: amount,
                },
            },
        }
    }

    /// Attaches base64 acquirer data (see [`Base64Bytes`](super::Base64Bytes)).
    #[must_use]
    pub fn with_sale_to_acquirer_data(mut self, data: impl Into<String>) -> Self {
        self.sale_data.sale_to_acquirer_data = Some(data.into());
        self
    }

    /// Returns the requested amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.payment_transaction.amounts_req.requested_amount
    }

    /// Returns the requested currency.
    #[must_use]
    pub fn currency(&self) -> &str {
        &self.payment_transaction.amounts_req.currency
    }
}

impl MessageBody for PaymentRequest {
    const BODY_KEY: &'static str = "PaymentRequest";
    const CLASS: MessageClass = MessageClass::Service;
    const CATEGORY: MessageCategory = MessageCategory::Payment;
    const TYPE: MessageType = MessageType::Request;
}

impl RequestBody for PaymentRequest {
    type Response = PaymentResponse;

    fn assign_transaction(&mut self, id: SaleTransactionId) {
        self.sale_data.sale_transaction_id = Some(id);
    }

    fn transaction(&self) -> Option<&SaleTransactionId> {
        self.sale_data.sale_transaction_id.as_ref()
    }
}

/// Outcome reported by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    /// The transaction was approved.
    Success,
    /// The transaction was declined or could not complete.
    Failure,
    /// Only part of the requested amount was approved.
    Partial,
}

/// Reason attached to a non-successful result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCondition {
    /// The transaction was aborted.
    Aborted,
    /// The terminal is busy with another transaction.
    Busy,
    /// The cardholder cancelled.
    Cancel,
    /// The device is out of order.
    DeviceOut,
    /// The transaction is still in progress.
    InProgress,
    /// The card is invalid.
    InvalidCard,
    /// The request could not be parsed by the terminal.
    MessageFormat,
    /// The operation is not allowed.
    NotAllowed,
    /// The referenced transaction was not found.
    NotFound,
    /// The payment was refused by the issuer or acquirer.
    Refusal,
    /// The acquirer host could not be reached.
    UnreachableHost,
    /// The cardholder entered a wrong PIN.
    #[serde(rename = "WrongPIN")]
    WrongPin,
    /// A condition this crate does not know about.
    #[serde(other)]
    Unknown,
}

/// Result block of a terminal response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    /// Overall result.
    #[serde(rename = "Result")]
    pub result: ResultCode,
    /// Failure reason, when the result is not a success.
    #[serde(
        rename = "ErrorCondition",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_condition: Option<ErrorCondition>,
    /// Free-form additional data (URL-encoded key/value pairs).
    #[serde(
        rename = "AdditionalResponse",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_response: Option<String>,
}

/// Terminal-side identification of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoiData {
    /// The terminal's transaction identifier.
    #[serde(rename = "POITransactionID")]
    pub poi_transaction_id: SaleTransactionId,
}

/// Authorized amount and currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountsResp {
    /// ISO 4217 currency code.
    #[serde(rename = "Currency")]
    pub currency: String,
    /// Authorized amount in major units.
    #[serde(
        rename = "AuthorizedAmount",
        with = "rust_decimal::serde::arbitrary_precision"
    )]
    pub authorized_amount: Decimal,
}

/// Financial result of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    /// Authorized amounts.
    #[serde(rename = "AmountsResp")]
    pub amounts_resp: AmountsResp,
}

/// A card payment response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResponse {
    /// Result block.
    #[serde(rename = "Response")]
    pub response: ResponseStatus,
    /// Echo of the sale-side data.
    #[serde(rename = "SaleData")]
    pub sale_data: SaleData,
    /// Terminal-side transaction data.
    #[serde(rename = "POIData", default, skip_serializing_if = "Option::is_none")]
    pub poi_data: Option<PoiData>,
    /// Authorized amounts, when the payment went through.
    #[serde(
        rename = "PaymentResult",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub payment_result: Option<PaymentResult>,
}

impl PaymentResponse {
    /// Returns `true` if the terminal approved the payment in full.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.response.result == ResultCode::Success
    }

    /// Returns the authorized amount, if any.
    #[must_use]
    pub fn authorized_amount(&self) -> Option<Decimal> {
        self.payment_result
            .as_ref()
            .map(|r| r.amounts_resp.authorized_amount)
    }
}

impl MessageBody for PaymentResponse {
    const BODY_KEY: &'static str = "PaymentResponse";
    const CLASS: MessageClass = MessageClass::Service;
    const CATEGORY: MessageCategory = MessageCategory::Payment;
    const TYPE: MessageType = MessageType::Response;
}

#[cfg(test)]
mod tests {
    use super::super::{Message, MessageHeader, decode, encode};
    use super::*;

    #[test]
    fn test_response_decodes_from_terminal_json() {
        let raw = br#"{
            "SaleToPOIResponse": {
                "MessageHeader": {
                    "ProtocolVersion": "3.0",
                    "MessageClass": "Service",
                    "MessageCategory": "Payment",
                    "MessageType": "Response",
                    "ServiceID": "1A2B3C",
                    "SaleID": "sale-1",
                    "POIID": "BFCBF842-02DF-4D7F-AAED-F6535BFB5D48.352"
                },
                "PaymentResponse": {
                    "Response": { "Result": "Success", "AdditionalResponse": "tid=1" },
                    "SaleData": {
                        "SaleTransactionID": { "TransactionID": "tx-1", "TimeStamp": "2024-07-31T12:00:00Z" }
                    },
                    "POIData": {
                        "POITransactionID": { "TransactionID": "poi-9", "TimeStamp": "2024-07-31T12:00:03Z" }
                    },
                    "PaymentResult": { "AmountsResp": { "Currency": "USD", "AuthorizedAmount": 101 } }
                }
            }
        }"#;
        let message: Message<PaymentResponse> = decode(raw).unwrap();
        assert!(message.body().is_success());
        assert_eq!(message.body().authorized_amount(), Some(Decimal::from(101)));
        assert_eq!(message.header().service_id(), "1A2B3C");
    }

    #[test]
    fn test_unknown_error_condition_is_tolerated() {
        let status: ResponseStatus =
            serde_json::from_str(r#"{"Result": "Failure", "ErrorCondition": "Teapot"}"#).unwrap();
        assert_eq!(status.error_condition, Some(ErrorCondition::Unknown));
    }

    #[test]
    fn test_declined_response_round_trip() {
        let body = PaymentResponse {
            response: ResponseStatus {
                result: ResultCode::Failure,
                error_condition: Some(ErrorCondition::Refusal),
                additional_response: None,
            },
            sale_data: SaleData::default(),
            poi_data: None,
            payment_result: None,
        };
        let message = Message::new(
            MessageHeader::for_body::<PaymentResponse>("SVC001", "sale-2", "poi-2"),
            body,
        );
        let decoded: Message<PaymentResponse> = decode(&encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert!(!decoded.body().is_success());
    }
}

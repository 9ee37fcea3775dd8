//! A simulated terminal and session backend living in the same process.
//!
//! [`LoopbackTerminal`] stands in for a paired card reader: it hands out
//! setup tokens, answers payment requests after a configurable latency and
//! declines amounts above a configured limit. [`LoopbackAuthority`] issues
//! sessions without a network round trip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use posterm::device::{Device, DeviceTransport, TransportRequest};
use posterm::error::{PosError, SessionError, TransportFailure};
use posterm::proto::{
    AmountsResp, Base64Bytes, ErrorCondition, Message, MessageHeader, PaymentRequest,
    PaymentResponse, PaymentResult, PoiData, ResponseStatus, ResultCode, SaleTransactionId,
    decode, encode,
};
use posterm::session::{SessionAuthority, SessionRequest, SessionResponse, SetupTokenSource};
use posterm::timestamp::UnixTimestamp;
use serde_json::json;
use uuid::Uuid;

use crate::config::TerminalConfig;

/// A simulated payment terminal.
#[derive(Debug)]
pub struct LoopbackTerminal {
    device: Device,
    config: TerminalConfig,
    connected: AtomicBool,
}

impl LoopbackTerminal {
    /// Creates a terminal with a fresh serial number.
    pub fn new(config: TerminalConfig) -> Self {
        let serial = Uuid::new_v4().simple().to_string();
        Self {
            device: Device::new(format!("LB-{}", &serial[..8]), "Loopback terminal"),
            config,
            connected: AtomicBool::new(false),
        }
    }

    /// Returns the device this terminal reports to discovery.
    pub const fn device(&self) -> &Device {
        &self.device
    }

    fn answer(&self, request: &Message<PaymentRequest>) -> Message<PaymentResponse> {
        let header = request.header();
        let body = request.body();
        let declined = self
            .config
            .decline_above
            .is_some_and(|limit| body.amount() > limit);

        let response = PaymentResponse {
            response: ResponseStatus {
                result: if declined {
                    ResultCode::Failure
                } else {
                    ResultCode::Success
                },
                error_condition: declined.then_some(ErrorCondition::Refusal),
                additional_response: Some(format!("terminal={}", self.device.id)),
            },
            sale_data: body.sale_data.clone(),
            poi_data: body.sale_data.sale_transaction_id.as_ref().map(|tx| PoiData {
                poi_transaction_id: SaleTransactionId::new(
                    Uuid::new_v4().to_string(),
                    tx.timestamp,
                ),
            }),
            payment_result: (!declined).then(|| PaymentResult {
                amounts_resp: AmountsResp {
                    currency: body.currency().to_owned(),
                    authorized_amount: body.amount(),
                },
            }),
        };
        Message::new(
            MessageHeader::for_body::<PaymentResponse>(
                header.service_id(),
                header.sale_id(),
                header.poi_id(),
            ),
            response,
        )
    }
}

#[async_trait]
impl DeviceTransport for LoopbackTerminal {
    async fn connect(&self, device: &Device) -> Result<(), TransportFailure> {
        if *device != self.device {
            return Err(TransportFailure::new(format!("unknown device {}", device.id)));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, _device: &Device) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn exchange(&self, request: TransportRequest) -> Result<Vec<u8>, TransportFailure> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportFailure::new("link is down"));
        }
        if request.session.is_expired() {
            return Err(TransportFailure::new("session expired"));
        }
        let message: Message<PaymentRequest> =
            decode(&request.payload).map_err(|e| TransportFailure::new(e.to_string()))?;
        tracing::debug!(
            mode = ?request.presentation_mode,
            interface = ?request.payment_interface,
            amount = %message.body().amount(),
            "loopback terminal processing payment"
        );
        tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        encode(&self.answer(&message)).map_err(|e| TransportFailure::new(e.to_string()))
    }

    async fn abort(&self) -> Result<(), TransportFailure> {
        tracing::info!("loopback terminal aborted the transaction");
        Ok(())
    }
}

#[async_trait]
impl SetupTokenSource for LoopbackTerminal {
    async fn setup_token(&self) -> Result<String, PosError> {
        Ok(format!("setup-{}", Uuid::new_v4()))
    }
}

/// Issues hour-long sessions for a fixed installation.
#[derive(Debug)]
pub struct LoopbackAuthority {
    installation_id: String,
}

impl LoopbackAuthority {
    /// Creates an authority that registers every caller as `installation_id`.
    pub fn new(installation_id: impl Into<String>) -> Self {
        Self {
            installation_id: installation_id.into(),
        }
    }
}

#[async_trait]
impl SessionAuthority for LoopbackAuthority {
    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<SessionResponse, SessionError> {
        if !request.setup_token.starts_with("setup-") {
            return Err(SessionError::Rejected {
                status: 401,
                body: "unknown setup token".to_owned(),
            });
        }
        let expires_at = UnixTimestamp::now() + Duration::from_secs(3600);
        let sdk_data = Base64Bytes::encode_json(&json!({
            "environment": "loopback",
            "expiresAt": expires_at,
        }))
        .map_err(|e| SessionError::Decode(e.to_string()))?
        .into_string();
        Ok(SessionResponse {
            sdk_data,
            installation_id: Some(self.installation_id.clone()),
            id: Some(Uuid::new_v4().to_string()),
            merchant_account: Some(request.merchant_account.clone()),
            store: Some(request.store.clone()),
        })
    }
}

use async_trait::async_trait;

use crate::config::{PaymentInterface, PresentationMode};
use crate::error::TransportFailure;
use crate::session::SessionToken;

use super::Device;

/// A request handed to the device for one exchange.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Encoded request envelope.
    pub payload: Vec<u8>,
    /// Whether the device shows its own UI.
    pub presentation_mode: PresentationMode,
    /// Card acceptance interface to use.
    pub payment_interface: PaymentInterface,
    /// Session the exchange runs under.
    pub session: SessionToken,
}

/// Link to a physical payment-accepting device.
///
/// Implementations own pairing, encryption and framing. The transport carries
/// at most one exchange at a time; callers guarantee they never overlap.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Opens a link to `device`.
    async fn connect(&self, device: &Device) -> Result<(), TransportFailure>;

    /// Closes the link to `device`. Best effort.
    async fn disconnect(&self, device: &Device);

    /// Sends one request and resolves with the device's single response.
    async fn exchange(&self, request: TransportRequest) -> Result<Vec<u8>, TransportFailure>;

    /// Aborts the exchange in progress. `Ok` confirms the device is idle again.
    async fn abort(&self) -> Result<(), TransportFailure>;
}

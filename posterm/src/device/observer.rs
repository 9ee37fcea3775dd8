use crate::error::{PosError, TransportFailure};

use super::{Device, DeviceConnectionState};

/// Receives device lifecycle notifications.
///
/// All methods default to no-ops; implement the ones you need. Notifications
/// are fire-and-forget and run on the task that caused the transition, after
/// the controller has released its state, so an observer may call back into
/// the controller.
pub trait DeviceObserver: Send + Sync {
    /// A device was found by a scan.
    fn on_discovered(&self, _device: &Device) {}

    /// A scan failed.
    fn on_discovery_failed(&self, _error: &TransportFailure) {}

    /// A connect attempt finished; `error` is `None` on success.
    fn on_connected(&self, _device: &Device, _error: Option<&PosError>) {}

    /// A connected device went away, explicitly or on its own.
    fn on_disconnected(&self, _device: &Device) {}

    /// Fires exactly once for every state transition.
    fn on_state_changed(
        &self,
        _device: &Device,
        _from: Option<DeviceConnectionState>,
        _to: DeviceConnectionState,
    ) {
    }
}

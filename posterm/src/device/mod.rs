//! Device session lifecycle.
//!
//! [`DeviceSessionController`] tracks the one payment device the application
//! works with and drives it through its connection states:
//!
//! ```text
//!   (none) ──discover──▶ Discovered ──connect──▶ Connecting ──ok──▶ Connected
//!      ▲                     ▲                        │                │
//!      │                     │                   error/timeout    disconnect / fail
//!      │                     │                        ▼                ▼
//!      └──── Disconnected ◀──┴────── reset ────── Failed      Disconnected | Failed
//! ```
//!
//! Discovery itself is owned by the hardware layer, which reports results
//! through [`DeviceSessionController::device_discovered`] and
//! [`DeviceSessionController::discovery_failed`]. Every transition is
//! published to the registered [`DeviceObserver`] and to
//! [`DeviceSessionController::subscribe`] receivers.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::DeviceConfig;
use crate::error::{PosError, TransportFailure};

mod observer;
mod transport;

pub use observer::DeviceObserver;
pub use transport::{DeviceTransport, TransportRequest};

/// Connection state of the tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceConnectionState {
    /// Found by a scan, not yet connected.
    Discovered,
    /// A connect attempt is in progress.
    Connecting,
    /// Ready to carry transactions.
    Connected,
    /// The link was closed. A new scan may rediscover the device.
    Disconnected,
    /// The link is unusable until [`DeviceSessionController::reset`].
    Failed,
}

impl DeviceConnectionState {
    /// Returns the `snake_case` name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeviceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment device as reported by the hardware layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Stable hardware identifier (serial number, BLE address, ...).
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

impl Device {
    /// Creates a device descriptor.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The tracked device and its current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    /// The device.
    pub device: Device,
    /// Its connection state.
    pub state: DeviceConnectionState,
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Discover,
    Connect,
    ConnectSucceeded,
    ConnectFailed,
    Disconnect,
    Fail,
    Reset,
}

impl Event {
    const fn action(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Connect => "connect",
            Self::ConnectSucceeded | Self::ConnectFailed => "complete connect",
            Self::Disconnect => "disconnect",
            Self::Fail => "fail",
            Self::Reset => "reset",
        }
    }
}

/// Returns the state `event` leads to from `from`, or `None` if not allowed.
const fn next_state(
    from: Option<DeviceConnectionState>,
    event: Event,
) -> Option<DeviceConnectionState> {
    use DeviceConnectionState::{Connected, Connecting, Disconnected, Discovered, Failed};
    match (from, event) {
        (None | Some(Discovered | Disconnected | Failed), Event::Discover) => Some(Discovered),
        (Some(Discovered), Event::Connect) => Some(Connecting),
        (Some(Connecting), Event::ConnectSucceeded) => Some(Connected),
        (Some(Connecting), Event::ConnectFailed) | (Some(Connecting | Connected), Event::Fail) => {
            Some(Failed)
        }
        (Some(Connected), Event::Disconnect) => Some(Disconnected),
        (Some(Failed), Event::Reset) => Some(Disconnected),
        _ => None,
    }
}

/// A state change that was applied.
#[derive(Debug, Clone)]
struct Transition {
    device: Device,
    from: Option<DeviceConnectionState>,
    to: DeviceConnectionState,
}

/// Tracks one payment device and its connection lifecycle.
///
/// At most one device is tracked, so at most one device session is
/// `Connected` at any time.
pub struct DeviceSessionController {
    transport: Arc<dyn DeviceTransport>,
    config: DeviceConfig,
    state: watch::Sender<Option<DeviceSnapshot>>,
    observer: RwLock<Option<Weak<dyn DeviceObserver>>>,
}

impl fmt::Debug for DeviceSessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSessionController")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl DeviceSessionController {
    /// Creates a controller over `transport` with no device known.
    #[must_use]
    pub fn new(transport: Arc<dyn DeviceTransport>, config: DeviceConfig) -> Self {
        Self {
            transport,
            config,
            state: watch::Sender::new(None),
            observer: RwLock::new(None),
        }
    }

    /// Registers the observer, replacing any previous one.
    ///
    /// Only a weak reference is kept: the caller owns the observer, and once
    /// it is dropped notifications stop.
    pub fn set_observer<O: DeviceObserver + 'static>(&self, observer: &Arc<O>) {
        let weak = Arc::downgrade(observer);
        let weak: Weak<dyn DeviceObserver> = weak;
        *self
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(weak);
    }

    /// Removes the registered observer.
    pub fn clear_observer(&self) {
        *self
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns the current state, `None` when no device is known.
    #[must_use]
    pub fn state(&self) -> Option<DeviceConnectionState> {
        self.state.borrow().as_ref().map(|s| s.state)
    }

    /// Returns the tracked device and its state.
    #[must_use]
    pub fn snapshot(&self) -> Option<DeviceSnapshot> {
        self.state.borrow().clone()
    }

    /// Returns `true` if the tracked device is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == Some(DeviceConnectionState::Connected)
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceSnapshot>> {
        self.state.subscribe()
    }

    /// Returns the connected device.
    ///
    /// # Errors
    ///
    /// Returns [`PosError::NotConnected`] unless the state is `Connected`.
    pub fn connected_device(&self) -> Result<Device, PosError> {
        match &*self.state.borrow() {
            Some(DeviceSnapshot {
                device,
                state: DeviceConnectionState::Connected,
            }) => Ok(device.clone()),
            _ => Err(PosError::NotConnected),
        }
    }

    pub(crate) const fn transport(&self) -> &Arc<dyn DeviceTransport> {
        &self.transport
    }

    /// Records a device found by the hardware scan.
    ///
    /// Replaces a previously discovered, disconnected or failed device.
    ///
    /// # Errors
    ///
    /// Returns [`PosError::InvalidState`] while a device is connecting or connected.
    pub fn device_discovered(&self, device: Device) -> Result<(), PosError> {
        let transition = self.apply(Event::Discover, Some(device))?;
        self.publish(&transition, None);
        Ok(())
    }

    /// Reports a failed hardware scan. The state is left unchanged.
    pub fn discovery_failed(&self, error: &TransportFailure) {
        #[cfg(feature = "telemetry")]
        tracing::warn!(error = %error, "posterm.device.discovery_failed");
        if let Some(observer) = self.observer() {
            observer.on_discovery_failed(error);
        }
    }

    /// Connects the discovered device.
    ///
    /// The state moves to `Connecting`, then to `Connected` if the transport
    /// connects within the configured timeout, or to `Failed` otherwise. If
    /// this future is dropped while connecting, the session is marked failed.
    ///
    /// # Errors
    ///
    /// - [`PosError::InvalidState`] if no device is in the `Discovered` state
    /// - [`PosError::TransportError`] if the transport refused the link
    /// - [`PosError::TransportTimeout`] if the connect timeout elapsed
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "posterm.device.connect", skip_all, err)
    )]
    pub async fn connect(&self) -> Result<(), PosError> {
        let started = self.apply(Event::Connect, None)?;
        self.publish(&started, None);

        let guard = FailOnDrop::new(self);
        let result = tokio::time::timeout(
            self.config.connect_timeout(),
            self.transport.connect(&started.device),
        )
        .await;
        guard.disarm();

        let error = match result {
            Ok(Ok(())) => None,
            Ok(Err(failure)) => Some(PosError::from(failure)),
            Err(_) => Some(PosError::TransportTimeout),
        };
        let event = if error.is_some() {
            Event::ConnectFailed
        } else {
            Event::ConnectSucceeded
        };
        // Fails only if someone else already moved the state on, e.g. a
        // reset from an observer; report the attempt's own outcome regardless.
        if let Ok(finished) = self.apply(event, None) {
            self.publish(&finished, error.as_ref());
        }
        error.map_or(Ok(()), Err)
    }

    /// Closes the link to the connected device.
    ///
    /// # Errors
    ///
    /// Returns [`PosError::InvalidState`] unless the state is `Connected`.
    pub async fn disconnect(&self) -> Result<(), PosError> {
        let transition = self.apply(Event::Disconnect, None)?;
        self.transport.disconnect(&transition.device).await;
        self.publish(&transition, None);
        Ok(())
    }

    /// Records that the hardware dropped the connected device on its own.
    ///
    /// # Errors
    ///
    /// Returns [`PosError::InvalidState`] unless the state is `Connected`.
    pub fn hardware_disconnected(&self) -> Result<(), PosError> {
        let transition = self.apply(Event::Disconnect, None)?;
        self.publish(&transition, None);
        Ok(())
    }

    /// Marks a connecting or connected session as failed.
    ///
    /// Used when the transport can no longer be trusted, such as after an
    /// abort that was never confirmed. Returns `true` if the state changed.
    pub fn mark_failed(&self) -> bool {
        match self.apply(Event::Fail, None) {
            Ok(transition) => {
                self.publish(&transition, None);
                true
            }
            Err(_) => false,
        }
    }

    /// Clears a failed session so the device can be rediscovered.
    ///
    /// # Errors
    ///
    /// Returns [`PosError::InvalidState`] unless the state is `Failed`.
    pub fn reset(&self) -> Result<(), PosError> {
        let transition = self.apply(Event::Reset, None)?;
        self.publish(&transition, None);
        Ok(())
    }

    /// Applies `event` atomically. `device` replaces the tracked device when given.
    fn apply(&self, event: Event, device: Option<Device>) -> Result<Transition, PosError> {
        let mut outcome = None;
        self.state.send_if_modified(|current| {
            let from = current.as_ref().map(|s| s.state);
            let Some(to) = next_state(from, event) else {
                return false;
            };
            let device = match (device, current.as_ref()) {
                (Some(device), _) => device,
                (None, Some(snapshot)) => snapshot.device.clone(),
                (None, None) => return false,
            };
            *current = Some(DeviceSnapshot {
                device: device.clone(),
                state: to,
            });
            outcome = Some(Transition { device, from, to });
            true
        });
        outcome.ok_or_else(|| PosError::InvalidState {
            from: self.state(),
            action: event.action(),
        })
    }

    fn observer(&self) -> Option<Arc<dyn DeviceObserver>> {
        self.observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn publish(&self, transition: &Transition, error: Option<&PosError>) {
        #[cfg(feature = "telemetry")]
        tracing::info!(
            device = %transition.device.id,
            from = transition.from.map_or("none", |s| s.as_str()),
            to = %transition.to,
            "posterm.device.transition"
        );
        let Some(observer) = self.observer() else {
            return;
        };
        let Transition { device, from, to } = transition;
        observer.on_state_changed(device, *from, *to);
        match (from, to) {
            (_, DeviceConnectionState::Discovered) => observer.on_discovered(device),
            (_, DeviceConnectionState::Connected) => observer.on_connected(device, None),
            (Some(DeviceConnectionState::Connecting), DeviceConnectionState::Failed) => {
                observer.on_connected(device, error);
            }
            (Some(DeviceConnectionState::Connected), DeviceConnectionState::Disconnected) => {
                observer.on_disconnected(device);
            }
            _ => {}
        }
    }
}

/// Marks the session failed unless disarmed, so an abandoned operation never
/// leaves the device stuck mid-flight.
pub(crate) struct FailOnDrop<'a> {
    controller: &'a DeviceSessionController,
    armed: bool,
}

impl<'a> FailOnDrop<'a> {
    pub(crate) const fn new(controller: &'a DeviceSessionController) -> Self {
        Self {
            controller,
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FailOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.mark_failed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Observed, RecordingObserver, ScriptedTransport};
    use std::time::Duration;

    fn controller(transport: &Arc<ScriptedTransport>) -> DeviceSessionController {
        DeviceSessionController::new(transport.clone(), DeviceConfig::default())
    }

    fn reader() -> Device {
        Device::new("S1F2-000158", "Counter reader")
    }

    #[tokio::test]
    async fn test_happy_path_notifies_once_per_transition() {
        let transport = Arc::new(ScriptedTransport::approving());
        let controller = controller(&transport);
        let observer = Arc::new(RecordingObserver::default());
        controller.set_observer(&observer);

        assert_eq!(controller.state(), None);
        controller.device_discovered(reader()).unwrap();
        controller.connect().await.unwrap();
        assert!(controller.is_connected());
        controller.disconnect().await.unwrap();
        assert_eq!(controller.state(), Some(DeviceConnectionState::Disconnected));

        use DeviceConnectionState::{Connected, Connecting, Disconnected, Discovered};
        assert_eq!(
            observer.transitions(),
            vec![
                (None, Discovered),
                (Some(Discovered), Connecting),
                (Some(Connecting), Connected),
                (Some(Connected), Disconnected),
            ]
        );
        assert_eq!(
            observer.callbacks(),
            vec![
                Observed::Discovered,
                Observed::Connected(None),
                Observed::Disconnected
            ]
        );
        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_connect_requires_discovered_device() {
        let transport = Arc::new(ScriptedTransport::approving());
        let controller = controller(&transport);
        let err = controller.connect().await.unwrap_err();
        assert_eq!(
            err,
            PosError::InvalidState {
                from: None,
                action: "connect"
            }
        );
        assert_eq!(transport.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_moves_to_failed_and_reports_error() {
        let transport =
            Arc::new(ScriptedTransport::approving().with_connect_failure("pairing lost"));
        let controller = controller(&transport);
        let observer = Arc::new(RecordingObserver::default());
        controller.set_observer(&observer);

        controller.device_discovered(reader()).unwrap();
        let err = controller.connect().await.unwrap_err();
        assert_eq!(err, PosError::TransportError("pairing lost".into()));
        assert_eq!(controller.state(), Some(DeviceConnectionState::Failed));
        assert_eq!(
            observer.callbacks().last(),
            Some(&Observed::Connected(Some(err)))
        );

        controller.reset().unwrap();
        assert_eq!(controller.state(), Some(DeviceConnectionState::Disconnected));
        controller.device_discovered(reader()).unwrap();
        assert_eq!(controller.state(), Some(DeviceConnectionState::Discovered));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_moves_to_failed() {
        let transport = Arc::new(
            ScriptedTransport::approving().with_connect_delay(Duration::from_secs(600)),
        );
        let controller = controller(&transport);
        controller.device_discovered(reader()).unwrap();
        let err = controller.connect().await.unwrap_err();
        assert_eq!(err, PosError::TransportTimeout);
        assert_eq!(controller.state(), Some(DeviceConnectionState::Failed));
    }

    #[tokio::test]
    async fn test_discovery_rejected_while_connected() {
        let transport = Arc::new(ScriptedTransport::approving());
        let controller = controller(&transport);
        controller.device_discovered(reader()).unwrap();
        controller.connect().await.unwrap();

        let err = controller
            .device_discovered(Device::new("other", "Other reader"))
            .unwrap_err();
        assert!(matches!(err, PosError::InvalidState { .. }));
        assert_eq!(controller.connected_device().unwrap(), reader());
    }

    #[tokio::test]
    async fn test_hardware_disconnect_and_mark_failed() {
        let transport = Arc::new(ScriptedTransport::approving());
        let controller = controller(&transport);
        controller.device_discovered(reader()).unwrap();
        controller.connect().await.unwrap();

        assert!(controller.mark_failed());
        assert!(!controller.mark_failed());
        assert!(controller.hardware_disconnected().is_err());
        assert_eq!(controller.connected_device(), Err(PosError::NotConnected));
    }

    #[tokio::test]
    async fn test_observer_replacement_and_weak_drop() {
        let transport = Arc::new(ScriptedTransport::approving());
        let controller = controller(&transport);
        let first = Arc::new(RecordingObserver::default());
        let second = Arc::new(RecordingObserver::default());

        controller.set_observer(&first);
        controller.set_observer(&second);
        controller.device_discovered(reader()).unwrap();
        assert!(first.callbacks().is_empty());
        assert_eq!(second.callbacks(), vec![Observed::Discovered]);

        drop(second);
        controller.connect().await.unwrap();
        assert!(controller.is_connected());
    }

    #[tokio::test]
    async fn test_discovery_failure_keeps_state() {
        let transport = Arc::new(ScriptedTransport::approving());
        let controller = controller(&transport);
        let observer = Arc::new(RecordingObserver::default());
        controller.set_observer(&observer);

        controller.discovery_failed(&TransportFailure::new("bluetooth off"));
        assert_eq!(controller.state(), None);
        assert_eq!(
            observer.callbacks(),
            vec![Observed::DiscoveryFailed("bluetooth off".into())]
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let transport = Arc::new(ScriptedTransport::approving());
        let controller = controller(&transport);
        let mut rx = controller.subscribe();
        controller.device_discovered(reader()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().as_ref().map(|s| s.state),
            Some(DeviceConnectionState::Discovered)
        );
    }
}

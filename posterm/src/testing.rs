//! In-memory fakes for the session and device ports.
//!
//! Enabled by the `test-util` feature. These let downstream crates exercise
//! the orchestrator end to end without a backend or a physical terminal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::device::{
    Device, DeviceConnectionState, DeviceObserver, DeviceTransport, TransportRequest,
};
use crate::error::{PosError, SessionError, TransportFailure};
use crate::proto::{
    AmountsResp, Base64Bytes, Message, MessageHeader, PaymentRequest, PaymentResponse,
    PaymentResult, PoiData, ResponseStatus, ResultCode, SaleTransactionId, decode, encode,
};
use crate::session::{SessionAuthority, SessionRequest, SessionResponse, SetupTokenSource};
use crate::timestamp::UnixTimestamp;

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a [`ScriptedTransport`] does with each exchange.
#[derive(Debug, Clone)]
pub enum ExchangeBehavior {
    /// Answer a payment request with an approval for the full amount.
    Approve,
    /// Approve after the given delay.
    Delay(Duration),
    /// Fail with a transport error.
    Fail(String),
    /// Never answer.
    Hang,
    /// Answer with these exact bytes.
    Respond(Vec<u8>),
}

/// What a [`ScriptedTransport`] does when asked to abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortBehavior {
    /// Confirm the abort.
    Confirm,
    /// Report that the abort failed.
    Refuse,
    /// Never answer.
    Hang,
}

/// A [`DeviceTransport`] that follows a script and records what it was asked.
#[derive(Debug)]
pub struct ScriptedTransport {
    exchange: Mutex<ExchangeBehavior>,
    abort: Mutex<AbortBehavior>,
    connect_failure: Option<String>,
    connect_delay: Option<Duration>,
    requests: Mutex<Vec<TransportRequest>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    aborts: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedTransport {
    /// Creates a transport that connects and approves every payment.
    #[must_use]
    pub fn approving() -> Self {
        Self::with_exchange(ExchangeBehavior::Approve)
    }

    /// Creates a transport that handles exchanges as `behavior` says.
    #[must_use]
    pub fn with_exchange(behavior: ExchangeBehavior) -> Self {
        Self {
            exchange: Mutex::new(behavior),
            abort: Mutex::new(AbortBehavior::Confirm),
            connect_failure: None,
            connect_delay: None,
            requests: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Makes every connect attempt fail with `reason`.
    #[must_use]
    pub fn with_connect_failure(mut self, reason: impl Into<String>) -> Self {
        self.connect_failure = Some(reason.into());
        self
    }

    /// Makes every connect attempt take `delay`.
    #[must_use]
    pub const fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Sets how abort requests are answered.
    #[must_use]
    pub fn with_abort(self, behavior: AbortBehavior) -> Self {
        *locked(&self.abort) = behavior;
        self
    }

    /// Replaces the exchange behavior for subsequent exchanges.
    pub fn set_exchange(&self, behavior: ExchangeBehavior) {
        *locked(&self.exchange) = behavior;
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<TransportRequest> {
        locked(&self.requests).clone()
    }

    /// Returns the number of exchanges started.
    #[must_use]
    pub fn exchange_calls(&self) -> usize {
        locked(&self.requests).len()
    }

    /// Returns the number of connect attempts.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Returns the number of disconnects.
    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Returns the number of abort requests.
    #[must_use]
    pub fn abort_calls(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Returns the highest number of exchanges that were in flight at once.
    #[must_use]
    pub fn max_concurrent_exchanges(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

struct ActiveExchange<'a>(&'a AtomicUsize);

impl Drop for ActiveExchange<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceTransport for ScriptedTransport {
    async fn connect(&self, _device: &Device) -> Result<(), TransportFailure> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.connect_failure {
            Some(reason) => Err(TransportFailure::new(reason.clone())),
            None => Ok(()),
        }
    }

    async fn disconnect(&self, _device: &Device) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn exchange(&self, request: TransportRequest) -> Result<Vec<u8>, TransportFailure> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveExchange(&self.active);
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let payload = request.payload.clone();
        locked(&self.requests).push(request);
        let behavior = locked(&self.exchange).clone();
        match behavior {
            ExchangeBehavior::Approve => approve_payment(&payload),
            ExchangeBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                approve_payment(&payload)
            }
            ExchangeBehavior::Fail(reason) => Err(TransportFailure::new(reason)),
            ExchangeBehavior::Hang => std::future::pending().await,
            ExchangeBehavior::Respond(bytes) => Ok(bytes),
        }
    }

    async fn abort(&self) -> Result<(), TransportFailure> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        let behavior = *locked(&self.abort);
        match behavior {
            AbortBehavior::Confirm => Ok(()),
            AbortBehavior::Refuse => Err(TransportFailure::new("abort refused")),
            AbortBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Builds an approval for an encoded payment request, echoing its header.
///
/// # Errors
///
/// Returns a [`TransportFailure`] if `payload` is not a payment request.
pub fn approve_payment(payload: &[u8]) -> Result<Vec<u8>, TransportFailure> {
    let request: Message<PaymentRequest> =
        decode(payload).map_err(|e| TransportFailure::new(e.to_string()))?;
    let (header, body) = request.into_parts();
    let amount = body.amount();
    let currency = body.currency().to_owned();
    let response = PaymentResponse {
        response: ResponseStatus {
            result: ResultCode::Success,
            error_condition: None,
            additional_response: None,
        },
        poi_data: body.sale_data.sale_transaction_id.as_ref().map(|tx| PoiData {
            poi_transaction_id: SaleTransactionId::new(
                format!("POI-{}", tx.transaction_id),
                tx.timestamp,
            ),
        }),
        sale_data: body.sale_data,
        payment_result: Some(PaymentResult {
            amounts_resp: AmountsResp {
                currency,
                authorized_amount: amount,
            },
        }),
    };
    let message = Message::new(
        MessageHeader::for_body::<PaymentResponse>(
            header.service_id(),
            header.sale_id(),
            header.poi_id(),
        ),
        response,
    );
    encode(&message).map_err(|e| TransportFailure::new(e.to_string()))
}

/// A [`SessionAuthority`] that returns a fixed answer and records requests.
#[derive(Debug)]
pub struct StaticAuthority {
    answer: Mutex<Result<SessionResponse, SessionError>>,
    requests: Mutex<Vec<SessionRequest>>,
}

impl StaticAuthority {
    /// Creates an authority that always answers with `answer`.
    #[must_use]
    pub const fn new(answer: Result<SessionResponse, SessionError>) -> Self {
        Self {
            answer: Mutex::new(answer),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Creates an authority that issues hour-long sessions for `installation_id`.
    #[must_use]
    pub fn issuing(installation_id: &str) -> Self {
        Self::new(Ok(session_response(installation_id, UnixTimestamp::now().as_secs() + 3600)))
    }

    /// Replaces the answer for subsequent calls.
    pub fn respond_with(&self, answer: Result<SessionResponse, SessionError>) {
        *locked(&self.answer) = answer;
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SessionRequest> {
        locked(&self.requests).clone()
    }
}

#[async_trait]
impl SessionAuthority for StaticAuthority {
    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<SessionResponse, SessionError> {
        locked(&self.requests).push(request.clone());
        locked(&self.answer).clone()
    }
}

/// Builds a session response whose `sdkData` expires at `expires_at` seconds.
#[must_use]
pub fn session_response(installation_id: &str, expires_at: u64) -> SessionResponse {
    let sdk_data = Base64Bytes::encode(
        json!({ "environment": "test", "expiresAt": expires_at }).to_string(),
    )
    .into_string();
    SessionResponse {
        sdk_data,
        installation_id: Some(installation_id.to_owned()),
        id: None,
        merchant_account: None,
        store: None,
    }
}

/// A [`SetupTokenSource`] that hands out the same token and counts calls.
#[derive(Debug)]
pub struct StaticSetupTokens {
    token: String,
    issued: AtomicUsize,
}

impl StaticSetupTokens {
    /// Creates a source that always returns `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            issued: AtomicUsize::new(0),
        }
    }

    /// Returns how many tokens were handed out.
    #[must_use]
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SetupTokenSource for StaticSetupTokens {
    async fn setup_token(&self) -> Result<String, PosError> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.clone())
    }
}

/// A capability callback seen by a [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// `on_discovered`.
    Discovered,
    /// `on_discovery_failed` with the failure reason.
    DiscoveryFailed(String),
    /// `on_connected` with the connect error, if any.
    Connected(Option<PosError>),
    /// `on_disconnected`.
    Disconnected,
}

type StateChange = (Option<DeviceConnectionState>, DeviceConnectionState);

/// A [`DeviceObserver`] that records every notification.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    callbacks: Mutex<Vec<Observed>>,
    transitions: Mutex<Vec<StateChange>>,
}

impl RecordingObserver {
    /// Returns the capability callbacks received, in order.
    #[must_use]
    pub fn callbacks(&self) -> Vec<Observed> {
        locked(&self.callbacks).clone()
    }

    /// Returns the `(from, to)` pairs of every state change, in order.
    #[must_use]
    pub fn transitions(&self) -> Vec<StateChange> {
        locked(&self.transitions).clone()
    }
}

impl DeviceObserver for RecordingObserver {
    fn on_discovered(&self, _device: &Device) {
        locked(&self.callbacks).push(Observed::Discovered);
    }

    fn on_discovery_failed(&self, error: &TransportFailure) {
        locked(&self.callbacks).push(Observed::DiscoveryFailed(error.reason.clone()));
    }

    fn on_connected(&self, _device: &Device, error: Option<&PosError>) {
        locked(&self.callbacks).push(Observed::Connected(error.cloned()));
    }

    fn on_disconnected(&self, _device: &Device) {
        locked(&self.callbacks).push(Observed::Disconnected);
    }

    fn on_state_changed(
        &self,
        _device: &Device,
        from: Option<DeviceConnectionState>,
        to: DeviceConnectionState,
    ) {
        locked(&self.transitions).push((from, to));
    }
}

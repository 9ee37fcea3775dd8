//! Serialized transaction submission.
//!
//! The [`TransactionOrchestrator`] turns a request body into a full envelope,
//! hands it to the connected device, and resolves with the device's single
//! response. Only one transaction runs at a time; later submissions queue
//! behind the one in flight in arrival order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
#[cfg(feature = "telemetry")]
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{OrchestratorConfig, PaymentInterface, PresentationMode};
use crate::device::{DeviceSessionController, FailOnDrop, TransportRequest};
use crate::error::PosError;
use crate::proto::{Message, MessageHeader, RequestBody, SaleTransactionId, decode, encode};
use crate::session::{InstallationId, SessionManager, SessionToken};

/// Per-submission options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Whether the device shows its own UI.
    pub presentation_mode: PresentationMode,
    /// Card acceptance interface; falls back to the configured default.
    pub payment_interface: Option<PaymentInterface>,
    /// Response timeout; falls back to the configured default.
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    /// Creates options for `presentation_mode` with configured defaults otherwise.
    #[must_use]
    pub const fn new(presentation_mode: PresentationMode) -> Self {
        Self {
            presentation_mode,
            payment_interface: None,
            timeout: None,
        }
    }

    /// Overrides the card acceptance interface.
    #[must_use]
    pub const fn with_payment_interface(mut self, interface: PaymentInterface) -> Self {
        self.payment_interface = Some(interface);
        self
    }

    /// Overrides the response timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Submits transactions to the connected device, one at a time.
pub struct TransactionOrchestrator {
    sessions: Arc<SessionManager>,
    devices: Arc<DeviceSessionController>,
    config: OrchestratorConfig,
    in_flight: Mutex<()>,
}

impl fmt::Debug for TransactionOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionOrchestrator")
            .field("config", &self.config)
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl TransactionOrchestrator {
    /// Creates an orchestrator over the given session manager and device controller.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionManager>,
        devices: Arc<DeviceSessionController>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            sessions,
            devices,
            config,
            in_flight: Mutex::new(()),
        }
    }

    /// Returns the session manager.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Returns the device controller.
    #[must_use]
    pub const fn devices(&self) -> &Arc<DeviceSessionController> {
        &self.devices
    }

    /// Submits `body` and waits for the device's response.
    ///
    /// Equivalent to [`submit_with`](Self::submit_with) with default options
    /// for `presentation_mode` and a token that is never cancelled.
    ///
    /// # Errors
    ///
    /// See [`submit_with`](Self::submit_with).
    pub async fn submit<B: RequestBody>(
        &self,
        body: B,
        presentation_mode: PresentationMode,
    ) -> Result<Message<B::Response>, PosError> {
        self.submit_with(
            body,
            SubmitOptions::new(presentation_mode),
            &CancellationToken::new(),
        )
        .await
    }

    /// Submits `body` and waits for the device's response.
    ///
    /// Fresh service, sale and transaction identifiers are generated for
    /// every call, and the header carries the installation identity as its
    /// `POIID`. The call waits for any transaction already in flight.
    ///
    /// If `cancel` fires or the timeout elapses while the device is working,
    /// the device is asked to abort. When the abort is not confirmed within
    /// the configured abort timeout the device session is marked failed.
    ///
    /// # Errors
    ///
    /// - [`PosError::NotConnected`] if no device session is connected; nothing is sent
    /// - [`PosError::NotProvisioned`] if the installation has no identity
    /// - [`PosError::AuthRejected`] / [`PosError::NetworkError`] if no session could be obtained
    /// - [`PosError::TransportError`] if the device reported a failure
    /// - [`PosError::TransportTimeout`] if the device did not answer in time
    /// - [`PosError::Cancelled`] if `cancel` fired first
    /// - [`PosError::MalformedPayload`] if the response could not be decoded
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(
            name = "posterm.transaction.submit",
            skip_all,
            fields(mode = ?options.presentation_mode),
            err
        )
    )]
    pub async fn submit_with<B: RequestBody>(
        &self,
        body: B,
        options: SubmitOptions,
        cancel: &CancellationToken,
    ) -> Result<Message<B::Response>, PosError> {
        let _queued = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PosError::Cancelled),
            guard = self.in_flight.lock() => guard,
        };

        let prepared = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PosError::Cancelled),
            prepared = self.prepare(body) => prepared?,
        };
        let (record, session) = prepared;
        let payload = encode(record.request())?;

        let _exclusive = tokio::select! {
            biased;
            () = cancel.cancelled() => return record.resolve(Err(PosError::Cancelled)),
            guard = self.sessions.gate().exclusive() => guard,
        };
        if let Err(err) = self.devices.connected_device() {
            return record.resolve(Err(err));
        }

        let request = TransportRequest {
            payload,
            presentation_mode: options.presentation_mode,
            payment_interface: options
                .payment_interface
                .unwrap_or(self.config.payment_interface),
            session,
        };
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.config.transaction_timeout());

        let guard = FailOnDrop::new(&self.devices);
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(PosError::Cancelled),
            result = tokio::time::timeout(timeout, self.devices.transport().exchange(request)) => {
                match result {
                    Ok(Ok(bytes)) => Ok(bytes),
                    Ok(Err(failure)) => Err(PosError::from(failure)),
                    Err(_) => Err(PosError::TransportTimeout),
                }
            }
        };
        if matches!(outcome, Err(PosError::Cancelled | PosError::TransportTimeout)) {
            self.abort_exchange().await;
        }
        guard.disarm();

        record.resolve(outcome)
    }

    /// Checks readiness and builds the request envelope.
    async fn prepare<B: RequestBody>(
        &self,
        body: B,
    ) -> Result<(TransactionRecord<B>, SessionToken), PosError> {
        self.devices.connected_device()?;
        let installation_id = self.sessions.installation_id().await?;
        let session = self.sessions.ensure_session().await?;
        Ok((TransactionRecord::open(body, &installation_id), session))
    }

    /// Asks the transport to abort; marks the session failed unless confirmed.
    async fn abort_exchange(&self) {
        let confirmed = matches!(
            tokio::time::timeout(
                self.config.abort_timeout(),
                self.devices.transport().abort()
            )
            .await,
            Ok(Ok(()))
        );
        if !confirmed {
            #[cfg(feature = "telemetry")]
            tracing::warn!("posterm.transaction.abort_unconfirmed");
            self.devices.mark_failed();
        }
    }
}

/// Creates a service identifier: six upper-case characters of a fresh UUID.
fn service_id() -> String {
    let mut id = Uuid::new_v4().to_string();
    id.truncate(6);
    id.make_ascii_uppercase();
    id
}

fn upper_uuid() -> String {
    Uuid::new_v4().to_string().to_ascii_uppercase()
}

/// One submitted transaction, from envelope creation to its outcome.
#[derive(Debug)]
struct TransactionRecord<B> {
    request: Message<B>,
    #[cfg(feature = "telemetry")]
    started: Instant,
}

impl<B: RequestBody> TransactionRecord<B> {
    fn open(mut body: B, installation_id: &InstallationId) -> Self {
        body.assign_transaction(SaleTransactionId::new(upper_uuid(), Utc::now()));
        let header =
            MessageHeader::for_body::<B>(service_id(), upper_uuid(), installation_id.as_str());
        Self {
            request: Message::new(header, body),
            #[cfg(feature = "telemetry")]
            started: Instant::now(),
        }
    }

    const fn request(&self) -> &Message<B> {
        &self.request
    }

    /// Turns the transport outcome into the caller's result and logs it.
    fn resolve(self, outcome: Result<Vec<u8>, PosError>) -> Result<Message<B::Response>, PosError> {
        let result = outcome.and_then(|bytes| self.check_response(&bytes));
        self.log(&result);
        result
    }

    fn check_response(&self, bytes: &[u8]) -> Result<Message<B::Response>, PosError> {
        let response: Message<B::Response> = decode(bytes)?;
        let sent = self.request.header();
        let got = response.header();
        if got.service_id() != sent.service_id() || got.sale_id() != sent.sale_id() {
            return Err(PosError::malformed(format!(
                "response for {}/{} does not answer {}/{}",
                got.service_id(),
                got.sale_id(),
                sent.service_id(),
                sent.sale_id()
            )));
        }
        Ok(response)
    }

    #[cfg(feature = "telemetry")]
    fn log<R>(&self, result: &Result<R, PosError>) {
        let header = self.request.header();
        let transaction_id = self
            .request
            .body()
            .transaction()
            .map_or("", |tx| tx.transaction_id.as_str());
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(_) => tracing::info!(
                service_id = header.service_id(),
                transaction_id,
                elapsed_ms,
                "posterm.transaction.resolved"
            ),
            Err(error) => tracing::warn!(
                service_id = header.service_id(),
                transaction_id,
                elapsed_ms,
                error = %error,
                "posterm.transaction.failed"
            ),
        }
    }

    #[cfg(not(feature = "telemetry"))]
    const fn log<R>(&self, _result: &Result<R, PosError>) {}
}

//! Runs one card payment end to end against a loopback terminal.
//!
//! # Usage
//!
//! ```bash
//! # Fully local: loopback terminal and loopback session backend
//! cargo run -p posterm-demo -- --offline --amount 101 --currency USD
//!
//! # Real session backend, loopback terminal
//! POS_API_KEY=... cargo run -p posterm-demo -- --amount 10.50
//!
//! # Configure logging level
//! RUST_LOG=debug cargo run -p posterm-demo -- --offline
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `posterm.toml`)
//! - `SETUP_TOKEN` - Exchange this setup token instead of asking the terminal
//! - `RUST_LOG` - Log level filter (default: `info`)

mod config;
mod loopback;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use posterm::config::{PaymentInterface, PresentationMode};
use posterm::device::{Device, DeviceConnectionState, DeviceObserver, DeviceSessionController};
use posterm::error::PosError;
use posterm::gate::TransportGate;
use posterm::proto::{Base64Bytes, PaymentRequest};
use posterm::session::{SessionAuthority, SessionManager};
use posterm::{SubmitOptions, TransactionOrchestrator};
use posterm_http::HttpSessionAuthority;
use rust_decimal::Decimal;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::DemoConfig;
use crate::loopback::{LoopbackAuthority, LoopbackTerminal};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "posterm-demo",
    version,
    about = "Run one card payment against a loopback terminal"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "CONFIG", default_value = "posterm.toml")]
    config: PathBuf,

    /// Amount in major units.
    #[arg(long, default_value = "101")]
    amount: Decimal,

    /// ISO 4217 currency code.
    #[arg(long, default_value = "USD")]
    currency: String,

    /// Run without the terminal's own UI.
    #[arg(long)]
    headless: bool,

    /// Use the device's built-in contactless reader.
    #[arg(long)]
    tap_to_pay: bool,

    /// Exchange this setup token instead of asking the terminal for one.
    #[arg(long, env = "SETUP_TOKEN")]
    setup_token: Option<String>,

    /// Issue sessions locally instead of calling the backend.
    #[arg(long)]
    offline: bool,
}

/// Logs device lifecycle notifications.
#[derive(Debug)]
struct LogObserver;

impl DeviceObserver for LogObserver {
    fn on_connected(&self, device: &Device, error: Option<&PosError>) {
        match error {
            None => tracing::info!(device = %device.name, "Device connected"),
            Some(error) => {
                tracing::warn!(device = %device.name, %error, "Device failed to connect");
            }
        }
    }

    fn on_disconnected(&self, device: &Device) {
        tracing::info!(device = %device.name, "Device disconnected");
    }

    fn on_state_changed(
        &self,
        device: &Device,
        from: Option<DeviceConnectionState>,
        to: DeviceConnectionState,
    ) {
        tracing::debug!(device = %device.id, ?from, %to, "Device state changed");
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        tracing::error!("Demo failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = DemoConfig::load_from(&args.config)?;
    tracing::info!(
        config = %args.config.display(),
        backend = %config.backend.url,
        offline = args.offline,
        "Loaded configuration"
    );

    let terminal = Arc::new(LoopbackTerminal::new(config.terminal.clone()));
    let authority: Arc<dyn SessionAuthority> = if args.offline {
        Arc::new(LoopbackAuthority::new(format!("{}.1", terminal.device().id)))
    } else {
        if config.backend.api_key.is_empty() || config.backend.api_key.starts_with('$') {
            tracing::warn!("backend.api_key not resolved (missing env var?)");
        }
        Arc::new(
            HttpSessionAuthority::from_base(&config.backend.url, &config.backend.api_key)?
                .with_timeout(Duration::from_secs(config.backend.timeout_secs)),
        )
    };

    let gate = TransportGate::new();
    let sessions = Arc::new(
        SessionManager::new(authority, config.session.clone())
            .with_gate(gate)
            .with_setup_token_source(terminal.clone()),
    );
    match &args.setup_token {
        Some(token) => {
            sessions.exchange_setup_token(token).await?;
        }
        None => sessions.warm_up().await,
    }

    let devices = Arc::new(DeviceSessionController::new(
        terminal.clone(),
        config.device,
    ));
    let observer = Arc::new(LogObserver);
    devices.set_observer(&observer);
    devices.device_discovered(terminal.device().clone())?;
    devices.connect().await?;

    let orchestrator = TransactionOrchestrator::new(
        Arc::clone(&sessions),
        Arc::clone(&devices),
        config.orchestrator,
    );

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, cancelling transaction...");
            on_ctrl_c.cancel();
        }
    });

    let metadata = Base64Bytes::encode_json(&json!({
        "metadata": { "employeeNumber": "1" }
    }))?;
    let request = PaymentRequest::new(args.currency.clone(), args.amount)
        .with_sale_to_acquirer_data(metadata.into_string());
    let mut options = SubmitOptions::new(if args.headless {
        PresentationMode::Headless
    } else {
        PresentationMode::Interactive
    });
    if args.tap_to_pay {
        options = options.with_payment_interface(PaymentInterface::TapToPay);
    }

    let result = orchestrator.submit_with(request, options, &cancel).await;
    match &result {
        Ok(response) => {
            let body = response.body();
            let poi_transaction = body
                .poi_data
                .as_ref()
                .map(|p| &p.poi_transaction_id.transaction_id);
            tracing::info!(
                result = ?body.response.result,
                error_condition = ?body.response.error_condition,
                authorized = ?body.authorized_amount(),
                ?poi_transaction,
                "Transaction resolved"
            );
        }
        Err(error) => tracing::warn!(%error, "Transaction did not complete"),
    }

    if devices.is_connected() {
        devices.disconnect().await?;
    }
    result?;
    Ok(())
}

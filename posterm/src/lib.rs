#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for point-of-sale terminal payments.
//!
//! This crate is the client side of a card-present payment flow. It builds
//! terminal protocol requests, hands them to a connected payment device, and
//! resolves each one with the device's single response. Device transports and
//! the backend that issues sessions are reached through traits, so the core
//! stays independent of any particular hardware SDK or HTTP stack.
//!
//! # Overview
//!
//! A device works only under a session. The [`session::SessionManager`]
//! exchanges a one-time setup token for a session token and learns the
//! installation identity on first registration. The
//! [`device::DeviceSessionController`] tracks the payment device through
//! discovery, connection and failure. The
//! [`orchestrator::TransactionOrchestrator`] combines both: it stamps fresh
//! identifiers onto each request, submits it, and returns the decoded
//! response, one transaction at a time.
//!
//! # Modules
//!
//! - [`config`] - Timeouts, session parameters and presentation options
//! - [`device`] - Device connection state machine, transport port and observer
//! - [`error`] - The error taxonomy shared by every operation
//! - [`gate`] - Coordination between session calls and device exchanges
//! - [`orchestrator`] - Serialized transaction submission
//! - [`proto`] - Wire format types and the message codec
//! - [`session`] - Installation identity and session tokens
//! - [`timestamp`] - Unix timestamps for session expiry
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring
//! - `test-util` - Exposes in-memory fakes in the `testing` module

pub mod config;
pub mod device;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod proto;
pub mod session;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod timestamp;

pub use error::PosError;
pub use orchestrator::{SubmitOptions, TransactionOrchestrator};

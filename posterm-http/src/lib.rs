//! HTTP transport for posterm session issuance.
//!
//! Provides [`HttpSessionAuthority`], a [`posterm::session::SessionAuthority`]
//! that exchanges setup tokens for sessions with a `POST /sessions` call to
//! the payment backend.
//!
//! # Modules
//!
//! - [`client`] - The reqwest-based session client
//! - [`constants`] - Header names, paths and default URLs
//! - [`error`] - HTTP client error types
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod client;
pub mod constants;
pub mod error;

pub use client::HttpSessionAuthority;
pub use error::SessionClientError;

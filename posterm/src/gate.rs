//! Coordination between session traffic and device exchanges.
//!
//! A setup-token exchange must never run while a transaction is in flight on
//! the device, and vice versa. [`TransportGate`] is a shared read/write lock
//! that both the [`SessionManager`](crate::session::SessionManager) and the
//! [`TransactionOrchestrator`](crate::orchestrator::TransactionOrchestrator)
//! hold while they touch the outside world: session calls take the shared
//! side, device exchanges the exclusive side.

use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Shared gate serializing session traffic against device exchanges.
///
/// Cloning is cheap and yields a handle to the same gate.
#[derive(Debug, Clone, Default)]
pub struct TransportGate {
    lock: Arc<RwLock<()>>,
}

impl TransportGate {
    /// Creates a new, open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no device exchange is running, then holds the shared side.
    pub async fn shared(&self) -> OwnedRwLockReadGuard<()> {
        Arc::clone(&self.lock).read_owned().await
    }

    /// Waits until no session call or other exchange is running, then holds
    /// the exclusive side.
    pub async fn exclusive(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.lock).write_owned().await
    }

    /// Returns `true` if both handles refer to the same gate.
    #[must_use]
    pub fn same_gate(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.lock, &other.lock)
    }
}

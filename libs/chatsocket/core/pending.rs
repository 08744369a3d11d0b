//! Request/response correlation
//!
//! Each request gets a fresh correlation id and a oneshot slot in
//! [`PendingRequests`]. Whoever removes the entry first settles it:
//!
//! - the connection task, when a reply carrying the id arrives
//! - the waiting caller, on timeout or cancellation
//! - `disconnect()`, which rejects everything still pending
//!
//! Removal and settlement happen under the same lock, so a request is
//! settled exactly once and its entry never outlives the settlement.

use crate::traits::{Payload, Result, SocketError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type SharedPending = Arc<Mutex<PendingRequests>>;

type ReplySender = oneshot::Sender<Result<Payload>>;

/// Fresh correlation id
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Outstanding requests keyed by correlation id
#[derive(Default)]
pub struct PendingRequests {
    waiters: HashMap<String, ReplySender>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedPending {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Register a correlation id and get the receiving side of its reply
    pub fn register(&mut self, id: impl Into<String>) -> oneshot::Receiver<Result<Payload>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id.into(), tx);
        rx
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.waiters.contains_key(id)
    }

    /// Settle a request with its reply; false if it is no longer pending
    pub fn resolve(&mut self, id: &str, reply: Payload) -> bool {
        self.settle(id, Ok(reply))
    }

    /// Settle a request with an error; false if it is no longer pending
    pub fn reject(&mut self, id: &str, error: SocketError) -> bool {
        self.settle(id, Err(error))
    }

    /// Drop a request without settling it; false if it was not pending
    pub fn withdraw(&mut self, id: &str) -> bool {
        self.waiters.remove(id).is_some()
    }

    /// Reject every outstanding request, returning how many there were
    pub fn reject_all(&mut self, error: SocketError) -> usize {
        let count = self.waiters.len();
        for (_, tx) in self.waiters.drain() {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    fn settle(&mut self, id: &str, outcome: Result<Payload>) -> bool {
        match self.waiters.remove(id) {
            Some(tx) => {
                // The waiter may already be gone (future dropped); still settled
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Caller side of one pending request
///
/// Dropping it before it settles withdraws the pending entry.
pub struct ReplyWaiter {
    id: String,
    rx: oneshot::Receiver<Result<Payload>>,
    pending: SharedPending,
    settled: bool,
}

impl ReplyWaiter {
    /// Register a new request under a fresh correlation id
    pub fn register(pending: &SharedPending) -> Self {
        let id = new_correlation_id();
        let rx = pending.lock().register(id.clone());
        Self {
            id,
            rx,
            pending: Arc::clone(pending),
            settled: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the reply, the deadline or the cancellation signal
    pub async fn wait(
        mut self,
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<Payload> {
        let cancel = cancel.unwrap_or_default();

        let failure = tokio::select! {
            biased;
            reply = &mut self.rx => {
                self.settled = true;
                return reply.unwrap_or(Err(SocketError::Disconnected));
            }
            _ = cancel.cancelled() => SocketError::Cancelled { id: self.id.clone() },
            _ = tokio::time::sleep(timeout) => SocketError::RequestTimeout {
                id: self.id.clone(),
                timeout,
            },
        };

        self.settled = true;
        if self.pending.lock().withdraw(&self.id) {
            debug!(id = %self.id, error = %failure, "Request abandoned");
            return Err(failure);
        }
        // Lost the race: the reply (or a disconnect) settled it first
        match self.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(failure),
        }
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        if !self.settled {
            self.pending.lock().withdraw(&self.id);
        }
    }
}

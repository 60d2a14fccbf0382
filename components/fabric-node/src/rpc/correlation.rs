//! Reply-routing table shared between every RPC handler and the broker.
//!
//! Resource teardown is expressed as an RAII guard rather than a manual
//! "don't forget to deregister" call, so a cancelled call (the handler
//! future dropped mid-await) still cleans up its entry.

use crate::fabric::task::ClientId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// `client_id -> oneshot::Sender` shared between every RPC handler (insert,
/// remove) and the broker task (complete-and-remove). Guarded by a
/// `parking_lot::Mutex` - critical sections here are always a single insert,
/// remove, or complete.
pub struct CorrelationTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<ClientId, oneshot::Sender<Vec<u8>>>>,
}

impl CorrelationTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Registers a fresh correlation id and returns an RAII guard holding
    /// the receiving half of its reply channel. Dropping the guard (either
    /// explicitly or because the owning future was cancelled) deregisters
    /// the entry.
    pub fn register(self: &Arc<Self>) -> (CorrelationGuard, oneshot::Receiver<Vec<u8>>) {
        let client_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(client_id, tx);
        (
            CorrelationGuard {
                table: Arc::clone(self),
                client_id,
            },
            rx,
        )
    }

    /// Completes the entry for `client_id` with `payload`, returning
    /// `false` if no entry exists (the call was already cancelled or the id
    /// is stale) - the documented silent-drop behavior for replies that
    /// outlive their RPC.
    pub fn complete(&self, client_id: ClientId, payload: Vec<u8>) -> bool {
        match self.entries.lock().remove(&client_id) {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    fn deregister(&self, client_id: ClientId) {
        self.entries.lock().remove(&client_id);
    }
}

/// RAII handle for one correlation-table entry. The `client_id` it carries
/// should be threaded through to the broker's inbound frame for this call.
pub struct CorrelationGuard {
    table: Arc<CorrelationTable>,
    client_id: ClientId,
}

impl CorrelationGuard {
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }
}

impl Drop for CorrelationGuard {
    fn drop(&mut self) {
        self.table.deregister(self.client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_after_drop_is_silently_ignored() {
        let table = CorrelationTable::new();
        let (guard, _rx) = table.register();
        let client_id = guard.client_id();
        drop(guard);
        assert!(!table.complete(client_id, b"late".to_vec()));
    }

    #[tokio::test]
    async fn complete_delivers_payload_to_waiting_receiver() {
        let table = CorrelationTable::new();
        let (guard, rx) = table.register();
        let client_id = guard.client_id();
        assert!(table.complete(client_id, b"hello".to_vec()));
        assert_eq!(rx.await.unwrap(), b"hello");
    }
}

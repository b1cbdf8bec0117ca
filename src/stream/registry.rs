//! Client Registry: the set of currently-connected `/mjpg` consumers.
//! Guarded by a single mutex shared with the Sink Dispatcher so adding,
//! removing and fan-out delivery never interleave.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub type ClientId = u64;

/// One registered `/mjpg` client. The channel has capacity 1: a pending,
/// unconsumed message *is* the client being behind, which is exactly the
/// throttle condition the zero-timeout writability probe models in the
/// synchronous original.
struct ClientSlot {
    id: ClientId,
    tx: mpsc::Sender<Bytes>,
    throttled: bool,
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<Vec<ClientSlot>>,
    next_id: std::sync::atomic::AtomicU64,
}

/// Result of one dispatch pass over the registry.
pub struct DispatchOutcome {
    pub clients_remaining: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new client and returns its id and the channel end the
    /// HTTP handler reads frames from.
    pub fn add(&self) -> (ClientId, mpsc::Receiver<Bytes>) {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);
        self.inner.lock().push(ClientSlot { id, tx, throttled: false });
        (id, rx)
    }

    pub fn remove(&self, id: ClientId) {
        self.inner.lock().retain(|c| c.id != id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands `frame` to every registered client via a non-blocking
    /// `try_send`, dropping clients whose channel is closed. Returns how
    /// many clients are left so the Capture Loop knows whether to keep
    /// running.
    pub fn dispatch(&self, frame: Bytes) -> DispatchOutcome {
        let mut clients = self.inner.lock();
        clients.retain_mut(|client| match client.tx.try_send(frame.clone()) {
            Ok(()) => {
                client.throttled = false;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                client.throttled = true;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        DispatchOutcome { clients_remaining: clients.len() }
    }
}

/// RAII registration: the client is removed from the registry as soon as
/// its body stream is dropped (connection closed, cancelled, or errored),
/// with no separate cleanup call for handlers to remember.
pub struct ClientGuard {
    id: ClientId,
    registry: Arc<Registry>,
}

impl ClientGuard {
    pub fn register(registry: Arc<Registry>) -> (Self, mpsc::Receiver<Bytes>) {
        let (id, rx) = registry.add();
        (Self { id, registry }, rx)
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_remove_brings_count_back_to_zero() {
        let registry = Registry::new();
        let (id, _rx) = registry.add();
        assert_eq!(registry.len(), 1);
        registry.remove(id);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn client_guard_removes_on_drop() {
        let registry = Arc::new(Registry::new());
        let (guard, _rx) = ClientGuard::register(registry.clone());
        assert_eq!(registry.len(), 1);
        drop(guard);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn dispatch_delivers_to_a_ready_client() {
        let registry = Registry::new();
        let (_id, mut rx) = registry.add();
        let outcome = registry.dispatch(Bytes::from_static(b"frame"));
        assert_eq!(outcome.clients_remaining, 1);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
    }

    #[tokio::test]
    async fn dispatch_drops_clients_whose_receiver_was_dropped() {
        let registry = Registry::new();
        let (_id, rx) = registry.add();
        drop(rx);
        let outcome = registry.dispatch(Bytes::from_static(b"frame"));
        assert_eq!(outcome.clients_remaining, 0);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn a_full_channel_throttles_but_keeps_the_client() {
        let registry = Registry::new();
        let (_id, mut rx) = registry.add();
        // fill the capacity-1 channel
        let first = registry.dispatch(Bytes::from_static(b"one"));
        assert_eq!(first.clients_remaining, 1);
        let second = registry.dispatch(Bytes::from_static(b"two"));
        assert_eq!(second.clients_remaining, 1, "slow client is skipped, not dropped");
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
    }
}

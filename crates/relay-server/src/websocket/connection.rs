//! One physical client transport: bounded outbound queue plus close signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_core::{ConnectionId, Payload};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Result of a non-blocking [`ClientConnection::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The payload is in the outbound queue.
    Queued,
    /// The queue was full or the connection is closed. Nothing was enqueued.
    Dropped,
}

/// Receiving end of a connection's outbound queue, drained by the write pump.
pub type OutboundQueue = mpsc::Receiver<Payload>;

/// A connected client's transport handle.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send side of the outbound queue. `None` once closed.
    tx: Mutex<Option<mpsc::Sender<Payload>>>,
    /// Cancelled on close; both pumps watch it.
    closed: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Count of payloads dropped because the queue was full or closed.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Wrap the send side of an outbound queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Payload>) -> Self {
        Self {
            id,
            tx: Mutex::new(Some(tx)),
            closed: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a connection with a fresh ID and an outbound queue of
    /// `capacity` messages (at least one).
    pub fn with_capacity(capacity: usize) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(ConnectionId::new(), tx), rx)
    }

    /// Enqueue a payload without waiting.
    ///
    /// Returns [`SendOutcome::Dropped`] if the queue is full or the
    /// connection is closed. Drops are counted, never retried.
    pub fn send(&self, payload: Payload) -> SendOutcome {
        let queued = self
            .tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.try_send(payload).is_ok());
        if queued {
            SendOutcome::Queued
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            SendOutcome::Dropped
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// Releases the queue sender so the write pump sees the queue end, and
    /// signals both pumps to stop.
    pub fn close(&self) {
        let _ = self.tx.lock().take();
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Total payloads dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = ClientConnection::with_capacity(8);
        assert_eq!(conn.send(Payload::from("hello")), SendOutcome::Queued);
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.as_text(), Some("hello"));
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn send_to_full_queue_drops_without_blocking() {
        let (conn, _rx) = ClientConnection::with_capacity(2);
        assert_eq!(conn.send(Payload::from("1")), SendOutcome::Queued);
        assert_eq!(conn.send(Payload::from("2")), SendOutcome::Queued);
        assert_eq!(conn.send(Payload::from("3")), SendOutcome::Dropped);
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_after_receiver_gone_drops() {
        let (conn, rx) = ClientConnection::with_capacity(2);
        drop(rx);
        assert_eq!(conn.send(Payload::from("x")), SendOutcome::Dropped);
    }

    #[tokio::test]
    async fn close_ends_queue_after_buffered_messages() {
        let (conn, mut rx) = ClientConnection::with_capacity(4);
        assert_eq!(conn.send(Payload::from("a")), SendOutcome::Queued);
        conn.close();
        assert_eq!(rx.recv().await.unwrap().as_text(), Some("a"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn send_after_close_drops() {
        let (conn, _rx) = ClientConnection::with_capacity(4);
        conn.close();
        assert_eq!(conn.send(Payload::from("late")), SendOutcome::Dropped);
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_signals() {
        let (conn, _rx) = ClientConnection::with_capacity(4);
        assert!(!conn.is_closed());
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        conn.closed().await;
    }

    #[tokio::test]
    async fn concurrent_send_and_close() {
        let (conn, _rx) = ClientConnection::with_capacity(1024);
        let conn = std::sync::Arc::new(conn);
        let sender = {
            let conn = conn.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let _ = conn.send(Payload::from("x"));
                    tokio::task::yield_now().await;
                }
            })
        };
        tokio::task::yield_now().await;
        conn.close();
        sender.await.unwrap();
        assert!(conn.is_closed());
        assert_eq!(conn.send(Payload::from("after")), SendOutcome::Dropped);
    }

    #[test]
    fn zero_capacity_holds_one_message() {
        let (conn, mut rx) = ClientConnection::with_capacity(0);
        assert_eq!(conn.send(Payload::from("a")), SendOutcome::Queued);
        assert_eq!(conn.send(Payload::from("b")), SendOutcome::Dropped);
        assert_eq!(rx.try_recv().unwrap().as_text(), Some("a"));
    }

    #[test]
    fn connection_ids_differ() {
        let (a, _ra) = ClientConnection::with_capacity(1);
        let (b, _rb) = ClientConnection::with_capacity(1);
        assert_ne!(a.id, b.id);
    }
}

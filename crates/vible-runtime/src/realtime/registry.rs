use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

use vible_core::realtime::{ConnectionError, ConnectionId, Delivery, DispatchError, PushFrame};

/// Sending half of one open stream.
struct SinkHandle {
    id: ConnectionId,
    tx: mpsc::Sender<PushFrame>,
    connected_at: DateTime<Utc>,
}

/// Receiving half handed to the stream task.
pub struct Subscription {
    pub connection_id: ConnectionId,
    pub frames: mpsc::Receiver<PushFrame>,
}

/// At most one live stream per user.
///
/// The registry holds the only sender of each stream, so dropping a handle
/// closes the stream.
pub struct ConnectionRegistry {
    connections: DashMap<String, SinkHandle>,
    buffer: usize,
}

impl ConnectionRegistry {
    /// `buffer` bounds the frames queued per stream.
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Open a stream for `user_id`, replacing any existing one.
    pub fn connect(&self, user_id: &str) -> Subscription {
        let (tx, frames) = mpsc::channel(self.buffer);
        let connection_id = ConnectionId::new();
        self.register(user_id, connection_id, tx);
        Subscription {
            connection_id,
            frames,
        }
    }

    /// Install `tx` as the user's sink. The previous sink, if any, is closed
    /// and its id returned.
    pub fn register(
        &self,
        user_id: &str,
        connection_id: ConnectionId,
        tx: mpsc::Sender<PushFrame>,
    ) -> Option<ConnectionId> {
        let handle = SinkHandle {
            id: connection_id,
            tx,
            connected_at: Utc::now(),
        };
        let previous = self.connections.insert(user_id.to_string(), handle);

        match &previous {
            Some(old) => tracing::debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                replaced = %old.id,
                "Stream replaced"
            ),
            None => tracing::debug!(user_id = %user_id, connection_id = %connection_id, "Stream registered"),
        }
        previous.map(|old| old.id)
    }

    /// Drop the user's sink regardless of which stream owns it.
    pub fn unregister(&self, user_id: &str) -> bool {
        self.connections.remove(user_id).is_some()
    }

    /// Drop the user's sink only if it is still `connection_id`.
    pub fn release(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(user_id, |_, handle| handle.id == connection_id)
            .is_some();
        if removed {
            tracing::debug!(user_id = %user_id, connection_id = %connection_id, "Stream released");
        }
        removed
    }

    /// Hand a frame to the user's stream without waiting.
    pub fn send(&self, user_id: &str, frame: PushFrame) -> Result<Delivery, DispatchError> {
        let Some(handle) = self.connections.get(user_id) else {
            return Ok(Delivery::NoConnection);
        };

        match handle.tx.try_send(frame) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(TrySendError::Full(_)) => Err(DispatchError::Backpressure(user_id.to_string())),
            Err(TrySendError::Closed(_)) => {
                let connection_id = handle.id;
                // Release the shard lock before removing.
                drop(handle);
                self.release(user_id, connection_id);
                Err(ConnectionError {
                    user_id: user_id.to_string(),
                    connection_id,
                }
                .into())
            }
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    /// When the user's current stream was opened.
    pub fn connected_since(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.connections.get(user_id).map(|h| h.connected_at)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(text: &str) -> PushFrame {
        PushFrame::json(&json!({ "text": text })).unwrap()
    }

    #[tokio::test]
    async fn test_send_reaches_connected_user() {
        let registry = ConnectionRegistry::new(8);
        let mut sub = registry.connect("bob");

        assert_eq!(registry.send("bob", frame("hi")), Ok(Delivery::Delivered));
        let received = sub.frames.recv().await.unwrap();
        assert_eq!(received.data(), r#"{"text":"hi"}"#);
        assert!(registry.connected_since("bob").is_some());
    }

    #[tokio::test]
    async fn test_send_without_connection_is_noop() {
        let registry = ConnectionRegistry::new(8);
        assert_eq!(registry.send("nobody", frame("hi")), Ok(Delivery::NoConnection));
    }

    #[tokio::test]
    async fn test_register_replaces_and_closes_previous() {
        let registry = ConnectionRegistry::new(8);
        let mut first = registry.connect("bob");
        let mut second = registry.connect("bob");
        assert_eq!(registry.len(), 1);

        // The first stream's only sender was dropped.
        assert!(first.frames.recv().await.is_none());

        registry.send("bob", frame("hi")).unwrap();
        assert_eq!(second.frames.recv().await.unwrap().data(), r#"{"text":"hi"}"#);
    }

    #[tokio::test]
    async fn test_stale_release_keeps_newer_connection() {
        let registry = ConnectionRegistry::new(8);
        let first = registry.connect("bob");
        let second = registry.connect("bob");

        assert!(!registry.release("bob", first.connection_id));
        assert!(registry.is_connected("bob"));

        assert!(registry.release("bob", second.connection_id));
        assert!(!registry.is_connected("bob"));
    }

    #[tokio::test]
    async fn test_full_buffer_drops_frame() {
        let registry = ConnectionRegistry::new(1);
        let _sub = registry.connect("bob");

        registry.send("bob", frame("one")).unwrap();
        assert!(matches!(
            registry.send("bob", frame("two")),
            Err(DispatchError::Backpressure(_))
        ));
        assert!(registry.is_connected("bob"));
    }

    #[tokio::test]
    async fn test_closed_sink_is_evicted() {
        let registry = ConnectionRegistry::new(8);
        let sub = registry.connect("bob");
        drop(sub);

        assert!(matches!(
            registry.send("bob", frame("hi")),
            Err(DispatchError::Connection(_))
        ));
        assert!(!registry.is_connected("bob"));
    }

    #[test]
    fn test_stream_wakes_on_send() {
        let registry = ConnectionRegistry::new(8);
        let mut sub = registry.connect("bob");

        let mut next = tokio_test::task::spawn(sub.frames.recv());
        tokio_test::assert_pending!(next.poll());

        registry.send("bob", frame("hi")).unwrap();
        assert!(next.is_woken());
        let received = tokio_test::assert_ready!(next.poll()).unwrap();
        assert_eq!(received.data(), r#"{"text":"hi"}"#);
    }

    #[test]
    fn test_unregister() {
        let registry = ConnectionRegistry::new(8);
        let _sub = registry.connect("bob");
        assert!(registry.unregister("bob"));
        assert!(!registry.unregister("bob"));
        assert!(registry.is_empty());
    }
}

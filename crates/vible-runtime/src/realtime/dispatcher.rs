use std::sync::Arc;

use vible_core::error::Result;
use vible_core::model::{Message, MessagePush, NewMessage};
use vible_core::realtime::{Delivery, PushFrame};
use vible_core::store::{MessageStore, UserStore};
use vible_core::Clock;

use super::registry::ConnectionRegistry;

/// Stores messages, then pushes them to the recipient's live stream.
///
/// Persistence always comes first; a failed push is logged and never
/// reported to the sender.
pub struct MessageDispatcher {
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserStore>,
    registry: Arc<ConnectionRegistry>,
    clock: Arc<dyn Clock>,
}

impl MessageDispatcher {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserStore>,
        registry: Arc<ConnectionRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            messages,
            users,
            registry,
            clock,
        }
    }

    pub async fn create_message(&self, new: NewMessage) -> Result<Message> {
        new.validate()?;

        let message = new.into_message(self.clock.now());
        self.messages.create_message(message.clone()).await?;
        tracing::debug!(
            message_id = %message.id,
            from = %message.from_user_id,
            to = %message.to_user_id,
            "Message stored"
        );

        self.push(&message).await;
        Ok(message)
    }

    async fn push(&self, message: &Message) {
        if !self.registry.is_connected(&message.to_user_id) {
            return;
        }

        let from_user = match self.users.find_user(message.from_user_id.clone()).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, user_id = %message.from_user_id, "Sender lookup failed");
                None
            }
        };

        let push = MessagePush {
            message: message.clone(),
            from_user,
        };
        let frame = match PushFrame::json(&push) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, message_id = %message.id, "Failed to encode push");
                return;
            }
        };

        match self.registry.send(&message.to_user_id, frame) {
            Ok(Delivery::Delivered) => {
                tracing::debug!(message_id = %message.id, "Message pushed");
            }
            Ok(Delivery::NoConnection) => {}
            Err(e) => {
                tracing::warn!(message_id = %message.id, error = %e, "Message push dropped");
            }
        }
    }

    /// Conversation with `peer_id`, newest first. Marks the peer's messages
    /// to `user_id` as seen.
    pub async fn thread(&self, user_id: &str, peer_id: &str) -> Result<Vec<Message>> {
        let thread = self
            .messages
            .thread(user_id.to_string(), peer_id.to_string())
            .await?;
        let seen = self
            .messages
            .mark_seen(peer_id.to_string(), user_id.to_string())
            .await?;
        if seen > 0 {
            tracing::debug!(user_id = %user_id, peer_id = %peer_id, seen, "Messages marked seen");
        }
        Ok(thread)
    }

    /// Latest message per counterpart, newest first.
    pub async fn recent(&self, user_id: &str) -> Result<Vec<Message>> {
        self.messages.recent_conversations(user_id.to_string()).await
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vible_core::model::{MediaType, User};
    use vible_core::{SystemClock, VibleError};

    use crate::store::MemoryStore;

    fn dispatcher() -> (MessageDispatcher, Arc<MemoryStore>, Arc<ConnectionRegistry>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new(8));
        let dispatcher = MessageDispatcher::new(
            store.clone(),
            store.clone(),
            registry.clone(),
            Arc::new(SystemClock),
        );
        (dispatcher, store, registry)
    }

    fn new_message(from: &str, to: &str, text: &str) -> NewMessage {
        NewMessage {
            from_user_id: from.into(),
            to_user_id: to.into(),
            text: text.into(),
            media_url: None,
        }
    }

    #[tokio::test]
    async fn test_message_stored_without_connection() {
        let (dispatcher, store, _registry) = dispatcher();

        let message = dispatcher
            .create_message(new_message("alice", "bob", "hi"))
            .await
            .unwrap();

        let stored = store.find_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.text, "hi");
        assert_eq!(stored.media_type, MediaType::Text);
    }

    #[tokio::test]
    async fn test_message_pushed_with_sender() {
        let (dispatcher, store, registry) = dispatcher();
        store
            .create_user(User {
                id: "alice".into(),
                email: "alice@example.com".into(),
                full_name: "Alice A".into(),
                username: "alice".into(),
                profile_picture: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let mut sub = registry.connect("bob");

        dispatcher
            .create_message(new_message("alice", "bob", "hi"))
            .await
            .unwrap();

        let frame = sub.frames.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(frame.data()).unwrap();
        assert_eq!(value["text"], "hi");
        assert_eq!(value["from_user"]["full_name"], "Alice A");
    }

    #[tokio::test]
    async fn test_closed_stream_does_not_fail_send() {
        let (dispatcher, store, registry) = dispatcher();
        drop(registry.connect("bob"));

        let message = dispatcher
            .create_message(new_message("alice", "bob", "hi"))
            .await
            .unwrap();
        assert!(store.find_message(message.id).await.unwrap().is_some());
        assert!(!registry.is_connected("bob"));
    }

    #[tokio::test]
    async fn test_invalid_message_rejected() {
        let (dispatcher, store, _registry) = dispatcher();
        let result = dispatcher.create_message(new_message("alice", "", "hi")).await;
        assert!(matches!(result, Err(VibleError::Validation(_))));
        assert!(store.unseen().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_thread_marks_peer_messages_seen() {
        let (dispatcher, store, _registry) = dispatcher();
        dispatcher
            .create_message(new_message("alice", "bob", "hi"))
            .await
            .unwrap();
        dispatcher
            .create_message(new_message("bob", "alice", "hey"))
            .await
            .unwrap();

        let thread = dispatcher.thread("bob", "alice").await.unwrap();
        assert_eq!(thread.len(), 2);

        let unseen = store.unseen().await.unwrap();
        assert_eq!(unseen.len(), 1);
        assert_eq!(unseen[0].from_user_id, "bob");
    }
}

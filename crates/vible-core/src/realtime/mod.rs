//! Types shared by the live connection registry and its callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::Result;

/// Identifies one open stream. A user reconnecting gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One serialized payload destined for a live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFrame {
    data: String,
    created_at: DateTime<Utc>,
}

impl PushFrame {
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_string(value)?,
            created_at: Utc::now(),
        })
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// When the frame was queued.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Outcome of a successful `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the recipient's sink.
    Delivered,
    /// The recipient has no open stream.
    NoConnection,
}

/// The sink behind a connection is gone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connection {connection_id} for user {user_id} is closed")]
pub struct ConnectionError {
    pub user_id: String,
    pub connection_id: ConnectionId,
}

/// A push could not be handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The sink's buffer is full; the frame was dropped.
    #[error("stream buffer full for user {0}, frame dropped")]
    Backpressure(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

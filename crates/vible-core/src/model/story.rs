use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ephemeral post, deleted a day after publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

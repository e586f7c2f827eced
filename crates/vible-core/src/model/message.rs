use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::User;
use crate::error::{Result, VibleError};

/// Kind of content carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Image,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

impl FromStr for MediaType {
    type Err = VibleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            other => Err(VibleError::InvalidState(format!(
                "Unknown media type '{}'",
                other
            ))),
        }
    }
}

/// A direct message between two users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub from_user_id: String,
    pub to_user_id: String,
    pub text: String,
    pub media_type: MediaType,
    pub media_url: Option<String>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// The other participant, seen from `user_id`.
    pub fn counterpart(&self, user_id: &str) -> &str {
        if self.from_user_id == user_id {
            &self.to_user_id
        } else {
            &self.from_user_id
        }
    }

    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.from_user_id == a && self.to_user_id == b)
            || (self.from_user_id == b && self.to_user_id == a)
    }
}

/// A message as submitted by a sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub from_user_id: String,
    pub to_user_id: String,
    pub text: String,
    pub media_url: Option<String>,
}

impl NewMessage {
    pub fn validate(&self) -> Result<()> {
        if self.from_user_id.trim().is_empty() {
            return Err(VibleError::Validation("sender is required".into()));
        }
        if self.to_user_id.trim().is_empty() {
            return Err(VibleError::Validation("to_user_id is required".into()));
        }
        if self.text.trim().is_empty() && self.media_url.is_none() {
            return Err(VibleError::Validation(
                "message must have text or media".into(),
            ));
        }
        Ok(())
    }

    /// Materialize the stored record. `media_type` follows the media reference.
    pub fn into_message(self, now: DateTime<Utc>) -> Message {
        let media_type = if self.media_url.is_some() {
            MediaType::Image
        } else {
            MediaType::Text
        };
        Message {
            id: Uuid::new_v4(),
            from_user_id: self.from_user_id,
            to_user_id: self.to_user_id,
            text: self.text,
            media_type,
            media_url: self.media_url,
            seen: false,
            created_at: now,
        }
    }
}

/// Frame pushed to a recipient's live stream.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePush {
    #[serde(flatten)]
    pub message: Message,
    /// Sender record, when it could be loaded.
    pub from_user: Option<User>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(text: &str, media: Option<&str>) -> NewMessage {
        NewMessage {
            from_user_id: "alice".into(),
            to_user_id: "bob".into(),
            text: text.into(),
            media_url: media.map(String::from),
        }
    }

    #[test]
    fn test_validation() {
        assert!(new_message("hi", None).validate().is_ok());
        assert!(new_message("", Some("https://cdn/x.png")).validate().is_ok());
        assert!(new_message("   ", None).validate().is_err());

        let mut missing_to = new_message("hi", None);
        missing_to.to_user_id.clear();
        assert!(missing_to.validate().is_err());
    }

    #[test]
    fn test_media_type_follows_media_url() {
        let now = Utc::now();
        let text = new_message("hi", None).into_message(now);
        assert_eq!(text.media_type, MediaType::Text);
        assert!(!text.seen);

        let image = new_message("", Some("https://cdn/x.png")).into_message(now);
        assert_eq!(image.media_type, MediaType::Image);
    }

    #[test]
    fn test_counterpart() {
        let msg = new_message("hi", None).into_message(Utc::now());
        assert_eq!(msg.counterpart("alice"), "bob");
        assert_eq!(msg.counterpart("bob"), "alice");
        assert!(msg.involves("bob", "alice"));
        assert!(!msg.involves("bob", "carol"));
    }

    #[test]
    fn test_push_flattens_message() {
        let msg = new_message("hi", None).into_message(Utc::now());
        let push = MessagePush {
            message: msg.clone(),
            from_user: None,
        };
        let value = serde_json::to_value(&push).unwrap();
        assert_eq!(value["text"], "hi");
        assert_eq!(value["media_type"], "text");
        assert!(value["from_user"].is_null());
    }
}

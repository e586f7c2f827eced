use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VibleError};

/// A named occurrence that may trigger workflow runs.
///
/// Events are not persisted by the bus; each run keeps a copy of the event
/// that started it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. `app/story.delete`.
    pub name: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// When the event happened.
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::at(name, payload, Utc::now())
    }

    /// Create an event with an explicit timestamp.
    pub fn at(
        name: impl Into<String>,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            payload,
            occurred_at,
        }
    }

    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            VibleError::Validation(format!("Invalid payload for '{}': {}", self.name, e))
        })
    }

    /// Read a required string field from an object payload.
    pub fn str_field(&self, key: &str) -> Result<&str> {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                VibleError::Validation(format!(
                    "Event '{}' is missing string field '{}'",
                    self.name, key
                ))
            })
    }
}

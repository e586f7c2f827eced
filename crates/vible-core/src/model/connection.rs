use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VibleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
        }
    }
}

impl FromStr for ConnectionStatus {
    type Err = VibleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            other => Err(VibleError::InvalidState(format!(
                "Unknown connection status '{}'",
                other
            ))),
        }
    }
}

/// A request from one user to connect with another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
}

impl ConnectionRequest {
    pub fn is_accepted(&self) -> bool {
        self.status == ConnectionStatus::Accepted
    }
}

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An outbound email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    /// HTML body.
    pub body: String,
}

/// Delivers emails. Failures surface to the calling step.
pub trait EmailSender: Send + Sync + 'static {
    fn send(&self, email: Email) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

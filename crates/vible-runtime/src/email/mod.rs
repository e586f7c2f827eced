//! Email senders.

mod http;

pub use http::HttpEmailSender;

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;

use vible_core::config::{EmailConfig, EmailProvider};
use vible_core::email::{Email, EmailSender};
use vible_core::error::{Result, VibleError};

/// Build the sender selected by configuration.
pub fn sender_from_config(config: &EmailConfig) -> Result<Arc<dyn EmailSender>> {
    match config.provider {
        EmailProvider::Log => Ok(Arc::new(LogEmailSender)),
        EmailProvider::Http => Ok(Arc::new(HttpEmailSender::from_config(config)?)),
    }
}

/// Writes emails to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, email: Email) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(to = %email.to, subject = %email.subject, "Email (log only)");
            Ok(())
        })
    }
}

/// Keeps sent emails in memory.
#[derive(Debug, Default)]
pub struct MemoryEmailSender {
    sent: Mutex<Vec<Email>>,
    rejected: Mutex<HashSet<String>>,
}

impl MemoryEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Email> {
        self.sent.lock().await.clone()
    }

    /// Fail every later send to `address`.
    pub async fn reject(&self, address: impl Into<String>) {
        self.rejected.lock().await.insert(address.into());
    }
}

impl EmailSender for MemoryEmailSender {
    fn send(&self, email: Email) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.rejected.lock().await.contains(&email.to) {
                return Err(VibleError::Email(format!("{} rejected", email.to)));
            }
            self.sent.lock().await.push(email);
            Ok(())
        })
    }
}

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;

use vible_core::config::EmailConfig;
use vible_core::email::{Email, EmailSender};
use vible_core::error::{Result, VibleError};

/// Posts emails as JSON to a mail relay.
#[derive(Clone)]
pub struct HttpEmailSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

impl HttpEmailSender {
    pub fn from_config(config: &EmailConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| VibleError::Config("email.endpoint is not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VibleError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            from: config.from.clone(),
        })
    }
}

impl EmailSender for HttpEmailSender {
    fn send(&self, email: Email) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let body = RelayRequest {
                from: &self.from,
                to: &email.to,
                subject: &email.subject,
                html: &email.body,
            };

            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request
                .send()
                .await
                .map_err(|e| VibleError::Email(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(VibleError::Email(format!("relay returned {}: {}", status, text)));
            }

            tracing::debug!(to = %email.to, subject = %email.subject, "Email sent");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vible_core::config::EmailProvider;

    #[test]
    fn test_requires_endpoint() {
        assert!(HttpEmailSender::from_config(&EmailConfig::default()).is_err());

        let config = EmailConfig {
            provider: EmailProvider::Http,
            endpoint: Some("http://127.0.0.1:9/send".into()),
            ..EmailConfig::default()
        };
        assert!(HttpEmailSender::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_email_error() {
        let config = EmailConfig {
            provider: EmailProvider::Http,
            endpoint: Some("http://127.0.0.1:9/send".into()),
            ..EmailConfig::default()
        };
        let sender = HttpEmailSender::from_config(&config).unwrap();
        let result = sender
            .send(Email {
                to: "bob@example.com".into(),
                subject: "Hello".into(),
                body: "<p>hi</p>".into(),
            })
            .await;
        assert!(matches!(result, Err(VibleError::Email(_))));
    }
}

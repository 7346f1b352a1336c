//! Outbound delivery of validation codes.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::MailConfig;
use crate::error::{AppError, AppResult};

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_code(&self, email: &str, code: &str, subject: &str) -> AppResult<()>;
}

/// Posts messages as JSON to an HTTP mail relay.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    from: String,
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: String,
}

impl HttpMailer {
    pub fn new(config: &MailConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_code(&self, email: &str, code: &str, subject: &str) -> AppResult<()> {
        let message = RelayMessage {
            from: &self.from,
            to: email,
            subject,
            text: format!("Your validation code is {}", code),
        };

        let response = self.client.post(&self.endpoint).json(&message).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Mail(format!(
                "relay answered {} for {}",
                response.status(),
                email
            )));
        }

        info!("Sent validation code to {}", email);
        Ok(())
    }
}

/// Writes codes to the log instead of sending them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_code(&self, email: &str, code: &str, _subject: &str) -> AppResult<()> {
        info!("Mail disabled, validation code for {} is {}", email, code);
        Ok(())
    }
}

pub fn build_mailer(config: &MailConfig) -> AppResult<Arc<dyn Mailer>> {
    if config.enabled && !config.endpoint.is_empty() {
        Ok(Arc::new(HttpMailer::new(config)?))
    } else {
        Ok(Arc::new(LogMailer))
    }
}

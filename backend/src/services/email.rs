use serde::Serialize;

use crate::config::EmailConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("email request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("email API returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[axum::async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

/// Posts `{from, to, subject, text}` as JSON to a transactional email API.
pub struct HttpEmailSender {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl HttpEmailSender {
    pub fn new(client: reqwest::Client, api_url: String, api_key: Option<String>, from: String) -> Self {
        Self {
            client,
            api_url,
            api_key,
            from,
        }
    }
}

#[axum::async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let mut request = self.client.post(&self.api_url).json(&EmailPayload {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            text: &message.text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(EmailError::Rejected {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Used when no email API is configured.
pub struct LogEmailSender;

#[axum::async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        tracing::info!(to = %message.to, subject = %message.subject, "email (not sent, no EMAIL_API_URL)");
        Ok(())
    }
}

pub fn from_config(client: reqwest::Client, config: &EmailConfig) -> Box<dyn EmailSender> {
    match &config.api_url {
        Some(url) => Box::new(HttpEmailSender::new(
            client,
            url.clone(),
            config.api_key.clone(),
            config.from.clone(),
        )),
        None => Box::new(LogEmailSender),
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ResendConfig;

use super::{EmailMessage, EmailProvider, EmailTag, ProviderError, SendReceipt};

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    tags: &'a [EmailTag],
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: Option<String>,
}

/// Email delivery through the Resend HTTP API.
#[derive(Clone)]
pub struct ResendProvider {
    http: Client,
    config: ResendConfig,
}

impl ResendProvider {
    pub fn new(config: ResendConfig) -> ResendProvider {
        ResendProvider {
            http: Client::new(),
            config,
        }
    }

    fn emails_url(&self) -> String {
        format!("{}/emails", self.config.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmailProvider for ResendProvider {
    #[tracing::instrument(skip(self, message), fields(to = %message.to))]
    async fn send_email(&self, message: &EmailMessage) -> Result<SendReceipt, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(ProviderError::Misconfigured("RESEND_API_KEY"))?;
        let from = self
            .config
            .from_email
            .as_deref()
            .ok_or(ProviderError::Misconfigured("RESEND_FROM_EMAIL"))?;

        let request = SendEmailRequest {
            from,
            to: &message.to,
            subject: &message.subject,
            html: &message.html,
            tags: &message.tags,
        };

        let response = self
            .http
            .post(self.emails_url())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = response
                .json::<ErrorResponse>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| format!("email provider returned {}", status));
            return Err(ProviderError::Rejected(reason));
        }

        let body: SendEmailResponse = response.json().await?;
        debug!("email accepted: {:?}", body.id);

        Ok(SendReceipt { id: body.id })
    }
}

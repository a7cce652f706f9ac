use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TwilioConfig;

use super::{ProviderError, SendReceipt, SmsMessage, SmsProvider};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateMessageForm<'a> {
    from: &'a str,
    to: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: Option<String>,
    status: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: Option<String>,
}

/// SMS delivery through the Twilio messages API.
#[derive(Clone)]
pub struct TwilioProvider {
    http: Client,
    config: TwilioConfig,
}

impl TwilioProvider {
    pub fn new(config: TwilioConfig) -> TwilioProvider {
        TwilioProvider {
            http: Client::new(),
            config,
        }
    }

    fn messages_url(&self, account_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_url.trim_end_matches('/'),
            account_sid
        )
    }
}

#[async_trait]
impl SmsProvider for TwilioProvider {
    #[tracing::instrument(skip(self, message), fields(to = %message.to))]
    async fn send_sms(&self, message: &SmsMessage) -> Result<SendReceipt, ProviderError> {
        let account_sid = self
            .config
            .account_sid
            .as_deref()
            .ok_or(ProviderError::Misconfigured("TWILIO_ACCOUNT_SID"))?;
        let auth_token = self
            .config
            .auth_token
            .as_deref()
            .ok_or(ProviderError::Misconfigured("TWILIO_AUTH_TOKEN"))?;
        let from = self
            .config
            .phone_number
            .as_deref()
            .ok_or(ProviderError::Misconfigured("TWILIO_PHONE_NUMBER"))?;

        let form = CreateMessageForm {
            from,
            to: &message.to,
            body: &message.body,
        };

        let response = self
            .http
            .post(self.messages_url(account_sid))
            .basic_auth(account_sid, Some(auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = response
                .json::<ErrorResponse>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| format!("sms provider returned {}", status));
            return Err(ProviderError::Rejected(reason));
        }

        let resource: MessageResource = response.json().await?;
        debug!("sms accepted: {:?} ({:?})", resource.sid, resource.status);

        match resource.status.as_deref() {
            Some("failed") | Some("undelivered") => Err(ProviderError::Rejected(
                resource
                    .error_message
                    .unwrap_or_else(|| "Delivery failed".to_owned()),
            )),
            _ => Ok(SendReceipt { id: resource.sid }),
        }
    }
}

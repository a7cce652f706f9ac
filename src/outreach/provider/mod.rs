//! The send contracts the dispatcher talks to, and their HTTP adapters.

use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod resend;
pub mod twilio;

pub use resend::ResendProvider;
pub use twilio::TwilioProvider;

/// A name/value pair attached to an email so delivery events can be traced
/// back to the campaign and lead.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmailTag {
    pub name: String,
    pub value: String,
}

impl EmailTag {
    pub fn new(name: &str, value: impl Into<String>) -> EmailTag {
        EmailTag {
            name: name.to_owned(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub tags: Vec<EmailTag>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SmsMessage {
    pub to: String,
    pub body: String,
}

/// An accepted send. The id is the provider's own message identifier.
#[derive(Clone, Debug, PartialEq)]
pub struct SendReceipt {
    pub id: Option<String>,
}

#[derive(Debug)]
pub enum ProviderError {
    Timeout(Duration),
    Http(reqwest::Error),
    /// The provider answered but refused the message.
    Rejected(String),
    Misconfigured(&'static str),
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Timeout(after) => {
                write!(f, "provider did not answer within {}s", after.as_secs_f64())
            }
            ProviderError::Http(err) => write!(f, "provider request failed: {}", err),
            ProviderError::Rejected(reason) => f.write_str(reason),
            ProviderError::Misconfigured(missing) => {
                write!(f, "provider is not configured: {} is missing", missing)
            }
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProviderError::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> ProviderError {
        ProviderError::Http(error)
    }
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<SendReceipt, ProviderError>;
}

/// The caller appends any opt-out footer before handing the body over.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    async fn send_sms(&self, message: &SmsMessage) -> Result<SendReceipt, ProviderError>;
}

#[derive(Clone)]
pub struct Providers {
    pub email: Arc<dyn EmailProvider>,
    pub sms: Arc<dyn SmsProvider>,
}

impl Providers {
    pub fn new(email: Arc<dyn EmailProvider>, sms: Arc<dyn SmsProvider>) -> Providers {
        Providers { email, sms }
    }
}

use std::collections::HashMap;

use actix_web::web::{Bytes, Data, Form};
use actix_web::{post, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::database::Database;
use crate::error::Error;
use crate::outreach::provider::EmailTag;
use crate::outreach::Channel;
use crate::utils::normalize_phone;

use super::{ingest_delivery_event, Correlation, DeliveryEvent, DeliveryEventType};

const EMPTY_TWIML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Received {
    pub received: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmailWebhookBody {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: EmailWebhookData,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EmailWebhookData {
    pub email_id: Option<String>,
    pub tags: Option<EmailWebhookTags>,
    pub error: Option<String>,
    pub bounce: Option<EmailBounce>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmailBounce {
    pub message: Option<String>,
}

/// Tags come back either as the list they were sent as or as a map.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum EmailWebhookTags {
    List(Vec<EmailTag>),
    Map(HashMap<String, String>),
}

impl EmailWebhookTags {
    pub fn get(&self, name: &str) -> Option<&str> {
        match self {
            EmailWebhookTags::List(tags) => tags
                .iter()
                .find(|tag| tag.name == name)
                .map(|tag| tag.value.as_str()),
            EmailWebhookTags::Map(tags) => tags.get(name).map(String::as_str),
        }
    }
}

impl EmailWebhookBody {
    /// `None` for event types that carry nothing to record, such as
    /// `email.sent`.
    pub fn into_event(self) -> Option<DeliveryEvent> {
        let event_type = match self.event_type.as_str() {
            "email.delivered" => DeliveryEventType::Delivered,
            "email.opened" => DeliveryEventType::Opened,
            "email.clicked" => DeliveryEventType::Clicked,
            "email.bounced" => DeliveryEventType::Bounced,
            "email.complained" => DeliveryEventType::Complained,
            _ => return None,
        };

        let data = self.data;
        let tag = |name: &str| data.tags.as_ref().and_then(|tags| tags.get(name));
        let campaign_id = tag("campaignId").and_then(|value| value.parse().ok());
        let lead_id = tag("leadId").and_then(|value| value.parse().ok());
        let correlation = match (campaign_id, lead_id) {
            (Some(campaign_id), Some(lead_id)) => Correlation::Campaign {
                campaign_id,
                lead_id,
            },
            _ => Correlation::None,
        };

        let mut event = DeliveryEvent::new(event_type, Channel::Email, correlation);
        event.error = data
            .error
            .clone()
            .or_else(|| data.bounce.as_ref().and_then(|bounce| bounce.message.clone()));
        event.provider_message_id = data.email_id;

        Some(event)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SmsWebhookForm {
    pub message_sid: Option<String>,
    pub message_status: Option<String>,
    pub to: Option<String>,
    pub from: Option<String>,
    pub body: Option<String>,
    pub error_code: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.trim().is_empty())
}

impl SmsWebhookForm {
    pub fn is_reply(&self) -> bool {
        present(&self.body).is_some() && present(&self.from).is_some()
    }

    pub fn into_event(self) -> Option<DeliveryEvent> {
        if self.is_reply() {
            let from = normalize_phone(self.from.as_deref().unwrap_or_default());
            let mut event = DeliveryEvent::new(
                DeliveryEventType::Replied,
                Channel::Sms,
                Correlation::Phone(from),
            );
            event.body = self.body;
            return Some(event);
        }

        let sid = present(&self.message_sid)?.to_owned();
        let event_type = match present(&self.message_status)? {
            "delivered" => DeliveryEventType::Delivered,
            "undelivered" | "failed" => DeliveryEventType::Failed,
            _ => return None,
        };

        let correlation = match present(&self.to) {
            Some(to) => Correlation::Phone(normalize_phone(to)),
            None => Correlation::None,
        };

        let mut event = DeliveryEvent::new(event_type, Channel::Sms, correlation);
        event.provider_message_id = Some(sid);
        if event_type == DeliveryEventType::Failed {
            event.error = Some(
                present(&self.error_code)
                    .unwrap_or("Delivery failed")
                    .to_owned(),
            );
        }

        Some(event)
    }
}

/// Email provider events. Anything that cannot be read or matched is
/// still acknowledged so the provider does not retry it.
#[post("/webhooks/email")]
#[tracing::instrument(skip(db, body))]
pub async fn receive_email_event(
    db: Data<dyn Database>,
    body: Bytes,
) -> Result<HttpResponse, Error> {
    let body: EmailWebhookBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            warn!("unreadable email webhook: {}", err);
            return Ok(HttpResponse::Ok().json(Received { received: true }));
        }
    };

    if let Some(event) = body.into_event() {
        ingest_delivery_event(db.get_ref(), event).await?;
    }

    Ok(HttpResponse::Ok().json(Received { received: true }))
}

/// SMS status callbacks and inbound replies.
#[post("/webhooks/sms")]
#[tracing::instrument(skip(db, form))]
pub async fn receive_sms_event(
    db: Data<dyn Database>,
    form: Form<SmsWebhookForm>,
) -> Result<HttpResponse, Error> {
    let form = form.into_inner();
    let is_reply = form.is_reply();

    if let Some(event) = form.into_event() {
        ingest_delivery_event(db.get_ref(), event).await?;
    }

    if is_reply {
        return Ok(HttpResponse::Ok()
            .content_type("text/xml")
            .body(EMPTY_TWIML));
    }

    Ok(HttpResponse::Ok().json(Received { received: true }))
}

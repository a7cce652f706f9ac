//! Provider delivery events, normalized into one shape before they touch
//! any record.

use chrono::{DateTime, Utc};

use crate::campaign::CampaignId;
use crate::lead::LeadId;
use crate::outreach::Channel;

pub mod endpoints;
pub mod ingest;

pub use ingest::{ingest_delivery_event, IngestOutcome};

/// Replies made of exactly one of these words withdraw consent.
pub const OPT_OUT_KEYWORDS: [&str; 6] = ["STOP", "STOPALL", "UNSUBSCRIBE", "CANCEL", "END", "QUIT"];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeliveryEventType {
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
    /// An inbound message from the contact.
    Replied,
    /// The provider gave up on delivery after accepting the message.
    Failed,
}

/// What the event carries to find the log it belongs to, besides the
/// provider message id.
#[derive(Clone, Debug, PartialEq)]
pub enum Correlation {
    Campaign {
        campaign_id: CampaignId,
        lead_id: LeadId,
    },
    /// The contact's phone number, digits only.
    Phone(String),
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryEvent {
    pub event_type: DeliveryEventType,
    pub channel: Channel,
    pub provider_message_id: Option<String>,
    pub correlation: Correlation,
    /// Reply text for `Replied` events.
    pub body: Option<String>,
    pub error: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl DeliveryEvent {
    pub fn new(event_type: DeliveryEventType, channel: Channel, correlation: Correlation) -> DeliveryEvent {
        DeliveryEvent {
            event_type,
            channel,
            provider_message_id: None,
            correlation,
            body: None,
            error: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn is_opt_out(&self) -> bool {
        self.event_type == DeliveryEventType::Replied
            && self.body.as_deref().map_or(false, is_opt_out)
    }
}

pub fn is_opt_out(body: &str) -> bool {
    let body = body.trim();
    OPT_OUT_KEYWORDS
        .iter()
        .any(|keyword| keyword.eq_ignore_ascii_case(body))
}

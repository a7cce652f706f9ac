use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::CampaignId;
use crate::campaign_lead::CampaignLeadId;
use crate::lead::LeadId;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod dispatcher;
pub mod provider;

pub type OutreachLogId = TypedId<OutreachLog>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
        }
    }

    /// Name reported as the `provider` of a job result.
    pub fn provider_name(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;
    fn from_str(s: &str) -> Result<Channel, String> {
        match s {
            "EMAIL" => Ok(Channel::Email),
            "SMS" => Ok(Channel::Sms),
            _ => Err(s.to_owned()),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutreachLogStatus {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Responded,
    Bounced,
    Failed,
}

impl OutreachLogStatus {
    pub const ALL: [OutreachLogStatus; 7] = [
        OutreachLogStatus::Sent,
        OutreachLogStatus::Delivered,
        OutreachLogStatus::Opened,
        OutreachLogStatus::Clicked,
        OutreachLogStatus::Responded,
        OutreachLogStatus::Bounced,
        OutreachLogStatus::Failed,
    ];

    pub fn is_failure(self) -> bool {
        matches!(self, OutreachLogStatus::Bounced | OutreachLogStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            OutreachLogStatus::Sent => 0,
            OutreachLogStatus::Delivered => 1,
            OutreachLogStatus::Opened => 2,
            OutreachLogStatus::Clicked => 3,
            OutreachLogStatus::Responded => 4,
            OutreachLogStatus::Bounced | OutreachLogStatus::Failed => 5,
        }
    }

    /// Failures override any delivery progress and are final; otherwise
    /// the status only moves up.
    pub fn can_transition_to(self, next: OutreachLogStatus) -> bool {
        if self.is_failure() {
            false
        } else if next.is_failure() {
            true
        } else {
            next.rank() > self.rank()
        }
    }

    pub fn transitionable_to(next: OutreachLogStatus) -> Vec<OutreachLogStatus> {
        OutreachLogStatus::ALL
            .iter()
            .copied()
            .filter(|status| status.can_transition_to(next))
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutreachLogStatus::Sent => "SENT",
            OutreachLogStatus::Delivered => "DELIVERED",
            OutreachLogStatus::Opened => "OPENED",
            OutreachLogStatus::Clicked => "CLICKED",
            OutreachLogStatus::Responded => "RESPONDED",
            OutreachLogStatus::Bounced => "BOUNCED",
            OutreachLogStatus::Failed => "FAILED",
        }
    }
}

/// One delivery attempt. Created by the dispatcher, then moved along by
/// provider events.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct OutreachLog {
    #[serde(rename = "_id")]
    pub id: OutreachLogId,
    pub campaign_lead_id: CampaignLeadId,
    pub campaign_id: CampaignId,
    pub lead_id: LeadId,
    pub channel: Channel,
    pub status: OutreachLogStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    #[serde(default, with = "crate::utils::optional_bson_datetime")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::utils::optional_bson_datetime")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::utils::optional_bson_datetime")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::utils::optional_bson_datetime")]
    pub clicked_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::utils::optional_bson_datetime")]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::utils::optional_bson_datetime")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl TypedIdMarker for OutreachLog {
    fn tag() -> &'static str {
        "OLG"
    }
}

/// A status change for an existing log, as reported by a provider.
#[derive(Clone, Debug, PartialEq)]
pub struct LogTransition {
    pub status: OutreachLogStatus,
    pub at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl LogTransition {
    pub fn new(status: OutreachLogStatus, at: DateTime<Utc>) -> LogTransition {
        LogTransition {
            status,
            at,
            error_message: None,
        }
    }

    pub fn with_error(mut self, error_message: impl Into<String>) -> LogTransition {
        self.error_message = Some(error_message.into());
        self
    }

    /// Name of the timestamp field the transition stamps.
    pub fn timestamp_field(&self) -> &'static str {
        match self.status {
            OutreachLogStatus::Sent => "sent_at",
            OutreachLogStatus::Delivered => "delivered_at",
            OutreachLogStatus::Opened => "opened_at",
            OutreachLogStatus::Clicked => "clicked_at",
            OutreachLogStatus::Responded => "responded_at",
            OutreachLogStatus::Bounced | OutreachLogStatus::Failed => "failed_at",
        }
    }

    pub fn apply(&self, log: &mut OutreachLog) {
        log.status = self.status;
        let at = Some(self.at);
        match self.status {
            OutreachLogStatus::Sent => log.sent_at = at,
            OutreachLogStatus::Delivered => log.delivered_at = at,
            OutreachLogStatus::Opened => log.opened_at = at,
            OutreachLogStatus::Clicked => log.clicked_at = at,
            OutreachLogStatus::Responded => log.responded_at = at,
            OutreachLogStatus::Bounced | OutreachLogStatus::Failed => log.failed_at = at,
        }
        if self.error_message.is_some() {
            log.error_message = self.error_message.clone();
        }
    }
}

/// "Send this message to this campaign lead over this channel."
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct OutreachJob {
    pub campaign_lead_id: CampaignLeadId,
    pub channel: Channel,
    pub subject: Option<String>,
    pub template_body: String,
    #[serde(default)]
    pub template_variables: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct OutreachResult {
    pub success: bool,
    pub job_id: CampaignLeadId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Turned down before any send was attempted.
    #[serde(default)]
    pub refused: bool,
}

impl OutreachResult {
    /// A job that could not complete. Worth retrying.
    pub fn failure(job_id: CampaignLeadId, error: impl Into<String>) -> OutreachResult {
        OutreachResult {
            success: false,
            job_id,
            error: Some(error.into()),
            provider: None,
            refused: false,
        }
    }

    /// A job that will keep failing however often it is retried.
    pub fn refused(job_id: CampaignLeadId, error: impl Into<String>) -> OutreachResult {
        OutreachResult {
            refused: true,
            ..OutreachResult::failure(job_id, error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_status_only_moves_forward() {
        assert!(OutreachLogStatus::Sent.can_transition_to(OutreachLogStatus::Delivered));
        assert!(OutreachLogStatus::Opened.can_transition_to(OutreachLogStatus::Clicked));
        assert!(!OutreachLogStatus::Clicked.can_transition_to(OutreachLogStatus::Opened));
        assert!(!OutreachLogStatus::Opened.can_transition_to(OutreachLogStatus::Delivered));
    }

    #[test]
    fn failures_override_progress_and_stick() {
        assert!(OutreachLogStatus::Opened.can_transition_to(OutreachLogStatus::Failed));
        assert!(OutreachLogStatus::Delivered.can_transition_to(OutreachLogStatus::Bounced));
        assert!(!OutreachLogStatus::Bounced.can_transition_to(OutreachLogStatus::Failed));
        assert!(!OutreachLogStatus::Failed.can_transition_to(OutreachLogStatus::Delivered));
    }
}

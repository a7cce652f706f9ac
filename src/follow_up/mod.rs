//! Follow-up scheduling, pausing and the due-follow-up sweep.

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::campaign_lead::CampaignLeadStatus;

pub mod endpoints;
pub mod manager;
pub mod sweep;

/// Outcome of a scheduling attempt. Refusals are expected outcomes and
/// carry a reason rather than an error.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScheduleResult {
    pub scheduled: bool,
    pub next_date: Option<DateTime<Utc>>,
    pub follow_up_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ScheduleSkipReason>,
}

impl ScheduleResult {
    pub fn scheduled(next_date: DateTime<Utc>, follow_up_number: u32) -> ScheduleResult {
        ScheduleResult {
            scheduled: true,
            next_date: Some(next_date),
            follow_up_number,
            reason: None,
        }
    }

    pub fn skipped(follow_up_number: u32, reason: ScheduleSkipReason) -> ScheduleResult {
        ScheduleResult {
            scheduled: false,
            next_date: None,
            follow_up_number,
            reason: Some(reason),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScheduleSkipReason {
    CampaignLeadNotFound,
    FollowUpsPaused,
    TerminalStatus(CampaignLeadStatus),
    MaxFollowUpsReached(u32),
    /// The lead was paused or closed between the read and the write.
    StateChanged,
}

impl Display for ScheduleSkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleSkipReason::CampaignLeadNotFound => f.write_str("campaign_lead_not_found"),
            ScheduleSkipReason::FollowUpsPaused => f.write_str("follow_ups_paused"),
            ScheduleSkipReason::TerminalStatus(status) => {
                write!(f, "terminal_status_{}", status.as_str().to_ascii_lowercase())
            }
            ScheduleSkipReason::MaxFollowUpsReached(max) => {
                write!(f, "max_follow_ups_reached_{}", max)
            }
            ScheduleSkipReason::StateChanged => f.write_str("campaign_lead_state_changed"),
        }
    }
}

impl Serialize for ScheduleSkipReason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

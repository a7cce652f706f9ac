use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::CampaignId;
use crate::lead::LeadId;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;

pub type CampaignLeadId = TypedId<CampaignLead>;

/// A contact enrolled in one campaign. Engagement and follow-up state is
/// tracked per campaign, independently of the same lead elsewhere.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CampaignLead {
    #[serde(rename = "_id")]
    pub id: CampaignLeadId,
    pub campaign_id: CampaignId,
    pub lead_id: LeadId,
    pub source: LeadSource,
    pub status: CampaignLeadStatus,
    pub follow_up_count: u32,
    #[serde(default)]
    pub follow_up_pause: Option<FollowUpPause>,
    #[serde(default, with = "crate::utils::optional_bson_datetime")]
    pub scheduled_follow_up_date: Option<DateTime<Utc>>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    /// Time of the last outbound touch (a send or a resume). Follow-up
    /// offsets are measured from here.
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl TypedIdMarker for CampaignLead {
    fn tag() -> &'static str {
        "CPL"
    }
}

impl CampaignLead {
    pub fn follow_ups_paused(&self) -> bool {
        self.follow_up_pause.is_some()
    }
}

/// The acquisition channel a lead was discovered through.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum LeadSource {
    PastClient,
    Dormant,
    SimilarOrg,
    AiResearch,
    ManualImport,
    Other(String),
}

impl LeadSource {
    pub fn as_str(&self) -> &str {
        match self {
            LeadSource::PastClient => "PAST_CLIENT",
            LeadSource::Dormant => "DORMANT",
            LeadSource::SimilarOrg => "SIMILAR_ORG",
            LeadSource::AiResearch => "AI_RESEARCH",
            LeadSource::ManualImport => "MANUAL_IMPORT",
            LeadSource::Other(source) => source,
        }
    }
}

impl From<String> for LeadSource {
    fn from(source: String) -> LeadSource {
        match source.as_str() {
            "PAST_CLIENT" => LeadSource::PastClient,
            "DORMANT" => LeadSource::Dormant,
            "SIMILAR_ORG" => LeadSource::SimilarOrg,
            "AI_RESEARCH" => LeadSource::AiResearch,
            "MANUAL_IMPORT" => LeadSource::ManualImport,
            _ => LeadSource::Other(source),
        }
    }
}

impl From<LeadSource> for String {
    fn from(source: LeadSource) -> String {
        source.as_str().to_owned()
    }
}

impl Display for LeadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignLeadStatus {
    Pending,
    Contacted,
    Opened,
    Clicked,
    Responded,
    Removed,
    Declined,
    Booked,
}

impl CampaignLeadStatus {
    pub const ALL: [CampaignLeadStatus; 8] = [
        CampaignLeadStatus::Pending,
        CampaignLeadStatus::Contacted,
        CampaignLeadStatus::Opened,
        CampaignLeadStatus::Clicked,
        CampaignLeadStatus::Responded,
        CampaignLeadStatus::Removed,
        CampaignLeadStatus::Declined,
        CampaignLeadStatus::Booked,
    ];

    /// Statuses a follow-up sweep may send to.
    pub const FOLLOW_UP_ELIGIBLE: [CampaignLeadStatus; 3] = [
        CampaignLeadStatus::Contacted,
        CampaignLeadStatus::Opened,
        CampaignLeadStatus::Clicked,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignLeadStatus::Removed | CampaignLeadStatus::Declined | CampaignLeadStatus::Booked
        )
    }

    /// Position on the engagement ladder. Terminal statuses are off the
    /// ladder.
    pub fn rank(self) -> Option<u8> {
        match self {
            CampaignLeadStatus::Pending => Some(0),
            CampaignLeadStatus::Contacted => Some(1),
            CampaignLeadStatus::Opened => Some(2),
            CampaignLeadStatus::Clicked => Some(3),
            CampaignLeadStatus::Responded => Some(4),
            _ => None,
        }
    }

    /// Whether a write of `next` over `self` moves the lead forward.
    /// Nothing moves a terminal lead, and the ladder never goes down.
    pub fn can_advance_to(self, next: CampaignLeadStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(current), Some(next)) => next > current,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Every status that `next` may be written over.
    pub fn advanceable_to(next: CampaignLeadStatus) -> Vec<CampaignLeadStatus> {
        CampaignLeadStatus::ALL
            .iter()
            .copied()
            .filter(|status| status.can_advance_to(next))
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignLeadStatus::Pending => "PENDING",
            CampaignLeadStatus::Contacted => "CONTACTED",
            CampaignLeadStatus::Opened => "OPENED",
            CampaignLeadStatus::Clicked => "CLICKED",
            CampaignLeadStatus::Responded => "RESPONDED",
            CampaignLeadStatus::Removed => "REMOVED",
            CampaignLeadStatus::Declined => "DECLINED",
            CampaignLeadStatus::Booked => "BOOKED",
        }
    }
}

impl Display for CampaignLeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Manual,
    Opened,
    Clicked,
    Responded,
    Booked,
    OptOut,
    Uninterested,
    WrongContact,
    Other,
}

impl PauseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PauseReason::Manual => "manual",
            PauseReason::Opened => "opened",
            PauseReason::Clicked => "clicked",
            PauseReason::Responded => "responded",
            PauseReason::Booked => "booked",
            PauseReason::OptOut => "opt_out",
            PauseReason::Uninterested => "uninterested",
            PauseReason::WrongContact => "wrong_contact",
            PauseReason::Other => "other",
        }
    }
}

impl Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a pause came from an operator or from an engagement/compliance
/// signal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseOrigin {
    Manual,
    Automatic,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FollowUpPause {
    pub reason: PauseReason,
    pub origin: PauseOrigin,
    pub note: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub paused_at: DateTime<Utc>,
}

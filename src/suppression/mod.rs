use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::typedid::{TypedId, TypedIdMarker};
use crate::utils::{normalize_email, normalize_phone};

pub mod db;

pub type SuppressionId = TypedId<Suppression>;

/// A permanent do-not-contact record for one email address or phone
/// number. Records are created or re-reasoned, never deleted here.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Suppression {
    #[serde(rename = "_id")]
    pub id: SuppressionId,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub reason: SuppressionReason,
    /// What produced the record: a campaign id or a channel tag such as
    /// `sms_reply`.
    pub source: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
}

impl TypedIdMarker for Suppression {
    fn tag() -> &'static str {
        "SUP"
    }
}

impl Suppression {
    pub fn contact(&self) -> Option<SuppressedContact> {
        match (&self.email, &self.phone) {
            (Some(email), _) => Some(SuppressedContact::Email(email.clone())),
            (None, Some(phone)) => Some(SuppressedContact::Phone(phone.clone())),
            (None, None) => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    Bounce,
    Complaint,
    OptOut,
}

impl SuppressionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SuppressionReason::Bounce => "bounce",
            SuppressionReason::Complaint => "complaint",
            SuppressionReason::OptOut => "opt_out",
        }
    }
}

impl Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identifier a suppression is keyed by, already normalized.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SuppressedContact {
    Email(String),
    Phone(String),
}

impl SuppressedContact {
    pub fn email(email: &str) -> SuppressedContact {
        SuppressedContact::Email(normalize_email(email))
    }

    pub fn phone(phone: &str) -> SuppressedContact {
        SuppressedContact::Phone(normalize_phone(phone))
    }

    pub fn field(&self) -> &'static str {
        match self {
            SuppressedContact::Email(_) => "email",
            SuppressedContact::Phone(_) => "phone",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            SuppressedContact::Email(value) | SuppressedContact::Phone(value) => value,
        }
    }
}

impl Display for SuppressedContact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field(), self.value())
    }
}

use serde::{Deserialize, Serialize};

use crate::typedid::{TypedId, TypedIdMarker};
use crate::utils::normalize_phone;

pub mod db;

pub type LeadId = TypedId<Lead>;

/// The contact identity behind one or more campaign leads.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Lead {
    #[serde(rename = "_id")]
    pub id: LeadId,
    pub first_name: String,
    pub last_name: String,
    pub organization: Option<String>,
    pub email: String,
    pub phone: Option<String>,
}

impl TypedIdMarker for Lead {
    fn tag() -> &'static str {
        "LEA"
    }
}

impl Lead {
    /// Digits of the phone number, the key phone lookups match on.
    pub fn phone_digits(&self) -> Option<String> {
        self.phone
            .as_deref()
            .map(normalize_phone)
            .filter(|digits| !digits.is_empty())
    }

    /// Template variables drawn from the contact record. Absent optional
    /// fields are left out so their placeholders survive rendering.
    pub fn template_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("firstName", self.first_name.clone()),
            ("lastName", self.last_name.clone()),
            ("email", self.email.clone()),
        ];
        if let Some(organization) = &self.organization {
            fields.push(("organization", organization.clone()));
        }
        if let Some(phone) = &self.phone {
            fields.push(("phone", phone.clone()));
        }
        fields
    }
}

use async_trait::async_trait;
use mongodb::bson::{self, Document};

use crate::database::MongoLeadStore;
use crate::error::Error;
use crate::utils::normalize_phone;

use super::{Lead, LeadId};

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), Error>;

    async fn fetch_lead_by_id(&self, lead_id: LeadId) -> Result<Option<Lead>, Error>;

    /// Finds the lead whose phone number has the given digits.
    async fn fetch_lead_by_phone(&self, phone_digits: &str) -> Result<Option<Lead>, Error>;
}

/// The stored form of a lead. It carries the digits of the phone number
/// so lookups by phone do not depend on how the number was written.
fn lead_document(lead: &Lead) -> Result<Document, Error> {
    let mut document = bson::to_document(lead)?;
    if let Some(digits) = lead.phone_digits() {
        document.insert("phone_digits", digits);
    }

    Ok(document)
}

#[async_trait]
impl LeadStore for MongoLeadStore {
    #[tracing::instrument(skip(self))]
    async fn insert_lead(&self, lead: &Lead) -> Result<(), Error> {
        let document = lead_document(lead)?;
        self.clone_with_type::<Document>()
            .insert_one(document, None)
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_lead_by_id(&self, lead_id: LeadId) -> Result<Option<Lead>, Error> {
        let lead = self.find_one(bson::doc! { "_id": lead_id }, None).await?;

        Ok(lead)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_lead_by_phone(&self, phone_digits: &str) -> Result<Option<Lead>, Error> {
        let digits = normalize_phone(phone_digits);
        if digits.is_empty() {
            return Ok(None);
        }

        let lead = self
            .find_one(bson::doc! { "phone_digits": digits }, None)
            .await?;

        Ok(lead)
    }
}

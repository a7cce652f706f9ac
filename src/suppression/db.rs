use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{self, Bson, Document};
use mongodb::options::UpdateOptions;

use crate::database::MongoSuppressionStore;
use crate::error::Error;

use super::{SuppressedContact, Suppression, SuppressionId, SuppressionReason};

#[async_trait]
pub trait SuppressionStore: Send + Sync {
    /// Creates the record for `contact` or, if one exists, replaces only
    /// its reason.
    async fn upsert_suppression(
        &self,
        contact: &SuppressedContact,
        reason: SuppressionReason,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Error>;

    async fn fetch_suppression(
        &self,
        contact: &SuppressedContact,
    ) -> Result<Option<Suppression>, Error>;
}

fn contact_filter(contact: &SuppressedContact) -> Document {
    let mut filter = Document::new();
    filter.insert(contact.field(), contact.value());
    filter
}

#[async_trait]
impl SuppressionStore for MongoSuppressionStore {
    #[tracing::instrument(skip(self))]
    async fn upsert_suppression(
        &self,
        contact: &SuppressedContact,
        reason: SuppressionReason,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let now = bson::DateTime::from_chrono(now);
        // the keyed field comes from the filter on insert
        let other_field = match contact {
            SuppressedContact::Email(_) => "phone",
            SuppressedContact::Phone(_) => "email",
        };
        let mut on_insert = bson::doc! {
            "_id": SuppressionId::new(),
            "source": source,
            "created_at": now,
        };
        on_insert.insert(other_field, Bson::Null);
        let options = UpdateOptions::builder().upsert(true).build();

        self.update_one(
            contact_filter(contact),
            bson::doc! {
                "$set": { "reason": reason.as_str(), "modified_at": now },
                "$setOnInsert": on_insert,
            },
            options,
        )
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_suppression(
        &self,
        contact: &SuppressedContact,
    ) -> Result<Option<Suppression>, Error> {
        let suppression = self
            .find_one(contact_filter(contact), None)
            .await?;

        Ok(suppression)
    }
}

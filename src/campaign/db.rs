use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson;

use crate::database::MongoCampaignStore;
use crate::error::Error;

use super::{Campaign, CampaignId, CampaignStatus};

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error>;

    async fn fetch_campaign_by_id(&self, campaign_id: CampaignId)
        -> Result<Option<Campaign>, Error>;

    async fn update_campaign_launched(
        &self,
        campaign: Campaign,
        launched_at: DateTime<Utc>,
    ) -> Result<Campaign, Error>;
}

#[async_trait]
impl CampaignStore for MongoCampaignStore {
    #[tracing::instrument(skip(self))]
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error> {
        self.insert_one(campaign, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaign_by_id(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error> {
        let campaign = self
            .find_one(bson::doc! { "_id": campaign_id }, None)
            .await?;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self))]
    async fn update_campaign_launched(
        &self,
        mut campaign: Campaign,
        launched_at: DateTime<Utc>,
    ) -> Result<Campaign, Error> {
        let old_modified_at = bson::DateTime::from_chrono(campaign.modified_at);
        let new_modified_at = bson::DateTime::from_chrono(launched_at);
        let new_status = bson::to_bson(&CampaignStatus::Active)?;

        let result = self
            .update_one(
                bson::doc! { "_id": campaign.id, "modified_at": old_modified_at },
                bson::doc! { "$set": {
                    "status": new_status,
                    "launched_at": new_modified_at,
                    "modified_at": new_modified_at,
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.status = CampaignStatus::Active;
        campaign.launched_at = Some(launched_at);
        campaign.modified_at = launched_at;

        Ok(campaign)
    }
}

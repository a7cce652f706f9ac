use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, Bson, Document};
use mongodb::options::{FindOneOptions, FindOptions};

use crate::campaign::CampaignId;
use crate::campaign_lead::CampaignLeadId;
use crate::database::MongoOutreachLogStore;
use crate::error::Error;
use crate::lead::LeadId;

use super::{Channel, LogTransition, OutreachLog, OutreachLogId, OutreachLogStatus};

#[async_trait]
pub trait OutreachLogStore: Send + Sync {
    async fn insert_outreach_log(&self, log: &OutreachLog) -> Result<(), Error>;

    async fn fetch_outreach_logs_by_campaign_lead(
        &self,
        campaign_lead_id: CampaignLeadId,
    ) -> Result<Vec<OutreachLog>, Error>;

    async fn fetch_outreach_log_by_provider_message_id(
        &self,
        channel: Channel,
        provider_message_id: &str,
    ) -> Result<Option<OutreachLog>, Error>;

    /// Most recent log for one campaign's lead on a channel.
    async fn fetch_latest_outreach_log(
        &self,
        campaign_id: CampaignId,
        lead_id: LeadId,
        channel: Channel,
    ) -> Result<Option<OutreachLog>, Error>;

    /// Most recent log for a lead on a channel, across campaigns.
    async fn fetch_latest_outreach_log_by_lead(
        &self,
        lead_id: LeadId,
        channel: Channel,
    ) -> Result<Option<OutreachLog>, Error>;

    /// Applies the transition only if the stored status allows it.
    async fn update_outreach_log_status(
        &self,
        log_id: OutreachLogId,
        transition: LogTransition,
    ) -> Result<bool, Error>;
}

fn newest_first() -> FindOneOptions {
    FindOneOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build()
}

#[async_trait]
impl OutreachLogStore for MongoOutreachLogStore {
    #[tracing::instrument(skip(self))]
    async fn insert_outreach_log(&self, log: &OutreachLog) -> Result<(), Error> {
        self.insert_one(log, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_outreach_logs_by_campaign_lead(
        &self,
        campaign_lead_id: CampaignLeadId,
    ) -> Result<Vec<OutreachLog>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "created_at": -1 })
            .build();

        let logs: Vec<OutreachLog> = self
            .find(bson::doc! { "campaign_lead_id": campaign_lead_id }, options)
            .await?
            .try_collect()
            .await?;

        Ok(logs)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_outreach_log_by_provider_message_id(
        &self,
        channel: Channel,
        provider_message_id: &str,
    ) -> Result<Option<OutreachLog>, Error> {
        let log = self
            .find_one(
                bson::doc! {
                    "channel": channel.as_str(),
                    "provider_message_id": provider_message_id,
                },
                None,
            )
            .await?;

        Ok(log)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_latest_outreach_log(
        &self,
        campaign_id: CampaignId,
        lead_id: LeadId,
        channel: Channel,
    ) -> Result<Option<OutreachLog>, Error> {
        let log = self
            .find_one(
                bson::doc! {
                    "campaign_id": campaign_id,
                    "lead_id": lead_id,
                    "channel": channel.as_str(),
                },
                newest_first(),
            )
            .await?;

        Ok(log)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_latest_outreach_log_by_lead(
        &self,
        lead_id: LeadId,
        channel: Channel,
    ) -> Result<Option<OutreachLog>, Error> {
        let log = self
            .find_one(
                bson::doc! { "lead_id": lead_id, "channel": channel.as_str() },
                newest_first(),
            )
            .await?;

        Ok(log)
    }

    #[tracing::instrument(skip(self))]
    async fn update_outreach_log_status(
        &self,
        log_id: OutreachLogId,
        transition: LogTransition,
    ) -> Result<bool, Error> {
        let predecessors: Vec<Bson> = OutreachLogStatus::transitionable_to(transition.status)
            .into_iter()
            .map(|status| Bson::String(status.as_str().to_owned()))
            .collect();

        let mut set = Document::new();
        set.insert("status", transition.status.as_str());
        set.insert(
            transition.timestamp_field(),
            bson::DateTime::from_chrono(transition.at),
        );
        if let Some(error_message) = &transition.error_message {
            set.insert("error_message", error_message.as_str());
        }

        let result = self
            .update_one(
                bson::doc! { "_id": log_id, "status": { "$in": predecessors } },
                bson::doc! { "$set": set },
                None,
            )
            .await?;

        Ok(result.modified_count > 0)
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, Bson, Document};
use mongodb::options::{FindOptions, UpdateModifications};

use crate::campaign::CampaignId;
use crate::database::MongoCampaignLeadStore;
use crate::error::Error;
use crate::lead::LeadId;

use super::{CampaignLead, CampaignLeadId, CampaignLeadStatus, FollowUpPause};

/// Persistence for campaign leads. Every write is conditioned so that a
/// concurrent webhook, sweep or operator action cannot move a lead
/// backwards; the returned flag says whether the write applied.
#[async_trait]
pub trait CampaignLeadStore: Send + Sync {
    async fn insert_campaign_lead(&self, campaign_lead: &CampaignLead) -> Result<(), Error>;

    async fn fetch_campaign_lead_by_id(
        &self,
        campaign_lead_id: CampaignLeadId,
    ) -> Result<Option<CampaignLead>, Error>;

    async fn fetch_pending_campaign_leads(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<CampaignLead>, Error>;

    /// Leads whose follow-up is due at `now`, oldest schedule first.
    async fn fetch_due_campaign_leads(&self, now: DateTime<Utc>)
        -> Result<Vec<CampaignLead>, Error>;

    async fn fetch_campaign_leads_by_lead(&self, lead_id: LeadId)
        -> Result<Vec<CampaignLead>, Error>;

    /// Writes `status` only if it ranks above the stored status.
    async fn update_campaign_lead_status(
        &self,
        campaign_lead_id: CampaignLeadId,
        status: CampaignLeadStatus,
    ) -> Result<bool, Error>;

    /// Records an outbound send: moves the anchor to `contacted_at` and
    /// promotes `PENDING` to `CONTACTED`, in one write.
    async fn update_campaign_lead_contacted(
        &self,
        campaign_lead_id: CampaignLeadId,
        contacted_at: DateTime<Utc>,
    ) -> Result<bool, Error>;

    /// Applies only while the lead is unpaused and non-terminal.
    async fn update_campaign_lead_schedule(
        &self,
        campaign_lead_id: CampaignLeadId,
        follow_up_count: u32,
        scheduled_follow_up_date: Option<DateTime<Utc>>,
    ) -> Result<bool, Error>;

    /// Pauses follow-ups and clears any scheduled date in the same write.
    async fn update_campaign_lead_paused(
        &self,
        campaign_lead_id: CampaignLeadId,
        pause: FollowUpPause,
    ) -> Result<bool, Error>;

    /// Clears the pause and moves the anchor to `resumed_at`.
    async fn update_campaign_lead_resumed(
        &self,
        campaign_lead_id: CampaignLeadId,
        resumed_at: DateTime<Utc>,
    ) -> Result<bool, Error>;

    /// Moves every campaign lead of `lead_id` to `REMOVED`, paused and
    /// unscheduled. Applies to all rows or none.
    async fn remove_campaign_leads_by_lead(
        &self,
        lead_id: LeadId,
        pause: FollowUpPause,
    ) -> Result<u64, Error>;
}

fn status_list(statuses: &[CampaignLeadStatus]) -> Vec<Bson> {
    statuses
        .iter()
        .map(|status| Bson::String(status.as_str().to_owned()))
        .collect()
}

fn terminal_statuses() -> Vec<Bson> {
    let terminal: Vec<_> = CampaignLeadStatus::ALL
        .iter()
        .copied()
        .filter(|status| status.is_terminal())
        .collect();
    status_list(&terminal)
}

fn removal_update(pause: &FollowUpPause) -> Result<Document, Error> {
    Ok(bson::doc! { "$set": {
        "status": CampaignLeadStatus::Removed.as_str(),
        "follow_up_pause": bson::to_bson(pause)?,
        "scheduled_follow_up_date": Bson::Null,
    } })
}

#[async_trait]
impl CampaignLeadStore for MongoCampaignLeadStore {
    #[tracing::instrument(skip(self))]
    async fn insert_campaign_lead(&self, campaign_lead: &CampaignLead) -> Result<(), Error> {
        self.collection.insert_one(campaign_lead, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaign_lead_by_id(
        &self,
        campaign_lead_id: CampaignLeadId,
    ) -> Result<Option<CampaignLead>, Error> {
        let campaign_lead = self
            .collection
            .find_one(bson::doc! { "_id": campaign_lead_id }, None)
            .await?;

        Ok(campaign_lead)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_pending_campaign_leads(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<CampaignLead>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "created_at": 1 })
            .build();

        let campaign_leads: Vec<CampaignLead> = self
            .collection
            .find(
                bson::doc! {
                    "campaign_id": campaign_id,
                    "status": CampaignLeadStatus::Pending.as_str(),
                },
                options,
            )
            .await?
            .try_collect()
            .await?;

        Ok(campaign_leads)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_due_campaign_leads(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CampaignLead>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "scheduled_follow_up_date": 1 })
            .build();

        let campaign_leads: Vec<CampaignLead> = self
            .collection
            .find(
                bson::doc! {
                    "scheduled_follow_up_date": { "$lte": bson::DateTime::from_chrono(now) },
                    "follow_up_pause": Bson::Null,
                    "status": { "$in": status_list(&CampaignLeadStatus::FOLLOW_UP_ELIGIBLE) },
                },
                options,
            )
            .await?
            .try_collect()
            .await?;

        Ok(campaign_leads)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaign_leads_by_lead(
        &self,
        lead_id: LeadId,
    ) -> Result<Vec<CampaignLead>, Error> {
        let campaign_leads: Vec<CampaignLead> = self
            .collection
            .find(bson::doc! { "lead_id": lead_id }, None)
            .await?
            .try_collect()
            .await?;

        Ok(campaign_leads)
    }

    #[tracing::instrument(skip(self))]
    async fn update_campaign_lead_status(
        &self,
        campaign_lead_id: CampaignLeadId,
        status: CampaignLeadStatus,
    ) -> Result<bool, Error> {
        let predecessors = CampaignLeadStatus::advanceable_to(status);

        let mut changes = bson::doc! { "status": status.as_str() };
        if status.is_terminal() {
            changes.insert("scheduled_follow_up_date", Bson::Null);
        }

        let result = self
            .collection
            .update_one(
                bson::doc! {
                    "_id": campaign_lead_id,
                    "status": { "$in": status_list(&predecessors) },
                },
                bson::doc! { "$set": changes },
                None,
            )
            .await?;

        Ok(result.modified_count > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn update_campaign_lead_contacted(
        &self,
        campaign_lead_id: CampaignLeadId,
        contacted_at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let pipeline = vec![bson::doc! { "$set": {
            "updated_at": bson::DateTime::from_chrono(contacted_at),
            "status": { "$cond": [
                { "$eq": ["$status", CampaignLeadStatus::Pending.as_str()] },
                CampaignLeadStatus::Contacted.as_str(),
                "$status",
            ] },
        } }];

        let result = self
            .collection
            .update_one(
                bson::doc! {
                    "_id": campaign_lead_id,
                    "status": { "$nin": terminal_statuses() },
                },
                UpdateModifications::Pipeline(pipeline),
                None,
            )
            .await?;

        Ok(result.matched_count > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn update_campaign_lead_schedule(
        &self,
        campaign_lead_id: CampaignLeadId,
        follow_up_count: u32,
        scheduled_follow_up_date: Option<DateTime<Utc>>,
    ) -> Result<bool, Error> {
        let date = scheduled_follow_up_date
            .map(|date| Bson::DateTime(bson::DateTime::from_chrono(date)))
            .unwrap_or(Bson::Null);

        let result = self
            .collection
            .update_one(
                bson::doc! {
                    "_id": campaign_lead_id,
                    "follow_up_pause": Bson::Null,
                    "status": { "$nin": terminal_statuses() },
                },
                bson::doc! { "$set": {
                    "follow_up_count": follow_up_count,
                    "scheduled_follow_up_date": date,
                } },
                None,
            )
            .await?;

        Ok(result.matched_count > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn update_campaign_lead_paused(
        &self,
        campaign_lead_id: CampaignLeadId,
        pause: FollowUpPause,
    ) -> Result<bool, Error> {
        let result = self
            .collection
            .update_one(
                bson::doc! { "_id": campaign_lead_id },
                bson::doc! { "$set": {
                    "follow_up_pause": bson::to_bson(&pause)?,
                    "scheduled_follow_up_date": Bson::Null,
                } },
                None,
            )
            .await?;

        Ok(result.matched_count > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn update_campaign_lead_resumed(
        &self,
        campaign_lead_id: CampaignLeadId,
        resumed_at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let result = self
            .collection
            .update_one(
                bson::doc! {
                    "_id": campaign_lead_id,
                    "status": { "$nin": terminal_statuses() },
                },
                bson::doc! { "$set": {
                    "follow_up_pause": Bson::Null,
                    "updated_at": bson::DateTime::from_chrono(resumed_at),
                } },
                None,
            )
            .await?;

        Ok(result.matched_count > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn remove_campaign_leads_by_lead(
        &self,
        lead_id: LeadId,
        pause: FollowUpPause,
    ) -> Result<u64, Error> {
        let update = removal_update(&pause)?;

        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        let result = match self
            .collection
            .update_many_with_session(bson::doc! { "lead_id": lead_id }, update, None, &mut session)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                session.abort_transaction().await?;
                return Err(err.into());
            }
        };

        session.commit_transaction().await?;

        Ok(result.matched_count)
    }
}

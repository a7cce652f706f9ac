use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::database::Database;
use crate::error::Error;
use crate::follow_up::manager::schedule_follow_up;
use crate::outreach::dispatcher::process_outreach_queue;
use crate::outreach::{Channel, OutreachJob, OutreachResult};
use crate::services::Services;
use crate::template::{MessageTemplateId, TemplateContent};

use super::{Campaign, CampaignId, CampaignStatus};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LaunchSummary {
    pub campaign_id: CampaignId,
    pub status: CampaignStatus,
    pub launched_at: Option<DateTime<Utc>>,
    pub queued: usize,
    pub sent: usize,
    pub failed: usize,
    pub follow_ups_scheduled: usize,
    pub channel: Channel,
    pub results: Vec<OutreachResult>,
}

/// Picks the launch message: the requested template, else the newest
/// generic one for the channel, else the built-in default.
#[tracing::instrument(skip(db))]
async fn select_launch_template(
    db: &dyn Database,
    channel: Channel,
    template_id: Option<MessageTemplateId>,
) -> Result<TemplateContent, Error> {
    if let Some(template_id) = template_id {
        if let Some(template) = db.templates().fetch_template_by_id(template_id).await? {
            return Ok(template.into());
        }
    }

    let template = db.templates().fetch_latest_generic_template(channel).await?;

    Ok(template
        .map(TemplateContent::from)
        .unwrap_or_else(|| TemplateContent::default_launch(channel)))
}

fn campaign_variables(campaign: &Campaign) -> HashMap<String, String> {
    let mut variables = HashMap::new();
    variables.insert("campaignName".to_owned(), campaign.name.clone());
    if let Some(base_location) = &campaign.base_location {
        variables.insert("baseLocation".to_owned(), base_location.clone());
    }
    variables
}

/// Sends the first message to every pending lead of an approved campaign
/// and schedules the first follow-up for each lead reached.
#[tracing::instrument(skip(db, services))]
pub async fn launch_campaign(
    db: &dyn Database,
    services: &Services,
    campaign_id: CampaignId,
    channel: Channel,
    template_id: Option<MessageTemplateId>,
) -> Result<LaunchSummary, Error> {
    let campaign = db
        .campaigns()
        .fetch_campaign_by_id(campaign_id)
        .await?
        .ok_or(Error::CampaignDoesNotExist { campaign_id })?;

    if campaign.status != CampaignStatus::Approved || campaign.approved_at.is_none() {
        return Err(Error::CampaignNotApproved {
            campaign_id,
            status: campaign.status,
        });
    }

    let pending = db
        .campaign_leads()
        .fetch_pending_campaign_leads(campaign_id)
        .await?;
    if pending.is_empty() {
        return Err(Error::NoPendingLeads { campaign_id });
    }

    let template = select_launch_template(db, channel, template_id).await?;
    let variables = campaign_variables(&campaign);

    // claiming the launch first keeps a second launch from sending again
    let campaign = db
        .campaigns()
        .update_campaign_launched(campaign, Utc::now())
        .await?;

    let jobs: Vec<OutreachJob> = pending
        .iter()
        .map(|campaign_lead| OutreachJob {
            campaign_lead_id: campaign_lead.id,
            channel,
            subject: template.subject.clone(),
            template_body: template.body.clone(),
            template_variables: variables.clone(),
        })
        .collect();
    let queued = jobs.len();

    let results = process_outreach_queue(
        db,
        &services.providers,
        &services.dispatch,
        jobs,
    )
    .await;

    let mut follow_ups_scheduled = 0;
    for result in results.iter().filter(|result| result.success) {
        let schedule =
            schedule_follow_up(db, services.cadence.as_ref(), result.job_id, 0).await?;
        if schedule.scheduled {
            follow_ups_scheduled += 1;
        }
    }

    let sent = results.iter().filter(|result| result.success).count();
    info!(%campaign_id, queued, sent, follow_ups_scheduled, "campaign launched");

    Ok(LaunchSummary {
        campaign_id,
        status: campaign.status,
        launched_at: campaign.launched_at,
        queued,
        sent,
        failed: queued - sent,
        follow_ups_scheduled,
        channel,
        results,
    })
}

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::campaign_lead::{CampaignLeadStatus, FollowUpPause, PauseOrigin, PauseReason};
use crate::database::Database;
use crate::error::Error;
use crate::follow_up::manager::auto_pause_follow_up;
use crate::outreach::{LogTransition, OutreachLog, OutreachLogStatus};
use crate::suppression::{SuppressedContact, SuppressionReason};

use super::{Correlation, DeliveryEvent, DeliveryEventType};

/// Source recorded on suppressions created by an SMS reply.
pub const SMS_REPLY_SOURCE: &str = "sms_reply";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Applied,
    /// Nothing could be matched; the event is acknowledged and dropped.
    Ignored(&'static str),
}

/// Applies one provider event to the delivery log, the campaign lead, and
/// the suppression registry.
///
/// Every write is conditional or an upsert, so a provider retrying the
/// same event changes nothing the second time. Only store failures are
/// returned as errors.
#[tracing::instrument(skip(db))]
pub async fn ingest_delivery_event(
    db: &dyn Database,
    event: DeliveryEvent,
) -> Result<IngestOutcome, Error> {
    if event.is_opt_out() {
        return opt_out(db, &event).await;
    }

    let log = match find_log(db, &event).await? {
        Some(log) => log,
        None => {
            warn!("no outreach log matches {:?} event", event.event_type);
            return Ok(IngestOutcome::Ignored("no matching outreach log"));
        }
    };

    let logs = db.outreach_logs();
    let campaign_leads = db.campaign_leads();
    let at = event.occurred_at;

    match event.event_type {
        DeliveryEventType::Delivered => {
            logs.update_outreach_log_status(log.id, LogTransition::new(OutreachLogStatus::Delivered, at))
                .await?;
        }
        DeliveryEventType::Opened => {
            logs.update_outreach_log_status(log.id, LogTransition::new(OutreachLogStatus::Opened, at))
                .await?;
            campaign_leads
                .update_campaign_lead_status(log.campaign_lead_id, CampaignLeadStatus::Opened)
                .await?;
        }
        DeliveryEventType::Clicked => {
            logs.update_outreach_log_status(log.id, LogTransition::new(OutreachLogStatus::Clicked, at))
                .await?;
            campaign_leads
                .update_campaign_lead_status(log.campaign_lead_id, CampaignLeadStatus::Clicked)
                .await?;
            return pause_engaged_lead(db, &log, PauseReason::Clicked).await;
        }
        DeliveryEventType::Replied => {
            logs.update_outreach_log_status(
                log.id,
                LogTransition::new(OutreachLogStatus::Responded, at),
            )
            .await?;
            campaign_leads
                .update_campaign_lead_status(log.campaign_lead_id, CampaignLeadStatus::Responded)
                .await?;
            return pause_engaged_lead(db, &log, PauseReason::Responded).await;
        }
        DeliveryEventType::Bounced => {
            let error = event.error.as_deref().unwrap_or("Email bounced");
            logs.update_outreach_log_status(
                log.id,
                LogTransition::new(OutreachLogStatus::Bounced, at).with_error(error),
            )
            .await?;
            suppress_email(db, &log, SuppressionReason::Bounce, at).await?;
        }
        DeliveryEventType::Complained => {
            logs.update_outreach_log_status(
                log.id,
                LogTransition::new(OutreachLogStatus::Failed, at).with_error("Spam complaint"),
            )
            .await?;
            suppress_email(db, &log, SuppressionReason::Complaint, at).await?;
        }
        DeliveryEventType::Failed => {
            let error = event.error.as_deref().unwrap_or("Delivery failed");
            logs.update_outreach_log_status(
                log.id,
                LogTransition::new(OutreachLogStatus::Failed, at).with_error(error),
            )
            .await?;
        }
    }

    Ok(IngestOutcome::Applied)
}

/// The log can outlive its campaign lead; that event is acknowledged.
async fn pause_engaged_lead(
    db: &dyn Database,
    log: &OutreachLog,
    reason: PauseReason,
) -> Result<IngestOutcome, Error> {
    match auto_pause_follow_up(db, log.campaign_lead_id, reason).await {
        Ok(()) => Ok(IngestOutcome::Applied),
        Err(Error::CampaignLeadDoesNotExist { .. }) => {
            warn!(
                "outreach log {} points at missing campaign lead {}",
                log.id, log.campaign_lead_id
            );
            Ok(IngestOutcome::Ignored("campaign lead no longer exists"))
        }
        Err(err) => Err(err),
    }
}

/// Provider message id first, then the most recent log for the
/// correlated contact on the event's channel.
async fn find_log(db: &dyn Database, event: &DeliveryEvent) -> Result<Option<OutreachLog>, Error> {
    let logs = db.outreach_logs();

    if let Some(provider_message_id) = &event.provider_message_id {
        let log = logs
            .fetch_outreach_log_by_provider_message_id(event.channel, provider_message_id)
            .await?;
        if log.is_some() {
            return Ok(log);
        }
    }

    match &event.correlation {
        Correlation::Campaign {
            campaign_id,
            lead_id,
        } => {
            logs.fetch_latest_outreach_log(*campaign_id, *lead_id, event.channel)
                .await
        }
        Correlation::Phone(phone) => match db.leads().fetch_lead_by_phone(phone).await? {
            Some(lead) => {
                logs.fetch_latest_outreach_log_by_lead(lead.id, event.channel)
                    .await
            }
            None => Ok(None),
        },
        Correlation::None => Ok(None),
    }
}

async fn suppress_email(
    db: &dyn Database,
    log: &OutreachLog,
    reason: SuppressionReason,
    at: DateTime<Utc>,
) -> Result<(), Error> {
    let lead = match db.leads().fetch_lead_by_id(log.lead_id).await? {
        Some(lead) => lead,
        None => {
            warn!(lead_id = %log.lead_id, "cannot suppress a lead that no longer exists");
            return Ok(());
        }
    };

    db.suppressions()
        .upsert_suppression(
            &SuppressedContact::email(&lead.email),
            reason,
            &log.campaign_id.to_string(),
            at,
        )
        .await
}

/// Withdraws the contact from every campaign and blocks the number.
async fn opt_out(db: &dyn Database, event: &DeliveryEvent) -> Result<IngestOutcome, Error> {
    let phone = match &event.correlation {
        Correlation::Phone(phone) if !phone.is_empty() => phone,
        _ => {
            warn!("opt-out reply without a phone number");
            return Ok(IngestOutcome::Ignored("opt-out without a phone number"));
        }
    };

    db.suppressions()
        .upsert_suppression(
            &SuppressedContact::phone(phone),
            SuppressionReason::OptOut,
            SMS_REPLY_SOURCE,
            event.occurred_at,
        )
        .await?;

    if let Some(lead) = db.leads().fetch_lead_by_phone(phone).await? {
        let pause = FollowUpPause {
            reason: PauseReason::OptOut,
            origin: PauseOrigin::Automatic,
            note: None,
            paused_at: event.occurred_at,
        };
        let removed = db
            .campaign_leads()
            .remove_campaign_leads_by_lead(lead.id, pause)
            .await?;
        info!(lead_id = %lead.id, removed, "lead opted out");
    }

    Ok(IngestOutcome::Applied)
}

use chrono::Utc;

use crate::cadence::{calculate_next_follow_up, CadenceRules};
use crate::campaign_lead::{CampaignLeadId, FollowUpPause, PauseOrigin, PauseReason};
use crate::database::Database;
use crate::error::Error;

use super::{ScheduleResult, ScheduleSkipReason};

/// Schedules follow-up `current_follow_up_count + 1`, measured from the
/// lead's last outbound touch. Calling it again with the same count
/// writes the same date.
#[tracing::instrument(skip(db, rules))]
pub async fn schedule_follow_up(
    db: &dyn Database,
    rules: &dyn CadenceRules,
    campaign_lead_id: CampaignLeadId,
    current_follow_up_count: u32,
) -> Result<ScheduleResult, Error> {
    let follow_up_number = current_follow_up_count + 1;

    let campaign_lead = match db
        .campaign_leads()
        .fetch_campaign_lead_by_id(campaign_lead_id)
        .await?
    {
        Some(campaign_lead) => campaign_lead,
        None => {
            return Ok(ScheduleResult::skipped(
                follow_up_number,
                ScheduleSkipReason::CampaignLeadNotFound,
            ))
        }
    };

    if campaign_lead.follow_ups_paused() {
        return Ok(ScheduleResult::skipped(
            follow_up_number,
            ScheduleSkipReason::FollowUpsPaused,
        ));
    }

    if campaign_lead.status.is_terminal() {
        return Ok(ScheduleResult::skipped(
            follow_up_number,
            ScheduleSkipReason::TerminalStatus(campaign_lead.status),
        ));
    }

    let plan = calculate_next_follow_up(
        rules,
        &campaign_lead.source,
        current_follow_up_count,
        campaign_lead.updated_at,
    );

    match plan.next_date {
        Some(next_date) if plan.should_follow_up => {
            let applied = db
                .campaign_leads()
                .update_campaign_lead_schedule(campaign_lead_id, current_follow_up_count, Some(next_date))
                .await?;

            if !applied {
                return Ok(ScheduleResult::skipped(
                    follow_up_number,
                    ScheduleSkipReason::StateChanged,
                ));
            }

            Ok(ScheduleResult::scheduled(next_date, plan.follow_up_number))
        }
        _ => {
            // exhausted: keep the count within the cadence and make sure
            // the lead is no longer due
            let max_follow_ups = rules.rule(&campaign_lead.source).max_follow_ups;
            db.campaign_leads()
                .update_campaign_lead_schedule(
                    campaign_lead_id,
                    current_follow_up_count.min(max_follow_ups),
                    None,
                )
                .await?;

            Ok(ScheduleResult::skipped(
                plan.follow_up_number,
                ScheduleSkipReason::MaxFollowUpsReached(max_follow_ups),
            ))
        }
    }
}

async fn pause_follow_up(
    db: &dyn Database,
    campaign_lead_id: CampaignLeadId,
    pause: FollowUpPause,
) -> Result<(), Error> {
    let applied = db
        .campaign_leads()
        .update_campaign_lead_paused(campaign_lead_id, pause)
        .await?;

    if !applied {
        return Err(Error::CampaignLeadDoesNotExist { campaign_lead_id });
    }

    Ok(())
}

/// Pause triggered by an engagement or compliance signal.
#[tracing::instrument(skip(db))]
pub async fn auto_pause_follow_up(
    db: &dyn Database,
    campaign_lead_id: CampaignLeadId,
    reason: PauseReason,
) -> Result<(), Error> {
    let pause = FollowUpPause {
        reason,
        origin: PauseOrigin::Automatic,
        note: None,
        paused_at: Utc::now(),
    };

    pause_follow_up(db, campaign_lead_id, pause).await
}

#[tracing::instrument(skip(db))]
pub async fn manual_pause_follow_up(
    db: &dyn Database,
    campaign_lead_id: CampaignLeadId,
    reason: PauseReason,
    note: Option<String>,
) -> Result<(), Error> {
    let pause = FollowUpPause {
        reason,
        origin: PauseOrigin::Manual,
        note,
        paused_at: Utc::now(),
    };

    pause_follow_up(db, campaign_lead_id, pause).await
}

/// Lifts a pause and schedules the next follow-up from the moment of
/// resuming. Closed leads stay paused.
#[tracing::instrument(skip(db, rules))]
pub async fn resume_follow_up(
    db: &dyn Database,
    rules: &dyn CadenceRules,
    campaign_lead_id: CampaignLeadId,
) -> Result<ScheduleResult, Error> {
    let campaign_lead = match db
        .campaign_leads()
        .fetch_campaign_lead_by_id(campaign_lead_id)
        .await?
    {
        Some(campaign_lead) => campaign_lead,
        None => {
            return Ok(ScheduleResult::skipped(
                0,
                ScheduleSkipReason::CampaignLeadNotFound,
            ))
        }
    };

    if campaign_lead.status.is_terminal() {
        return Ok(ScheduleResult::skipped(
            campaign_lead.follow_up_count + 1,
            ScheduleSkipReason::TerminalStatus(campaign_lead.status),
        ));
    }

    db.campaign_leads()
        .update_campaign_lead_resumed(campaign_lead_id, Utc::now())
        .await?;

    schedule_follow_up(db, rules, campaign_lead_id, campaign_lead.follow_up_count).await
}

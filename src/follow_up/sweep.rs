use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::database::Database;
use crate::error::Error;
use crate::outreach::dispatcher::process_outreach_queue;
use crate::outreach::{Channel, OutreachJob};
use crate::services::Services;
use crate::template::{follow_up_template_name, TemplateContent, GENERIC_FOLLOW_UP_TEMPLATE};

use super::manager::schedule_follow_up;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Jobs refused before reaching a provider. Their schedule is cleared.
    pub skipped: usize,
    pub next_scheduled: usize,
    pub duration_ms: u64,
}

#[tracing::instrument(skip(db))]
async fn select_follow_up_template(
    db: &dyn Database,
    follow_up_number: u32,
) -> Result<TemplateContent, Error> {
    let templates = db.templates();

    let numbered = follow_up_template_name(follow_up_number);
    if let Some(template) = templates.fetch_template_by_name(&numbered, Channel::Email).await? {
        return Ok(template.into());
    }

    if let Some(template) = templates
        .fetch_template_by_name(GENERIC_FOLLOW_UP_TEMPLATE, Channel::Email)
        .await?
    {
        return Ok(template.into());
    }

    Ok(TemplateContent::default_follow_up())
}

/// Sends every follow-up that is due at `now` and schedules the one after
/// it. A send that fails at the provider keeps its date and is retried by
/// the next sweep.
#[tracing::instrument(skip(db, services))]
pub async fn process_due_follow_ups(
    db: &dyn Database,
    services: &Services,
    now: DateTime<Utc>,
) -> Result<SweepSummary, Error> {
    let started = Instant::now();

    let due = db.campaign_leads().fetch_due_campaign_leads(now).await?;

    let mut templates: HashMap<u32, TemplateContent> = HashMap::new();
    let mut jobs = Vec::with_capacity(due.len());
    for campaign_lead in &due {
        let follow_up_number = campaign_lead.follow_up_count + 1;
        if !templates.contains_key(&follow_up_number) {
            let template = select_follow_up_template(db, follow_up_number).await?;
            templates.insert(follow_up_number, template);
        }
        let template = &templates[&follow_up_number];

        jobs.push(OutreachJob {
            campaign_lead_id: campaign_lead.id,
            channel: Channel::Email,
            subject: template.subject.clone(),
            template_body: template.body.clone(),
            template_variables: HashMap::new(),
        });
    }

    let results = process_outreach_queue(db, &services.providers, &services.dispatch, jobs).await;

    let mut summary = SweepSummary {
        processed: due.len(),
        sent: 0,
        failed: 0,
        skipped: 0,
        next_scheduled: 0,
        duration_ms: 0,
    };

    for (campaign_lead, result) in due.iter().zip(&results) {
        if result.success {
            summary.sent += 1;
            let schedule = schedule_follow_up(
                db,
                services.cadence.as_ref(),
                campaign_lead.id,
                campaign_lead.follow_up_count + 1,
            )
            .await?;
            if schedule.scheduled {
                summary.next_scheduled += 1;
            }
        } else if result.refused {
            summary.skipped += 1;
            warn!(campaign_lead_id = %campaign_lead.id, error = ?result.error, "follow-up refused, unscheduling");
            db.campaign_leads()
                .update_campaign_lead_schedule(campaign_lead.id, campaign_lead.follow_up_count, None)
                .await?;
        } else {
            summary.failed += 1;
        }
    }

    summary.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        processed = summary.processed,
        sent = summary.sent,
        failed = summary.failed,
        skipped = summary.skipped,
        "follow-up sweep finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::{CadenceRule, CadenceTable};
    use crate::campaign_lead::db::CampaignLeadStore;
    use crate::campaign_lead::{CampaignLead, CampaignLeadStatus, LeadSource};
    use crate::database::memory::MemoryDatabase;
    use crate::suppression::db::SuppressionStore;
    use crate::suppression::{SuppressedContact, SuppressionReason};
    use crate::template::db::TemplateStore;
    use crate::template::{MessageTemplate, MessageTemplateId};
    use crate::testing::{self, RecordingEmailProvider, RecordingSmsProvider};
    use chrono::Duration;
    use std::sync::Arc;

    fn services(email: &Arc<RecordingEmailProvider>) -> Services {
        let sms = Arc::new(RecordingSmsProvider::default());
        Services::new(testing::providers(email, &sms), testing::settings())
    }

    /// Marks the lead as contacted with a follow-up due an hour ago.
    async fn make_due(db: &MemoryDatabase, campaign_lead: &CampaignLead, follow_up_count: u32) {
        let now = Utc::now();
        db.campaign_leads
            .update_campaign_lead_contacted(campaign_lead.id, now - Duration::days(6))
            .await
            .unwrap();
        db.campaign_leads
            .update_campaign_lead_schedule(
                campaign_lead.id,
                follow_up_count,
                Some(now - Duration::hours(1)),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn due_follow_ups_are_sent_and_rescheduled() {
        let db = MemoryDatabase::new();
        let email = Arc::new(RecordingEmailProvider::default());
        let (_, _, campaign_lead) =
            testing::enrol(&db, "ana@example.com", None, LeadSource::Dormant).await;
        make_due(&db, &campaign_lead, 0).await;

        let summary = process_due_follow_ups(&db, &services(&email), Utc::now())
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.next_scheduled, 1);

        let stored = testing::stored(&db, campaign_lead.id);
        assert_eq!(stored.follow_up_count, 1);
        assert_eq!(
            stored.scheduled_follow_up_date,
            Some(stored.updated_at + Duration::days(12))
        );
        assert_eq!(email.sent()[0].subject, "Following up");
    }

    #[tokio::test]
    async fn the_last_follow_up_leaves_the_lead_unscheduled() {
        let db = MemoryDatabase::new();
        let email = Arc::new(RecordingEmailProvider::default());
        let (_, _, campaign_lead) =
            testing::enrol(&db, "ana@example.com", None, LeadSource::PastClient).await;
        make_due(&db, &campaign_lead, 0).await;

        let summary = process_due_follow_ups(&db, &services(&email), Utc::now())
            .await
            .unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.next_scheduled, 0);

        let stored = testing::stored(&db, campaign_lead.id);
        assert_eq!(stored.follow_up_count, 1);
        assert_eq!(stored.scheduled_follow_up_date, None);

        let again = process_due_follow_ups(&db, &services(&email), Utc::now())
            .await
            .unwrap();
        assert_eq!(again.processed, 0);
        assert_eq!(email.sent().len(), 1);
    }

    #[tokio::test]
    async fn numbered_templates_win_over_the_generic_one() {
        let db = MemoryDatabase::new();
        let email = Arc::new(RecordingEmailProvider::default());
        let (_, _, campaign_lead) =
            testing::enrol(&db, "ana@example.com", None, LeadSource::Dormant).await;
        make_due(&db, &campaign_lead, 1).await;

        for (name, subject) in vec![
            (GENERIC_FOLLOW_UP_TEMPLATE, "Checking in"),
            ("follow-up-2", "One last note"),
        ] {
            let template = MessageTemplate {
                id: MessageTemplateId::new(),
                name: name.to_owned(),
                channel: Channel::Email,
                service_type: None,
                subject: Some(subject.to_owned()),
                body: "Hi {{firstName}}".to_owned(),
                created_at: Utc::now(),
            };
            db.templates.insert_template(&template).await.unwrap();
        }

        process_due_follow_ups(&db, &services(&email), Utc::now())
            .await
            .unwrap();

        let sent = email.sent();
        assert_eq!(sent[0].subject, "One last note");
        assert_eq!(sent[0].html, "Hi Ana");
    }

    #[tokio::test]
    async fn store_failures_keep_the_follow_up_due() {
        let db = MemoryDatabase::new();
        let email = Arc::new(RecordingEmailProvider::default());
        let (_, _, campaign_lead) =
            testing::enrol(&db, "ana@example.com", None, LeadSource::Dormant).await;
        make_due(&db, &campaign_lead, 0).await;
        let due_at = testing::stored(&db, campaign_lead.id).scheduled_follow_up_date;
        let db = testing::UnwritableLogs(db);

        let summary = process_due_follow_ups(&db, &services(&email), Utc::now())
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 0);
        let stored = testing::stored(&db.0, campaign_lead.id);
        assert_eq!(stored.follow_up_count, 0);
        assert_eq!(stored.scheduled_follow_up_date, due_at);
        assert!(due_at.is_some());
    }

    #[tokio::test]
    async fn provider_failures_stay_due_and_refusals_are_unscheduled() {
        let db = MemoryDatabase::new();
        let email = Arc::new(RecordingEmailProvider::failing_for(&["bad@example.com"]));
        let (_, _, failing) =
            testing::enrol(&db, "bad@example.com", None, LeadSource::Dormant).await;
        let (_, _, suppressed) =
            testing::enrol(&db, "gone@example.com", None, LeadSource::Dormant).await;
        make_due(&db, &failing, 0).await;
        make_due(&db, &suppressed, 0).await;
        db.suppressions
            .upsert_suppression(
                &SuppressedContact::email("gone@example.com"),
                SuppressionReason::Bounce,
                "earlier-campaign",
                Utc::now(),
            )
            .await
            .unwrap();

        let summary = process_due_follow_ups(&db, &services(&email), Utc::now())
            .await
            .unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);

        let failing = testing::stored(&db, failing.id);
        assert_eq!(failing.status, CampaignLeadStatus::Contacted);
        assert!(failing.scheduled_follow_up_date.is_some());
        assert_eq!(testing::stored(&db, suppressed.id).scheduled_follow_up_date, None);
    }

    #[tokio::test]
    async fn a_custom_cadence_sets_the_next_date() {
        let db = MemoryDatabase::new();
        let email = Arc::new(RecordingEmailProvider::default());
        let (_, _, campaign_lead) =
            testing::enrol(&db, "ana@example.com", None, LeadSource::SimilarOrg).await;
        make_due(&db, &campaign_lead, 0).await;

        let cadence = CadenceTable::new(vec![(
            LeadSource::SimilarOrg,
            CadenceRule::new("SIMILAR_ORG", &[3, 10], "Two nudges"),
        )]);
        let services = services(&email).with_cadence(Arc::new(cadence));

        let summary = process_due_follow_ups(&db, &services, Utc::now())
            .await
            .unwrap();
        assert_eq!(summary.next_scheduled, 1);

        let stored = testing::stored(&db, campaign_lead.id);
        assert_eq!(
            stored.scheduled_follow_up_date,
            Some(stored.updated_at + Duration::days(10))
        );
    }

    #[tokio::test]
    async fn paused_leads_are_not_due() {
        let db = MemoryDatabase::new();
        let email = Arc::new(RecordingEmailProvider::default());
        let (_, _, campaign_lead) =
            testing::enrol(&db, "ana@example.com", None, LeadSource::Dormant).await;
        make_due(&db, &campaign_lead, 0).await;
        crate::follow_up::manager::manual_pause_follow_up(
            &db,
            campaign_lead.id,
            crate::campaign_lead::PauseReason::Manual,
            None,
        )
        .await
        .unwrap();

        let summary = process_due_follow_ups(&db, &services(&email), Utc::now())
            .await
            .unwrap();

        assert_eq!(summary.processed, 0);
        assert!(email.sent().is_empty());
    }
}

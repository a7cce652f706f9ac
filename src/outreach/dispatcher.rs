//! Turns a batch of outreach jobs into provider sends, delivery logs and
//! campaign lead updates.
//!
//! Jobs run with bounded concurrency but every job stands alone: a failed
//! lookup, a refused recipient or a provider timeout becomes a failed
//! result for that job and the rest of the batch carries on. Results come
//! back in job order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{stream, StreamExt};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::campaign_lead::CampaignLeadId;
use crate::database::Database;
use crate::error::Error;
use crate::suppression::SuppressedContact;
use crate::template::render_template;

use super::provider::{EmailMessage, EmailTag, ProviderError, Providers, SendReceipt, SmsMessage};
use super::{Channel, OutreachJob, OutreachLog, OutreachLogId, OutreachLogStatus, OutreachResult};

#[derive(Clone, Debug, PartialEq)]
pub struct DispatchSettings {
    /// How many jobs may be in flight at once.
    pub concurrency: usize,
    pub timeout: Duration,
    pub default_subject: String,
    /// Appended to every SMS body.
    pub sms_opt_out_footer: String,
}

impl Default for DispatchSettings {
    fn default() -> DispatchSettings {
        DispatchSettings {
            concurrency: 4,
            timeout: Duration::from_secs(15),
            default_subject: "A note from our team".to_owned(),
            sms_opt_out_footer: "Reply STOP to unsubscribe".to_owned(),
        }
    }
}

#[tracing::instrument(skip(db, providers, settings, jobs), fields(jobs = jobs.len()))]
pub async fn process_outreach_queue(
    db: &dyn Database,
    providers: &Providers,
    settings: &DispatchSettings,
    jobs: Vec<OutreachJob>,
) -> Vec<OutreachResult> {
    // jobs for the same campaign lead never overlap
    let mut locks: HashMap<CampaignLeadId, Arc<Mutex<()>>> = HashMap::new();
    for job in &jobs {
        locks.entry(job.campaign_lead_id).or_default();
    }

    let results: Vec<OutreachResult> = stream::iter(jobs)
        .map(|job| {
            let lock = Arc::clone(&locks[&job.campaign_lead_id]);
            async move {
                let _guard = lock.lock().await;
                dispatch_job(db, providers, settings, job).await
            }
        })
        .buffered(settings.concurrency.max(1))
        .collect()
        .await;

    let sent = results.iter().filter(|result| result.success).count();
    info!(sent, failed = results.len() - sent, "outreach batch finished");

    results
}

async fn dispatch_job(
    db: &dyn Database,
    providers: &Providers,
    settings: &DispatchSettings,
    job: OutreachJob,
) -> OutreachResult {
    let campaign_lead_id = job.campaign_lead_id;

    match try_dispatch_job(db, providers, settings, job).await {
        Ok(result) => {
            if let Some(err) = &result.error {
                warn!(%campaign_lead_id, "outreach job failed: {}", err);
            }
            result
        }
        Err(err) => {
            error!(%campaign_lead_id, "outreach job aborted: {}", err);
            OutreachResult::failure(campaign_lead_id, err.error_message())
        }
    }
}

async fn try_dispatch_job(
    db: &dyn Database,
    providers: &Providers,
    settings: &DispatchSettings,
    job: OutreachJob,
) -> Result<OutreachResult, Error> {
    let job_id = job.campaign_lead_id;

    let campaign_lead = match db.campaign_leads().fetch_campaign_lead_by_id(job_id).await? {
        Some(campaign_lead) => campaign_lead,
        None => return Ok(OutreachResult::refused(job_id, "Campaign lead not found")),
    };

    if campaign_lead.status.is_terminal() {
        return Ok(OutreachResult::refused(
            job_id,
            format!("Campaign lead is {}", campaign_lead.status),
        ));
    }

    let lead = match db.leads().fetch_lead_by_id(campaign_lead.lead_id).await? {
        Some(lead) => lead,
        None => return Ok(OutreachResult::refused(job_id, "Lead not found")),
    };

    if db
        .campaigns()
        .fetch_campaign_by_id(campaign_lead.campaign_id)
        .await?
        .is_none()
    {
        return Ok(OutreachResult::refused(job_id, "Campaign not found"));
    }

    let contact = match job.channel {
        Channel::Email => SuppressedContact::email(&lead.email),
        Channel::Sms => match &lead.phone {
            Some(phone) if !phone.trim().is_empty() => SuppressedContact::phone(phone),
            _ => return Ok(OutreachResult::refused(job_id, "Lead has no phone number")),
        },
    };

    if let Some(suppression) = db.suppressions().fetch_suppression(&contact).await? {
        return Ok(OutreachResult::refused(
            job_id,
            format!("Recipient is suppressed ({})", suppression.reason),
        ));
    }

    let mut variables = job.template_variables.clone();
    variables.extend(
        lead.template_fields()
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value)),
    );
    let body = render_template(&job.template_body, &variables);

    let send = async {
        match job.channel {
            Channel::Email => {
                let subject = job
                    .subject
                    .as_deref()
                    .map(|subject| render_template(subject, &variables))
                    .unwrap_or_else(|| settings.default_subject.clone());
                let message = EmailMessage {
                    to: lead.email.clone(),
                    subject,
                    html: body,
                    tags: vec![
                        EmailTag::new("campaignId", campaign_lead.campaign_id.to_string()),
                        EmailTag::new("leadId", campaign_lead.lead_id.to_string()),
                        EmailTag::new("channel", job.channel.provider_name()),
                    ],
                };
                providers.email.send_email(&message).await
            }
            Channel::Sms => {
                let message = SmsMessage {
                    to: lead.phone.clone().unwrap_or_default(),
                    body: format!("{}\n\n{}", body, settings.sms_opt_out_footer),
                };
                providers.sms.send_sms(&message).await
            }
        }
    };

    let outcome: Result<SendReceipt, ProviderError> =
        match tokio::time::timeout(settings.timeout, send).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::Timeout(settings.timeout)),
        };

    let now = Utc::now();
    let mut log = OutreachLog {
        id: OutreachLogId::new(),
        campaign_lead_id: job_id,
        campaign_id: campaign_lead.campaign_id,
        lead_id: campaign_lead.lead_id,
        channel: job.channel,
        status: OutreachLogStatus::Sent,
        provider_message_id: None,
        error_message: None,
        sent_at: None,
        delivered_at: None,
        opened_at: None,
        clicked_at: None,
        responded_at: None,
        failed_at: None,
        created_at: now,
    };

    let provider = Some(job.channel.provider_name().to_owned());

    match outcome {
        Ok(receipt) => {
            log.provider_message_id = receipt.id;
            log.sent_at = Some(now);
            db.outreach_logs().insert_outreach_log(&log).await?;
            db.campaign_leads()
                .update_campaign_lead_contacted(job_id, now)
                .await?;

            Ok(OutreachResult {
                success: true,
                job_id,
                error: None,
                provider,
                refused: false,
            })
        }
        Err(err) => {
            let message = err.to_string();
            log.status = OutreachLogStatus::Failed;
            log.error_message = Some(message.clone());
            log.failed_at = Some(now);
            db.outreach_logs().insert_outreach_log(&log).await?;

            Ok(OutreachResult {
                success: false,
                job_id,
                error: Some(message),
                provider,
                refused: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign_lead::db::CampaignLeadStore;
    use crate::campaign_lead::{CampaignLeadStatus, LeadSource};
    use crate::database::memory::MemoryDatabase;
    use crate::suppression::db::SuppressionStore;
    use crate::suppression::SuppressionReason;
    use crate::testing::{self, RecordingEmailProvider, RecordingSmsProvider};

    fn email_job(campaign_lead_id: CampaignLeadId) -> OutreachJob {
        OutreachJob {
            campaign_lead_id,
            channel: Channel::Email,
            subject: Some("Hello {{firstName}}".to_owned()),
            template_body: "Hi {{firstName}} from {{organization}}".to_owned(),
            template_variables: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn one_failing_job_does_not_stop_the_batch() {
        let db = MemoryDatabase::new();
        let (_, _, first) = testing::enrol(&db, "first@example.com", None, LeadSource::Dormant).await;
        let (_, _, second) = testing::enrol(&db, "second@example.com", None, LeadSource::Dormant).await;
        let (_, _, third) = testing::enrol(&db, "third@example.com", None, LeadSource::Dormant).await;
        let email = Arc::new(RecordingEmailProvider::failing_for(&["second@example.com"]));
        let sms = Arc::new(RecordingSmsProvider::default());
        let providers = testing::providers(&email, &sms);

        let jobs = vec![email_job(first.id), email_job(second.id), email_job(third.id)];
        let results =
            process_outreach_queue(&db, &providers, &testing::settings(), jobs).await;

        let outcomes: Vec<_> = results.iter().map(|r| (r.job_id, r.success)).collect();
        assert_eq!(
            outcomes,
            vec![(first.id, true), (second.id, false), (third.id, true)]
        );
        assert_eq!(results[1].provider.as_deref(), Some("email"));

        let logs = db.outreach_logs.all();
        assert_eq!(logs.len(), 3);
        let failed: Vec<_> = logs
            .iter()
            .filter(|log| log.status == OutreachLogStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].campaign_lead_id, second.id);
        assert!(failed[0].error_message.is_some());

        let first = db.campaign_leads.all().into_iter().find(|cl| cl.id == first.id).unwrap();
        assert_eq!(first.status, CampaignLeadStatus::Contacted);
    }

    #[tokio::test]
    async fn email_is_rendered_with_lead_fields_and_tagged() {
        let db = MemoryDatabase::new();
        let (campaign, lead, campaign_lead) =
            testing::enrol(&db, "ana@example.com", None, LeadSource::PastClient).await;
        let email = Arc::new(RecordingEmailProvider::default());
        let sms = Arc::new(RecordingSmsProvider::default());
        let providers = testing::providers(&email, &sms);

        process_outreach_queue(&db, &providers, &testing::settings(), vec![email_job(campaign_lead.id)])
            .await;

        let sent = email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Hello Ana");
        assert_eq!(sent[0].html, "Hi Ana from {{organization}}");
        assert!(sent[0]
            .tags
            .contains(&EmailTag::new("campaignId", campaign.id.to_string())));
        assert!(sent[0].tags.contains(&EmailTag::new("leadId", lead.id.to_string())));

        let log = &db.outreach_logs.all()[0];
        assert_eq!(log.status, OutreachLogStatus::Sent);
        assert!(log.sent_at.is_some());
        assert!(log.provider_message_id.is_some());
    }

    #[tokio::test]
    async fn sms_without_a_phone_never_reaches_the_provider() {
        let db = MemoryDatabase::new();
        let (_, _, campaign_lead) =
            testing::enrol(&db, "ana@example.com", None, LeadSource::Dormant).await;
        let email = Arc::new(RecordingEmailProvider::default());
        let sms = Arc::new(RecordingSmsProvider::default());
        let providers = testing::providers(&email, &sms);

        let mut job = email_job(campaign_lead.id);
        job.channel = Channel::Sms;
        let results = process_outreach_queue(&db, &providers, &testing::settings(), vec![job]).await;

        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("Lead has no phone number"));
        assert!(sms.sent().is_empty());
        assert!(db.outreach_logs.all().is_empty());
    }

    #[tokio::test]
    async fn sms_always_carries_the_opt_out_footer() {
        let db = MemoryDatabase::new();
        let (_, _, campaign_lead) =
            testing::enrol(&db, "ana@example.com", Some("+1 555 010 0000"), LeadSource::Dormant)
                .await;
        let email = Arc::new(RecordingEmailProvider::default());
        let sms = Arc::new(RecordingSmsProvider::default());
        let providers = testing::providers(&email, &sms);

        let mut job = email_job(campaign_lead.id);
        job.channel = Channel::Sms;
        job.template_body = "Hi {{firstName}}".to_owned();
        process_outreach_queue(&db, &providers, &testing::settings(), vec![job]).await;

        let sent = sms.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "Hi Ana\n\nReply STOP to unsubscribe");
    }

    #[tokio::test]
    async fn a_send_does_not_regress_an_engaged_lead() {
        let db = MemoryDatabase::new();
        let (_, _, campaign_lead) =
            testing::enrol(&db, "ana@example.com", None, LeadSource::Dormant).await;
        db.campaign_leads
            .update_campaign_lead_status(campaign_lead.id, CampaignLeadStatus::Opened)
            .await
            .unwrap();
        let email = Arc::new(RecordingEmailProvider::default());
        let sms = Arc::new(RecordingSmsProvider::default());
        let providers = testing::providers(&email, &sms);

        let results = process_outreach_queue(
            &db,
            &providers,
            &testing::settings(),
            vec![email_job(campaign_lead.id)],
        )
        .await;

        assert!(results[0].success);
        let stored = &db.campaign_leads.all()[0];
        assert_eq!(stored.status, CampaignLeadStatus::Opened);
        assert!(stored.updated_at > campaign_lead.updated_at);
    }

    #[tokio::test]
    async fn jobs_for_the_same_lead_run_one_after_the_other() {
        let db = MemoryDatabase::new();
        let (_, _, campaign_lead) =
            testing::enrol(&db, "ana@example.com", None, LeadSource::Dormant).await;
        let (_, _, other) = testing::enrol(&db, "bo@example.com", None, LeadSource::Dormant).await;
        db.campaign_leads
            .update_campaign_lead_status(campaign_lead.id, CampaignLeadStatus::Opened)
            .await
            .unwrap();
        let email = Arc::new(RecordingEmailProvider::stalled(Duration::from_millis(20)));
        let sms = Arc::new(RecordingSmsProvider::default());
        let providers = testing::providers(&email, &sms);

        let mut second = email_job(campaign_lead.id);
        second.subject = Some("Second".to_owned());
        let jobs = vec![email_job(campaign_lead.id), email_job(other.id), second];
        let results = process_outreach_queue(&db, &providers, &testing::settings(), jobs).await;

        let outcomes: Vec<_> = results.iter().map(|r| (r.job_id, r.success)).collect();
        assert_eq!(
            outcomes,
            vec![(campaign_lead.id, true), (other.id, true), (campaign_lead.id, true)]
        );

        let subjects: Vec<_> = email
            .sent()
            .into_iter()
            .filter(|message| message.to == "ana@example.com")
            .map(|message| message.subject)
            .collect();
        assert_eq!(subjects, vec!["Hello Ana".to_owned(), "Second".to_owned()]);

        assert_eq!(db.outreach_logs.all().len(), 3);
        let stored = testing::stored(&db, campaign_lead.id);
        assert_eq!(stored.status, CampaignLeadStatus::Opened);
    }

    #[tokio::test]
    async fn suppressed_and_closed_leads_are_refused_without_a_log() {
        let db = MemoryDatabase::new();
        let (_, _, suppressed) =
            testing::enrol(&db, "Gone@Example.com", None, LeadSource::Dormant).await;
        let (_, _, booked) = testing::enrol(&db, "booked@example.com", None, LeadSource::Dormant).await;
        db.suppressions
            .upsert_suppression(
                &SuppressedContact::email("gone@example.com"),
                SuppressionReason::Bounce,
                "test",
                Utc::now(),
            )
            .await
            .unwrap();
        db.campaign_leads
            .update_campaign_lead_status(booked.id, CampaignLeadStatus::Booked)
            .await
            .unwrap();
        let email = Arc::new(RecordingEmailProvider::default());
        let sms = Arc::new(RecordingSmsProvider::default());
        let providers = testing::providers(&email, &sms);

        let results = process_outreach_queue(
            &db,
            &providers,
            &testing::settings(),
            vec![email_job(suppressed.id), email_job(booked.id), email_job(CampaignLeadId::new())],
        )
        .await;

        assert!(results.iter().all(|result| !result.success));
        assert_eq!(results[2].error.as_deref(), Some("Campaign lead not found"));
        assert!(email.sent().is_empty());
        assert!(db.outreach_logs.all().is_empty());
    }

    #[tokio::test]
    async fn a_slow_provider_times_out_as_a_failure() {
        let db = MemoryDatabase::new();
        let (_, _, campaign_lead) =
            testing::enrol(&db, "ana@example.com", None, LeadSource::Dormant).await;
        let email = Arc::new(RecordingEmailProvider::stalled(Duration::from_secs(5)));
        let sms = Arc::new(RecordingSmsProvider::default());
        let providers = testing::providers(&email, &sms);
        let settings = DispatchSettings {
            timeout: Duration::from_millis(20),
            ..testing::settings()
        };

        let results =
            process_outreach_queue(&db, &providers, &settings, vec![email_job(campaign_lead.id)])
                .await;

        assert!(!results[0].success);
        let log = &db.outreach_logs.all()[0];
        assert_eq!(log.status, OutreachLogStatus::Failed);
        assert!(log.failed_at.is_some());
        assert_eq!(db.campaign_leads.all()[0].status, CampaignLeadStatus::Pending);
    }
}

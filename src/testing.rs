//! Fixtures and provider doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use crate::campaign::db::CampaignStore;
use crate::campaign::{Campaign, CampaignId, CampaignStatus};
use crate::campaign_lead::db::CampaignLeadStore;
use crate::campaign_lead::{CampaignLead, CampaignLeadId, CampaignLeadStatus, LeadSource};
use crate::database::memory::{MemoryDatabase, MemoryStore};
use crate::database::Database;
use crate::error::Error;
use crate::lead::db::LeadStore;
use crate::lead::{Lead, LeadId};
use crate::outreach::db::OutreachLogStore;
use crate::outreach::{Channel, LogTransition, OutreachLog, OutreachLogId};
use crate::suppression::db::SuppressionStore;
use crate::template::db::TemplateStore;
use crate::outreach::dispatcher::DispatchSettings;
use crate::outreach::provider::{
    EmailMessage, EmailProvider, ProviderError, Providers, SendReceipt, SmsMessage, SmsProvider,
};
use crate::utils::normalize_phone;

pub fn campaign(status: CampaignStatus) -> Campaign {
    let now = Utc::now() - ChronoDuration::days(2);
    Campaign {
        id: CampaignId::new(),
        name: "Spring choir workshops".to_owned(),
        status,
        base_location: Some("Nashville, TN".to_owned()),
        approved_at: match status {
            CampaignStatus::Draft => None,
            _ => Some(now),
        },
        launched_at: None,
        created_at: now,
        modified_at: now,
    }
}

pub fn lead(email: &str, phone: Option<&str>) -> Lead {
    Lead {
        id: LeadId::new(),
        first_name: "Ana".to_owned(),
        last_name: "Lima".to_owned(),
        organization: None,
        email: email.to_owned(),
        phone: phone.map(str::to_owned),
    }
}

/// A pending campaign lead whose last touch was a day ago.
pub fn campaign_lead(campaign: &Campaign, lead: &Lead, source: LeadSource) -> CampaignLead {
    let yesterday = Utc::now() - ChronoDuration::days(1);
    CampaignLead {
        id: CampaignLeadId::new(),
        campaign_id: campaign.id,
        lead_id: lead.id,
        source,
        status: CampaignLeadStatus::Pending,
        follow_up_count: 0,
        follow_up_pause: None,
        scheduled_follow_up_date: None,
        created_at: yesterday,
        updated_at: yesterday,
    }
}

/// Stores a new approved campaign with one pending lead.
pub async fn enrol(
    db: &MemoryDatabase,
    email: &str,
    phone: Option<&str>,
    source: LeadSource,
) -> (Campaign, Lead, CampaignLead) {
    let campaign = campaign(CampaignStatus::Approved);
    let lead = lead(email, phone);
    let campaign_lead = campaign_lead(&campaign, &lead, source);

    db.campaigns.insert_campaign(&campaign).await.unwrap();
    db.leads.insert_lead(&lead).await.unwrap();
    db.campaign_leads
        .insert_campaign_lead(&campaign_lead)
        .await
        .unwrap();

    (campaign, lead, campaign_lead)
}

/// Enrols an existing lead in another campaign.
pub async fn enrol_again(db: &MemoryDatabase, lead: &Lead, source: LeadSource) -> CampaignLead {
    let campaign = campaign(CampaignStatus::Approved);
    let campaign_lead = campaign_lead(&campaign, lead, source);

    db.campaigns.insert_campaign(&campaign).await.unwrap();
    db.campaign_leads
        .insert_campaign_lead(&campaign_lead)
        .await
        .unwrap();

    campaign_lead
}

pub fn stored(db: &MemoryDatabase, campaign_lead_id: CampaignLeadId) -> CampaignLead {
    db.campaign_leads
        .all()
        .into_iter()
        .find(|cl| cl.id == campaign_lead_id)
        .unwrap()
}

pub fn settings() -> DispatchSettings {
    DispatchSettings {
        timeout: Duration::from_secs(2),
        ..DispatchSettings::default()
    }
}

pub fn providers(
    email: &Arc<RecordingEmailProvider>,
    sms: &Arc<RecordingSmsProvider>,
) -> Providers {
    Providers::new(email.clone(), sms.clone())
}

#[derive(Default)]
pub struct RecordingEmailProvider {
    sent: Mutex<Vec<EmailMessage>>,
    failing: Vec<String>,
    stall: Option<Duration>,
    counter: AtomicUsize,
}

impl RecordingEmailProvider {
    pub fn failing_for(recipients: &[&str]) -> RecordingEmailProvider {
        RecordingEmailProvider {
            failing: recipients.iter().map(|r| r.to_string()).collect(),
            ..RecordingEmailProvider::default()
        }
    }

    pub fn stalled(stall: Duration) -> RecordingEmailProvider {
        RecordingEmailProvider {
            stall: Some(stall),
            ..RecordingEmailProvider::default()
        }
    }

    /// Every message the provider accepted.
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for RecordingEmailProvider {
    async fn send_email(&self, message: &EmailMessage) -> Result<SendReceipt, ProviderError> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        if self.failing.contains(&message.to) {
            return Err(ProviderError::Rejected("Mailbox unavailable".to_owned()));
        }

        self.sent.lock().unwrap().push(message.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SendReceipt {
            id: Some(format!("email-{}", n)),
        })
    }
}

#[derive(Default)]
pub struct RecordingSmsProvider {
    sent: Mutex<Vec<SmsMessage>>,
    counter: AtomicUsize,
}

impl RecordingSmsProvider {
    pub fn sent(&self) -> Vec<SmsMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmsProvider for RecordingSmsProvider {
    async fn send_sms(&self, message: &SmsMessage) -> Result<SendReceipt, ProviderError> {
        if normalize_phone(&message.to).is_empty() {
            return Err(ProviderError::Rejected("Invalid 'To' number".to_owned()));
        }

        self.sent.lock().unwrap().push(message.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SendReceipt {
            id: Some(format!("SM{}", n)),
        })
    }
}

/// A database whose delivery log rejects every insert. Everything else is
/// the wrapped in-memory database.
pub struct UnwritableLogs(pub MemoryDatabase);

impl Database for UnwritableLogs {
    fn campaigns(&self) -> &dyn CampaignStore {
        &self.0.campaigns
    }

    fn campaign_leads(&self) -> &dyn CampaignLeadStore {
        &self.0.campaign_leads
    }

    fn leads(&self) -> &dyn LeadStore {
        &self.0.leads
    }

    fn outreach_logs(&self) -> &dyn OutreachLogStore {
        self
    }

    fn suppressions(&self) -> &dyn SuppressionStore {
        &self.0.suppressions
    }

    fn templates(&self) -> &dyn TemplateStore {
        &self.0.templates
    }
}

#[async_trait]
impl OutreachLogStore for UnwritableLogs {
    async fn insert_outreach_log(&self, _log: &OutreachLog) -> Result<(), Error> {
        Err(Error::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            "outreach log store unavailable",
        )))
    }

    async fn fetch_outreach_logs_by_campaign_lead(
        &self,
        campaign_lead_id: CampaignLeadId,
    ) -> Result<Vec<OutreachLog>, Error> {
        self.logs().fetch_outreach_logs_by_campaign_lead(campaign_lead_id).await
    }

    async fn fetch_outreach_log_by_provider_message_id(
        &self,
        channel: Channel,
        provider_message_id: &str,
    ) -> Result<Option<OutreachLog>, Error> {
        self.logs()
            .fetch_outreach_log_by_provider_message_id(channel, provider_message_id)
            .await
    }

    async fn fetch_latest_outreach_log(
        &self,
        campaign_id: CampaignId,
        lead_id: LeadId,
        channel: Channel,
    ) -> Result<Option<OutreachLog>, Error> {
        self.logs()
            .fetch_latest_outreach_log(campaign_id, lead_id, channel)
            .await
    }

    async fn fetch_latest_outreach_log_by_lead(
        &self,
        lead_id: LeadId,
        channel: Channel,
    ) -> Result<Option<OutreachLog>, Error> {
        self.logs()
            .fetch_latest_outreach_log_by_lead(lead_id, channel)
            .await
    }

    async fn update_outreach_log_status(
        &self,
        log_id: OutreachLogId,
        transition: LogTransition,
    ) -> Result<bool, Error> {
        self.logs().update_outreach_log_status(log_id, transition).await
    }
}

impl UnwritableLogs {
    fn logs(&self) -> &MemoryStore<OutreachLog> {
        &self.0.outreach_logs
    }
}

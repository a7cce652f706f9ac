//! An in-process implementation of every store, with the same conditional
//! write semantics as the MongoDB one. Used by the test suites and for
//! running the service without a database.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::campaign::db::CampaignStore;
use crate::campaign::{Campaign, CampaignId, CampaignStatus};
use crate::campaign_lead::db::CampaignLeadStore;
use crate::campaign_lead::{CampaignLead, CampaignLeadId, CampaignLeadStatus, FollowUpPause};
use crate::error::Error;
use crate::lead::db::LeadStore;
use crate::lead::{Lead, LeadId};
use crate::outreach::db::OutreachLogStore;
use crate::outreach::{Channel, LogTransition, OutreachLog, OutreachLogId};
use crate::suppression::db::SuppressionStore;
use crate::suppression::{SuppressedContact, Suppression, SuppressionId, SuppressionReason};
use crate::template::db::TemplateStore;
use crate::template::{MessageTemplate, MessageTemplateId};
use crate::utils::{normalize_email, normalize_phone};

use super::Database;

pub struct MemoryStore<T> {
    records: Mutex<Vec<T>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> MemoryStore<T> {
        MemoryStore {
            records: Mutex::new(vec![]),
        }
    }
}

impl<T: Clone> MemoryStore<T> {
    fn records(&self) -> MutexGuard<'_, Vec<T>> {
        // a panicking writer cannot leave a record half-written
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn all(&self) -> Vec<T> {
        self.records().clone()
    }

    fn find<P: Fn(&T) -> bool>(&self, predicate: P) -> Option<T> {
        self.records().iter().find(|r| predicate(*r)).cloned()
    }

    fn filter<P: Fn(&T) -> bool>(&self, predicate: P) -> Vec<T> {
        self.records()
            .iter()
            .filter(|r| predicate(*r))
            .cloned()
            .collect()
    }

    fn update<P: Fn(&T) -> bool, U: FnOnce(&mut T)>(&self, predicate: P, update: U) -> bool {
        match self.records().iter_mut().find(|r| predicate(&**r)) {
            Some(record) => {
                update(record);
                true
            }
            None => false,
        }
    }

    fn push(&self, record: T) {
        self.records().push(record);
    }
}

#[derive(Default)]
pub struct MemoryDatabase {
    pub campaigns: MemoryStore<Campaign>,
    pub campaign_leads: MemoryStore<CampaignLead>,
    pub leads: MemoryStore<Lead>,
    pub outreach_logs: MemoryStore<OutreachLog>,
    pub suppressions: MemoryStore<Suppression>,
    pub templates: MemoryStore<MessageTemplate>,
}

impl MemoryDatabase {
    pub fn new() -> MemoryDatabase {
        MemoryDatabase::default()
    }
}

impl Database for MemoryDatabase {
    fn campaigns(&self) -> &dyn CampaignStore {
        &self.campaigns
    }

    fn campaign_leads(&self) -> &dyn CampaignLeadStore {
        &self.campaign_leads
    }

    fn leads(&self) -> &dyn LeadStore {
        &self.leads
    }

    fn outreach_logs(&self) -> &dyn OutreachLogStore {
        &self.outreach_logs
    }

    fn suppressions(&self) -> &dyn SuppressionStore {
        &self.suppressions
    }

    fn templates(&self) -> &dyn TemplateStore {
        &self.templates
    }
}

#[async_trait]
impl CampaignStore for MemoryStore<Campaign> {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error> {
        self.push(campaign.clone());
        Ok(())
    }

    async fn fetch_campaign_by_id(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error> {
        Ok(self.find(|c| c.id == campaign_id))
    }

    async fn update_campaign_launched(
        &self,
        mut campaign: Campaign,
        launched_at: DateTime<Utc>,
    ) -> Result<Campaign, Error> {
        let modified_at = campaign.modified_at;
        let updated = self.update(
            |c| c.id == campaign.id && c.modified_at == modified_at,
            |c| {
                c.status = CampaignStatus::Active;
                c.launched_at = Some(launched_at);
                c.modified_at = launched_at;
            },
        );

        if !updated {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.status = CampaignStatus::Active;
        campaign.launched_at = Some(launched_at);
        campaign.modified_at = launched_at;

        Ok(campaign)
    }
}

#[async_trait]
impl CampaignLeadStore for MemoryStore<CampaignLead> {
    async fn insert_campaign_lead(&self, campaign_lead: &CampaignLead) -> Result<(), Error> {
        self.push(campaign_lead.clone());
        Ok(())
    }

    async fn fetch_campaign_lead_by_id(
        &self,
        campaign_lead_id: CampaignLeadId,
    ) -> Result<Option<CampaignLead>, Error> {
        Ok(self.find(|cl| cl.id == campaign_lead_id))
    }

    async fn fetch_pending_campaign_leads(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<CampaignLead>, Error> {
        let mut campaign_leads = self.filter(|cl| {
            cl.campaign_id == campaign_id && cl.status == CampaignLeadStatus::Pending
        });
        campaign_leads.sort_by_key(|cl| cl.created_at);
        Ok(campaign_leads)
    }

    async fn fetch_due_campaign_leads(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CampaignLead>, Error> {
        let mut campaign_leads = self.filter(|cl| {
            cl.scheduled_follow_up_date.map_or(false, |date| date <= now)
                && !cl.follow_ups_paused()
                && CampaignLeadStatus::FOLLOW_UP_ELIGIBLE.contains(&cl.status)
        });
        campaign_leads.sort_by_key(|cl| cl.scheduled_follow_up_date);
        Ok(campaign_leads)
    }

    async fn fetch_campaign_leads_by_lead(
        &self,
        lead_id: LeadId,
    ) -> Result<Vec<CampaignLead>, Error> {
        Ok(self.filter(|cl| cl.lead_id == lead_id))
    }

    async fn update_campaign_lead_status(
        &self,
        campaign_lead_id: CampaignLeadId,
        status: CampaignLeadStatus,
    ) -> Result<bool, Error> {
        Ok(self.update(
            |cl| cl.id == campaign_lead_id && cl.status.can_advance_to(status),
            |cl| {
                cl.status = status;
                if status.is_terminal() {
                    cl.scheduled_follow_up_date = None;
                }
            },
        ))
    }

    async fn update_campaign_lead_contacted(
        &self,
        campaign_lead_id: CampaignLeadId,
        contacted_at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        Ok(self.update(
            |cl| cl.id == campaign_lead_id && !cl.status.is_terminal(),
            |cl| {
                cl.updated_at = contacted_at;
                if cl.status == CampaignLeadStatus::Pending {
                    cl.status = CampaignLeadStatus::Contacted;
                }
            },
        ))
    }

    async fn update_campaign_lead_schedule(
        &self,
        campaign_lead_id: CampaignLeadId,
        follow_up_count: u32,
        scheduled_follow_up_date: Option<DateTime<Utc>>,
    ) -> Result<bool, Error> {
        Ok(self.update(
            |cl| cl.id == campaign_lead_id && !cl.follow_ups_paused() && !cl.status.is_terminal(),
            |cl| {
                cl.follow_up_count = follow_up_count;
                cl.scheduled_follow_up_date = scheduled_follow_up_date;
            },
        ))
    }

    async fn update_campaign_lead_paused(
        &self,
        campaign_lead_id: CampaignLeadId,
        pause: FollowUpPause,
    ) -> Result<bool, Error> {
        Ok(self.update(
            |cl| cl.id == campaign_lead_id,
            |cl| {
                cl.follow_up_pause = Some(pause);
                cl.scheduled_follow_up_date = None;
            },
        ))
    }

    async fn update_campaign_lead_resumed(
        &self,
        campaign_lead_id: CampaignLeadId,
        resumed_at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        Ok(self.update(
            |cl| cl.id == campaign_lead_id && !cl.status.is_terminal(),
            |cl| {
                cl.follow_up_pause = None;
                cl.updated_at = resumed_at;
            },
        ))
    }

    async fn remove_campaign_leads_by_lead(
        &self,
        lead_id: LeadId,
        pause: FollowUpPause,
    ) -> Result<u64, Error> {
        // one guard for the whole batch
        let mut records = self.records();
        let mut removed = 0;
        for campaign_lead in records.iter_mut().filter(|cl| cl.lead_id == lead_id) {
            campaign_lead.status = CampaignLeadStatus::Removed;
            campaign_lead.follow_up_pause = Some(pause.clone());
            campaign_lead.scheduled_follow_up_date = None;
            removed += 1;
        }
        Ok(removed)
    }
}

#[async_trait]
impl LeadStore for MemoryStore<Lead> {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), Error> {
        self.push(lead.clone());
        Ok(())
    }

    async fn fetch_lead_by_id(&self, lead_id: LeadId) -> Result<Option<Lead>, Error> {
        Ok(self.find(|l| l.id == lead_id))
    }

    async fn fetch_lead_by_phone(&self, phone_digits: &str) -> Result<Option<Lead>, Error> {
        let digits = normalize_phone(phone_digits);
        if digits.is_empty() {
            return Ok(None);
        }

        Ok(self.find(|l| l.phone_digits().as_deref() == Some(digits.as_str())))
    }
}

#[async_trait]
impl OutreachLogStore for MemoryStore<OutreachLog> {
    async fn insert_outreach_log(&self, log: &OutreachLog) -> Result<(), Error> {
        self.push(log.clone());
        Ok(())
    }

    async fn fetch_outreach_logs_by_campaign_lead(
        &self,
        campaign_lead_id: CampaignLeadId,
    ) -> Result<Vec<OutreachLog>, Error> {
        let mut logs = self.filter(|log| log.campaign_lead_id == campaign_lead_id);
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs)
    }

    async fn fetch_outreach_log_by_provider_message_id(
        &self,
        channel: Channel,
        provider_message_id: &str,
    ) -> Result<Option<OutreachLog>, Error> {
        Ok(self.find(|log| {
            log.channel == channel
                && log.provider_message_id.as_deref() == Some(provider_message_id)
        }))
    }

    async fn fetch_latest_outreach_log(
        &self,
        campaign_id: CampaignId,
        lead_id: LeadId,
        channel: Channel,
    ) -> Result<Option<OutreachLog>, Error> {
        Ok(self
            .filter(|log| {
                log.campaign_id == campaign_id && log.lead_id == lead_id && log.channel == channel
            })
            .into_iter()
            .max_by_key(|log| log.created_at))
    }

    async fn fetch_latest_outreach_log_by_lead(
        &self,
        lead_id: LeadId,
        channel: Channel,
    ) -> Result<Option<OutreachLog>, Error> {
        Ok(self
            .filter(|log| log.lead_id == lead_id && log.channel == channel)
            .into_iter()
            .max_by_key(|log| log.created_at))
    }

    async fn update_outreach_log_status(
        &self,
        log_id: OutreachLogId,
        transition: LogTransition,
    ) -> Result<bool, Error> {
        Ok(self.update(
            |log| log.id == log_id && log.status.can_transition_to(transition.status),
            |log| transition.apply(log),
        ))
    }
}

fn suppression_matches(suppression: &Suppression, contact: &SuppressedContact) -> bool {
    match contact {
        SuppressedContact::Email(email) => suppression
            .email
            .as_deref()
            .map_or(false, |stored| normalize_email(stored) == *email),
        SuppressedContact::Phone(phone) => suppression
            .phone
            .as_deref()
            .map_or(false, |stored| normalize_phone(stored) == *phone),
    }
}

#[async_trait]
impl SuppressionStore for MemoryStore<Suppression> {
    async fn upsert_suppression(
        &self,
        contact: &SuppressedContact,
        reason: SuppressionReason,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut records = self.records();
        match records.iter_mut().find(|s| suppression_matches(s, contact)) {
            Some(existing) => {
                existing.reason = reason;
                existing.modified_at = now;
            }
            None => {
                let (email, phone) = match contact {
                    SuppressedContact::Email(email) => (Some(email.clone()), None),
                    SuppressedContact::Phone(phone) => (None, Some(phone.clone())),
                };
                records.push(Suppression {
                    id: SuppressionId::new(),
                    email,
                    phone,
                    reason,
                    source: source.to_owned(),
                    created_at: now,
                    modified_at: now,
                });
            }
        }
        Ok(())
    }

    async fn fetch_suppression(
        &self,
        contact: &SuppressedContact,
    ) -> Result<Option<Suppression>, Error> {
        Ok(self.find(|s| suppression_matches(s, contact)))
    }
}

#[async_trait]
impl TemplateStore for MemoryStore<MessageTemplate> {
    async fn insert_template(&self, template: &MessageTemplate) -> Result<(), Error> {
        self.push(template.clone());
        Ok(())
    }

    async fn fetch_template_by_id(
        &self,
        template_id: MessageTemplateId,
    ) -> Result<Option<MessageTemplate>, Error> {
        Ok(self.find(|t| t.id == template_id))
    }

    async fn fetch_template_by_name(
        &self,
        name: &str,
        channel: Channel,
    ) -> Result<Option<MessageTemplate>, Error> {
        Ok(self
            .filter(|t| t.name == name && t.channel == channel)
            .into_iter()
            .max_by_key(|t| t.created_at))
    }

    async fn fetch_latest_generic_template(
        &self,
        channel: Channel,
    ) -> Result<Option<MessageTemplate>, Error> {
        Ok(self
            .filter(|t| t.channel == channel && t.service_type.is_none())
            .into_iter()
            .max_by_key(|t| t.created_at))
    }
}

use mongodb::{bson, Client, Collection, Database as MongoDb};

use crate::campaign::db::CampaignStore;
use crate::campaign::Campaign;
use crate::campaign_lead::db::CampaignLeadStore;
use crate::campaign_lead::CampaignLead;
use crate::error::Error;
use crate::lead::db::LeadStore;
use crate::lead::Lead;
use crate::outreach::db::OutreachLogStore;
use crate::outreach::OutreachLog;
use crate::suppression::db::SuppressionStore;
use crate::suppression::Suppression;
use crate::template::db::TemplateStore;
use crate::template::MessageTemplate;

pub mod memory;

pub type MongoCampaignStore = Collection<Campaign>;
pub type MongoLeadStore = Collection<Lead>;
pub type MongoOutreachLogStore = Collection<OutreachLog>;
pub type MongoSuppressionStore = Collection<Suppression>;
pub type MongoTemplateStore = Collection<MessageTemplate>;

/// Campaign leads need the client as well as the collection: removing a
/// lead from every campaign runs in a transaction.
#[derive(Debug, Clone)]
pub struct MongoCampaignLeadStore {
    pub(crate) collection: Collection<CampaignLead>,
    pub(crate) client: Client,
}

/// The persistent store the outreach core reads and writes. Each accessor
/// hands out one record family.
pub trait Database: Send + Sync {
    fn campaigns(&self) -> &dyn CampaignStore;
    fn campaign_leads(&self) -> &dyn CampaignLeadStore;
    fn leads(&self) -> &dyn LeadStore;
    fn outreach_logs(&self) -> &dyn OutreachLogStore;
    fn suppressions(&self) -> &dyn SuppressionStore;
    fn templates(&self) -> &dyn TemplateStore;
}

#[derive(Debug, Clone)]
pub struct MongoDatabase {
    campaigns: MongoCampaignStore,
    campaign_leads: MongoCampaignLeadStore,
    leads: MongoLeadStore,
    outreach_logs: MongoOutreachLogStore,
    suppressions: MongoSuppressionStore,
    templates: MongoTemplateStore,
}

impl MongoDatabase {
    pub async fn initialize(client: Client, name: &str) -> Result<MongoDatabase, Error> {
        let db = client.database(name);

        // ping the database to ensure connection is established
        db.run_command(bson::doc! { "ping": 1 }, None).await?;

        db.run_command(
            bson::doc! {
                "createIndexes": "campaign_leads",
                "indexes": [
                    { "key": { "campaign_id": 1, "status": 1 }, "name": "by_campaign_status" },
                    { "key": { "lead_id": 1 }, "name": "by_lead_id" },
                    { "key": { "scheduled_follow_up_date": 1 }, "name": "by_scheduled_follow_up" },
                ]
            },
            None,
        )
        .await?;

        db.run_command(
            bson::doc! {
                "createIndexes": "outreach_logs",
                "indexes": [
                    { "key": { "campaign_id": 1, "lead_id": 1, "channel": 1, "created_at": -1 }, "name": "by_campaign_lead_channel" },
                    { "key": { "lead_id": 1, "channel": 1, "created_at": -1 }, "name": "by_lead_channel" },
                    { "key": { "provider_message_id": 1 }, "name": "by_provider_message_id" },
                ]
            },
            None,
        )
        .await?;

        db.run_command(
            bson::doc! {
                "createIndexes": "suppressions",
                "indexes": [
                    {
                        "key": { "email": 1 },
                        "name": "unique_email",
                        "unique": true,
                        "partialFilterExpression": { "email": { "$type": "string" } },
                    },
                    {
                        "key": { "phone": 1 },
                        "name": "unique_phone",
                        "unique": true,
                        "partialFilterExpression": { "phone": { "$type": "string" } },
                    },
                ]
            },
            None,
        )
        .await?;

        db.run_command(
            bson::doc! {
                "createIndexes": "leads",
                "indexes": [
                    { "key": { "phone_digits": 1 }, "name": "by_phone_digits" },
                ]
            },
            None,
        )
        .await?;

        Ok(MongoDatabase::new(client, db))
    }

    pub fn new(client: Client, db: MongoDb) -> MongoDatabase {
        MongoDatabase {
            campaigns: db.collection("campaigns"),
            campaign_leads: MongoCampaignLeadStore {
                collection: db.collection("campaign_leads"),
                client,
            },
            leads: db.collection("leads"),
            outreach_logs: db.collection("outreach_logs"),
            suppressions: db.collection("suppressions"),
            templates: db.collection("message_templates"),
        }
    }
}

impl Database for MongoDatabase {
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

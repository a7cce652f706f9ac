use async_trait::async_trait;
use mongodb::bson::{self, Bson};
use mongodb::options::FindOneOptions;

use crate::database::MongoTemplateStore;
use crate::error::Error;
use crate::outreach::Channel;

use super::{MessageTemplate, MessageTemplateId};

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert_template(&self, template: &MessageTemplate) -> Result<(), Error>;

    async fn fetch_template_by_id(
        &self,
        template_id: MessageTemplateId,
    ) -> Result<Option<MessageTemplate>, Error>;

    async fn fetch_template_by_name(
        &self,
        name: &str,
        channel: Channel,
    ) -> Result<Option<MessageTemplate>, Error>;

    /// Newest template for the channel that is not tied to a service type.
    async fn fetch_latest_generic_template(
        &self,
        channel: Channel,
    ) -> Result<Option<MessageTemplate>, Error>;
}

#[async_trait]
impl TemplateStore for MongoTemplateStore {
    #[tracing::instrument(skip(self))]
    async fn insert_template(&self, template: &MessageTemplate) -> Result<(), Error> {
        self.insert_one(template, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_template_by_id(
        &self,
        template_id: MessageTemplateId,
    ) -> Result<Option<MessageTemplate>, Error> {
        let template = self
            .find_one(bson::doc! { "_id": template_id }, None)
            .await?;

        Ok(template)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_template_by_name(
        &self,
        name: &str,
        channel: Channel,
    ) -> Result<Option<MessageTemplate>, Error> {
        let options = FindOneOptions::builder()
            .sort(bson::doc! { "created_at": -1 })
            .build();

        let template = self
            .find_one(
                bson::doc! { "name": name, "channel": channel.as_str() },
                options,
            )
            .await?;

        Ok(template)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_latest_generic_template(
        &self,
        channel: Channel,
    ) -> Result<Option<MessageTemplate>, Error> {
        let options = FindOneOptions::builder()
            .sort(bson::doc! { "created_at": -1 })
            .build();

        let template = self
            .find_one(
                bson::doc! { "channel": channel.as_str(), "service_type": Bson::Null },
                options,
            )
            .await?;

        Ok(template)
    }
}

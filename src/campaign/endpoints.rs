use actix_web::post;
use actix_web::web::{Data, Json, Path};
use serde::Deserialize;

use super::manager::{self, LaunchSummary};
use super::CampaignId;
use crate::database::Database;
use crate::error::Error;
use crate::outreach::Channel;
use crate::services::Services;
use crate::template::MessageTemplateId;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LaunchCampaignBody {
    pub channel: Option<String>,
    pub template_id: Option<MessageTemplateId>,
}

impl LaunchCampaignBody {
    fn channel(&self) -> Result<Channel, Error> {
        match &self.channel {
            None => Ok(Channel::Email),
            Some(channel) => channel
                .parse()
                .map_err(|channel| Error::InvalidChannel { channel }),
        }
    }
}

#[post("/campaigns/{campaign_id}/launch")]
#[tracing::instrument(skip(db, services, body))]
pub async fn launch_campaign(
    db: Data<dyn Database>,
    services: Data<Services>,
    params: Path<CampaignId>,
    body: Option<Json<LaunchCampaignBody>>,
) -> Result<Json<LaunchSummary>, Error> {
    let campaign_id = params.into_inner();
    let body = body.map(Json::into_inner).unwrap_or_default();
    let channel = body.channel()?;

    let summary = manager::launch_campaign(
        db.get_ref(),
        services.get_ref(),
        campaign_id,
        channel,
        body.template_id,
    )
    .await?;

    Ok(Json(summary))
}

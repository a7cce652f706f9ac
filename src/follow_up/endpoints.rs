use actix_web::http::header;
use actix_web::web::{Data, Json, Path};
use actix_web::{get, post, HttpRequest};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::manager;
use super::sweep::{process_due_follow_ups, SweepSummary};
use super::ScheduleResult;
use crate::cadence::CadenceRule;
use crate::campaign_lead::{CampaignLeadId, PauseReason};
use crate::database::Database;
use crate::error::Error;
use crate::services::Services;

/// Shared secret expected as a bearer token by the sweep. With no secret
/// configured the sweep cannot be triggered over HTTP.
#[derive(Clone, Debug, Default)]
pub struct CronSecret(pub Option<String>);

impl CronSecret {
    fn authorize(&self, req: &HttpRequest) -> Result<(), Error> {
        let expected = match &self.0 {
            Some(secret) => secret,
            None => return Err(Error::Unauthorized),
        };

        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        match token {
            Some(token) if token == expected => Ok(()),
            _ => Err(Error::Unauthorized),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PauseBody {
    pub reason: PauseReason,
    pub note: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PausedBody {
    pub campaign_lead_id: CampaignLeadId,
    pub paused: bool,
    pub reason: PauseReason,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScheduleBody {
    pub current_follow_up_count: u32,
}

#[post("/follow-ups/sweep")]
#[tracing::instrument(skip(db, services, secret, req))]
pub async fn sweep_due_follow_ups(
    db: Data<dyn Database>,
    services: Data<Services>,
    secret: Data<CronSecret>,
    req: HttpRequest,
) -> Result<Json<SweepSummary>, Error> {
    secret.authorize(&req)?;

    let summary = process_due_follow_ups(db.get_ref(), services.get_ref(), Utc::now()).await?;

    Ok(Json(summary))
}

#[post("/campaign-leads/{campaign_lead_id}/follow-ups/pause")]
#[tracing::instrument(skip(db))]
pub async fn pause_follow_ups(
    db: Data<dyn Database>,
    params: Path<CampaignLeadId>,
    body: Json<PauseBody>,
) -> Result<Json<PausedBody>, Error> {
    let campaign_lead_id = params.into_inner();
    let body = body.into_inner();

    manager::manual_pause_follow_up(db.get_ref(), campaign_lead_id, body.reason, body.note)
        .await?;

    Ok(Json(PausedBody {
        campaign_lead_id,
        paused: true,
        reason: body.reason,
    }))
}

#[post("/campaign-leads/{campaign_lead_id}/follow-ups/resume")]
#[tracing::instrument(skip(db, services))]
pub async fn resume_follow_ups(
    db: Data<dyn Database>,
    services: Data<Services>,
    params: Path<CampaignLeadId>,
) -> Result<Json<ScheduleResult>, Error> {
    let campaign_lead_id = params.into_inner();

    let result =
        manager::resume_follow_up(db.get_ref(), services.cadence.as_ref(), campaign_lead_id)
            .await?;

    Ok(Json(result))
}

#[post("/campaign-leads/{campaign_lead_id}/follow-ups/schedule")]
#[tracing::instrument(skip(db, services))]
pub async fn schedule_follow_up(
    db: Data<dyn Database>,
    services: Data<Services>,
    params: Path<CampaignLeadId>,
    body: Json<ScheduleBody>,
) -> Result<Json<ScheduleResult>, Error> {
    let campaign_lead_id = params.into_inner();

    let result = manager::schedule_follow_up(
        db.get_ref(),
        services.cadence.as_ref(),
        campaign_lead_id,
        body.current_follow_up_count,
    )
    .await?;

    Ok(Json(result))
}

#[get("/cadence-rules")]
#[tracing::instrument(skip(services))]
pub async fn get_cadence_rules(services: Data<Services>) -> Json<Vec<CadenceRule>> {
    Json(services.cadence.all_rules())
}

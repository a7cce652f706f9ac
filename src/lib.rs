use std::str::FromStr;
use std::sync::Arc;

use actix_web::web::{self, Data, FormConfig, JsonConfig, PathConfig, QueryConfig};
use actix_web::{App, HttpServer, ResponseError};
use mongodb::Client;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::fmt::format::FmtSpan;

pub mod cadence;
pub mod campaign;
pub mod campaign_lead;
pub mod config;
pub mod database;
pub mod error;
pub mod follow_up;
pub mod lead;
pub mod outreach;
pub mod services;
pub mod suppression;
pub mod template;
pub mod typedid;
pub mod utils;
pub mod webhook;

#[cfg(test)]
mod testing;

use crate::config::Config;
use crate::database::{Database, MongoDatabase};
use crate::error::Error;
use crate::follow_up::endpoints::CronSecret;
use crate::outreach::provider::{Providers, ResendProvider, TwilioProvider};
use crate::services::Services;

/// Registers the extractor error formats and every endpoint. Shared
/// state (`Data<dyn Database>`, `Data<Services>`, `Data<CronSecret>`) is
/// expected on the app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(JsonConfig::default().error_handler(|err, _req| {
        // format json errors with custom format
        Error::InvalidJson(err).into()
    }))
    .app_data(PathConfig::default().error_handler(|err, _req| {
        // format path errors with custom format
        Error::InvalidPath(err).into()
    }))
    .app_data(FormConfig::default().error_handler(|err, _req| {
        // format form errors with custom format
        Error::InvalidForm(err).into()
    }))
    .app_data(QueryConfig::default().error_handler(|err, _req| {
        // format query errors with custom format
        Error::InvalidQuery(err).into()
    }))
    .service(campaign::endpoints::launch_campaign)
    .service(follow_up::endpoints::sweep_due_follow_ups)
    .service(follow_up::endpoints::pause_follow_ups)
    .service(follow_up::endpoints::resume_follow_ups)
    .service(follow_up::endpoints::schedule_follow_up)
    .service(follow_up::endpoints::get_cadence_rules)
    .service(webhook::endpoints::receive_email_event)
    .service(webhook::endpoints::receive_sms_event);
}

pub async fn run() -> Result<(), Error> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_max_level(Level::from_str(&config.log_level).unwrap_or(Level::INFO))
        .with_span_events(FmtSpan::NEW)
        .compact()
        .init();

    info!("connecting to db: {}", config.mongodb_uri);
    let client = Client::with_uri_str(&config.mongodb_uri).await?;
    let db = MongoDatabase::initialize(client, &config.mongodb_database).await?;
    let db: Data<dyn Database> = Data::from(Arc::new(db) as Arc<dyn Database>);

    let providers = Providers::new(
        Arc::new(ResendProvider::new(config.resend.clone())),
        Arc::new(TwilioProvider::new(config.twilio.clone())),
    );
    let services = Data::new(Services::new(providers, config.dispatch.clone()));
    let cron_secret = Data::new(CronSecret(config.cron_secret.clone()));

    info!("listening on {}", config.bind_address);
    HttpServer::new(move || {
        App::new()
            .app_data(db.clone())
            .app_data(services.clone())
            .app_data(cron_secret.clone())
            .wrap(TracingLogger::default())
            .configure(configure)
            .default_service(web::to(|| async { Error::PathDoesNotExist.error_response() }))
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    Ok(())
}

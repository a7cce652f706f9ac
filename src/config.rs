//! Service configuration, read from the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::outreach::dispatcher::DispatchSettings;

pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";
pub const DEFAULT_MONGODB_DATABASE: &str = "outreach";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com";
pub const DEFAULT_TWILIO_API_URL: &str = "https://api.twilio.com";

#[derive(Clone, Debug, PartialEq)]
pub struct ResendConfig {
    pub api_key: Option<String>,
    pub from_email: Option<String>,
    pub api_url: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TwilioConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub phone_number: Option<String>,
    pub api_url: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub bind_address: String,
    pub log_level: String,
    pub resend: ResendConfig,
    pub twilio: TwilioConfig,
    /// Bearer token for the sweep endpoint. With none set the endpoint
    /// refuses every call.
    pub cron_secret: Option<String>,
    pub dispatch: DispatchSettings,
}

impl Config {
    /// Reads configuration from the process environment, after loading a
    /// `.env` file if one is present.
    ///
    /// Provider credentials are optional here: a provider without them
    /// fails its sends instead of stopping start-up.
    pub fn from_env() -> Config {
        let _ = dotenvy::dotenv();
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Config
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());
        let secret = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let defaults = DispatchSettings::default();
        let dispatch = DispatchSettings {
            concurrency: parsed(&lookup, "DISPATCH_CONCURRENCY", defaults.concurrency).max(1),
            timeout: Duration::from_secs(parsed(
                &lookup,
                "PROVIDER_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )),
            default_subject: text("DEFAULT_EMAIL_SUBJECT", &defaults.default_subject),
            sms_opt_out_footer: text("SMS_OPT_OUT_FOOTER", &defaults.sms_opt_out_footer),
        };

        Config {
            mongodb_uri: text("MONGODB_URI", DEFAULT_MONGODB_URI),
            mongodb_database: text("MONGODB_DATABASE", DEFAULT_MONGODB_DATABASE),
            bind_address: text("BIND_ADDRESS", DEFAULT_BIND_ADDRESS),
            log_level: text("LOG_LEVEL", DEFAULT_LOG_LEVEL),
            resend: ResendConfig {
                api_key: secret("RESEND_API_KEY"),
                from_email: secret("RESEND_FROM_EMAIL"),
                api_url: text("RESEND_API_URL", DEFAULT_RESEND_API_URL),
            },
            twilio: TwilioConfig {
                account_sid: secret("TWILIO_ACCOUNT_SID"),
                auth_token: secret("TWILIO_AUTH_TOKEN"),
                phone_number: secret("TWILIO_PHONE_NUMBER"),
                api_url: text("TWILIO_API_URL", DEFAULT_TWILIO_API_URL),
            },
            cron_secret: secret("CRON_SECRET"),
            dispatch,
        }
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_lookup(|_| None);

        assert_eq!(config.mongodb_uri, DEFAULT_MONGODB_URI);
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.resend.api_key, None);
        assert_eq!(config.cron_secret, None);
        assert_eq!(config.dispatch, DispatchSettings::default());
    }

    #[test]
    fn values_are_read_and_bad_numbers_fall_back() {
        let vars: HashMap<&str, &str> = vec![
            ("MONGODB_DATABASE", "outreach_test"),
            ("CRON_SECRET", "s3cret"),
            ("DISPATCH_CONCURRENCY", "8"),
            ("PROVIDER_TIMEOUT_SECS", "soon"),
            ("TWILIO_ACCOUNT_SID", "   "),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.mongodb_database, "outreach_test");
        assert_eq!(config.cron_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.dispatch.concurrency, 8);
        assert_eq!(config.dispatch.timeout, Duration::from_secs(15));
        assert_eq!(config.twilio.account_sid, None);
    }
}

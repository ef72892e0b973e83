//! Environment-driven configuration

use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use chrono::Duration;

use crate::telegram::PollSettings;

/// How updates reach the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    Poll,
    Webhook,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bot_token: String,
    pub internal_key: String,
    /// HMAC key for link-token hashing
    pub hash_secret: String,
    pub webhook_secret: Option<String>,
    pub ingest_mode: IngestMode,
    /// Absent means the in-memory store
    pub database_path: Option<String>,
    pub link_token_ttl: Duration,
    pub otp_ttl: Duration,
    pub otp_min_interval: Duration,
    pub otp_message_prefix: String,
    pub rate_limit: u32,
    pub rate_window: StdDuration,
    pub poll: PollSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bot_token: String::new(),
            internal_key: String::new(),
            hash_secret: String::new(),
            webhook_secret: None,
            ingest_mode: IngestMode::Poll,
            database_path: None,
            link_token_ttl: Duration::minutes(15),
            otp_ttl: Duration::minutes(5),
            otp_min_interval: Duration::seconds(30),
            otp_message_prefix: "Login code: ".to_string(),
            rate_limit: 5,
            rate_window: StdDuration::from_secs(60),
            poll: PollSettings::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let bot_token = std::env::var("BOT_TOKEN").context("BOT_TOKEN is required")?;
        let internal_key = std::env::var("INTERNAL_KEY").context("INTERNAL_KEY is required")?;
        let hash_secret = std::env::var("HASH_SECRET").context("HASH_SECRET is required")?;

        let ingest_mode = match env_var("INGEST_MODE").as_deref() {
            None | Some("poll") => IngestMode::Poll,
            Some("webhook") => IngestMode::Webhook,
            Some(other) => bail!("unknown INGEST_MODE {:?} (expected poll or webhook)", other),
        };

        let poll = PollSettings {
            timeout: StdDuration::from_secs(
                env_parse("POLL_TIMEOUT_SECS")?.unwrap_or(defaults.poll.timeout.as_secs()),
            ),
            retry_interval: StdDuration::from_secs(
                env_parse("POLL_RETRY_SECS")?.unwrap_or(defaults.poll.retry_interval.as_secs()),
            ),
            limit: env_parse("POLL_LIMIT")?.unwrap_or(defaults.poll.limit),
            drop_pending: env_flag("POLL_DROP_PENDING"),
            drop_webhook: env_flag("POLL_DROP_WEBHOOK"),
        };

        Ok(Self {
            port: env_parse("PORT")?.unwrap_or(defaults.port),
            bot_token,
            internal_key,
            hash_secret,
            webhook_secret: env_var("WEBHOOK_SECRET"),
            ingest_mode,
            database_path: env_var("DATABASE_PATH"),
            link_token_ttl: env_duration("LINK_TOKEN_TTL_SECS")?
                .unwrap_or(defaults.link_token_ttl),
            otp_ttl: env_duration("OTP_TTL_SECS")?.unwrap_or(defaults.otp_ttl),
            otp_min_interval: env_duration("OTP_MIN_INTERVAL_SECS")?
                .unwrap_or(defaults.otp_min_interval),
            otp_message_prefix: env_var("OTP_MESSAGE_PREFIX")
                .unwrap_or(defaults.otp_message_prefix),
            rate_limit: env_parse("RATE_LIMIT")?.unwrap_or(defaults.rate_limit),
            rate_window: StdDuration::from_secs(
                env_parse("RATE_WINDOW_SECS")?.unwrap_or(defaults.rate_window.as_secs()),
            ),
            poll,
        })
    }
}

/// Non-empty environment variable, if set
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_var(name)
        .map(|v| v.parse().with_context(|| format!("invalid {}", name)))
        .transpose()
}

fn env_duration(name: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<i64>(name)?.map(Duration::seconds))
}

fn env_flag(name: &str) -> bool {
    matches!(
        env_var(name).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

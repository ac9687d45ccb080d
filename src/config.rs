use crate::ingest::MAX_BACKFILL_LIMIT;
use crate::query::DEFAULT_PARTS;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub status_message: String,
    /// Root directory of the per-channel message logs and the mapping files.
    pub log_root: String,
    /// Where a previous log root is moved on startup.
    pub archive_root: String,
    pub http_port: u16,
    pub backfill_limit: u8,
    pub default_parts: usize,
    pub max_parts: usize,
    // Query API rate limiting, per client address
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let rate_limit_window = match env::var("RATE_LIMIT_WINDOW") {
            Ok(raw) => humantime::parse_duration(&raw)
                .map_err(|e| anyhow::anyhow!("RATE_LIMIT_WINDOW is not a valid duration: {}", e))?,
            Err(_) => Duration::from_secs(15 * 60),
        };

        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Watching the channels".to_string()),
            log_root: env::var("LOG_ROOT").unwrap_or_else(|_| "data/message_logs".to_string()),
            archive_root: env::var("ARCHIVE_ROOT").unwrap_or_else(|_| "data/archived".to_string()),
            http_port: env::var("HTTP_PORT")
                .or_else(|_| env::var("PORT"))
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            backfill_limit: env::var("BACKFILL_LIMIT")
                .unwrap_or_else(|_| "100".to_string())
                .parse::<u8>()
                .unwrap_or(MAX_BACKFILL_LIMIT)
                .clamp(1, MAX_BACKFILL_LIMIT),
            default_parts: env::var("DEFAULT_PARTS")
                .unwrap_or_else(|_| DEFAULT_PARTS.to_string())
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_PARTS),
            max_parts: env::var("MAX_PARTS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(1000),
            rate_limit_max: env::var("RATE_LIMIT_MAX")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(100),
            rate_limit_window,
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("status_message", &self.status_message)
            .field("log_root", &self.log_root)
            .field("archive_root", &self.archive_root)
            .field("http_port", &self.http_port)
            .field("backfill_limit", &self.backfill_limit)
            .field("default_parts", &self.default_parts)
            .field("max_parts", &self.max_parts)
            .field("rate_limit_max", &self.rate_limit_max)
            .field(
                "rate_limit_window",
                &humantime::format_duration(self.rate_limit_window).to_string(),
            )
            .finish()
    }
}

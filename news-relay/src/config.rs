use crate::types::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Config file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "news-relay.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub fetch: FetchConfig,
    pub filter: FilterConfig,
    pub delivery: DeliveryConfig,
    pub schedule: ScheduleConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
    pub api_base: String,
    pub timeout_seconds: u64,
    pub disable_web_page_preview: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            chat_id: String::new(),
            api_base: "https://api.telegram.org".to_string(),
            timeout_seconds: 30,
            disable_web_page_preview: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub base_url: String,
    pub max_pages: u32,
    /// Path segment used for pages after the first: `{base_url}{segment}/{n}/`.
    pub page_path_segment: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub retry_delay_seconds: u64,
    pub request_delay_seconds: u64,
    /// Index into `link.split('/')` holding the category slug.
    pub category_segment_index: usize,
    pub selectors: SelectorConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://013info.rs/pancevo/".to_string(),
            max_pages: 3,
            page_path_segment: "strana".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) news-relay/0.1".to_string(),
            timeout_seconds: 30,
            max_attempts: 3,
            retry_delay_seconds: 5,
            request_delay_seconds: 1,
            category_segment_index: 4,
            selectors: SelectorConfig::default(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_secs(self.request_delay_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub item: String,
    pub title: String,
    pub link: String,
    pub content: String,
    pub date: String,
    pub image: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            item: "article.post".to_string(),
            title: "h3".to_string(),
            link: "h3 a[href]".to_string(),
            content: "div.lead".to_string(),
            date: "div.articleMeta".to_string(),
            image: "img.wp-post-image".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub excluded_categories: Vec<String>,
    pub excluded_keywords: Vec<String>,
    pub min_title_len: usize,
    pub min_content_len: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            excluded_categories: vec!["marketing".to_string()],
            excluded_keywords: ["reklama", "oglas", "sponzor", "reklamni"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_title_len: 5,
            min_content_len: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_content_length: usize,
    pub digest_title_limit: usize,
    /// Older unsent rows retried per ingest cycle. Zero disables the pass.
    pub redeliver_batch: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_content_length: 200,
            digest_title_limit: 150,
            redeliver_batch: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub polling_interval_minutes: u64,
    /// Daily times are `HH:MM` in local time, see `timezone_offset_minutes`.
    pub digest_time: String,
    pub stats_time: String,
    pub cleanup_time: String,
    pub retention_days: u32,
    pub tick_interval_seconds: u64,
    pub failure_cooldown_seconds: u64,
    pub max_consecutive_failures: u32,
    pub timezone_offset_minutes: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            polling_interval_minutes: 10,
            digest_time: "09:00".to_string(),
            stats_time: "18:00".to_string(),
            cleanup_time: "03:00".to_string(),
            retention_days: 30,
            tick_interval_seconds: 1,
            failure_cooldown_seconds: 60,
            max_consecutive_failures: 3,
            timezone_offset_minutes: 0,
        }
    }
}

impl ScheduleConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_minutes * 60)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_file: "news.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("bot.log".to_string()),
        }
    }
}

impl Config {
    /// Defaults, then the TOML file, then process environment.
    ///
    /// An explicit `path` must exist. Without one, `news-relay.toml` is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Reading config file {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("TELEGRAM_TOKEN") {
            self.telegram.token = v;
        }
        if let Some(v) = get("CHAT_ID") {
            self.telegram.chat_id = v;
        }
        if let Some(v) = get("NEWS_URL") {
            self.fetch.base_url = v;
        }
        if let Some(v) = get("PARSING_INTERVAL") {
            self.schedule.polling_interval_minutes = parse_number("PARSING_INTERVAL", &v)?;
        }
        if let Some(v) = get("MAX_PAGES") {
            self.fetch.max_pages = parse_number("MAX_PAGES", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT") {
            self.fetch.timeout_seconds = parse_number("REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = get("REQUEST_DELAY") {
            self.fetch.request_delay_seconds = parse_number("REQUEST_DELAY", &v)?;
        }
        if let Some(v) = get("MAX_CONTENT_LENGTH") {
            self.delivery.max_content_length = parse_number("MAX_CONTENT_LENGTH", &v)?;
        }
        if let Some(v) = get("EXCLUDED_CATEGORIES") {
            self.filter.excluded_categories = split_list(&v);
        }
        if let Some(v) = get("EXCLUDED_KEYWORDS") {
            self.filter.excluded_keywords = split_list(&v);
        }
        if let Some(v) = get("DATABASE_FILE") {
            self.store.database_file = v;
        }
        if let Some(v) = get("RETENTION_DAYS") {
            self.schedule.retention_days = parse_number("RETENTION_DAYS", &v)?;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) = get("LOG_FILE") {
            self.logging.file = Some(v);
        }
        Ok(())
    }

    /// Checks that must pass before anything is started.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.token.is_empty() {
            return Err(RelayError::Config("TELEGRAM_TOKEN is not set".to_string()));
        }
        if self.telegram.chat_id.is_empty() {
            return Err(RelayError::Config("CHAT_ID is not set".to_string()));
        }

        let base = url::Url::parse(&self.fetch.base_url).map_err(|e| {
            RelayError::Config(format!("NEWS_URL {:?} is invalid: {}", self.fetch.base_url, e))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(RelayError::Config(format!(
                "NEWS_URL must be http(s), got {}",
                base.scheme()
            )));
        }

        if self.fetch.max_pages == 0 {
            return Err(RelayError::Config("MAX_PAGES must be at least 1".to_string()));
        }
        if self.fetch.max_attempts == 0 {
            return Err(RelayError::Config("fetch.max_attempts must be at least 1".to_string()));
        }
        if self.schedule.polling_interval_minutes == 0 {
            return Err(RelayError::Config(
                "PARSING_INTERVAL must be at least 1 minute".to_string(),
            ));
        }

        for (name, value) in [
            ("digest_time", &self.schedule.digest_time),
            ("stats_time", &self.schedule.stats_time),
            ("cleanup_time", &self.schedule.cleanup_time),
        ] {
            parse_hhmm(value).map_err(|e| RelayError::Config(format!("schedule.{}: {}", name, e)))?;
        }

        info!(
            "Configuration valid: source={} pages={} interval={}m db={}",
            self.fetch.base_url,
            self.fetch.max_pages,
            self.schedule.polling_interval_minutes,
            self.store.database_file
        );
        Ok(())
    }
}

/// Parse `HH:MM` into `(hour, minute)`.
pub fn parse_hhmm(value: &str) -> std::result::Result<(u8, u8), String> {
    let (h, m) = value
        .trim()
        .split_once(':')
        .ok_or_else(|| format!("expected HH:MM, got {:?}", value))?;
    let hour: u8 = h.parse().map_err(|_| format!("bad hour in {:?}", value))?;
    let min: u8 = m.parse().map_err(|_| format!("bad minute in {:?}", value))?;
    if hour > 23 || min > 59 {
        return Err(format!("time out of range: {:?}", value));
    }
    Ok((hour, min))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| RelayError::Config(format!("{} must be a number, got {:?}", key, value)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use interfaces::defs::{
    FetchError, MessageSink, OutboundMessage, PageSource, ParseMode, SinkError,
};

pub const DEFAULT_CATEGORY: &str = "general";

/// An item as scraped from a listing page, before it has been stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub title: String,
    pub link: String,
    pub content: String,
    pub date: Option<String>,
    pub category: String,
    pub image_url: Option<String>,
}

impl RawItem {
    /// Deduplication key: sha256 over title, content and link separated by 0x1f, hex encoded.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.content.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.link.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A row of the `news` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NewsItem {
    pub id: i64,
    pub title: String,
    pub link: String,
    pub content: Option<String>,
    pub date: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub is_sent: bool,
}

impl NewsItem {
    pub fn category_or_default(&self) -> &str {
        match self.category.as_deref() {
            Some(c) if !c.is_empty() => c,
            _ => DEFAULT_CATEGORY,
        }
    }
}

impl From<&NewsItem> for RawItem {
    fn from(item: &NewsItem) -> Self {
        Self {
            title: item.title.clone(),
            link: item.link.clone(),
            content: item.content.clone().unwrap_or_default(),
            date: item.date.clone(),
            category: item.category_or_default().to_string(),
            image_url: item.image_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total: i64,
    pub sent: i64,
    pub unsent: i64,
    pub days_active: i64,
    pub last_item_at: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// Today's unsent items of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestGroup {
    pub category: String,
    pub count: i64,
    /// Titles joined with `" | "`.
    pub titles: String,
}

/// Counters for a single ingest cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub accepted: usize,
    pub filtered: usize,
    pub invalid: usize,
    pub new: usize,
    pub sent: usize,
    pub failed: usize,
    pub redelivered: usize,
    pub storage_errors: usize,
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetched={} accepted={} filtered={} invalid={} new={} sent={} failed={} \
             redelivered={} storage_errors={}",
            self.fetched,
            self.accepted,
            self.filtered,
            self.invalid,
            self.new,
            self.sent,
            self.failed,
            self.redelivered,
            self.storage_errors
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(title: &str, content: &str, link: &str) -> RawItem {
        RawItem {
            title: title.to_string(),
            link: link.to_string(),
            content: content.to_string(),
            date: None,
            category: DEFAULT_CATEGORY.to_string(),
            image_url: None,
        }
    }

    #[test]
    fn test_hash_is_stable_and_hex() {
        let a = raw("Naslov vesti", "Sadrzaj vesti ovde", "https://x/news/drustvo/a");
        let b = a.clone();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
        assert!(a.content_hash().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_ignores_metadata_but_not_fields() {
        let a = raw("Title one", "Body text here", "https://x/a");
        let mut with_date = a.clone();
        with_date.date = Some("12.03.2024".into());
        assert_eq!(a.content_hash(), with_date.content_hash());

        let other_link = raw("Title one", "Body text here", "https://x/b");
        assert_ne!(a.content_hash(), other_link.content_hash());
    }

    #[test]
    fn test_relay_error_sources() {
        let db: RelayError = sqlx::Error::PoolClosed.into();
        assert!(matches!(db, RelayError::Database(_)));
        assert!(db.to_string().starts_with("Database error"));

        let sink: RelayError = SinkError::Transport("reset".into()).into();
        assert_eq!(sink.to_string(), "Sink error: sink transport failure: reset");

        let config = RelayError::Config("CHAT_ID is not set".into());
        assert_eq!(config.to_string(), "Configuration error: CHAT_ID is not set");
    }

    #[test]
    fn test_hash_field_boundaries_matter() {
        let a = raw("ab", "c", "https://x");
        let b = raw("a", "bc", "https://x");
        assert_ne!(a.content_hash(), b.content_hash());
    }
}

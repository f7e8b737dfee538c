use crate::types::{DigestGroup, NewsItem, RawItem, Result, Statistics, DEFAULT_CATEGORY};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS news (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    link TEXT UNIQUE NOT NULL,
    content TEXT,
    date TEXT,
    category TEXT,
    image_url TEXT,
    hash TEXT UNIQUE NOT NULL,
    created_at TIMESTAMP NOT NULL,
    sent_at TIMESTAMP,
    is_sent BOOLEAN NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_news_link ON news(link);
CREATE INDEX IF NOT EXISTS idx_news_hash ON news(hash);
CREATE INDEX IF NOT EXISTS idx_news_is_sent ON news(is_sent);
CREATE INDEX IF NOT EXISTS idx_news_created_at ON news(created_at);
"#;

/// Persistent dedupe store over SQLite. One pool, owned by whoever drives the relay.
pub struct NewsStore {
    pool: SqlitePool,
}

impl NewsStore {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.setup_schema().await?;
        info!("Opened news store at {}", db_path.display());
        Ok(store)
    }

    /// Private in-memory database. Pinned to one connection that never expires, since each
    /// new connection would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.setup_schema().await?;
        Ok(store)
    }

    async fn setup_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn exists(&self, hash: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM news WHERE hash = ? LIMIT 1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Insert a new item. `Ok(None)` when the hash or link is already stored.
    pub async fn insert(&self, item: &RawItem, hash: &str) -> Result<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT INTO news
                (title, link, content, date, category, image_url, hash, created_at, is_sent)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&item.title)
        .bind(&item.link)
        .bind(&item.content)
        .bind(&item.date)
        .bind(&item.category)
        .bind(&item.image_url)
        .bind(hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("Duplicate item skipped: {}", item.link);
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    /// True only when a new row was created.
    pub async fn add(&self, item: &RawItem, hash: &str) -> Result<bool> {
        Ok(self.insert(item, hash).await?.is_some())
    }

    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<NewsItem>> {
        let item = sqlx::query_as::<_, NewsItem>("SELECT * FROM news WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    /// Flip `is_sent` to true. Returns false if the row is missing or was already sent.
    pub async fn mark_sent(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE news
            SET is_sent = 1, sent_at = MAX(?, created_at)
            WHERE id = ? AND is_sent = 0
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Unsent items, newest first.
    pub async fn unsent_batch(&self, limit: u32) -> Result<Vec<NewsItem>> {
        let items = sqlx::query_as::<_, NewsItem>(
            "SELECT * FROM news WHERE is_sent = 0 ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN is_sent = 1 THEN 1 ELSE 0 END), 0) AS sent,
                COUNT(DISTINCT substr(created_at, 1, 10)) AS days_active,
                MAX(created_at) AS last_item_at,
                MAX(sent_at) AS last_sent_at
            FROM news
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let sent: i64 = row.try_get("sent")?;
        let last_item_at: Option<String> = row.try_get("last_item_at")?;
        let last_sent_at: Option<String> = row.try_get("last_sent_at")?;

        Ok(Statistics {
            total,
            sent,
            unsent: total - sent,
            days_active: row.try_get("days_active")?,
            last_item_at: last_item_at.as_deref().and_then(parse_timestamp),
            last_sent_at: last_sent_at.as_deref().and_then(parse_timestamp),
        })
    }

    /// Today's unsent items grouped by category, largest group first. "Today" starts at
    /// local midnight, local time being UTC shifted by `utc_offset_minutes`.
    pub async fn daily_digest(&self, utc_offset_minutes: i32) -> Result<Vec<DigestGroup>> {
        self.digest_since(local_day_start(Utc::now(), utc_offset_minutes)).await
    }

    pub async fn digest_since(&self, since: DateTime<Utc>) -> Result<Vec<DigestGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT
                COALESCE(NULLIF(category, ''), ?) AS category,
                COUNT(*) AS count,
                GROUP_CONCAT(title, ' | ') AS titles
            FROM news
            WHERE created_at >= ? AND is_sent = 0
            GROUP BY 1
            ORDER BY count DESC, category ASC
            "#,
        )
        .bind(DEFAULT_CATEGORY)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            groups.push(DigestGroup {
                category: row.try_get("category")?,
                count: row.try_get("count")?,
                titles: row.try_get::<Option<String>, _>("titles")?.unwrap_or_default(),
            });
        }
        Ok(groups)
    }

    /// Delete rows created more than `older_than_days` ago. Returns how many went.
    pub async fn cleanup(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = ChronoDuration::try_days(i64::from(older_than_days))
            .and_then(|window| Utc::now().checked_sub_signed(window));
        let Some(cutoff) = cutoff else {
            debug!("Retention of {} days reaches past any timestamp", older_than_days);
            return Ok(0);
        };

        let result = sqlx::query("DELETE FROM news WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!("Cleaned up {} items older than {} days", removed, older_than_days);
        }
        Ok(removed)
    }

    /// Liveness check.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool. Consumes the store so it cannot be used or closed again.
    pub async fn close(self) {
        self.pool.close().await;
        debug!("News store closed");
    }
}

/// UTC instant of the most recent local midnight at or before `now`.
pub fn local_day_start(now: DateTime<Utc>, utc_offset_minutes: i32) -> DateTime<Utc> {
    let offset = ChronoDuration::minutes(i64::from(utc_offset_minutes));
    let local_midnight = (now + offset).date_naive().and_time(NaiveTime::MIN);
    Utc.from_utc_datetime(&local_midnight) - offset
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| {
            DateTime::parse_from_str(raw, fmt)
                .map(|ts| ts.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(raw, fmt)
                        .ok()
                        .map(|n| Utc.from_utc_datetime(&n))
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(title: &str, link: &str, category: &str) -> RawItem {
        RawItem {
            title: title.to_string(),
            link: link.to_string(),
            content: format!("Sadrzaj za {}", title),
            date: Some("12.03.2024.".to_string()),
            category: category.to_string(),
            image_url: None,
        }
    }

    async fn store_with(items: &[RawItem]) -> NewsStore {
        let store = NewsStore::in_memory().await.unwrap();
        for item in items {
            store.add(item, &item.content_hash()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let store = NewsStore::in_memory().await.unwrap();
        let item = raw("Nova skola", "https://x/p/drustvo/a", "drustvo");
        let hash = item.content_hash();

        assert!(!store.exists(&hash).await.unwrap());
        assert!(store.add(&item, &hash).await.unwrap());
        assert!(store.exists(&hash).await.unwrap());
        assert!(!store.add(&item, &hash).await.unwrap());

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn test_same_link_with_new_hash_is_a_duplicate() {
        let store = NewsStore::in_memory().await.unwrap();
        let first = raw("Nova skola", "https://x/p/drustvo/a", "drustvo");
        let mut edited = first.clone();
        edited.title = "Nova skola (izmenjeno)".to_string();

        assert!(store.add(&first, &first.content_hash()).await.unwrap());
        assert!(!store.add(&edited, &edited.content_hash()).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_sent_only_once() {
        let store = NewsStore::in_memory().await.unwrap();
        let item = raw("Nova skola", "https://x/p/drustvo/a", "drustvo");
        let id = store.insert(&item, &item.content_hash()).await.unwrap().unwrap();

        assert!(store.mark_sent(id).await.unwrap());
        assert!(!store.mark_sent(id).await.unwrap());
        assert!(!store.mark_sent(id + 100).await.unwrap());

        let stored = store.find_by_hash(&item.content_hash()).await.unwrap().unwrap();
        assert!(stored.is_sent);
        let sent_at = stored.sent_at.unwrap();
        assert!(sent_at >= stored.created_at);
    }

    #[tokio::test]
    async fn test_unsent_batch_excludes_sent() {
        let items = vec![
            raw("Prva vest", "https://x/p/drustvo/1", "drustvo"),
            raw("Druga vest", "https://x/p/sport/2", "sport"),
            raw("Treca vest", "https://x/p/sport/3", "sport"),
        ];
        let store = store_with(&items).await;
        let first = store.find_by_hash(&items[0].content_hash()).await.unwrap().unwrap();
        store.mark_sent(first.id).await.unwrap();

        let unsent = store.unsent_batch(10).await.unwrap();
        assert_eq!(unsent.len(), 2);
        assert!(unsent.iter().all(|i| !i.is_sent));
        assert_eq!(store.unsent_batch(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_statistics() {
        let items = vec![
            raw("Prva vest", "https://x/p/drustvo/1", "drustvo"),
            raw("Druga vest", "https://x/p/sport/2", "sport"),
        ];
        let store = store_with(&items).await;

        let empty_sent = store.statistics().await.unwrap();
        assert_eq!(empty_sent.total, 2);
        assert_eq!(empty_sent.sent, 0);
        assert_eq!(empty_sent.last_sent_at, None);

        let first = store.find_by_hash(&items[0].content_hash()).await.unwrap().unwrap();
        store.mark_sent(first.id).await.unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.unsent, 1);
        assert_eq!(stats.days_active, 1);
        assert!(stats.last_item_at.is_some());
        assert!(stats.last_sent_at.is_some());
    }

    #[tokio::test]
    async fn test_statistics_on_empty_store() {
        let store = NewsStore::in_memory().await.unwrap();
        assert_eq!(store.statistics().await.unwrap(), Statistics::default());
    }

    #[tokio::test]
    async fn test_daily_digest_groups_unsent_by_category() {
        let items = vec![
            raw("Prva vest", "https://x/p/sport/1", "sport"),
            raw("Druga vest", "https://x/p/sport/2", "sport"),
            raw("Treca vest", "https://x/p/drustvo/3", "drustvo"),
            raw("Bez kategorije", "https://x/4", ""),
        ];
        let store = store_with(&items).await;
        let sent = store.find_by_hash(&items[2].content_hash()).await.unwrap().unwrap();
        store.mark_sent(sent.id).await.unwrap();

        let digest = store.daily_digest(0).await.unwrap();
        assert_eq!(digest.len(), 2);
        assert_eq!(digest[0].category, "sport");
        assert_eq!(digest[0].count, 2);
        assert!(digest[0].titles.contains(" | "));
        assert_eq!(digest[1].category, "general");
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let store = store_with(&[raw("Prva vest", "https://x/p/sport/1", "sport")]).await;

        sqlx::query(
            "INSERT INTO news (title, link, content, hash, created_at, is_sent) \
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind("Stara vest")
        .bind("https://x/p/sport/old")
        .bind("Stari sadrzaj vesti")
        .bind("oldhash")
        .bind(Utc::now() - ChronoDuration::days(45))
        .execute(store.pool())
        .await
        .unwrap();

        assert_eq!(store.cleanup(30).await.unwrap(), 1);
        assert_eq!(store.statistics().await.unwrap().total, 1);
        assert!(!store.exists("oldhash").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_with_huge_retention_deletes_nothing() {
        let store = store_with(&[raw("Prva vest", "https://x/p/sport/1", "sport")]).await;

        assert_eq!(store.cleanup(u32::MAX).await.unwrap(), 0);
        assert_eq!(store.statistics().await.unwrap().total, 1);
    }

    #[test]
    fn test_local_day_start_follows_offset() {
        let now = Utc.with_ymd_and_hms(2024, 3, 12, 23, 30, 0).unwrap();
        assert_eq!(local_day_start(now, 0), Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap());

        // 01:30 local on the 13th at +120
        assert_eq!(local_day_start(now, 120), Utc.with_ymd_and_hms(2024, 3, 12, 22, 0, 0).unwrap());

        // 18:30 local on the 12th at -300
        assert_eq!(local_day_start(now, -300), Utc.with_ymd_and_hms(2024, 3, 12, 5, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_digest_since_local_midnight_includes_early_local_items() {
        let store = NewsStore::in_memory().await.unwrap();
        let early = Utc.with_ymd_and_hms(2024, 3, 12, 22, 30, 0).unwrap();
        sqlx::query(
            "INSERT INTO news (title, link, content, category, hash, created_at, is_sent) \
             VALUES (?, ?, ?, ?, ?, ?, 0)",
        )
        .bind("Nocna vest")
        .bind("https://x/p/hronika/noc")
        .bind("Sadrzaj nocne vesti")
        .bind("hronika")
        .bind("nighthash")
        .bind(early)
        .execute(store.pool())
        .await
        .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 13, 7, 0, 0).unwrap();
        let local = store.digest_since(local_day_start(now, 120)).await.unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].category, "hronika");

        let utc = store.digest_since(local_day_start(now, 0)).await.unwrap();
        assert!(utc.is_empty());
    }

    #[tokio::test]
    async fn test_open_on_disk_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.db");
        let item = raw("Nova skola", "https://x/p/drustvo/a", "drustvo");

        let store = NewsStore::open(&path).await.unwrap();
        assert!(store.add(&item, &item.content_hash()).await.unwrap());
        store.ping().await.unwrap();
        store.close().await;

        let reopened = NewsStore::open(&path).await.unwrap();
        assert!(reopened.exists(&item.content_hash()).await.unwrap());
        reopened.close().await;
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-03-12T10:00:00+00:00").is_some());
        assert!(parse_timestamp("2024-03-12T10:00:00.123456+00:00").is_some());
        assert!(parse_timestamp("2024-03-12 10:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}

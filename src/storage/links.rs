//! Collected link records and statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};

use super::{Database, StorageError};
use crate::links::{LinkType, Platform, clean_link};

/// A stored link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LinkRecord {
    pub id: i64,
    pub platform: String,
    pub link_type: Option<String>,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub members_count: Option<i64>,
    pub is_active: bool,
    pub collected_date: DateTime<Utc>,
    pub collected_by: Option<i64>,
    pub source_chat_id: Option<i64>,
    pub message_date: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub metadata: Option<String>,
}

/// Data for storing a newly found link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLink {
    pub url: String,
    pub platform: Platform,
    pub link_type: LinkType,
    pub title: Option<String>,
    pub collected_by: Option<i64>,
    pub source_chat_id: Option<i64>,
    pub message_date: Option<DateTime<Utc>>,
}

impl NewLink {
    /// Creates a link without source information.
    #[must_use]
    pub fn new(url: impl Into<String>, platform: Platform, link_type: LinkType) -> Self {
        Self {
            url: url.into(),
            platform,
            link_type,
            title: None,
            collected_by: None,
            source_chat_id: None,
            message_date: None,
        }
    }
}

/// Selects links by platform and type; `None` matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkFilter {
    pub platform: Option<Platform>,
    pub link_type: Option<LinkType>,
}

impl LinkFilter {
    /// Matches every link.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            platform: None,
            link_type: None,
        }
    }

    /// Matches every link of one platform.
    #[must_use]
    pub const fn platform(platform: Platform) -> Self {
        Self {
            platform: Some(platform),
            link_type: None,
        }
    }

    /// Narrows the filter to one link type.
    #[must_use]
    pub const fn with_type(mut self, link_type: LinkType) -> Self {
        self.link_type = Some(link_type);
        self
    }

    fn push_where(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push(" WHERE 1 = 1");
        if let Some(platform) = self.platform {
            builder.push(" AND platform = ").push_bind(platform.as_str());
        }
        if let Some(link_type) = self.link_type {
            builder.push(" AND link_type = ").push_bind(link_type.as_str());
        }
    }
}

/// Aggregate link statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub by_platform: BTreeMap<String, i64>,
    pub telegram_by_type: BTreeMap<String, i64>,
    pub whatsapp_by_type: BTreeMap<String, i64>,
    pub total: i64,
    pub active: i64,
}

impl LinkStats {
    /// Number of links stored for a platform.
    #[must_use]
    pub fn platform_count(&self, platform: Platform) -> i64 {
        self.by_platform.get(platform.as_str()).copied().unwrap_or(0)
    }
}

impl Database {
    /// Stores a link unless its URL is already known.
    ///
    /// The URL is cleaned first; an empty result is rejected. Returns
    /// `true` when a new row was inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn save_link(&self, link: &NewLink) -> Result<bool, StorageError> {
        let url = clean_link(&link.url);
        if url.is_empty() {
            return Ok(false);
        }

        let done = sqlx::query(
            "INSERT OR IGNORE INTO links
                (platform, link_type, url, title, is_active, collected_date,
                 collected_by, source_chat_id, message_date, metadata)
             VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?, '{}')",
        )
        .bind(link.platform.as_str())
        .bind(link.link_type.as_str())
        .bind(&url)
        .bind(&link.title)
        .bind(Utc::now())
        .bind(link.collected_by)
        .bind(link.source_chat_id)
        .bind(link.message_date)
        .execute(self.pool())
        .await?;

        Ok(done.rows_affected() > 0)
    }

    /// Checks whether a URL is already stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn link_exists(&self, url: &str) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM links WHERE url = ?)")
            .bind(url)
            .fetch_one(self.pool())
            .await?;
        Ok(exists)
    }

    /// Lists links matching a filter, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_links(
        &self,
        filter: LinkFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LinkRecord>, StorageError> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM links");
        filter.push_where(&mut builder);
        builder
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let links = builder
            .build_query_as::<LinkRecord>()
            .fetch_all(self.pool())
            .await?;
        Ok(links)
    }

    /// Counts links matching a filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_links(&self, filter: LinkFilter) -> Result<i64, StorageError> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM links");
        filter.push_where(&mut builder);

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Computes per-platform and per-type statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn link_stats(&self) -> Result<LinkStats, StorageError> {
        let by_platform: Vec<(String, i64)> =
            sqlx::query_as("SELECT platform, COUNT(*) FROM links GROUP BY platform")
                .fetch_all(self.pool())
                .await?;

        let by_type: Vec<(String, Option<String>, i64)> = sqlx::query_as(
            "SELECT platform, link_type, COUNT(*) FROM links
             WHERE platform IN ('telegram', 'whatsapp')
             GROUP BY platform, link_type",
        )
        .fetch_all(self.pool())
        .await?;

        let (total, active): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM links")
                .fetch_one(self.pool())
                .await?;

        let mut stats = LinkStats {
            by_platform: by_platform.into_iter().collect(),
            total,
            active,
            ..LinkStats::default()
        };

        for (platform, link_type, count) in by_type {
            let Some(link_type) = link_type else { continue };
            let bucket = if platform == Platform::Telegram.as_str() {
                &mut stats.telegram_by_type
            } else {
                &mut stats.whatsapp_by_type
            };
            bucket.insert(link_type, count);
        }

        Ok(stats)
    }

    /// Marks a link as (in)active after a check. Returns `false` if unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_link_status(&self, url: &str, is_active: bool) -> Result<bool, StorageError> {
        let done = sqlx::query("UPDATE links SET is_active = ?, last_checked = ? WHERE url = ?")
            .bind(is_active)
            .bind(Utc::now())
            .bind(url)
            .execute(self.pool())
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Deletes every link of a platform and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_links_by_platform(&self, platform: Platform) -> Result<u64, StorageError> {
        let done = sqlx::query("DELETE FROM links WHERE platform = ?")
            .bind(platform.as_str())
            .execute(self.pool())
            .await?;
        Ok(done.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        for link in [
            NewLink::new("https://t.me/+AbCdEf123", Platform::Telegram, LinkType::PublicGroup),
            NewLink::new("https://t.me/rustlang", Platform::Telegram, LinkType::Channel),
            NewLink::new("https://t.me/joinchat/AAAAAE1x", Platform::Telegram, LinkType::PrivateGroup),
            NewLink::new("https://chat.whatsapp.com/Kq9sLm2Zx", Platform::WhatsApp, LinkType::Group),
        ] {
            assert!(db.save_link(&link).await.unwrap());
        }
        db
    }

    #[tokio::test]
    async fn test_save_link_ignores_duplicates() {
        let db = seeded().await;
        let dup = NewLink::new("**https://t.me/rustlang**", Platform::Telegram, LinkType::Channel);

        assert!(!db.save_link(&dup).await.unwrap());
        assert!(db.link_exists("https://t.me/rustlang").await.unwrap());
        assert!(!db.link_exists("https://t.me/other").await.unwrap());
        assert_eq!(db.count_links(LinkFilter::all()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_save_link_rejects_empty() {
        let db = Database::open_in_memory().await.unwrap();
        let empty = NewLink::new(" ** ", Platform::Telegram, LinkType::Unknown);
        assert!(!db.save_link(&empty).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_links_filter_and_paging() {
        let db = seeded().await;

        let telegram = db
            .list_links(LinkFilter::platform(Platform::Telegram), 10, 0)
            .await
            .unwrap();
        assert_eq!(telegram.len(), 3);
        assert_eq!(telegram[0].url, "https://t.me/joinchat/AAAAAE1x");

        let page = db.list_links(LinkFilter::all(), 2, 2).await.unwrap();
        let urls: Vec<&str> = page.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://t.me/rustlang", "https://t.me/+AbCdEf123"]);

        let channels = LinkFilter::platform(Platform::Telegram).with_type(LinkType::Channel);
        assert_eq!(db.count_links(channels).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_link_stats() {
        let db = seeded().await;
        db.update_link_status("https://t.me/rustlang", false).await.unwrap();

        let stats = db.link_stats().await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.active, 3);
        assert_eq!(stats.platform_count(Platform::Telegram), 3);
        assert_eq!(stats.platform_count(Platform::WhatsApp), 1);
        assert_eq!(stats.telegram_by_type.get("channel"), Some(&1));
        assert_eq!(stats.whatsapp_by_type.get("group"), Some(&1));
    }

    #[tokio::test]
    async fn test_delete_by_platform() {
        let db = seeded().await;
        assert_eq!(db.delete_links_by_platform(Platform::Telegram).await.unwrap(), 3);
        assert_eq!(db.count_links(LinkFilter::all()).await.unwrap(), 1);
    }
}

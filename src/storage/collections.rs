//! Collection run logs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Database, StorageError};
use crate::links::Platform;

/// Lifecycle state of one collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Running,
    Stopped,
    Completed,
    Failed,
}

impl CollectionStatus {
    /// Returns the name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One session's collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CollectionLog {
    pub id: i64,
    pub session_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: String,
    pub telegram_count: i64,
    pub whatsapp_count: i64,
    pub errors_count: i64,
}

impl Database {
    /// Opens a run log in the `running` state and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn start_collection_log(&self, session_id: i64) -> Result<i64, StorageError> {
        let done = sqlx::query("INSERT INTO collection_logs (session_id, started_at, status) VALUES (?, ?, ?)")
            .bind(session_id)
            .bind(Utc::now())
            .bind(CollectionStatus::Running.as_str())
            .execute(self.pool())
            .await?;
        Ok(done.last_insert_rowid())
    }

    /// Adds one collected link of a platform to a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn record_collected(&self, log_id: i64, platform: Platform) -> Result<(), StorageError> {
        let sql = match platform {
            Platform::WhatsApp => "UPDATE collection_logs SET whatsapp_count = whatsapp_count + 1 WHERE id = ?",
            _ => "UPDATE collection_logs SET telegram_count = telegram_count + 1 WHERE id = ?",
        };
        sqlx::query(sql).bind(log_id).execute(self.pool()).await?;
        Ok(())
    }

    /// Adds one error to a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn record_error(&self, log_id: i64) -> Result<(), StorageError> {
        sqlx::query("UPDATE collection_logs SET errors_count = errors_count + 1 WHERE id = ?")
            .bind(log_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Closes a run with its final status.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn finish_collection_log(
        &self,
        log_id: i64,
        status: CollectionStatus,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE collection_logs SET status = ?, ended_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(log_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Returns the most recent runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn recent_collection_logs(&self, limit: i64) -> Result<Vec<CollectionLog>, StorageError> {
        let logs = sqlx::query_as::<_, CollectionLog>(
            "SELECT * FROM collection_logs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(logs)
    }
}

//! Session records: registered `MTProto` logins used for collection.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Database, StorageError};

/// A registered user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: i64,

    /// File stem of the session file inside the sessions directory.
    pub session_name: String,

    pub phone_number: Option<String>,
    pub username: Option<String>,
    pub user_id: Option<i64>,
    pub first_name: Option<String>,
    pub display_name: Option<String>,
    pub added_date: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl SessionRecord {
    /// Human readable label: display name, `@username`, phone or id.
    #[must_use]
    pub fn label(&self) -> String {
        non_empty(self.display_name.as_deref())
            .map(str::to_owned)
            .or_else(|| non_empty(self.username.as_deref()).map(|u| format!("@{u}")))
            .or_else(|| non_empty(self.phone_number.as_deref()).map(str::to_owned))
            .unwrap_or_else(|| format!("session_{}", self.id))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Data for registering a new session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSession {
    pub session_name: String,
    pub phone_number: Option<String>,
    pub username: Option<String>,
    pub user_id: Option<i64>,
    pub first_name: Option<String>,
}

impl NewSession {
    /// Creates a session entry without account details.
    #[must_use]
    pub fn named(session_name: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            ..Self::default()
        }
    }

    fn display_name(&self) -> Option<String> {
        non_empty(self.first_name.as_deref())
            .map(str::to_owned)
            .or_else(|| non_empty(self.username.as_deref()).map(|u| format!("@{u}")))
    }
}

/// Total and active session counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionCounts {
    pub total: i64,
    pub active: i64,
}

impl Database {
    /// Registers a session and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DuplicateSession`] when the name is taken.
    pub async fn add_session(&self, session: &NewSession) -> Result<i64, StorageError> {
        let result = sqlx::query(
            "INSERT INTO sessions
                (session_name, phone_number, username, user_id, first_name, display_name, added_date, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(&session.session_name)
        .bind(&session.phone_number)
        .bind(&session.username)
        .bind(session.user_id)
        .bind(&session.first_name)
        .bind(session.display_name())
        .bind(Utc::now())
        .execute(self.pool())
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(StorageError::DuplicateSession(session.session_name.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Fetches a session by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_session(&self, id: i64) -> Result<Option<SessionRecord>, StorageError> {
        let session = sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(session)
    }

    /// Lists all sessions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StorageError> {
        let sessions = sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        Ok(sessions)
    }

    /// Lists sessions currently usable for collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_active_sessions(&self) -> Result<Vec<SessionRecord>, StorageError> {
        let sessions =
            sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE is_active = 1 ORDER BY id")
                .fetch_all(self.pool())
                .await?;
        Ok(sessions)
    }

    /// Activates or deactivates a session. Returns `false` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_session_status(&self, id: i64, is_active: bool) -> Result<bool, StorageError> {
        let done = sqlx::query("UPDATE sessions SET is_active = ?, last_used = ? WHERE id = ?")
            .bind(is_active)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Records that a session was just used.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn touch_session(&self, id: i64) -> Result<(), StorageError> {
        sqlx::query("UPDATE sessions SET last_used = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Deletes a session record. Returns `false` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_session(&self, id: i64) -> Result<bool, StorageError> {
        let done = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Counts total and active sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn session_counts(&self) -> Result<SessionCounts, StorageError> {
        let (total, active): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM sessions",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(SessionCounts { total, active })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_add_and_get_session() {
        let db = db().await;
        let new = NewSession {
            session_name: "main".to_owned(),
            username: Some("collector".to_owned()),
            phone_number: Some("+15550001111".to_owned()),
            ..NewSession::default()
        };

        let id = db.add_session(&new).await.unwrap();
        let session = db.get_session(id).await.unwrap().unwrap();

        assert_eq!(session.session_name, "main");
        assert!(session.is_active);
        assert_eq!(session.label(), "@collector");
        assert!(db.get_session(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_session_rejected() {
        let db = db().await;
        db.add_session(&NewSession::named("main")).await.unwrap();

        let err = db.add_session(&NewSession::named("main")).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateSession(name) if name == "main"));
    }

    #[tokio::test]
    async fn test_status_and_counts() {
        let db = db().await;
        let a = db.add_session(&NewSession::named("a")).await.unwrap();
        let b = db.add_session(&NewSession::named("b")).await.unwrap();

        assert!(db.update_session_status(b, false).await.unwrap());
        assert!(!db.update_session_status(999, false).await.unwrap());

        let active = db.list_active_sessions().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a);
        assert_eq!(
            db.session_counts().await.unwrap(),
            SessionCounts { total: 2, active: 1 }
        );
    }

    #[tokio::test]
    async fn test_delete_session() {
        let db = db().await;
        let id = db.add_session(&NewSession::named("gone")).await.unwrap();

        assert!(db.delete_session(id).await.unwrap());
        assert!(!db.delete_session(id).await.unwrap());
        assert!(db.list_sessions().await.unwrap().is_empty());
        assert_eq!(db.session_counts().await.unwrap(), SessionCounts::default());
    }

    #[test]
    fn test_label_fallback() {
        let session = SessionRecord {
            id: 7,
            session_name: "x".to_owned(),
            phone_number: Some(String::new()),
            username: None,
            user_id: None,
            first_name: None,
            display_name: None,
            added_date: Utc::now(),
            last_used: None,
            is_active: true,
        };
        assert_eq!(session.label(), "session_7");
    }
}

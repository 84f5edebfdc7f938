//! Registration of user sessions.
//!
//! A session is a grammers session file in the sessions directory plus a
//! row in the `sessions` table. [`SessionManager::validate_and_add`] checks
//! the file can be connected, reads the account identity when the file is
//! logged in, and stores the record.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::storage::{Database, NewSession, StorageError};
use crate::telegram::{AccountInfo, SessionClient, TelegramError, session_file};

/// Errors raised while registering sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session name: {0:?} (use letters, digits, '_' or '-')")]
    InvalidName(String),

    #[error("Session file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Could not connect session: {0}")]
    Connection(#[from] TelegramError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Reads the account behind a session file.
#[async_trait]
pub trait AccountProbe: Send + Sync {
    /// Connects the session file.
    ///
    /// Returns `Ok(None)` when the connection works but the account cannot
    /// be read (for example a file that was never logged in).
    async fn probe(&self, session_file: &Path) -> Result<Option<AccountInfo>, TelegramError>;
}

/// Probes session files over `MTProto`.
#[derive(Debug, Clone, Copy)]
pub struct TelegramProbe {
    api_id: i32,
}

impl TelegramProbe {
    #[must_use]
    pub const fn new(api_id: i32) -> Self {
        Self { api_id }
    }
}

#[async_trait]
impl AccountProbe for TelegramProbe {
    async fn probe(&self, session_file: &Path) -> Result<Option<AccountInfo>, TelegramError> {
        let client = SessionClient::connect(session_file, self.api_id, Duration::ZERO).await?;
        let info = match client.is_authorized().await {
            Ok(true) => client.me().await.ok(),
            Ok(false) => None,
            Err(e) => {
                client.disconnect();
                return Err(e);
            }
        };
        client.disconnect();
        Ok(info)
    }
}

/// Outcome of registering a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedSession {
    pub id: i64,

    /// Account details, if they could be read.
    pub account: Option<AccountInfo>,
}

/// Validates, registers and removes sessions.
pub struct SessionManager<P> {
    db: Database,
    sessions_dir: PathBuf,
    probe: P,
}

impl<P: AccountProbe> SessionManager<P> {
    #[must_use]
    pub fn new(db: Database, sessions_dir: impl Into<PathBuf>, probe: P) -> Self {
        Self {
            db,
            sessions_dir: sessions_dir.into(),
            probe,
        }
    }

    /// Checks a session file and registers it.
    ///
    /// The file `<sessions_dir>/<name>.session` must exist and connect.
    /// When the account cannot be read the session is still stored, with
    /// empty account details.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, the file is missing, the
    /// connection fails, or the name is already registered. Nothing is
    /// stored in any of these cases.
    pub async fn validate_and_add(&self, name: &str) -> Result<AddedSession, SessionError> {
        let name = name.trim();
        if !is_valid_session_name(name) {
            return Err(SessionError::InvalidName(name.to_owned()));
        }

        let path = session_file(&self.sessions_dir, name);
        if !path.is_file() {
            return Err(SessionError::FileNotFound(path));
        }

        let account = self.probe.probe(&path).await?;

        let mut record = NewSession::named(name);
        match &account {
            Some(info) => {
                record.user_id = Some(info.user_id);
                record.username.clone_from(&info.username);
                record.phone_number.clone_from(&info.phone);
                record.first_name.clone_from(&info.first_name);
            }
            None => warn!(session = name, "Account details unavailable, storing session without them"),
        }

        let id = self.db.add_session(&record).await?;
        info!(session = name, id, "Session registered");

        Ok(AddedSession { id, account })
    }

    /// Deletes a session record. The session file is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn remove(&self, id: i64) -> Result<bool, SessionError> {
        let removed = self.db.delete_session(id).await?;
        if removed {
            info!(id, "Session removed");
        }
        Ok(removed)
    }

    /// Enables or disables a session for collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_active(&self, id: i64, active: bool) -> Result<bool, SessionError> {
        Ok(self.db.update_session_status(id, active).await?)
    }

    /// Flips a session's active flag and returns the new value.
    ///
    /// Returns `None` for an unknown id.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn toggle(&self, id: i64) -> Result<Option<bool>, SessionError> {
        let Some(session) = self.db.get_session(id).await? else {
            return Ok(None);
        };
        let active = !session.is_active;
        self.db.update_session_status(id, active).await?;
        Ok(Some(active))
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }
}

/// Session names become file names, so only `[A-Za-z0-9_-]` is accepted.
#[must_use]
pub fn is_valid_session_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe(Result<Option<AccountInfo>, ()>);

    #[async_trait]
    impl AccountProbe for FakeProbe {
        async fn probe(&self, _session_file: &Path) -> Result<Option<AccountInfo>, TelegramError> {
            self.0
                .clone()
                .map_err(|()| TelegramError::Connection("unreachable".to_owned()))
        }
    }

    async fn manager(probe: FakeProbe) -> (SessionManager<FakeProbe>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.session"), b"").unwrap();
        let db = Database::open_in_memory().await.unwrap();
        (SessionManager::new(db, dir.path(), probe), dir)
    }

    fn account() -> AccountInfo {
        AccountInfo {
            user_id: 42,
            username: Some("collector".to_owned()),
            phone: Some("15550001111".to_owned()),
            first_name: Some("Ada".to_owned()),
        }
    }

    #[test]
    fn test_session_name_validation() {
        assert!(is_valid_session_name("main_01-a"));
        assert!(!is_valid_session_name(""));
        assert!(!is_valid_session_name("../etc/passwd"));
        assert!(!is_valid_session_name("has space"));
    }

    #[tokio::test]
    async fn test_add_stores_account_info() {
        let (manager, _dir) = manager(FakeProbe(Ok(Some(account())))).await;

        let added = manager.validate_and_add("main").await.unwrap();
        assert_eq!(added.account, Some(account()));

        let stored = manager.database().get_session(added.id).await.unwrap().unwrap();
        assert_eq!(stored.session_name, "main");
        assert_eq!(stored.user_id, Some(42));
        assert_eq!(stored.username.as_deref(), Some("collector"));
        assert!(stored.is_active);
    }

    #[tokio::test]
    async fn test_add_without_account_info() {
        let (manager, _dir) = manager(FakeProbe(Ok(None))).await;

        let added = manager.validate_and_add("main").await.unwrap();
        assert!(added.account.is_none());

        let stored = manager.database().get_session(added.id).await.unwrap().unwrap();
        assert!(stored.user_id.is_none());
        assert_eq!(stored.label(), format!("session_{}", added.id));
    }

    #[tokio::test]
    async fn test_connection_failure_stores_nothing() {
        let (manager, _dir) = manager(FakeProbe(Err(()))).await;

        let err = manager.validate_and_add("main").await.unwrap_err();
        assert!(matches!(err, SessionError::Connection(_)));
        assert_eq!(manager.database().session_counts().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_rejected() {
        let (manager, _dir) = manager(FakeProbe(Ok(None))).await;

        let err = manager.validate_and_add("other").await.unwrap_err();
        assert!(matches!(err, SessionError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_and_toggle_and_remove() {
        let (manager, _dir) = manager(FakeProbe(Ok(None))).await;
        let id = manager.validate_and_add("main").await.unwrap().id;

        let err = manager.validate_and_add("main").await.unwrap_err();
        assert!(matches!(err, SessionError::Storage(StorageError::DuplicateSession(_))));

        assert_eq!(manager.toggle(id).await.unwrap(), Some(false));
        assert!(manager.set_active(id, true).await.unwrap());
        assert_eq!(manager.toggle(999).await.unwrap(), None);

        assert!(manager.remove(id).await.unwrap());
        assert!(!manager.remove(id).await.unwrap());
    }
}

//! Chat history access used by the collector.
//!
//! [`MessageSource`] is the narrow view of a logged-in account the
//! collector needs: list dialogs, page through their history and fetch
//! attached documents.
//! [`SourceConnector`] opens one source per registered session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{SessionClient, TelegramError};
use crate::storage::SessionRecord;

/// Peer addressing data needed to request a chat's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRef {
    Chat(i64),
    Channel { id: i64, access_hash: i64 },
    User { id: i64, access_hash: i64 },
}

/// What kind of chat a dialog is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    /// Basic group or supergroup.
    Group,
    /// Broadcast channel.
    Channel,
    /// Private chat with a user or bot.
    User,
}

/// A chat visible to the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialog {
    pub id: i64,
    pub title: String,
    pub kind: DialogKind,
    pub peer: PeerRef,
}

impl Dialog {
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.kind == DialogKind::Group
    }
}

/// A message reduced to what link extraction needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: i32,
    pub chat_id: i64,
    pub date: Option<DateTime<Utc>>,
    pub text: String,

    /// URLs hidden behind text links and inline URL buttons.
    pub urls: Vec<String>,

    pub attachment: Option<Attachment>,
}

/// A document attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Name given by the sender; empty when the document has none.
    pub file_name: String,
    pub size: u64,
    pub location: DocumentLocation,
}

/// Addressing data of a stored document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentLocation {
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    pub dc_id: i32,
}

/// One history request.
///
/// Messages are returned newest first. `offset_id` pages backwards
/// (0 = start from the newest); `min_id` stops at already seen messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPage {
    pub offset_id: i32,
    pub min_id: i32,
    pub limit: i32,
}

/// Source of dialogs and message history for one account.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Lists the account's dialogs.
    async fn dialogs(&self) -> Result<Vec<Dialog>, TelegramError>;

    /// Fetches one page of a dialog's history.
    async fn history(&self, dialog: &Dialog, page: HistoryPage) -> Result<Vec<ChatMessage>, TelegramError>;

    /// Writes an attached document to `dest`.
    async fn download(&self, attachment: &Attachment, dest: &Path) -> Result<(), TelegramError>;

    /// Releases the connection.
    fn close(&self) {}
}

/// Opens message sources for registered sessions.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Connects a session.
    ///
    /// Fails with [`TelegramError::NotAuthorized`] if the session is no
    /// longer logged in.
    async fn connect(&self, session: &SessionRecord) -> Result<Box<dyn MessageSource>, TelegramError>;
}

/// Connects sessions stored as `<sessions_dir>/<name>.session` files.
#[derive(Debug, Clone)]
pub struct GrammersConnector {
    sessions_dir: PathBuf,
    api_id: i32,
    request_delay: Duration,
}

impl GrammersConnector {
    #[must_use]
    pub fn new(sessions_dir: impl Into<PathBuf>, api_id: i32, request_delay: Duration) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            api_id,
            request_delay,
        }
    }

    /// Path of the file backing a named session.
    #[must_use]
    pub fn session_path(&self, session_name: &str) -> PathBuf {
        session_file(&self.sessions_dir, session_name)
    }
}

/// Path of the file backing a named session inside `dir`.
#[must_use]
pub fn session_file(dir: &Path, session_name: &str) -> PathBuf {
    dir.join(format!("{session_name}.session"))
}

#[async_trait]
impl SourceConnector for GrammersConnector {
    async fn connect(&self, session: &SessionRecord) -> Result<Box<dyn MessageSource>, TelegramError> {
        let path = self.session_path(&session.session_name);
        if !path.exists() {
            return Err(TelegramError::Session(format!(
                "session file not found: {}",
                path.display()
            )));
        }

        let client = SessionClient::connect(&path, self.api_id, self.request_delay).await?;
        if !client.is_authorized().await? {
            client.disconnect();
            return Err(TelegramError::NotAuthorized);
        }

        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_path() {
        let connector = GrammersConnector::new("sessions", 1, Duration::ZERO);
        assert_eq!(
            connector.session_path("main"),
            PathBuf::from("sessions").join("main.session")
        );
    }

    #[test]
    fn test_dialog_is_group() {
        let dialog = Dialog {
            id: 1,
            title: "Rust".to_owned(),
            kind: DialogKind::Group,
            peer: PeerRef::Chat(1),
        };
        assert!(dialog.is_group());

        let channel = Dialog {
            kind: DialogKind::Channel,
            ..dialog
        };
        assert!(!channel.is_group());
    }
}

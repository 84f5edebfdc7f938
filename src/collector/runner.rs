//! Per-session collection task.
//!
//! Each active session runs one task:
//! 1. Connect; an unauthorized session is switched off and the task ends
//! 2. History pass over every group dialog, newest to oldest; documents
//!    attached to messages are downloaded and scanned like uploads
//! 3. Polling cycles every collection interval, fetching only messages
//!    newer than the last id seen per dialog
//!
//! Every page boundary is a checkpoint: the task blocks there while paused
//! and returns once stopped.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::state::{RunState, StatsCounter};
use super::{CollectorConfig, CollectorError};
use crate::files::{FileKind, local_file_name, process_file};
use crate::links::{LinkAnalysis, Platform, collectable_links};
use crate::storage::{CollectionStatus, Database, NewLink, SessionRecord, StorageError};
use crate::telegram::{
    ChatMessage, Dialog, HistoryPage, MessageSource, SourceConnector, TelegramError,
};

/// Retries of one history page after flood waits.
const MAX_FLOOD_RETRIES: u32 = 3;

/// Where a processed message came from.
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    pub session_id: Option<i64>,

    /// Run log credited with new links.
    pub log_id: Option<i64>,

    pub blacklist: &'a [String],

    /// WhatsApp links in messages older than this are ignored.
    pub whatsapp_cutoff: DateTime<Utc>,
}

/// Links newly stored from one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCounts {
    pub telegram: u64,
    pub whatsapp: u64,
}

/// Extracts the collectable links of a message and stores the new ones.
///
/// Telegram group and channel links are always kept; WhatsApp group links
/// only when the message is younger than the cutoff. Links already stored
/// are not counted.
///
/// # Errors
///
/// Returns an error if a database write fails.
pub async fn process_message(
    db: &Database,
    message: &ChatMessage,
    ctx: &MessageContext<'_>,
) -> Result<LinkCounts, StorageError> {
    let links = collectable_links(&message.text, &message.urls, ctx.blacklist);
    store_links(db, message, links, ctx).await
}

/// Downloads the document attached to a message and stores the
/// collectable links found in it, under the same rules as
/// [`process_message`].
///
/// Documents without a supported file type or larger than `max_bytes` are
/// skipped without downloading. The downloaded copy in `temp_dir` is
/// removed afterwards.
///
/// # Errors
///
/// Returns an error if the download fails, the file cannot be read or a
/// database write fails.
pub async fn process_attachment(
    db: &Database,
    source: &dyn MessageSource,
    message: &ChatMessage,
    ctx: &MessageContext<'_>,
    temp_dir: &Path,
    max_bytes: u64,
) -> Result<LinkCounts, CollectorError> {
    let Some(attachment) = &message.attachment else {
        return Ok(LinkCounts::default());
    };
    if FileKind::detect(Path::new(&attachment.file_name)) == FileKind::Unsupported {
        return Ok(LinkCounts::default());
    }
    if attachment.size > max_bytes {
        debug!(
            "Skipping {} ({} bytes) in chat {}",
            attachment.file_name, attachment.size, message.chat_id
        );
        return Ok(LinkCounts::default());
    }

    tokio::fs::create_dir_all(temp_dir).await?;
    let unique = format!("{}_{}", message.chat_id, message.id);
    let path = temp_dir.join(local_file_name(Some(&attachment.file_name), &unique));

    let report = match source.download(attachment, &path).await {
        Ok(()) => Ok(process_file(&path, ctx.blacklist).await),
        Err(e) => Err(e),
    };
    if let Err(e) = tokio::fs::remove_file(&path).await {
        debug!("Could not remove {}: {}", path.display(), e);
    }

    let report = report?;
    if let Some(reason) = report.error {
        return Err(CollectorError::Attachment {
            file_name: attachment.file_name.clone(),
            reason,
        });
    }
    Ok(store_links(db, message, report.links, ctx).await?)
}

async fn store_links(
    db: &Database,
    message: &ChatMessage,
    links: Vec<LinkAnalysis>,
    ctx: &MessageContext<'_>,
) -> Result<LinkCounts, StorageError> {
    let mut counts = LinkCounts::default();

    for link in links {
        match link.platform {
            Platform::Telegram => {}
            Platform::WhatsApp => {
                if message.date.is_some_and(|date| date < ctx.whatsapp_cutoff) {
                    continue;
                }
            }
            Platform::Other => continue,
        }

        let record = NewLink {
            collected_by: ctx.session_id,
            source_chat_id: Some(message.chat_id),
            message_date: message.date,
            ..NewLink::new(link.url, link.platform, link.link_type)
        };
        if !db.save_link(&record).await? {
            continue;
        }

        if let Some(log_id) = ctx.log_id {
            db.record_collected(log_id, link.platform).await?;
        }
        match link.platform {
            Platform::WhatsApp => counts.whatsapp += 1,
            _ => counts.telegram += 1,
        }
    }

    Ok(counts)
}

pub(super) struct SessionTask {
    pub(super) db: Database,
    pub(super) connector: Arc<dyn SourceConnector>,
    pub(super) session: SessionRecord,
    pub(super) log_id: i64,
    pub(super) config: Arc<CollectorConfig>,
    pub(super) control: watch::Receiver<RunState>,
    pub(super) stats: Arc<StatsCounter>,

    /// Set once the history pass over every group dialog is done.
    pub(super) caught_up: bool,
}

impl SessionTask {
    pub(super) async fn run(mut self) {
        let session_id = self.session.id;
        info!(session_id, "Collection started for {}", self.session.label());

        let status = match self.execute().await {
            Ok(()) => CollectionStatus::Completed,
            Err(CollectorError::Interrupted) if self.caught_up => CollectionStatus::Completed,
            Err(CollectorError::Interrupted) => CollectionStatus::Stopped,
            Err(e) => {
                error!(session_id, "Collection failed: {}", e);
                CollectionStatus::Failed
            }
        };

        if let Err(e) = self.db.finish_collection_log(self.log_id, status).await {
            warn!(session_id, "Failed to close collection log: {}", e);
        }
        info!(session_id, "Collection ended: {}", status);
    }

    async fn execute(&mut self) -> Result<(), CollectorError> {
        let source = match self.connector.connect(&self.session).await {
            Ok(source) => source,
            Err(TelegramError::NotAuthorized) => {
                warn!(session_id = self.session.id, "Session is not authorized, disabling it");
                self.db.update_session_status(self.session.id, false).await?;
                return Err(CollectorError::Unauthorized(self.session.id));
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.db.touch_session(self.session.id).await {
            warn!(session_id = self.session.id, "Failed to update last use: {}", e);
        }

        let result = self.collect(source.as_ref()).await;
        source.close();
        result
    }

    async fn collect(&mut self, source: &dyn MessageSource) -> Result<(), CollectorError> {
        let mut last_seen: HashMap<i64, i32> = HashMap::new();
        let mut dialogs = Self::group_dialogs(source.dialogs().await?);
        info!(session_id = self.session.id, "{} group dialogs to scan", dialogs.len());

        loop {
            for dialog in &dialogs {
                let min_id = last_seen.get(&dialog.id).copied().unwrap_or(0);
                match self.scan_dialog(source, dialog, min_id).await {
                    Ok(Some(max_id)) => {
                        last_seen.insert(dialog.id, max_id);
                    }
                    Ok(None) => {}
                    Err(CollectorError::Interrupted) => return Err(CollectorError::Interrupted),
                    Err(e) => {
                        warn!(session_id = self.session.id, "Failed to scan {}: {}", dialog.title, e);
                        self.count_error().await;
                    }
                }
            }
            self.caught_up = true;

            self.idle(self.config.collection_interval).await?;

            match source.dialogs().await {
                Ok(fresh) => dialogs = Self::group_dialogs(fresh),
                Err(e) => {
                    warn!(session_id = self.session.id, "Failed to refresh dialogs: {}", e);
                    self.count_error().await;
                }
            }
        }
    }

    fn group_dialogs(dialogs: Vec<Dialog>) -> Vec<Dialog> {
        dialogs.into_iter().filter(Dialog::is_group).collect()
    }

    /// Reads a dialog's messages newer than `min_id`, newest first.
    ///
    /// Returns the highest message id seen, if any.
    async fn scan_dialog(
        &mut self,
        source: &dyn MessageSource,
        dialog: &Dialog,
        min_id: i32,
    ) -> Result<Option<i32>, CollectorError> {
        if min_id == 0 {
            debug!(session_id = self.session.id, "Scanning history of {}", dialog.title);
            self.stats.add_dialog();
        }

        let cutoff = Utc::now() - self.config.whatsapp_max_age;
        let mut offset_id = 0;
        let mut max_seen = None;

        loop {
            self.checkpoint().await?;

            let page = HistoryPage {
                offset_id,
                min_id,
                limit: self.config.history_page_size,
            };
            let messages = self.fetch_page(source, dialog, page).await?;
            let Some(oldest) = messages.iter().map(|m| m.id).min() else {
                break;
            };

            self.stats.add_messages(messages.len() as u64);
            max_seen = max_seen.max(messages.iter().map(|m| m.id).max());

            let ctx = MessageContext {
                session_id: Some(self.session.id),
                log_id: Some(self.log_id),
                blacklist: &self.config.blacklist,
                whatsapp_cutoff: cutoff,
            };
            for message in &messages {
                match process_message(&self.db, message, &ctx).await {
                    Ok(counts) => self.add_counts(counts),
                    Err(e) => {
                        warn!(session_id = self.session.id, "Failed to store links: {}", e);
                        self.count_error().await;
                    }
                }

                if message.attachment.is_none() {
                    continue;
                }
                let attached = process_attachment(
                    &self.db,
                    source,
                    message,
                    &ctx,
                    &self.config.temp_dir,
                    self.config.max_attachment_bytes,
                )
                .await;
                match attached {
                    Ok(counts) => self.add_counts(counts),
                    Err(e) => {
                        warn!(session_id = self.session.id, "Failed to read attachment: {}", e);
                        self.count_error().await;
                    }
                }
            }

            if messages.len() < usize::try_from(page.limit).unwrap_or(usize::MAX) || oldest <= min_id + 1 {
                break;
            }
            offset_id = oldest;
        }

        Ok(max_seen)
    }

    async fn fetch_page(
        &mut self,
        source: &dyn MessageSource,
        dialog: &Dialog,
        page: HistoryPage,
    ) -> Result<Vec<ChatMessage>, CollectorError> {
        let mut attempts = 0;
        loop {
            match source.history(dialog, page).await {
                Err(TelegramError::FloodWait(seconds)) if attempts < MAX_FLOOD_RETRIES => {
                    attempts += 1;
                    warn!(session_id = self.session.id, "Flood wait of {} seconds, retrying", seconds);
                    self.idle(Duration::from_secs(u64::from(seconds))).await?;
                }
                result => return Ok(result?),
            }
        }
    }

    /// Blocks while paused; fails with `Interrupted` once stopped.
    async fn checkpoint(&mut self) -> Result<(), CollectorError> {
        loop {
            let state = *self.control.borrow_and_update();
            match state {
                RunState::Running => return Ok(()),
                RunState::Stopped => return Err(CollectorError::Interrupted),
                RunState::Paused => {}
            }
            if self.control.changed().await.is_err() {
                return Err(CollectorError::Interrupted);
            }
        }
    }

    /// Sleeps for `duration` unless stopped, then waits out any pause.
    async fn idle(&mut self, duration: Duration) -> Result<(), CollectorError> {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return self.checkpoint().await,
                changed = self.control.changed() => {
                    let stopped = *self.control.borrow() == RunState::Stopped;
                    if changed.is_err() || stopped {
                        return Err(CollectorError::Interrupted);
                    }
                }
            }
        }
    }

    fn add_counts(&self, counts: LinkCounts) {
        for _ in 0..counts.telegram {
            self.stats.add_link(Platform::Telegram);
        }
        for _ in 0..counts.whatsapp {
            self.stats.add_link(Platform::WhatsApp);
        }
    }

    async fn count_error(&self) {
        self.stats.add_error();
        if let Err(e) = self.db.record_error(self.log_id).await {
            warn!(session_id = self.session.id, "Failed to record error: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::TimeDelta;

    use super::*;
    use crate::collector::MAX_ATTACHMENT_BYTES;
    use crate::storage::LinkFilter;
    use crate::telegram::{Attachment, DocumentLocation};

    /// Serves documents by file name and records every download.
    #[derive(Default)]
    struct DocumentSource {
        files: HashMap<String, Vec<u8>>,
        downloads: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageSource for DocumentSource {
        async fn dialogs(&self) -> Result<Vec<Dialog>, TelegramError> {
            Ok(Vec::new())
        }

        async fn history(&self, _dialog: &Dialog, _page: HistoryPage) -> Result<Vec<ChatMessage>, TelegramError> {
            Ok(Vec::new())
        }

        async fn download(&self, attachment: &Attachment, dest: &Path) -> Result<(), TelegramError> {
            self.downloads.lock().unwrap().push(attachment.file_name.clone());
            let data = self
                .files
                .get(&attachment.file_name)
                .ok_or_else(|| TelegramError::Download("FILE_REFERENCE_EXPIRED".to_owned()))?;
            std::fs::write(dest, data).map_err(|e| TelegramError::Download(e.to_string()))
        }
    }

    fn attached(id: i32, file_name: &str, size: u64, age_days: i64) -> ChatMessage {
        ChatMessage {
            attachment: Some(Attachment {
                file_name: file_name.to_owned(),
                size,
                location: DocumentLocation::default(),
            }),
            ..message(id, "", age_days)
        }
    }

    fn message(id: i32, text: &str, age_days: i64) -> ChatMessage {
        ChatMessage {
            id,
            chat_id: -100,
            date: Some(Utc::now() - TimeDelta::days(age_days)),
            text: text.to_owned(),
            urls: Vec::new(),
            attachment: None,
        }
    }

    fn ctx(blacklist: &[String]) -> MessageContext<'_> {
        MessageContext {
            session_id: None,
            log_id: None,
            blacklist,
            whatsapp_cutoff: Utc::now() - TimeDelta::days(180),
        }
    }

    #[tokio::test]
    async fn test_process_message_saves_group_links() {
        let db = Database::open_in_memory().await.unwrap();
        let msg = message(
            1,
            "Join t.me/RustLang, chat.whatsapp.com/AbCdEf123456 and t.me/helper_bot",
            1,
        );

        let counts = process_message(&db, &msg, &ctx(&[])).await.unwrap();
        assert_eq!(counts, LinkCounts { telegram: 1, whatsapp: 1 });
        assert!(db.link_exists("https://t.me/rustlang").await.unwrap());

        let again = process_message(&db, &msg, &ctx(&[])).await.unwrap();
        assert_eq!(again, LinkCounts::default());
    }

    #[tokio::test]
    async fn test_process_message_skips_old_whatsapp() {
        let db = Database::open_in_memory().await.unwrap();
        let msg = message(
            1,
            "https://chat.whatsapp.com/AbCdEf123456 https://t.me/+Invite12345",
            365,
        );

        let counts = process_message(&db, &msg, &ctx(&[])).await.unwrap();
        assert_eq!(counts, LinkCounts { telegram: 1, whatsapp: 0 });
        assert_eq!(
            db.count_links(LinkFilter::platform(Platform::WhatsApp)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_process_message_uses_hidden_urls() {
        let db = Database::open_in_memory().await.unwrap();
        let mut msg = message(1, "press the button", 0);
        msg.urls.push("https://t.me/joinchat/AAAAAFxyz12".to_owned());

        let counts = process_message(&db, &msg, &ctx(&[])).await.unwrap();
        assert_eq!(counts.telegram, 1);

        let stored = db.list_links(LinkFilter::all(), 10, 0).await.unwrap();
        assert_eq!(stored[0].source_chat_id, Some(-100));
        assert!(stored[0].message_date.is_some());
    }

    #[tokio::test]
    async fn test_process_message_respects_blacklist() {
        let db = Database::open_in_memory().await.unwrap();
        let msg = message(1, "https://t.me/casino_deals", 0);
        let blacklist = vec!["casino".to_owned()];

        let counts = process_message(&db, &msg, &ctx(&blacklist)).await.unwrap();
        assert_eq!(counts, LinkCounts::default());
    }

    #[tokio::test]
    async fn test_process_attachment_reads_document() {
        let db = Database::open_in_memory().await.unwrap();
        let temp = tempfile::tempdir().unwrap();
        let source = DocumentSource {
            files: HashMap::from([(
                "links.txt".to_owned(),
                b"t.me/+AttachedInvite1\nhttps://chat.whatsapp.com/AbCdEf123456\nhttps://example.com".to_vec(),
            )]),
            ..DocumentSource::default()
        };

        let fresh = attached(1, "links.txt", 80, 1);
        let counts = process_attachment(&db, &source, &fresh, &ctx(&[]), temp.path(), MAX_ATTACHMENT_BYTES)
            .await
            .unwrap();
        assert_eq!(counts, LinkCounts { telegram: 1, whatsapp: 1 });
        assert!(db.link_exists("https://t.me/+AttachedInvite1").await.unwrap());

        // The downloaded copy is removed.
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);

        let db = Database::open_in_memory().await.unwrap();
        let old = attached(2, "links.txt", 80, 365);
        let counts = process_attachment(&db, &source, &old, &ctx(&[]), temp.path(), MAX_ATTACHMENT_BYTES)
            .await
            .unwrap();
        assert_eq!(counts, LinkCounts { telegram: 1, whatsapp: 0 });
    }

    #[tokio::test]
    async fn test_process_attachment_skips_without_download() {
        let db = Database::open_in_memory().await.unwrap();
        let temp = tempfile::tempdir().unwrap();
        let source = DocumentSource::default();

        for msg in [
            attached(1, "photo.jpg", 10, 0),
            attached(2, "", 10, 0),
            attached(3, "huge.txt", MAX_ATTACHMENT_BYTES + 1, 0),
            message(4, "no document", 0),
        ] {
            let counts = process_attachment(&db, &source, &msg, &ctx(&[]), temp.path(), MAX_ATTACHMENT_BYTES)
                .await
                .unwrap();
            assert_eq!(counts, LinkCounts::default());
        }
        assert!(source.downloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_process_attachment_download_failure() {
        let db = Database::open_in_memory().await.unwrap();
        let temp = tempfile::tempdir().unwrap();
        let source = DocumentSource::default();

        let msg = attached(1, "gone.zip", 10, 0);
        let err = process_attachment(&db, &source, &msg, &ctx(&[]), temp.path(), MAX_ATTACHMENT_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::Telegram(TelegramError::Download(_))));
        assert_eq!(source.downloads.lock().unwrap().as_slice(), ["gone.zip"]);
    }

    #[tokio::test]
    async fn test_process_attachment_unreadable_archive() {
        let db = Database::open_in_memory().await.unwrap();
        let temp = tempfile::tempdir().unwrap();
        let source = DocumentSource {
            files: HashMap::from([("dump.zip".to_owned(), b"not a zip".to_vec())]),
            ..DocumentSource::default()
        };

        let msg = attached(1, "dump.zip", 9, 0);
        let err = process_attachment(&db, &source, &msg, &ctx(&[]), temp.path(), MAX_ATTACHMENT_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::Attachment { ref file_name, .. } if file_name == "dump.zip"));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}

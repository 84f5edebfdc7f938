//! Control menu logic, independent of the bot transport.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::types::{
    Button, Keyboard, MenuAction, Reply, back_menu, collection_menu, export_menu, main_menu,
};
use crate::collector::{Collector, CollectorError};
use crate::config::Settings;
use crate::files::{import_report, process_file};
use crate::links::Platform;
use crate::sessions::{AccountProbe, SessionManager};
use crate::storage::{Database, LinkFilter, SessionRecord};

/// Handler settings taken from the application configuration.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub links_per_page: u32,
    pub exports_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub blacklist: Vec<String>,
}

impl HandlerOptions {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            links_per_page: settings.links_per_page.max(1),
            exports_dir: settings.exports_dir.clone(),
            sessions_dir: settings.sessions_dir.clone(),
            blacklist: settings.blacklisted_domains.clone(),
        }
    }
}

/// Executes menu actions and answers chat messages.
pub struct CommandHandler<P> {
    db: Database,
    collector: Arc<Collector>,
    sessions: SessionManager<P>,
    options: HandlerOptions,

    /// Chats whose next text message is a session name.
    awaiting_session: Mutex<HashSet<i64>>,
}

impl<P: AccountProbe> CommandHandler<P> {
    #[must_use]
    pub fn new(
        db: Database,
        collector: Arc<Collector>,
        sessions: SessionManager<P>,
        options: HandlerOptions,
    ) -> Self {
        Self {
            db,
            collector,
            sessions,
            options,
            awaiting_session: Mutex::new(HashSet::new()),
        }
    }

    /// Greeting with the main menu.
    #[must_use]
    pub fn handle_start(&self) -> Reply {
        Reply::message("🤖 Telegram & WhatsApp link collector\n\nChoose an action:")
            .with_keyboard(main_menu())
    }

    /// Executes a menu action for a chat.
    pub async fn handle_action(&self, chat_id: i64, action: MenuAction) -> Reply {
        debug!(chat_id, "Handling action: {}", action);

        match action {
            MenuAction::AddSession => self.ask_session_name(chat_id).await,
            MenuAction::ListSessions => self.list_sessions(None).await,
            MenuAction::DeleteSession(id) => self.delete_session(id).await,
            MenuAction::ToggleSession(id) => self.toggle_session(id).await,
            MenuAction::StartCollect => self.start_collect().await,
            MenuAction::PauseCollect => self.pause_collect().await,
            MenuAction::ResumeCollect => self.resume_collect().await,
            MenuAction::StopCollect => self.stop_collect().await,
            MenuAction::CollectStatus => self.collect_status().await,
            MenuAction::ViewLinks(page) => self.view_links(page).await,
            MenuAction::ExportLinks => {
                Reply::edit("📤 Choose what to export:").with_keyboard(export_menu())
            }
            MenuAction::ExportTelegram => self.export(LinkFilter::platform(Platform::Telegram)).await,
            MenuAction::ExportWhatsApp => self.export(LinkFilter::platform(Platform::WhatsApp)).await,
            MenuAction::ExportAll => self.export(LinkFilter::all()).await,
            MenuAction::Back => {
                self.awaiting_session.lock().await.remove(&chat_id);
                Reply::edit("🤖 Choose an action:").with_keyboard(main_menu())
            }
        }
    }

    /// Handles a plain text message.
    ///
    /// When the chat was asked for a session name the text is registered
    /// as one; otherwise the main menu is shown again.
    pub async fn handle_text(&self, chat_id: i64, text: &str) -> Reply {
        let awaiting = self.awaiting_session.lock().await.remove(&chat_id);
        if !awaiting {
            return Reply::message("👋 Use the buttons to control the bot.").with_keyboard(main_menu());
        }

        let name = text.trim();
        match self.sessions.validate_and_add(name).await {
            Ok(added) => {
                let mut reply = format!("✅ Session {name} added (id {}).", added.id);
                match added.account {
                    Some(account) => {
                        let _ = write!(
                            reply,
                            "\n\nPhone: {}\nUsername: {}",
                            account.phone.as_deref().unwrap_or("unknown"),
                            account
                                .username
                                .as_deref()
                                .map_or_else(|| "unknown".to_owned(), |u| format!("@{u}")),
                        );
                    }
                    None => reply.push_str("\n\n⚠️ Account details could not be read."),
                }
                Reply::message(reply).with_keyboard(main_menu())
            }
            Err(e) => {
                warn!(chat_id, "Failed to add session {name}: {e}");
                Reply::message(format!("❌ Failed to add session: {e}")).with_keyboard(main_menu())
            }
        }
    }

    /// Extracts and stores the links of an uploaded file.
    pub async fn handle_upload(&self, chat_id: i64, path: &Path) -> Reply {
        let report = process_file(path, &self.options.blacklist).await;
        if let Some(error) = &report.error {
            return Reply::message(format!("❌ Could not read {}: {error}", report.file_name))
                .with_keyboard(main_menu());
        }

        let added = match import_report(&self.db, &report).await {
            Ok(added) => added,
            Err(e) => {
                warn!(chat_id, "Failed to import {}: {e}", report.file_name);
                return Reply::message(format!("❌ Failed to save links: {e}")).with_keyboard(main_menu());
            }
        };

        info!(chat_id, "Imported {} new links from {}", added, report.file_name);
        Reply::message(format!(
            "📂 {}\n\nURLs found: {}\nCollectable: {} (Telegram {}, WhatsApp {})\nIgnored: {}\nNew links saved: {}",
            report.file_name,
            report.total_found,
            report.valid(),
            report.telegram,
            report.whatsapp,
            report.ignored,
            added,
        ))
        .with_keyboard(main_menu())
    }

    async fn ask_session_name(&self, chat_id: i64) -> Reply {
        self.awaiting_session.lock().await.insert(chat_id);
        Reply::edit(format!(
            "📥 Send the session name.\n\nThe file {}/<name>.session must exist; \
             create it with `link_collector login <name>`.",
            self.options.sessions_dir.display()
        ))
        .with_keyboard(back_menu())
    }

    async fn list_sessions(&self, note: Option<String>) -> Reply {
        let sessions = match self.db.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => return storage_failure(&e),
        };

        if sessions.is_empty() {
            return Reply::edit("📭 No sessions added yet.").with_keyboard(main_menu());
        }

        let mut text = note.map(|n| format!("{n}\n\n")).unwrap_or_default();
        text.push_str("👥 Sessions:\n\n");
        let mut keyboard: Keyboard = Vec::with_capacity(sessions.len() + 1);

        for session in &sessions {
            let _ = writeln!(
                text,
                "{} {} (id {}, {})",
                if session.is_active { "🟢" } else { "⚪" },
                session.label(),
                session.id,
                session.session_name,
            );
            keyboard.push(session_buttons(session));
        }
        keyboard.push(vec![Button::new("🔙 Back", MenuAction::Back)]);

        Reply::edit(text).with_keyboard(keyboard)
    }

    async fn delete_session(&self, id: i64) -> Reply {
        match self.sessions.remove(id).await {
            Ok(true) => self.list_sessions(Some("✅ Session deleted.".to_owned())).await,
            Ok(false) => Reply::edit("❌ Session not found.").with_keyboard(back_menu()),
            Err(e) => Reply::edit(format!("❌ Failed to delete session: {e}")).with_keyboard(back_menu()),
        }
    }

    async fn toggle_session(&self, id: i64) -> Reply {
        match self.sessions.toggle(id).await {
            Ok(Some(active)) => {
                let note = if active {
                    "🟢 Session enabled."
                } else {
                    "⚪ Session disabled."
                };
                self.list_sessions(Some(note.to_owned())).await
            }
            Ok(None) => Reply::edit("❌ Session not found.").with_keyboard(back_menu()),
            Err(e) => Reply::edit(format!("❌ Failed to update session: {e}")).with_keyboard(back_menu()),
        }
    }

    async fn start_collect(&self) -> Reply {
        match self.collector.start().await {
            Ok(count) => Reply::edit(format!(
                "🚀 Collection started with {count} session(s).\n\n\
                 Group history is scanned first, then new messages are polled.\n\
                 Attached text files, archives and databases are read too.\n\
                 Telegram group links and recent WhatsApp group links are saved."
            ))
            .with_keyboard(collection_menu()),
            Err(CollectorError::AlreadyRunning) => {
                Reply::edit("⚠️ Collection is already running.").with_keyboard(collection_menu())
            }
            Err(CollectorError::NoActiveSessions) => {
                Reply::edit("📭 No active sessions. Add or enable a session first.")
                    .with_keyboard(main_menu())
            }
            Err(e) => Reply::edit(format!("❌ Failed to start collection: {e}")).with_keyboard(main_menu()),
        }
    }

    async fn pause_collect(&self) -> Reply {
        match self.collector.pause().await {
            Ok(()) => Reply::edit("⏸️ Collection paused.").with_keyboard(collection_menu()),
            Err(e) => not_running(&e),
        }
    }

    async fn resume_collect(&self) -> Reply {
        match self.collector.resume().await {
            Ok(()) => Reply::edit("▶️ Collection resumed.").with_keyboard(collection_menu()),
            Err(e) => not_running(&e),
        }
    }

    async fn stop_collect(&self) -> Reply {
        match self.collector.stop().await {
            Ok(stats) => Reply::edit(format!(
                "⏹️ Collection stopped.\n\nTelegram links: {}\nWhatsApp links: {}\nMessages read: {}\nErrors: {}",
                stats.telegram, stats.whatsapp, stats.messages, stats.errors
            ))
            .with_keyboard(main_menu()),
            Err(e) => not_running(&e),
        }
    }

    async fn collect_status(&self) -> Reply {
        let status = self.collector.status().await;
        let stats = self.collector.stats();

        let mut text = format!(
            "📈 Collector: {status}\n\nThis run:\n• Telegram: {}\n• WhatsApp: {}\n• Groups scanned: {}\n• Messages read: {}\n• Errors: {}",
            stats.telegram, stats.whatsapp, stats.dialogs, stats.messages, stats.errors
        );
        if let Ok(totals) = self.db.link_stats().await {
            let _ = write!(
                text,
                "\n\nStored links: {} ({} active)",
                totals.total, totals.active
            );
        }

        Reply::edit(text).with_keyboard(collection_menu())
    }

    async fn view_links(&self, page: u32) -> Reply {
        let per_page = i64::from(self.options.links_per_page);
        let offset = i64::from(page) * per_page;

        let (links, total, stats) = match tokio::try_join!(
            self.db.list_links(LinkFilter::all(), per_page, offset),
            self.db.count_links(LinkFilter::all()),
            self.db.link_stats(),
        ) {
            Ok(result) => result,
            Err(e) => return storage_failure(&e),
        };

        if total == 0 {
            return Reply::edit("📭 No links collected yet.").with_keyboard(main_menu());
        }
        if links.is_empty() {
            return Reply::edit("📭 No links on this page.").with_keyboard(vec![vec![Button::new(
                "⬅️ First page",
                MenuAction::ViewLinks(0),
            )]]);
        }

        let pages = (total + per_page - 1) / per_page;
        let mut text = format!("🔗 Collected links (page {}/{pages}):\n\n", page + 1);
        for link in &links {
            let _ = writeln!(text, "• {}", link.url);
        }
        let _ = write!(
            text,
            "\n📊 Total: {} | Telegram: {} | WhatsApp: {}",
            stats.total,
            stats.platform_count(Platform::Telegram),
            stats.platform_count(Platform::WhatsApp),
        );

        let mut nav = Vec::new();
        if page > 0 {
            nav.push(Button::new("⬅️ Previous", MenuAction::ViewLinks(page - 1)));
        }
        if i64::from(page) + 1 < pages {
            nav.push(Button::new("Next ➡️", MenuAction::ViewLinks(page + 1)));
        }

        let mut keyboard = Vec::new();
        if !nav.is_empty() {
            keyboard.push(nav);
        }
        keyboard.push(vec![
            Button::new("📤 Export", MenuAction::ExportLinks),
            Button::new("🔙 Back", MenuAction::Back),
        ]);

        Reply::edit(text).with_keyboard(keyboard)
    }

    async fn export(&self, filter: LinkFilter) -> Reply {
        match self.db.export_links(filter, &self.options.exports_dir).await {
            Ok(Some(path)) => Reply::edit("✅ Export ready.")
                .with_keyboard(main_menu())
                .with_document(path),
            Ok(None) => Reply::edit("📭 No links to export.").with_keyboard(export_menu()),
            Err(e) => Reply::edit(format!("❌ Export failed: {e}")).with_keyboard(main_menu()),
        }
    }
}

fn session_buttons(session: &SessionRecord) -> Vec<Button> {
    let toggle_label = if session.is_active {
        format!("⏸ Disable {}", session.session_name)
    } else {
        format!("▶ Enable {}", session.session_name)
    };
    vec![
        Button::new(toggle_label, MenuAction::ToggleSession(session.id)),
        Button::new(
            format!("🗑️ Delete {}", session.session_name),
            MenuAction::DeleteSession(session.id),
        ),
    ]
}

fn not_running(error: &CollectorError) -> Reply {
    Reply::edit(format!("⚠️ {error}.")).with_keyboard(main_menu())
}

fn storage_failure(error: &impl std::fmt::Display) -> Reply {
    Reply::edit(format!("❌ Database error: {error}")).with_keyboard(main_menu())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::collector::CollectorConfig;
    use crate::storage::{NewLink, NewSession};
    use crate::telegram::{AccountInfo, MessageSource, SourceConnector, TelegramError};
    use crate::links::LinkType;

    struct NoProbe;

    #[async_trait]
    impl AccountProbe for NoProbe {
        async fn probe(&self, _session_file: &Path) -> Result<Option<AccountInfo>, TelegramError> {
            Ok(Some(AccountInfo {
                user_id: 1,
                username: Some("collector".to_owned()),
                phone: Some("15550001111".to_owned()),
                first_name: None,
            }))
        }
    }

    struct OfflineConnector;

    #[async_trait]
    impl SourceConnector for OfflineConnector {
        async fn connect(&self, _session: &SessionRecord) -> Result<Box<dyn MessageSource>, TelegramError> {
            Err(TelegramError::Connection("offline".to_owned()))
        }
    }

    struct Fixture {
        handler: CommandHandler<NoProbe>,
        db: Database,
        dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sessions_dir = dir.path().join("sessions");
        std::fs::create_dir(&sessions_dir).unwrap();

        let db = Database::open_in_memory().await.unwrap();
        let collector = Arc::new(Collector::new(
            db.clone(),
            Arc::new(OfflineConnector),
            CollectorConfig::default(),
        ));
        let options = HandlerOptions {
            links_per_page: 2,
            exports_dir: dir.path().join("exports"),
            sessions_dir: sessions_dir.clone(),
            blacklist: Vec::new(),
        };
        let handler = CommandHandler::new(
            db.clone(),
            collector,
            SessionManager::new(db.clone(), sessions_dir, NoProbe),
            options,
        );

        Fixture { handler, db, dir }
    }

    fn actions(reply: &Reply) -> Vec<MenuAction> {
        reply
            .keyboard
            .iter()
            .flatten()
            .flatten()
            .map(|b| b.action)
            .collect()
    }

    #[tokio::test]
    async fn test_add_session_flow() {
        let f = fixture().await;
        std::fs::write(f.dir.path().join("sessions/main.session"), b"").unwrap();

        let plain = f.handler.handle_text(5, "main").await;
        assert!(plain.text.contains("Use the buttons"));
        assert_eq!(f.db.session_counts().await.unwrap().total, 0);

        let prompt = f.handler.handle_action(5, MenuAction::AddSession).await;
        assert!(prompt.edit);
        assert!(prompt.text.contains("session name"));

        let added = f.handler.handle_text(5, " main ").await;
        assert!(added.text.contains("✅"), "{}", added.text);
        assert!(added.text.contains("@collector"));
        assert_eq!(f.db.session_counts().await.unwrap().total, 1);

        // The prompt is consumed by the first answer.
        let again = f.handler.handle_text(5, "main").await;
        assert!(again.text.contains("Use the buttons"));
    }

    #[tokio::test]
    async fn test_add_session_missing_file() {
        let f = fixture().await;
        f.handler.handle_action(1, MenuAction::AddSession).await;

        let reply = f.handler.handle_text(1, "ghost").await;
        assert!(reply.text.contains("❌"));
        assert!(reply.text.contains("not found"));
    }

    #[tokio::test]
    async fn test_list_toggle_delete_sessions() {
        let f = fixture().await;
        let empty = f.handler.handle_action(1, MenuAction::ListSessions).await;
        assert!(empty.text.contains("No sessions"));

        let id = f.db.add_session(&NewSession::named("main")).await.unwrap();

        let list = f.handler.handle_action(1, MenuAction::ListSessions).await;
        assert!(list.text.contains("main"));
        assert!(actions(&list).contains(&MenuAction::DeleteSession(id)));

        let toggled = f.handler.handle_action(1, MenuAction::ToggleSession(id)).await;
        assert!(toggled.text.contains("disabled"));
        assert!(!f.db.get_session(id).await.unwrap().unwrap().is_active);

        let deleted = f.handler.handle_action(1, MenuAction::DeleteSession(id)).await;
        assert!(deleted.text.contains("deleted") || deleted.text.contains("No sessions"));
        assert!(f.db.get_session(id).await.unwrap().is_none());

        let missing = f.handler.handle_action(1, MenuAction::DeleteSession(id)).await;
        assert!(missing.text.contains("not found"));
    }

    #[tokio::test]
    async fn test_collection_controls_without_sessions() {
        let f = fixture().await;

        let start = f.handler.handle_action(1, MenuAction::StartCollect).await;
        assert!(start.text.contains("No active sessions"));

        let stop = f.handler.handle_action(1, MenuAction::StopCollect).await;
        assert!(stop.text.contains("not running"));

        let status = f.handler.handle_action(1, MenuAction::CollectStatus).await;
        assert!(status.text.contains("idle"));
    }

    #[tokio::test]
    async fn test_view_links_paging() {
        let f = fixture().await;
        let empty = f.handler.handle_action(1, MenuAction::ViewLinks(0)).await;
        assert!(empty.text.contains("No links"));

        for name in ["one_chat", "two_chat", "three_chat"] {
            f.db.save_link(&NewLink::new(
                format!("https://t.me/{name}"),
                Platform::Telegram,
                LinkType::Channel,
            ))
            .await
            .unwrap();
        }

        let first = f.handler.handle_action(1, MenuAction::ViewLinks(0)).await;
        assert!(first.text.contains("page 1/2"));
        assert!(first.text.contains("three_chat"));
        assert!(actions(&first).contains(&MenuAction::ViewLinks(1)));
        assert!(!actions(&first).iter().any(|a| *a == MenuAction::ViewLinks(0)));

        let second = f.handler.handle_action(1, MenuAction::ViewLinks(1)).await;
        assert!(second.text.contains("one_chat"));
        assert!(actions(&second).contains(&MenuAction::ViewLinks(0)));
    }

    #[tokio::test]
    async fn test_export_sends_document() {
        let f = fixture().await;

        let nothing = f.handler.handle_action(1, MenuAction::ExportWhatsApp).await;
        assert!(nothing.document.is_none());

        f.db.save_link(&NewLink::new(
            "https://chat.whatsapp.com/AbCdEf123456",
            Platform::WhatsApp,
            LinkType::Group,
        ))
        .await
        .unwrap();

        let reply = f.handler.handle_action(1, MenuAction::ExportWhatsApp).await;
        let path = reply.document.unwrap();
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "https://chat.whatsapp.com/AbCdEf123456\n"
        );
    }

    #[tokio::test]
    async fn test_upload_imports_links() {
        let f = fixture().await;
        let path = f.dir.path().join("links.txt");
        std::fs::write(&path, "t.me/rustlang https://example.com").unwrap();

        let reply = f.handler.handle_upload(1, &path).await;
        assert!(reply.text.contains("New links saved: 1"), "{}", reply.text);
        assert!(f.db.link_exists("https://t.me/rustlang").await.unwrap());

        let bad = f.dir.path().join("photo.jpg");
        std::fs::write(&bad, b"\xff\xd8").unwrap();
        assert!(f.handler.handle_upload(1, &bad).await.text.contains("❌"));
    }
}

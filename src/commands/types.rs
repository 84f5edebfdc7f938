//! Menu actions, keyboards and replies.

use std::fmt;
use std::path::PathBuf;

/// Actions carried by inline buttons as callback data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    /// Ask for a session name to register.
    AddSession,

    /// List registered sessions with their controls.
    ListSessions,

    /// Delete a session record.
    DeleteSession(i64),

    /// Enable or disable a session for collection.
    ToggleSession(i64),

    StartCollect,
    PauseCollect,
    ResumeCollect,
    StopCollect,

    /// Show collector state and counters.
    CollectStatus,

    /// Show one page of collected links (0-based).
    ViewLinks(u32),

    /// Show the export choices.
    ExportLinks,

    ExportTelegram,
    ExportWhatsApp,
    ExportAll,

    /// Return to the main menu.
    Back,
}

impl MenuAction {
    /// Parses callback data.
    ///
    /// Returns `None` for unknown data.
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        let data = data.trim();

        let simple = match data {
            "add_session" => Some(Self::AddSession),
            "list_sessions" => Some(Self::ListSessions),
            "start_collect" => Some(Self::StartCollect),
            "pause_collect" => Some(Self::PauseCollect),
            "resume_collect" => Some(Self::ResumeCollect),
            "stop_collect" => Some(Self::StopCollect),
            "collect_status" => Some(Self::CollectStatus),
            "view_links" => Some(Self::ViewLinks(0)),
            "export_links" => Some(Self::ExportLinks),
            "export_telegram" => Some(Self::ExportTelegram),
            "export_whatsapp" => Some(Self::ExportWhatsApp),
            "export_all" => Some(Self::ExportAll),
            "back" => Some(Self::Back),
            _ => None,
        };
        if simple.is_some() {
            return simple;
        }

        if let Some(page) = data.strip_prefix("view_links_") {
            return page.parse().ok().map(Self::ViewLinks);
        }
        if let Some(id) = data.strip_prefix("delete_") {
            return id.parse().ok().map(Self::DeleteSession);
        }
        if let Some(id) = data.strip_prefix("toggle_") {
            return id.parse().ok().map(Self::ToggleSession);
        }

        None
    }

    /// Encodes the action as callback data.
    #[must_use]
    pub fn data(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MenuAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddSession => f.write_str("add_session"),
            Self::ListSessions => f.write_str("list_sessions"),
            Self::DeleteSession(id) => write!(f, "delete_{id}"),
            Self::ToggleSession(id) => write!(f, "toggle_{id}"),
            Self::StartCollect => f.write_str("start_collect"),
            Self::PauseCollect => f.write_str("pause_collect"),
            Self::ResumeCollect => f.write_str("resume_collect"),
            Self::StopCollect => f.write_str("stop_collect"),
            Self::CollectStatus => f.write_str("collect_status"),
            Self::ViewLinks(page) => write!(f, "view_links_{page}"),
            Self::ExportLinks => f.write_str("export_links"),
            Self::ExportTelegram => f.write_str("export_telegram"),
            Self::ExportWhatsApp => f.write_str("export_whatsapp"),
            Self::ExportAll => f.write_str("export_all"),
            Self::Back => f.write_str("back"),
        }
    }
}

/// One inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: MenuAction,
}

impl Button {
    #[must_use]
    pub fn new(label: impl Into<String>, action: MenuAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// Rows of inline buttons.
pub type Keyboard = Vec<Vec<Button>>;

/// The main menu.
#[must_use]
pub fn main_menu() -> Keyboard {
    vec![
        vec![Button::new("➕ Add session", MenuAction::AddSession)],
        vec![Button::new("👥 Sessions", MenuAction::ListSessions)],
        vec![
            Button::new("▶️ Start collecting", MenuAction::StartCollect),
            Button::new("⏹️ Stop", MenuAction::StopCollect),
        ],
        vec![Button::new("📈 Collection status", MenuAction::CollectStatus)],
        vec![Button::new("📊 View links", MenuAction::ViewLinks(0))],
        vec![Button::new("📤 Export links", MenuAction::ExportLinks)],
    ]
}

/// Controls shown while a collection is running.
#[must_use]
pub fn collection_menu() -> Keyboard {
    vec![
        vec![
            Button::new("⏸️ Pause", MenuAction::PauseCollect),
            Button::new("▶️ Resume", MenuAction::ResumeCollect),
        ],
        vec![
            Button::new("⏹️ Stop", MenuAction::StopCollect),
            Button::new("📈 Status", MenuAction::CollectStatus),
        ],
        back_row(),
    ]
}

/// Export choices.
#[must_use]
pub fn export_menu() -> Keyboard {
    vec![
        vec![Button::new("📨 Telegram", MenuAction::ExportTelegram)],
        vec![Button::new("📞 WhatsApp", MenuAction::ExportWhatsApp)],
        vec![Button::new("📦 All", MenuAction::ExportAll)],
        back_row(),
    ]
}

/// A keyboard with only the back button.
#[must_use]
pub fn back_menu() -> Keyboard {
    vec![back_row()]
}

fn back_row() -> Vec<Button> {
    vec![Button::new("🔙 Back", MenuAction::Back)]
}

/// Response to a user interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,

    /// File to send along with the reply.
    pub document: Option<PathBuf>,

    /// Whether to edit the message the button belongs to instead of
    /// sending a new one.
    pub edit: bool,
}

impl Reply {
    /// A new message.
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
            document: None,
            edit: false,
        }
    }

    /// An edit of the message the pressed button belongs to.
    #[must_use]
    pub fn edit(text: impl Into<String>) -> Self {
        Self {
            edit: true,
            ..Self::message(text)
        }
    }

    #[must_use]
    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    #[must_use]
    pub fn with_document(mut self, path: PathBuf) -> Self {
        self.document = Some(path);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_actions() {
        assert_eq!(MenuAction::parse("add_session"), Some(MenuAction::AddSession));
        assert_eq!(MenuAction::parse("stop_collect"), Some(MenuAction::StopCollect));
        assert_eq!(MenuAction::parse(" back "), Some(MenuAction::Back));
        assert_eq!(MenuAction::parse("view_links"), Some(MenuAction::ViewLinks(0)));
    }

    #[test]
    fn test_parse_actions_with_ids() {
        assert_eq!(MenuAction::parse("delete_12"), Some(MenuAction::DeleteSession(12)));
        assert_eq!(MenuAction::parse("toggle_3"), Some(MenuAction::ToggleSession(3)));
        assert_eq!(MenuAction::parse("view_links_4"), Some(MenuAction::ViewLinks(4)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(MenuAction::parse("delete_"), None);
        assert_eq!(MenuAction::parse("delete_abc"), None);
        assert_eq!(MenuAction::parse("view_links_-1"), None);
        assert_eq!(MenuAction::parse("accounts"), None);
    }

    #[test]
    fn test_data_parses_back() {
        for action in [
            MenuAction::DeleteSession(7),
            MenuAction::ViewLinks(2),
            MenuAction::ExportWhatsApp,
            MenuAction::CollectStatus,
        ] {
            assert_eq!(MenuAction::parse(&action.data()), Some(action));
        }
    }

    #[test]
    fn test_main_menu_actions() {
        let actions: Vec<MenuAction> = main_menu().into_iter().flatten().map(|b| b.action).collect();
        assert!(actions.contains(&MenuAction::AddSession));
        assert!(actions.contains(&MenuAction::ExportLinks));
    }
}

//! Multi-session link collection engine.
//!
//! [`Collector`] runs one task per active session and broadcasts
//! start/pause/resume/stop through a `watch` channel. Every task owns a
//! collection log that is closed when the task ends.

mod runner;
mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

pub use runner::{LinkCounts, MessageContext, process_attachment, process_message};
pub use state::{CollectionStats, CollectorStatus, RunState};

use runner::SessionTask;
use state::StatsCounter;

use crate::config::Settings;
use crate::storage::{CollectionStatus, Database, StorageError};
use crate::telegram::{SourceConnector, TelegramError};

/// Messages requested per history page.
pub const HISTORY_PAGE_SIZE: i32 = 100;

/// How long `stop` waits for session tasks before aborting them.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Attached documents larger than this are not downloaded.
pub const MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

/// Errors raised by the collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Collection is already running")]
    AlreadyRunning,

    #[error("Collection is not running")]
    NotRunning,

    #[error("No active sessions")]
    NoActiveSessions,

    #[error("Session {0} is not authorized")]
    Unauthorized(i64),

    #[error("Collection stopped")]
    Interrupted,

    #[error("Cannot read attachment {file_name}: {reason}")]
    Attachment { file_name: String, reason: String },

    #[error(transparent)]
    Telegram(#[from] TelegramError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tuning of a collection run.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Pause between polling cycles.
    pub collection_interval: Duration,

    /// WhatsApp links older than this are ignored.
    pub whatsapp_max_age: TimeDelta,

    pub blacklist: Vec<String>,
    pub history_page_size: i32,
    pub stop_timeout: Duration,

    /// Where attached documents are downloaded to while they are scanned.
    pub temp_dir: PathBuf,
    pub max_attachment_bytes: u64,
}

impl CollectorConfig {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            collection_interval: Duration::from_secs(settings.collection_interval_secs),
            whatsapp_max_age: TimeDelta::days(settings.whatsapp_max_age_days),
            blacklist: settings.blacklisted_domains.clone(),
            temp_dir: settings.temp_dir.clone(),
            ..Self::default()
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(300),
            whatsapp_max_age: TimeDelta::days(180),
            blacklist: Vec::new(),
            history_page_size: HISTORY_PAGE_SIZE,
            stop_timeout: STOP_TIMEOUT,
            temp_dir: PathBuf::from("temp"),
            max_attachment_bytes: MAX_ATTACHMENT_BYTES,
        }
    }
}

struct SessionHandle {
    session_id: i64,
    log_id: i64,
    task: JoinHandle<()>,
}

struct ActiveRun {
    control: watch::Sender<RunState>,
    tasks: Vec<SessionHandle>,
}

impl ActiveRun {
    fn is_alive(&self) -> bool {
        self.tasks.iter().any(|t| !t.task.is_finished())
    }
}

/// Link collection engine shared by the bot and the CLI.
pub struct Collector {
    db: Database,
    connector: Arc<dyn SourceConnector>,
    config: Arc<CollectorConfig>,
    stats: Arc<StatsCounter>,
    active: Mutex<Option<ActiveRun>>,
}

impl Collector {
    #[must_use]
    pub fn new(db: Database, connector: Arc<dyn SourceConnector>, config: CollectorConfig) -> Self {
        Self {
            db,
            connector,
            config: Arc::new(config),
            stats: Arc::new(StatsCounter::default()),
            active: Mutex::new(None),
        }
    }

    /// Starts one collection task per active session.
    ///
    /// Returns the number of sessions started.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::AlreadyRunning`] while a run is alive,
    /// [`CollectorError::NoActiveSessions`] when no session is enabled.
    pub async fn start(&self) -> Result<usize, CollectorError> {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(ActiveRun::is_alive) {
            return Err(CollectorError::AlreadyRunning);
        }

        let sessions = self.db.list_active_sessions().await?;
        if sessions.is_empty() {
            return Err(CollectorError::NoActiveSessions);
        }

        // All logs are opened before any task is spawned.
        let mut logged = Vec::with_capacity(sessions.len());
        for session in sessions {
            match self.db.start_collection_log(session.id).await {
                Ok(log_id) => logged.push((session, log_id)),
                Err(e) => {
                    self.close_logs(logged.iter().map(|(_, log_id)| *log_id), CollectionStatus::Failed)
                        .await;
                    return Err(e.into());
                }
            }
        }

        self.stats.reset();
        let (control, _) = watch::channel(RunState::Running);

        let mut tasks = Vec::with_capacity(logged.len());
        for (session, log_id) in logged {
            let session_id = session.id;
            let task = SessionTask {
                db: self.db.clone(),
                connector: Arc::clone(&self.connector),
                session,
                log_id,
                config: Arc::clone(&self.config),
                control: control.subscribe(),
                stats: Arc::clone(&self.stats),
                caught_up: false,
            };
            tasks.push(SessionHandle {
                session_id,
                log_id,
                task: tokio::spawn(task.run()),
            });
        }

        let count = tasks.len();
        info!("Collection started with {} sessions", count);
        *active = Some(ActiveRun { control, tasks });
        Ok(count)
    }

    async fn close_logs(&self, log_ids: impl Iterator<Item = i64>, status: CollectionStatus) {
        for log_id in log_ids {
            if let Err(e) = self.db.finish_collection_log(log_id, status).await {
                warn!(log_id, "Failed to close collection log: {}", e);
            }
        }
    }

    /// Suspends every session task at its next checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::NotRunning`] when no run is alive.
    pub async fn pause(&self) -> Result<(), CollectorError> {
        self.signal(RunState::Paused).await?;
        info!("Collection paused");
        Ok(())
    }

    /// Resumes a paused run.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::NotRunning`] when no run is alive.
    pub async fn resume(&self) -> Result<(), CollectorError> {
        self.signal(RunState::Running).await?;
        info!("Collection resumed");
        Ok(())
    }

    async fn signal(&self, state: RunState) -> Result<(), CollectorError> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(run) if run.is_alive() => {
                run.control.send_replace(state);
                Ok(())
            }
            _ => Err(CollectorError::NotRunning),
        }
    }

    /// Stops the run and waits for its tasks.
    ///
    /// A task that finished its history pass closes its log as `completed`,
    /// one stopped before that as `stopped`. Tasks still busy after the stop
    /// timeout are aborted and their logs closed as `stopped`. Returns the final counters.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::NotRunning`] when no run is alive.
    pub async fn stop(&self) -> Result<CollectionStats, CollectorError> {
        let run = {
            let mut active = self.active.lock().await;
            match active.take() {
                Some(run) if run.is_alive() => run,
                _ => return Err(CollectorError::NotRunning),
            }
        };

        run.control.send_replace(RunState::Stopped);

        let deadline = Instant::now() + self.config.stop_timeout;
        for mut handle in run.tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle.task).await.is_ok() {
                continue;
            }

            warn!(session_id = handle.session_id, "Session task did not stop in time, aborting");
            handle.task.abort();
            if let Err(e) = self
                .db
                .finish_collection_log(handle.log_id, CollectionStatus::Stopped)
                .await
            {
                warn!(session_id = handle.session_id, "Failed to close collection log: {}", e);
            }
        }

        let stats = self.stats.snapshot();
        info!(
            "Collection stopped: {} Telegram, {} WhatsApp links",
            stats.telegram, stats.whatsapp
        );
        Ok(stats)
    }

    /// Current state of the collector.
    pub async fn status(&self) -> CollectorStatus {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(run) if run.is_alive() => {
                let state = *run.control.borrow();
                match state {
                    RunState::Paused => CollectorStatus::Paused,
                    RunState::Running | RunState::Stopped => CollectorStatus::Running,
                }
            }
            _ => CollectorStatus::Idle,
        }
    }

    /// Counters of the current or last run.
    #[must_use]
    pub fn stats(&self) -> CollectionStats {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! Startup launcher.
//!
//! [`Bootstrap::prepare`] runs the startup checks in a fixed order and
//! stops at the first fatal one:
//!
//! 1. required files exist (nothing is created when one is missing)
//! 2. runtime directories exist with mode 755
//! 3. the database opens, migrations apply, table sizes are reported
//! 4. required configuration is present
//! 5. the control bot token is valid
//! 6. session counts are reported (failures are only logged)
//! 7. host diagnostics are printed
//!
//! The returned [`Handoff`] then replaces the process with the bot.

mod diagnostics;

use std::error::Error as StdError;
use std::ffi::OsString;
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{error, info, warn};

pub use diagnostics::{Diagnostics, DiskUsage, human_bytes};

use crate::config::{ConfigError, RUNTIME_DIRECTORIES, Settings, TokenError};
use crate::storage::{Database, StorageError};

/// Mode applied to every runtime directory.
pub const DIRECTORY_MODE: u32 = 0o755;

/// Name of the bot executable the launcher hands off to.
pub const BOT_EXECUTABLE: &str = "link_collector";

/// Fatal startup failures. Every one of them exits with status 1.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Required files are missing: {}", display_paths(.0))]
    MissingFiles(Vec<PathBuf>),

    #[error("Failed to prepare directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database initialization failed: {0}")]
    Database(#[source] StorageError),

    #[error("Configuration initialization failed: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid bot token: {0}")]
    Token(#[from] TokenError),

    #[error("Failed to start {}: {source}", program.display())]
    Exec {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Formats an error with all of its sources.
#[must_use]
pub fn error_chain(error: &dyn StdError) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !chain.contains(&cause_text) {
            chain.push_str(": ");
            chain.push_str(&cause_text);
        }
        source = cause.source();
    }
    chain
}

/// Startup steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Files,
    Directories,
    Database,
    Config,
    Token,
    Sessions,
    Diagnostics,
    Handoff,
}

impl Stage {
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Files => "Checking required files",
            Self::Directories => "Preparing directories",
            Self::Database => "Initializing database",
            Self::Config => "Initializing configuration",
            Self::Token => "Validating bot token",
            Self::Sessions => "Checking sessions",
            Self::Diagnostics => "System information",
            Self::Handoff => "Starting bot",
        }
    }
}

/// Outcome marker of a progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Warn,
    Fail,
    Info,
}

/// Receives the launcher's human-facing progress.
pub trait Reporter {
    fn stage(&mut self, stage: Stage);
    fn report(&mut self, status: Status, message: &str);
}

/// What the launcher checks and what it starts.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Directory the runtime directories are created in; relative paths
    /// are resolved against it.
    pub base_dir: PathBuf,

    /// Files that must exist before anything is created.
    pub required_files: Vec<PathBuf>,

    /// Bot executable.
    pub program: PathBuf,

    /// Arguments passed to the bot executable.
    pub args: Vec<OsString>,
}

impl LaunchOptions {
    /// Options that start `link_collector run` located next to `launcher`.
    #[must_use]
    pub fn beside(launcher: &Path, base_dir: impl Into<PathBuf>) -> Self {
        let program = launcher.with_file_name(BOT_EXECUTABLE);
        Self {
            base_dir: base_dir.into(),
            required_files: vec![program.clone()],
            program,
            args: vec![OsString::from("run")],
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        // Absolute paths replace the base on join.
        self.base_dir.join(path)
    }
}

/// Process image the launcher replaces itself with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub current_dir: PathBuf,
}

impl Handoff {
    /// Replaces the current process. Only returns on failure.
    #[must_use]
    pub fn exec(self) -> BootstrapError {
        info!("Executing {}", self.program.display());
        let source = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.current_dir)
            .exec();
        BootstrapError::Exec {
            program: self.program,
            source,
        }
    }
}

/// Sequential startup procedure.
pub struct Bootstrap<'a, R> {
    options: &'a LaunchOptions,
    settings: &'a Settings,
    reporter: &'a mut R,
}

impl<'a, R: Reporter> Bootstrap<'a, R> {
    pub fn new(options: &'a LaunchOptions, settings: &'a Settings, reporter: &'a mut R) -> Self {
        Self {
            options,
            settings,
            reporter,
        }
    }

    /// Runs every stage before the hand-off.
    ///
    /// # Errors
    ///
    /// Returns the first fatal failure; later stages do not run.
    pub async fn prepare(mut self) -> Result<Handoff, BootstrapError> {
        self.check_required_files()?;
        self.prepare_directories()?;

        let db = self.init_database().await?;
        let result = self.check_settings();
        if result.is_ok() {
            self.report_sessions(&db).await;
        }
        db.close().await;
        result?;

        self.report_diagnostics();

        self.reporter.stage(Stage::Handoff);
        let handoff = Handoff {
            program: self.options.resolve(&self.options.program),
            args: self.options.args.clone(),
            current_dir: self.options.base_dir.clone(),
        };
        self.reporter.report(
            Status::Info,
            &format!("Handing off to {}", handoff.program.display()),
        );
        Ok(handoff)
    }

    fn check_required_files(&mut self) -> Result<(), BootstrapError> {
        self.reporter.stage(Stage::Files);

        let mut missing = Vec::new();
        for file in &self.options.required_files {
            let path = self.options.resolve(file);
            if path.is_file() {
                self.reporter.report(Status::Ok, &file.display().to_string());
            } else {
                self.reporter
                    .report(Status::Fail, &format!("{} not found", file.display()));
                missing.push(file.clone());
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            let err = BootstrapError::MissingFiles(missing);
            error!("{}", err);
            Err(err)
        }
    }

    fn prepare_directories(&mut self) -> Result<(), BootstrapError> {
        self.reporter.stage(Stage::Directories);

        for name in RUNTIME_DIRECTORIES {
            let path = self.options.base_dir.join(name);
            create_runtime_dir(&path).inspect_err(|e| {
                error!("{}", e);
                self.reporter.report(Status::Fail, &e.to_string());
            })?;
            self.reporter.report(Status::Ok, &format!("{name}/"));
        }

        Ok(())
    }

    async fn init_database(&mut self) -> Result<Database, BootstrapError> {
        self.reporter.stage(Stage::Database);

        let path = self.options.resolve(&self.settings.database_path);
        let opened = match Database::open(&path).await {
            Ok(db) => db.table_report().await.map(|tables| (db, tables)),
            Err(e) => Err(e),
        };

        match opened {
            Ok((db, tables)) => {
                self.reporter
                    .report(Status::Ok, &format!("Database ready: {}", path.display()));
                for table in tables {
                    self.reporter
                        .report(Status::Info, &format!("{}: {} rows", table.name, table.rows));
                }
                Ok(db)
            }
            Err(e) => {
                let err = BootstrapError::Database(e);
                let chain = error_chain(&err);
                error!("{}", chain);
                self.reporter.report(Status::Fail, &chain);
                Err(err)
            }
        }
    }

    fn check_settings(&mut self) -> Result<(), BootstrapError> {
        self.reporter.stage(Stage::Config);
        if let Err(e) = self.settings.init() {
            let err = BootstrapError::from(e);
            error!("{}", err);
            self.reporter.report(Status::Fail, &err.to_string());
            return Err(err);
        }
        self.reporter.report(Status::Ok, "Configuration loaded");

        self.reporter.stage(Stage::Token);
        match self.settings.bot_token() {
            Ok(token) => {
                self.reporter.report(
                    Status::Ok,
                    &format!("BOT_TOKEN set ({} characters)", token.chars().count()),
                );
                Ok(())
            }
            Err(e) => {
                let err = BootstrapError::from(e);
                error!("{}", err);
                self.reporter.report(Status::Fail, &err.to_string());
                Err(err)
            }
        }
    }

    async fn report_sessions(&mut self, db: &Database) {
        self.reporter.stage(Stage::Sessions);

        match db.session_counts().await {
            Ok(counts) => {
                let status = if counts.active > 0 {
                    Status::Ok
                } else {
                    Status::Warn
                };
                self.reporter.report(
                    status,
                    &format!("{} session(s), {} active", counts.total, counts.active),
                );
                if counts.active == 0 {
                    self.reporter.report(
                        Status::Info,
                        "Add a session from the bot menu before collecting",
                    );
                }
            }
            Err(e) => {
                warn!("Could not read sessions: {}", error_chain(&e));
                self.reporter
                    .report(Status::Warn, &format!("Could not read sessions: {e}"));
            }
        }
    }

    fn report_diagnostics(&mut self) {
        self.reporter.stage(Stage::Diagnostics);

        let diagnostics = Diagnostics::collect(&self.options.base_dir);
        self.reporter
            .report(Status::Info, &format!("Version: {}", diagnostics.version));
        self.reporter.report(
            Status::Info,
            &format!("Platform: {} ({})", diagnostics.os, diagnostics.arch),
        );
        match diagnostics.disk {
            Some(disk) => self.reporter.report(Status::Info, &format!("Disk: {disk}")),
            None => self.reporter.report(Status::Warn, "Disk usage unavailable"),
        }
    }
}

/// Creates a directory (and parents) and sets it to [`DIRECTORY_MODE`].
///
/// # Errors
///
/// Returns an error if the directory cannot be created or its mode set.
pub fn create_runtime_dir(path: &Path) -> Result<(), BootstrapError> {
    let wrap = |source| BootstrapError::Directory {
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(path).map_err(wrap)?;
    std::fs::set_permissions(path, Permissions::from_mode(DIRECTORY_MODE)).map_err(wrap)
}

//! Link Collector - Main Entry Point
//!
//! Runs the control bot with the collection engine, and offers operator
//! subcommands for logging in sessions, inspecting the database,
//! exporting links and scanning files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input, Password};
use qrcode::QrCode;
use qrcode::render::unicode::Dense1x2;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use link_collector::bot;
use link_collector::collector::{Collector, CollectorConfig, CollectorError};
use link_collector::commands::{CommandHandler, HandlerOptions};
use link_collector::config::Settings;
use link_collector::files::{import_report, process_directory, process_file};
use link_collector::links::{LinkType, Platform};
use link_collector::sessions::{SessionError, SessionManager, TelegramProbe};
use link_collector::storage::{Database, LinkFilter, StorageError};
use link_collector::telegram::{
    GrammersConnector, QrAuthResult, SessionClient, TelegramError, mask_phone, session_file,
};

/// File the log is appended to inside the log directory.
const LOG_FILE_NAME: &str = "link_collector.log";

/// Seconds between QR login polls.
const QR_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Telegram/WhatsApp group link collector.
#[derive(Parser, Debug)]
#[command(name = "link_collector")]
#[command(about = "Collect Telegram and WhatsApp group links through user sessions")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env", global = true)]
    env_file: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run the control bot and the collector (default).
    Run,

    /// Log in a user session and register it for collection.
    Login {
        /// Session name; the file is stored as `<SESSIONS_DIR>/<name>.session`.
        name: String,

        /// Log in by scanning a QR code instead of entering a login code.
        #[arg(long)]
        qr: bool,
    },

    /// List registered sessions.
    Sessions,

    /// Show link statistics and recent collection runs.
    Stats {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write collected links to a text file.
    Export {
        /// Only export links of this platform (telegram, whatsapp).
        #[arg(short, long)]
        platform: Option<Platform>,

        /// Only export links of this type (e.g. public_group, group).
        #[arg(short = 't', long)]
        link_type: Option<LinkType>,

        /// Output directory (defaults to EXPORTS_DIR).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract links from a file or directory.
    Scan {
        /// File or directory to scan.
        path: PathBuf,

        /// Descend into subdirectories.
        #[arg(short, long)]
        recursive: bool,

        /// Save the collectable links to the database.
        #[arg(long)]
        import: bool,

        /// Print the file reports as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_loaded = dotenvy::from_path(&args.env_file);
    let settings = Settings::from_env().context("Failed to load settings from environment")?;

    init_logging(&args.log_level, &settings.logs_dir);

    if let Err(e) = env_loaded {
        debug!("Could not load .env file ({}): {}", args.env_file.display(), e);
    }

    match args.command.unwrap_or(CliCommand::Run) {
        CliCommand::Run => run(settings).await,
        CliCommand::Login { name, qr } => login(&settings, &name, qr).await,
        CliCommand::Sessions => list_sessions(&settings).await,
        CliCommand::Stats { json } => show_stats(&settings, json).await,
        CliCommand::Export {
            platform,
            link_type,
            output,
        } => export(&settings, platform, link_type, output).await,
        CliCommand::Scan {
            path,
            recursive,
            import,
            json,
        } => scan(&settings, &path, recursive, import, json).await,
    }
}

/// Initializes tracing: `RUST_LOG` wins over the CLI level. Output goes to
/// stderr and, when the log directory exists, is appended to the log file.
fn init_logging(level: &str, logs_dir: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_file = logs_dir.is_dir().then(|| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(logs_dir.join(LOG_FILE_NAME))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match log_file {
        Some(Ok(file)) => builder
            .with_ansi(false)
            .with_writer(std::io::stderr.and(std::sync::Mutex::new(file)))
            .init(),
        Some(Err(e)) => {
            builder.init();
            warn!("Could not open log file in {}: {}", logs_dir.display(), e);
        }
        None => builder.init(),
    }
}

async fn open_database(settings: &Settings) -> Result<Database> {
    Database::open(&settings.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", settings.database_path.display()))
}

/// Runs the control bot until Ctrl+C, then stops any running collection.
async fn run(settings: Settings) -> Result<()> {
    let token = settings
        .bot_token()
        .context("A valid BOT_TOKEN is required to run the bot")?
        .to_owned();
    let (api_id, _) = settings
        .api_credentials()
        .context("API_ID and API_HASH are required for collection")?;

    let db = open_database(&settings).await?;

    let connector = Arc::new(GrammersConnector::new(
        settings.sessions_dir.clone(),
        api_id,
        Duration::from_millis(settings.request_delay_ms),
    ));
    let collector = Arc::new(Collector::new(
        db.clone(),
        connector,
        CollectorConfig::from_settings(&settings),
    ));
    let sessions = SessionManager::new(
        db.clone(),
        settings.sessions_dir.clone(),
        TelegramProbe::new(api_id),
    );
    let handler = Arc::new(CommandHandler::new(
        db.clone(),
        Arc::clone(&collector),
        sessions,
        HandlerOptions::from_settings(&settings),
    ));

    info!("Starting link collector bot");
    bot::run(&token, Arc::new(settings), handler).await;

    match collector.stop().await {
        Ok(stats) => info!(
            "Collection stopped: {} Telegram, {} WhatsApp links",
            stats.telegram, stats.whatsapp
        ),
        Err(CollectorError::NotRunning) => {}
        Err(e) => warn!("Failed to stop collection: {}", e),
    }

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Logs in a session interactively and registers it.
async fn login(settings: &Settings, name: &str, qr: bool) -> Result<()> {
    let (api_id, api_hash) = settings
        .api_credentials()
        .context("API_ID and API_HASH are required to log in")?;

    if !link_collector::sessions::is_valid_session_name(name) {
        bail!("Invalid session name {name:?}: use letters, digits, '_' or '-'");
    }

    std::fs::create_dir_all(&settings.sessions_dir).with_context(|| {
        format!("Failed to create {}", settings.sessions_dir.display())
    })?;
    let path = session_file(&settings.sessions_dir, name);

    let client = SessionClient::connect(&path, api_id, Duration::ZERO)
        .await
        .context("Failed to connect to Telegram")?;

    let result = authorize(&client, api_id, api_hash, qr).await;
    client.disconnect();
    drop(client);
    result?;

    let db = open_database(settings).await?;
    let manager = SessionManager::new(db.clone(), settings.sessions_dir.clone(), TelegramProbe::new(api_id));

    match manager.validate_and_add(name).await {
        Ok(added) => {
            println!("✓ Session {name} registered (id {})", added.id);
            if let Some(account) = added.account {
                println!(
                    "  Account: {} {}",
                    account.username.map_or_else(String::new, |u| format!("@{u}")),
                    account.phone.as_deref().map(mask_phone).unwrap_or_default()
                );
            }
        }
        Err(SessionError::Storage(StorageError::DuplicateSession(_))) => {
            println!("✓ Session {name} is already registered");
        }
        Err(e) => {
            db.close().await;
            return Err(e).context("Failed to register session");
        }
    }

    db.close().await;
    Ok(())
}

async fn authorize(client: &SessionClient, api_id: i32, api_hash: &str, qr: bool) -> Result<()> {
    if client.is_authorized().await? {
        info!("Session is already authorized");
        return Ok(());
    }

    if qr {
        qr_login(client, api_id, api_hash).await
    } else {
        phone_login(client, api_hash).await
    }
}

async fn phone_login(client: &SessionClient, api_hash: &str) -> Result<()> {
    let phone: String = Input::new()
        .with_prompt("Enter your phone number (with country code)")
        .interact_text()?;

    let token = client
        .request_login_code(&phone, api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()?;

    let mut password_token = match client.sign_in(&token, code.trim()).await {
        Ok(()) => return Ok(()),
        Err(TelegramError::PasswordRequired(password_token)) => password_token,
        Err(e) => return Err(e).context("Authentication failed"),
    };

    info!("Two-factor authentication is enabled");
    loop {
        info!("Password hint: {}", password_token.hint().unwrap_or("no hint"));

        let password: String = Password::new()
            .with_prompt("Enter your 2FA password")
            .interact()?;

        match client.check_password(password_token, &password).await {
            Ok(()) => return Ok(()),
            Err(TelegramError::InvalidPassword(token)) => {
                warn!("Wrong password");
                if !Confirm::new().with_prompt("Try again?").default(true).interact()? {
                    bail!("2FA authentication aborted");
                }
                password_token = token;
            }
            Err(e) => return Err(e).context("2FA authentication failed"),
        }
    }
}

/// Shows a login QR code and polls until it is scanned.
async fn qr_login(client: &SessionClient, api_id: i32, api_hash: &str) -> Result<()> {
    let mut shown: Option<Vec<u8>> = None;

    loop {
        match client.export_login_token(api_id, api_hash).await? {
            QrAuthResult::Token { token, expires } => {
                if shown.as_ref() != Some(&token) {
                    print_qr(&token)?;
                    debug!("QR token expires at {}", expires);
                    shown = Some(token);
                }
            }
            QrAuthResult::Success { user_id, username } => {
                info!(
                    "Signed in by QR as {} ({})",
                    username.as_deref().unwrap_or("unknown"),
                    user_id
                );
                return Ok(());
            }
            QrAuthResult::MigrateTo { dc_id } => {
                bail!("The account lives on DC {dc_id}; log in with a phone number instead");
            }
            QrAuthResult::PasswordRequired => {
                bail!("The account has 2FA enabled; log in with a phone number instead");
            }
        }

        tokio::time::sleep(QR_POLL_INTERVAL).await;
    }
}

fn print_qr(token: &[u8]) -> Result<()> {
    let url = format!("tg://login?token={}", URL_SAFE_NO_PAD.encode(token));
    let code = QrCode::new(url.as_bytes()).context("Failed to build QR code")?;
    let image = code.render::<Dense1x2>().quiet_zone(true).build();

    println!("\nScan this code in Telegram: Settings > Devices > Link Desktop Device\n");
    println!("{image}");
    Ok(())
}

async fn list_sessions(settings: &Settings) -> Result<()> {
    let db = open_database(settings).await?;
    let sessions = db.list_sessions().await?;
    db.close().await;

    if sessions.is_empty() {
        println!("No sessions registered.");
        return Ok(());
    }

    println!("{:<5} {:<20} {:<24} {:<8} LAST USED", "ID", "NAME", "ACCOUNT", "ACTIVE");
    for session in sessions {
        println!(
            "{:<5} {:<20} {:<24} {:<8} {}",
            session.id,
            session.session_name,
            session.label(),
            if session.is_active { "yes" } else { "no" },
            session
                .last_used
                .map_or_else(|| "never".to_owned(), |t| t.format("%Y-%m-%d %H:%M").to_string()),
        );
    }
    Ok(())
}

async fn show_stats(settings: &Settings, json: bool) -> Result<()> {
    let db = open_database(settings).await?;
    let stats = db.link_stats().await?;
    let sessions = db.session_counts().await?;
    let runs = db.recent_collection_logs(10).await?;
    db.close().await;

    if json {
        let value = serde_json::json!({
            "links": stats,
            "sessions": { "total": sessions.total, "active": sessions.active },
            "recent_runs": runs,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Links: {} total, {} active", stats.total, stats.active);
    for (platform, by_type) in [
        ("Telegram", &stats.telegram_by_type),
        ("WhatsApp", &stats.whatsapp_by_type),
    ] {
        let count: i64 = by_type.values().sum();
        println!("  {platform}: {count}");
        for (link_type, n) in by_type {
            println!("    {link_type}: {n}");
        }
    }
    println!("Sessions: {} total, {} active", sessions.total, sessions.active);

    if !runs.is_empty() {
        println!("\nRecent collection runs:");
        for run in runs {
            println!(
                "  #{} session {} {} [{}] telegram={} whatsapp={} errors={}",
                run.id,
                run.session_id.map_or_else(|| "-".to_owned(), |id| id.to_string()),
                run.started_at.format("%Y-%m-%d %H:%M"),
                run.status,
                run.telegram_count,
                run.whatsapp_count,
                run.errors_count,
            );
        }
    }
    Ok(())
}

async fn export(
    settings: &Settings,
    platform: Option<Platform>,
    link_type: Option<LinkType>,
    output: Option<PathBuf>,
) -> Result<()> {
    let filter = LinkFilter {
        platform,
        link_type,
    };
    let dir = output.unwrap_or_else(|| settings.exports_dir.clone());

    let db = open_database(settings).await?;
    let exported = db.export_links(filter, &dir).await;
    db.close().await;

    match exported.context("Export failed")? {
        Some(path) => println!("✓ Links exported to {}", path.display()),
        None => println!("No links match the filter."),
    }
    Ok(())
}

async fn scan(
    settings: &Settings,
    path: &Path,
    recursive: bool,
    import: bool,
    json: bool,
) -> Result<()> {
    let blacklist = &settings.blacklisted_domains;

    let reports = if path.is_dir() {
        let report = process_directory(path, recursive, blacklist)
            .await
            .with_context(|| format!("Failed to scan {}", path.display()))?;
        if !json {
            println!(
                "Files: {} total, {} processed, {} unsupported, {} failed",
                report.total_files, report.processed, report.unsupported, report.failed
            );
        }
        report.files
    } else {
        vec![process_file(path, blacklist).await]
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    for report in reports.iter().filter(|_| !json) {
        match &report.error {
            Some(error) => println!("✗ {}: {error}", report.file_name),
            None => println!(
                "✓ {} ({}): {} URLs, {} Telegram, {} WhatsApp, {} ignored",
                report.file_name,
                report.kind,
                report.total_found,
                report.telegram,
                report.whatsapp,
                report.ignored
            ),
        }
    }

    if import {
        let db = open_database(settings).await?;
        let mut added = 0;
        for report in &reports {
            match import_report(&db, report).await {
                Ok(n) => added += n,
                Err(e) => warn!("Failed to import {}: {}", report.file_name, e),
            }
        }
        db.close().await;
        println!("✓ {added} new links saved");
    } else if !json {
        for link in reports.iter().flat_map(|r| &r.links) {
            println!("{}", link.url);
        }
    }
    Ok(())
}

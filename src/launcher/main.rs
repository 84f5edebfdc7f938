//! Startup launcher for the link collector.
//!
//! Checks preconditions, prepares the runtime directories and database,
//! reports the state of the installation and then replaces itself with
//! `link_collector run`.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use crossterm::style::Stylize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use link_collector::bootstrap::{Bootstrap, LaunchOptions, Reporter, Stage, Status, error_chain};
use link_collector::config::Settings;

/// Prepares the environment and starts the link collector bot.
#[derive(Parser, Debug)]
#[command(name = "start_bot")]
#[command(about = "Checks the installation and starts the link collector bot")]
#[command(version)]
struct Args {
    /// Directory the runtime directories are created in.
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Files that must exist (relative to the base directory). Defaults to
    /// the bot executable.
    #[arg(long = "require", env = "REQUIRED_FILES", value_delimiter = ',')]
    required_files: Vec<PathBuf>,

    /// Bot executable to start. Defaults to `link_collector` next to this
    /// launcher.
    #[arg(long)]
    bot: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

/// Prints `✓`/`✗`/`!` progress lines.
struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn stage(&mut self, stage: Stage) {
        println!("\n{}", stage.title().bold());
    }

    fn report(&mut self, status: Status, message: &str) {
        match status {
            Status::Ok => println!("  {} {message}", "✓".green()),
            Status::Warn => println!("  {} {message}", "!".yellow()),
            Status::Fail => eprintln!("  {} {message}", "✗".red()),
            Status::Info => println!("    {message}"),
        }
    }
}

fn main() -> ExitCode {
    let argv: Vec<OsString> = std::env::args_os().collect();
    let args = Args::parse_from(&argv);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = match with_env_file(&args, &argv) {
        Ok(args) => args,
        Err(e) => e.exit(),
    };

    println!("{}", "🚀 Link collector startup".bold());

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("  {} Configuration error: {e}", "✗".red());
            return ExitCode::FAILURE;
        }
    };

    let options = match launch_options(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("  {} Cannot locate the launcher: {e}", "✗".red());
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("  {} Failed to start the async runtime: {e}", "✗".red());
            return ExitCode::FAILURE;
        }
    };

    let mut reporter = ConsoleReporter;
    let prepared = runtime.block_on(Bootstrap::new(&options, &settings, &mut reporter).prepare());
    // The runtime must be gone before the process image is replaced.
    drop(runtime);

    let handoff = match prepared {
        Ok(handoff) => handoff,
        Err(e) => {
            eprintln!("\n{} {}", "✗ Startup aborted:".red().bold(), error_chain(&e));
            return ExitCode::FAILURE;
        }
    };

    println!();
    let err = handoff.exec();
    eprintln!("{} {}", "✗".red(), error_chain(&err));
    ExitCode::FAILURE
}

/// Loads the `.env` file named by `args` and parses `argv` again so that
/// options backed by variables defined there pick them up.
fn with_env_file(args: &Args, argv: &[OsString]) -> Result<Args, clap::Error> {
    let env_file = args.base_dir.join(&args.env_file);
    if let Err(e) = dotenvy::from_path(&env_file) {
        debug!("Could not load .env file ({}): {}", env_file.display(), e);
    }
    Args::try_parse_from(argv)
}

fn launch_options(args: &Args) -> std::io::Result<LaunchOptions> {
    let launcher = std::env::current_exe()?;
    let mut options = LaunchOptions::beside(&launcher, args.base_dir.clone());

    if let Some(bot) = &args.bot {
        options.program.clone_from(bot);
        options.required_files = vec![bot.clone()];
    }
    if !args.required_files.is_empty() {
        options.required_files.clone_from(&args.required_files);
    }
    options
        .args
        .extend([OsString::from("--env-file"), args.env_file.clone().into_os_string()]);

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_files_from_env_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "REQUIRED_FILES=link_collector,config.toml\n").unwrap();

        let argv: Vec<OsString> = ["start_bot", "--base-dir"]
            .into_iter()
            .map(OsString::from)
            .chain([dir.path().as_os_str().to_owned()])
            .collect();
        let args = Args::parse_from(&argv);
        assert!(args.required_files.is_empty());

        let args = with_env_file(&args, &argv).unwrap();
        assert_eq!(
            args.required_files,
            vec![PathBuf::from("link_collector"), PathBuf::from("config.toml")]
        );
    }
}

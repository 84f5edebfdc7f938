//! Launcher pipeline against a temporary installation.

use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use link_collector::bootstrap::{
    Bootstrap, BootstrapError, DIRECTORY_MODE, Handoff, LaunchOptions, Reporter, Stage, Status,
};
use link_collector::config::{RUNTIME_DIRECTORIES, Settings};
use link_collector::storage::{Database, NewSession};

const TOKEN: &str = "123456789:AAHk3b5lZ7dQ9rXo1Zt8yWvQpLmNcXeRtY0";

#[derive(Default)]
struct Recorder {
    stages: Vec<Stage>,
    lines: Vec<(Status, String)>,
}

impl Reporter for Recorder {
    fn stage(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    fn report(&mut self, status: Status, message: &str) {
        self.lines.push((status, message.to_owned()));
    }
}

fn settings_for(base: &Path, token: Option<&str>) -> Settings {
    let db = base.join("data/links_collector.db");
    let token = token.map(str::to_owned);
    Settings::from_lookup(move |key| match key {
        "BOT_TOKEN" => token.clone(),
        "DATABASE_PATH" => Some(db.display().to_string()),
        _ => None,
    })
    .unwrap()
}

/// Writes a fake bot that records its working directory and arguments.
fn fake_bot(base: &Path) -> PathBuf {
    let path = base.join("link_collector");
    std::fs::write(
        &path,
        "#!/bin/sh\npwd > handoff.txt\necho \"$@\" >> handoff.txt\n",
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn prepared_handoff_starts_bot_in_base_dir() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().canonicalize().unwrap();
    fake_bot(&base);

    let options = LaunchOptions::beside(&base.join("start_bot"), &base);
    let settings = settings_for(&base, Some(TOKEN));

    let mut recorder = Recorder::default();
    let handoff = Bootstrap::new(&options, &settings, &mut recorder)
        .prepare()
        .await
        .unwrap();

    assert_eq!(recorder.stages.last(), Some(&Stage::Handoff));
    for name in RUNTIME_DIRECTORIES {
        let mode = std::fs::metadata(base.join(name)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, DIRECTORY_MODE, "{name}");
    }

    let status = Command::new(&handoff.program)
        .args(&handoff.args)
        .current_dir(&handoff.current_dir)
        .status()
        .unwrap();
    assert!(status.success());

    let recorded = std::fs::read_to_string(base.join("handoff.txt")).unwrap();
    let mut lines = recorded.lines();
    assert_eq!(lines.next(), Some(base.to_str().unwrap()));
    assert_eq!(lines.next(), Some("run"));
}

#[tokio::test]
async fn session_counts_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    fake_bot(base);

    let settings = settings_for(base, Some(TOKEN));
    let db = Database::open(&settings.database_path).await.unwrap();
    db.add_session(&NewSession::named("main")).await.unwrap();
    let second = db.add_session(&NewSession::named("spare")).await.unwrap();
    db.update_session_status(second, false).await.unwrap();
    db.close().await;

    let options = LaunchOptions::beside(&base.join("start_bot"), base);
    let mut recorder = Recorder::default();
    Bootstrap::new(&options, &settings, &mut recorder)
        .prepare()
        .await
        .unwrap();

    assert!(
        recorder
            .lines
            .iter()
            .any(|(status, line)| *status == Status::Ok && line == "2 session(s), 1 active"),
        "{:?}",
        recorder.lines
    );
    assert!(recorder.lines.iter().any(|(_, line)| line == "sessions: 2 rows"));
}

#[tokio::test]
async fn missing_bot_executable_aborts_early() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();

    let options = LaunchOptions::beside(&base.join("start_bot"), base);
    let settings = settings_for(base, Some(TOKEN));

    let mut recorder = Recorder::default();
    let err = Bootstrap::new(&options, &settings, &mut recorder)
        .prepare()
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::MissingFiles(_)));
    assert_eq!(recorder.stages, vec![Stage::Files]);
    assert!(std::fs::read_dir(base).unwrap().next().is_none());
}

#[tokio::test]
async fn token_failure_skips_session_stage() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    fake_bot(base);

    let options = LaunchOptions::beside(&base.join("start_bot"), base);
    for token in [None, Some("123:short")] {
        let settings = settings_for(base, token);
        let mut recorder = Recorder::default();
        let result = Bootstrap::new(&options, &settings, &mut recorder).prepare().await;

        assert!(result.is_err());
        assert!(!recorder.stages.contains(&Stage::Sessions));
        assert!(!recorder.stages.contains(&Stage::Handoff));
    }
}

#[test]
fn failed_exec_returns_error() {
    let handoff = Handoff {
        program: PathBuf::from("/nonexistent/link_collector"),
        args: vec![OsString::from("run")],
        current_dir: std::env::temp_dir(),
    };

    match handoff.exec() {
        BootstrapError::Exec { program, .. } => {
            assert_eq!(program, PathBuf::from("/nonexistent/link_collector"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

//! Link extraction from uploaded files and directories.
//!
//! Supports plain text files, zip and tar (optionally gzipped) archives,
//! and foreign `SQLite` databases. Every URL found is run through
//! [`analyze_link`] and only collectable links are kept in the report.

mod archive;
mod sqlite;
mod text;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub use archive::{
    ArchiveContents, ArchiveEntry, ArchiveFormat, MAX_ARCHIVE_BYTES, MAX_ENTRY_BYTES, read_archive,
};
pub use sqlite::{DatabaseScan, scan_database};
pub use text::{TEXT_EXTENSIONS, is_text_name, urls_in_bytes};

use crate::links::{LinkAnalysis, Platform, analyze_link};
use crate::storage::{Database, NewLink, StorageError};

/// Text files larger than this are rejected.
pub const MAX_TEXT_BYTES: u64 = 50 * 1024 * 1024;

/// Archive files larger than this are rejected before decompression.
pub const MAX_ARCHIVE_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Errors raised while reading a file.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("File too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("Unsupported file type: {0}")]
    Unsupported(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// How a file is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Archive(ArchiveFormat),
    Database,
    Unsupported,
}

impl FileKind {
    /// Detects the kind from the file name.
    #[must_use]
    pub fn detect(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            return Self::Archive(ArchiveFormat::TarGz);
        }

        match path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .as_deref()
        {
            Some("zip") => Self::Archive(ArchiveFormat::Zip),
            Some("tar") => Self::Archive(ArchiveFormat::Tar),
            Some("sqlite" | "sqlite3" | "db" | "db3") => Self::Database,
            _ if is_text_name(&name) => Self::Text,
            _ => Self::Unsupported,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Archive(_) => "archive",
            Self::Database => "database",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Links found in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file_name: String,
    pub kind: &'static str,

    /// Distinct URLs found before filtering.
    pub total_found: usize,

    pub telegram: usize,
    pub whatsapp: usize,

    /// URLs that are not collectable (other sites, bots, messages...).
    pub ignored: usize,

    /// Collectable links, de-duplicated.
    pub links: Vec<LinkAnalysis>,

    pub error: Option<String>,
}

impl FileReport {
    fn empty(path: &Path, kind: FileKind) -> Self {
        Self {
            file_name: path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
            kind: kind.as_str(),
            total_found: 0,
            telegram: 0,
            whatsapp: 0,
            ignored: 0,
            links: Vec::new(),
            error: None,
        }
    }

    fn failed(path: &Path, kind: FileKind, error: &ExtractError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::empty(path, kind)
        }
    }

    fn from_urls(path: &Path, kind: FileKind, urls: Vec<String>, blacklist: &[String]) -> Self {
        let mut report = Self::empty(path, kind);
        let mut raw_seen = HashSet::new();
        let mut kept = HashSet::new();

        for raw in urls {
            if !raw_seen.insert(raw.clone()) {
                continue;
            }
            report.total_found += 1;

            let analysis = analyze_link(&raw, blacklist);
            if !analysis.should_collect {
                report.ignored += 1;
                continue;
            }
            if !kept.insert(analysis.url.clone()) {
                continue;
            }
            match analysis.platform {
                Platform::Telegram => report.telegram += 1,
                Platform::WhatsApp => report.whatsapp += 1,
                Platform::Other => {}
            }
            report.links.push(analysis);
        }

        report
    }

    /// Number of collectable links.
    #[must_use]
    pub fn valid(&self) -> usize {
        self.links.len()
    }
}

/// Extracts the collectable links of one file.
///
/// Read failures are reported in [`FileReport::error`] rather than
/// returned.
pub async fn process_file(path: &Path, blacklist: &[String]) -> FileReport {
    let kind = FileKind::detect(path);
    match collect_urls(path, kind).await {
        Ok(urls) => {
            let report = FileReport::from_urls(path, kind, urls, blacklist);
            info!(
                "Processed {} ({}): {} links found, {} collectable",
                report.file_name,
                report.kind,
                report.total_found,
                report.valid()
            );
            report
        }
        Err(e) => {
            warn!("Failed to process {}: {}", path.display(), e);
            FileReport::failed(path, kind, &e)
        }
    }
}

async fn collect_urls(path: &Path, kind: FileKind) -> Result<Vec<String>, ExtractError> {
    match kind {
        FileKind::Text => {
            let data = read_capped(path, MAX_TEXT_BYTES).await?;
            Ok(tokio::task::spawn_blocking(move || urls_in_bytes(&data)).await?)
        }
        FileKind::Archive(format) => {
            let data = read_capped(path, MAX_ARCHIVE_FILE_BYTES).await?;
            let contents =
                tokio::task::spawn_blocking(move || read_archive(&data, format)).await??;
            Ok(contents
                .text_entries
                .iter()
                .flat_map(|entry| urls_in_bytes(&entry.data))
                .collect())
        }
        FileKind::Database => Ok(scan_database(path).await?.urls),
        FileKind::Unsupported => Err(ExtractError::Unsupported(
            path.extension()
                .map_or_else(String::new, |e| e.to_string_lossy().into_owned()),
        )),
    }
}

async fn read_capped(path: &Path, limit: u64) -> Result<Vec<u8>, ExtractError> {
    let size = tokio::fs::metadata(path).await?.len();
    if size > limit {
        return Err(ExtractError::TooLarge { size, limit });
    }
    Ok(tokio::fs::read(path).await?)
}

/// Name for a file saved into the temp directory: `unique` followed by the
/// last path component of the original name.
#[must_use]
pub fn local_file_name(original: Option<&str>, unique: &str) -> String {
    let base = original
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .unwrap_or("upload.txt");
    format!("{unique}_{base}")
}

/// Aggregated result of processing a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryReport {
    pub total_files: usize,
    pub processed: usize,
    pub unsupported: usize,
    pub failed: usize,
    pub files: Vec<FileReport>,
}

impl DirectoryReport {
    /// Collectable links of every file, de-duplicated.
    #[must_use]
    pub fn links(&self) -> Vec<&LinkAnalysis> {
        let mut seen = HashSet::new();
        self.files
            .iter()
            .flat_map(|f| &f.links)
            .filter(|l| seen.insert(l.url.as_str()))
            .collect()
    }
}

/// Processes every supported file in a directory.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub async fn process_directory(
    dir: &Path,
    recursive: bool,
    blacklist: &[String],
) -> Result<DirectoryReport, ExtractError> {
    let mut report = DirectoryReport::default();

    for path in list_files(dir, recursive).await? {
        report.total_files += 1;
        if FileKind::detect(&path) == FileKind::Unsupported {
            report.unsupported += 1;
            continue;
        }

        let file = process_file(&path, blacklist).await;
        if file.error.is_some() {
            report.failed += 1;
        } else {
            report.processed += 1;
        }
        report.files.push(file);
    }

    Ok(report)
}

async fn list_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, ExtractError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if recursive {
                    pending.push(entry.path());
                }
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Stores the collectable links of a report. Returns how many were new.
///
/// # Errors
///
/// Returns an error if a database write fails.
pub async fn import_report(db: &Database, report: &FileReport) -> Result<usize, StorageError> {
    let mut added = 0;
    for link in &report.links {
        let record = NewLink {
            title: Some(report.file_name.clone()),
            ..NewLink::new(link.url.clone(), link.platform, link.link_type)
        };
        if db.save_link(&record).await? {
            added += 1;
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LinkFilter;

    #[test]
    fn test_detect_kind() {
        assert_eq!(FileKind::detect(Path::new("a/links.txt")), FileKind::Text);
        assert_eq!(FileKind::detect(Path::new("Dump.JSON")), FileKind::Text);
        assert_eq!(
            FileKind::detect(Path::new("backup.tar.gz")),
            FileKind::Archive(ArchiveFormat::TarGz)
        );
        assert_eq!(
            FileKind::detect(Path::new("x.tgz")),
            FileKind::Archive(ArchiveFormat::TarGz)
        );
        assert_eq!(
            FileKind::detect(Path::new("x.zip")),
            FileKind::Archive(ArchiveFormat::Zip)
        );
        assert_eq!(FileKind::detect(Path::new("chats.sqlite")), FileKind::Database);
        assert_eq!(FileKind::detect(Path::new("report.pdf")), FileKind::Unsupported);
        assert_eq!(FileKind::detect(Path::new("noext")), FileKind::Unsupported);
    }

    #[tokio::test]
    async fn test_process_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.txt");
        std::fs::write(
            &path,
            "t.me/RustLang\nhttps://t.me/rustlang\nhttps://example.com\n\
             https://chat.whatsapp.com/AbCdEf123456\nt.me/helper_bot\n",
        )
        .unwrap();

        let report = process_file(&path, &[]).await;
        assert!(report.error.is_none());
        assert_eq!(report.file_name, "links.txt");
        assert_eq!(report.kind, "text");
        assert_eq!(report.total_found, 5);
        assert_eq!(report.telegram, 1);
        assert_eq!(report.whatsapp, 1);
        assert_eq!(report.ignored, 2);
        assert_eq!(report.valid(), 2);
    }

    #[tokio::test]
    async fn test_process_missing_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();

        let missing = process_file(&dir.path().join("gone.txt"), &[]).await;
        assert!(missing.error.is_some());

        let pdf = dir.path().join("doc.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();
        let report = process_file(&pdf, &[]).await;
        assert_eq!(report.kind, "unsupported");
        assert!(report.error.unwrap().contains("pdf"));
    }

    #[tokio::test]
    async fn test_process_directory_and_import() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "t.me/rustlang").unwrap();
        std::fs::write(dir.path().join("sub/b.md"), "t.me/rustlang t.me/+Invite12345").unwrap();
        std::fs::write(dir.path().join("c.bin"), b"\x00\x01").unwrap();

        let flat = process_directory(dir.path(), false, &[]).await.unwrap();
        assert_eq!(flat.total_files, 2);
        assert_eq!(flat.unsupported, 1);
        assert_eq!(flat.processed, 1);

        let report = process_directory(dir.path(), true, &[]).await.unwrap();
        assert_eq!(report.total_files, 3);
        assert_eq!(report.processed, 2);
        assert_eq!(report.links().len(), 2);

        let db = Database::open_in_memory().await.unwrap();
        let mut added = 0;
        for file in &report.files {
            added += import_report(&db, file).await.unwrap();
        }
        assert_eq!(added, 2);
        assert_eq!(db.count_links(LinkFilter::all()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_oversized_archive_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.zip");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_ARCHIVE_FILE_BYTES + 1).unwrap();

        let report = process_file(&path, &[]).await;
        assert_eq!(report.kind, "archive");
        assert!(report.error.unwrap().starts_with("File too large"));
    }

    #[test]
    fn test_local_file_name() {
        assert_eq!(local_file_name(Some("dump.zip"), "42"), "42_dump.zip");
        assert_eq!(local_file_name(Some("../../etc/passwd"), "1"), "1_passwd");
        assert_eq!(local_file_name(Some("dir\\links.txt"), "1"), "1_links.txt");
        assert_eq!(local_file_name(Some(".."), "7"), "7_upload.txt");
        assert_eq!(local_file_name(None, "7"), "7_upload.txt");
    }
}

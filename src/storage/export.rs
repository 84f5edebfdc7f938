//! Plain-text link exports.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use super::{Database, EXPORT_LIMIT, LinkFilter, StorageError};

/// Builds `<platform|all>[_<type>]_<YYYYmmdd_HHMMSS>.txt`.
#[must_use]
pub fn export_file_name(filter: LinkFilter, at: DateTime<Local>) -> String {
    let mut parts = vec![filter.platform.map_or("all", |p| p.as_str()).to_owned()];
    if let Some(link_type) = filter.link_type {
        parts.push(link_type.as_str().to_owned());
    }
    format!("{}_{}.txt", parts.join("_"), at.format("%Y%m%d_%H%M%S"))
}

impl Database {
    /// Writes matching links, one URL per line, into a new file in `dir`.
    ///
    /// Returns `None` when no link matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or the file write fails.
    pub async fn export_links(
        &self,
        filter: LinkFilter,
        dir: impl AsRef<Path>,
    ) -> Result<Option<PathBuf>, StorageError> {
        let links = self.list_links(filter, EXPORT_LIMIT, 0).await?;
        if links.is_empty() {
            return Ok(None);
        }

        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(export_file_name(filter, Local::now()));
        let mut content = String::with_capacity(links.len() * 40);
        for link in &links {
            content.push_str(&link.url);
            content.push('\n');
        }
        tokio::fs::write(&path, content).await?;

        info!("Exported {} links to {}", links.len(), path.display());
        Ok(Some(path))
    }
}

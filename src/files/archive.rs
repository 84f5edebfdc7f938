//! Zip and tar archives, read entirely in memory.

use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use zip::ZipArchive;

use super::ExtractError;
use super::text::is_text_name;

/// Bytes read from a single entry; the rest of a larger entry is skipped.
pub const MAX_ENTRY_BYTES: u64 = 10 * 1024 * 1024;

/// Bytes read from one archive across all entries.
pub const MAX_ARCHIVE_BYTES: u64 = 100 * 1024 * 1024;

/// Container format of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

/// A text entry taken from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Entries seen in an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveContents {
    /// Entries with a text extension, with their content.
    pub text_entries: Vec<ArchiveEntry>,

    /// Number of regular files in the archive.
    pub files: usize,
}

/// Reads the text entries of an archive.
///
/// # Errors
///
/// Returns an error if the archive is corrupt or unreadable.
pub fn read_archive(data: &[u8], format: ArchiveFormat) -> Result<ArchiveContents, ExtractError> {
    match format {
        ArchiveFormat::Zip => read_zip(data),
        ArchiveFormat::Tar => read_tar(data),
        ArchiveFormat::TarGz => read_tar(GzDecoder::new(data)),
    }
}

fn read_zip(data: &[u8]) -> Result<ArchiveContents, ExtractError> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let mut contents = ArchiveContents::default();
    let mut budget = MAX_ARCHIVE_BYTES;

    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        contents.files += 1;

        let name = file.name().to_owned();
        if !is_text_name(&name) || budget == 0 {
            continue;
        }

        let data = read_capped(file, &mut budget)?;
        contents.text_entries.push(ArchiveEntry { name, data });
    }

    Ok(contents)
}

fn read_tar<R: Read>(reader: R) -> Result<ArchiveContents, ExtractError> {
    let mut archive = tar::Archive::new(reader);
    let mut contents = ArchiveContents::default();
    let mut budget = MAX_ARCHIVE_BYTES;

    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        contents.files += 1;

        let name = entry.path()?.to_string_lossy().into_owned();
        if !is_text_name(&name) || budget == 0 {
            continue;
        }

        let data = read_capped(entry, &mut budget)?;
        contents.text_entries.push(ArchiveEntry { name, data });
    }

    Ok(contents)
}

fn read_capped(reader: impl Read, budget: &mut u64) -> std::io::Result<Vec<u8>> {
    let limit = MAX_ENTRY_BYTES.min(*budget);
    let mut data = Vec::new();
    reader.take(limit).read_to_end(&mut data)?;
    *budget = budget.saturating_sub(data.len() as u64);
    Ok(data)
}

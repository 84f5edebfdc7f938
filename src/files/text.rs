//! Plain text sources.

use std::path::Path;

use crate::links::extract_urls;

/// Extensions read as text.
pub const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "log", "csv", "json", "xml", "yaml", "yml", "html", "htm", "md", "rst", "ini", "cfg",
    "conf", "php", "js", "py", "java", "cpp", "c", "h", "cs", "sql", "sh", "bash", "ps1", "bat",
    "cmd",
];

/// Checks whether a file name has a text extension.
#[must_use]
pub fn is_text_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Decodes bytes as UTF-8 (invalid sequences replaced) and extracts URLs.
#[must_use]
pub fn urls_in_bytes(bytes: &[u8]) -> Vec<String> {
    extract_urls(&String::from_utf8_lossy(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_text_name() {
        assert!(is_text_name("notes.TXT"));
        assert!(is_text_name("dir/dump.json"));
        assert!(!is_text_name("photo.jpg"));
        assert!(!is_text_name("README"));
    }

    #[test]
    fn test_urls_in_invalid_utf8() {
        let mut bytes = b"start t.me/rustlang ".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b" end");

        assert_eq!(urls_in_bytes(&bytes), vec!["https://t.me/rustlang"]);
    }
}

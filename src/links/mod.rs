//! Link extraction and classification.
//!
//! Finds Telegram and WhatsApp links in free text, cleans and normalizes
//! them, and decides which of them are worth collecting.

mod classify;
mod extract;

pub use classify::{
    LinkType, Platform, classify_link, classify_platform, classify_telegram_link,
    classify_whatsapp_link, is_telegram_group_link, is_whatsapp_group_link, normalize_link,
    normalize_telegram_link,
};
pub use extract::{clean_link, extract_urls};

use serde::{Deserialize, Serialize};

/// Links shorter than this are never accepted.
pub const MIN_LINK_LENGTH: usize = 10;

/// Result of analyzing a single raw link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAnalysis {
    /// Cleaned and normalized URL.
    pub url: String,

    /// Platform the link points to.
    pub platform: Platform,

    /// Kind of target within the platform.
    pub link_type: LinkType,

    /// Whether the link passed the basic acceptance checks.
    pub is_valid: bool,

    /// Whether the link is a group/channel link that should be stored.
    pub should_collect: bool,
}

/// Checks whether a link is long enough, not blacklisted and points to a
/// supported platform.
#[must_use]
pub fn is_allowed_link(url: &str, blacklist: &[String]) -> bool {
    if url.chars().count() < MIN_LINK_LENGTH {
        return false;
    }

    let lower = url.to_lowercase();
    if blacklist
        .iter()
        .any(|blocked| !blocked.is_empty() && lower.contains(&blocked.to_lowercase()))
    {
        return false;
    }

    matches!(classify_platform(url), Platform::Telegram | Platform::WhatsApp)
}

/// Cleans, normalizes and classifies a raw link.
#[must_use]
pub fn analyze_link(raw: &str, blacklist: &[String]) -> LinkAnalysis {
    let cleaned = clean_link(raw);
    let url = normalize_link(&cleaned).unwrap_or(cleaned);
    let (platform, link_type) = classify_link(&url);
    let is_valid = is_allowed_link(&url, blacklist);
    let should_collect = is_valid
        && match platform {
            Platform::Telegram => is_telegram_group_link(&url),
            Platform::WhatsApp => is_whatsapp_group_link(&url),
            Platform::Other => false,
        };

    LinkAnalysis {
        url,
        platform,
        link_type,
        is_valid,
        should_collect,
    }
}

/// Extracts every link from a text and returns those worth collecting,
/// de-duplicated by normalized URL.
#[must_use]
pub fn collectable_links(text: &str, extra_urls: &[String], blacklist: &[String]) -> Vec<LinkAnalysis> {
    let mut seen = std::collections::HashSet::new();

    extract_urls(text)
        .into_iter()
        .chain(extra_urls.iter().cloned())
        .map(|raw| analyze_link(&raw, blacklist))
        .filter(|analysis| analysis.should_collect)
        .filter(|analysis| seen.insert(analysis.url.clone()))
        .collect()
}

//! URL extraction from free text.

use std::collections::HashSet;

use lazy_regex::lazy_regex;

/// Full URLs with an explicit scheme.
static FULL_URL: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(?:https?|tg)://[^\s<>\x22\x27{}|\\^`\[\]]+"i);

/// Scheme-less links to the supported platforms and `www.` hosts.
static BARE_URL: lazy_regex::Lazy<regex::Regex> = lazy_regex!(
    r"\b(?:(?:t|telegram)\.me/[A-Za-z0-9_+/-]+|chat\.whatsapp\.com/[A-Za-z0-9_-]+|whatsapp\.com/channel/[A-Za-z0-9_-]+|wa\.me/[0-9]+|www\.[^\s<>\x22\x27{}|\\^`\[\]]+\.[^\s<>\x22\x27{}|\\^`\[\]]+)"i
);

/// Cleans a raw link: trims it, drops `*` and spaces, and strips
/// non-alphanumeric characters from both ends.
#[must_use]
pub fn clean_link(url: &str) -> String {
    let cleaned: String = url
        .trim()
        .chars()
        .filter(|c| *c != '*' && !c.is_whitespace())
        .collect();

    cleaned
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_owned()
}

/// Finds every URL in a text.
///
/// Scheme-less platform links get `https://` prepended. The result is
/// de-duplicated and keeps first-seen order.
#[must_use]
pub fn extract_urls(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut found: Vec<(usize, String)> = Vec::new();
    let mut full_spans = Vec::new();

    for m in FULL_URL.find_iter(text) {
        full_spans.push(m.range());
        found.push((m.start(), m.as_str().to_owned()));
    }

    for m in BARE_URL.find_iter(text) {
        let inside_full = full_spans
            .iter()
            .any(|span| span.start <= m.start() && m.start() < span.end);
        if !inside_full {
            found.push((m.start(), with_scheme(m.as_str())));
        }
    }

    found.sort_by_key(|(start, _)| *start);

    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, url)| clean_link(&url))
        .filter(|url| !url.is_empty())
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

fn with_scheme(url: &str) -> String {
    if url.contains("://") {
        url.to_owned()
    } else {
        format!("https://{url}")
    }
}

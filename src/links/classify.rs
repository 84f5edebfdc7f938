//! Platform and link type classification.

use std::fmt;
use std::str::FromStr;

use lazy_regex::lazy_regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Valid public Telegram username.
static USERNAME: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"^[A-Za-z][A-Za-z0-9_]{3,31}$");

/// First path segments on `t.me` that never name a chat.
const RESERVED_PATHS: &[&str] = &[
    "addemoji",
    "addlist",
    "addstickers",
    "addtheme",
    "boost",
    "confirmphone",
    "contact",
    "giftcode",
    "invoice",
    "iv",
    "login",
    "proxy",
    "setlanguage",
    "share",
    "socks",
];

/// Messaging platform a link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Telegram,
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Other,
}

impl Platform {
    /// Returns the name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::WhatsApp => "whatsapp",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "telegram" => Ok(Self::Telegram),
            "whatsapp" => Ok(Self::WhatsApp),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Kind of target a link points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// `t.me/joinchat/<hash>` invite.
    PrivateGroup,
    /// `t.me/+<hash>` invite.
    PublicGroup,
    /// Public username (channel, group or user).
    Channel,
    /// Username ending in `bot`.
    Bot,
    /// Link to a single message.
    Message,
    /// WhatsApp group invite.
    Group,
    /// WhatsApp click-to-chat phone link.
    Phone,
    Unknown,
}

impl LinkType {
    /// Returns the name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrivateGroup => "private_group",
            Self::PublicGroup => "public_group",
            Self::Channel => "channel",
            Self::Bot => "bot",
            Self::Message => "message",
            Self::Group => "group",
            Self::Phone => "phone",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "private_group" => Ok(Self::PrivateGroup),
            "public_group" => Ok(Self::PublicGroup),
            "channel" => Ok(Self::Channel),
            "bot" => Ok(Self::Bot),
            "message" => Ok(Self::Message),
            "group" => Ok(Self::Group),
            "phone" => Ok(Self::Phone),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown link type: {other}")),
        }
    }
}

/// Parses a link, adding `https://` when no scheme is present.
fn parse(url: &str) -> Option<Url> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    if url.contains("://") {
        Url::parse(url).ok()
    } else {
        Url::parse(&format!("https://{url}")).ok()
    }
}

fn host(url: &Url) -> String {
    url.host_str()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .to_lowercase()
}

fn segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default()
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Determines the platform of a link.
#[must_use]
pub fn classify_platform(url: &str) -> Platform {
    let Some(parsed) = parse(url) else {
        return Platform::Other;
    };

    if parsed.scheme() == "tg" {
        return Platform::Telegram;
    }

    let host = host(&parsed);
    if matches!(host.as_str(), "t.me" | "telegram.me" | "telegram.dog") {
        Platform::Telegram
    } else if host == "wa.me" || host == "whatsapp.com" || host.ends_with(".whatsapp.com") {
        Platform::WhatsApp
    } else {
        Platform::Other
    }
}

/// Determines the kind of a Telegram link.
#[must_use]
pub fn classify_telegram_link(url: &str) -> LinkType {
    let Some(parsed) = parse(url) else {
        return LinkType::Unknown;
    };

    if parsed.scheme() == "tg" {
        return match host(&parsed).as_str() {
            "join" if query_value(&parsed, "invite").is_some() => LinkType::PrivateGroup,
            "resolve" => query_value(&parsed, "domain").map_or(LinkType::Unknown, |d| username_type(&d)),
            _ => LinkType::Unknown,
        };
    }

    let segs = segments(&parsed);
    match segs.as_slice() {
        ["joinchat", _, ..] => LinkType::PrivateGroup,
        [first, ..] if first.len() > 1 && first.starts_with('+') => LinkType::PublicGroup,
        ["c", ..] => LinkType::Message,
        ["s", name] => username_type(name),
        [_, .., last] if last.chars().all(|c| c.is_ascii_digit()) => LinkType::Message,
        [name] => username_type(name),
        _ => LinkType::Unknown,
    }
}

fn username_type(name: &str) -> LinkType {
    let lower = name.to_lowercase();
    if RESERVED_PATHS.contains(&lower.as_str()) || !USERNAME.is_match(name) {
        LinkType::Unknown
    } else if lower.ends_with("bot") {
        LinkType::Bot
    } else {
        LinkType::Channel
    }
}

/// Determines the kind of a WhatsApp link.
#[must_use]
pub fn classify_whatsapp_link(url: &str) -> LinkType {
    let Some(parsed) = parse(url) else {
        return LinkType::Unknown;
    };

    let host = host(&parsed);
    let segs = segments(&parsed);
    match (host.as_str(), segs.as_slice()) {
        ("chat.whatsapp.com", [code, ..]) if is_invite_code(code) => LinkType::Group,
        ("whatsapp.com", ["channel", id, ..]) if is_invite_code(id) => LinkType::Channel,
        ("wa.me", [phone]) if phone.chars().all(|c| c.is_ascii_digit()) => LinkType::Phone,
        _ => LinkType::Unknown,
    }
}

fn is_invite_code(code: &str) -> bool {
    code.len() >= 5 && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Classifies a link into its platform and type.
#[must_use]
pub fn classify_link(url: &str) -> (Platform, LinkType) {
    let platform = classify_platform(url);
    let link_type = match platform {
        Platform::Telegram => classify_telegram_link(url),
        Platform::WhatsApp => classify_whatsapp_link(url),
        Platform::Other => LinkType::Unknown,
    };
    (platform, link_type)
}

/// Checks whether a link is a Telegram group or channel that can be joined.
#[must_use]
pub fn is_telegram_group_link(url: &str) -> bool {
    classify_platform(url) == Platform::Telegram
        && matches!(
            classify_telegram_link(url),
            LinkType::PrivateGroup | LinkType::PublicGroup | LinkType::Channel
        )
}

/// Checks whether a link is a WhatsApp group invite.
#[must_use]
pub fn is_whatsapp_group_link(url: &str) -> bool {
    classify_platform(url) == Platform::WhatsApp && classify_whatsapp_link(url) == LinkType::Group
}

/// Converts a Telegram link into its canonical `https://t.me/...` form.
///
/// `telegram.me` and `tg://` links are folded into `t.me`, query strings
/// and fragments are dropped, usernames are lowercased and invite hashes
/// are kept verbatim. Returns `None` for non-Telegram links.
#[must_use]
pub fn normalize_telegram_link(url: &str) -> Option<String> {
    let parsed = parse(url)?;
    if classify_platform(url) != Platform::Telegram {
        return None;
    }

    if parsed.scheme() == "tg" {
        return match host(&parsed).as_str() {
            "join" => query_value(&parsed, "invite").map(|hash| format!("https://t.me/+{hash}")),
            "resolve" => query_value(&parsed, "domain").map(|d| format!("https://t.me/{}", d.to_lowercase())),
            _ => None,
        };
    }

    let segs = segments(&parsed);
    let path = match classify_telegram_link(url) {
        LinkType::PrivateGroup | LinkType::PublicGroup => segs.join("/"),
        LinkType::Channel | LinkType::Bot => segs.last().map(|s| s.to_lowercase())?,
        _ => segs.join("/"),
    };

    if path.is_empty() {
        return None;
    }
    Some(format!("https://t.me/{path}"))
}

/// Normalizes any supported link; `None` when the link cannot be parsed
/// or has no canonical form.
#[must_use]
pub fn normalize_link(url: &str) -> Option<String> {
    match classify_platform(url) {
        Platform::Telegram => normalize_telegram_link(url),
        Platform::WhatsApp => {
            let parsed = parse(url)?;
            let host = host(&parsed);
            let path = segments(&parsed).join("/");
            if path.is_empty() {
                return None;
            }
            Some(format!("https://{host}/{path}"))
        }
        Platform::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_platform() {
        assert_eq!(classify_platform("https://t.me/rustlang"), Platform::Telegram);
        assert_eq!(classify_platform("telegram.me/rustlang"), Platform::Telegram);
        assert_eq!(classify_platform("tg://resolve?domain=rustlang"), Platform::Telegram);
        assert_eq!(
            classify_platform("https://chat.whatsapp.com/AbCdEf12345"),
            Platform::WhatsApp
        );
        assert_eq!(classify_platform("https://wa.me/123456789"), Platform::WhatsApp);
        assert_eq!(classify_platform("https://example.com/t.me"), Platform::Other);
        assert_eq!(classify_platform(""), Platform::Other);
    }

    #[test]
    fn test_classify_telegram_link() {
        assert_eq!(
            classify_telegram_link("https://t.me/joinchat/AAAAAE1x2y3z"),
            LinkType::PrivateGroup
        );
        assert_eq!(classify_telegram_link("https://t.me/+AbCdEf123"), LinkType::PublicGroup);
        assert_eq!(classify_telegram_link("https://t.me/GitHubBot"), LinkType::Bot);
        assert_eq!(classify_telegram_link("https://t.me/rustlang/42"), LinkType::Message);
        assert_eq!(classify_telegram_link("https://t.me/c/1234567/42"), LinkType::Message);
        assert_eq!(classify_telegram_link("https://t.me/rustlang"), LinkType::Channel);
        assert_eq!(classify_telegram_link("https://t.me/s/rustlang"), LinkType::Channel);
        assert_eq!(classify_telegram_link("https://t.me/addstickers"), LinkType::Unknown);
        assert_eq!(classify_telegram_link("https://t.me/ab"), LinkType::Unknown);
        assert_eq!(classify_telegram_link("tg://join?invite=XyZ123"), LinkType::PrivateGroup);
    }

    #[test]
    fn test_classify_whatsapp_link() {
        assert_eq!(
            classify_whatsapp_link("https://chat.whatsapp.com/Kq9sLm2ZxYw"),
            LinkType::Group
        );
        assert_eq!(
            classify_whatsapp_link("https://whatsapp.com/channel/0029VaAbCdEf"),
            LinkType::Channel
        );
        assert_eq!(classify_whatsapp_link("https://wa.me/15551234567"), LinkType::Phone);
        assert_eq!(classify_whatsapp_link("https://chat.whatsapp.com/"), LinkType::Unknown);
    }

    #[test]
    fn test_normalize_telegram_link() {
        assert_eq!(
            normalize_telegram_link("http://telegram.me/RustLang/?utm=x#top").as_deref(),
            Some("https://t.me/rustlang")
        );
        assert_eq!(
            normalize_telegram_link("https://t.me/+AbCdEf123").as_deref(),
            Some("https://t.me/+AbCdEf123")
        );
        assert_eq!(
            normalize_telegram_link("t.me/joinchat/AAAAAE1x2y3z").as_deref(),
            Some("https://t.me/joinchat/AAAAAE1x2y3z")
        );
        assert_eq!(
            normalize_telegram_link("https://t.me/s/RustLang").as_deref(),
            Some("https://t.me/rustlang")
        );
        assert_eq!(
            normalize_telegram_link("tg://join?invite=XyZ123").as_deref(),
            Some("https://t.me/+XyZ123")
        );
        assert_eq!(normalize_telegram_link("https://example.com/x"), None);
    }

    #[test]
    fn test_group_link_checks() {
        assert!(is_telegram_group_link("https://t.me/+AbCdEf123"));
        assert!(is_telegram_group_link("https://t.me/rustlang"));
        assert!(!is_telegram_group_link("https://t.me/GitHubBot"));
        assert!(is_whatsapp_group_link("https://chat.whatsapp.com/Kq9sLm2ZxYw"));
        assert!(!is_whatsapp_group_link("https://wa.me/15551234567"));
    }

    #[test]
    fn test_platform_round_trip_names() {
        assert_eq!("WhatsApp".parse::<Platform>(), Ok(Platform::WhatsApp));
        assert_eq!(LinkType::PrivateGroup.as_str(), "private_group");
        assert!("nope".parse::<LinkType>().is_err());
    }
}

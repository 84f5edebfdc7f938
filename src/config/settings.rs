//! Application settings loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{TokenError, validate_bot_token};

/// Runtime settings of the link collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Control bot token from `@BotFather`.
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,

    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: Option<i32>,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    #[serde(skip_serializing)]
    pub api_hash: Option<String>,

    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Directory holding `<name>.session` files.
    pub sessions_dir: PathBuf,

    /// Directory export files are written to.
    pub exports_dir: PathBuf,

    /// Directory for the log file.
    pub logs_dir: PathBuf,

    /// Scratch directory for downloaded uploads.
    pub temp_dir: PathBuf,

    /// Links shown per page in the bot's link view.
    #[serde(default = "default_links_per_page")]
    pub links_per_page: u32,

    /// Seconds between polling cycles once history has been collected.
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,

    /// WhatsApp links from messages older than this are ignored.
    #[serde(default = "default_whatsapp_max_age")]
    pub whatsapp_max_age_days: i64,

    /// Minimum spacing between history requests of one session.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Substrings that make a link unacceptable.
    #[serde(default)]
    pub blacklisted_domains: Vec<String>,

    /// Telegram user ids allowed to use the control bot (empty = everyone).
    #[serde(default)]
    pub admin_ids: Vec<i64>,
}

fn default_links_per_page() -> u32 {
    10
}

fn default_collection_interval() -> u64 {
    300 // 5 minutes between cycles
}

fn default_whatsapp_max_age() -> i64 {
    180
}

fn default_request_delay() -> u64 {
    500
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_id: None,
            api_hash: None,
            database_path: PathBuf::from("data/links_collector.db"),
            sessions_dir: PathBuf::from("sessions"),
            exports_dir: PathBuf::from("exports"),
            logs_dir: PathBuf::from("logs"),
            temp_dir: PathBuf::from("temp"),
            links_per_page: default_links_per_page(),
            collection_interval_secs: default_collection_interval(),
            whatsapp_max_age_days: default_whatsapp_max_age(),
            request_delay_ms: default_request_delay(),
            blacklisted_domains: Vec::new(),
            admin_ids: Vec::new(),
        }
    }
}

impl Settings {
    /// Creates settings from the process environment with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates settings from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let path_or = |key: &str, default: PathBuf| get(key).map_or(default, PathBuf::from);

        Ok(Self {
            bot_token: get("BOT_TOKEN"),
            api_id: get("API_ID").map(|v| parse_value("API_ID", &v)).transpose()?,
            api_hash: get("API_HASH"),
            database_path: path_or("DATABASE_PATH", defaults.database_path),
            sessions_dir: path_or("SESSIONS_DIR", defaults.sessions_dir),
            exports_dir: path_or("EXPORTS_DIR", defaults.exports_dir),
            logs_dir: path_or("LOGS_DIR", defaults.logs_dir),
            temp_dir: path_or("TEMP_DIR", defaults.temp_dir),
            links_per_page: parse_or(get("LINKS_PER_PAGE"), "LINKS_PER_PAGE", defaults.links_per_page)?,
            collection_interval_secs: parse_or(
                get("COLLECTION_INTERVAL"),
                "COLLECTION_INTERVAL",
                defaults.collection_interval_secs,
            )?,
            whatsapp_max_age_days: parse_or(
                get("WHATSAPP_MAX_AGE_DAYS"),
                "WHATSAPP_MAX_AGE_DAYS",
                defaults.whatsapp_max_age_days,
            )?,
            request_delay_ms: parse_or(get("REQUEST_DELAY_MS"), "REQUEST_DELAY_MS", defaults.request_delay_ms)?,
            blacklisted_domains: get("BLACKLISTED_DOMAINS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            admin_ids: get("ADMIN_IDS")
                .map(|v| {
                    split_list(&v)
                        .iter()
                        .map(|id| parse_value("ADMIN_IDS", id))
                        .collect::<Result<Vec<i64>, _>>()
                })
                .transpose()?
                .unwrap_or_default(),
        })
    }

    /// Checks that every required variable is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVars`] naming the missing variables.
    pub fn init(&self) -> Result<(), ConfigError> {
        if self.bot_token.is_none() {
            return Err(ConfigError::MissingEnvVars(vec!["BOT_TOKEN"]));
        }
        Ok(())
    }

    /// Returns the validated control bot token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is missing or too short.
    pub fn bot_token(&self) -> Result<&str, TokenError> {
        validate_bot_token(self.bot_token.as_deref())
    }

    /// Returns the `MTProto` API credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if `API_ID` or `API_HASH` is not set.
    pub fn api_credentials(&self) -> Result<(i32, &str), ConfigError> {
        let api_id = self.api_id.ok_or(ConfigError::MissingEnvVar("API_ID"))?;
        let api_hash = self
            .api_hash
            .as_deref()
            .ok_or(ConfigError::MissingEnvVar("API_HASH"))?;
        Ok((api_id, api_hash))
    }

    /// Checks whether a Telegram user may use the control bot.
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.is_empty() || self.admin_ids.contains(&user_id)
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
    })
}

fn parse_or<T: FromStr>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    value.map_or(Ok(default), |v| parse_value(key, &v))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Missing required environment variables: {0:?}")]
    MissingEnvVars(Vec<&'static str>),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_settings() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.links_per_page, 10);
        assert_eq!(settings.collection_interval_secs, 300);
        assert_eq!(settings.whatsapp_max_age_days, 180);
        assert_eq!(settings.sessions_dir, PathBuf::from("sessions"));
        assert!(settings.bot_token.is_none());
        assert!(settings.admin_ids.is_empty());
    }

    #[test]
    fn test_overrides_and_lists() {
        let settings = settings_from(&[
            ("API_ID", "12345"),
            ("API_HASH", "abc123"),
            ("DATABASE_PATH", "/tmp/links.db"),
            ("BLACKLISTED_DOMAINS", "spam.example, ,bad.org"),
            ("ADMIN_IDS", "1, 2"),
        ])
        .unwrap();

        assert_eq!(settings.api_credentials().unwrap(), (12345, "abc123"));
        assert_eq!(settings.database_path, PathBuf::from("/tmp/links.db"));
        assert_eq!(settings.blacklisted_domains, vec!["spam.example", "bad.org"]);
        assert_eq!(settings.admin_ids, vec![1, 2]);
        assert!(settings.is_admin(2));
        assert!(!settings.is_admin(3));
    }

    #[test]
    fn test_invalid_number() {
        let err = settings_from(&[("COLLECTION_INTERVAL", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "COLLECTION_INTERVAL", .. }));
    }

    #[test]
    fn test_init_requires_token() {
        let settings = settings_from(&[]).unwrap();
        assert!(matches!(settings.init(), Err(ConfigError::MissingEnvVars(v)) if v == vec!["BOT_TOKEN"]));

        let settings = settings_from(&[("BOT_TOKEN", "   ")]).unwrap();
        assert!(matches!(settings.init(), Err(ConfigError::MissingEnvVars(v)) if v == vec!["BOT_TOKEN"]));

        let settings = settings_from(&[("BOT_TOKEN", "x")]).unwrap();
        assert!(settings.init().is_ok());
        assert!(settings.bot_token().is_err());
    }

    #[test]
    fn test_missing_api_credentials() {
        let settings = settings_from(&[("API_ID", "1")]).unwrap();
        assert!(matches!(
            settings.api_credentials(),
            Err(ConfigError::MissingEnvVar("API_HASH"))
        ));
    }
}

//! Bot token validation.

use thiserror::Error;

use super::MIN_TOKEN_LENGTH;

/// Reasons a bot token is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("BOT_TOKEN is not set")]
    Missing,

    #[error("BOT_TOKEN is too short: {length} characters (minimum {min})", min = MIN_TOKEN_LENGTH)]
    TooShort { length: usize },
}

/// Checks that a token is present and long enough to be a real bot token.
///
/// Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`TokenError::Missing`] for an unset or blank token and
/// [`TokenError::TooShort`] when it has fewer than [`MIN_TOKEN_LENGTH`] characters.
pub fn validate_bot_token(token: Option<&str>) -> Result<&str, TokenError> {
    let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or(TokenError::Missing)?;

    let length = token.chars().count();
    if length < MIN_TOKEN_LENGTH {
        return Err(TokenError::TooShort { length });
    }

    Ok(token)
}

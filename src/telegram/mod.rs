//! Telegram user sessions (MTProto via grammers).
//!
//! Provides session login, identity lookup, paced dialog and history
//! paging, document downloads, and the [`MessageSource`] seam the
//! collector reads through.

mod client;
mod rate_limiter;
mod source;

pub use client::{AccountInfo, QrAuthResult, SessionClient, TelegramError, mask_phone};
pub use grammers_client::client::{LoginToken, PasswordToken};
pub use rate_limiter::RateLimiter;
pub use source::{
    Attachment, ChatMessage, Dialog, DocumentLocation, DialogKind, GrammersConnector, HistoryPage, MessageSource, PeerRef,
    SourceConnector, session_file,
};

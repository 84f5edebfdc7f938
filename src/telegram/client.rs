//! MTProto user session backed by a grammers session file.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use grammers_client::client::{LoginToken, PasswordToken};
use grammers_client::{Client, InvocationError, SenderPool, SignInError, sender};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::RateLimiter;
use super::source::{
    Attachment, ChatMessage, Dialog, DialogKind, DocumentLocation, HistoryPage, MessageSource, PeerRef,
};

/// Dialogs requested per `messages.getDialogs` call.
const DIALOG_PAGE_SIZE: i32 = 100;

/// Bytes requested per `upload.getFile` call.
const DOWNLOAD_CHUNK: i32 = 512 * 1024;

/// RPC errors meaning the session's authorization is gone.
const UNAUTHORIZED_ERRORS: [&str; 4] = [
    "AUTH_KEY_UNREGISTERED",
    "SESSION_REVOKED",
    "SESSION_EXPIRED",
    "USER_DEACTIVATED",
];

/// Failures of a user session.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Session is not logged in")]
    NotAuthorized,

    #[error("Login failed: {0}")]
    SignInFailed(String),

    #[error("Two-step verification password needed")]
    PasswordRequired(PasswordToken),

    #[error("Wrong two-step verification password")]
    InvalidPassword(PasswordToken),

    #[error("Rate limited by Telegram for {0}s")]
    FloodWait(u32),

    #[error("Telegram connection failed: {0}")]
    Connection(String),

    #[error("Session file error: {0}")]
    Session(String),

    #[error("Telegram request failed: {0}")]
    Invocation(String),

    #[error("Download failed: {0}")]
    Download(String),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        if let InvocationError::Rpc(rpc) = &err {
            if rpc.name.starts_with("FLOOD_WAIT") || rpc.name.starts_with("SLOWMODE_WAIT") {
                if let Some(seconds) = rpc.value {
                    return Self::FloodWait(seconds);
                }
            }
            if UNAUTHORIZED_ERRORS.contains(&rpc.name.as_str()) {
                return Self::NotAuthorized;
            }
        }

        let text = err.to_string();
        match flood_wait_secs(&text) {
            Some(seconds) => Self::FloodWait(seconds),
            None => Self::Invocation(text),
        }
    }
}

/// Reads the wait time out of a textual `FLOOD_WAIT_<n>` or
/// `flood wait <n>` error.
fn flood_wait_secs(message: &str) -> Option<u32> {
    let lowered = message.to_ascii_lowercase();
    ["flood_wait_", "flood wait "].iter().find_map(|marker| {
        let rest = &lowered[lowered.find(marker)? + marker.len()..];
        let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        rest[..end].parse().ok()
    })
}

/// State of a QR login, as reported by `auth.exportLoginToken`.
#[derive(Debug, Clone)]
pub enum QrAuthResult {
    /// Not scanned yet; show this token (base64url in a `tg://login` URL).
    Token { token: Vec<u8>, expires: i32 },

    /// The account is served by another data center.
    MigrateTo { dc_id: i32 },

    /// Scanned and accepted.
    Success { user_id: i64, username: Option<String> },

    /// Scanned, but the account has two-step verification.
    PasswordRequired,
}

/// Identity of the logged-in account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub user_id: i64,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
}

/// One connected user session.
pub struct SessionClient {
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    rate_limiter: RateLimiter,

    _pool_task: JoinHandle<()>,
}

impl SessionClient {
    /// Opens a session file and connects it to Telegram.
    ///
    /// The file is created when missing; a new file starts unauthorized.
    ///
    /// # Errors
    ///
    /// Returns an error if the session file cannot be opened.
    pub async fn connect(
        session_path: &Path,
        api_id: i32,
        request_delay: Duration,
    ) -> Result<Self, TelegramError> {
        info!("Connecting session {}", session_path.display());

        let session = Arc::new(
            SqliteSession::open(session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates: _updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), api_id);

        let client = Client::new(handle.clone());

        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        Ok(Self {
            client,
            handle: handle.thin,
            rate_limiter: RateLimiter::new(request_delay),
            _pool_task: pool_task,
        })
    }

    /// Checks if the session is logged in.
    ///
    /// # Errors
    ///
    /// Returns an error if the check fails.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Fetches the logged-in account's identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not authorized or the call fails.
    pub async fn me(&self) -> Result<AccountInfo, TelegramError> {
        let request = tl::functions::users::GetUsers {
            id: vec![tl::enums::InputUser::UserSelf],
        };

        let users = self.invoke(&request).await?;
        match users.into_iter().next() {
            Some(tl::enums::User::User(user)) => Ok(AccountInfo {
                user_id: user.id,
                username: user.username,
                phone: user.phone,
                first_name: user.first_name,
            }),
            _ => Err(TelegramError::NotAuthorized),
        }
    }

    /// Asks Telegram to send a login code to `phone`.
    pub async fn request_login_code(
        &self,
        phone: &str,
        api_hash: &str,
    ) -> Result<LoginToken, TelegramError> {
        info!("Sending login code to {}", mask_phone(phone));

        self.client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))
    }

    /// Completes a code login.
    ///
    /// # Errors
    ///
    /// [`TelegramError::PasswordRequired`] carries the token for
    /// [`check_password`](Self::check_password) when two-step verification
    /// is on.
    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<(), TelegramError> {
        let result = self.client.sign_in(token, code).await;
        match result {
            Ok(_) => {
                info!("Session logged in");
                Ok(())
            }
            Err(SignInError::PasswordRequired(token)) => Err(TelegramError::PasswordRequired(token)),
            Err(SignInError::InvalidCode) => Err(TelegramError::SignInFailed("wrong login code".to_owned())),
            Err(other) => Err(TelegramError::SignInFailed(other.to_string())),
        }
    }

    /// Completes a login with the two-step verification password.
    ///
    /// # Errors
    ///
    /// A wrong password gives [`TelegramError::InvalidPassword`] with a
    /// token for the next attempt.
    pub async fn check_password(&self, token: PasswordToken, password: &str) -> Result<(), TelegramError> {
        let result = self.client.check_password(token, password).await;
        match result {
            Ok(_) => {
                info!("Session logged in with password");
                Ok(())
            }
            Err(SignInError::InvalidPassword(retry)) => Err(TelegramError::InvalidPassword(retry)),
            Err(other) => Err(TelegramError::SignInFailed(other.to_string())),
        }
    }

    /// Exports a QR login token, or learns that the last one was scanned.
    /// Poll it until [`QrAuthResult::Success`].
    pub async fn export_login_token(&self, api_id: i32, api_hash: &str) -> Result<QrAuthResult, TelegramError> {
        use tl::enums::auth::{Authorization, LoginToken as Exported};

        let request = tl::functions::auth::ExportLoginToken {
            api_id,
            api_hash: api_hash.to_owned(),
            except_ids: Vec::new(),
        };

        let exported = match self.client.invoke(&request).await {
            Ok(exported) => exported,
            Err(InvocationError::Rpc(rpc)) if rpc.name == "SESSION_PASSWORD_NEEDED" => {
                return Ok(QrAuthResult::PasswordRequired);
            }
            Err(other) => return Err(TelegramError::SignInFailed(other.to_string())),
        };

        Ok(match exported {
            Exported::Token(t) => QrAuthResult::Token {
                token: t.token,
                expires: t.expires,
            },
            Exported::MigrateTo(m) => QrAuthResult::MigrateTo { dc_id: m.dc_id },
            Exported::Success(done) => match done.authorization {
                Authorization::Authorization(auth) => match auth.user {
                    tl::enums::User::User(user) => QrAuthResult::Success {
                        user_id: user.id,
                        username: user.username,
                    },
                    tl::enums::User::Empty(empty) => QrAuthResult::Success {
                        user_id: empty.id,
                        username: None,
                    },
                },
                Authorization::SignUpRequired(_) => {
                    return Err(TelegramError::SignInFailed("account is not registered".to_owned()));
                }
            },
        })
    }

    /// Lists every dialog of the account, paging through `messages.getDialogs`.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails.
    pub async fn list_dialogs(&self) -> Result<Vec<Dialog>, TelegramError> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut offset_date = 0;
        let mut offset_id = 0;
        let mut offset_peer = tl::enums::InputPeer::Empty;

        loop {
            let request = tl::functions::messages::GetDialogs {
                exclude_pinned: false,
                folder_id: None,
                offset_date,
                offset_id,
                offset_peer: offset_peer.clone(),
                limit: DIALOG_PAGE_SIZE,
                hash: 0,
            };

            let (dialogs, messages, chats, users, complete) = match self.invoke(&request).await? {
                tl::enums::messages::Dialogs::Dialogs(d) => (d.dialogs, d.messages, d.chats, d.users, true),
                tl::enums::messages::Dialogs::Slice(d) => (d.dialogs, d.messages, d.chats, d.users, false),
                tl::enums::messages::Dialogs::NotModified(_) => break,
            };

            let page_len = dialogs.len();
            let mut next_offset = None;

            for dialog in &dialogs {
                let tl::enums::Dialog::Dialog(dialog) = dialog else {
                    continue;
                };
                let Some(found) = resolve_dialog(&dialog.peer, &chats, &users) else {
                    continue;
                };

                let date = messages
                    .iter()
                    .find_map(|m| message_stamp(m, dialog.top_message, &dialog.peer))
                    .unwrap_or(0);
                next_offset = Some((date, dialog.top_message, input_peer(found.peer)));

                if seen.insert((found.kind_key(), found.id)) {
                    result.push(found);
                }
            }

            let Some((date, id, peer)) = next_offset else { break };
            if complete || page_len < DIALOG_PAGE_SIZE as usize || (date, id) == (offset_date, offset_id) {
                break;
            }
            offset_date = date;
            offset_id = id;
            offset_peer = peer;
        }

        debug!("Loaded {} dialogs", result.len());
        Ok(result)
    }

    /// Fetches one page of a dialog's history, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn fetch_history(
        &self,
        dialog: &Dialog,
        page: HistoryPage,
    ) -> Result<Vec<ChatMessage>, TelegramError> {
        let request = tl::functions::messages::GetHistory {
            peer: input_peer(dialog.peer),
            offset_id: page.offset_id,
            offset_date: 0,
            add_offset: 0,
            limit: page.limit,
            max_id: 0,
            min_id: page.min_id,
            hash: 0,
        };

        let messages = match self.invoke(&request).await? {
            tl::enums::messages::Messages::Messages(m) => m.messages,
            tl::enums::messages::Messages::Slice(m) => m.messages,
            tl::enums::messages::Messages::ChannelMessages(m) => m.messages,
            tl::enums::messages::Messages::NotModified(_) => Vec::new(),
        };

        Ok(messages
            .into_iter()
            .filter_map(|m| chat_message(m, dialog.id))
            .collect())
    }

    /// Downloads an attached document chunk by chunk into `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails or the file cannot be written.
    pub async fn download_document(&self, attachment: &Attachment, dest: &Path) -> Result<(), TelegramError> {
        let location = &attachment.location;
        let input = tl::enums::InputFileLocation::InputDocumentFileLocation(
            tl::types::InputDocumentFileLocation {
                id: location.id,
                access_hash: location.access_hash,
                file_reference: location.file_reference.clone(),
                thumb_size: String::new(),
            },
        );

        let write_err = |e: std::io::Error| TelegramError::Download(format!("{}: {e}", dest.display()));
        let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;
        let chunk_len = usize::try_from(DOWNLOAD_CHUNK).unwrap_or(usize::MAX);
        let mut offset = 0_i64;
        let mut written = 0_usize;

        loop {
            let request = tl::functions::upload::GetFile {
                precise: false,
                cdn_supported: false,
                location: input.clone(),
                offset,
                limit: DOWNLOAD_CHUNK,
            };
            let bytes = match self.invoke_in_dc(location.dc_id, &request).await? {
                tl::enums::upload::File::File(chunk) => chunk.bytes,
                tl::enums::upload::File::CdnRedirect(_) => {
                    return Err(TelegramError::Download("document is served by a CDN".to_owned()));
                }
            };

            file.write_all(&bytes).await.map_err(write_err)?;
            written += bytes.len();
            if bytes.len() < chunk_len {
                break;
            }
            offset += i64::from(DOWNLOAD_CHUNK);
        }

        file.flush().await.map_err(write_err)?;
        debug!("Downloaded {} ({} bytes)", attachment.file_name, written);
        Ok(())
    }

    /// Sends a request after waiting for the rate limiter.
    async fn invoke<R: tl::RemoteCall>(&self, request: &R) -> Result<R::Return, TelegramError> {
        self.paced(self.client.invoke(request)).await
    }

    /// Sends a request to a specific data center after waiting for the
    /// rate limiter.
    async fn invoke_in_dc<R: tl::RemoteCall>(&self, dc_id: i32, request: &R) -> Result<R::Return, TelegramError> {
        self.paced(self.client.invoke_in_dc(dc_id, request)).await
    }

    async fn paced<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, InvocationError>>,
    ) -> Result<T, TelegramError> {
        let waited = self.rate_limiter.wait_and_acquire().await;
        if !waited.is_zero() {
            debug!("Waited {:?} for rate limit", waited);
        }

        match call.await {
            Ok(response) => Ok(response),
            Err(e) => {
                let err = TelegramError::from(e);
                if let TelegramError::FloodWait(seconds) = &err {
                    self.rate_limiter.handle_flood_wait(*seconds).await;
                }
                Err(err)
            }
        }
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        debug!("Disconnecting session");
        self.handle.quit();
    }
}

#[async_trait]
impl MessageSource for SessionClient {
    async fn dialogs(&self) -> Result<Vec<Dialog>, TelegramError> {
        self.list_dialogs().await
    }

    async fn history(&self, dialog: &Dialog, page: HistoryPage) -> Result<Vec<ChatMessage>, TelegramError> {
        self.fetch_history(dialog, page).await
    }

    async fn download(&self, attachment: &Attachment, dest: &Path) -> Result<(), TelegramError> {
        self.download_document(attachment, dest).await
    }

    fn close(&self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

impl Dialog {
    const fn kind_key(&self) -> u8 {
        match self.kind {
            DialogKind::Group => 0,
            DialogKind::Channel => 1,
            DialogKind::User => 2,
        }
    }
}

/// Finds the chat or user behind a dialog peer.
fn resolve_dialog(
    peer: &tl::enums::Peer,
    chats: &[tl::enums::Chat],
    users: &[tl::enums::User],
) -> Option<Dialog> {
    match peer {
        tl::enums::Peer::Chat(p) => chats.iter().find_map(|chat| match chat {
            tl::enums::Chat::Chat(c) if c.id == p.chat_id => Some(Dialog {
                id: c.id,
                title: c.title.clone(),
                kind: DialogKind::Group,
                peer: PeerRef::Chat(c.id),
            }),
            _ => None,
        }),
        tl::enums::Peer::Channel(p) => chats.iter().find_map(|chat| match chat {
            tl::enums::Chat::Channel(c) if c.id == p.channel_id => Some(Dialog {
                id: c.id,
                title: c.title.clone(),
                kind: if c.megagroup {
                    DialogKind::Group
                } else {
                    DialogKind::Channel
                },
                peer: PeerRef::Channel {
                    id: c.id,
                    access_hash: c.access_hash?,
                },
            }),
            _ => None,
        }),
        tl::enums::Peer::User(p) => users.iter().find_map(|user| match user {
            tl::enums::User::User(u) if u.id == p.user_id => Some(Dialog {
                id: u.id,
                title: u
                    .first_name
                    .clone()
                    .or_else(|| u.username.clone())
                    .unwrap_or_default(),
                kind: DialogKind::User,
                peer: PeerRef::User {
                    id: u.id,
                    access_hash: u.access_hash?,
                },
            }),
            _ => None,
        }),
    }
}

fn input_peer(peer: PeerRef) -> tl::enums::InputPeer {
    match peer {
        PeerRef::Chat(chat_id) => tl::enums::InputPeer::Chat(tl::types::InputPeerChat { chat_id }),
        PeerRef::Channel { id, access_hash } => {
            tl::enums::InputPeer::Channel(tl::types::InputPeerChannel {
                channel_id: id,
                access_hash,
            })
        }
        PeerRef::User { id, access_hash } => tl::enums::InputPeer::User(tl::types::InputPeerUser {
            user_id: id,
            access_hash,
        }),
    }
}

fn same_peer(a: &tl::enums::Peer, b: &tl::enums::Peer) -> bool {
    match (a, b) {
        (tl::enums::Peer::User(a), tl::enums::Peer::User(b)) => a.user_id == b.user_id,
        (tl::enums::Peer::Chat(a), tl::enums::Peer::Chat(b)) => a.chat_id == b.chat_id,
        (tl::enums::Peer::Channel(a), tl::enums::Peer::Channel(b)) => a.channel_id == b.channel_id,
        _ => false,
    }
}

/// Date of message `id` in `peer`, used as the next dialogs page offset.
fn message_stamp(message: &tl::enums::Message, id: i32, peer: &tl::enums::Peer) -> Option<i32> {
    match message {
        tl::enums::Message::Message(m) if m.id == id && same_peer(&m.peer_id, peer) => Some(m.date),
        tl::enums::Message::Service(m) if m.id == id && same_peer(&m.peer_id, peer) => Some(m.date),
        _ => None,
    }
}

/// Reduces a raw message to its text and hidden URLs.
fn chat_message(message: tl::enums::Message, chat_id: i64) -> Option<ChatMessage> {
    let tl::enums::Message::Message(m) = message else {
        return None;
    };

    let mut urls = Vec::new();
    for entity in m.entities.iter().flatten() {
        if let tl::enums::MessageEntity::TextUrl(text_url) = entity {
            urls.push(text_url.url.clone());
        }
    }
    if let Some(tl::enums::ReplyMarkup::ReplyInlineMarkup(markup)) = &m.reply_markup {
        for row in &markup.rows {
            let tl::enums::KeyboardButtonRow::Row(row) = row;
            for button in &row.buttons {
                if let tl::enums::KeyboardButton::Url(button) = button {
                    urls.push(button.url.clone());
                }
            }
        }
    }

    let attachment = m.media.as_ref().and_then(document_attachment);
    if m.message.is_empty() && urls.is_empty() && attachment.is_none() {
        return None;
    }

    Some(ChatMessage {
        id: m.id,
        chat_id,
        date: DateTime::from_timestamp(i64::from(m.date), 0),
        text: m.message,
        urls,
        attachment,
    })
}

/// Extracts the document of a message, if it has one.
fn document_attachment(media: &tl::enums::MessageMedia) -> Option<Attachment> {
    let tl::enums::MessageMedia::Document(media) = media else {
        return None;
    };
    let Some(tl::enums::Document::Document(doc)) = &media.document else {
        return None;
    };

    let file_name = doc
        .attributes
        .iter()
        .find_map(|attribute| match attribute {
            tl::enums::DocumentAttribute::Filename(name) => Some(name.file_name.clone()),
            _ => None,
        })
        .unwrap_or_default();

    Some(Attachment {
        file_name,
        size: u64::try_from(doc.size).unwrap_or(0),
        location: DocumentLocation {
            id: doc.id,
            access_hash: doc.access_hash,
            file_reference: doc.file_reference.clone(),
            dc_id: doc.dc_id,
        },
    })
}

/// Hides all but the last four digits of a phone number.
#[must_use]
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        0..=4 => "****".to_owned(),
        n => format!("***{}", digits[n - 4..].iter().collect::<String>()),
    }
}

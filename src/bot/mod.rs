//! Telegram control bot.
//!
//! A teloxide dispatcher routes `/start`, inline button presses, text
//! messages and uploaded documents to the [`CommandHandler`] and renders
//! its [`Reply`]s. Only users listed in `ADMIN_IDS` are served when that
//! list is non-empty.

mod render;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use teloxide::dispatching::UpdateHandler;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};
use teloxide::{ApiError, RequestError};
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

pub use render::inline_keyboard;

use crate::commands::{CommandHandler, MenuAction, Reply};
use crate::config::Settings;
use crate::files::local_file_name;
use crate::sessions::TelegramProbe;

/// Handler type used by the running bot.
pub type BotHandler = CommandHandler<TelegramProbe>;

/// Largest upload the Bot API lets bots download.
pub const MAX_UPLOAD_BYTES: u32 = 20 * 1024 * 1024;

/// Slash commands understood by the bot.
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "show the main menu")]
    Start,
    #[command(description = "show the main menu")]
    Menu,
}

/// Runs the control bot until Ctrl+C.
pub async fn run(token: &str, settings: Arc<Settings>, handler: Arc<BotHandler>) {
    let bot = Bot::new(token);

    match bot.get_me().await {
        Ok(me) => info!("Control bot @{} is running", me.username()),
        Err(e) => warn!("Could not fetch bot info: {}", e),
    }

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![settings, handler])
        .default_handler(|update| async move {
            debug!("Unhandled update: {:?}", update.id);
        })
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Control bot stopped");
}

fn schema() -> UpdateHandler<anyhow::Error> {
    dptree::entry()
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery, settings: Arc<Settings>| {
                    settings.is_admin(user_id(q.from.id))
                })
                .endpoint(on_callback),
        )
        .branch(
            Update::filter_message()
                .filter(|msg: Message, settings: Arc<Settings>| {
                    msg.from
                        .as_ref()
                        .is_some_and(|user| settings.is_admin(user_id(user.id)))
                })
                .branch(dptree::entry().filter_command::<Command>().endpoint(on_command))
                .branch(dptree::filter(|msg: Message| msg.document().is_some()).endpoint(on_document))
                .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(on_text)),
        )
        .branch(Update::filter_message().endpoint(on_unauthorized))
}

fn user_id(id: UserId) -> i64 {
    i64::try_from(id.0).unwrap_or(i64::MAX)
}

async fn on_command(bot: Bot, msg: Message, handler: Arc<BotHandler>) -> Result<()> {
    send(&bot, msg.chat.id, None, handler.handle_start()).await
}

async fn on_text(bot: Bot, msg: Message, handler: Arc<BotHandler>) -> Result<()> {
    let text = msg.text().unwrap_or_default();
    let reply = handler.handle_text(msg.chat.id.0, text).await;
    send(&bot, msg.chat.id, None, reply).await
}

async fn on_callback(bot: Bot, q: CallbackQuery, handler: Arc<BotHandler>) -> Result<()> {
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        debug!("Failed to answer callback query: {}", e);
    }

    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat().id;

    let Some(action) = q.data.as_deref().and_then(MenuAction::parse) else {
        warn!("Unknown callback data: {:?}", q.data);
        return Ok(());
    };

    let reply = handler.handle_action(chat_id.0, action).await;
    send(&bot, chat_id, Some(message.id()), reply).await
}

async fn on_document(
    bot: Bot,
    msg: Message,
    handler: Arc<BotHandler>,
    settings: Arc<Settings>,
) -> Result<()> {
    let Some(document) = msg.document() else {
        return Ok(());
    };

    if document.file.size > MAX_UPLOAD_BYTES {
        bot.send_message(msg.chat.id, "❌ The file is larger than 20 MB.")
            .await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, "⏳ Processing the file...").await?;

    let name = local_file_name(document.file_name.as_deref(), &msg.id.0.to_string());
    tokio::fs::create_dir_all(&settings.temp_dir).await?;
    let path = settings.temp_dir.join(name);

    let reply = match download(&bot, &document.file.id, &path).await {
        Ok(()) => handler.handle_upload(msg.chat.id.0, &path).await,
        Err(e) => {
            warn!("Failed to download upload: {:#}", e);
            Reply::message(format!("❌ Failed to download the file: {e}"))
        }
    };

    if let Err(e) = tokio::fs::remove_file(&path).await {
        debug!("Could not remove {}: {}", path.display(), e);
    }

    send(&bot, msg.chat.id, None, reply).await
}

async fn on_unauthorized(bot: Bot, msg: Message) -> Result<()> {
    warn!(
        "Rejected message from unauthorized user {:?}",
        msg.from.as_ref().map(|u| u.id)
    );
    bot.send_message(msg.chat.id, "⛔ Access denied.").await?;
    Ok(())
}

async fn download(bot: &Bot, file_id: &teloxide::types::FileId, path: &Path) -> Result<()> {
    let file = bot.get_file(file_id.clone()).await?;
    let mut dst = tokio::fs::File::create(path).await?;
    bot.download_file(&file.path, &mut dst).await?;
    Ok(())
}

/// Renders a reply: edits the pressed message when asked to, otherwise
/// sends a new one; attaches the document afterwards.
async fn send(bot: &Bot, chat_id: ChatId, origin: Option<MessageId>, reply: Reply) -> Result<()> {
    let markup = reply.keyboard.as_ref().map(inline_keyboard);

    let edited = match origin.filter(|_| reply.edit) {
        Some(message_id) => {
            let mut request = bot.edit_message_text(chat_id, message_id, reply.text.clone());
            if let Some(markup) = markup.clone() {
                request = request.reply_markup(markup);
            }
            match request.await {
                Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => true,
                Err(e) => {
                    debug!("Edit failed, sending a new message: {}", e);
                    false
                }
            }
        }
        None => false,
    };

    if !edited {
        let mut request = bot.send_message(chat_id, reply.text.clone());
        if let Some(markup) = markup {
            request = request.reply_markup(markup);
        }
        request.await?;
    }

    if let Some(path) = reply.document {
        bot.send_document(chat_id, InputFile::file(path)).await?;
    }

    Ok(())
}

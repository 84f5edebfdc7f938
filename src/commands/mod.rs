//! Control menu of the bot.
//!
//! Inline buttons carry a [`MenuAction`] as callback data; the
//! [`CommandHandler`] executes it and answers with a [`Reply`] that the bot
//! layer renders. Nothing here depends on the bot transport.

mod handler;
mod types;

pub use handler::{CommandHandler, HandlerOptions};
pub use types::{
    Button, Keyboard, MenuAction, Reply, back_menu, collection_menu, export_menu, main_menu,
};

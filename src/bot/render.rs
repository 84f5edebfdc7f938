//! Conversion of menu replies into Bot API markup.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::commands::Keyboard;

/// Builds an inline keyboard whose buttons carry their action as callback data.
#[must_use]
pub fn inline_keyboard(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.iter().map(|row| {
        row.iter()
            .map(|button| InlineKeyboardButton::callback(button.label.clone(), button.action.data()))
            .collect::<Vec<_>>()
    }))
}

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::session::{Category, Letter};

pub(crate) fn categories_keyboard() -> InlineKeyboardMarkup {
    let keyboard: Vec<Vec<InlineKeyboardButton>> = Category::ALL
        .iter()
        .map(|category| {
            vec![InlineKeyboardButton::callback(
                format!("📚 {}", category.label()),
                format!("nivel:{}", category.tag()),
            )]
        })
        .collect();

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn letters_keyboard(slot_index: usize) -> InlineKeyboardMarkup {
    let row: Vec<InlineKeyboardButton> = Letter::ALL
        .iter()
        .map(|letter| {
            InlineKeyboardButton::callback(
                letter.as_str(),
                format!("resposta:{slot_index}:{letter}"),
            )
        })
        .collect();

    InlineKeyboardMarkup::new(vec![row])
}

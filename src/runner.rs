use std::sync::Arc;

use teloxide::{
    dispatching::dialogue::GetChatId,
    payloads::SendMessageSetters,
    prelude::Requester,
    types::{CallbackQuery, ChatId},
    Bot,
};
use tracing::instrument;

use crate::database::connection::{Connection, UserDirectory};
use crate::engine::{Engine, ReplyError, ReplyTarget};
use crate::keyboard::letters_keyboard;
use crate::question::{ChatGptSource, GeneratedQuestions};
use crate::session::{Category, Letter, QuestionSlot, UserId, QUESTION_COUNT};
use crate::HandlerResult;

/// The session engine as wired in production.
pub type QuizEngine = Engine<GeneratedQuestions<ChatGptSource>, BotReplies, Arc<Connection>>;

/// `ReplyTarget` over the live Telegram bot.
pub struct BotReplies {
    bot: Bot,
}

impl BotReplies {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

impl ReplyTarget for BotReplies {
    async fn send_question(
        &self,
        user: UserId,
        slot_index: usize,
        slot: &QuestionSlot,
    ) -> Result<(), ReplyError> {
        let text = format!(
            "📝 Questão {}/{}\n\n{}\n\n{}",
            slot_index + 1,
            QUESTION_COUNT,
            slot.body(),
            slot.options().join("\n")
        );
        self.bot
            .send_message(ChatId(user.0), text)
            .reply_markup(letters_keyboard(slot_index))
            .await?;
        Ok(())
    }

    async fn send_notice(&self, user: UserId, text: &str) -> Result<(), ReplyError> {
        self.bot.send_message(ChatId(user.0), text).await?;
        Ok(())
    }

    async fn send_report(&self, user: UserId, text: &str) -> Result<(), ReplyError> {
        self.bot.send_message(ChatId(user.0), text).await?;
        Ok(())
    }
}

fn parse_answer(data: &str) -> Option<(usize, Letter)> {
    let (slot, letter) = data.split_once(':')?;
    let slot = slot.parse().ok()?;
    let mut chars = letter.chars();
    let letter = Letter::from_char(chars.next()?)?;
    if chars.next().is_some() {
        return None;
    }
    Some((slot, letter))
}

/// Routes button presses: `nivel:<tag>` starts a test for a registered
/// user, `resposta:<slot>:<letter>` submits an answer.
#[instrument(level = "info", skip(bot, engine, connection))]
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    engine: Arc<QuizEngine>,
    connection: Arc<Connection>,
) -> HandlerResult {
    bot.answer_callback_query(&q.id).await?;

    let (Some(data), Some(chat_id)) = (q.data.as_deref(), q.chat_id()) else {
        return Ok(());
    };
    let user = UserId(chat_id.0);

    if let Some(tag) = data.strip_prefix("nivel:") {
        let Some(category) = Category::from_tag(tag) else {
            log::error!("unknown category tag '{tag}' from {user}");
            return Ok(());
        };
        match connection.find_user(user.0).await? {
            None => {
                bot.send_message(chat_id, "🔍 Use /start antes de iniciar o teste.")
                    .await?;
            }
            Some(record) if record.test_completed => {
                bot.send_message(chat_id, "🎓 Você já completou o teste!")
                    .await?;
            }
            Some(_) => engine.start(user, category).await?,
        }
    } else if let Some(rest) = data.strip_prefix("resposta:") {
        let Some((slot_index, letter)) = parse_answer(rest) else {
            log::error!("malformed answer callback '{data}' from {user}");
            return Ok(());
        };
        engine.submit_answer(user, slot_index, letter).await?;
    } else {
        log::error!("unrecognized callback '{data}' from {user}");
    }

    Ok(())
}

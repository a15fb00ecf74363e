use std::sync::Arc;

use teloxide::{
    payloads::SendMessageSetters, prelude::Requester, types::Message, utils::command::BotCommands,
    Bot,
};

use crate::database::connection::UserDirectory;
use crate::keyboard::categories_keyboard;
use crate::runner::QuizEngine;
use crate::session::UserId;
use crate::HandlerResult;

#[derive(Debug, Clone, BotCommands)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "mostrar esta ajuda.")]
    Help,
    #[command(description = "registrar e escolher o teste de nivelamento.")]
    Start,
    #[command(description = "abandonar o teste em andamento.")]
    Cancel,
}

pub async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

pub async fn start<D: UserDirectory>(bot: Bot, msg: Message, directory: Arc<D>) -> HandlerResult {
    let name = msg
        .chat
        .first_name()
        .or(msg.chat.username())
        .unwrap_or("aluno");
    let user = directory.register_user(msg.chat.id.0, name).await?;
    log::info!("{} opened the bot (/start)", user.telegram_id);

    bot.send_message(
        msg.chat.id,
        format!(
            "Olá, {name}! 👋\nEscolha uma categoria para o teste de nivelamento:"
        ),
    )
    .reply_markup(categories_keyboard())
    .await?;
    Ok(())
}

pub async fn cancel(bot: Bot, msg: Message, engine: Arc<QuizEngine>) -> HandlerResult {
    let user = UserId(msg.chat.id.0);
    if engine.abandon(user).await? {
        bot.send_message(msg.chat.id, "❌ Teste cancelado. Use /start para recomeçar.")
            .await?;
    } else {
        bot.send_message(msg.chat.id, "Não há teste em andamento.")
            .await?;
    }
    Ok(())
}

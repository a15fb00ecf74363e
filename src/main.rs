use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateHandler;
use teloxide::error_handlers::IgnoringErrorHandlerSafe;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks::{self, Options};
use tracing::level_filters;
use tracing_subscriber::fmt::format::FmtSpan;
use url::Url;

use tombot::commands::{cancel, help, start, Command};
use tombot::database::connection::Connection;
use tombot::engine::{Engine, EngineConfig};
use tombot::question::{ChatGptSource, GeneratedQuestions};
use tombot::runner::{self, BotReplies, QuizEngine};
use tombot::HandlerResult;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let rust_log = std::env::var("LOG_LEVEL").unwrap_or("info".into());
    tracing_subscriber::fmt()
        .with_max_level(level_filters::LevelFilter::from_level(rust_log.parse().unwrap()))
        .json()
        .with_span_events(FmtSpan::ENTER)
        .log_internal_errors(true)
        .with_ansi(true)
        .with_line_number(true)
        .with_target(false)
        .init();

    let connection_string = std::env::var("DATABASE_URL").expect("DATABASE_URL should be set.");
    let connection =
        Arc::new(Connection::connect(std::borrow::Cow::Owned(connection_string)).await);
    connection.run_migrations().await;

    let teloxide_token = std::env::var("TELOXIDE_TOKEN").expect("TELOXIDE_TOKEN should be set.");
    let bot = Bot::new(teloxide_token);

    let openai_key = std::env::var("OPENAI_KEY").expect("OPENAI_KEY should be set.");
    let source = ChatGptSource::new(&openai_key).expect("Failed to build the question source.");
    let generation_budget = std::env::var("GENERATION_BUDGET_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(15));
    let provider = GeneratedQuestions::new(source, generation_budget);

    let engine: Arc<QuizEngine> = Engine::new(
        provider,
        BotReplies::new(bot.clone()),
        Arc::clone(&connection),
        EngineConfig::from_env(),
    );

    log::info!("Starting bot...");

    let ngrok_url = std::env::var("NGROK_URL").map(|d| d.parse::<Url>().unwrap()).ok();
    let ngrok_addr = std::env::var("NGROK_ADDR")
        .map(|d| d.parse::<SocketAddr>().expect("NGROK_ADDR can't be parsed."))
        .ok();

    let mut dispatcher = Dispatcher::builder(bot.clone(), schema())
        .dependencies(dptree::deps![engine, connection])
        .enable_ctrlc_handler()
        .build();

    if let (Some(ngrok_url), Some(ngrok_addr)) = (ngrok_url, ngrok_addr) {
        let listener = webhooks::axum(bot, Options::new(ngrok_addr, ngrok_url))
            .await
            .expect("Failed to build a listener.");
        dispatcher
            .dispatch_with_listener(listener, Arc::new(IgnoringErrorHandlerSafe))
            .await
    } else {
        dispatcher.dispatch().await
    }
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Help].endpoint(help))
        .branch(case![Command::Start].endpoint(start::<Connection>))
        .branch(case![Command::Cancel].endpoint(cancel));

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .endpoint(invalid_state);

    let callback_handler = Update::filter_callback_query().endpoint(runner::handle_callback);

    dptree::entry()
        .branch(message_handler)
        .branch(callback_handler)
}

async fn invalid_state(bot: Bot, msg: Message) -> HandlerResult {
    log::info!("{}: unhandled message '{:?}'", msg.chat.id, msg.text());
    bot.send_message(
        msg.chat.id,
        "Não entendi. Use /start para começar ou /help para ver os comandos.",
    )
    .await?;
    Ok(())
}

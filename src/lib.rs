pub mod commands;
pub mod database;
pub mod engine;
pub mod keyboard;
pub mod question;
pub mod report;
pub mod runner;
pub mod session;
pub mod timeout;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;

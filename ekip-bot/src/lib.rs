//! ekip-bot: chat front ends for the ekip team engine.
//!
//! - `command`: tokens and command parsing
//! - `handlers`: the commands themselves, on top of ekip-core
//! - `messages`: everything a user gets to read
//! - `config`: TOML file plus command-line overrides
//! - `console`: stdin front end over the in-memory directory
//! - `discord`: serenity front end (`discord` feature)

pub mod command;
pub mod config;
pub mod console;
#[cfg(feature = "discord")]
pub mod discord;
pub mod handlers;
pub mod messages;

pub use command::{Command, Token};
pub use config::{Args, Backend, BotConfig};
pub use handlers::{CommandHandlers, Invocation};
pub use messages::CommandResult;

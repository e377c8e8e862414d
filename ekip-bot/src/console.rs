//! Console front end over an in-memory directory.
//!
//! Each stdin line is `name: text`. `name` is the speaker; anyone not yet
//! in the directory joins on first sight. Inside `text`, `@name` mentions a
//! member and `&name` mentions a team (`&123` mentions any group by id).
//!
//! A member called `admin` holding the `Admins` group is set up at start
//! unless the config names an admin group of its own.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use ekip_core::directory::GroupSpec;
use ekip_core::{DirectoryClient, EntityId, Engine, InMemoryDirectory};

use crate::command::Token;
use crate::config::BotConfig;
use crate::handlers::{CommandHandlers, Invocation};
use crate::messages::CommandResult;

pub const ADMIN_NAME: &str = "admin";
const CONSOLE_GUILD: u64 = 0;
const CONSOLE_CHANNEL: EntityId = EntityId(0);

pub struct Console {
    directory: Arc<InMemoryDirectory>,
    engine: Engine,
    handlers: CommandHandlers,
}

impl Console {
    pub async fn start(mut config: BotConfig) -> anyhow::Result<Self> {
        let directory = Arc::new(InMemoryDirectory::new());
        if config.admin_group.is_none() {
            let group = directory
                .create_group(&GroupSpec {
                    name: "Admins".to_string(),
                    color: 0,
                    hoist: false,
                    mentionable: false,
                })
                .await
                .context("creating the admin group")?;
            let admin = directory.join_member(ADMIN_NAME).await;
            directory
                .grant(group, admin)
                .await
                .context("granting the admin group")?;
            config.admin_group = Some(group);
        }

        let engine = Engine::start(directory.clone(), config.team.clone())
            .await
            .context("starting the engine")?;
        let handlers = CommandHandlers::new(engine.lifecycle().clone(), config);
        Ok(Self {
            directory,
            engine,
            handlers,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn directory(&self) -> &Arc<InMemoryDirectory> {
        &self.directory
    }

    pub fn handlers(&self) -> &CommandHandlers {
        &self.handlers
    }

    /// Look a member up by name, joining them if needed.
    pub async fn member(&self, name: &str) -> EntityId {
        let cache = self.engine.cache();
        if let Some(m) = cache.get_member_by_name(name) {
            return m.id;
        }
        let id = self.directory.join_member(name).await;
        let timeout = cache.config().settle_timeout();
        if !cache.wait_until(timeout, |c| c.get_member(id).is_some()).await {
            tracing::warn!(member = %id, name, "Joined member not visible yet");
        }
        id
    }

    async fn tokenize(&self, text: &str) -> Vec<Token> {
        let cache = self.engine.cache();
        let team_config = cache.config();
        let mut tokens = Vec::new();
        for word in text.split_whitespace() {
            if let Some(name) = word.strip_prefix('@').filter(|n| !n.is_empty()) {
                tokens.push(Token::Member(self.member(name).await));
            } else if let Some(name) = word.strip_prefix('&').filter(|n| !n.is_empty()) {
                let group = match name.parse::<u64>() {
                    Ok(id) => Some(EntityId(id)),
                    Err(_) => cache
                        .find_team_by_name(&team_config.display_name(name))
                        .map(|t| t.id),
                };
                tokens.push(match group {
                    Some(id) => Token::Group(id),
                    None => Token::Word(word.to_string()),
                });
            } else {
                tokens.push(Token::Word(word.to_string()));
            }
        }
        tokens
    }

    /// Handle one `name: text` line.
    pub async fn line(&self, line: &str) -> Vec<CommandResult> {
        let Some((speaker, text)) = line.split_once(':') else {
            return Vec::new();
        };
        let speaker = speaker.trim();
        let Some(body) = text.trim().strip_prefix(self.handlers.config().prefix.as_str()) else {
            return Vec::new();
        };
        if speaker.is_empty() {
            return Vec::new();
        }
        let inv = Invocation {
            caller: self.member(speaker).await,
            guild: Some(CONSOLE_GUILD),
            channel: CONSOLE_CHANNEL,
        };
        let tokens = self.tokenize(body).await;
        self.handlers.dispatch(&inv, &tokens).await
    }

    /// Read stdin until EOF.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let prefix = self.handlers.config().prefix.clone();
        stdout
            .write_all(
                format!("ekip console. Type `name: {prefix}help`. `{ADMIN_NAME}` is an admin.\n")
                    .as_bytes(),
            )
            .await?;

        while let Some(line) = lines.next_line().await? {
            for result in self.line(&line).await {
                let tag = match &result {
                    CommandResult::Ok(_) => "ok",
                    CommandResult::Rejected(_) => "rejected",
                    CommandResult::Error(_) => "error",
                };
                stdout
                    .write_all(format!("[{tag}] {}\n", result.text()).as_bytes())
                    .await?;
            }
            stdout.flush().await?;
        }
        Ok(())
    }
}

//! Bot configuration.
//!
//! Settings come from a TOML file (`--config`, else
//! `~/.config/ekip/ekip.toml`) with command-line flags layered on top.
//! A missing file means defaults; a file that exists but does not parse is
//! an error rather than a silent fallback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use ekip_core::{EntityId, TeamConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-memory directory driven from stdin.
    Memory,
    /// A Discord guild (needs the `discord` feature).
    Discord,
}

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "ekip", about = "Team provisioning bot")]
pub struct Args {
    /// Config file path.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Directory backend.
    #[arg(long, value_enum, default_value = "memory")]
    pub backend: Backend,

    /// Command prefix (overrides the file).
    #[arg(long)]
    pub prefix: Option<String>,

    /// Discord guild id (overrides the file).
    #[arg(long)]
    pub guild_id: Option<u64>,

    /// Discord bot token.
    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiscordConfig {
    pub guild_id: Option<u64>,
    /// Usually left out of the file and taken from `DISCORD_BOT_TOKEN`.
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    pub prefix: String,
    /// Members of this group may run admin commands.
    pub admin_group: Option<EntityId>,
    /// When set, create/add/leave are only accepted in this channel.
    pub command_channel: Option<EntityId>,
    pub reconcile_interval_secs: u64,
    pub team: TeamConfig,
    pub discord: DiscordConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            admin_group: None,
            command_channel: None,
            reconcile_interval_secs: 60,
            team: TeamConfig::default(),
            discord: DiscordConfig::default(),
        }
    }
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ekip")
        .join("ekip.toml")
}

impl BotConfig {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Load the file named by `args` (or the default path) and apply the
    /// flag overrides.
    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        let path = args.config.clone().unwrap_or_else(default_path);
        let mut config = Self::load(&path)?;
        if let Some(prefix) = &args.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(guild) = args.guild_id {
            config.discord.guild_id = Some(guild);
        }
        if let Some(token) = &args.token {
            config.discord.token = Some(token.clone());
        }
        if config.prefix.is_empty() {
            anyhow::bail!("command prefix must not be empty");
        }
        Ok(config)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

//! Command handlers.
//!
//! Each handler validates its arguments, calls into the resolver or the
//! lifecycle manager and turns the outcome into [`CommandResult`]s. None of
//! them talk to the directory directly.

use std::sync::Arc;

use ekip_core::{EntityCache, EntityId, NotFound, Team, TeamError, TeamLifecycleManager};

use crate::command::{self, Command, TeamRef, Token};
use crate::config::BotConfig;
use crate::messages::{self, CommandResult};

/// Who issued a command, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub caller: EntityId,
    /// `None` for direct messages, which are ignored.
    pub guild: Option<u64>,
    pub channel: EntityId,
}

pub struct CommandHandlers {
    lifecycle: Arc<TeamLifecycleManager>,
    config: BotConfig,
}

impl CommandHandlers {
    pub fn new(lifecycle: Arc<TeamLifecycleManager>, config: BotConfig) -> Self {
        Self { lifecycle, config }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    fn cache(&self) -> &EntityCache {
        self.lifecycle.cache()
    }

    /// Handle a message body. Returns nothing for text that is not a
    /// command of ours or that came from outside a guild.
    pub async fn dispatch(&self, inv: &Invocation, tokens: &[Token]) -> Vec<CommandResult> {
        if inv.guild.is_none() {
            return Vec::new();
        }
        match command::parse(tokens) {
            Ok(Some(cmd)) => self.handle(inv, cmd).await,
            Ok(None) => Vec::new(),
            Err(usage) => vec![CommandResult::Rejected(messages::usage(
                &self.config.prefix,
                usage.0,
            ))],
        }
    }

    pub async fn handle(&self, inv: &Invocation, cmd: Command) -> Vec<CommandResult> {
        if inv.guild.is_none() {
            return Vec::new();
        }
        tracing::info!(caller = %inv.caller, channel = %inv.channel, command = ?cmd, "Command");
        match cmd {
            Command::Status { members } => self.status(inv, &members),
            Command::Create { name } => self.create(inv, &name).await,
            Command::Add { members, index } => self.add(inv, &members, index.as_deref()).await,
            Command::Leave { index } => self.leave(inv, index.as_deref()).await,
            Command::Delete { team } => self.delete(inv, &team).await,
            Command::DeleteAll => self.delete_all(inv).await,
            Command::Help => vec![CommandResult::Ok(messages::help(&self.config.prefix))],
        }
    }

    fn is_admin(&self, member: EntityId) -> bool {
        self.config
            .admin_group
            .is_some_and(|group| self.cache().member_in_group(member, group))
    }

    /// Membership commands are only taken in the command channel, if one is set.
    fn wrong_channel(&self, inv: &Invocation) -> Option<Vec<CommandResult>> {
        match self.config.command_channel {
            Some(channel) if channel != inv.channel => {
                Some(vec![CommandResult::Rejected(messages::wrong_channel(channel))])
            }
            _ => None,
        }
    }

    fn fail(&self, inv: &Invocation, err: &TeamError) -> CommandResult {
        match err {
            TeamError::Provisioning { .. } | TeamError::Teardown(_) | TeamError::Directory(_) => {
                tracing::warn!(caller = %inv.caller, error = %err, "Command failed");
            }
            _ => tracing::debug!(caller = %inv.caller, error = %err, "Command rejected"),
        }
        messages::error(self.cache(), inv.caller, err)
    }

    // ─── Member commands ─────────────────────────────────────────────────

    /// One line per member; the caller when nobody is mentioned.
    pub fn status(&self, inv: &Invocation, members: &[EntityId]) -> Vec<CommandResult> {
        let targets = if members.is_empty() {
            vec![inv.caller]
        } else {
            members.to_vec()
        };
        let resolver = self.lifecycle.resolver();
        targets
            .into_iter()
            .map(|m| {
                let name = messages::member_name(self.cache(), m);
                CommandResult::Ok(messages::status_line(&name, &resolver.teams_of(m)))
            })
            .collect()
    }

    pub async fn create(&self, inv: &Invocation, name: &str) -> Vec<CommandResult> {
        if let Some(rejected) = self.wrong_channel(inv) {
            return rejected;
        }
        match self.lifecycle.create(name, inv.caller).await {
            Ok(team) => vec![CommandResult::Ok(messages::created(&team))],
            Err(e) => vec![self.fail(inv, &e)],
        }
    }

    /// Add each mentioned member to the caller's team, reporting each in order.
    pub async fn add(
        &self,
        inv: &Invocation,
        members: &[EntityId],
        index: Option<&str>,
    ) -> Vec<CommandResult> {
        if let Some(rejected) = self.wrong_channel(inv) {
            return rejected;
        }
        let team = match self.lifecycle.resolver().resolve_target_team(inv.caller, index) {
            Ok(team) => team,
            Err(e) => return vec![self.fail(inv, &e)],
        };
        let mut out = Vec::with_capacity(members.len());
        for &member in members {
            match self.lifecycle.add_member(team.id, member).await {
                Ok(team) => {
                    let name = messages::member_name(self.cache(), member);
                    out.push(CommandResult::Ok(messages::added(&name, &team)));
                }
                Err(e) => out.push(self.fail(inv, &e)),
            }
        }
        out
    }

    pub async fn leave(&self, inv: &Invocation, index: Option<&str>) -> Vec<CommandResult> {
        if let Some(rejected) = self.wrong_channel(inv) {
            return rejected;
        }
        let team = match self.lifecycle.resolver().resolve_target_team(inv.caller, index) {
            Ok(team) => team,
            Err(e) => return vec![self.fail(inv, &e)],
        };
        match self.lifecycle.remove_member(team.id, inv.caller).await {
            Ok(outcome) => {
                let mut out = vec![CommandResult::Ok(messages::left(&outcome.team))];
                if let Some(report) = outcome.teardown {
                    out.push(CommandResult::Ok(messages::emptied(&report.team)));
                    out.push(match report.into_result() {
                        Ok(report) => CommandResult::Ok(messages::deleted(&report.team)),
                        Err(e) => self.fail(inv, &e),
                    });
                }
                out
            }
            Err(e) => vec![self.fail(inv, &e)],
        }
    }

    // ─── Admin commands ──────────────────────────────────────────────────

    fn find_team(&self, team: &TeamRef) -> Result<Team, CommandResult> {
        let cache = self.cache();
        let config = &self.config.team;
        match team {
            TeamRef::Group(id) => match cache.get_team(*id) {
                Some(team) => Ok(team),
                None => match cache.group_name(*id) {
                    Some(name) => Err(CommandResult::Rejected(messages::not_a_team(&name))),
                    None => Err(messages::error(
                        cache,
                        EntityId(0),
                        &TeamError::NotFound(NotFound::Team(id.to_string())),
                    )),
                },
            },
            TeamRef::Name(name) => cache
                .find_team_by_name(&config.display_name(name))
                .or_else(|| cache.find_team_by_name(name))
                .ok_or_else(|| {
                    messages::error(
                        cache,
                        EntityId(0),
                        &TeamError::NotFound(NotFound::Team(config.display_name(name))),
                    )
                }),
        }
    }

    pub async fn delete(&self, inv: &Invocation, team: &TeamRef) -> Vec<CommandResult> {
        if !self.is_admin(inv.caller) {
            return vec![self.fail(inv, &TeamError::Permission)];
        }
        let team = match self.find_team(team) {
            Ok(team) => team,
            Err(rejected) => return vec![rejected],
        };
        match self
            .lifecycle
            .delete(team.id)
            .await
            .and_then(|report| report.into_result())
        {
            Ok(report) => vec![CommandResult::Ok(messages::deleted(&report.team))],
            Err(e) => vec![self.fail(inv, &e)],
        }
    }

    /// Count, one line per team, then a summary.
    pub async fn delete_all(&self, inv: &Invocation) -> Vec<CommandResult> {
        if !self.is_admin(inv.caller) {
            return vec![self.fail(inv, &TeamError::Permission)];
        }
        let results = self.lifecycle.delete_all().await;
        if results.is_empty() {
            return vec![CommandResult::Ok(messages::NO_TEAMS_AT_ALL.to_string())];
        }

        let mut out = vec![CommandResult::Ok(messages::batch_found(results.len()))];
        let mut failed = 0;
        for (team, outcome) in &results {
            match outcome {
                Ok(_) => out.push(CommandResult::Ok(messages::deleted(&team.name))),
                Err(e) => {
                    failed += 1;
                    out.push(self.fail(inv, e));
                }
            }
        }
        let summary = messages::batch_done(results.len() - failed, failed);
        out.push(if failed == 0 {
            CommandResult::Ok(summary)
        } else {
            CommandResult::Error(summary)
        });
        out
    }
}

//! User-visible text.
//!
//! Every [`TeamError`] maps to one stable message here, so front ends only
//! ever print what this module renders.

use ekip_core::{EntityCache, EntityId, NotFound, Team, TeamError, TeardownReport};

use crate::command::CommandName;

/// Outcome of one command, for the front end to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Ok(String),
    /// The request was refused; nothing changed.
    Rejected(String),
    /// The request was accepted but the directory failed part of it.
    Error(String),
}

impl CommandResult {
    pub fn text(&self) -> &str {
        match self {
            CommandResult::Ok(s) | CommandResult::Rejected(s) | CommandResult::Error(s) => s,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CommandResult::Ok(_))
    }
}

/// Display name of a member, or its id if the cache does not know it.
pub fn member_name(cache: &EntityCache, id: EntityId) -> String {
    cache
        .get_member(id)
        .map(|m| m.display_name)
        .unwrap_or_else(|| id.to_string())
}

/// `` `0`: Team A`` style lines in resolver order.
pub fn indexed_list(teams: &[Team]) -> String {
    teams
        .iter()
        .enumerate()
        .map(|(i, t)| format!("`{i}`: {}", t.name))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn status_line(name: &str, teams: &[Team]) -> String {
    if teams.is_empty() {
        return format!("{name}: (none)");
    }
    let names: Vec<&str> = teams.iter().map(|t| t.name.as_str()).collect();
    format!("{name}: {}", names.join(", "))
}

pub fn created(team: &Team) -> String {
    format!("{} created.", team.name)
}

pub fn added(member: &str, team: &Team) -> String {
    format!("{member} joined {}.", team.name)
}

pub fn left(team: &Team) -> String {
    format!("You left {}.", team.name)
}

pub fn emptied(team: &str) -> String {
    format!("Nobody is left in {team}, deleting it.")
}

pub fn deleted(team: &str) -> String {
    format!("{team} deleted.")
}

pub fn batch_found(count: usize) -> String {
    format!("Found {count} team(s).")
}

pub fn batch_done(deleted: usize, failed: usize) -> String {
    if failed == 0 {
        format!("All teams deleted ({deleted}).")
    } else {
        format!("Deleted {deleted} team(s), {failed} could not be fully deleted.")
    }
}

pub const NO_TEAMS_AT_ALL: &str = "There are no teams.";

pub fn not_a_team(name: &str) -> String {
    format!("{name} is not a team.")
}

pub fn wrong_channel(channel: EntityId) -> String {
    format!("Team commands go in <#{channel}>.")
}

pub fn usage(prefix: &str, name: CommandName) -> String {
    let args = match name {
        CommandName::Status => "status [@member ...]",
        CommandName::Create => "create <name>",
        CommandName::Add => "add @member [@member ...] [index]",
        CommandName::Leave => "leave [index]",
        CommandName::Delete => "delete <@team | name>",
        CommandName::DeleteAll => "delete-all",
        CommandName::Help => "help",
    };
    format!("Usage: {prefix}{args}")
}

pub fn help(prefix: &str) -> String {
    [
        CommandName::Status,
        CommandName::Create,
        CommandName::Add,
        CommandName::Leave,
        CommandName::Delete,
        CommandName::DeleteAll,
    ]
    .into_iter()
    .map(|n| usage(prefix, n))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Failures collected while tearing a team down, one per line.
pub fn teardown_failures(report: &TeardownReport) -> String {
    let mut out = format!("{} was only partly deleted:", report.team);
    for f in &report.failures {
        match f.id {
            Some(id) => out.push_str(&format!("\n- {} {id}: {}", f.entity_type, f.error)),
            None => out.push_str(&format!("\n- {}: {}", f.entity_type, f.error)),
        }
    }
    out
}

/// Render a team error. `caller` decides whether "you" or a name is used.
pub fn error(cache: &EntityCache, caller: EntityId, err: &TeamError) -> CommandResult {
    let who = |id: EntityId| {
        if id == caller {
            "You".to_string()
        } else {
            member_name(cache, id)
        }
    };
    match err {
        TeamError::NotFound(NotFound::NoTeams(id)) => {
            let who = who(*id);
            let verb = if who == "You" { "are" } else { "is" };
            CommandResult::Rejected(format!("{who} {verb} not in any team."))
        }
        TeamError::NotFound(NotFound::Team(name)) => {
            CommandResult::Rejected(format!("No team named {name}."))
        }
        TeamError::NotFound(NotFound::Member(name)) => {
            CommandResult::Rejected(format!("No member {name}."))
        }
        TeamError::NotFound(NotFound::Membership { member, team }) => {
            CommandResult::Rejected(format!("{} is not in {team}.", member_name(cache, *member)))
        }
        TeamError::Ambiguous { teams } => CommandResult::Rejected(format!(
            "You are in several teams, add the index of the one you mean:\n{}",
            indexed_list(teams)
        )),
        TeamError::InvalidIndex { given, teams } => CommandResult::Rejected(format!(
            "`{given}` is not a valid index. Pick one of:\n{}",
            indexed_list(teams)
        )),
        TeamError::AlreadyMember { member, team } => CommandResult::Rejected(format!(
            "{} is already in {team}.",
            member_name(cache, *member)
        )),
        TeamError::DuplicateName(name) => {
            CommandResult::Rejected(format!("A team named {name} already exists."))
        }
        TeamError::InvalidName(reason) => {
            CommandResult::Rejected(format!("That name does not work: {reason}."))
        }
        TeamError::LimitReached { member, max } => {
            let who = who(*member);
            let verb = if who == "You" { "are" } else { "is" };
            CommandResult::Rejected(format!("{who} {verb} already in {max} team(s), the maximum."))
        }
        TeamError::Provisioning {
            team, leftovers, ..
        } => {
            if leftovers.is_empty() {
                CommandResult::Error(format!("Could not create {team}, nothing was kept."))
            } else {
                CommandResult::Error(format!(
                    "Could not create {team}, and {} resource(s) could not be cleaned up.",
                    leftovers.len()
                ))
            }
        }
        TeamError::Teardown(report) => CommandResult::Error(teardown_failures(report)),
        TeamError::Permission => {
            CommandResult::Rejected("Only admins can use this command.".to_string())
        }
        TeamError::Directory(e) => CommandResult::Error(format!("The directory failed: {e}.")),
    }
}

//! Team provisioning policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::directory::{ChannelKind, EntityId};

/// Default prefix of every team group name.
pub const DEFAULT_TEAM_PREFIX: &str = "Team ";
/// Default marker put in front of a team's container name.
pub const DEFAULT_CONTAINER_ICON: &str = "🧩";
/// Dark blue.
pub const DEFAULT_TEAM_COLOR: u32 = 0x20_66_94;

/// A channel created inside every team container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTemplate {
    pub kind: ChannelKind,
    /// Channel name; `None` uses the team's display name.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    /// Prefix that marks a group as a team ("Team " gives "Team Rocket").
    pub team_prefix: String,
    /// Container names are "{container_icon} {team display name}".
    pub container_icon: String,
    /// Membership cap per member; `None` means unlimited.
    pub max_teams_per_member: Option<usize>,
    pub team_color: u32,
    /// Organizer group granted full access to every team container.
    pub privileged_group: Option<EntityId>,
    pub channels: Vec<ChannelTemplate>,
    /// How long a command waits for its own writes to show up in the cache.
    pub settle_timeout_ms: u64,
    /// Upper bound on the user-supplied part of a team name.
    pub max_name_len: usize,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            team_prefix: DEFAULT_TEAM_PREFIX.to_string(),
            container_icon: DEFAULT_CONTAINER_ICON.to_string(),
            max_teams_per_member: Some(5),
            team_color: DEFAULT_TEAM_COLOR,
            privileged_group: None,
            channels: vec![
                ChannelTemplate {
                    kind: ChannelKind::Text,
                    name: None,
                },
                ChannelTemplate {
                    kind: ChannelKind::Voice,
                    name: None,
                },
            ],
            settle_timeout_ms: 5000,
            max_name_len: 90,
        }
    }
}

impl TeamConfig {
    /// Group name for a user-supplied team name.
    pub fn display_name(&self, name: &str) -> String {
        format!("{}{}", self.team_prefix, name.trim())
    }

    /// Whether a group name belongs to a team.
    pub fn is_team_name(&self, group_name: &str) -> bool {
        group_name.starts_with(&self.team_prefix) && group_name.len() > self.team_prefix.len()
    }

    /// Container name for a team's display name.
    pub fn container_name(&self, display_name: &str) -> String {
        if self.container_icon.is_empty() {
            display_name.to_string()
        } else {
            format!("{} {display_name}", self.container_icon)
        }
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_names() {
        let cfg = TeamConfig::default();
        assert_eq!(cfg.display_name(" Rocket "), "Team Rocket");
        assert_eq!(cfg.container_name("Team Rocket"), "🧩 Team Rocket");
        assert!(cfg.is_team_name("Team Rocket"));
        assert!(!cfg.is_team_name("Team "));
        assert!(!cfg.is_team_name("Organizers"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: TeamConfig = serde_json::from_str(r#"{"team_prefix":"Ekip ","max_teams_per_member":null}"#).unwrap();
        assert_eq!(cfg.team_prefix, "Ekip ");
        assert_eq!(cfg.max_teams_per_member, None);
        assert_eq!(cfg.channels.len(), 2);
    }
}

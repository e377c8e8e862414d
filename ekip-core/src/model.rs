//! Views handed out by the cache. These are copies; mutating them changes
//! nothing.

use std::collections::BTreeSet;
use std::fmt;

use crate::directory::EntityId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: EntityId,
    pub display_name: String,
}

/// Directory resources backing a team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandles {
    pub group: EntityId,
    pub container: Option<EntityId>,
    pub channels: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    /// Same as the backing group's id.
    pub id: EntityId,
    /// Full display name, prefix included ("Team Rocket").
    pub name: String,
    pub member_ids: BTreeSet<EntityId>,
    pub resources: ResourceHandles,
}

impl Team {
    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }

    pub fn has_member(&self, member: EntityId) -> bool {
        self.member_ids.contains(&member)
    }

    /// Group, container and at least one channel are all present.
    pub fn is_fully_provisioned(&self) -> bool {
        self.resources.container.is_some() && !self.resources.channels.is_empty()
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Conceptual lifecycle of a team; not stored in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamPhase {
    Provisioning,
    Active,
    TearingDown,
    Gone,
}

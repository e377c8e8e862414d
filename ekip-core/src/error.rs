//! Error taxonomy for team operations.

use crate::directory::{DirectoryError, EntityId, EntityType};
use crate::model::Team;

/// A directory call that failed during provisioning or teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure {
    pub entity_type: EntityType,
    /// `None` when the resource was never created.
    pub id: Option<EntityId>,
    pub error: String,
}

/// Outcome of tearing a team down. Failures are collected per resource;
/// one failed channel does not stop the others or the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub team: String,
    pub deleted: Vec<(EntityType, EntityId)>,
    pub failures: Vec<ResourceFailure>,
}

impl TeardownReport {
    pub fn new(team: impl Into<String>) -> Self {
        Self {
            team: team.into(),
            deleted: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Err(TeamError::Teardown)` if anything failed.
    pub fn into_result(self) -> Result<TeardownReport> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(TeamError::Teardown(self))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TeamError {
    #[error("no such {0}")]
    NotFound(NotFound),

    #[error("member is in {} teams, an index is required", .teams.len())]
    Ambiguous { teams: Vec<Team> },

    #[error("invalid team index {given:?}")]
    InvalidIndex { given: String, teams: Vec<Team> },

    #[error("member {member} is already in {team}")]
    AlreadyMember { member: EntityId, team: String },

    #[error("a team named {0:?} already exists")]
    DuplicateName(String),

    #[error("invalid team name: {0}")]
    InvalidName(String),

    #[error("member {member} reached the limit of {max} teams")]
    LimitReached { member: EntityId, max: usize },

    #[error("provisioning {team} failed: {source}")]
    Provisioning {
        team: String,
        #[source]
        source: DirectoryError,
        /// Sub-resources that could not be rolled back.
        leftovers: Vec<ResourceFailure>,
    },

    #[error("teardown of {} failed for {} resource(s)", .0.team, .0.failures.len())]
    Teardown(TeardownReport),

    #[error("permission denied")]
    Permission,

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// What a [`TeamError::NotFound`] was looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    /// The member is in no team at all.
    NoTeams(EntityId),
    Team(String),
    Member(String),
    /// The member exists but is not in that team.
    Membership { member: EntityId, team: String },
}

impl std::fmt::Display for NotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFound::NoTeams(id) => write!(f, "team for member {id}"),
            NotFound::Team(name) => write!(f, "team {name}"),
            NotFound::Member(name) => write!(f, "member {name}"),
            NotFound::Membership { member, team } => write!(f, "member {member} in {team}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, TeamError>;

//! Read-side membership queries.

use std::sync::Arc;

use crate::cache::EntityCache;
use crate::directory::EntityId;
use crate::error::{NotFound, Result, TeamError};
use crate::model::Team;

#[derive(Clone)]
pub struct MembershipResolver {
    cache: Arc<EntityCache>,
    max_teams: Option<usize>,
}

impl MembershipResolver {
    pub fn new(cache: Arc<EntityCache>) -> Self {
        let max_teams = cache.config().max_teams_per_member;
        Self { cache, max_teams }
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn max_teams(&self) -> Option<usize> {
        self.max_teams
    }

    /// Teams of `member` in stable order.
    pub fn teams_of(&self, member: EntityId) -> Vec<Team> {
        self.cache.get_teams_of(member)
    }

    /// Pick the team a command about `member` targets.
    ///
    /// `requested_index` is the raw index argument, if the user gave one.
    /// With a single team it may be omitted or must be `0`; with several it
    /// is required and indexes the order returned by [`Self::teams_of`].
    pub fn resolve_target_team(
        &self,
        member: EntityId,
        requested_index: Option<&str>,
    ) -> Result<Team> {
        let mut teams = self.teams_of(member);
        let parsed = requested_index.map(|raw| (raw, parse_index(raw)));

        match (teams.len(), parsed) {
            (0, _) => Err(TeamError::NotFound(NotFound::NoTeams(member))),
            (1, None) | (1, Some((_, Some(0)))) => Ok(teams.remove(0)),
            (_, None) => Err(TeamError::Ambiguous { teams }),
            (len, Some((_, Some(i)))) if i < len && len > 1 => Ok(teams.swap_remove(i)),
            (_, Some((raw, _))) => Err(TeamError::InvalidIndex {
                given: raw.to_string(),
                teams,
            }),
        }
    }

    /// Whether `member` may join one more team.
    pub fn can_join(&self, member: EntityId) -> bool {
        match self.max_teams {
            Some(max) => self.teams_of(member).len() < max,
            None => true,
        }
    }
}

/// Plain decimal digits only: no sign, no surrounding whitespace.
fn parse_index(raw: &str) -> Option<usize> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

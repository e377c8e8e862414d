//! Team provisioning, membership changes and teardown.
//!
//! # Serialization
//!
//! - **Creation** is serialized globally: the uniqueness check, the
//!   provisioning calls and the name reservation happen under one lock, so
//!   of two concurrent `create("X")` calls the second sees the first's team
//!   (or its reservation) and fails with `DuplicateName`.
//! - **Membership changes** take the member's lock, then the team's lock.
//!   The cap check and the grant run under the member lock; the revoke and
//!   the empty check run under the team lock, so exactly one of several
//!   concurrent leaves tears an emptied team down.
//! - **Teardown** takes the team lock only.
//!
//! Lock order is member → team, and creation never waits on a team lock.
//!
//! # Settling
//!
//! The cache learns about our own writes from the notification stream.
//! Each operation waits (bounded by `settle_timeout`) until its write is
//! visible before releasing its locks, so the next command sees it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::EntityCache;
use crate::config::TeamConfig;
use crate::directory::{
    Access, DirectoryClient, DirectoryError, EntityId, EntityType, GroupSpec, OverwriteTarget,
    PermissionOverwrite,
};
use crate::error::{NotFound, ResourceFailure, Result, TeamError, TeardownReport};
use crate::locks::KeyedLocks;
use crate::model::{ResourceHandles, Team, TeamPhase};
use crate::resolver::MembershipResolver;

/// Result of removing a member from a team.
#[derive(Debug)]
pub struct RemoveOutcome {
    /// The team as it was before the removal.
    pub team: Team,
    /// Present when the removal emptied the team and it was torn down.
    pub teardown: Option<TeardownReport>,
}

pub struct TeamLifecycleManager {
    directory: Arc<dyn DirectoryClient>,
    cache: Arc<EntityCache>,
    resolver: MembershipResolver,
    config: TeamConfig,
    /// Display name → group id of teams we created that the cache has not
    /// yet shown with their owner.
    creation: tokio::sync::Mutex<HashMap<String, EntityId>>,
    team_locks: KeyedLocks<EntityId>,
    member_locks: KeyedLocks<EntityId>,
    phases: parking_lot::Mutex<HashMap<String, TeamPhase>>,
}

impl TeamLifecycleManager {
    pub fn new(directory: Arc<dyn DirectoryClient>, cache: Arc<EntityCache>) -> Self {
        let config = cache.config().clone();
        Self {
            directory,
            resolver: MembershipResolver::new(cache.clone()),
            cache,
            config,
            creation: tokio::sync::Mutex::new(HashMap::new()),
            team_locks: KeyedLocks::new(),
            member_locks: KeyedLocks::new(),
            phases: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &MembershipResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn config(&self) -> &TeamConfig {
        &self.config
    }

    /// Where a team (by full display name) is in its lifecycle.
    pub fn phase(&self, display_name: &str) -> TeamPhase {
        if let Some(phase) = self.phases.lock().get(display_name) {
            return *phase;
        }
        if self.cache.find_team_by_name(display_name).is_some() {
            TeamPhase::Active
        } else {
            TeamPhase::Gone
        }
    }

    fn set_phase(&self, display_name: &str, phase: Option<TeamPhase>) {
        let mut phases = self.phases.lock();
        match phase {
            Some(p) => {
                phases.insert(display_name.to_string(), p);
            }
            None => {
                phases.remove(display_name);
            }
        }
    }

    // ─── Create ──────────────────────────────────────────────────────────

    /// Provision a new team named `name` (without prefix) owned by `owner`.
    pub async fn create(&self, name: &str, owner: EntityId) -> Result<Team> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TeamError::InvalidName("name is empty".into()));
        }
        if name.chars().count() > self.config.max_name_len {
            return Err(TeamError::InvalidName(format!(
                "name is longer than {} characters",
                self.config.max_name_len
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(TeamError::InvalidName("name contains control characters".into()));
        }
        let display_name = self.config.display_name(name);

        let _member = self.member_locks.lock(&owner).await;
        if !self.resolver.can_join(owner) {
            return Err(TeamError::LimitReached {
                member: owner,
                max: self.resolver.max_teams().unwrap_or_default(),
            });
        }

        let handles = {
            let mut reserved = self.creation.lock().await;
            self.prune_reservations(&mut reserved);
            if self.cache.group_name_taken(&display_name) || reserved.contains_key(&display_name) {
                return Err(TeamError::DuplicateName(display_name));
            }

            self.set_phase(&display_name, Some(TeamPhase::Provisioning));
            let result = self.provision(&display_name, owner).await;
            self.set_phase(&display_name, None);
            let handles = result?;
            reserved.insert(display_name.clone(), handles.group);
            handles
        };

        tracing::info!(team = %display_name, group = %handles.group, owner = %owner, "Team created");

        let group = handles.group;
        let settled = self
            .cache
            .wait_until(self.config.settle_timeout(), |c| {
                c.get_team(group).is_some_and(|t| t.has_member(owner))
            })
            .await;
        if settled {
            let mut reserved = self.creation.lock().await;
            if reserved.get(&display_name) == Some(&group) {
                reserved.remove(&display_name);
            }
        }
        match self.cache.get_team(group) {
            Some(team) if settled => Ok(team),
            _ => {
                tracing::warn!(team = %display_name, "Created team not visible in cache yet");
                Ok(Team {
                    id: group,
                    name: display_name,
                    member_ids: [owner].into_iter().collect(),
                    resources: handles,
                })
            }
        }
    }

    /// Forget reservations the cache has caught up with.
    fn prune_reservations(&self, reserved: &mut HashMap<String, EntityId>) {
        reserved.retain(|_, group| {
            if self.cache.is_deleted(*group) {
                return false;
            }
            !self.cache.get_team(*group).is_some_and(|t| !t.is_empty())
        });
    }

    async fn provision(&self, display_name: &str, owner: EntityId) -> Result<ResourceHandles> {
        let mut created = Vec::new();
        match self.provision_steps(display_name, owner, &mut created).await {
            Ok(handles) => Ok(handles),
            Err(source) => {
                tracing::warn!(team = %display_name, error = %source, "Provisioning failed, rolling back");
                let mut leftovers = Vec::new();
                for (entity_type, id) in created.into_iter().rev() {
                    match self.directory.delete_entity(entity_type, id).await {
                        Ok(()) | Err(DirectoryError::NotFound(_)) => {}
                        Err(e) => {
                            tracing::warn!(team = %display_name, %entity_type, %id, error = %e, "Rollback failed");
                            leftovers.push(ResourceFailure {
                                entity_type,
                                id: Some(id),
                                error: e.to_string(),
                            });
                        }
                    }
                }
                Err(TeamError::Provisioning {
                    team: display_name.to_string(),
                    source,
                    leftovers,
                })
            }
        }
    }

    async fn provision_steps(
        &self,
        display_name: &str,
        owner: EntityId,
        created: &mut Vec<(EntityType, EntityId)>,
    ) -> std::result::Result<ResourceHandles, DirectoryError> {
        let group = self
            .directory
            .create_group(&GroupSpec {
                name: display_name.to_string(),
                color: self.config.team_color,
                hoist: true,
                mentionable: true,
            })
            .await?;
        created.push((EntityType::Group, group));

        let mut overwrites = vec![PermissionOverwrite {
            target: OverwriteTarget::Group(group),
            access: Access::Full,
        }];
        if let Some(privileged) = self.config.privileged_group {
            overwrites.push(PermissionOverwrite {
                target: OverwriteTarget::Group(privileged),
                access: Access::Full,
            });
        }
        overwrites.push(PermissionOverwrite {
            target: OverwriteTarget::Everyone,
            access: Access::Hidden,
        });
        let container = self
            .directory
            .create_container(&self.config.container_name(display_name), &overwrites)
            .await?;
        created.push((EntityType::Container, container));

        let mut channels = Vec::with_capacity(self.config.channels.len());
        for template in &self.config.channels {
            let name = template.name.as_deref().unwrap_or(display_name);
            let channel = self
                .directory
                .create_channel(name, container, template.kind)
                .await?;
            created.push((EntityType::Channel, channel));
            channels.push(channel);
        }

        self.directory.grant(group, owner).await?;

        Ok(ResourceHandles {
            group,
            container: Some(container),
            channels,
        })
    }

    // ─── Membership ──────────────────────────────────────────────────────

    /// Grant `team` to `member`.
    pub async fn add_member(&self, team_id: EntityId, member: EntityId) -> Result<Team> {
        let _member = self.member_locks.lock(&member).await;
        let _team = self.team_locks.lock(&team_id).await;

        let team = self.live_team(team_id)?;
        if self.cache.get_member(member).is_none() {
            return Err(TeamError::NotFound(NotFound::Member(member.to_string())));
        }
        if team.has_member(member) {
            return Err(TeamError::AlreadyMember {
                member,
                team: team.name,
            });
        }
        if !self.resolver.can_join(member) {
            return Err(TeamError::LimitReached {
                member,
                max: self.resolver.max_teams().unwrap_or_default(),
            });
        }

        if let Err(e) = self.directory.grant(team_id, member).await {
            // A directory that refuses redundant grants and one that
            // accepts them must look the same from here.
            if self.cache.get_team(team_id).is_some_and(|t| t.has_member(member)) {
                return Err(TeamError::AlreadyMember {
                    member,
                    team: team.name,
                });
            }
            return Err(self.map_directory_error(e, &team));
        }
        tracing::info!(team = %team.name, member = %member, "Member added");

        self.settle(|c| c.get_team(team_id).is_some_and(|t| t.has_member(member)))
            .await;
        Ok(self.cache.get_team(team_id).unwrap_or_else(|| {
            let mut team = team;
            team.member_ids.insert(member);
            team
        }))
    }

    /// Revoke `team` from `member`, tearing the team down if that emptied it.
    pub async fn remove_member(&self, team_id: EntityId, member: EntityId) -> Result<RemoveOutcome> {
        let _member = self.member_locks.lock(&member).await;
        let _team = self.team_locks.lock(&team_id).await;

        let team = self.live_team(team_id)?;
        if !team.has_member(member) {
            return Err(TeamError::NotFound(NotFound::Membership {
                member,
                team: team.name,
            }));
        }

        self.directory
            .revoke(team_id, member)
            .await
            .map_err(|e| self.map_directory_error(e, &team))?;
        tracing::info!(team = %team.name, member = %member, "Member removed");

        self.settle(|c| !c.get_team(team_id).is_some_and(|t| t.has_member(member)))
            .await;

        let teardown = match self.cache.get_team(team_id) {
            Some(now) if now.is_empty() => {
                tracing::info!(team = %now.name, "Team is empty, tearing down");
                Some(self.teardown_locked(&now).await)
            }
            _ => None,
        };
        Ok(RemoveOutcome { team, teardown })
    }

    // ─── Teardown ────────────────────────────────────────────────────────

    /// Delete a team and everything provisioned for it.
    pub async fn delete(&self, team_id: EntityId) -> Result<TeardownReport> {
        let _team = self.team_locks.lock(&team_id).await;
        let team = self.live_team(team_id)?;
        Ok(self.teardown_locked(&team).await)
    }

    /// Delete every team. One team failing does not stop the others.
    pub async fn delete_all(&self) -> Vec<(Team, Result<TeardownReport>)> {
        let teams = self.cache.get_all_teams();
        tracing::info!(count = teams.len(), "Deleting all teams");
        let mut results = Vec::with_capacity(teams.len());
        for team in teams {
            let outcome = self.delete(team.id).await.and_then(TeardownReport::into_result);
            if let Err(e) = &outcome {
                tracing::warn!(team = %team.name, error = %e, "Team teardown failed, continuing");
            }
            results.push((team, outcome));
        }
        results
    }

    /// Tear down teams that became empty without going through
    /// `remove_member` (members leaving the directory, groups revoked by
    /// hand). Teams still being provisioned are left alone.
    pub async fn reconcile_empty_teams(&self) -> Vec<TeardownReport> {
        let pending: Vec<String> = {
            let mut reserved = self.creation.lock().await;
            self.prune_reservations(&mut reserved);
            reserved.keys().cloned().collect()
        };

        let mut reports = Vec::new();
        for team in self.cache.get_all_teams() {
            if !team.is_empty() || pending.contains(&team.name) {
                continue;
            }
            let _team = self.team_locks.lock(&team.id).await;
            let Some(now) = self.cache.get_team(team.id) else {
                continue;
            };
            if !now.is_empty() || self.phases.lock().contains_key(&now.name) {
                continue;
            }
            tracing::info!(team = %now.name, "Reconciling empty team");
            reports.push(self.teardown_locked(&now).await);
        }
        reports
    }

    /// Caller holds the team lock.
    async fn teardown_locked(&self, team: &Team) -> TeardownReport {
        self.set_phase(&team.name, Some(TeamPhase::TearingDown));
        let mut report = TeardownReport::new(&team.name);

        let container_name = self.config.container_name(&team.name);
        match self.cache.container_named(&container_name) {
            Some(container) => {
                for channel in self.cache.channels_in(container.id) {
                    self.delete_resource(&mut report, EntityType::Channel, channel.id)
                        .await;
                }
                self.delete_resource(&mut report, EntityType::Container, container.id)
                    .await;
            }
            None => {
                tracing::debug!(team = %team.name, "No container found, deleting group only");
            }
        }
        self.delete_resource(&mut report, EntityType::Group, team.id)
            .await;

        let group = team.id;
        self.settle(|c| c.get_team(group).is_none()).await;
        self.set_phase(&team.name, None);

        if report.is_clean() {
            tracing::info!(team = %team.name, resources = report.deleted.len(), "Team deleted");
        } else {
            tracing::warn!(team = %team.name, failures = report.failures.len(), "Team deleted with failures");
        }
        report
    }

    async fn delete_resource(&self, report: &mut TeardownReport, entity_type: EntityType, id: EntityId) {
        match self.directory.delete_entity(entity_type, id).await {
            Ok(()) | Err(DirectoryError::NotFound(_)) => report.deleted.push((entity_type, id)),
            Err(e) => {
                tracing::warn!(team = %report.team, %entity_type, %id, error = %e, "Resource deletion failed");
                report.failures.push(ResourceFailure {
                    entity_type,
                    id: Some(id),
                    error: e.to_string(),
                });
            }
        }
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    fn live_team(&self, team_id: EntityId) -> Result<Team> {
        self.cache.get_team(team_id).ok_or_else(|| {
            TeamError::NotFound(NotFound::Team(
                self.cache
                    .group_name(team_id)
                    .unwrap_or_else(|| team_id.to_string()),
            ))
        })
    }

    fn map_directory_error(&self, e: DirectoryError, team: &Team) -> TeamError {
        match e {
            DirectoryError::NotFound(id) if id == team.id => {
                TeamError::NotFound(NotFound::Team(team.name.clone()))
            }
            DirectoryError::NotFound(id) => TeamError::NotFound(NotFound::Member(id.to_string())),
            other => TeamError::Directory(other),
        }
    }

    async fn settle<F>(&self, pred: F)
    where
        F: Fn(&EntityCache) -> bool,
    {
        if !self.cache.wait_until(self.config.settle_timeout(), pred).await {
            tracing::warn!(
                timeout_ms = self.config.settle_timeout_ms,
                "Cache did not reflect directory write in time"
            );
        }
    }
}

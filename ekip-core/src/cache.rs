//! Eventually-consistent mirror of the directory.
//!
//! The cache stores raw directory records and derives teams on read: a team
//! is a group whose name carries the team prefix, its members are the
//! members whose `group_ids` contain it, and its container is the container
//! named after it. Because nothing derived is stored, applying each
//! entity's latest record is enough to converge, whatever order different
//! entities' notifications arrive in.
//!
//! # Dedup
//!
//! Two layers keep `apply` idempotent:
//! 1. **Snapshot floor**: notifications at or below the snapshot revision are
//!    already part of the snapshot.
//! 2. **Per-entity high-water mark**: a notification whose revision is not
//!    above the last one applied for that id is a duplicate or a stale
//!    redelivery. Marks outlive deletion, so a late `created` cannot
//!    resurrect a deleted entity.
//!
//! Marks and tombstones hold one entry per id ever seen. They grow with
//! the number of distinct entities, not with notification traffic, and a
//! snapshot load resets both.
//!
//! Writes are serialized by an `RwLock`; every applied change bumps a
//! `watch` counter that [`EntityCache::wait_until`] uses to let commands
//! wait for their own writes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::config::TeamConfig;
use crate::directory::{
    ChangeKind, ChannelRecord, ContainerRecord, DirectoryEntity, EntityId, EntityType,
    GroupRecord, MemberRecord, Notification, Snapshot,
};
use crate::model::{Member, ResourceHandles, Team};

/// What `apply` did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Already reflected (duplicate, redelivery or covered by the snapshot).
    Stale,
    /// Malformed or of an unknown kind.
    Dropped,
}

/// Record plus the order in which the cache first saw it.
#[derive(Debug, Clone)]
struct Observed<T> {
    seq: u64,
    record: T,
}

#[derive(Debug, Default)]
struct CacheState {
    floor: u64,
    marks: HashMap<EntityId, u64>,
    tombstones: HashSet<EntityId>,
    groups: HashMap<EntityId, Observed<GroupRecord>>,
    members: HashMap<EntityId, Observed<MemberRecord>>,
    containers: HashMap<EntityId, ContainerRecord>,
    channels: HashMap<EntityId, ChannelRecord>,
    next_seq: u64,
    high_revision: u64,
}

impl CacheState {
    fn seq_for(&mut self, existing: Option<u64>) -> u64 {
        existing.unwrap_or_else(|| {
            self.next_seq += 1;
            self.next_seq
        })
    }

    fn upsert(&mut self, entity: DirectoryEntity) {
        match entity {
            DirectoryEntity::Group(g) => {
                let seq = self.seq_for(self.groups.get(&g.id).map(|o| o.seq));
                self.groups.insert(g.id, Observed { seq, record: g });
            }
            DirectoryEntity::Member(m) => {
                let seq = self.seq_for(self.members.get(&m.id).map(|o| o.seq));
                self.members.insert(m.id, Observed { seq, record: m });
            }
            DirectoryEntity::Container(c) => {
                self.containers.insert(c.id, c);
            }
            DirectoryEntity::Channel(c) => {
                self.channels.insert(c.id, c);
            }
        }
    }

    fn remove(&mut self, entity_type: EntityType, id: EntityId) {
        match entity_type {
            EntityType::Group => {
                self.groups.remove(&id);
            }
            EntityType::Member => {
                self.members.remove(&id);
            }
            EntityType::Container => {
                self.containers.remove(&id);
            }
            EntityType::Channel => {
                self.channels.remove(&id);
            }
            EntityType::Unknown => {}
        }
        self.tombstones.insert(id);
    }

    fn member_view(record: &MemberRecord) -> Member {
        Member {
            id: record.id,
            display_name: record.display_name.clone(),
        }
    }

    fn container_named(&self, name: &str) -> Option<&ContainerRecord> {
        self.containers
            .values()
            .filter(|c| c.name == name)
            .min_by_key(|c| c.id)
    }

    fn team(&self, config: &TeamConfig, group: &GroupRecord) -> Option<Team> {
        if !config.is_team_name(&group.name) {
            return None;
        }
        let member_ids = self
            .members
            .values()
            .filter(|m| m.record.group_ids.contains(&group.id))
            .map(|m| m.record.id)
            .collect();
        let container = self
            .container_named(&config.container_name(&group.name))
            .map(|c| c.id);
        let mut channels: Vec<EntityId> = match container {
            Some(cid) => self
                .channels
                .values()
                .filter(|ch| ch.container_id == Some(cid))
                .map(|ch| ch.id)
                .collect(),
            None => Vec::new(),
        };
        channels.sort();
        Some(Team {
            id: group.id,
            name: group.name.clone(),
            member_ids,
            resources: ResourceHandles {
                group: group.id,
                container,
                channels,
            },
        })
    }

    /// Team groups in observation order.
    fn ordered_groups(&self) -> Vec<&Observed<GroupRecord>> {
        let mut groups: Vec<_> = self.groups.values().collect();
        groups.sort_by_key(|o| o.seq);
        groups
    }
}

/// Comparable dump of everything the cache exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheView {
    pub teams: BTreeMap<EntityId, Team>,
    pub members: BTreeMap<EntityId, Member>,
}

/// In-process mirror of the team-relevant part of the directory.
pub struct EntityCache {
    config: TeamConfig,
    state: RwLock<CacheState>,
    changes: watch::Sender<u64>,
}

impl EntityCache {
    pub fn new(config: TeamConfig) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            config,
            state: RwLock::new(CacheState::default()),
            changes,
        }
    }

    pub fn config(&self) -> &TeamConfig {
        &self.config
    }

    fn bump(&self) {
        self.changes.send_modify(|n| *n += 1);
    }

    // ─── Writes ──────────────────────────────────────────────────────────

    /// Replace the whole cache with a full listing.
    pub fn snapshot_load(&self, snapshot: Snapshot) {
        let mut fresh = CacheState {
            floor: snapshot.revision,
            high_revision: snapshot.revision,
            ..CacheState::default()
        };
        let count = snapshot.entities.len();
        for entity in snapshot.entities {
            fresh.upsert(entity);
        }
        *self.state.write() = fresh;
        self.bump();
        tracing::info!(entities = count, revision = snapshot.revision, "Cache loaded from snapshot");
    }

    /// Incorporate one change. Never fails: anything unusable is logged
    /// and dropped.
    pub fn apply(&self, n: &Notification) -> ApplyOutcome {
        if n.kind == ChangeKind::Unknown || n.entity_type == EntityType::Unknown {
            tracing::warn!(id = %n.id, kind = ?n.kind, entity_type = %n.entity_type, "Dropping notification of unknown kind");
            return ApplyOutcome::Dropped;
        }

        let entity = match n.kind {
            ChangeKind::Created | ChangeKind::Updated => match n.decode() {
                Ok(entity) if entity.id() == n.id && entity.entity_type() == n.entity_type => {
                    Some(entity)
                }
                Ok(entity) => {
                    tracing::warn!(
                        id = %n.id,
                        payload_id = %entity.id(),
                        entity_type = %n.entity_type,
                        "Dropping notification whose payload does not match its header"
                    );
                    return ApplyOutcome::Dropped;
                }
                Err(e) => {
                    tracing::warn!(id = %n.id, entity_type = %n.entity_type, error = %e, "Dropping malformed notification");
                    return ApplyOutcome::Dropped;
                }
            },
            _ => None,
        };

        {
            let mut st = self.state.write();
            if n.revision <= st.floor {
                tracing::debug!(id = %n.id, revision = n.revision, "Notification predates snapshot");
                return ApplyOutcome::Stale;
            }
            let mark = st.marks.get(&n.id).copied().unwrap_or(0);
            if n.revision <= mark {
                tracing::debug!(id = %n.id, revision = n.revision, mark, "Duplicate notification");
                return ApplyOutcome::Stale;
            }
            st.marks.insert(n.id, n.revision);
            st.high_revision = st.high_revision.max(n.revision);
            match entity {
                Some(entity) => st.upsert(entity),
                None => st.remove(n.entity_type, n.id),
            }
        }

        tracing::debug!(id = %n.id, kind = ?n.kind, entity_type = %n.entity_type, revision = n.revision, "Applied notification");
        self.bump();
        ApplyOutcome::Applied
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    pub fn get_member(&self, id: EntityId) -> Option<Member> {
        self.state
            .read()
            .members
            .get(&id)
            .map(|o| CacheState::member_view(&o.record))
    }

    /// First member (in observation order) with exactly this display name.
    /// Display names are not unique; later namesakes are unreachable here.
    pub fn get_member_by_name(&self, name: &str) -> Option<Member> {
        let st = self.state.read();
        st.members
            .values()
            .filter(|o| o.record.display_name == name)
            .min_by_key(|o| o.seq)
            .map(|o| CacheState::member_view(&o.record))
    }

    /// Whether `member` holds `group`, team or not.
    pub fn member_in_group(&self, member: EntityId, group: EntityId) -> bool {
        self.state
            .read()
            .members
            .get(&member)
            .is_some_and(|o| o.record.group_ids.contains(&group))
    }

    /// Teams of a member, in the order the cache first saw each team.
    /// The order is stable across calls, so an index into it survives a
    /// round-trip through the user.
    pub fn get_teams_of(&self, member: EntityId) -> Vec<Team> {
        let st = self.state.read();
        let Some(record) = st.members.get(&member) else {
            return Vec::new();
        };
        st.ordered_groups()
            .into_iter()
            .filter(|o| record.record.group_ids.contains(&o.record.id))
            .filter_map(|o| st.team(&self.config, &o.record))
            .collect()
    }

    pub fn get_all_teams(&self) -> Vec<Team> {
        let st = self.state.read();
        st.ordered_groups()
            .into_iter()
            .filter_map(|o| st.team(&self.config, &o.record))
            .collect()
    }

    pub fn get_team(&self, id: EntityId) -> Option<Team> {
        let st = self.state.read();
        st.groups
            .get(&id)
            .and_then(|o| st.team(&self.config, &o.record))
    }

    /// Team by full display name (exact, case-sensitive).
    pub fn find_team_by_name(&self, display_name: &str) -> Option<Team> {
        let st = self.state.read();
        st.ordered_groups()
            .into_iter()
            .find(|o| o.record.name == display_name)
            .and_then(|o| st.team(&self.config, &o.record))
    }

    /// Whether any group, team or not, is named `name`.
    pub fn group_name_taken(&self, name: &str) -> bool {
        self.state.read().groups.values().any(|o| o.record.name == name)
    }

    pub fn group_name(&self, id: EntityId) -> Option<String> {
        self.state.read().groups.get(&id).map(|o| o.record.name.clone())
    }

    /// Whether the cache has seen `id` deleted.
    pub fn is_deleted(&self, id: EntityId) -> bool {
        self.state.read().tombstones.contains(&id)
    }

    pub fn container_named(&self, name: &str) -> Option<ContainerRecord> {
        self.state.read().container_named(name).cloned()
    }

    pub fn channels_in(&self, container: EntityId) -> Vec<ChannelRecord> {
        let st = self.state.read();
        let mut channels: Vec<_> = st
            .channels
            .values()
            .filter(|c| c.container_id == Some(container))
            .cloned()
            .collect();
        channels.sort_by_key(|c| c.id);
        channels
    }

    /// Highest revision reflected so far.
    pub fn revision(&self) -> u64 {
        self.state.read().high_revision
    }

    pub fn view(&self) -> CacheView {
        let st = self.state.read();
        CacheView {
            teams: st
                .groups
                .values()
                .filter_map(|o| st.team(&self.config, &o.record))
                .map(|t| (t.id, t))
                .collect(),
            members: st
                .members
                .values()
                .map(|o| (o.record.id, CacheState::member_view(&o.record)))
                .collect(),
        }
    }

    // ─── Settling ────────────────────────────────────────────────────────

    /// Wait until `pred` holds or `timeout` passes. Returns the final
    /// value of `pred`.
    pub async fn wait_until<F>(&self, timeout: Duration, pred: F) -> bool
    where
        F: Fn(&EntityCache) -> bool,
    {
        let mut rx = self.changes.subscribe();
        if pred(self) {
            return true;
        }
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if pred(self) {
                        return true;
                    }
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = &mut deadline => return pred(self),
            }
        }
    }
}

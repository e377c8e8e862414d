//! In-process directory.
//!
//! Behaves like a real directory from the core's point of view: every
//! mutation bumps the revision counter and fans a [`Notification`] out to
//! all subscribers, in revision order. It also records the mutating calls
//! it served and can be told to fail specific upcoming calls, which makes
//! it the test double for everything above the boundary. The console front
//! end runs on it too.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::{
    ChangeKind, ChannelKind, ChannelRecord, ContainerRecord, DirectoryClient, DirectoryEntity,
    DirectoryError, EntityId, EntityType, GroupRecord, GroupSpec, MemberRecord, Notification,
    PermissionOverwrite, Snapshot, NOTIFICATION_QUEUE,
};

/// Most recent calls kept by [`InMemoryDirectory::calls`].
pub const CALL_LOG_LIMIT: usize = 4096;

/// Mutating directory operations, for call accounting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateGroup,
    CreateContainer,
    CreateChannel,
    Delete,
    Grant,
    Revoke,
}

#[derive(Default)]
struct DirectoryState {
    next_id: u64,
    revision: u64,
    entities: BTreeMap<EntityId, DirectoryEntity>,
    overwrites: HashMap<EntityId, Vec<PermissionOverwrite>>,
    groups: HashMap<EntityId, GroupSpec>,
    calls: VecDeque<Operation>,
    /// Pending failures: (operation, calls of that operation to let through first).
    faults: Vec<(Operation, usize)>,
}

impl DirectoryState {
    fn allocate_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId(self.next_id)
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Record a call and decide whether it should fail.
    fn enter(&mut self, op: Operation) -> Result<(), DirectoryError> {
        if self.calls.len() == CALL_LOG_LIMIT {
            self.calls.pop_front();
        }
        self.calls.push_back(op);
        let mut fire = None;
        for (i, (fault_op, skip)) in self.faults.iter_mut().enumerate() {
            if *fault_op != op {
                continue;
            }
            if *skip == 0 {
                fire = Some(i);
                break;
            }
            *skip -= 1;
        }
        match fire {
            Some(i) => {
                self.faults.remove(i);
                Err(DirectoryError::Transient(format!("injected failure for {op:?}")))
            }
            None => Ok(()),
        }
    }

    fn upsert(&mut self, kind: ChangeKind, entity: DirectoryEntity) -> Notification {
        let revision = self.next_revision();
        let n = Notification::upsert(kind, &entity, revision);
        self.entities.insert(entity.id(), entity);
        n
    }

    fn member_mut(&mut self, id: EntityId) -> Option<&mut MemberRecord> {
        match self.entities.get_mut(&id) {
            Some(DirectoryEntity::Member(m)) => Some(m),
            _ => None,
        }
    }

    fn is_group(&self, id: EntityId) -> bool {
        matches!(self.entities.get(&id), Some(DirectoryEntity::Group(_)))
    }
}

/// Directory held entirely in memory.
pub struct InMemoryDirectory {
    state: Mutex<DirectoryState>,
    subscribers: parking_lot::Mutex<Vec<mpsc::Sender<Notification>>>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DirectoryState::default()),
            subscribers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Deliver notifications while the state lock is still held so that
    /// subscribers observe them in revision order.
    async fn publish(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let senders: Vec<_> = self.subscribers.lock().clone();
        let mut closed = false;
        for n in notifications {
            for tx in &senders {
                if tx.send(n.clone()).await.is_err() {
                    closed = true;
                }
            }
        }
        if closed {
            self.subscribers.lock().retain(|tx| !tx.is_closed());
        }
    }

    // ── Out-of-band changes (what other users and admins do) ──

    /// A new member joins the directory.
    pub async fn join_member(&self, display_name: &str) -> EntityId {
        let mut st = self.state.lock().await;
        let id = st.allocate_id();
        let n = st.upsert(
            ChangeKind::Created,
            DirectoryEntity::Member(MemberRecord {
                id,
                display_name: display_name.to_string(),
                group_ids: Default::default(),
            }),
        );
        self.publish(vec![n]).await;
        id
    }

    pub async fn rename_member(&self, id: EntityId, display_name: &str) -> Result<(), DirectoryError> {
        let mut st = self.state.lock().await;
        let mut member = st.member_mut(id).ok_or(DirectoryError::NotFound(id))?.clone();
        member.display_name = display_name.to_string();
        let n = st.upsert(ChangeKind::Updated, DirectoryEntity::Member(member));
        self.publish(vec![n]).await;
        Ok(())
    }

    /// A member leaves the directory entirely.
    pub async fn remove_member(&self, id: EntityId) -> Result<(), DirectoryError> {
        let mut st = self.state.lock().await;
        if st.member_mut(id).is_none() {
            return Err(DirectoryError::NotFound(id));
        }
        st.entities.remove(&id);
        let revision = st.next_revision();
        self.publish(vec![Notification::deleted(EntityType::Member, id, revision)])
            .await;
        Ok(())
    }

    // ── Fault injection and inspection ──

    /// Fail the next call of `op`.
    pub async fn fail_next(&self, op: Operation) {
        self.fail_nth(op, 0).await;
    }

    /// Let `skip` calls of `op` through, then fail the one after.
    pub async fn fail_nth(&self, op: Operation, skip: usize) {
        self.state.lock().await.faults.push((op, skip));
    }

    /// The last [`CALL_LOG_LIMIT`] mutating calls served, failed ones
    /// included, oldest first.
    pub async fn calls(&self) -> Vec<Operation> {
        self.state.lock().await.calls.iter().copied().collect()
    }

    pub async fn entity(&self, id: EntityId) -> Option<DirectoryEntity> {
        self.state.lock().await.entities.get(&id).cloned()
    }

    pub async fn entities(&self) -> Vec<DirectoryEntity> {
        self.state.lock().await.entities.values().cloned().collect()
    }

    pub async fn overwrites_of(&self, container: EntityId) -> Vec<PermissionOverwrite> {
        self.state
            .lock()
            .await
            .overwrites
            .get(&container)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn group_spec(&self, group: EntityId) -> Option<GroupSpec> {
        self.state.lock().await.groups.get(&group).cloned()
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn list_entities(&self) -> Result<Snapshot, DirectoryError> {
        let st = self.state.lock().await;
        Ok(Snapshot {
            revision: st.revision,
            entities: st.entities.values().cloned().collect(),
        })
    }

    async fn create_group(&self, spec: &GroupSpec) -> Result<EntityId, DirectoryError> {
        let mut st = self.state.lock().await;
        st.enter(Operation::CreateGroup)?;
        let id = st.allocate_id();
        st.groups.insert(id, spec.clone());
        let n = st.upsert(
            ChangeKind::Created,
            DirectoryEntity::Group(GroupRecord {
                id,
                name: spec.name.clone(),
            }),
        );
        self.publish(vec![n]).await;
        Ok(id)
    }

    async fn create_container(
        &self,
        name: &str,
        overwrites: &[PermissionOverwrite],
    ) -> Result<EntityId, DirectoryError> {
        let mut st = self.state.lock().await;
        st.enter(Operation::CreateContainer)?;
        let id = st.allocate_id();
        st.overwrites.insert(id, overwrites.to_vec());
        let n = st.upsert(
            ChangeKind::Created,
            DirectoryEntity::Container(ContainerRecord {
                id,
                name: name.to_string(),
            }),
        );
        self.publish(vec![n]).await;
        Ok(id)
    }

    async fn create_channel(
        &self,
        name: &str,
        container: EntityId,
        kind: ChannelKind,
    ) -> Result<EntityId, DirectoryError> {
        let mut st = self.state.lock().await;
        st.enter(Operation::CreateChannel)?;
        if !matches!(st.entities.get(&container), Some(DirectoryEntity::Container(_))) {
            return Err(DirectoryError::NotFound(container));
        }
        let id = st.allocate_id();
        let n = st.upsert(
            ChangeKind::Created,
            DirectoryEntity::Channel(ChannelRecord {
                id,
                name: name.to_string(),
                container_id: Some(container),
                kind,
            }),
        );
        self.publish(vec![n]).await;
        Ok(id)
    }

    async fn delete_entity(
        &self,
        entity_type: EntityType,
        id: EntityId,
    ) -> Result<(), DirectoryError> {
        let mut st = self.state.lock().await;
        st.enter(Operation::Delete)?;
        let actual = st
            .entities
            .get(&id)
            .map(DirectoryEntity::entity_type)
            .ok_or(DirectoryError::NotFound(id))?;
        if actual != entity_type {
            return Err(DirectoryError::Rejected(format!(
                "{id} is a {actual}, not a {entity_type}"
            )));
        }
        st.entities.remove(&id);
        st.overwrites.remove(&id);
        st.groups.remove(&id);

        let mut out = Vec::new();
        let revision = st.next_revision();
        out.push(Notification::deleted(entity_type, id, revision));

        match entity_type {
            // Group deletion strips the group from members silently, the
            // way chat directories do it: only the group event is sent.
            EntityType::Group => {
                for entity in st.entities.values_mut() {
                    if let DirectoryEntity::Member(m) = entity {
                        m.group_ids.remove(&id);
                    }
                }
            }
            // Channels of a deleted container are orphaned, not deleted.
            EntityType::Container => {
                let orphans: Vec<ChannelRecord> = st
                    .entities
                    .values()
                    .filter_map(|e| match e {
                        DirectoryEntity::Channel(c) if c.container_id == Some(id) => Some(c.clone()),
                        _ => None,
                    })
                    .collect();
                for mut channel in orphans {
                    channel.container_id = None;
                    out.push(st.upsert(ChangeKind::Updated, DirectoryEntity::Channel(channel)));
                }
            }
            _ => {}
        }
        self.publish(out).await;
        Ok(())
    }

    async fn grant(&self, group: EntityId, member: EntityId) -> Result<(), DirectoryError> {
        let mut st = self.state.lock().await;
        st.enter(Operation::Grant)?;
        if !st.is_group(group) {
            return Err(DirectoryError::NotFound(group));
        }
        let record = st.member_mut(member).ok_or(DirectoryError::NotFound(member))?;
        if !record.group_ids.insert(group) {
            return Ok(());
        }
        let record = record.clone();
        let n = st.upsert(ChangeKind::Updated, DirectoryEntity::Member(record));
        self.publish(vec![n]).await;
        Ok(())
    }

    async fn revoke(&self, group: EntityId, member: EntityId) -> Result<(), DirectoryError> {
        let mut st = self.state.lock().await;
        st.enter(Operation::Revoke)?;
        if !st.is_group(group) {
            return Err(DirectoryError::NotFound(group));
        }
        let record = st.member_mut(member).ok_or(DirectoryError::NotFound(member))?;
        if !record.group_ids.remove(&group) {
            return Ok(());
        }
        let record = record.clone();
        let n = st.upsert(ChangeKind::Updated, DirectoryEntity::Member(record));
        self.publish(vec![n]).await;
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE);
        self.subscribers.lock().push(tx);
        rx
    }
}

//! Boundary to the external directory service.
//!
//! The directory is the system of record for groups (the permission
//! primitive a team is backed by), containers, channels and members. The
//! core never owns durable state: it mutates the directory through
//! [`DirectoryClient`] and learns about the result from the notification
//! stream returned by [`DirectoryClient::subscribe`].
//!
//! # Notification model
//!
//! Every change is a [`Notification`] carrying a `revision`, the directory's
//! monotonically increasing change counter. Payloads travel as JSON and are
//! decoded into [`DirectoryEntity`] by the consumer, so an event stream that
//! is only partially under our control can never crash the decoder:
//!
//! ```text
//! {"kind":"updated","entity_type":"member","id":42,"revision":7,
//!  "payload":{"type":"member","id":42,"display_name":"ayse","group_ids":[10]}}
//! ```

pub mod memory;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use memory::{InMemoryDirectory, Operation};

/// Capacity of each subscriber's notification queue.
pub const NOTIFICATION_QUEUE: usize = 1024;

/// Opaque, stable identifier assigned by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        EntityId(raw)
    }
}

// ─── Entities ────────────────────────────────────────────────────────────────

/// A permission/membership group (role-equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: EntityId,
    pub name: String,
}

/// A member of the directory. Group membership lives on the member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: EntityId,
    pub display_name: String,
    #[serde(default)]
    pub group_ids: BTreeSet<EntityId>,
}

/// A grouping resource that holds channels (category-equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: EntityId,
    pub name: String,
}

/// A channel, optionally nested in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub container_id: Option<EntityId>,
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
}

/// Any entity the directory can report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectoryEntity {
    Group(GroupRecord),
    Member(MemberRecord),
    Container(ContainerRecord),
    Channel(ChannelRecord),
}

impl DirectoryEntity {
    pub fn id(&self) -> EntityId {
        match self {
            DirectoryEntity::Group(g) => g.id,
            DirectoryEntity::Member(m) => m.id,
            DirectoryEntity::Container(c) => c.id,
            DirectoryEntity::Channel(c) => c.id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            DirectoryEntity::Group(_) => EntityType::Group,
            DirectoryEntity::Member(_) => EntityType::Member,
            DirectoryEntity::Container(_) => EntityType::Container,
            DirectoryEntity::Channel(_) => EntityType::Channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Group,
    Member,
    Container,
    Channel,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::Group => "group",
            EntityType::Member => "member",
            EntityType::Container => "container",
            EntityType::Channel => "channel",
            EntityType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    #[serde(other)]
    Unknown,
}

/// One change in the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: ChangeKind,
    pub entity_type: EntityType,
    pub id: EntityId,
    /// Directory change counter; strictly increasing per entity.
    pub revision: u64,
    /// Entity body for created/updated; usually null for deleted.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Notification {
    /// Build a created/updated notification from a typed entity.
    pub fn upsert(kind: ChangeKind, entity: &DirectoryEntity, revision: u64) -> Self {
        Self {
            kind,
            entity_type: entity.entity_type(),
            id: entity.id(),
            revision,
            payload: serde_json::to_value(entity).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn deleted(entity_type: EntityType, id: EntityId, revision: u64) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            entity_type,
            id,
            revision,
            payload: serde_json::Value::Null,
        }
    }

    /// Decode the payload into a typed entity.
    pub fn decode(&self) -> Result<DirectoryEntity, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Full listing of the directory at one revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Every notification with `revision <= self.revision` is already
    /// reflected in `entities`.
    pub revision: u64,
    pub entities: Vec<DirectoryEntity>,
}

// ─── Mutations ───────────────────────────────────────────────────────────────

/// Parameters for a new group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    pub color: u32,
    /// Displayed separately from other members.
    pub hoist: bool,
    pub mentionable: bool,
}

/// Who a permission overwrite applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverwriteTarget {
    Group(EntityId),
    /// The implicit group every member belongs to.
    Everyone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Allow every channel permission.
    Full,
    /// Deny viewing the container and its channels.
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionOverwrite {
    pub target: OverwriteTarget,
    pub access: Access,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("entity {0} not found")]
    NotFound(EntityId),
    #[error("directory rejected the request: {0}")]
    Rejected(String),
    /// Network or rate-limit class failure that survived the client's retries.
    #[error("directory unavailable: {0}")]
    Transient(String),
    #[error("directory connection closed")]
    Closed,
}

/// Client for the external directory.
///
/// Implementations retry transient failures themselves; an error returned
/// from here is final as far as the core is concerned.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn list_entities(&self) -> Result<Snapshot, DirectoryError>;

    async fn create_group(&self, spec: &GroupSpec) -> Result<EntityId, DirectoryError>;

    async fn create_container(
        &self,
        name: &str,
        overwrites: &[PermissionOverwrite],
    ) -> Result<EntityId, DirectoryError>;

    async fn create_channel(
        &self,
        name: &str,
        container: EntityId,
        kind: ChannelKind,
    ) -> Result<EntityId, DirectoryError>;

    async fn delete_entity(&self, entity_type: EntityType, id: EntityId)
        -> Result<(), DirectoryError>;

    async fn grant(&self, group: EntityId, member: EntityId) -> Result<(), DirectoryError>;

    async fn revoke(&self, group: EntityId, member: EntityId) -> Result<(), DirectoryError>;

    /// Open a new notification stream. Changes made after this call are
    /// delivered in order; earlier changes are covered by `list_entities`.
    fn subscribe(&self) -> mpsc::Receiver<Notification>;
}

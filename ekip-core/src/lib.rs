//! ekip-core: team membership and resource consistency engine.
//!
//! A team is a group in an external directory plus the container and
//! channels provisioned for it. The directory is the source of truth and
//! can change under us at any time, so this crate:
//!
//! - mirrors it into an [`EntityCache`] fed by change notifications,
//! - answers membership questions from that mirror ([`MembershipResolver`]),
//! - provisions and tears teams down with rollback and best-effort
//!   cascades, serializing conflicting commands ([`TeamLifecycleManager`]).
//!
//! # Modules
//!
//! - `directory`: the [`DirectoryClient`] boundary and an in-memory directory
//! - `cache`: the notification-driven mirror
//! - `resolver`: team lookup, disambiguation and the membership cap
//! - `lifecycle`: create / add / remove / delete
//! - `sync`: the notification pump and the [`Engine`] wiring

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod locks;
pub mod model;
pub mod resolver;
pub mod sync;

pub use cache::{ApplyOutcome, CacheView, EntityCache};
pub use config::TeamConfig;
pub use directory::{DirectoryClient, DirectoryError, EntityId, InMemoryDirectory};
pub use error::{NotFound, TeamError, TeardownReport};
pub use lifecycle::{RemoveOutcome, TeamLifecycleManager};
pub use model::{Member, Team, TeamPhase};
pub use resolver::MembershipResolver;
pub use sync::Engine;

//! Keeps the cache in step with the directory.
//!
//! A single task owns the subscription and applies notifications one at a
//! time, in delivery order. Startup subscribes first and lists second, so
//! nothing falls between the snapshot and the stream; whatever the stream
//! repeats from before the snapshot is dropped by the snapshot floor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::{ApplyOutcome, EntityCache};
use crate::config::TeamConfig;
use crate::directory::{DirectoryClient, DirectoryError, Notification};
use crate::lifecycle::TeamLifecycleManager;
use crate::resolver::MembershipResolver;

/// Apply notifications from `rx` until the stream closes.
pub fn spawn_notification_pump(
    mut rx: mpsc::Receiver<Notification>,
    cache: Arc<EntityCache>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut applied = 0u64;
        let mut skipped = 0u64;
        while let Some(n) = rx.recv().await {
            match cache.apply(&n) {
                ApplyOutcome::Applied => applied += 1,
                ApplyOutcome::Stale | ApplyOutcome::Dropped => skipped += 1,
            }
        }
        tracing::warn!(applied, skipped, "Notification stream closed");
    })
}

/// Cache, resolver and lifecycle manager wired to one directory.
pub struct Engine {
    cache: Arc<EntityCache>,
    lifecycle: Arc<TeamLifecycleManager>,
    pump: JoinHandle<()>,
}

impl Engine {
    /// Subscribe, load the snapshot and start the notification pump.
    pub async fn start(
        directory: Arc<dyn DirectoryClient>,
        config: TeamConfig,
    ) -> Result<Self, DirectoryError> {
        let cache = Arc::new(EntityCache::new(config));
        let rx = directory.subscribe();
        let snapshot = directory.list_entities().await?;
        cache.snapshot_load(snapshot);
        let pump = spawn_notification_pump(rx, cache.clone());
        let lifecycle = Arc::new(TeamLifecycleManager::new(directory, cache.clone()));
        Ok(Self {
            cache,
            lifecycle,
            pump,
        })
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn resolver(&self) -> &MembershipResolver {
        self.lifecycle.resolver()
    }

    pub fn lifecycle(&self) -> &Arc<TeamLifecycleManager> {
        &self.lifecycle
    }

    /// Periodically tear down teams that emptied out of band.
    pub fn spawn_reconciler(&self, every: Duration) -> JoinHandle<()> {
        let lifecycle = self.lifecycle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reports = lifecycle.reconcile_empty_teams().await;
                if !reports.is_empty() {
                    tracing::info!(count = reports.len(), "Reconciled empty teams");
                }
            }
        })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

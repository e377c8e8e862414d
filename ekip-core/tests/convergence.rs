//! Cache convergence under reordered and duplicated notification streams.
//!
//! A random history is played against the in-memory directory while the
//! notifications are captured. The captured stream is then shuffled across
//! entities (keeping each entity's own order), sprinkled with late
//! redeliveries, and fed to a fresh cache. The result must equal a cache
//! loaded from a snapshot of the directory's final state.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};

use ekip_core::directory::{ChannelKind, EntityType, GroupSpec, Notification};
use ekip_core::{DirectoryClient, EntityCache, EntityId, InMemoryDirectory, TeamConfig};

fn spec(name: String) -> GroupSpec {
    GroupSpec {
        name,
        color: 0,
        hoist: true,
        mentionable: true,
    }
}

/// Play `steps` random operations and return every notification emitted.
async fn random_history(dir: &InMemoryDirectory, rng: &mut StdRng, steps: usize) -> Vec<Notification> {
    let config = TeamConfig::default();
    let mut rx = dir.subscribe();
    let mut members: Vec<EntityId> = Vec::new();
    let mut groups: Vec<(EntityId, String)> = Vec::new();
    let mut containers: Vec<EntityId> = Vec::new();

    for i in 0..steps {
        match rng.gen_range(0..10) {
            0 | 1 => members.push(dir.join_member(&format!("m{i}")).await),
            2 => {
                let name = if rng.gen_bool(0.8) {
                    format!("Team {i}")
                } else {
                    format!("Other {i}")
                };
                if let Ok(id) = dir.create_group(&spec(name.clone())).await {
                    groups.push((id, name));
                }
            }
            3 | 4 => {
                if let (Some(m), Some((g, _))) = (members.choose(rng), groups.choose(rng)) {
                    let _ = dir.grant(*g, *m).await;
                }
            }
            5 => {
                if let (Some(m), Some((g, _))) = (members.choose(rng), groups.choose(rng)) {
                    let _ = dir.revoke(*g, *m).await;
                }
            }
            6 => {
                if let Some(m) = members.choose(rng) {
                    let _ = dir.rename_member(*m, &format!("renamed{i}")).await;
                }
            }
            7 => {
                if let Some((_, name)) = groups.choose(rng) {
                    let container_name = config.container_name(name);
                    if let Ok(c) = dir.create_container(&container_name, &[]).await {
                        containers.push(c);
                        let _ = dir.create_channel(name, c, ChannelKind::Text).await;
                    }
                }
            }
            8 => {
                if rng.gen_bool(0.5) {
                    if let Some((g, _)) = groups.choose(rng) {
                        let _ = dir.delete_entity(EntityType::Group, *g).await;
                    }
                } else if let Some(c) = containers.choose(rng) {
                    let _ = dir.delete_entity(EntityType::Container, *c).await;
                }
            }
            _ => {
                if rng.gen_bool(0.3) {
                    if let Some(m) = members.choose(rng) {
                        let _ = dir.remove_member(*m).await;
                    }
                }
            }
        }
    }

    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

/// Interleave per-entity queues randomly and add late duplicates.
fn scramble(stream: &[Notification], rng: &mut StdRng) -> Vec<Notification> {
    let mut queues: BTreeMap<EntityId, VecDeque<Notification>> = BTreeMap::new();
    for n in stream {
        queues.entry(n.id).or_default().push_back(n.clone());
    }
    let mut out = Vec::with_capacity(stream.len() * 2);
    let mut redeliveries: Vec<Notification> = Vec::new();
    loop {
        let live: Vec<EntityId> = queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(id, _)| *id)
            .collect();
        let Some(id) = live.choose(rng) else { break };
        let Some(n) = queues.get_mut(id).and_then(|q| q.pop_front()) else {
            continue;
        };
        if rng.gen_bool(0.3) {
            redeliveries.push(n.clone());
        }
        out.push(n);
        if !redeliveries.is_empty() && rng.gen_bool(0.2) {
            let i = rng.gen_range(0..redeliveries.len());
            out.push(redeliveries.swap_remove(i));
        }
    }
    redeliveries.shuffle(rng);
    out.extend(redeliveries);
    out
}

#[tokio::test]
async fn scrambled_stream_converges_to_snapshot() {
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let dir = InMemoryDirectory::new();
        let stream = random_history(&dir, &mut rng, 150).await;

        let expected = EntityCache::new(TeamConfig::default());
        expected.snapshot_load(dir.list_entities().await.unwrap());

        let streamed = EntityCache::new(TeamConfig::default());
        for n in scramble(&stream, &mut rng) {
            streamed.apply(&n);
        }

        assert_eq!(streamed.view(), expected.view(), "seed {seed} diverged");
    }
}

#[tokio::test]
async fn snapshot_plus_overlapping_stream_converges() {
    for seed in 100..110u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let dir = InMemoryDirectory::new();
        let early = random_history(&dir, &mut rng, 60).await;
        let midway = dir.list_entities().await.unwrap();
        let late = random_history(&dir, &mut rng, 90).await;

        let expected = EntityCache::new(TeamConfig::default());
        expected.snapshot_load(dir.list_entities().await.unwrap());

        // The subscription opened before the snapshot, so the stream repeats
        // part of what the snapshot already holds.
        let cache = EntityCache::new(TeamConfig::default());
        cache.snapshot_load(midway);
        let mut overlapping = early;
        overlapping.extend(late);
        for n in scramble(&overlapping, &mut rng) {
            cache.apply(&n);
        }

        assert_eq!(cache.view(), expected.view(), "seed {seed} diverged");
    }
}

#[tokio::test]
async fn applying_a_stream_twice_changes_nothing() {
    let mut rng = StdRng::seed_from_u64(7);
    let dir = InMemoryDirectory::new();
    let stream = random_history(&dir, &mut rng, 100).await;

    let cache = EntityCache::new(TeamConfig::default());
    for n in &stream {
        cache.apply(n);
    }
    let once = cache.view();
    for n in &stream {
        cache.apply(n);
    }
    assert_eq!(cache.view(), once);
}

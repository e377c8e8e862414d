//! Team lifecycle acceptance tests against the in-memory directory.
//!
//! Covers:
//! - create → status visibility, container permissions, name collisions
//! - disambiguation and index-based leave
//! - already-member rejection without directory writes
//! - last-member leave cascading into teardown
//! - concurrent create / leave / add races
//! - rollback on failed provisioning, best-effort teardown
//! - reconciliation of teams emptied out of band

use std::sync::Arc;
use std::time::Duration;

use ekip_core::directory::{Access, DirectoryEntity, EntityType, Operation, OverwriteTarget};
use ekip_core::{
    Engine, EntityId, InMemoryDirectory, NotFound, TeamConfig, TeamError, TeamPhase,
};

const WAIT: Duration = Duration::from_secs(5);

async fn setup(config: TeamConfig) -> (Arc<InMemoryDirectory>, Engine) {
    let dir = Arc::new(InMemoryDirectory::new());
    let engine = Engine::start(dir.clone(), config).await.unwrap();
    (dir, engine)
}

async fn join(dir: &InMemoryDirectory, engine: &Engine, name: &str) -> EntityId {
    let id = dir.join_member(name).await;
    assert!(
        engine
            .cache()
            .wait_until(WAIT, |c| c.get_member(id).is_some())
            .await
    );
    id
}

fn team_names(engine: &Engine, member: EntityId) -> Vec<String> {
    engine
        .resolver()
        .teams_of(member)
        .into_iter()
        .map(|t| t.name)
        .collect()
}

async fn count_of(dir: &InMemoryDirectory, ty: EntityType) -> usize {
    dir.entities()
        .await
        .iter()
        .filter(|e| e.entity_type() == ty)
        .count()
}

#[tokio::test]
async fn create_then_status_shows_the_team() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;

    let team = engine.lifecycle().create("Rocket", u1).await.unwrap();
    assert_eq!(team.name, "Team Rocket");
    assert!(team.has_member(u1));
    assert!(team.is_fully_provisioned());
    assert_eq!(team.resources.channels.len(), 2);

    assert_eq!(team_names(&engine, u1), vec!["Team Rocket"]);
    assert_eq!(engine.lifecycle().phase("Team Rocket"), TeamPhase::Active);

    let container = team.resources.container.unwrap();
    match dir.entity(container).await {
        Some(DirectoryEntity::Container(c)) => assert_eq!(c.name, "🧩 Team Rocket"),
        other => panic!("unexpected {other:?}"),
    }
    let overwrites = dir.overwrites_of(container).await;
    assert_eq!(overwrites.len(), 2);
    assert!(overwrites
        .iter()
        .any(|o| o.target == OverwriteTarget::Group(team.id) && o.access == Access::Full));
    assert!(overwrites
        .iter()
        .any(|o| o.target == OverwriteTarget::Everyone && o.access == Access::Hidden));

    let spec = dir.group_spec(team.id).await.unwrap();
    assert!(spec.hoist && spec.mentionable);
}

#[tokio::test]
async fn privileged_group_gets_full_access() {
    let organizers = EntityId(9_000);
    let (dir, engine) = setup(TeamConfig {
        privileged_group: Some(organizers),
        ..TeamConfig::default()
    })
    .await;
    let u1 = join(&dir, &engine, "ayse").await;

    let team = engine.lifecycle().create("Rocket", u1).await.unwrap();
    let overwrites = dir.overwrites_of(team.resources.container.unwrap()).await;
    assert!(overwrites
        .iter()
        .any(|o| o.target == OverwriteTarget::Group(organizers) && o.access == Access::Full));
}

#[tokio::test]
async fn duplicate_and_invalid_names_are_rejected() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    let u2 = join(&dir, &engine, "bora").await;

    engine.lifecycle().create("Rocket", u1).await.unwrap();
    assert!(matches!(
        engine.lifecycle().create("Rocket", u2).await,
        Err(TeamError::DuplicateName(name)) if name == "Team Rocket"
    ));
    assert!(matches!(
        engine.lifecycle().create("   ", u2).await,
        Err(TeamError::InvalidName(_))
    ));
    assert!(matches!(
        engine.lifecycle().create(&"x".repeat(200), u2).await,
        Err(TeamError::InvalidName(_))
    ));
}

#[tokio::test]
async fn ambiguous_leave_needs_an_index() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    let u2 = join(&dir, &engine, "bora").await;

    let t1 = engine.lifecycle().create("One", u1).await.unwrap();
    let t2 = engine.lifecycle().create("Two", u1).await.unwrap();
    engine.lifecycle().add_member(t2.id, u2).await.unwrap();

    match engine.resolver().resolve_target_team(u1, None) {
        Err(TeamError::Ambiguous { teams }) => {
            let ids: Vec<_> = teams.iter().map(|t| t.id).collect();
            assert_eq!(ids, vec![t1.id, t2.id]);
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }

    let target = engine.resolver().resolve_target_team(u1, Some("1")).unwrap();
    assert_eq!(target.id, t2.id);
    let outcome = engine.lifecycle().remove_member(target.id, u1).await.unwrap();
    assert!(outcome.teardown.is_none());

    assert_eq!(team_names(&engine, u1), vec!["Team One"]);
    assert_eq!(team_names(&engine, u2), vec!["Team Two"]);
}

#[tokio::test]
async fn adding_an_existing_member_writes_nothing() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    let u2 = join(&dir, &engine, "bora").await;
    let team = engine.lifecycle().create("Rocket", u1).await.unwrap();
    engine.lifecycle().add_member(team.id, u2).await.unwrap();

    let before = dir.calls().await.len();
    assert!(matches!(
        engine.lifecycle().add_member(team.id, u2).await,
        Err(TeamError::AlreadyMember { member, .. }) if member == u2
    ));
    assert_eq!(dir.calls().await.len(), before);
}

#[tokio::test]
async fn last_member_leaving_tears_the_team_down() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    let team = engine.lifecycle().create("Rocket", u1).await.unwrap();

    let outcome = engine.lifecycle().remove_member(team.id, u1).await.unwrap();
    let report = outcome.teardown.expect("team should be torn down");
    assert!(report.is_clean());
    assert_eq!(report.deleted.len(), 4);

    assert!(team_names(&engine, u1).is_empty());
    assert!(engine.cache().get_all_teams().is_empty());
    assert_eq!(engine.lifecycle().phase("Team Rocket"), TeamPhase::Gone);
    for ty in [EntityType::Group, EntityType::Container, EntityType::Channel] {
        assert_eq!(count_of(&dir, ty).await, 0, "{ty} left behind");
    }
}

#[tokio::test]
async fn concurrent_creates_with_one_name_yield_one_team() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    let u2 = join(&dir, &engine, "bora").await;

    let lc = engine.lifecycle();
    let (a, b) = tokio::join!(lc.create("X", u1), lc.create("X", u2));

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(TeamError::DuplicateName(_)))));

    let named_x = engine
        .cache()
        .get_all_teams()
        .into_iter()
        .filter(|t| t.name == "Team X")
        .count();
    assert_eq!(named_x, 1);
    assert_eq!(count_of(&dir, EntityType::Group).await, 1);
}

#[tokio::test]
async fn concurrent_leaves_delete_once() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    let u2 = join(&dir, &engine, "bora").await;
    let team = engine.lifecycle().create("Rocket", u1).await.unwrap();
    engine.lifecycle().add_member(team.id, u2).await.unwrap();

    let lc = engine.lifecycle();
    let (a, b) = tokio::join!(lc.remove_member(team.id, u1), lc.remove_member(team.id, u2));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(
        [a.teardown.is_some(), b.teardown.is_some()]
            .iter()
            .filter(|x| **x)
            .count(),
        1
    );
    let deletes = dir
        .calls()
        .await
        .into_iter()
        .filter(|op| *op == Operation::Delete)
        .count();
    assert_eq!(deletes, 4);
}

#[tokio::test]
async fn concurrent_adds_respect_the_cap() {
    let (dir, engine) = setup(TeamConfig {
        max_teams_per_member: Some(1),
        ..TeamConfig::default()
    })
    .await;
    let u1 = join(&dir, &engine, "ayse").await;
    let u2 = join(&dir, &engine, "bora").await;
    let u3 = join(&dir, &engine, "cem").await;
    let t1 = engine.lifecycle().create("One", u1).await.unwrap();
    let t2 = engine.lifecycle().create("Two", u3).await.unwrap();

    let lc = engine.lifecycle();
    let (a, b) = tokio::join!(lc.add_member(t1.id, u2), lc.add_member(t2.id, u2));
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(TeamError::LimitReached { max: 1, .. }))));
    assert_eq!(engine.resolver().teams_of(u2).len(), 1);
}

#[tokio::test]
async fn owner_cap_applies_to_create() {
    let (dir, engine) = setup(TeamConfig {
        max_teams_per_member: Some(1),
        ..TeamConfig::default()
    })
    .await;
    let u1 = join(&dir, &engine, "ayse").await;
    engine.lifecycle().create("One", u1).await.unwrap();
    assert!(matches!(
        engine.lifecycle().create("Two", u1).await,
        Err(TeamError::LimitReached { .. })
    ));
}

#[tokio::test]
async fn failed_provisioning_rolls_back() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    dir.fail_nth(Operation::CreateChannel, 1).await;

    match engine.lifecycle().create("Rocket", u1).await {
        Err(TeamError::Provisioning { team, leftovers, .. }) => {
            assert_eq!(team, "Team Rocket");
            assert!(leftovers.is_empty());
        }
        other => panic!("expected provisioning error, got {other:?}"),
    }
    for ty in [EntityType::Group, EntityType::Container, EntityType::Channel] {
        assert_eq!(count_of(&dir, ty).await, 0, "{ty} left behind");
    }
    assert!(
        engine
            .cache()
            .wait_until(WAIT, |c| c.get_all_teams().is_empty())
            .await
    );

    // The name is free again.
    engine.lifecycle().create("Rocket", u1).await.unwrap();
}

/// Log sink shared with a test subscriber.
#[derive(Clone, Default)]
struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn create_and_rollback_log_the_team_name() {
    let captured = Captured::default();
    let sink = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    dir.fail_next(Operation::CreateChannel).await;
    assert!(engine.lifecycle().create("Rocket", u1).await.is_err());
    engine.lifecycle().create("Rocket", u1).await.unwrap();

    let logs = String::from_utf8_lossy(&captured.0.lock()).into_owned();
    assert!(logs.contains("Provisioning failed"), "{logs}");
    assert!(logs.contains("Team created"), "{logs}");
    assert!(logs.contains("team=Team Rocket"), "{logs}");
}

#[tokio::test]
async fn failed_owner_grant_deletes_the_group() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    dir.fail_next(Operation::Grant).await;

    assert!(matches!(
        engine.lifecycle().create("Rocket", u1).await,
        Err(TeamError::Provisioning { .. })
    ));
    assert_eq!(count_of(&dir, EntityType::Group).await, 0);
}

#[tokio::test]
async fn rollback_failures_are_reported() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    dir.fail_next(Operation::CreateChannel).await;
    dir.fail_next(Operation::Delete).await;

    match engine.lifecycle().create("Rocket", u1).await {
        Err(TeamError::Provisioning { leftovers, .. }) => {
            assert_eq!(leftovers.len(), 1);
            assert_eq!(leftovers[0].entity_type, EntityType::Container);
        }
        other => panic!("expected provisioning error, got {other:?}"),
    }
    assert_eq!(count_of(&dir, EntityType::Group).await, 0);
}

#[tokio::test]
async fn teardown_continues_past_failures() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    let team = engine.lifecycle().create("Rocket", u1).await.unwrap();
    dir.fail_next(Operation::Delete).await;

    let report = engine.lifecycle().delete(team.id).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entity_type, EntityType::Channel);
    assert_eq!(report.deleted.len(), 3);
    assert_eq!(count_of(&dir, EntityType::Group).await, 0);
    assert!(matches!(report.into_result(), Err(TeamError::Teardown(_))));
}

#[tokio::test]
async fn delete_tolerates_missing_container() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    let team = engine.lifecycle().create("Rocket", u1).await.unwrap();

    // Someone removed the container by hand.
    use ekip_core::DirectoryClient;
    dir.delete_entity(EntityType::Container, team.resources.container.unwrap())
        .await
        .unwrap();
    assert!(
        engine
            .cache()
            .wait_until(WAIT, |c| c
                .get_team(team.id)
                .is_some_and(|t| t.resources.container.is_none()))
            .await
    );

    let report = engine.lifecycle().delete(team.id).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.deleted, vec![(EntityType::Group, team.id)]);
}

#[tokio::test]
async fn delete_all_reports_each_team() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    let u2 = join(&dir, &engine, "bora").await;
    engine.lifecycle().create("One", u1).await.unwrap();
    engine.lifecycle().create("Two", u2).await.unwrap();
    dir.fail_next(Operation::Delete).await;

    let results = engine.lifecycle().delete_all().await;
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0].1, Err(TeamError::Teardown(_))));
    assert!(results[1].1.is_ok());
    assert!(engine.cache().get_all_teams().is_empty());
}

#[tokio::test]
async fn unknown_team_is_not_found() {
    let (_dir, engine) = setup(TeamConfig::default()).await;
    assert!(matches!(
        engine.lifecycle().delete(EntityId(77)).await,
        Err(TeamError::NotFound(NotFound::Team(_)))
    ));
}

#[tokio::test]
async fn reconcile_removes_teams_emptied_out_of_band() {
    let (dir, engine) = setup(TeamConfig::default()).await;
    let u1 = join(&dir, &engine, "ayse").await;
    let u2 = join(&dir, &engine, "bora").await;
    let kept = engine.lifecycle().create("Kept", u2).await.unwrap();
    let team = engine.lifecycle().create("Rocket", u1).await.unwrap();

    dir.remove_member(u1).await.unwrap();
    assert!(
        engine
            .cache()
            .wait_until(WAIT, |c| c.get_team(team.id).is_some_and(|t| t.is_empty()))
            .await
    );

    let reports = engine.lifecycle().reconcile_empty_teams().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].team, "Team Rocket");
    assert!(engine.cache().get_team(team.id).is_none());
    assert!(engine.cache().get_team(kept.id).is_some());
}

//! Behavioural tests for the droplet race.

#[path = "common/race_harness.rs"]
mod race_harness;

use std::sync::Arc;
use std::time::Duration;

use exitnode::test_support::{AttemptScript, FakeCloud, ScriptedProvision, droplet_record};
use exitnode::{CloudApi, InstanceRegistry, RaceCoordinator, RaceOutcome};
use rstest::rstest;
use tokio_util::sync::CancellationToken;

use race_harness::{Artifacts, overlay_runner, provisioner};

const TICK: Duration = Duration::from_millis(5);

fn scripted(provision: &Arc<ScriptedProvision>, ceiling: usize) -> RaceCoordinator<ScriptedProvision> {
    RaceCoordinator::new(Arc::clone(provision), provision.registry(), ceiling).with_poll_interval(TICK)
}

#[tokio::test]
async fn failed_attempts_are_replaced_within_the_ceiling() {
    let provision = Arc::new(ScriptedProvision::repeating(AttemptScript::fail(TICK * 4)));

    let outcome = scripted(&provision, 3)
        .with_max_attempts(Some(9))
        .run(&CancellationToken::new())
        .await;

    assert_eq!(outcome, RaceOutcome::Exhausted { attempts: 9 });
    assert_eq!(provision.started(), 9);
    assert_eq!(provision.peak_in_flight(), 3);
    assert!(provision.registry().is_empty());
}

#[rstest]
#[case::one_of_one(1, 1)]
#[case::three_of_three(3, 3)]
#[case::over_ceiling(4, 2)]
#[tokio::test]
async fn full_account_starts_no_attempts(#[case] live: u64, #[case] ceiling: usize) {
    let provision = Arc::new(ScriptedProvision::repeating(AttemptScript::fail(TICK)));
    for id in 0..live {
        provision.registry().insert(droplet_record(100 + id));
    }

    let outcome = scripted(&provision, ceiling).run(&CancellationToken::new()).await;

    assert_eq!(
        outcome,
        RaceOutcome::LimitReached {
            live: usize::try_from(live).expect("small count"),
            ceiling,
        }
    );
    assert_eq!(provision.started(), 0);
}

#[tokio::test]
async fn existing_droplets_shrink_the_pool() {
    let provision = Arc::new(ScriptedProvision::repeating(AttemptScript::fail(TICK)));
    provision.registry().insert(droplet_record(100));
    provision.registry().insert(droplet_record(101));

    let outcome = scripted(&provision, 3)
        .with_max_attempts(Some(3))
        .run(&CancellationToken::new())
        .await;

    assert_eq!(outcome, RaceOutcome::Exhausted { attempts: 3 });
    assert_eq!(provision.peak_in_flight(), 1);
    assert_eq!(provision.registry().len(), 2);
}

#[tokio::test]
async fn nothing_starts_after_a_win() {
    let provision = Arc::new(ScriptedProvision::new(vec![AttemptScript::succeed(TICK)]));

    let outcome = scripted(&provision, 2).run(&CancellationToken::new()).await;
    let started = provision.started();
    tokio::time::sleep(TICK * 4).await;

    assert!(matches!(outcome, RaceOutcome::Winner(_)));
    assert_eq!(started, 2);
    assert_eq!(provision.started(), started);
    assert_eq!(provision.in_flight(), 0);
    assert_eq!(provision.registry().len(), 1);
}

#[tokio::test]
async fn simultaneous_winners_keep_one_droplet() {
    let provision = Arc::new(ScriptedProvision::repeating(AttemptScript::succeed(TICK)));

    let outcome = scripted(&provision, 3).run(&CancellationToken::new()).await;

    let RaceOutcome::Winner(winner) = outcome else {
        panic!("expected a winner, got {outcome:?}");
    };
    assert_eq!(provision.registry().snapshot(), vec![winner.clone()]);
    assert!(!provision.released().contains(&winner.id));
}

#[tokio::test]
async fn loser_droplet_is_destroyed_when_the_other_wins() {
    let cloud = Arc::new(FakeCloud::with_default_catalog());
    let registry = Arc::new(InstanceRegistry::from(
        cloud.list_droplets().await.expect("listing should succeed"),
    ));
    let artifacts = Artifacts::new();
    let subject = provisioner(&cloud, &registry, overlay_runner(&[2]), &artifacts).await;

    let outcome = RaceCoordinator::new(Arc::new(subject), Arc::clone(&registry), 2)
        .with_poll_interval(TICK)
        .with_max_attempts(Some(6))
        .run(&CancellationToken::new())
        .await;

    let RaceOutcome::Winner(winner) = outcome else {
        panic!("expected a winner, got {outcome:?}");
    };
    assert_eq!(winner.id, 2);
    assert_eq!(cloud.live_ids().into_iter().collect::<Vec<_>>(), vec![2]);
    assert!(cloud.destroyed_ids().contains(&1));
    assert!(cloud.peak_live() <= 2, "peak {}", cloud.peak_live());
    assert_eq!(registry.snapshot(), vec![winner]);
}

#[tokio::test]
async fn occupied_account_creates_no_droplets() {
    let cloud = Arc::new(FakeCloud::with_default_catalog());
    cloud.seed_droplet(droplet_record(40));
    let registry = Arc::new(InstanceRegistry::from(
        cloud.list_droplets().await.expect("listing should succeed"),
    ));
    let artifacts = Artifacts::new();
    let subject = provisioner(&cloud, &registry, overlay_runner(&[41]), &artifacts).await;

    let outcome = RaceCoordinator::new(Arc::new(subject), Arc::clone(&registry), 1)
        .with_poll_interval(TICK)
        .run(&CancellationToken::new())
        .await;

    assert_eq!(outcome, RaceOutcome::LimitReached { live: 1, ceiling: 1 });
    assert_eq!(cloud.created_count(), 0);
    assert_eq!(cloud.live_ids().into_iter().collect::<Vec<_>>(), vec![40]);
}

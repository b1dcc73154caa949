//! End-to-end trigger and nag scenarios against a file-backed store.

use crate::helpers::{RecordingActuator, Scenario, epoch};
use chrono::TimeDelta;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use upkeep::actuator::Urgency;
use upkeep::scheduler::{NagKind, NagOutcome, SkipReason, TriggerPolicy};
use upkeep::state::{FileStateStore, MaintenanceState, StateDelta, StateStore};
use upkeep::{RunOutcome, TriggerEvent};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(24 * 3600);

fn seed_last_run(scenario: &Scenario, hours_ago: i64) {
    scenario
        .store
        .commit(&StateDelta::run_completed(epoch() - TimeDelta::hours(hours_ago)))
        .unwrap();
}

#[tokio::test]
async fn recent_run_skips_idle_poll() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(dir.path(), RecordingActuator::default());
    let coordinator = scenario.coordinator(dir.path());
    seed_last_run(&scenario, 10);
    scenario.set_idle_for(90 * MINUTE);

    let outcome = coordinator
        .handle_trigger(TriggerEvent::IdlePoll, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Skipped(SkipReason::NotDue));
    assert_eq!(scenario.actuator.runs(), 0);
}

#[tokio::test]
async fn idle_poll_waits_for_idle_threshold_then_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(dir.path(), RecordingActuator::default());
    let coordinator = scenario.coordinator(dir.path());
    let cancel = CancellationToken::new();
    seed_last_run(&scenario, 25);

    scenario.set_idle_for(30 * MINUTE);
    assert_eq!(
        coordinator.handle_trigger(TriggerEvent::IdlePoll, &cancel).await.unwrap(),
        RunOutcome::Skipped(SkipReason::IdleTooShort)
    );

    scenario.set_idle_for(90 * MINUTE);
    assert_eq!(
        coordinator.handle_trigger(TriggerEvent::IdlePoll, &cancel).await.unwrap(),
        RunOutcome::Completed { at: epoch() }
    );

    // No time elapsed: every trigger now sees the run as done.
    for event in TriggerEvent::ALL {
        assert_eq!(
            coordinator.handle_trigger(event, &cancel).await.unwrap(),
            RunOutcome::Skipped(SkipReason::NotDue),
            "{event}"
        );
    }
    assert_eq!(scenario.actuator.runs(), 1);

    let reopened = FileStateStore::new(dir.path().join("state.json"));
    assert_eq!(reopened.get().unwrap().last_run_at, Some(epoch()));
}

#[tokio::test]
async fn fresh_install_introduces_then_escalates_from_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(dir.path(), RecordingActuator::default());
    let coordinator = scenario.coordinator(dir.path());

    assert_eq!(
        coordinator.check_nag().await.unwrap(),
        NagOutcome::Delivered(NagKind::FirstRun)
    );
    let state = scenario.store.get().unwrap();
    assert!(state.first_run_notice_shown);
    assert_eq!(state.nag_baseline_at, Some(epoch()));
    assert_eq!(coordinator.check_nag().await.unwrap(), NagOutcome::Quiet);

    // Seven days of grace, then the overdue notice.
    scenario.clock.advance(7 * DAY);
    assert_eq!(coordinator.check_nag().await.unwrap(), NagOutcome::Quiet);
    scenario.clock.advance(DAY);
    assert_eq!(
        coordinator.check_nag().await.unwrap(),
        NagOutcome::Delivered(NagKind::Overdue)
    );

    let notices = scenario.actuator.notifications();
    assert_eq!(notices.len(), 2);
    assert_eq!(notices[0].urgency, Urgency::Low);
    assert_eq!(notices[1].urgency, Urgency::Normal);
}

#[tokio::test]
async fn overdue_notice_respects_cooldown_and_clears_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(dir.path(), RecordingActuator::default());
    let coordinator = scenario.coordinator(dir.path());
    seed_last_run(&scenario, 8 * 24);

    assert_eq!(
        coordinator.check_nag().await.unwrap(),
        NagOutcome::Delivered(NagKind::Overdue)
    );
    assert_eq!(scenario.store.get().unwrap().last_nag_at, Some(epoch()));
    assert_eq!(coordinator.check_nag().await.unwrap(), NagOutcome::Quiet);

    scenario.clock.advance(7 * DAY - Duration::from_secs(1));
    assert_eq!(coordinator.check_nag().await.unwrap(), NagOutcome::Quiet);
    scenario.clock.advance(Duration::from_secs(1));
    assert_eq!(
        coordinator.check_nag().await.unwrap(),
        NagOutcome::Delivered(NagKind::Overdue)
    );
    assert_eq!(
        scenario.actuator.notifications()[1].urgency,
        Urgency::Critical,
        "fifteen days overdue"
    );

    let outcome = coordinator
        .handle_trigger(TriggerEvent::Manual, &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_completed());
    scenario.clock.advance(7 * DAY);
    assert_eq!(coordinator.check_nag().await.unwrap(), NagOutcome::Quiet);
}

#[tokio::test]
async fn failed_notification_changes_nothing_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(dir.path(), RecordingActuator::default());
    let coordinator = scenario.coordinator(dir.path());
    seed_last_run(&scenario, 9 * 24);
    let before = std::fs::read(dir.path().join("state.json")).unwrap();

    scenario
        .actuator
        .fail_notifications
        .store(true, Ordering::SeqCst);
    assert!(matches!(
        coordinator.check_nag().await.unwrap(),
        NagOutcome::Failed(_)
    ));
    assert_eq!(std::fs::read(dir.path().join("state.json")).unwrap(), before);
}

#[tokio::test]
async fn failed_run_keeps_maintenance_due() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(dir.path(), RecordingActuator::default());
    let coordinator = scenario.coordinator(dir.path());
    let cancel = CancellationToken::new();
    scenario.actuator.fail_runs.store(true, Ordering::SeqCst);

    let outcome = coordinator
        .handle_trigger(TriggerEvent::Scheduled, &cancel)
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Failed(_)));
    assert_eq!(scenario.store.get().unwrap(), MaintenanceState::default());

    scenario.actuator.fail_runs.store(false, Ordering::SeqCst);
    assert!(
        coordinator
            .handle_trigger(TriggerEvent::Scheduled, &cancel)
            .await
            .unwrap()
            .is_completed()
    );
    assert_eq!(scenario.actuator.runs(), 2);
}

#[tokio::test]
async fn pre_suspend_gives_up_at_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(dir.path(), RecordingActuator::with_run_time(HOUR));
    let coordinator = scenario
        .coordinator(dir.path())
        .with_trigger_policy(TriggerPolicy {
            pre_suspend_deadline: Duration::from_millis(150),
            ..TriggerPolicy::default()
        });
    seed_last_run(&scenario, 30);

    let started = std::time::Instant::now();
    let outcome = coordinator
        .handle_trigger(TriggerEvent::PreSuspend, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Incomplete);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        scenario.store.get().unwrap().last_run_at,
        Some(epoch() - TimeDelta::hours(30))
    );
}

#[tokio::test]
async fn wall_clock_jumping_back_is_not_due() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(dir.path(), RecordingActuator::default());
    let coordinator = scenario.coordinator(dir.path());
    seed_last_run(&scenario, 0);

    scenario.clock.set_wall(epoch() - TimeDelta::days(3));
    let outcome = coordinator
        .handle_trigger(TriggerEvent::Manual, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Skipped(SkipReason::NotDue));

    let report = coordinator.status().unwrap();
    assert!(!report.is_due);
    assert_eq!(report.overdue_for_secs, None);
}

#[tokio::test]
async fn contended_state_commit_does_not_stall_the_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(dir.path(), RecordingActuator::default());
    let coordinator = scenario.coordinator(dir.path());
    let _other_writer =
        upkeep::scheduler::authority::try_lock_file(&dir.path().join("state.json.lock"), HOUR)
            .unwrap()
            .unwrap();

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = Arc::clone(&ticks);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let err = coordinator
        .handle_trigger(TriggerEvent::Manual, &CancellationToken::new())
        .await
        .unwrap_err();
    ticker.abort();

    assert!(matches!(err, upkeep::UpkeepError::Store(_)), "{err}");
    assert!(ticks.load(Ordering::SeqCst) > 20, "other tasks kept running");
    assert_eq!(scenario.store.get().unwrap().last_run_at, None);
}

//! Concurrent triggers across independent coordinators sharing one state dir.

use crate::helpers::{RecordingActuator, Scenario};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use upkeep::scheduler::{NagKind, NagOutcome, SkipReason, TriggerPolicy};
use upkeep::{RunCoordinator, RunOutcome, TriggerEvent, UpkeepConfig};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_triggers_run_maintenance_once() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(
        dir.path(),
        RecordingActuator::with_run_time(Duration::from_millis(200)),
    );

    let mut handles = Vec::new();
    for event in [
        TriggerEvent::Manual,
        TriggerEvent::Scheduled,
        TriggerEvent::Manual,
        TriggerEvent::Scheduled,
    ] {
        let coordinator = Arc::new(scenario.coordinator(dir.path()));
        handles.push(tokio::spawn(async move {
            coordinator
                .handle_trigger(event, &CancellationToken::new())
                .await
                .unwrap()
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    let completed = outcomes.iter().filter(|o| o.is_completed()).count();
    assert_eq!(completed, 1, "{outcomes:?}");
    assert!(outcomes.iter().all(|o| matches!(
        o,
        RunOutcome::Completed { .. }
            | RunOutcome::Skipped(SkipReason::Busy | SkipReason::NotDue)
    )));
    assert_eq!(scenario.actuator.runs(), 1);
    assert_eq!(scenario.actuator.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pre_suspend_waits_for_running_maintenance() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(
        dir.path(),
        RecordingActuator::with_run_time(Duration::from_millis(400)),
    );
    let running = Arc::new(scenario.coordinator(dir.path()));
    let hook = scenario.coordinator(dir.path());

    let manual = {
        let running = Arc::clone(&running);
        tokio::spawn(async move {
            running
                .handle_trigger(TriggerEvent::Manual, &CancellationToken::new())
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = hook
        .handle_trigger(TriggerEvent::PreSuspend, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Skipped(SkipReason::NotDue));
    assert!(manual.await.unwrap().is_completed());
    assert_eq!(scenario.actuator.runs(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nag_proceeds_while_maintenance_runs() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(
        dir.path(),
        RecordingActuator::with_run_time(Duration::from_millis(400)),
    );
    let runner = Arc::new(scenario.coordinator(dir.path()));
    let nagger = scenario.coordinator(dir.path());

    let run = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            runner
                .handle_trigger(TriggerEvent::Manual, &CancellationToken::new())
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        nagger.check_nag().await.unwrap(),
        NagOutcome::Delivered(NagKind::FirstRun)
    );
    assert!(run.await.unwrap().is_completed());

    let state = upkeep::state::StateStore::get(scenario.store.as_ref()).unwrap();
    assert!(state.first_run_notice_shown);
    assert!(state.last_run_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_nag_checks_deliver_once() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(dir.path(), RecordingActuator::default());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let coordinator = Arc::new(scenario.coordinator(dir.path()));
        handles.push(tokio::spawn(async move { coordinator.check_nag().await.unwrap() }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(matches!(
            outcome,
            NagOutcome::Delivered(NagKind::FirstRun) | NagOutcome::Busy | NagOutcome::Quiet
        ));
    }
    assert_eq!(scenario.actuator.notifications().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn lock_left_by_crashed_process_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(dir.path(), RecordingActuator::default());
    let acquired_at_ms = upkeep::scheduler::authority::now_epoch_millis();
    std::fs::write(
        dir.path().join("maintenance.lock"),
        format!(r#"{{"owner":"crashed","pid":{},"acquired_at_ms":{acquired_at_ms}}}"#, i32::MAX),
    )
    .unwrap();

    let outcome = scenario
        .coordinator(dir.path())
        .handle_trigger(TriggerEvent::Manual, &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_completed());
    assert!(!dir.path().join("maintenance.lock").exists());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pre_suspend_deadline_stops_command_before_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("maintenance.log");
    let mut config = UpkeepConfig::default();
    config.actuator.maintenance_command = vec![
        "sh".to_owned(),
        "-c".to_owned(),
        format!("echo start >> '{0}'; sleep 1; echo end >> '{0}'", log.display()),
    ];
    let policy = TriggerPolicy {
        pre_suspend_deadline: Duration::from_millis(200),
        ..TriggerPolicy::from(&config.schedule)
    };
    let hook = RunCoordinator::from_config(&config, dir.path()).with_trigger_policy(policy);
    let manual = RunCoordinator::from_config(&config, dir.path());

    let outcome = hook
        .handle_trigger(TriggerEvent::PreSuspend, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Incomplete);
    assert!(!dir.path().join("maintenance.lock").exists());

    let outcome = manual
        .handle_trigger(TriggerEvent::Manual, &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_completed(), "{outcome}");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let written = std::fs::read_to_string(&log).unwrap();
    assert_eq!(written.matches("end").count(), 1, "{written:?}");
    assert!(written.ends_with("start\nend\n"), "{written:?}");
}

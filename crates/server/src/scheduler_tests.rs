// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tokio::sync::mpsc;

fn scheduler() -> (Scheduler, mpsc::UnboundedReceiver<ScheduledFire>, CancellationToken) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    (Scheduler::new(tx, shutdown.clone()), rx, shutdown)
}

#[tokio::test]
async fn recurring_job_fires_repeatedly() {
    let (scheduler, mut rx, _shutdown) = scheduler();
    let id = scheduler.schedule_every("dev-a", "check in please", 30,
        Duration::from_millis(50), true);

    let first = match rx.recv().await {
        Some(f) => f,
        None => unreachable!("channel closed"),
    };
    assert_eq!(first.job_id, id);
    assert_eq!(first.session_name, "dev-a");
    assert_eq!(first.message, "check in please");

    // It keeps firing.
    assert!(rx.recv().await.is_some());
    scheduler.cancel(id);
}

#[tokio::test]
async fn one_shot_job_fires_once() {
    let (scheduler, mut rx, _shutdown) = scheduler();
    let id = scheduler.schedule_every("dev-b", "one shot", 1, Duration::from_millis(30), false);

    assert!(rx.recv().await.is_some());
    scheduler.mark_fired(id);
    assert!(scheduler.jobs_for_session("dev-b").is_empty());

    // No second fire arrives.
    let second = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(second.is_err(), "one-shot job fired twice");
}

#[tokio::test]
async fn cancel_stops_firing() {
    let (scheduler, mut rx, _shutdown) = scheduler();
    let id = scheduler.schedule_every("dev-c", "m", 1, Duration::from_millis(30), true);
    assert!(rx.recv().await.is_some());

    assert!(scheduler.cancel(id));
    // Drain anything already in flight, then expect silence.
    tokio::time::sleep(Duration::from_millis(100)).await;
    while rx.try_recv().is_ok() {}
    let next = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(next.is_err(), "job fired after cancel");

    assert!(!scheduler.cancel(id), "double cancel should report missing");
}

#[tokio::test]
async fn cancel_for_session_clears_only_that_session() {
    let (scheduler, _rx, _shutdown) = scheduler();
    scheduler.schedule_every("dev-d", "m1", 1, Duration::from_secs(3600), true);
    scheduler.schedule_every("dev-d", "m2", 1, Duration::from_secs(3600), true);
    scheduler.schedule_every("dev-e", "m3", 1, Duration::from_secs(3600), true);

    scheduler.cancel_for_session("dev-d");
    assert!(scheduler.jobs_for_session("dev-d").is_empty());
    assert_eq!(scheduler.jobs_for_session("dev-e").len(), 1);
    assert_eq!(scheduler.list().len(), 1);
}

#[tokio::test]
async fn shutdown_stops_all_jobs() {
    let (scheduler, mut rx, shutdown) = scheduler();
    scheduler.schedule_every("dev-f", "m", 1, Duration::from_millis(30), true);
    assert!(rx.recv().await.is_some());

    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;
    while rx.try_recv().is_ok() {}
    let next = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(next.is_err(), "job fired after shutdown");
}

#[test]
fn minutes_to_interval_floors_at_one_minute() {
    // Plain schedule() is minute-based; zero still produces a live timer.
    let (tx, _rx) = mpsc::unbounded_channel();
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => unreachable!("runtime: {e}"),
    };
    rt.block_on(async {
        let scheduler = Scheduler::new(tx, CancellationToken::new());
        let id = scheduler.schedule("dev-g", "m", 0, true);
        assert_eq!(scheduler.jobs_for_session("dev-g")[0].id, id);
    });
}

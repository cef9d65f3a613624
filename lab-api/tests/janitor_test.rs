//! Integration tests for the janitor task
//!
//! The tokio clock is paused so interval ticks are driven by the test, while
//! workspace idleness follows the orchestrator's fake clock.

mod common;

use std::time::Duration;

use chrono::TimeDelta;
use common::create_test_context;
use lab_api::start_janitor_task;
use lab_orchestrator::{ReaperPolicy, WorkspaceStatus};
use tokio::sync::watch;

#[tokio::test(start_paused = true)]
async fn test_janitor_reclaims_idle_workspaces() {
    let ctx = create_test_context();
    let orchestrator = &ctx.state.orchestrator;
    let workspace = orchestrator
        .create_or_get("alice", "cs101", None)
        .await
        .expect("create workspace");

    ctx.clock.advance(TimeDelta::hours(5));

    let (tx, rx) = watch::channel(false);
    let janitor = tokio::spawn(start_janitor_task(
        ctx.state.reaper.clone(),
        Duration::from_secs(60),
        ReaperPolicy::default(),
        rx,
    ));

    // The first tick fires immediately
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        orchestrator.find(&workspace.id).map(|w| w.status),
        Some(WorkspaceStatus::Deleted)
    );
    assert!(ctx.driver.containers().is_empty());

    tx.send(true).expect("janitor is listening");
    tokio::time::timeout(Duration::from_secs(1), janitor)
        .await
        .expect("janitor stops on shutdown")
        .expect("janitor task did not panic");
}

#[tokio::test(start_paused = true)]
async fn test_janitor_pauses_before_deleting() {
    let ctx = create_test_context();
    let orchestrator = &ctx.state.orchestrator;
    let workspace = orchestrator
        .create_or_get("alice", "cs101", None)
        .await
        .expect("create workspace");

    let policy = ReaperPolicy {
        pause_after: Some(Duration::from_secs(30 * 60)),
        delete_after: Duration::from_secs(4 * 60 * 60),
    };
    let (tx, rx) = watch::channel(false);
    let janitor = tokio::spawn(start_janitor_task(
        ctx.state.reaper.clone(),
        Duration::from_secs(60),
        policy,
        rx,
    ));

    // Not idle yet on the first tick
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        orchestrator.find(&workspace.id).map(|w| w.status),
        Some(WorkspaceStatus::Running)
    );

    ctx.clock.advance(TimeDelta::hours(1));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        orchestrator.find(&workspace.id).map(|w| w.status),
        Some(WorkspaceStatus::Paused)
    );

    ctx.clock.advance(TimeDelta::hours(4));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        orchestrator.find(&workspace.id).map(|w| w.status),
        Some(WorkspaceStatus::Deleted)
    );

    drop(tx);
    tokio::time::timeout(Duration::from_secs(1), janitor)
        .await
        .expect("janitor stops when the sender is dropped")
        .expect("janitor task did not panic");
}

#[tokio::test(start_paused = true)]
async fn test_janitor_leaves_active_workspaces() {
    let ctx = create_test_context();
    let orchestrator = &ctx.state.orchestrator;
    let workspace = orchestrator
        .create_or_get("alice", "cs101", None)
        .await
        .expect("create workspace");

    let (tx, rx) = watch::channel(false);
    let janitor = tokio::spawn(start_janitor_task(
        ctx.state.reaper.clone(),
        Duration::from_secs(60),
        ReaperPolicy::default(),
        rx,
    ));

    for _ in 0..5 {
        ctx.clock.advance(TimeDelta::hours(1));
        // Reading the status counts as activity
        orchestrator.status(&workspace.id).expect("workspace exists");
        tokio::time::sleep(Duration::from_secs(60)).await;
    }

    assert_eq!(
        orchestrator.find(&workspace.id).map(|w| w.status),
        Some(WorkspaceStatus::Running)
    );

    tx.send(true).expect("janitor is listening");
    janitor.await.expect("janitor task did not panic");
}

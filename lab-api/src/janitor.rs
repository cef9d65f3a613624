use lab_orchestrator::{IdleReaper, ReaperPolicy};
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

/// Run the idle policy every `every` until `shutdown` turns true or its sender drops.
pub async fn start_janitor_task(
    reaper: IdleReaper,
    every: Duration,
    policy: ReaperPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_secs = every.as_secs(),
        pause_after = ?policy.pause_after,
        delete_after = ?policy.delete_after,
        "Janitor task running"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                reaper.run_policy(&policy).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Janitor task stopped");
}

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::info;
use ws_activity::ActivityReconciler;

/// Cadence of one scheduled pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub initial_delay: Duration,
    pub period: Duration,
}

impl Schedule {
    pub fn from_secs(initial_delay_secs: u64, period_secs: u64) -> Self {
        Self {
            initial_delay: Duration::from_secs(initial_delay_secs),
            // a zero period would make tokio panic
            period: Duration::from_secs(period_secs.max(1)),
        }
    }
}

/// Run the expiry pass forever. A pass always finishes before the next
/// tick is taken.
pub async fn start_expiry_task(reconciler: Arc<ActivityReconciler>, schedule: Schedule) {
    let mut interval = interval_at(Instant::now() + schedule.initial_delay, schedule.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Expiry task running (first check in {:?}, then every {:?})",
        schedule.initial_delay, schedule.period
    );

    loop {
        interval.tick().await;
        reconciler.expire().await;
    }
}

/// Run the reconciliation pass forever.
pub async fn start_cleanup_task(reconciler: Arc<ActivityReconciler>, schedule: Schedule) {
    let mut interval = interval_at(Instant::now() + schedule.initial_delay, schedule.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Activity cleanup task running (first pass in {:?}, then every {:?})",
        schedule.initial_delay, schedule.period
    );

    loop {
        interval.tick().await;
        reconciler.cleanup().await;
    }
}

/// Spawn both passes as independent tasks.
pub fn spawn_reconciler_tasks(
    reconciler: Arc<ActivityReconciler>,
    expiry: Schedule,
    cleanup: Schedule,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let expiry_task = tokio::spawn(start_expiry_task(reconciler.clone(), expiry));
    let cleanup_task = tokio::spawn(start_cleanup_task(reconciler, cleanup));
    (expiry_task, cleanup_task)
}

//! Full-range polling: the correctness backstop for missed notifications.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::sync::{SyncEngine, SyncSummary, SyncType};

/// Largest accepted sweep window on either side of now. Wider values are
/// clamped; chrono rejects absurd day counts outright.
pub const MAX_WINDOW_DAYS: i64 = 366;

/// Counters over poll runs, manual and scheduled alike.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Sweeps every source calendar over a wall-clock window. Overlapping runs
/// are harmless because the engine is idempotent, so no mutual exclusion.
pub struct PollingScheduler {
    engine: Arc<SyncEngine>,
    stats: Mutex<RunStats>,
}

impl PollingScheduler {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            stats: Mutex::new(RunStats::default()),
        }
    }

    /// Sweep [now − days_back, now + days_forward]. The daily trigger and
    /// the manual endpoint share this exact path.
    #[instrument(skip(self), level = "info")]
    pub async fn run(&self, days_back: i64, days_forward: i64) -> SyncSummary {
        let days_back = days_back.clamp(0, MAX_WINDOW_DAYS);
        let days_forward = days_forward.clamp(0, MAX_WINDOW_DAYS);

        let now = Utc::now();
        let summary = self
            .engine
            .sync_all_sources(
                now - Duration::days(days_back),
                now + Duration::days(days_forward),
                SyncType::Polling,
            )
            .await;

        let mut stats = self.stats.lock();
        stats.total_runs += 1;
        stats.last_run = Some(Utc::now());
        if summary.calendars_failed == 0 && summary.errors == 0 {
            stats.successful_runs += 1;
            stats.last_error = None;
        } else {
            stats.failed_runs += 1;
            stats.last_error = Some(format!(
                "{} calendars failed, {} event errors",
                summary.calendars_failed, summary.errors
            ));
        }

        info!(
            calendars = summary.calendars_synced,
            failed = summary.calendars_failed,
            created = summary.busy_blocks_created,
            deleted = summary.busy_blocks_deleted,
            errors = summary.errors,
            "Poll run complete"
        );
        summary
    }

    pub fn run_stats(&self) -> RunStats {
        self.stats.lock().clone()
    }

    /// Spawn the daily trigger, firing at `hour` UTC until cancelled.
    pub fn spawn_daily(
        self: &Arc<Self>,
        hour: u32,
        days_back: i64,
        days_forward: i64,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let wait = duration_until_hour(hour);
                info!(seconds = wait.as_secs(), "Next daily sync scheduled");

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Polling scheduler shut down");
                        return;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }

                scheduler.run(days_back, days_forward).await;
            }
        })
    }
}

/// Time until the next occurrence of `hour`:00 UTC.
fn duration_until_hour(hour: u32) -> std::time::Duration {
    let now = Utc::now();
    let today = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .unwrap_or_default();
    let mut next = Utc.from_utc_datetime(&today);
    if next <= now {
        next += Duration::days(1);
    }
    (next - now).to_std().unwrap_or_default()
}

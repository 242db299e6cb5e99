// service/background_jobs.rs
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::AppState;

/// Re-offers jobs whose provider let the assignment window lapse.
pub async fn start_reassignment_sweep(app_state: Arc<AppState>) {
    let period = Duration::from_secs(app_state.env.reassign_sweep_secs.max(1));
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        tracing::debug!("Running reassignment sweep at {}", Utc::now());

        match app_state.matching_service.sweep_stale_assignments().await {
            Ok(0) => {}
            Ok(count) => tracing::info!("Reassignment sweep moved {} job(s)", count),
            Err(e) => tracing::error!("Reassignment sweep failed: {}", e),
        }
    }
}

/// Logs pool saturation so an undersized pool shows up before requests stall.
pub async fn start_pool_monitor(app_state: Arc<AppState>, max_connections: u32) {
    let mut interval = interval(Duration::from_secs(30));

    loop {
        interval.tick().await;

        let pool = &app_state.db_client.pool;
        let size = pool.size();
        let idle = pool.num_idle() as u32;
        tracing::debug!(
            "Pool status - active: {}, idle: {}, total: {}",
            size.saturating_sub(idle),
            idle,
            size
        );

        if size >= max_connections * 8 / 10 {
            tracing::warn!("Connection pool at 80% capacity");
        }
    }
}

//! Background retention enforcement
//!
//! Periodically applies the retention policy against the active store,
//! outside the request path. A failed cycle is logged and retried on the
//! next interval; cleanup failures are never fatal to the host process.

use crate::config::RetentionPolicy;
use crate::error::Result;
use crate::store::LogStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Spawn the periodic cleanup task
///
/// Returns `None` when the policy is disabled. The first cycle runs
/// immediately, then every `cleanup_interval_minutes`.
pub fn spawn_cleanup_task(
    store: Arc<dyn LogStore>,
    policy: RetentionPolicy,
) -> Option<JoinHandle<()>> {
    if !policy.enabled {
        return None;
    }

    Some(tokio::spawn(async move {
        cleanup_loop(store, policy).await;
    }))
}

async fn cleanup_loop(store: Arc<dyn LogStore>, policy: RetentionPolicy) {
    let period = Duration::from_secs(policy.cleanup_interval_minutes.max(1) * 60);
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        match store.cleanup(&policy).await {
            Ok(deleted) => {
                tracing::info!(deleted, "retention cleanup completed");
            }
            Err(e) => {
                tracing::error!(error = %e, "retention cleanup failed");
            }
        }
    }
}

/// Run one cleanup cycle immediately (for manual triggering)
pub async fn run_cleanup_now(store: &dyn LogStore, policy: &RetentionPolicy) -> Result<u64> {
    let deleted = store.cleanup(policy).await?;
    tracing::info!(deleted, "manual cleanup completed");
    Ok(deleted)
}

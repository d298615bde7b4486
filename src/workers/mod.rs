//! Background sweepers. Each runs as its own tokio task and never exits;
//! batch errors are logged and the loop keeps going.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use crate::services::{PaymentService, ReconciliationService};

/// Periodically resolves payments whose reconciliation is due. The interval
/// bounds how fresh the sweep is; per-payment pacing comes from each
/// transaction's own `next_reconciliation_at` backoff.
pub async fn run_reconciliation_sweeper(service: Arc<ReconciliationService>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "reconciliation sweeper started");

    loop {
        match service.reconcile_due(Utc::now()).await {
            Ok(0) => {}
            Ok(count) => info!(count, "reconciliation sweep completed"),
            Err(e) => error!(error = %e, "reconciliation sweep failed"),
        }

        sleep(interval).await;
    }
}

/// Periodically re-dispatches payments stuck in `created`, i.e. charges that
/// were never submitted to the gateway at all.
pub async fn run_retry_sweeper(service: Arc<PaymentService>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "retry sweeper started");

    loop {
        match service.retry_stale(Utc::now()).await {
            Ok(0) => {}
            Ok(count) => info!(count, "retry sweep completed"),
            Err(e) => error!(error = %e, "retry sweep failed"),
        }

        sleep(interval).await;
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SyncTarget;
use crate::engine::{SyncEngine, SyncReport};
use crate::error::SyncError;

/// Sync every target as an independent task, at most `max_concurrency` at a
/// time. One pair's failure never stops the others. Reports come back in
/// target order.
pub async fn sync_all(
    engine: Arc<SyncEngine>,
    targets: &[SyncTarget],
    max_concurrency: usize,
    cancel: &CancellationToken,
) -> Vec<SyncReport> {
    run_targets(engine, targets, max_concurrency, None, cancel).await
}

/// [`sync_all`] with one fixed clock for every pair.
pub async fn sync_all_at(
    engine: Arc<SyncEngine>,
    targets: &[SyncTarget],
    max_concurrency: usize,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Vec<SyncReport> {
    run_targets(engine, targets, max_concurrency, Some(now), cancel).await
}

async fn run_targets(
    engine: Arc<SyncEngine>,
    targets: &[SyncTarget],
    max_concurrency: usize,
    now: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
) -> Vec<SyncReport> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    info!(
        "syncing {} pair(s) via {}, {} at a time",
        targets.len(),
        engine.exchange_name(),
        max_concurrency.max(1)
    );

    let handles: Vec<_> = targets
        .iter()
        .cloned()
        .map(|target| {
            let engine = engine.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                // Held until the pair finishes; the semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let now = now.unwrap_or_else(Utc::now);
                engine
                    .sync_interval_at(&target.symbol, target.interval, now, &cancel)
                    .await
            })
        })
        .collect();

    let mut reports = Vec::with_capacity(targets.len());
    for (target, handle) in targets.iter().zip(handles) {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => {
                warn!("{} {}: sync task failed: {e}", target.symbol, target.interval);
                let mut report = SyncReport::new(&target.symbol, target.interval);
                report.error = Some(SyncError::TaskFailed {
                    symbol: target.symbol.clone(),
                    interval: target.interval,
                    reason: e.to_string(),
                });
                reports.push(report);
            }
        }
    }

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    let inserted: usize = reports.iter().map(|r| r.inserted).sum();
    info!(
        "sync round done: {} pair(s), {inserted} candle(s) inserted, {failed} failed",
        reports.len()
    );
    reports
}

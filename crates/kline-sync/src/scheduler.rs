use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kline_core::calendar;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::SyncTarget;
use crate::engine::{SyncEngine, SyncReport};
use crate::orchestrator::sync_all;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One round, then return.
    Once,
    /// A round every day at 00:00:00 UTC until cancelled.
    Daemon,
}

/// Time left until the next 00:00:00 UTC.
pub fn until_next_run(now: DateTime<Utc>) -> Duration {
    (calendar::next_midnight(now) - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

pub struct Scheduler {
    engine: Arc<SyncEngine>,
    targets: Vec<SyncTarget>,
    max_concurrency: usize,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, targets: Vec<SyncTarget>, max_concurrency: usize) -> Self {
        Self {
            engine,
            targets,
            max_concurrency,
        }
    }

    pub async fn run_round(&self, cancel: &CancellationToken) -> Vec<SyncReport> {
        sync_all(self.engine.clone(), &self.targets, self.max_concurrency, cancel).await
    }

    /// Run sync rounds per `mode`, handing each round's reports to
    /// `after_round`. In daemon mode `run_now` starts with an immediate round
    /// instead of waiting for midnight.
    pub async fn run<F>(&self, mode: RunMode, run_now: bool, cancel: &CancellationToken, mut after_round: F)
    where
        F: FnMut(&[SyncReport]),
    {
        if mode == RunMode::Once {
            let reports = self.run_round(cancel).await;
            after_round(&reports);
            return;
        }

        let mut immediate = run_now;
        loop {
            if !immediate {
                let now = Utc::now();
                let wait = until_next_run(now);
                info!("next sync at {}", calendar::next_midnight(now).to_rfc3339());
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            immediate = false;

            if cancel.is_cancelled() {
                break;
            }
            let reports = self.run_round(cancel).await;
            after_round(&reports);
        }
        info!("scheduler stopped");
    }
}

//! Background dispatch loop

use crate::application::engine::DialerEngine;
use crate::application::error::DialerError;
use crate::domain::shared::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Tally of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub launched: usize,
    pub conflicts: usize,
    pub rejected: usize,
    pub errors: usize,
}

pub struct Dispatcher {
    engine: Arc<DialerEngine>,
    interval: Duration,
    batch_size: usize,
}

impl Dispatcher {
    pub fn new(engine: Arc<DialerEngine>, interval: Duration, batch_size: usize) -> Self {
        Self {
            engine,
            interval,
            batch_size,
        }
    }

    /// Run until `shutdown` flips to `true`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Dispatcher started (interval {:?}, batch size {})",
            self.interval, self.batch_size
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(report) if report != DispatchReport::default() => {
                            info!("Dispatch pass: {:?}", report);
                        }
                        Ok(_) => {}
                        Err(e) => error!("Dispatch pass failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Dispatcher stopped");
    }

    /// One pass over every active campaign
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();

        for campaign in self.engine.active_campaigns().await? {
            let entries = match self
                .engine
                .dequeue_batch(campaign.id, now, self.batch_size)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    error!("Failed to dequeue for campaign {}: {}", campaign.id, e);
                    report.errors += 1;
                    continue;
                }
            };
            if entries.is_empty() {
                continue;
            }
            debug!("Launching {} calls for campaign {}", entries.len(), campaign.id);

            let results = join_all(entries.iter().map(|entry| self.engine.launch(entry))).await;
            for (entry, result) in entries.iter().zip(results) {
                match result {
                    Ok(_) => report.launched += 1,
                    Err(DialerError::DispatchConflict(_)) => report.conflicts += 1,
                    Err(DialerError::ProviderRejected(reason)) => {
                        warn!("Lead {} rejected by provider: {}", entry.lead_id, reason);
                        report.rejected += 1;
                    }
                    Err(e) => {
                        error!("Failed to launch lead {}: {}", entry.lead_id, e);
                        report.errors += 1;
                    }
                }
            }
        }

        Ok(report)
    }
}

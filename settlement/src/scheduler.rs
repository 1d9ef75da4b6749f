//! Periodic settlement summary pass
//!
//! Netting runs over persisted transactions only, so the scheduler is a
//! plain interval loop: every tick it computes and logs the net position
//! of each configured corridor. On-demand summaries through
//! [`SettlementEngine`](crate::SettlementEngine) remain the primary
//! interface; the pass exists so drifting corridors surface in the logs
//! without an operator asking.

use crate::{config::Corridor, SettlementEngine};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Interval-driven corridor summary pass
pub struct SummaryScheduler {
    engine: Arc<SettlementEngine>,
    corridors: Vec<Corridor>,
    period: Duration,
    shutdown: watch::Sender<bool>,
}

impl SummaryScheduler {
    /// Create a scheduler over the shared engine
    pub fn new(engine: Arc<SettlementEngine>, corridors: Vec<Corridor>, period_secs: u64) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            engine,
            corridors,
            period: Duration::from_secs(period_secs),
            shutdown,
        }
    }

    /// Spawn the summary loop; returns the task handle
    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.engine.clone();
        let corridors = self.corridors.clone();
        let period = self.period;
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh start
            // does not double-log with the on-demand path
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for corridor in &corridors {
                            match engine.summary(corridor.from, corridor.to) {
                                Ok(summary) => {
                                    if summary.settlement_needed() {
                                        tracing::info!(
                                            from = %corridor.from,
                                            to = %corridor.to,
                                            net = %summary.net_amount,
                                            currency = %summary.reference_currency,
                                            "Corridor awaiting settlement"
                                        );
                                    }
                                }
                                Err(err) => {
                                    tracing::error!(%err, "Scheduled summary pass failed");
                                }
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Summary scheduler stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Signal the loop to stop
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

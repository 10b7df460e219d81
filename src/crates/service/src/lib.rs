//! Per-service check-and-decide loop for anycastd
//!
//! Each configured service owns one [`Service`] running on its own task: it
//! probes its checkers sequentially, folds the outcomes through a
//! [`Strategy`], publishes the verdict to the shared [`LivenessRegistry`] and
//! drives the shared announcement state through edge-triggered
//! announce/denounce calls.
//!
//! The node's prefix set is advertised as a single unit: one service being
//! down withdraws everything, and nothing is announced until every service
//! has completed its first tick. The advertised state is therefore shared by
//! all services, and a runner only touches the speaker when its tick observes
//! an edge. A failed announce or denounce leaves the state unchanged so the
//! next tick retries naturally.

pub mod liveness;
pub mod metrics;
pub mod shutdown;
pub mod strategy;

pub use liveness::LivenessRegistry;
pub use metrics::{measure_call, Metrics, PrometheusMetrics};
pub use shutdown::ShutdownToken;
pub use strategy::{CheckOutcome, Strategy};

use std::cmp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use announcer::Announcer;
use checkers::Checker;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),

    #[error("invalid strategy parameters: {0}")]
    InvalidStrategyParams(String),

    #[error("strategy evaluation failed: {0}")]
    StrategyEvaluation(String),
}

/// A checker plus the group tag it reports under.
pub struct Check {
    checker: Box<dyn Checker>,
    group: String,
}

impl Check {
    pub fn new(checker: Box<dyn Checker>) -> Self {
        Self::grouped(checker, "")
    }

    pub fn grouped(checker: Box<dyn Checker>, group: impl Into<String>) -> Self {
        Self {
            checker,
            group: group.into(),
        }
    }
}

/// One service's periodic loop.
pub struct Service {
    name: String,
    announcer: Arc<dyn Announcer>,
    checks: Vec<Check>,
    interval: Duration,
    strategy: Strategy,
    metrics: Arc<dyn Metrics>,
    liveness: Arc<LivenessRegistry>,
    announced: Arc<AtomicBool>,
}

impl Service {
    /// Creates the runner and registers the service with the liveness
    /// registry. `announced` is the node-wide advertised state, shared by
    /// every service feeding the same announcer.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        announcer: Arc<dyn Announcer>,
        checks: Vec<Check>,
        interval: Duration,
        strategy: Strategy,
        metrics: Arc<dyn Metrics>,
        liveness: Arc<LivenessRegistry>,
        announced: Arc<AtomicBool>,
    ) -> Self {
        let name = name.into();
        liveness.register(&name);
        Self {
            name,
            announcer,
            checks,
            interval,
            strategy,
            metrics,
            liveness,
            announced,
        }
    }

    /// Runs the loop until shutdown is requested. Returns `Ok(())` on clean
    /// shutdown; only a strategy evaluation failure aborts the loop with an
    /// error.
    pub async fn run(mut self, shutdown: ShutdownToken) -> Result<()> {
        let mut deadline = Instant::now() + self.interval;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(service = %self.name, "shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }

            self.tick().await?;

            // A tick that overran its interval triggers exactly one
            // immediate follow-up, never a burst.
            deadline = cmp::max(deadline + self.interval, Instant::now());
        }
    }

    async fn tick(&mut self) -> Result<()> {
        let mut outcomes = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            let kind = check.checker.kind();
            let result = measure_call(self.metrics.as_ref(), &self.name, kind, || {
                check.checker.check()
            })
            .await;

            let ok = match result {
                Ok(()) => true,
                Err(err) => {
                    warn!(service = %self.name, check = kind, error = %err, "check failed");
                    false
                }
            };
            outcomes.push(CheckOutcome {
                kind: kind.to_string(),
                group: check.group.clone(),
                ok,
            });

            if !ok && self.strategy.short_circuits() {
                break;
            }
        }

        let service_down = self.strategy.evaluate(&outcomes)?;

        if service_down {
            self.metrics.service_down(&self.name);
        } else {
            self.metrics.service_up(&self.name);
        }

        self.liveness.save(&self.name, !service_down);

        let any_down = self.liveness.any_down();
        let announced = self.announced.load(Ordering::SeqCst);

        if any_down && announced {
            match self.announcer.denounce().await {
                Ok(()) => {
                    self.announced.store(false, Ordering::SeqCst);
                    info!(service = %self.name, "prefixes withdrawn");
                }
                Err(err) => {
                    warn!(service = %self.name, error = %err, "denounce failed, retrying next tick");
                }
            }
        } else if !any_down && !announced && self.liveness.all_initialized() {
            match self.announcer.announce().await {
                Ok(()) => {
                    self.announced.store(true, Ordering::SeqCst);
                    info!(service = %self.name, "prefixes announced");
                }
                Err(err) => {
                    warn!(service = %self.name, error = %err, "announce failed, retrying next tick");
                }
            }
        }

        Ok(())
    }
}

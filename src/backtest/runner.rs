//! Parallel replay runner.
//!
//! Selections are the expensive part of a replay. The runner first plans which
//! days would be attempted if every selection succeeded, solves those requests
//! concurrently, then replays the state machine in order against the cache.
//! Days the plan missed (because a real selection failed) are solved inline,
//! so results always match a sequential replay.

use crate::backtest::data::TradingDay;
use crate::backtest::engine::{RebalanceEngine, RunResult};
use crate::strategy::{Portfolio, SelectionError, SelectionRequest};
use crate::solver::SolveStatus;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

type Presolved = HashMap<usize, (SelectionRequest, Result<Portfolio, SelectionError>)>;

/// Runs a [`RebalanceEngine`] with concurrent selection.
#[derive(Debug, Clone)]
pub struct ReplayRunner {
    engine: RebalanceEngine,
    parallelism: usize,
    timeout: Option<Duration>,
}

impl ReplayRunner {
    /// Create a new runner. A parallelism of 1 replays sequentially.
    pub fn new(engine: RebalanceEngine, parallelism: usize) -> Self {
        Self {
            engine,
            parallelism: parallelism.max(1),
            timeout: None,
        }
    }

    /// Limit each pre-solved selection to `timeout` of wall-clock time.
    ///
    /// A selection exceeding it counts as infeasible for that day. The
    /// abandoned solve still holds its concurrency slot until it returns.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Replay all days.
    pub async fn run(&self, days: &[TradingDay]) -> Result<RunResult> {
        if self.parallelism == 1 && self.timeout.is_none() {
            let engine = self.engine.clone();
            let days = days.to_vec();
            return tokio::task::spawn_blocking(move || engine.run(&days))
                .await
                .context("Sequential replay task failed");
        }

        let planned = self.plan(days);
        info!(
            days = days.len(),
            planned = planned.len(),
            parallelism = self.parallelism,
            "Pre-solving planned selections"
        );

        let mut cache = self.presolve(planned).await?;

        let engine = self.engine.clone();
        let days = days.to_vec();
        let result = tokio::task::spawn_blocking(move || {
            let mut misses = 0usize;
            let result = engine.run_with(&days, |index, request| match cache.remove(&index) {
                Some((planned, outcome)) if planned == *request => outcome,
                _ => {
                    misses += 1;
                    debug!(day = %request.label, "Selection not pre-solved, solving inline");
                    engine.selector().select(request)
                }
            });
            if misses > 0 {
                info!(misses, "Replay solved unplanned selections inline");
            }
            result
        })
        .await
        .context("Replay task failed")?;

        Ok(result)
    }

    /// Requests the replay would attempt if every selection succeeded.
    ///
    /// Requests rejected by the candidate pre-check fail identically in the
    /// real replay and are left out.
    pub fn plan(&self, days: &[TradingDay]) -> Vec<(usize, SelectionRequest)> {
        let mut planned = Vec::new();
        self.engine.run_with(days, |index, request| {
            request.validate()?;
            planned.push((index, request.clone()));
            Ok(Portfolio::default())
        });
        planned
    }

    async fn presolve(&self, planned: Vec<(usize, SelectionRequest)>) -> Result<Presolved> {
        let total = planned.len();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles = Vec::with_capacity(total);

        for (i, (index, request)) in planned.into_iter().enumerate() {
            let sem = semaphore.clone();
            let selector = self.engine.selector().clone();
            let timeout = self.timeout;

            let handle = tokio::spawn(async move {
                let permit = sem
                    .acquire_owned()
                    .await
                    .context("Selection semaphore closed")?;

                debug!("[{}/{}] Solving {}", i + 1, total, request.label);

                // The permit lives as long as the solve itself, which keeps
                // running after a timeout.
                let task_request = request.clone();
                let solve = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    selector.select(&task_request)
                });

                let outcome = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, solve).await {
                        Ok(joined) => joined.context("Selection task panicked")?,
                        Err(_) => {
                            warn!(day = %request.label, ?limit, "Selection timed out");
                            Err(SelectionError::SolverNonOptimal(SolveStatus::TimedOut))
                        }
                    },
                    None => solve.await.context("Selection task panicked")?,
                };

                Ok::<_, anyhow::Error>((index, request, outcome))
            });

            handles.push(handle);
        }

        let mut cache = HashMap::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(Ok((index, request, outcome))) => {
                    cache.insert(index, (request, outcome));
                }
                Ok(Err(e)) => warn!("Pre-solve failed, day will be solved inline: {}", e),
                Err(e) => warn!("Pre-solve task panicked: {}", e),
            }
        }

        Ok(cache)
    }
}

//! Matrix-driven simulator fan-out with progress and cooperative cancellation.
//!
//! [`monte_carlo_matrix`] issues one simulator call per matrix column. All
//! calls of one matrix are in flight together and are polled on the calling
//! task; nothing is spawned. [`StateReports`] is the shared context object
//! carrying progress and the cancellation flag.

use std::future::Future;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::domain::{
    rebuild, CostDriver, Outcome, RunRecord, RunResult, SampledAbstractDriver, SampledCostDriver,
    SimulationError,
};
use crate::sampling::SampleMatrix;

/// Lower bound of the progress step of a single settled iteration.
const MIN_PROGRESS_STEP: f64 = 0.001;

// ---------------------------------------------------------------------------
// StateReports
// ---------------------------------------------------------------------------

/// Lifecycle phase of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Finished,
    Aborted,
    Errored,
}

/// Observable state of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    /// Overall progress in percent, `0..=100`.
    pub progress: f64,
    /// Set when any simulator call failed, even if the analysis went on.
    pub errored: bool,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            progress: 0.0,
            errored: false,
        }
    }
}

/// Progress and cancellation context shared by every orchestration call.
///
/// Backed by a `watch` channel so observers can follow progress. All methods
/// take `&self`; share it by reference or `Arc`.
#[derive(Debug)]
pub struct StateReports {
    tx: watch::Sender<ProgressSnapshot>,
}

impl Default for StateReports {
    fn default() -> Self {
        Self::new()
    }
}

impl StateReports {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self { tx }
    }

    /// Enter `Running` at 1%.
    pub fn start(&self) {
        self.tx.send_modify(|s| {
            s.phase = Phase::Running;
            s.progress = 1.0;
            s.errored = false;
        });
    }

    /// Advance progress by `delta` percent while running. Never exceeds 100.
    pub fn advance(&self, delta: f64) {
        self.tx.send_modify(|s| {
            if s.phase == Phase::Running {
                s.progress = (s.progress + delta).min(100.0);
            }
        });
    }

    pub fn progress(&self) -> f64 {
        self.tx.borrow().progress
    }

    /// Request cancellation. Running work stops issuing new iterations.
    /// Ignored once the analysis has finished or failed.
    pub fn cancel(&self) {
        self.tx.send_modify(|s| {
            if matches!(s.phase, Phase::Idle | Phase::Running) {
                s.phase = Phase::Aborted;
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().phase == Phase::Aborted
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only ends on cancel.
        let _ = rx.wait_for(|s| s.phase == Phase::Aborted).await;
    }

    pub fn finish(&self) {
        self.tx.send_modify(|s| {
            s.phase = Phase::Finished;
            s.progress = 100.0;
        });
    }

    pub fn fail(&self) {
        self.tx.send_modify(|s| {
            s.phase = Phase::Errored;
            s.errored = true;
        });
    }

    /// Flag a failed simulator call without leaving the current phase.
    pub fn mark_errored(&self) {
        self.tx.send_modify(|s| s.errored = true);
    }

    pub fn phase(&self) -> Phase {
        self.tx.borrow().phase
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Result of one simulator call. `Ok(None)` means "nothing to record".
pub type SimulationResult = Result<Option<RunResult>, SimulationError>;

/// One external simulation run for a given driver snapshot.
///
/// `iteration` is 1-based within the current matrix. Any
/// `Fn(Vec<SampledAbstractDriver>, usize) -> impl Future<Output = SimulationResult>`
/// closure is a simulator.
#[async_trait]
pub trait Simulator: Send + Sync {
    async fn simulate(&self, drivers: Vec<SampledAbstractDriver>, iteration: usize) -> SimulationResult;
}

#[async_trait]
impl<F, Fut> Simulator for F
where
    F: Fn(Vec<SampledAbstractDriver>, usize) -> Fut + Send + Sync,
    Fut: Future<Output = SimulationResult> + Send,
{
    async fn simulate(&self, drivers: Vec<SampledAbstractDriver>, iteration: usize) -> SimulationResult {
        (self)(drivers, iteration).await
    }
}

// ---------------------------------------------------------------------------
// monte_carlo_matrix
// ---------------------------------------------------------------------------

/// Run `simulator` once per column of `matrix`.
///
/// `progress_repeats` is the number of matrices the enclosing analysis runs,
/// so progress stays monotonic across phases.
///
/// Failed calls become error records; `Ok(None)` results are dropped.
/// Records come back ordered by `sample_index`. When cancellation is seen
/// before issuing a column, no further columns are issued, the ones already
/// in flight are allowed to settle and `Outcome::Aborted` is returned.
pub async fn monte_carlo_matrix(
    matrix: &SampleMatrix,
    drivers: &[CostDriver],
    simulator: &dyn Simulator,
    reports: &StateReports,
    progress_repeats: f64,
) -> Outcome<Vec<RunRecord>> {
    let iterations = matrix.iterations();
    let step = progress_step(progress_repeats, iterations);

    let mut in_flight = FuturesUnordered::new();
    let mut records = Vec::with_capacity(iterations);
    let mut aborted = false;

    for i in 0..iterations {
        if reports.is_cancelled() {
            aborted = true;
            break;
        }

        let snapshot = column_snapshot(matrix, drivers, i);
        in_flight.push(async move { (i, simulator.simulate(snapshot, i + 1).await) });

        // Let issued calls make progress; cancellation raised by one of them
        // is seen before the next column.
        while let Some(Some((index, result))) = in_flight.next().now_or_never() {
            settle(index, result, reports, step, &mut records);
        }
    }

    while let Some((index, result)) = in_flight.next().await {
        settle(index, result, reports, step, &mut records);
    }

    if aborted {
        debug!(settled = records.len(), iterations, "matrix aborted");
        return Outcome::Aborted;
    }

    records.sort_by_key(|r| r.sample_index);
    Outcome::Completed(records)
}

fn progress_step(progress_repeats: f64, iterations: usize) -> f64 {
    let denominator = progress_repeats * iterations as f64;
    if denominator > 0.0 {
        (100.0 / denominator).max(MIN_PROGRESS_STEP)
    } else {
        MIN_PROGRESS_STEP
    }
}

/// Immutable per-iteration driver snapshot in abstract shape.
fn column_snapshot(matrix: &SampleMatrix, drivers: &[CostDriver], i: usize) -> Vec<SampledAbstractDriver> {
    let sampled: Vec<SampledCostDriver> = drivers
        .iter()
        .enumerate()
        .map(|(d, driver)| {
            let cost = matrix.value(d, i).unwrap_or(driver.mean);
            SampledCostDriver::from_driver(driver, cost)
        })
        .collect();
    rebuild(&sampled)
}

fn settle(
    index: usize,
    result: SimulationResult,
    reports: &StateReports,
    step: f64,
    records: &mut Vec<RunRecord>,
) {
    reports.advance(step);
    match result {
        Ok(Some(run)) => records.push(RunRecord::succeeded(index, run)),
        Ok(None) => {}
        Err(err) => {
            if err != SimulationError::Cancelled {
                warn!(sample_index = index, error = %err, "simulator call failed");
                reports.mark_errored();
            }
            records.push(RunRecord::failed(index, &err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Distribution;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn drivers() -> Vec<CostDriver> {
        vec![
            CostDriver::new("a", "A", "energy", Distribution::Deterministic { mean: 1.0 }),
            CostDriver::new("b", "B", "waste", Distribution::Deterministic { mean: 2.0 }),
        ]
    }

    fn matrix(iterations: usize) -> SampleMatrix {
        let rows = vec![
            (0..iterations).map(|i| i as f64).collect(),
            vec![2.0; iterations],
        ];
        SampleMatrix::from_rows(rows, iterations)
    }

    fn ok_run(iteration: usize) -> SimulationResult {
        Ok(Some(RunResult::new(format!("req{iteration}"), vec!["x_statistic.xml".into()])))
    }

    #[test]
    fn state_reports_walk_the_lifecycle() {
        let reports = StateReports::new();
        assert_eq!(reports.phase(), Phase::Idle);
        reports.start();
        assert_eq!(reports.progress(), 1.0);
        reports.advance(50.0);
        reports.advance(80.0);
        assert_eq!(reports.progress(), 100.0);
        reports.finish();
        reports.cancel();
        assert_eq!(reports.phase(), Phase::Finished);
    }

    #[test]
    fn fail_sets_errored() {
        let reports = StateReports::new();
        reports.start();
        reports.fail();
        let snap = reports.snapshot();
        assert_eq!(snap.phase, Phase::Errored);
        assert!(snap.errored);
    }

    #[test]
    fn progress_step_has_a_floor() {
        assert_eq!(progress_step(1.0, 10), 10.0);
        assert_eq!(progress_step(1000.0, 1_000_000), MIN_PROGRESS_STEP);
        assert_eq!(progress_step(1.0, 0), MIN_PROGRESS_STEP);
    }

    #[tokio::test]
    async fn runs_every_column_and_orders_by_index() {
        let reports = StateReports::new();
        reports.start();
        let sim = |_drivers: Vec<SampledAbstractDriver>, it: usize| async move {
            // Later iterations finish first.
            tokio::time::sleep(std::time::Duration::from_millis((20 - it as u64) * 2)).await;
            ok_run(it)
        };

        let outcome = monte_carlo_matrix(&matrix(10), &drivers(), &sim, &reports, 1.0).await;
        let Outcome::Completed(records) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(records.len(), 10);
        let indices: Vec<usize> = records.iter().map(|r| r.sample_index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
        assert_eq!(records[3].request_id.as_deref(), Some("req4"));
        assert!((reports.progress() - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn snapshot_carries_column_values_in_abstract_shape() {
        let reports = StateReports::new();
        reports.start();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let sim = move |drivers: Vec<SampledAbstractDriver>, it: usize| {
            seen_in.lock().unwrap().push((it, drivers));
            async move { ok_run(it) }
        };

        monte_carlo_matrix(&matrix(3), &drivers(), &sim, &reports, 1.0).await;

        let seen = seen.lock().unwrap();
        let (it, snapshot) = &seen[2];
        assert_eq!(*it, 3);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "energy");
        assert_eq!(snapshot[0].concrete_cost_drivers[0].cost, 2.0);
        assert_eq!(snapshot[1].concrete_cost_drivers[0].cost, 2.0);
    }

    #[tokio::test]
    async fn errors_are_wrapped_and_none_is_dropped() {
        let reports = StateReports::new();
        reports.start();
        let sim = |_d: Vec<SampledAbstractDriver>, it: usize| async move {
            match it {
                2 => Err(SimulationError::Failed("bad model".into())),
                3 => Ok(None),
                _ => ok_run(it),
            }
        };

        let Outcome::Completed(records) =
            monte_carlo_matrix(&matrix(4), &drivers(), &sim, &reports, 1.0).await
        else {
            panic!("expected completion");
        };
        assert_eq!(records.len(), 3);
        assert!(records[1].is_error());
        assert_eq!(records[1].sample_index, 1);
        assert!(reports.snapshot().errored);
    }

    #[tokio::test]
    async fn cancellation_stops_issuing_and_lets_in_flight_settle() {
        let reports = Arc::new(StateReports::new());
        reports.start();
        let issued = Arc::new(AtomicUsize::new(0));
        let settled = Arc::new(AtomicUsize::new(0));

        let (r, i, s) = (Arc::clone(&reports), Arc::clone(&issued), Arc::clone(&settled));
        let sim = move |_d: Vec<SampledAbstractDriver>, it: usize| {
            i.fetch_add(1, Ordering::SeqCst);
            if it == 5 {
                r.cancel();
            }
            let s = Arc::clone(&s);
            async move {
                tokio::task::yield_now().await;
                s.fetch_add(1, Ordering::SeqCst);
                ok_run(it)
            }
        };

        let outcome = monte_carlo_matrix(&matrix(100), &drivers(), &sim, &reports, 1.0).await;
        assert!(outcome.is_aborted());
        assert_eq!(issued.load(Ordering::SeqCst), 5);
        assert_eq!(settled.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn already_cancelled_issues_nothing() {
        let reports = StateReports::new();
        reports.start();
        reports.cancel();
        let calls = AtomicUsize::new(0);
        let sim = |_d: Vec<SampledAbstractDriver>, it: usize| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { ok_run(it) }
        };
        let outcome = monte_carlo_matrix(&matrix(3), &drivers(), &sim, &reports, 1.0).await;
        assert!(outcome.is_aborted());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let reports = Arc::new(StateReports::new());
        reports.start();
        let waiter = {
            let reports = Arc::clone(&reports);
            tokio::spawn(async move { reports.cancelled().await })
        };
        reports.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}

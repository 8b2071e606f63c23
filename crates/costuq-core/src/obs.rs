//! Structured observability hooks for analysis lifecycle events.
//!
//! This module provides:
//! - Analysis-scoped tracing spans via [`analysis_span`], attached to the
//!   analysis future with `tracing::Instrument` so it stays `Send`
//! - Emission functions for lifecycle events: start, batch, chunk, finish, abort
//!
//! Events are emitted at `info!` level, except per-chunk events at `debug!`.

use tracing::{debug, info};

use crate::domain::ToolName;

/// Span tagging every event of one analysis with its project and tool.
///
/// ```ignore
/// run(request).instrument(analysis_span("shop", ToolName::MonteCarlo)).await
/// // every event inside carries project = "shop", tool = "monte carlo"
/// ```
pub fn analysis_span(project: &str, tool: ToolName) -> tracing::Span {
    tracing::info_span!("costuq.analysis", project = %project, tool = %tool)
}

/// Emit event: analysis started.
pub fn emit_analysis_started(project: &str, tool: ToolName, iterations: usize, drivers: usize) {
    info!(
        event = "analysis.started",
        project = %project,
        tool = %tool,
        iterations = iterations,
        drivers = drivers,
    );
}

/// Emit event: one sample matrix fully settled.
pub fn emit_batch_finished(phase: &str, runs: usize, errors: usize) {
    info!(event = "analysis.batch_finished", phase = %phase, runs = runs, errors = errors);
}

/// Emit event: a chunk was persisted.
pub fn emit_chunk_saved(project: &str, key: &str, runs: usize) {
    debug!(event = "analysis.chunk_saved", project = %project, key = %key, runs = runs);
}

/// Emit event: analysis finished and its session was saved.
pub fn emit_analysis_finished(project: &str, tool: ToolName, duration_ms: u64) {
    info!(
        event = "analysis.finished",
        project = %project,
        tool = %tool,
        duration_ms = duration_ms,
    );
}

/// Emit event: analysis aborted before completion.
pub fn emit_analysis_aborted(project: &str, tool: ToolName) {
    info!(event = "analysis.aborted", project = %project, tool = %tool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_span_enters_without_subscriber() {
        let _entered = analysis_span("p", ToolName::SobolGsa).entered();
        emit_analysis_started("p", ToolName::SobolGsa, 10, 2);
        emit_analysis_aborted("p", ToolName::SobolGsa);
    }
}

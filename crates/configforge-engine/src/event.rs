//! Diagnostics sinks for solve monitoring.
//!
//! A sink receives the statistics of every solve together with its
//! outcome: execution time, constraint evaluations and violations, choice
//! points created and backtracked, and the instances a re-solve touched.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use configforge_engine::event::{CountingDiagnosticsSink, DiagnosticsSupport};
//!
//! let counter = Arc::new(CountingDiagnosticsSink::new());
//! let mut support = DiagnosticsSupport::new();
//! support.add_sink(counter.clone());
//! assert_eq!(support.sink_count(), 1);
//! assert_eq!(counter.solve_count(), 0);
//! ```

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use configforge_core::Diagnostic;
use tracing::{debug, info};

use crate::outcome::Outcome;
use crate::statistics::SolveStatistics;

/// Receiver of per-solve diagnostics.
pub trait DiagnosticsSink: Send + Sync + Debug {
    /// Called when a solve ends, whatever the outcome.
    fn on_solve_end(&self, stats: &SolveStatistics, outcome: &Outcome);

    /// Called when a solve starts on a graph of `instances` instances.
    fn on_solve_start(&self, _instances: usize) {}

    /// Called with the messages rules produced for a consistent state.
    fn on_messages(&self, _messages: &[Diagnostic]) {}
}

/// Fans diagnostics out to the registered sinks in registration order.
#[derive(Default, Clone)]
pub struct DiagnosticsSupport {
    sinks: Vec<Arc<dyn DiagnosticsSink>>,
}

impl DiagnosticsSupport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Arc<dyn DiagnosticsSink>) {
        self.sinks.push(sink);
    }

    pub fn clear_sinks(&mut self) {
        self.sinks.clear();
    }

    pub fn fire_solve_start(&self, instances: usize) {
        for sink in &self.sinks {
            sink.on_solve_start(instances);
        }
    }

    pub fn fire_solve_end(&self, stats: &SolveStatistics, outcome: &Outcome) {
        for sink in &self.sinks {
            sink.on_solve_end(stats, outcome);
        }
    }

    pub fn fire_messages(&self, messages: &[Diagnostic]) {
        if messages.is_empty() {
            return;
        }
        for sink in &self.sinks {
            sink.on_messages(messages);
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn has_sinks(&self) -> bool {
        !self.sinks.is_empty()
    }
}

impl Debug for DiagnosticsSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsSupport")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Logs every solve through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LoggingDiagnosticsSink {
    /// Label added to every event, e.g. the session id.
    label: String,
}

impl LoggingDiagnosticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl DiagnosticsSink for LoggingDiagnosticsSink {
    fn on_solve_start(&self, instances: usize) {
        debug!(event = "diagnostics_solve_start", label = %self.label, instances);
    }

    fn on_solve_end(&self, stats: &SolveStatistics, outcome: &Outcome) {
        info!(
            event = "diagnostics_solve_end",
            label = %self.label,
            outcome = outcome.label(),
            duration_ms = stats.duration.as_millis() as u64,
            evaluations = stats.constraint_evaluations,
            violations = stats.constraint_violations,
            choice_points = stats.choice_points,
            backtracks = stats.backtracks,
            touched = stats.touched_instances,
        );
    }

    fn on_messages(&self, messages: &[Diagnostic]) {
        for message in messages {
            info!(
                event = "rule_message",
                label = %self.label,
                severity = ?message.severity,
                source = %message.source,
                instance = %message.instance,
                message = %message.message,
            );
        }
    }
}

/// Counts solves and sums their statistics.
#[derive(Debug, Default)]
pub struct CountingDiagnosticsSink {
    solves: AtomicUsize,
    started: AtomicUsize,
    conflicts: AtomicUsize,
    messages: AtomicUsize,
    choice_points: AtomicU64,
    backtracks: AtomicU64,
}

impl CountingDiagnosticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of solves that ended.
    pub fn solve_count(&self) -> usize {
        self.solves.load(Ordering::SeqCst)
    }

    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }

    pub fn message_count(&self) -> usize {
        self.messages.load(Ordering::SeqCst)
    }

    /// Choice points summed over all solves.
    pub fn total_choice_points(&self) -> u64 {
        self.choice_points.load(Ordering::SeqCst)
    }

    pub fn total_backtracks(&self) -> u64 {
        self.backtracks.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.solves.store(0, Ordering::SeqCst);
        self.started.store(0, Ordering::SeqCst);
        self.conflicts.store(0, Ordering::SeqCst);
        self.messages.store(0, Ordering::SeqCst);
        self.choice_points.store(0, Ordering::SeqCst);
        self.backtracks.store(0, Ordering::SeqCst);
    }
}

impl DiagnosticsSink for CountingDiagnosticsSink {
    fn on_solve_start(&self, _instances: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_solve_end(&self, stats: &SolveStatistics, outcome: &Outcome) {
        self.solves.fetch_add(1, Ordering::SeqCst);
        if outcome.conflict().is_some() {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        self.choice_points
            .fetch_add(stats.choice_points, Ordering::SeqCst);
        self.backtracks.fetch_add(stats.backtracks, Ordering::SeqCst);
    }

    fn on_messages(&self, messages: &[Diagnostic]) {
        self.messages.fetch_add(messages.len(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Conflict, ConflictReason};
    use configforge_core::{ConstraintRef, InstanceId, Severity};

    fn stats(choice_points: u64, backtracks: u64) -> SolveStatistics {
        SolveStatistics {
            choice_points,
            backtracks,
            ..SolveStatistics::default()
        }
    }

    #[test]
    fn test_support_fans_out() {
        let counter = Arc::new(CountingDiagnosticsSink::new());
        let mut support = DiagnosticsSupport::new();
        support.add_sink(counter.clone());
        support.add_sink(Arc::new(LoggingDiagnosticsSink::with_label("s1")));
        assert_eq!(support.sink_count(), 2);

        support.fire_solve_start(3);
        support.fire_solve_end(&stats(4, 1), &Outcome::Solved);
        support.fire_solve_end(
            &stats(2, 2),
            &Outcome::Conflict(Conflict::new(ConflictReason::Constraint, "no")),
        );

        assert_eq!(counter.started_count(), 1);
        assert_eq!(counter.solve_count(), 2);
        assert_eq!(counter.conflict_count(), 1);
        assert_eq!(counter.total_choice_points(), 6);
        assert_eq!(counter.total_backtracks(), 3);
    }

    #[test]
    fn test_empty_messages_are_not_forwarded() {
        let counter = Arc::new(CountingDiagnosticsSink::new());
        let mut support = DiagnosticsSupport::new();
        support.add_sink(counter.clone());

        support.fire_messages(&[]);
        support.fire_messages(&[Diagnostic {
            severity: Severity::Warning,
            message: "4k displays shorten battery life".into(),
            source: ConstraintRef::new("Laptop", "FourKBattery"),
            instance: InstanceId::ROOT,
        }]);
        assert_eq!(counter.message_count(), 1);
    }

    #[test]
    fn test_counter_reset() {
        let counter = CountingDiagnosticsSink::new();
        counter.on_solve_end(&stats(1, 0), &Outcome::Timeout);
        counter.reset();
        assert_eq!(counter.solve_count(), 0);
        assert_eq!(counter.total_choice_points(), 0);
    }

    #[test]
    fn test_clear_sinks() {
        let mut support = DiagnosticsSupport::new();
        support.add_sink(Arc::new(CountingDiagnosticsSink::new()));
        support.clear_sinks();
        assert!(!support.has_sinks());
    }
}

//! Solve statistics collection and reporting.
//!
//! This module tracks the performance signals of one solve: constraint
//! evaluations and violations, choice points created and backtracked, the
//! instances touched by a re-solve, and wall-clock time.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use configforge_core::InstanceId;

/// Statistics for a completed solve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveStatistics {
    /// Total time spent solving.
    pub duration: Duration,
    /// Constraint and rule condition evaluations.
    pub constraint_evaluations: u64,
    /// Evaluations that found a constraint definitely violated.
    pub constraint_violations: u64,
    /// Choice points pushed on the search trail.
    pub choice_points: u64,
    /// Choice points popped while backtracking.
    pub backtracks: u64,
    /// Distinct instances whose cells were reset by the re-solve.
    pub touched_instances: u64,
}

impl SolveStatistics {
    /// Returns the share of evaluations that reported a violation.
    pub fn violation_rate(&self) -> f64 {
        if self.constraint_evaluations == 0 {
            0.0
        } else {
            self.constraint_violations as f64 / self.constraint_evaluations as f64
        }
    }

    /// Adds the counters of a later solve to these.
    pub fn accumulate(&mut self, other: &SolveStatistics) {
        self.duration += other.duration;
        self.constraint_evaluations += other.constraint_evaluations;
        self.constraint_violations += other.constraint_violations;
        self.choice_points += other.choice_points;
        self.backtracks += other.backtracks;
        self.touched_instances += other.touched_instances;
    }
}

/// Thread-safe collector for solve statistics.
///
/// Create one per solve; the start time is taken at construction and is
/// what time-based terminations measure against.
#[derive(Debug)]
pub struct StatisticsCollector {
    start_time: Instant,
    evaluations: AtomicU64,
    violations: AtomicU64,
    choice_points: AtomicU64,
    backtracks: AtomicU64,
    /// Distinct instances reset (protected by mutex for set updates).
    touched: Mutex<BTreeSet<InstanceId>>,
}

impl StatisticsCollector {
    /// Creates a new statistics collector.
    ///
    /// The start time is recorded when this is called.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            evaluations: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            choice_points: AtomicU64::new(0),
            backtracks: AtomicU64::new(0),
            touched: Mutex::new(BTreeSet::new()),
        }
    }

    /// Records one evaluation of a constraint or rule condition.
    pub fn record_evaluation(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a constraint found definitely false.
    pub fn record_violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_choice_point(&self) {
        self.choice_points.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backtrack(&self) {
        self.backtracks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records that a re-solve reset cells of `instance`.
    pub fn record_touched(&self, instance: InstanceId) {
        if let Ok(mut touched) = self.touched.lock() {
            touched.insert(instance);
        }
    }

    /// Returns the elapsed time since solving started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn current_evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn current_violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    pub fn current_choice_points(&self) -> u64 {
        self.choice_points.load(Ordering::Relaxed)
    }

    pub fn current_backtracks(&self) -> u64 {
        self.backtracks.load(Ordering::Relaxed)
    }

    pub fn current_touched(&self) -> u64 {
        self.touched.lock().map_or(0, |t| t.len() as u64)
    }

    /// Takes a snapshot of current statistics without consuming the collector.
    pub fn snapshot(&self) -> SolveStatistics {
        SolveStatistics {
            duration: self.start_time.elapsed(),
            constraint_evaluations: self.current_evaluations(),
            constraint_violations: self.current_violations(),
            choice_points: self.current_choice_points(),
            backtracks: self.current_backtracks(),
            touched_instances: self.current_touched(),
        }
    }
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

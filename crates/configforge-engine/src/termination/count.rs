//! Search-effort terminations.

use super::Termination;
use crate::statistics::StatisticsCollector;

/// Terminates once the search has backtracked `limit` times.
///
/// # Example
///
/// ```
/// use configforge_engine::termination::BacktrackCountTermination;
///
/// let term = BacktrackCountTermination::new(10_000);
/// ```
#[derive(Debug, Clone)]
pub struct BacktrackCountTermination {
    limit: u64,
}

impl BacktrackCountTermination {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl Termination for BacktrackCountTermination {
    fn is_terminated(&self, stats: &StatisticsCollector) -> bool {
        stats.current_backtracks() >= self.limit
    }
}

/// Terminates once `limit` choice points have been created.
#[derive(Debug, Clone)]
pub struct ChoicePointCountTermination {
    limit: u64,
}

impl ChoicePointCountTermination {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl Termination for ChoicePointCountTermination {
    fn is_terminated(&self, stats: &StatisticsCollector) -> bool {
        stats.current_choice_points() >= self.limit
    }
}

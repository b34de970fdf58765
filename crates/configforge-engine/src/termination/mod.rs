//! Termination conditions bounding one solve.

mod composite;
mod count;
mod external;
mod time;

use std::fmt::Debug;

use configforge_config::TerminationConfig;

use crate::statistics::StatisticsCollector;

pub use composite::OrTermination;
pub use count::{BacktrackCountTermination, ChoicePointCountTermination};
pub use external::ExternalTermination;
pub use time::TimeTermination;

/// Trait for determining when to stop searching.
///
/// Terminations read the solve's statistics; they never see the
/// configuration being searched.
pub trait Termination: Send + Debug {
    /// Returns true if the search should stop.
    fn is_terminated(&self, stats: &StatisticsCollector) -> bool;
}

impl<T: Termination + ?Sized> Termination for Box<T> {
    fn is_terminated(&self, stats: &StatisticsCollector) -> bool {
        (**self).is_terminated(stats)
    }
}

/// Never terminates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl Termination for Unbounded {
    fn is_terminated(&self, _stats: &StatisticsCollector) -> bool {
        false
    }
}

/// An optional condition; `None` never terminates.
impl<T: Termination> Termination for Option<T> {
    fn is_terminated(&self, stats: &StatisticsCollector) -> bool {
        self.as_ref().is_some_and(|t| t.is_terminated(stats))
    }
}

/// The budget ceiling of one solve.
pub type BudgetTermination = OrTermination<(
    Option<TimeTermination>,
    Option<BacktrackCountTermination>,
    Option<ChoicePointCountTermination>,
)>;

/// Builds the budget ceiling described by the configuration: any configured
/// limit ends the search.
pub fn from_config(config: &TerminationConfig) -> BudgetTermination {
    OrTermination((
        config.time_limit().map(TimeTermination::new),
        config.backtrack_limit.map(BacktrackCountTermination::new),
        config.choice_point_limit.map(ChoicePointCountTermination::new),
    ))
}

#[cfg(test)]
mod tests;

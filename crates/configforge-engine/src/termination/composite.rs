//! Composite termination conditions.
//!
//! Uses macro-generated tuple implementations for zero type erasure.

use super::Termination;
use crate::statistics::StatisticsCollector;

/// Combines multiple terminations with OR logic (any must terminate).
///
/// # Examples
///
/// ```
/// use configforge_engine::termination::{
///     BacktrackCountTermination, OrTermination, TimeTermination,
/// };
///
/// // Stop after 2 seconds OR 10 000 backtracks
/// let termination = OrTermination((
///     TimeTermination::seconds(2),
///     BacktrackCountTermination::new(10_000),
/// ));
/// ```
#[derive(Debug)]
pub struct OrTermination<T>(pub T);

impl<T> OrTermination<T> {
    /// Creates a new OR termination from a tuple of terminations.
    pub fn new(terminations: T) -> Self {
        Self(terminations)
    }
}

/// Generates `Termination` implementations for OR tuples.
macro_rules! impl_or_termination {
    ($($idx:tt: $T:ident),+) => {
        impl<$($T),+> Termination for OrTermination<($($T,)+)>
        where
            $($T: Termination,)+
        {
            fn is_terminated(&self, stats: &StatisticsCollector) -> bool {
                $((self.0).$idx.is_terminated(stats))||+
            }
        }
    };
}

impl_or_termination!(0: T0);
impl_or_termination!(0: T0, 1: T1);
impl_or_termination!(0: T0, 1: T1, 2: T2);
impl_or_termination!(0: T0, 1: T1, 2: T2, 3: T3);

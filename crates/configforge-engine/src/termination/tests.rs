//! Tests for termination conditions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use configforge_config::TerminationConfig;

use super::*;
use crate::statistics::StatisticsCollector;

#[test]
fn test_backtrack_count_termination() {
    let stats = StatisticsCollector::new();
    let term = BacktrackCountTermination::new(2);

    assert!(!term.is_terminated(&stats));
    stats.record_backtrack();
    assert!(!term.is_terminated(&stats));
    stats.record_backtrack();
    assert!(term.is_terminated(&stats));
}

#[test]
fn test_choice_point_count_termination() {
    let stats = StatisticsCollector::new();
    let term = ChoicePointCountTermination::new(1);

    assert!(!term.is_terminated(&stats));
    stats.record_choice_point();
    assert!(term.is_terminated(&stats));
}

#[test]
fn test_time_termination() {
    let stats = StatisticsCollector::new();
    assert!(TimeTermination::new(Duration::ZERO).is_terminated(&stats));
    assert!(!TimeTermination::seconds(3600).is_terminated(&stats));
}

#[test]
fn test_external_termination() {
    let stats = StatisticsCollector::new();
    let flag = Arc::new(AtomicBool::new(false));
    let term = ExternalTermination::new(flag.clone());

    assert!(!term.is_terminated(&stats));
    flag.store(true, Ordering::SeqCst);
    assert!(term.is_terminated(&stats));
}

#[test]
fn test_or_termination() {
    let stats = StatisticsCollector::new();
    let term = OrTermination((
        BacktrackCountTermination::new(1),
        ChoicePointCountTermination::new(5),
    ));

    assert!(!term.is_terminated(&stats));
    stats.record_backtrack();
    assert!(term.is_terminated(&stats));
}

#[test]
fn test_missing_condition_never_terminates() {
    let stats = StatisticsCollector::new();
    stats.record_backtrack();
    assert!(!None::<BacktrackCountTermination>.is_terminated(&stats));
    assert!(Some(BacktrackCountTermination::new(1)).is_terminated(&stats));
}

#[test]
fn test_from_config() {
    let stats = StatisticsCollector::new();
    assert!(!from_config(&TerminationConfig::default()).is_terminated(&stats));

    let config = TerminationConfig {
        backtrack_limit: Some(1),
        choice_point_limit: Some(100),
        ..TerminationConfig::default()
    };
    let term = from_config(&config);
    assert!(!term.is_terminated(&stats));
    stats.record_backtrack();
    assert!(term.is_terminated(&stats));

    let timed = from_config(&TerminationConfig {
        time_limit_ms: Some(0),
        ..TerminationConfig::default()
    });
    assert!(timed.is_terminated(&StatisticsCollector::new()));
}

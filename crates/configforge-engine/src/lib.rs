//! ConfigForge Engine
//!
//! This crate holds the solving machinery behind a configuration session:
//! - Instance graph and per-cell domain store
//! - Three-valued expression evaluation
//! - Constraint propagation to a fixpoint over a dependency graph
//! - Rule evaluation (visibility, enablement, require/exclude, messages)
//! - Chronological backtracking search with a choice point trail
//! - Termination budgets, statistics and diagnostics sinks
//! - The solve loop tying these together

pub mod deps;
pub mod eval;
pub mod event;
pub mod graph;
pub mod outcome;
pub mod propagate;
pub mod rules;
pub mod search;
pub mod solver;
pub mod state;
pub mod statistics;
pub mod store;
pub mod termination;

pub use deps::{Component, DependencyGraph, Edge, EdgeKind};
pub use eval::{Abstract, Evaluator, Truth};
pub use event::{
    CountingDiagnosticsSink, DiagnosticsSink, DiagnosticsSupport, LoggingDiagnosticsSink,
};
pub use graph::{Instance, InstanceGraph, Origin};
pub use outcome::{Conflict, ConflictReason, Outcome, Unmet};
pub use propagate::{Contradiction, PropagationResult, Propagator, Seeds};
pub use rules::{InstanceFlags, Requirement, RuleEvaluator, RuleReport};
pub use search::{Choice, ChoicePoint, Decision, SearchEngine, SearchOutcome};
pub use solver::{ResolveMode, SolveRequest, SolveResult, Solver};
pub use state::Configuration;
pub use statistics::{SolveStatistics, StatisticsCollector};
pub use store::{DomainStore, ExternalValues};
pub use termination::{
    BacktrackCountTermination, BudgetTermination, ChoicePointCountTermination, ExternalTermination,
    OrTermination, Termination, TimeTermination, Unbounded,
};

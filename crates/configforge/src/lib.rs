//! ConfigForge - A product configuration engine in Rust
//!
//! Declare a product model, open a session on it and edit: every edit is
//! propagated and searched, and the session only moves to states where the
//! model's constraints hold.
//!
//! # Example
//!
//! ```rust
//! use configforge::prelude::*;
//! use configforge_test::laptop_model;
//!
//! let manager = SessionManager::new(laptop_model(), EngineConfig::default());
//! let id = manager.open(&Context::new()).unwrap();
//! manager
//!     .select_relation_option(id, InstanceId::ROOT, "Memory", "Ram16GB", 1)
//!     .unwrap();
//! let result = manager.assign(id, InstanceId::ROOT, "Display", "4k").unwrap();
//! assert_eq!(result.outcome, Outcome::Solved);
//! ```

// Values, ids and errors
pub use configforge_core::{
    CellRef, ConfigForgeError, ConstraintRef, Diagnostic, Domain, InstanceId, Result, SchemaError,
    SchemaErrorKind, SessionId, Severity, Value,
};

// Model declarations and the loaded registry
pub use configforge_model::{
    ActionTarget, AggregateFn, Expr, Model, PrimitiveKind, RelationDef, RelationPattern,
    RuleAction, RuleDef, Schema, SplitMode, TypeDecl, TypeId, VariableDef,
};

pub use configforge_config::{BusyPolicy, ConfigError, EngineConfig};

// Solve results and diagnostics
pub use configforge_engine::{
    Conflict, ConflictReason, CountingDiagnosticsSink, DiagnosticsSink, LoggingDiagnosticsSink,
    Outcome, SolveStatistics, Unmet,
};

pub use configforge_session::{
    AssignResult, Context, GroupView, InstanceView, RelationOption, RelationView, Session,
    SessionEvent, SessionManager, VariableView, VisibleState,
};

/// The engine internals, for embedding the solver without sessions.
pub mod engine {
    pub use configforge_engine::*;
}

#[cfg(feature = "console")]
pub mod console;

pub mod prelude {
    pub use super::{
        AssignResult, Context, EngineConfig, InstanceId, Model, Outcome, RelationOption, Schema,
        Session, SessionManager, Value, VisibleState,
    };
    pub use super::{Expr, PrimitiveKind, RelationDef, RuleAction, RuleDef, TypeDecl, VariableDef};
}

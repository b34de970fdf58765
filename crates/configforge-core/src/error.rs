//! Error types for ConfigForge

use thiserror::Error;

use crate::ids::{InstanceId, SessionId};

/// Classification of a malformed model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaErrorKind {
    DuplicateType,
    DuplicateMember,
    UnknownType,
    InheritanceCycle,
    UnknownVariable,
    UnknownRelation,
    InvalidDomain,
    EmptyDomain,
    DomainTooLarge,
    TypeMismatch,
    InvalidCardinality,
    SourceCycle,
    RootNotVirtual,
    RuleConflict,
    RequireIntoClosedRelation,
    InvalidRuleTarget,
    /// The schema text could not be parsed.
    Malformed,
}

/// A model rejected at load. Loading is all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} at {location}: {detail}")]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    /// Dotted path of the offending declaration, e.g. `Laptop.Display`.
    pub location: String,
    pub detail: String,
}

impl SchemaError {
    pub fn new(
        kind: SchemaErrorKind,
        location: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            location: location.into(),
            detail: detail.into(),
        }
    }
}

/// Main error type for ConfigForge operations.
///
/// Solve outcomes (conflicts, timeouts) are not errors; they are reported
/// through the session's result types. These variants describe calls that
/// cannot be executed at all.
#[derive(Debug, Error)]
pub enum ConfigForgeError {
    /// The model failed validation.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Error in engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown instance {0}")]
    UnknownInstance(InstanceId),

    #[error("Type {type_name} has no variable {variable}")]
    UnknownVariable { type_name: String, variable: String },

    #[error("Type {type_name} has no relation {relation}")]
    UnknownRelation { type_name: String, relation: String },

    #[error("Unknown type {0}")]
    UnknownType(String),

    /// A value of the wrong kind was supplied for a variable.
    #[error("Variable {variable} expects {expected}, got {actual}")]
    TypeMismatch {
        variable: String,
        expected: String,
        actual: String,
    },

    /// The variable is computed by the engine and cannot be set.
    #[error("Variable {0} is not configurable")]
    NotConfigurable(String),

    /// Only instances added through a relation selection can be removed.
    #[error("Instance {0} cannot be removed")]
    NotRemovable(InstanceId),

    #[error("Quantity of {0} does not fit in a u32")]
    QuantityOverflow(InstanceId),

    /// Another operation is in flight on the session.
    #[error("{0} is busy")]
    SessionBusy(SessionId),

    #[error("Unknown {0}")]
    UnknownSession(SessionId),

    #[error("Session is closed")]
    SessionClosed,

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for ConfigForge operations
pub type Result<T> = std::result::Result<T, ConfigForgeError>;

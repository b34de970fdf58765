//! Constraint identification and diagnostic types.
//!
//! These types name constraints and rules across the engine, and carry the
//! non-blocking messages rules attach to a session.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::InstanceId;

/// Reference to a constraint or rule for identification.
///
/// # Example
///
/// ```
/// use configforge_core::ConstraintRef;
///
/// let cr = ConstraintRef::new("Laptop", "FourKNeedsMemory");
/// assert_eq!(cr.full_name(), "Laptop/FourKNeedsMemory");
///
/// let simple = ConstraintRef::new("", "Simple");
/// assert_eq!(simple.full_name(), "Simple");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConstraintRef {
    /// Name of the type declaring the constraint.
    pub owner: String,
    /// Name of the constraint.
    pub name: String,
}

impl ConstraintRef {
    /// Creates a new constraint reference.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Returns the fully qualified name.
    pub fn full_name(&self) -> String {
        if self.owner.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.owner, self.name)
        }
    }
}

impl fmt::Display for ConstraintRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// Severity of a message produced by a rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

/// A message attached to a session by a fired message rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// The rule that produced the message.
    pub source: ConstraintRef,
    /// The instance the rule fired on.
    pub instance: InstanceId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_ref_full_name() {
        let cr = ConstraintRef::new("Laptop", "TestConstraint");
        assert_eq!(cr.full_name(), "Laptop/TestConstraint");
        assert_eq!(cr.to_string(), "Laptop/TestConstraint");
    }

    #[test]
    fn test_constraint_ref_empty_owner() {
        let cr = ConstraintRef::new("", "Simple");
        assert_eq!(cr.full_name(), "Simple");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }
}

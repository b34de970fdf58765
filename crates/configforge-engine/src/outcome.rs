//! Results of a solve as seen by callers.

use std::fmt;
use std::sync::Arc;

use configforge_core::{CellRef, ConstraintRef, InstanceId};

use crate::propagate::Contradiction;

/// How a solve ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Every configurable variable resolved and every relation in bounds.
    Solved,
    /// Consistent, but user-driven relations are still below their minimum.
    Incomplete { unmet: Vec<Unmet> },
    /// The edit cannot be satisfied; the previous state stands.
    Conflict(Conflict),
    /// A time, backtrack or choice point budget ran out.
    Timeout,
    Cancelled,
}

impl Outcome {
    /// True for outcomes that commit a new state.
    pub fn is_consistent(&self) -> bool {
        matches!(self, Outcome::Solved | Outcome::Incomplete { .. })
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, Outcome::Solved)
    }

    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            Outcome::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }

    /// Short label used in log events.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Solved => "solved",
            Outcome::Incomplete { .. } => "incomplete",
            Outcome::Conflict(_) => "conflict",
            Outcome::Timeout => "timeout",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// A relation still below its minimum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unmet {
    pub instance: InstanceId,
    pub relation: Arc<str>,
    pub min: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictReason {
    /// A hard constraint cannot hold.
    Constraint,
    /// The edit or a require rule would exceed a relation maximum.
    CardinalityExceeded,
    /// The relation is closed to further additions.
    RelationClosed,
    /// A hide, disable or exclude rule forbids the edit.
    RuleForbids,
    /// The value is outside the variable's domain.
    OutsideDomain,
    /// Require and exclude rules did not settle.
    StructuralRulesDiverged,
}

/// Why an edit was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub reason: ConflictReason,
    /// The constraint or rule that rejected the edit.
    pub constraint: Option<ConstraintRef>,
    pub instance: Option<InstanceId>,
    pub cell: Option<CellRef>,
    pub detail: String,
}

impl Conflict {
    pub fn new(reason: ConflictReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            constraint: None,
            instance: None,
            cell: None,
            detail: detail.into(),
        }
    }

    pub fn with_constraint(mut self, constraint: ConstraintRef) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn with_instance(mut self, instance: InstanceId) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn with_cell(mut self, cell: CellRef) -> Self {
        self.instance = Some(cell.instance);
        self.cell = Some(cell);
        self
    }

    /// Conflict for a contradiction propagation or search could not
    /// recover from.
    pub fn from_contradiction(contradiction: Option<Contradiction>) -> Self {
        let contradiction = contradiction.unwrap_or_default();
        let detail = match &contradiction.constraint {
            Some(c) => format!("{c} cannot be satisfied"),
            None => "no assignment satisfies the hard constraints".to_string(),
        };
        let mut conflict = Conflict::new(ConflictReason::Constraint, detail);
        conflict.constraint = contradiction.constraint;
        if let Some(cell) = contradiction.cell {
            conflict = conflict.with_cell(cell);
        }
        conflict
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.reason, self.detail)
    }
}

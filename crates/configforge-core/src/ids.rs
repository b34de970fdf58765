//! Identifiers for runtime objects of a configuration session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one instance in a session's instance tree.
///
/// Ids are allocated monotonically, so ordering by id is ordering by
/// creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

impl InstanceId {
    /// The root (header) instance of every session.
    pub const ROOT: InstanceId = InstanceId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One variable slot of one instance: the unit domains are stored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub instance: InstanceId,
    /// Index into the instance type's flattened variable list.
    pub var: usize,
}

impl CellRef {
    pub fn new(instance: InstanceId, var: usize) -> Self {
        Self { instance, var }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance, self.var)
    }
}

/// Identifies a configuration session within a session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

//! ConfigForge Core - Core types for product configuration
//!
//! This crate provides the fundamental abstractions shared by the engine:
//! - Values held by configuration variables
//! - Domains, the ordered sets of values still permitted
//! - Identifiers for instances, cells and sessions
//! - Constraint references and rule diagnostics
//! - The error taxonomy

pub mod constraint;
pub mod domain;
pub mod error;
pub mod ids;
pub mod value;

pub use constraint::{ConstraintRef, Diagnostic, Severity};
pub use domain::Domain;
pub use error::{ConfigForgeError, Result, SchemaError, SchemaErrorKind};
pub use ids::{CellRef, InstanceId, SessionId};
pub use value::{compare_values, date_from_days, days_since_epoch, parse_date, shift_date, Value};

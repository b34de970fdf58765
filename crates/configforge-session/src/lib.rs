//! ConfigForge Session
//!
//! Interactive configuration on top of the engine:
//! - [`Session`]: one owner's edits, committed only when they solve
//! - [`SessionManager`]: many sessions over one shared model
//! - [`Context`]: values supplied by the hosting environment
//! - [`VisibleState`]: what a presentation layer reads after each call
//!
//! # Example
//!
//! ```
//! use configforge_config::EngineConfig;
//! use configforge_core::InstanceId;
//! use configforge_session::{Context, SessionManager};
//! use configforge_test::laptop_model;
//!
//! let manager = SessionManager::new(laptop_model(), EngineConfig::default());
//! let id = manager.open(&Context::new().with("display", "4k")).unwrap();
//! let result = manager
//!     .select_relation_option(id, InstanceId::ROOT, "Memory", "Ram16GB", 1)
//!     .unwrap();
//! assert!(result.outcome.is_solved());
//! ```

pub mod context;
pub mod manager;
pub mod session;
pub mod visible;

pub use context::Context;
pub use manager::SessionManager;
pub use session::{AssignResult, RelationOption, Session, SessionEvent};
pub use visible::{GroupView, InstanceView, RelationView, VariableView, VisibleState};

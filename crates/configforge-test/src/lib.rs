//! Shared test fixtures for ConfigForge crates.
//!
//! - [`laptop`] - user-driven model: display, memory modules, ports and drive bays
//! - [`workstation`] - engine-managed model: relations the engine fills on its own
//!
//! # Usage
//!
//! Add as a dev-dependency in your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! configforge-test = { workspace = true }
//! ```
//!
//! Then load the model you need:
//!
//! ```
//! use configforge_test::laptop_model;
//!
//! let model = laptop_model();
//! assert!(model.type_id("Ram8GB").is_some());
//! ```

pub mod laptop;
pub mod workstation;

pub use laptop::{laptop_model, laptop_rules_model, laptop_rules_schema, laptop_schema};
pub use workstation::{workstation_model, workstation_schema};

//! ConfigForge Model - the model registry
//!
//! A [`Schema`] holds the parsed but unvalidated declarations of a product
//! model. [`Model::load`] validates it, flattens inheritance and enumerates
//! domains, producing an immutable [`Model`] that any number of sessions
//! may share.

mod expr;
mod loader;
mod model;
mod schema;

#[cfg(test)]
mod tests;

pub use expr::{AggregateFn, Expr};
pub use loader::DEFAULT_DOMAIN_LIMIT;
pub use model::{
    Constraint, InstancePattern, Model, Relation, Rule, RuleEffect, RuleTarget, SourceRef, TypeDef,
    TypeId, Variable,
};
pub use schema::{
    ActionClassification, ActionScope, ActionTarget, AttributePath, ConstraintDef, DomainItem,
    PrimitiveKind, RangeSpec, RelationDef, RelationPattern, RuleAction, RuleDef, Schema, SplitMode,
    TypeDecl, VariableDef,
};

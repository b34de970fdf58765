//! Values supplied by the hosting environment at session open.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use configforge_core::{ConfigForgeError, Result, Value};
use configforge_engine::ExternalValues;
use configforge_model::Model;

/// Initial values for externally set variables, keyed by a variable's
/// tag name or by `Type.variable`.
///
/// # Example
///
/// ```
/// use configforge_session::Context;
///
/// let context = Context::new()
///     .with("display", "4k")
///     .with("Laptop.Keyboard", "de");
/// assert_eq!(context.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    values: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolves every key against the model and coerces its value to the
    /// variable's kind.
    pub fn resolve(&self, model: &Model) -> Result<ExternalValues> {
        let mut externals = ExternalValues::new();
        for (key, value) in &self.values {
            let (ty, var) = model.resolve_tag(key).ok_or_else(|| ConfigForgeError::UnknownVariable {
                type_name: "context".to_string(),
                variable: key.clone(),
            })?;
            let variable = &model.type_def(ty).variables[var];
            let coerced = variable
                .kind
                .coerce(value)
                .ok_or_else(|| ConfigForgeError::TypeMismatch {
                    variable: key.clone(),
                    expected: variable.kind.name(),
                    actual: value.kind_name().to_string(),
                })?;
            externals.insert((ty, var), coerced);
        }
        Ok(externals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configforge_test::laptop_model;

    #[test]
    fn test_resolve_tag_and_path() {
        let model = laptop_model();
        let context = Context::new().with("display", "4k").with("Laptop.Keyboard", "fr");

        let externals = context.resolve(&model).unwrap();
        let root = model.root();
        assert_eq!(externals.get(&(root, 0)), Some(&Value::str("4k")));
        assert_eq!(externals.get(&(root, 1)), Some(&Value::str("fr")));
    }

    #[test]
    fn test_unknown_key() {
        let model = laptop_model();
        let err = Context::new().with("colour", "red").resolve(&model).unwrap_err();
        assert!(matches!(err, ConfigForgeError::UnknownVariable { .. }));
    }

    #[test]
    fn test_kind_mismatch() {
        let model = laptop_model();
        let err = Context::new().with("display", true).resolve(&model).unwrap_err();
        assert!(matches!(err, ConfigForgeError::TypeMismatch { .. }));
    }
}

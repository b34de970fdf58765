//! Variable domains: the ordered set of values still permitted.

use std::collections::HashSet;

use crate::value::Value;

/// The values a variable may still take, in search order.
///
/// Order is significant: list entries keep declaration order, ranges are
/// enumerated ascending, and the search engine tries values front to back.
///
/// # Example
///
/// ```
/// use configforge_core::{Domain, Value};
///
/// let mut domain = Domain::new(vec![Value::from("hd"), Value::from("4k"), Value::from("hd")]);
/// assert_eq!(domain.len(), 2);
///
/// assert!(domain.remove(&Value::from("4k")));
/// assert_eq!(domain.single(), Some(&Value::from("hd")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Domain {
    values: Vec<Value>,
}

impl Domain {
    /// Creates a domain from values, dropping duplicates but keeping the
    /// first occurrence's position.
    pub fn new(values: impl IntoIterator<Item = Value>) -> Self {
        let mut seen = HashSet::new();
        let values = values
            .into_iter()
            .filter(|v| seen.insert(v.clone()))
            .collect();
        Self { values }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn singleton(value: Value) -> Self {
        Self {
            values: vec![value],
        }
    }

    /// The `{false, true}` domain.
    pub fn boolean() -> Self {
        Self {
            values: vec![Value::Bool(false), Value::Bool(true)],
        }
    }

    /// Inclusive integer range with a positive step.
    pub fn int_range(min: i64, max: i64, step: i64) -> Self {
        let step = step.max(1);
        let mut values = Vec::new();
        let mut current = min;
        while current <= max {
            values.push(Value::Int(current));
            match current.checked_add(step) {
                Some(next) => current = next,
                None => break,
            }
        }
        Self { values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.values.len() == 1
    }

    /// Returns the only value if the domain is a singleton.
    pub fn single(&self) -> Option<&Value> {
        match self.values.as_slice() {
            [v] => Some(v),
            _ => None,
        }
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.values.contains(value)
    }

    /// Keeps only values matching the predicate. Returns the number removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&Value) -> bool) -> usize {
        let before = self.values.len();
        self.values.retain(|v| keep(v));
        before - self.values.len()
    }

    /// Removes a value. Returns true if it was present.
    pub fn remove(&mut self, value: &Value) -> bool {
        self.retain(|v| v != value) > 0
    }

    /// Narrows this domain to the values also present in `other`.
    /// Returns true if anything was removed.
    pub fn restrict_to(&mut self, other: &Domain) -> bool {
        if other.len() > 16 {
            let allowed: HashSet<&Value> = other.values.iter().collect();
            self.retain(|v| allowed.contains(v)) > 0
        } else {
            self.retain(|v| other.contains(v)) > 0
        }
    }

    /// Collapses the domain to one value. Returns true if it changed.
    pub fn collapse_to(&mut self, value: &Value) -> bool {
        let changed = self.values.len() != 1 || &self.values[0] != value;
        self.values = vec![value.clone()];
        changed
    }

    /// Numeric lower and upper bounds, if every value is numeric.
    pub fn numeric_bounds(&self) -> Option<(f64, f64)> {
        let mut bounds: Option<(f64, f64)> = None;
        for v in &self.values {
            let x = v.as_f64()?;
            bounds = Some(match bounds {
                None => (x, x),
                Some((lo, hi)) => (lo.min(x), hi.max(x)),
            });
        }
        bounds
    }
}

impl FromIterator<Value> for Domain {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Domain::new(iter)
    }
}

impl<'a> IntoIterator for &'a Domain {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

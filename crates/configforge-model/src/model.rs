//! The loaded, flattened model registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use configforge_core::{ConstraintRef, Domain, Severity, Value};

use crate::expr::Expr;
use crate::schema::{PrimitiveKind, SplitMode};

/// Index of a type in a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u32);

impl TypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type-{}", self.0)
    }
}

/// Immutable model registry shared by every session of a model version.
///
/// Every type is stored fully flattened: inherited variables, relations,
/// constraints and rules are copied in, with overrides resolved by name.
#[derive(Debug, Clone)]
pub struct Model {
    pub(crate) root: TypeId,
    pub(crate) types: Vec<TypeDef>,
    pub(crate) by_name: HashMap<Arc<str>, TypeId>,
}

impl Model {
    /// The virtual header type sessions are rooted at.
    pub fn root(&self) -> TypeId {
        self.root
    }

    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id.index()]
    }

    pub fn types(&self) -> &[TypeDef] {
        &self.types
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn type_by_name(&self, name: &str) -> Option<&TypeDef> {
        self.type_id(name).map(|id| self.type_def(id))
    }

    /// True if `ty` is `ancestor` or one of its subtypes.
    pub fn is_a(&self, ty: TypeId, ancestor: TypeId) -> bool {
        self.type_def(ty).ancestors.contains(&ancestor)
    }

    /// Looks up a variable declared with `tag` as its tag name, or addressed
    /// as `Type.variable`.
    pub fn resolve_tag(&self, tag: &str) -> Option<(TypeId, usize)> {
        for def in &self.types {
            if let Some(idx) = def
                .variables
                .iter()
                .position(|v| v.tag_name.as_deref() == Some(tag))
            {
                return Some((def.id, idx));
            }
        }
        let (type_name, var) = tag.split_once('.')?;
        let ty = self.type_id(type_name)?;
        let idx = self.type_def(ty).variable_index(var)?;
        Some((ty, idx))
    }
}

/// A flattened type.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub id: TypeId,
    pub name: Arc<str>,
    pub parent: Option<TypeId>,
    /// This type followed by its ancestors, nearest first.
    pub ancestors: Vec<TypeId>,
    /// Direct subtypes in declaration order.
    pub subtypes: Vec<TypeId>,
    pub is_virtual: bool,
    pub split: SplitMode,
    /// Variable whose value groups instances of this type.
    pub group_by: Option<usize>,
    pub variables: Vec<Variable>,
    pub relations: Vec<Relation>,
    pub constraints: Vec<Constraint>,
    /// Rules sorted by [`Rule::order_key`].
    pub rules: Vec<Rule>,
    pub(crate) var_index: HashMap<Arc<str>, usize>,
    pub(crate) rel_index: HashMap<Arc<str>, usize>,
}

impl TypeDef {
    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.var_index.get(name).copied()
    }

    pub fn relation_index(&self, name: &str) -> Option<usize> {
        self.rel_index.get(name).copied()
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variable_index(name).map(|i| &self.variables[i])
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relation_index(name).map(|i| &self.relations[i])
    }

    pub fn is_leaf(&self) -> bool {
        self.subtypes.is_empty()
    }

    /// Weight of one instance of this type in relation cardinality counts.
    pub fn weight(&self, quantity: u32) -> u32 {
        match self.split {
            SplitMode::False => quantity,
            SplitMode::True | SplitMode::None => 1,
        }
    }
}

/// A flattened variable definition with its enumerated domain.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: Arc<str>,
    pub kind: PrimitiveKind,
    /// Declared domain, enumerated. For `string_multi` these are the options.
    pub domain: Domain,
    pub configurable: bool,
    pub default_value: Option<Value>,
    pub domain_computation: bool,
    pub sequence: i32,
    pub source: Option<SourceRef>,
    pub tag_name: Option<String>,
    pub external: bool,
}

impl Variable {
    pub fn is_multi(&self) -> bool {
        self.kind == PrimitiveKind::StringMulti
    }
}

/// Resolved `sourceAttribute` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub var: Arc<str>,
    pub level: u32,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub name: Arc<str>,
    pub target: TypeId,
    pub min: u32,
    pub max: Option<u32>,
    /// Instantiable types in presentation order.
    pub options: Vec<TypeId>,
    pub close_relation: bool,
    pub configurable: bool,
    pub sequence: i32,
}

impl Relation {
    pub fn admits(&self, count: u32) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: ConstraintRef,
    pub expr: Arc<Expr>,
}

/// What a rule acts on once its target names have been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleTarget {
    /// A variable, optionally narrowed to one value.
    Variable { var: usize, value: Option<Value> },
    /// A relation, optionally narrowed to one option type (and its subtypes).
    Relation { rel: usize, option: Option<TypeId> },
}

/// Resolved `require`/`exclude` pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct InstancePattern {
    pub relation: usize,
    pub type_id: TypeId,
    pub assignments: Vec<(usize, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleEffect {
    /// Presentation flag; `hide == false` is a show rule.
    Visibility { hide: bool, target: RuleTarget },
    /// Domain narrowing; `disable == false` is an enable rule.
    Enablement { disable: bool, target: RuleTarget },
    Require(InstancePattern),
    Exclude(InstancePattern),
    Message { severity: Severity, text: String },
    Preference { score: i64 },
}

impl RuleEffect {
    pub fn is_structural(&self) -> bool {
        matches!(self, RuleEffect::Require(_) | RuleEffect::Exclude(_))
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: ConstraintRef,
    pub condition: Arc<Expr>,
    pub effect: RuleEffect,
    /// Effective sequence: the rule's own, else its target's.
    pub sequence: i32,
    /// Position in the flattened rule list before sorting.
    pub declaration: usize,
}

impl Rule {
    /// Evaluation order: ascending sequence, then declaration order.
    pub fn order_key(&self) -> (i32, usize) {
        (self.sequence, self.declaration)
    }
}

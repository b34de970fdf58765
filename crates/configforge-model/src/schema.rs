//! Declarations of the abstract model, as handed over by a parser/loader.
//!
//! A [`Schema`] is name-based and unvalidated. [`crate::Model::load`] turns
//! it into the immutable, flattened registry sessions run against.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use configforge_core::{date_from_days, parse_date, SchemaError, SchemaErrorKind, Severity, Value};

use crate::expr::Expr;

/// The complete abstract model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Schema {
    /// Name of the virtual header type every session is rooted at.
    pub root: String,
    pub types: Vec<TypeDecl>,
}

impl Schema {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            types: Vec::new(),
        }
    }

    pub fn with_type(mut self, decl: TypeDecl) -> Self {
        self.types.push(decl);
        self
    }

    /// Parses a TOML rendition of the schema.
    pub fn from_toml_str(s: &str) -> Result<Self, SchemaError> {
        toml::from_str(s).map_err(|e| SchemaError::new(SchemaErrorKind::Malformed, "schema", e.to_string()))
    }

    /// Parses a YAML rendition of the schema.
    ///
    /// Enum nodes are written as single-key maps, as in TOML and JSON:
    /// `{ value: red }`, `{ eq: [{ var: Color }, { literal: red }] }`.
    pub fn from_yaml_str(s: &str) -> Result<Self, SchemaError> {
        serde_yaml::with::singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(s))
            .map_err(|e: serde_yaml::Error| SchemaError::new(SchemaErrorKind::Malformed, "schema", e.to_string()))
    }
}

/// How selections of the same type are turned into instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitMode {
    /// Every unit becomes its own instance with quantity 1.
    #[serde(rename = "true")]
    True,
    /// Same-type selections collapse into one instance whose quantity
    /// accumulates; relation cardinality counts the quantity.
    #[serde(rename = "false")]
    False,
    /// One instance per selection, carrying the selected quantity.
    #[default]
    #[serde(rename = "none")]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TypeDecl {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub variables: Vec<VariableDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDef>,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
    /// Variable whose value groups instances of this type for presentation.
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub split: SplitMode,
    /// Header/root types.
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

impl TypeDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn virtual_type(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn with_variable(mut self, var: VariableDef) -> Self {
        self.variables.push(var);
        self
    }

    pub fn with_relation(mut self, rel: RelationDef) -> Self {
        self.relations.push(rel);
        self
    }

    pub fn with_constraint(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.constraints.push(ConstraintDef {
            name: name.into(),
            expr,
        });
        self
    }

    pub fn with_rule(mut self, rule: RuleDef) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn grouped_by(mut self, var: impl Into<String>) -> Self {
        self.group_by = Some(var.into());
        self
    }

    pub fn with_split(mut self, split: SplitMode) -> Self {
        self.split = split;
        self
    }
}

/// Primitive kind of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    Boolean,
    Date,
    /// Fixed-point decimal with the given number of fractional digits.
    Decimal(u32),
    /// Floating point rounded to the given number of fractional digits.
    Double(u32),
    Int,
    String,
    StringMulti,
}

impl PrimitiveKind {
    /// Converts a literal to this kind, or `None` if incompatible.
    ///
    /// `Null` is accepted by every kind.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        if value.is_null() {
            return Some(Value::Null);
        }
        match (self, value) {
            (PrimitiveKind::Boolean, Value::Bool(_)) => Some(value.clone()),
            (PrimitiveKind::Int, Value::Int(_)) => Some(value.clone()),
            (PrimitiveKind::Int, Value::Double(d)) => {
                let int = Decimal::from_f64(*d).filter(|m| m.fract().is_zero())?.to_i64()?;
                (Value::Int(int) == *value).then_some(Value::Int(int))
            }
            (PrimitiveKind::Double(scale), v) if v.is_numeric() => {
                let factor = 10f64.powi(*scale as i32);
                Some(Value::Double((v.as_f64()? * factor).round() / factor))
            }
            (PrimitiveKind::Decimal(scale), v) if v.is_numeric() => {
                Some(Value::Decimal(v.as_decimal()?.round_dp(*scale)))
            }
            (PrimitiveKind::Date, Value::Date(_)) => Some(value.clone()),
            (PrimitiveKind::Date, Value::Int(d)) => date_from_days(*d).map(Value::Date),
            (PrimitiveKind::Date, Value::Str(s)) => parse_date(s).map(Value::Date),
            (PrimitiveKind::String, Value::Str(_)) => Some(value.clone()),
            (PrimitiveKind::StringMulti, Value::Multi(_)) => Some(value.clone()),
            (PrimitiveKind::StringMulti, Value::Str(s)) => Some(Value::Multi(vec![s.clone()])),
            _ => None,
        }
    }

    /// Converts a domain entry to this kind. Options of a `string_multi`
    /// variable are plain strings.
    pub fn coerce_option(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (PrimitiveKind::StringMulti, Value::Str(_)) => Some(value.clone()),
            (PrimitiveKind::StringMulti, _) => None,
            _ if value.is_null() => None,
            _ => self.coerce(value),
        }
    }

    /// Default step used to enumerate a range of this kind.
    pub fn default_step(&self) -> Option<Value> {
        match self {
            PrimitiveKind::Int => Some(Value::Int(1)),
            PrimitiveKind::Date => Some(Value::Int(1)),
            PrimitiveKind::Decimal(scale) => Some(Value::Decimal(Decimal::new(1, *scale))),
            PrimitiveKind::Double(scale) => Some(Value::Double(10f64.powi(-(*scale as i32)))),
            PrimitiveKind::Boolean | PrimitiveKind::String | PrimitiveKind::StringMulti => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            PrimitiveKind::Boolean => "boolean".to_string(),
            PrimitiveKind::Date => "date".to_string(),
            PrimitiveKind::Decimal(n) => format!("decimal({n})"),
            PrimitiveKind::Double(n) => format!("double({n})"),
            PrimitiveKind::Int => "int".to_string(),
            PrimitiveKind::String => "string".to_string(),
            PrimitiveKind::StringMulti => "string_multi".to_string(),
        }
    }
}

/// One entry of a domain declaration, written `{ value: .. }` or
/// `{ range: { min, max, step } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DomainItemRepr", into = "DomainItemRepr")]
pub enum DomainItem {
    Value(Value),
    Range(RangeSpec),
}

// Keyed by field name rather than enum tag, so YAML needs no `!tags`
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DomainItemRepr {
    Value { value: Value },
    Range { range: RangeSpec },
}

impl From<DomainItemRepr> for DomainItem {
    fn from(repr: DomainItemRepr) -> Self {
        match repr {
            DomainItemRepr::Value { value } => DomainItem::Value(value),
            DomainItemRepr::Range { range } => DomainItem::Range(range),
        }
    }
}

impl From<DomainItem> for DomainItemRepr {
    fn from(item: DomainItem) -> Self {
        match item {
            DomainItem::Value(value) => DomainItemRepr::Value { value },
            DomainItem::Range(range) => DomainItemRepr::Range { range },
        }
    }
}

/// Inclusive range, enumerated ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RangeSpec {
    pub min: Value,
    pub max: Value,
    #[serde(default)]
    pub step: Option<Value>,
}

/// Reference to the variable supplying another variable's domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AttributePath {
    pub var: String,
    /// 0 = same instance, 1 = parent, and so on.
    #[serde(default)]
    pub level: u32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VariableDef {
    pub name: String,
    pub kind: PrimitiveKind,
    #[serde(default)]
    pub domain: Vec<DomainItem>,
    #[serde(default = "default_true")]
    pub configurable: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    /// Recompute the domain from `source_attribute` whenever it changes.
    #[serde(default)]
    pub domain_computation: bool,
    /// Lower values are resolved earlier.
    #[serde(default)]
    pub sequence: i32,
    #[serde(default)]
    pub source_attribute: Option<AttributePath>,
    #[serde(default)]
    pub tag_name: Option<String>,
    /// Value is supplied by the context provider at session open.
    #[serde(default)]
    pub external: bool,
}

impl VariableDef {
    pub fn new(name: impl Into<String>, kind: PrimitiveKind) -> Self {
        Self {
            name: name.into(),
            kind,
            domain: Vec::new(),
            configurable: true,
            default_value: None,
            domain_computation: false,
            sequence: 0,
            source_attribute: None,
            tag_name: None,
            external: false,
        }
    }

    pub fn with_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.domain
            .extend(values.into_iter().map(|v| DomainItem::Value(v.into())));
        self
    }

    pub fn with_range(mut self, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        self.domain.push(DomainItem::Range(RangeSpec {
            min: min.into(),
            max: max.into(),
            step: None,
        }));
        self
    }

    pub fn with_stepped_range(
        mut self,
        min: impl Into<Value>,
        max: impl Into<Value>,
        step: impl Into<Value>,
    ) -> Self {
        self.domain.push(DomainItem::Range(RangeSpec {
            min: min.into(),
            max: max.into(),
            step: Some(step.into()),
        }));
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn not_configurable(mut self) -> Self {
        self.configurable = false;
        self
    }

    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_source(mut self, var: impl Into<String>, level: u32, recompute: bool) -> Self {
        self.source_attribute = Some(AttributePath {
            var: var.into(),
            level,
        });
        self.domain_computation = recompute;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag_name = Some(tag.into());
        self
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelationDef {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub min: u32,
    /// `None` means unbounded.
    #[serde(default)]
    pub max: Option<u32>,
    /// Preferred order of the target's subtypes.
    #[serde(default)]
    pub order: Vec<String>,
    /// No instance may be added once the session has been solved.
    #[serde(default)]
    pub close_relation: bool,
    /// Whether the engine instantiates children up to `min` on its own.
    #[serde(default = "default_true")]
    pub configurable: bool,
    #[serde(default)]
    pub sequence: i32,
}

impl RelationDef {
    pub fn new(name: impl Into<String>, target: impl Into<String>, min: u32, max: Option<u32>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            min,
            max,
            order: Vec::new(),
            close_relation: false,
            configurable: true,
            sequence: 0,
        }
    }

    pub fn user_driven(mut self) -> Self {
        self.configurable = false;
        self
    }

    pub fn closed(mut self) -> Self {
        self.close_relation = true;
        self
    }

    pub fn ordered<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = order.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.sequence = sequence;
        self
    }
}

/// A hard constraint: must hold in every returned configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConstraintDef {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionScope {
    Attribute,
    Relation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClassification {
    Type,
    Value,
}

/// What an action rule applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ActionTarget {
    pub scope: ActionScope,
    /// Name of the attribute or relation.
    pub target: String,
    #[serde(default)]
    pub classification: Option<ActionClassification>,
    #[serde(default)]
    pub value_target: Option<Value>,
    #[serde(default)]
    pub type_target: Option<String>,
}

impl ActionTarget {
    pub fn attribute(target: impl Into<String>) -> Self {
        Self {
            scope: ActionScope::Attribute,
            target: target.into(),
            classification: None,
            value_target: None,
            type_target: None,
        }
    }

    pub fn relation(target: impl Into<String>) -> Self {
        Self {
            scope: ActionScope::Relation,
            ..Self::attribute(target)
        }
    }

    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.classification = Some(ActionClassification::Value);
        self.value_target = Some(value.into());
        self
    }

    pub fn of_type(mut self, type_name: impl Into<String>) -> Self {
        self.classification = Some(ActionClassification::Type);
        self.type_target = Some(type_name.into());
        self
    }
}

/// A relation instance pattern used by require/exclude rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelationPattern {
    pub relation: String,
    pub type_name: String,
    #[serde(default)]
    pub assignments: Vec<(String, Value)>,
}

impl RelationPattern {
    pub fn new(relation: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            type_name: type_name.into(),
            assignments: Vec::new(),
        }
    }

    pub fn with_assignment(mut self, var: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((var.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Hide(ActionTarget),
    Show(ActionTarget),
    Disable(ActionTarget),
    Enable(ActionTarget),
    Require(RelationPattern),
    Exclude(RelationPattern),
    Message { severity: Severity, text: String },
    /// Soft preference used to rank otherwise equal solutions.
    Preference { score: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuleDef {
    pub name: String,
    pub condition: Expr,
    pub action: RuleAction,
    /// Overrides the sequence inherited from the rule's target.
    #[serde(default)]
    pub sequence: Option<i32>,
}

impl RuleDef {
    pub fn new(name: impl Into<String>, condition: Expr, action: RuleAction) -> Self {
        Self {
            name: name.into(),
            condition,
            action,
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

//! Expression trees for constraints and rule conditions.

use serde::{Deserialize, Serialize};

use configforge_core::{parse_date, Value};

/// Aggregate functions over the children of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    /// Sum of the variable over the children.
    Sum,
    /// Smallest value of the variable.
    Min,
    /// Largest value of the variable.
    Max,
    /// Number of child instances.
    Count,
    /// Sum of the variable multiplied by each child's quantity.
    Total,
}

/// An expression tree node.
///
/// Variable references are by name and resolved against the instance the
/// expression is evaluated on; the model loader checks that every name
/// resolves before any session can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Value),
    /// Variable of the evaluated instance.
    Var(String),
    /// `parent(var, level)`: variable of the ancestor `level` steps up.
    Parent {
        var: String,
        level: u32,
    },
    /// `this.quantity`
    Quantity,
    /// `cardinality(type, relation?)`: quantity-weighted count of children
    /// of `type` (and its subtypes), in one relation or across all of them.
    Cardinality {
        type_name: Option<String>,
        relation: Option<String>,
    },
    /// `relation.func(var)`
    Aggregate {
        func: AggregateFn,
        relation: String,
        var: Option<String>,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Implies(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    /// Membership of a value in a literal list.
    In(Box<Expr>, Vec<Value>),
    /// A `string_multi` selection contains the literal option.
    Contains(Box<Expr>, Value),
    If {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
}

impl Expr {
    // Constructors for common expressions

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn int(value: i64) -> Self {
        Expr::Literal(Value::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Expr::Literal(Value::Bool(value))
    }

    pub fn string(value: &str) -> Self {
        Expr::Literal(Value::str(value))
    }

    /// Date literal from `YYYY-MM-DD`; malformed input yields `Null`.
    pub fn date(iso: &str) -> Self {
        Expr::Literal(parse_date(iso).map(Value::Date).unwrap_or(Value::Null))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn parent(var: impl Into<String>, level: u32) -> Self {
        Expr::Parent {
            var: var.into(),
            level,
        }
    }

    pub fn quantity() -> Self {
        Expr::Quantity
    }

    pub fn cardinality(type_name: Option<&str>, relation: Option<&str>) -> Self {
        Expr::Cardinality {
            type_name: type_name.map(str::to_string),
            relation: relation.map(str::to_string),
        }
    }

    pub fn aggregate(func: AggregateFn, relation: &str, var: Option<&str>) -> Self {
        Expr::Aggregate {
            func,
            relation: relation.to_string(),
            var: var.map(str::to_string),
        }
    }

    pub fn sum(relation: &str, var: &str) -> Self {
        Self::aggregate(AggregateFn::Sum, relation, Some(var))
    }

    pub fn total(relation: &str, var: &str) -> Self {
        Self::aggregate(AggregateFn::Total, relation, Some(var))
    }

    pub fn count(relation: &str) -> Self {
        Self::aggregate(AggregateFn::Count, relation, None)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::Or(Box::new(left), Box::new(right))
    }

    pub fn implies(left: Expr, right: Expr) -> Self {
        Expr::Implies(Box::new(left), Box::new(right))
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::Eq(Box::new(left), Box::new(right))
    }

    pub fn ne(left: Expr, right: Expr) -> Self {
        Expr::Ne(Box::new(left), Box::new(right))
    }

    pub fn lt(left: Expr, right: Expr) -> Self {
        Expr::Lt(Box::new(left), Box::new(right))
    }

    pub fn le(left: Expr, right: Expr) -> Self {
        Expr::Le(Box::new(left), Box::new(right))
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Expr::Gt(Box::new(left), Box::new(right))
    }

    pub fn ge(left: Expr, right: Expr) -> Self {
        Expr::Ge(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(left: Expr, right: Expr) -> Self {
        Expr::Add(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(left: Expr, right: Expr) -> Self {
        Expr::Sub(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(left: Expr, right: Expr) -> Self {
        Expr::Mul(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn div(left: Expr, right: Expr) -> Self {
        Expr::Div(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn neg(expr: Expr) -> Self {
        Expr::Neg(Box::new(expr))
    }

    pub fn is_in(expr: Expr, values: Vec<Value>) -> Self {
        Expr::In(Box::new(expr), values)
    }

    pub fn contains(expr: Expr, option: &str) -> Self {
        Expr::Contains(Box::new(expr), Value::str(option))
    }

    pub fn if_then_else(cond: Expr, then_expr: Expr, else_expr: Expr) -> Self {
        Expr::If {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        }
    }

    /// Visits this node and every descendant, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Literal(_)
            | Expr::Var(_)
            | Expr::Parent { .. }
            | Expr::Quantity
            | Expr::Cardinality { .. }
            | Expr::Aggregate { .. } => {}
            Expr::Not(e) | Expr::Neg(e) | Expr::In(e, _) | Expr::Contains(e, _) => e.walk(visit),
            Expr::And(l, r)
            | Expr::Or(l, r)
            | Expr::Implies(l, r)
            | Expr::Eq(l, r)
            | Expr::Ne(l, r)
            | Expr::Lt(l, r)
            | Expr::Le(l, r)
            | Expr::Gt(l, r)
            | Expr::Ge(l, r)
            | Expr::Add(l, r)
            | Expr::Sub(l, r)
            | Expr::Mul(l, r)
            | Expr::Div(l, r) => {
                l.walk(visit);
                r.walk(visit);
            }
            Expr::If {
                cond,
                then_expr,
                else_expr,
            } => {
                cond.walk(visit);
                then_expr.walk(visit);
                else_expr.walk(visit);
            }
        }
    }

    /// True if the expression reads relation contents.
    pub fn reads_relations(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Aggregate { .. } | Expr::Cardinality { .. }) {
                found = true;
            }
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_visits_all_nodes() {
        let expr = Expr::implies(
            Expr::eq(Expr::var("Display"), Expr::string("4k")),
            Expr::ge(Expr::sum("Memory", "size"), Expr::int(16)),
        );
        let mut vars = Vec::new();
        let mut count = 0;
        expr.walk(&mut |e| {
            count += 1;
            if let Expr::Var(name) = e {
                vars.push(name.as_str());
            }
        });
        assert_eq!(count, 7);
        assert_eq!(vars, vec!["Display"]);
        assert!(expr.reads_relations());
    }

    #[test]
    fn test_date_literal() {
        let second = configforge_core::date_from_days(1).map(Value::Date).unwrap();
        assert_eq!(Expr::date("1970-01-02"), Expr::Literal(second));
        assert_eq!(Expr::date("garbage"), Expr::Literal(Value::Null));
    }
}

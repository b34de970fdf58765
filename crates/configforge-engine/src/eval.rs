//! Three-valued evaluation of expressions over current domains.
//!
//! An expression is evaluated to an [`Abstract`] value: the exact set of
//! values it may still take, a numeric interval once that set grows past
//! [`SET_LIMIT`], or unknown. Conditions evaluate to a [`Truth`] under
//! Kleene logic, so a constraint is only reported violated when no
//! combination of remaining values can satisfy it.

use std::cmp::Ordering;
use std::collections::HashSet;

use smallvec::SmallVec;

use configforge_core::{compare_values, shift_date, CellRef, InstanceId, Value};
use configforge_model::{AggregateFn, Expr, Model};

use crate::graph::InstanceGraph;
use crate::store::DomainStore;

/// Largest value set kept exact before widening to an interval.
pub const SET_LIMIT: usize = 64;

/// Three-valued truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn from_bool(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    pub fn and(self, other: Truth) -> Self {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Self {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    pub fn is_false(self) -> bool {
        self == Truth::False
    }

    fn of_outcomes(any_true: bool, any_false: bool) -> Self {
        match (any_true, any_false) {
            (true, false) => Truth::True,
            (false, true) => Truth::False,
            _ => Truth::Unknown,
        }
    }
}

/// Over-approximation of the values an expression may take.
#[derive(Debug, Clone, PartialEq)]
pub enum Abstract {
    /// Exactly these values.
    Set(Vec<Value>),
    /// Some number in the closed interval.
    Range(f64, f64),
    Unknown,
}

impl Abstract {
    pub fn exact(value: Value) -> Self {
        Abstract::Set(vec![value])
    }

    /// Builds a set, dropping duplicates and widening it to an interval
    /// when it grows past [`SET_LIMIT`].
    pub fn set(values: Vec<Value>) -> Self {
        let mut seen = HashSet::new();
        let values: Vec<Value> = values.into_iter().filter(|v| seen.insert(v.clone())).collect();
        if values.len() <= SET_LIMIT {
            return Abstract::Set(values);
        }
        match hull(&values) {
            Some((lo, hi)) => Abstract::Range(lo, hi),
            None => Abstract::Unknown,
        }
    }

    fn from_truth(truth: Truth) -> Self {
        match truth {
            Truth::True => Abstract::exact(Value::Bool(true)),
            Truth::False => Abstract::exact(Value::Bool(false)),
            Truth::Unknown => Abstract::Set(vec![Value::Bool(false), Value::Bool(true)]),
        }
    }

    /// Numeric interval covering every value, if they are all numeric.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            Abstract::Set(values) => hull(values),
            Abstract::Range(lo, hi) => Some((*lo, *hi)),
            Abstract::Unknown => None,
        }
    }

    /// The value, if exactly one is possible.
    pub fn single(&self) -> Option<&Value> {
        match self {
            Abstract::Set(values) if values.len() == 1 => values.first(),
            _ => None,
        }
    }

    /// Truth of a boolean-valued expression. Non-boolean values are false.
    pub fn truth(&self) -> Truth {
        match self {
            Abstract::Set(values) if !values.is_empty() => {
                let any_true = values.iter().any(|v| v.as_bool() == Some(true));
                let any_false = values.iter().any(|v| v.as_bool() != Some(true));
                Truth::of_outcomes(any_true, any_false)
            }
            _ => Truth::Unknown,
        }
    }

    /// Least abstraction covering both.
    pub fn join(self, other: Abstract) -> Abstract {
        match (self, other) {
            (Abstract::Set(mut a), Abstract::Set(b)) => {
                a.extend(b);
                Abstract::set(a)
            }
            (a, b) => match (a.bounds(), b.bounds()) {
                (Some((al, ah)), Some((bl, bh))) => Abstract::Range(al.min(bl), ah.max(bh)),
                _ => Abstract::Unknown,
            },
        }
    }
}

fn hull(values: &[Value]) -> Option<(f64, f64)> {
    let mut bounds: Option<(f64, f64)> = None;
    for v in values {
        let x = v.as_f64()?;
        bounds = Some(match bounds {
            None => (x, x),
            Some((lo, hi)) => (lo.min(x), hi.max(x)),
        });
    }
    bounds
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds(self, x: &Value, y: &Value) -> bool {
        match self {
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Lt => compare_values(x, y) == Some(Ordering::Less),
            CmpOp::Le => matches!(compare_values(x, y), Some(Ordering::Less | Ordering::Equal)),
            CmpOp::Gt => compare_values(x, y) == Some(Ordering::Greater),
            CmpOp::Ge => matches!(compare_values(x, y), Some(Ordering::Greater | Ordering::Equal)),
        }
    }

    fn on_bounds(self, (al, ah): (f64, f64), (bl, bh): (f64, f64)) -> Truth {
        match self {
            CmpOp::Lt if ah < bl => Truth::True,
            CmpOp::Lt if al >= bh => Truth::False,
            CmpOp::Le if ah <= bl => Truth::True,
            CmpOp::Le if al > bh => Truth::False,
            CmpOp::Gt if al > bh => Truth::True,
            CmpOp::Gt if ah <= bl => Truth::False,
            CmpOp::Ge if al >= bh => Truth::True,
            CmpOp::Ge if ah < bl => Truth::False,
            CmpOp::Eq | CmpOp::Ne => {
                let equal = if al == ah && bl == bh && al == bl {
                    Truth::True
                } else if ah < bl || bh < al {
                    Truth::False
                } else {
                    Truth::Unknown
                };
                if self == CmpOp::Eq {
                    equal
                } else {
                    equal.not()
                }
            }
            _ => Truth::Unknown,
        }
    }
}

fn compare(op: CmpOp, left: &Abstract, right: &Abstract) -> Truth {
    match (left, right) {
        (Abstract::Unknown, _) | (_, Abstract::Unknown) => Truth::Unknown,
        (Abstract::Set(a), Abstract::Set(b)) if a.len() * b.len() <= SET_LIMIT * SET_LIMIT => {
            if a.is_empty() || b.is_empty() {
                return Truth::Unknown;
            }
            let (mut any_true, mut any_false) = (false, false);
            'outer: for x in a {
                for y in b {
                    if op.holds(x, y) {
                        any_true = true;
                    } else {
                        any_false = true;
                    }
                    if any_true && any_false {
                        break 'outer;
                    }
                }
            }
            Truth::of_outcomes(any_true, any_false)
        }
        _ => match (left.bounds(), right.bounds()) {
            (Some(a), Some(b)) => op.on_bounds(a, b),
            _ => Truth::Unknown,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Applies an arithmetic operator to two values. Undefined results
/// (overflow, division by zero, incompatible kinds) are `Null`.
fn apply(op: ArithOp, x: &Value, y: &Value) -> Value {
    match (x, y) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (Value::Date(d), Value::Int(n)) => {
            let shifted = match op {
                ArithOp::Add => shift_date(*d, *n),
                ArithOp::Sub => n.checked_neg().and_then(|n| shift_date(*d, n)),
                _ => None,
            };
            shifted.map_or(Value::Null, Value::Date)
        }
        (Value::Int(_), Value::Date(_)) if op == ArithOp::Add => apply(op, y, x),
        (Value::Date(a), Value::Date(b)) if op == ArithOp::Sub => {
            Value::Int(a.signed_duration_since(*b).num_days())
        }
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                ArithOp::Add => a.checked_add(*b).map(Value::Int),
                ArithOp::Sub => a.checked_sub(*b).map(Value::Int),
                ArithOp::Mul => a.checked_mul(*b).map(Value::Int),
                ArithOp::Div if *b == 0 => None,
                ArithOp::Div if a % b == 0 => Some(Value::Int(a / b)),
                ArithOp::Div => Some(Value::Double(*a as f64 / *b as f64)),
            };
            result.unwrap_or(Value::Null)
        }
        (Value::Decimal(_), _) | (_, Value::Decimal(_)) if x.is_numeric() && y.is_numeric() => {
            let (Some(a), Some(b)) = (x.as_decimal(), y.as_decimal()) else {
                return Value::Null;
            };
            let result = match op {
                ArithOp::Add => a.checked_add(b),
                ArithOp::Sub => a.checked_sub(b),
                ArithOp::Mul => a.checked_mul(b),
                ArithOp::Div => a.checked_div(b),
            };
            result.map_or(Value::Null, Value::Decimal)
        }
        _ if x.is_numeric() && y.is_numeric() => {
            let (Some(a), Some(b)) = (x.as_f64(), y.as_f64()) else {
                return Value::Null;
            };
            match op {
                ArithOp::Add => Value::Double(a + b),
                ArithOp::Sub => Value::Double(a - b),
                ArithOp::Mul => Value::Double(a * b),
                ArithOp::Div if b == 0.0 => Value::Null,
                ArithOp::Div => Value::Double(a / b),
            }
        }
        _ => Value::Null,
    }
}

fn arith(op: ArithOp, left: Abstract, right: Abstract) -> Abstract {
    match (left, right) {
        (Abstract::Unknown, _) | (_, Abstract::Unknown) => Abstract::Unknown,
        (Abstract::Set(a), Abstract::Set(b)) if a.len() * b.len() <= SET_LIMIT * SET_LIMIT => {
            let mut values = Vec::with_capacity(a.len() * b.len());
            for x in &a {
                for y in &b {
                    values.push(apply(op, x, y));
                }
            }
            Abstract::set(values)
        }
        (left, right) => {
            let (Some((al, ah)), Some((bl, bh))) = (left.bounds(), right.bounds()) else {
                return Abstract::Unknown;
            };
            let corners = |f: fn(f64, f64) -> f64| {
                let c = [f(al, bl), f(al, bh), f(ah, bl), f(ah, bh)];
                let lo = c.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = c.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Abstract::Range(lo, hi)
            };
            match op {
                ArithOp::Add => Abstract::Range(al + bl, ah + bh),
                ArithOp::Sub => Abstract::Range(al - bh, ah - bl),
                ArithOp::Mul => corners(|a, b| a * b),
                ArithOp::Div if bl <= 0.0 && bh >= 0.0 => Abstract::Unknown,
                ArithOp::Div => corners(|a, b| a / b),
            }
        }
    }
}

fn negate(value: Abstract) -> Abstract {
    match value {
        Abstract::Set(values) => Abstract::set(
            values
                .iter()
                .map(|v| match v {
                    Value::Int(n) => n.checked_neg().map_or(Value::Null, Value::Int),
                    Value::Double(d) => Value::Double(-d),
                    Value::Decimal(d) => Value::Decimal(-*d),
                    _ => Value::Null,
                })
                .collect(),
        ),
        Abstract::Range(lo, hi) => Abstract::Range(-hi, -lo),
        Abstract::Unknown => Abstract::Unknown,
    }
}

fn extremum(func: AggregateFn, left: Abstract, right: Abstract) -> Abstract {
    let want = if func == AggregateFn::Min {
        Ordering::Less
    } else {
        Ordering::Greater
    };
    match (left, right) {
        (Abstract::Unknown, _) | (_, Abstract::Unknown) => Abstract::Unknown,
        (Abstract::Set(a), Abstract::Set(b)) if a.len() * b.len() <= SET_LIMIT * SET_LIMIT => {
            let mut values = Vec::with_capacity(a.len() * b.len());
            for x in &a {
                for y in &b {
                    values.push(match compare_values(x, y) {
                        Some(order) if order == want || order == Ordering::Equal => x.clone(),
                        Some(_) => y.clone(),
                        None => Value::Null,
                    });
                }
            }
            Abstract::set(values)
        }
        (left, right) => match (left.bounds(), right.bounds()) {
            (Some((al, ah)), Some((bl, bh))) if func == AggregateFn::Min => {
                Abstract::Range(al.min(bl), ah.min(bh))
            }
            (Some((al, ah)), Some((bl, bh))) => Abstract::Range(al.max(bl), ah.max(bh)),
            _ => Abstract::Unknown,
        },
    }
}

/// Evaluates expressions against one instance graph and its domains.
///
/// With [`assuming`](Self::assuming), one cell is read as if it held a
/// single value; the propagator uses this to test each value for support.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    model: &'a Model,
    graph: &'a InstanceGraph,
    store: &'a DomainStore,
    assumption: Option<(CellRef, &'a Value)>,
}

impl<'a> Evaluator<'a> {
    pub fn new(model: &'a Model, graph: &'a InstanceGraph, store: &'a DomainStore) -> Self {
        Self {
            model,
            graph,
            store,
            assumption: None,
        }
    }

    /// Reads `cell` as holding exactly `value`.
    pub fn assuming(mut self, cell: CellRef, value: &'a Value) -> Self {
        self.assumption = Some((cell, value));
        self
    }

    /// Truth of a condition evaluated on instance `id`.
    pub fn truth(&self, id: InstanceId, expr: &Expr) -> Truth {
        match expr {
            Expr::Not(e) => self.truth(id, e).not(),
            Expr::And(l, r) => match self.truth(id, l) {
                Truth::False => Truth::False,
                left => left.and(self.truth(id, r)),
            },
            Expr::Or(l, r) => match self.truth(id, l) {
                Truth::True => Truth::True,
                left => left.or(self.truth(id, r)),
            },
            Expr::Implies(l, r) => match self.truth(id, l) {
                Truth::False => Truth::True,
                left => left.not().or(self.truth(id, r)),
            },
            Expr::Eq(l, r) => self.compare(id, CmpOp::Eq, l, r),
            Expr::Ne(l, r) => self.compare(id, CmpOp::Ne, l, r),
            Expr::Lt(l, r) => self.compare(id, CmpOp::Lt, l, r),
            Expr::Le(l, r) => self.compare(id, CmpOp::Le, l, r),
            Expr::Gt(l, r) => self.compare(id, CmpOp::Gt, l, r),
            Expr::Ge(l, r) => self.compare(id, CmpOp::Ge, l, r),
            Expr::In(e, list) => match self.eval(id, e) {
                Abstract::Set(values) if !values.is_empty() => {
                    let any_true = values.iter().any(|v| list.contains(v));
                    let any_false = values.iter().any(|v| !list.contains(v));
                    Truth::of_outcomes(any_true, any_false)
                }
                Abstract::Range(lo, hi) => {
                    let reachable = list
                        .iter()
                        .filter_map(Value::as_f64)
                        .any(|x| x >= lo && x <= hi);
                    if reachable {
                        Truth::Unknown
                    } else {
                        Truth::False
                    }
                }
                _ => Truth::Unknown,
            },
            Expr::Contains(e, option) => match self.eval(id, e) {
                Abstract::Set(values) if !values.is_empty() => {
                    let contains = |v: &Value| {
                        v.as_multi()
                            .is_some_and(|items| items.iter().any(|i| Some(&**i) == option.as_str()))
                    };
                    let any_true = values.iter().any(contains);
                    let any_false = values.iter().any(|v| !contains(v));
                    Truth::of_outcomes(any_true, any_false)
                }
                _ => Truth::Unknown,
            },
            other => self.eval(id, other).truth(),
        }
    }

    fn compare(&self, id: InstanceId, op: CmpOp, l: &Expr, r: &Expr) -> Truth {
        compare(op, &self.eval(id, l), &self.eval(id, r))
    }

    /// Abstract value of an expression evaluated on instance `id`.
    pub fn eval(&self, id: InstanceId, expr: &Expr) -> Abstract {
        match expr {
            Expr::Literal(v) => Abstract::exact(v.clone()),
            Expr::Var(name) => self.read(id, name),
            Expr::Parent { var, level } => match self.graph.ancestor(id, *level) {
                Some(ancestor) => self.read(ancestor, var),
                None => Abstract::Unknown,
            },
            Expr::Quantity => match self.graph.get(id) {
                Some(instance) => Abstract::exact(Value::Int(i64::from(instance.quantity))),
                None => Abstract::Unknown,
            },
            Expr::Cardinality {
                type_name,
                relation,
            } => self.cardinality(id, type_name.as_deref(), relation.as_deref()),
            Expr::Aggregate {
                func,
                relation,
                var,
            } => self.aggregate(id, *func, relation, var.as_deref()),
            Expr::Add(l, r) => arith(ArithOp::Add, self.eval(id, l), self.eval(id, r)),
            Expr::Sub(l, r) => arith(ArithOp::Sub, self.eval(id, l), self.eval(id, r)),
            Expr::Mul(l, r) => arith(ArithOp::Mul, self.eval(id, l), self.eval(id, r)),
            Expr::Div(l, r) => arith(ArithOp::Div, self.eval(id, l), self.eval(id, r)),
            Expr::Neg(e) => negate(self.eval(id, e)),
            Expr::If {
                cond,
                then_expr,
                else_expr,
            } => match self.truth(id, cond) {
                Truth::True => self.eval(id, then_expr),
                Truth::False => self.eval(id, else_expr),
                Truth::Unknown => self.eval(id, then_expr).join(self.eval(id, else_expr)),
            },
            condition => Abstract::from_truth(self.truth(id, condition)),
        }
    }

    fn read(&self, id: InstanceId, name: &str) -> Abstract {
        let Some(cell) = self.cell(id, name) else {
            return Abstract::Unknown;
        };
        if let Some((assumed, value)) = self.assumption {
            if assumed == cell {
                return Abstract::exact(value.clone());
            }
        }
        match self.store.cell(cell) {
            Some(domain) => Abstract::set(domain.values().to_vec()),
            None => Abstract::Unknown,
        }
    }

    fn cell(&self, id: InstanceId, name: &str) -> Option<CellRef> {
        let instance = self.graph.get(id)?;
        let var = self.model.type_def(instance.type_id).variable_index(name)?;
        Some(CellRef::new(id, var))
    }

    fn cardinality(&self, id: InstanceId, type_name: Option<&str>, relation: Option<&str>) -> Abstract {
        let Some(instance) = self.graph.get(id) else {
            return Abstract::Unknown;
        };
        let def = self.model.type_def(instance.type_id);
        let rel = match relation {
            Some(name) => match def.relation_index(name) {
                Some(rel) => Some(rel),
                None => return Abstract::Unknown,
            },
            None => None,
        };
        let ty = match type_name {
            Some(name) => match self.model.type_id(name) {
                Some(ty) => Some(ty),
                None => return Abstract::Unknown,
            },
            None => None,
        };
        let count = self.graph.count_matching(self.model, id, rel, ty);
        Abstract::exact(Value::Int(i64::from(count)))
    }

    fn aggregate(&self, id: InstanceId, func: AggregateFn, relation: &str, var: Option<&str>) -> Abstract {
        let Some(instance) = self.graph.get(id) else {
            return Abstract::Unknown;
        };
        let def = self.model.type_def(instance.type_id);
        let Some(rel) = def.relation_index(relation) else {
            return Abstract::Unknown;
        };
        let count = self.graph.weighted_count(self.model, id, rel);
        if func == AggregateFn::Count {
            return Abstract::exact(Value::Int(i64::from(count)));
        }
        // The relation is not complete yet
        if count < def.relations[rel].min {
            return Abstract::Unknown;
        }
        let Some(var) = var else {
            return Abstract::Unknown;
        };
        let children = self.graph.children(id, rel);
        match func {
            AggregateFn::Sum | AggregateFn::Total => {
                let mut acc = Abstract::exact(Value::Int(0));
                for child in children {
                    let mut value = self.read(*child, var);
                    if func == AggregateFn::Total {
                        let quantity = self.graph.get(*child).map_or(1, |c| c.quantity);
                        value = arith(ArithOp::Mul, value, Abstract::exact(Value::Int(i64::from(quantity))));
                    }
                    acc = arith(ArithOp::Add, acc, value);
                }
                acc
            }
            AggregateFn::Min | AggregateFn::Max => {
                let mut values = children.iter().map(|child| self.read(*child, var));
                let Some(first) = values.next() else {
                    return Abstract::exact(Value::Null);
                };
                values.fold(first, |acc, value| extremum(func, acc, value))
            }
            AggregateFn::Count => Abstract::Unknown,
        }
    }

    /// Cells an expression reads when evaluated on instance `id`.
    pub fn scope_cells(&self, id: InstanceId, expr: &Expr) -> SmallVec<[CellRef; 4]> {
        let mut cells: SmallVec<[CellRef; 4]> = SmallVec::new();
        expr.walk(&mut |node| match node {
            Expr::Var(name) => cells.extend(self.cell(id, name)),
            Expr::Parent { var, level } => {
                if let Some(ancestor) = self.graph.ancestor(id, *level) {
                    cells.extend(self.cell(ancestor, var));
                }
            }
            Expr::Aggregate {
                relation,
                var: Some(var),
                ..
            } => {
                let rel = self
                    .graph
                    .get(id)
                    .and_then(|i| self.model.type_def(i.type_id).relation_index(relation));
                if let Some(rel) = rel {
                    for child in self.graph.children(id, rel) {
                        cells.extend(self.cell(*child, var));
                    }
                }
            }
            _ => {}
        });
        cells.sort();
        cells.dedup();
        cells
    }
}

//! Validation and flattening of a [`Schema`] into a [`Model`].
//!
//! Loading is all-or-nothing: the first violation found aborts the load
//! with a [`SchemaError`] naming the offending declaration.

use std::collections::{BTreeSet, HashMap};
use std::mem::discriminant;
use std::sync::Arc;

use rust_decimal::prelude::*;
use tracing::debug;

use configforge_core::{compare_values, date_from_days, ConstraintRef, Domain, SchemaError, SchemaErrorKind, Value};

use crate::expr::{AggregateFn, Expr};
use crate::model::{
    Constraint, InstancePattern, Model, Relation, Rule, RuleEffect, RuleTarget, SourceRef, TypeDef,
    TypeId, Variable,
};
use crate::schema::{
    ActionClassification, ActionScope, ActionTarget, DomainItem, PrimitiveKind, RangeSpec,
    RelationDef, RelationPattern, RuleAction, RuleDef, Schema, VariableDef,
};

/// Largest enumerated domain accepted unless configured otherwise.
pub const DEFAULT_DOMAIN_LIMIT: usize = 10_000;

type LoadResult<T> = Result<T, SchemaError>;

fn err<T>(kind: SchemaErrorKind, location: impl Into<String>, detail: impl Into<String>) -> LoadResult<T> {
    Err(SchemaError::new(kind, location, detail))
}

impl Model {
    /// Validates and flattens a schema.
    ///
    /// # Example
    ///
    /// ```
    /// use configforge_model::{Model, PrimitiveKind, Schema, TypeDecl, VariableDef};
    ///
    /// let schema = Schema::new("Order").with_type(
    ///     TypeDecl::new("Order")
    ///         .virtual_type()
    ///         .with_variable(VariableDef::new("Color", PrimitiveKind::String).with_values(["red", "blue"])),
    /// );
    /// let model = Model::load(&schema).unwrap();
    /// assert_eq!(model.type_def(model.root()).variables.len(), 1);
    /// ```
    pub fn load(schema: &Schema) -> Result<Model, SchemaError> {
        Self::load_with_limit(schema, DEFAULT_DOMAIN_LIMIT)
    }

    /// Like [`Model::load`], with an explicit cap on enumerated domain size.
    pub fn load_with_limit(schema: &Schema, domain_limit: usize) -> Result<Model, SchemaError> {
        let model = Loader::new(schema, domain_limit).load()?;
        debug!(
            event = "model_loaded",
            root = %model.type_def(model.root).name,
            types = model.types.len(),
        );
        Ok(model)
    }
}

/// Members of a type after inheritance, still in declaration form.
#[derive(Default, Clone)]
struct Flat<'s> {
    variables: Vec<&'s VariableDef>,
    relations: Vec<&'s RelationDef>,
    constraints: Vec<(&'s str, &'s crate::schema::ConstraintDef)>,
    rules: Vec<(&'s str, &'s RuleDef)>,
    group_by: Option<&'s str>,
}

fn override_by_name<T>(list: &mut Vec<T>, item: T, name: impl Fn(&T) -> &str) {
    let key = name(&item).to_string();
    match list.iter().position(|existing| name(existing) == key) {
        Some(pos) => list[pos] = item,
        None => list.push(item),
    }
}

struct Loader<'s> {
    schema: &'s Schema,
    domain_limit: usize,
    by_name: HashMap<Arc<str>, TypeId>,
    parents: Vec<Option<TypeId>>,
}

impl<'s> Loader<'s> {
    fn new(schema: &'s Schema, domain_limit: usize) -> Self {
        Self {
            schema,
            domain_limit,
            by_name: HashMap::new(),
            parents: Vec::new(),
        }
    }

    fn load(mut self) -> LoadResult<Model> {
        self.register_types()?;
        self.check_inheritance()?;

        let flats = self.flatten()?;
        let mut types = self.build_shells(&flats)?;
        self.resolve_relations(&flats, &mut types)?;

        let model_view = Model {
            root: TypeId(0),
            types,
            by_name: self.by_name.clone(),
        };
        let parents_of = possible_parents(&model_view);
        let mut types = model_view.types;

        for id in 0..types.len() {
            let view = Resolver {
                types: &types,
                by_name: &self.by_name,
                parents_of: &parents_of,
                ty: TypeId(id as u32),
            };
            view.check_sources()?;
            let constraints = flats[id]
                .constraints
                .iter()
                .map(|(owner, def)| {
                    let location = format!("{}.{}", types[id].name, def.name);
                    Ok(Constraint {
                        name: ConstraintRef::new(*owner, def.name.clone()),
                        expr: Arc::new(view.resolve_expr(&def.expr, &location)?),
                    })
                })
                .collect::<LoadResult<Vec<_>>>()?;
            let rules = view.resolve_rules(&flats[id].rules)?;
            types[id].constraints = constraints;
            types[id].rules = rules;
        }

        let root = match self.by_name.get(self.schema.root.as_str()) {
            Some(id) => *id,
            None => {
                return err(
                    SchemaErrorKind::UnknownType,
                    "root",
                    format!("root type {} is not declared", self.schema.root),
                )
            }
        };
        if !types[root.index()].is_virtual {
            return err(
                SchemaErrorKind::RootNotVirtual,
                self.schema.root.clone(),
                "the root type must be declared virtual",
            );
        }

        Ok(Model {
            root,
            types,
            by_name: self.by_name,
        })
    }

    fn register_types(&mut self) -> LoadResult<()> {
        for (idx, decl) in self.schema.types.iter().enumerate() {
            let name: Arc<str> = decl.name.as_str().into();
            if self.by_name.insert(name, TypeId(idx as u32)).is_some() {
                return err(
                    SchemaErrorKind::DuplicateType,
                    decl.name.clone(),
                    "type declared more than once",
                );
            }
        }
        for decl in &self.schema.types {
            let parent = match &decl.parent {
                None => None,
                Some(parent) => match self.by_name.get(parent.as_str()) {
                    Some(id) => Some(*id),
                    None => {
                        return err(
                            SchemaErrorKind::UnknownType,
                            decl.name.clone(),
                            format!("parent type {parent} is not declared"),
                        )
                    }
                },
            };
            self.parents.push(parent);
        }
        Ok(())
    }

    fn check_inheritance(&self) -> LoadResult<()> {
        let n = self.parents.len();
        for start in 0..n {
            let mut current = self.parents[start];
            let mut steps = 0;
            while let Some(p) = current {
                steps += 1;
                if p.index() == start || steps > n {
                    return err(
                        SchemaErrorKind::InheritanceCycle,
                        self.schema.types[start].name.clone(),
                        "type inherits from itself",
                    );
                }
                current = self.parents[p.index()];
            }
        }
        Ok(())
    }

    fn depth(&self, idx: usize) -> usize {
        let mut depth = 0;
        let mut current = self.parents[idx];
        while let Some(p) = current {
            depth += 1;
            current = self.parents[p.index()];
        }
        depth
    }

    /// Flattens members parent-first, overriding by name.
    fn flatten(&self) -> LoadResult<Vec<Flat<'s>>> {
        let mut order: Vec<usize> = (0..self.schema.types.len()).collect();
        order.sort_by_key(|&i| (self.depth(i), i));

        let mut flats: Vec<Flat<'s>> = vec![Flat::default(); self.schema.types.len()];
        for idx in order {
            let decl = &self.schema.types[idx];
            check_unique_members(decl)?;

            let mut flat = match self.parents[idx] {
                Some(p) => flats[p.index()].clone(),
                None => Flat::default(),
            };
            for var in &decl.variables {
                override_by_name(&mut flat.variables, var, |v| v.name.as_str());
            }
            for rel in &decl.relations {
                override_by_name(&mut flat.relations, rel, |r| r.name.as_str());
            }
            for constraint in &decl.constraints {
                override_by_name(
                    &mut flat.constraints,
                    (decl.name.as_str(), constraint),
                    |(_, c)| c.name.as_str(),
                );
            }
            for rule in &decl.rules {
                override_by_name(&mut flat.rules, (decl.name.as_str(), rule), |(_, r)| {
                    r.name.as_str()
                });
            }
            if decl.group_by.is_some() {
                flat.group_by = decl.group_by.as_deref();
            }

            if let Some(clash) = flat
                .relations
                .iter()
                .find(|r| flat.variables.iter().any(|v| v.name == r.name))
            {
                return err(
                    SchemaErrorKind::DuplicateMember,
                    format!("{}.{}", decl.name, clash.name),
                    "name used for both a variable and a relation",
                );
            }
            flats[idx] = flat;
        }
        Ok(flats)
    }

    fn build_shells(&self, flats: &[Flat<'s>]) -> LoadResult<Vec<TypeDef>> {
        let mut subtypes: Vec<Vec<TypeId>> = vec![Vec::new(); flats.len()];
        for (idx, parent) in self.parents.iter().enumerate() {
            if let Some(p) = parent {
                subtypes[p.index()].push(TypeId(idx as u32));
            }
        }

        let mut types = Vec::with_capacity(flats.len());
        for (idx, flat) in flats.iter().enumerate() {
            let decl = &self.schema.types[idx];
            let mut ancestors = vec![TypeId(idx as u32)];
            let mut current = self.parents[idx];
            while let Some(p) = current {
                ancestors.push(p);
                current = self.parents[p.index()];
            }

            let variables = flat
                .variables
                .iter()
                .map(|def| build_variable(def, &decl.name, self.domain_limit))
                .collect::<LoadResult<Vec<_>>>()?;
            let var_index: HashMap<Arc<str>, usize> = variables
                .iter()
                .enumerate()
                .map(|(i, v)| (v.name.clone(), i))
                .collect();

            let group_by = match flat.group_by {
                None => None,
                Some(name) => match var_index.get(name) {
                    Some(i) => Some(*i),
                    None => {
                        return err(
                            SchemaErrorKind::UnknownVariable,
                            format!("{}.groupBy", decl.name),
                            format!("no variable {name}"),
                        )
                    }
                },
            };

            types.push(TypeDef {
                id: TypeId(idx as u32),
                name: decl.name.as_str().into(),
                parent: self.parents[idx],
                ancestors,
                subtypes: std::mem::take(&mut subtypes[idx]),
                is_virtual: decl.is_virtual,
                split: decl.split,
                group_by,
                variables,
                relations: Vec::new(),
                constraints: Vec::new(),
                rules: Vec::new(),
                var_index,
                rel_index: HashMap::new(),
            });
        }
        Ok(types)
    }

    fn resolve_relations(&self, flats: &[Flat<'s>], types: &mut [TypeDef]) -> LoadResult<()> {
        for (idx, flat) in flats.iter().enumerate() {
            let mut relations = Vec::with_capacity(flat.relations.len());
            for def in &flat.relations {
                let location = format!("{}.{}", types[idx].name, def.name);
                let Some(&target) = self.by_name.get(def.target.as_str()) else {
                    return err(
                        SchemaErrorKind::UnknownType,
                        location,
                        format!("relation target {} is not declared", def.target),
                    );
                };
                if def.max.is_some_and(|max| max < def.min) {
                    return err(
                        SchemaErrorKind::InvalidCardinality,
                        location,
                        format!("min {} exceeds max {:?}", def.min, def.max),
                    );
                }
                let options = relation_options(types, target, &def.order, &self.by_name, &location)?;
                relations.push(Relation {
                    name: def.name.as_str().into(),
                    target,
                    min: def.min,
                    max: def.max,
                    options,
                    close_relation: def.close_relation,
                    configurable: def.configurable,
                    sequence: def.sequence,
                });
            }
            types[idx].rel_index = relations
                .iter()
                .enumerate()
                .map(|(i, r)| (r.name.clone(), i))
                .collect();
            types[idx].relations = relations;
        }
        Ok(())
    }
}

fn check_unique_members(decl: &crate::schema::TypeDecl) -> LoadResult<()> {
    let mut seen = BTreeSet::new();
    let names = decl
        .variables
        .iter()
        .map(|v| &v.name)
        .chain(decl.relations.iter().map(|r| &r.name));
    for name in names {
        if !seen.insert(name.as_str()) {
            return err(
                SchemaErrorKind::DuplicateMember,
                format!("{}.{}", decl.name, name),
                "member declared more than once",
            );
        }
    }
    let mut seen = BTreeSet::new();
    let names = decl
        .constraints
        .iter()
        .map(|c| &c.name)
        .chain(decl.rules.iter().map(|r| &r.name));
    for name in names {
        if !seen.insert(name.as_str()) {
            return err(
                SchemaErrorKind::DuplicateMember,
                format!("{}.{}", decl.name, name),
                "constraint or rule declared more than once",
            );
        }
    }
    Ok(())
}

/// Leaf types of the target's subtree: the ordering hint first, then
/// declaration order.
fn relation_options(
    types: &[TypeDef],
    target: TypeId,
    order: &[String],
    by_name: &HashMap<Arc<str>, TypeId>,
    location: &str,
) -> LoadResult<Vec<TypeId>> {
    let mut leaves: Vec<TypeId> = types
        .iter()
        .filter(|t| t.is_leaf() && !t.is_virtual && t.ancestors.contains(&target))
        .map(|t| t.id)
        .collect();
    if leaves.is_empty() {
        return err(
            SchemaErrorKind::InvalidCardinality,
            location,
            "relation target has no instantiable type",
        );
    }
    let mut ordered = Vec::with_capacity(leaves.len());
    for name in order {
        let Some(&id) = by_name.get(name.as_str()) else {
            return err(
                SchemaErrorKind::UnknownType,
                location,
                format!("ordering names undeclared type {name}"),
            );
        };
        // A hint may name an intermediate type, which orders its whole subtree
        let mut matched: Vec<TypeId> = leaves
            .iter()
            .copied()
            .filter(|leaf| types[leaf.index()].ancestors.contains(&id))
            .collect();
        if matched.is_empty() && !ordered.iter().any(|o: &TypeId| types[o.index()].ancestors.contains(&id)) {
            return err(
                SchemaErrorKind::InvalidRuleTarget,
                location,
                format!("ordering names {name}, which is not a subtype of the target"),
            );
        }
        leaves.retain(|leaf| !matched.contains(leaf));
        ordered.append(&mut matched);
    }
    ordered.extend(leaves);
    Ok(ordered)
}

/// For each type, the types an instance of it may be a child of.
fn possible_parents(model: &Model) -> Vec<Vec<TypeId>> {
    let mut parents = vec![Vec::new(); model.types.len()];
    for owner in &model.types {
        for rel in &owner.relations {
            for child in &model.types {
                let reachable = rel
                    .options
                    .iter()
                    .any(|opt| model.types[opt.index()].ancestors.contains(&child.id));
                if reachable && !parents[child.id.index()].contains(&owner.id) {
                    parents[child.id.index()].push(owner.id);
                }
            }
        }
    }
    parents
}

fn build_variable(def: &VariableDef, owner: &str, limit: usize) -> LoadResult<Variable> {
    let location = format!("{owner}.{}", def.name);
    let domain = enumerate_domain(def, &location, limit)?;

    let default_value = match &def.default_value {
        None => None,
        Some(raw) => {
            let Some(value) = def.kind.coerce(raw) else {
                return err(
                    SchemaErrorKind::TypeMismatch,
                    location,
                    format!("default {raw} is not a {}", def.kind.name()),
                );
            };
            let fits = match (&value, def.kind) {
                (Value::Multi(items), PrimitiveKind::StringMulti) => items
                    .iter()
                    .all(|item| domain.contains(&Value::Str(item.clone()))),
                _ => domain.is_empty() || domain.contains(&value),
            };
            if !fits {
                return err(
                    SchemaErrorKind::InvalidDomain,
                    location,
                    format!("default {value} is outside the domain"),
                );
            }
            Some(value)
        }
    };

    let sourced = def.source_attribute.is_some();
    if domain.is_empty()
        && def.configurable
        && default_value.is_none()
        && !sourced
        && !def.external
    {
        return err(
            SchemaErrorKind::EmptyDomain,
            location,
            "configurable variable without domain, default or source",
        );
    }

    Ok(Variable {
        name: def.name.as_str().into(),
        kind: def.kind,
        domain,
        configurable: def.configurable,
        default_value,
        domain_computation: def.domain_computation,
        sequence: def.sequence,
        source: def.source_attribute.as_ref().map(|path| SourceRef {
            var: path.var.as_str().into(),
            level: path.level,
        }),
        tag_name: def.tag_name.clone(),
        external: def.external,
    })
}

fn enumerate_domain(def: &VariableDef, location: &str, limit: usize) -> LoadResult<Domain> {
    if def.kind == PrimitiveKind::Boolean && def.domain.is_empty() {
        return Ok(Domain::boolean());
    }
    let mut values = Vec::new();
    for item in &def.domain {
        match item {
            DomainItem::Value(raw) => match def.kind.coerce_option(raw) {
                Some(v) => values.push(v),
                None => {
                    return err(
                        SchemaErrorKind::TypeMismatch,
                        location,
                        format!("{raw} is not a {}", def.kind.name()),
                    )
                }
            },
            DomainItem::Range(range) => {
                let budget = limit.saturating_sub(values.len());
                values.extend(enumerate_range(def.kind, range, location, budget, limit)?);
            }
        }
        if values.len() > limit {
            return err(
                SchemaErrorKind::DomainTooLarge,
                location,
                format!("more than {limit} values"),
            );
        }
    }
    // Every subset of the options is a candidate selection
    let selections_fit = values.len() < usize::BITS as usize && 1usize << values.len() <= limit;
    if def.kind == PrimitiveKind::StringMulti && !selections_fit {
        return err(
            SchemaErrorKind::DomainTooLarge,
            location,
            format!("{} options make more than {limit} selections", values.len()),
        );
    }
    Ok(Domain::new(values))
}

fn enumerate_range(
    kind: PrimitiveKind,
    range: &RangeSpec,
    location: &str,
    budget: usize,
    limit: usize,
) -> LoadResult<Vec<Value>> {
    let mismatch = |what: &Value| {
        SchemaError::new(
            SchemaErrorKind::TypeMismatch,
            location,
            format!("range bound {what} is not a {}", kind.name()),
        )
    };
    if matches!(
        kind,
        PrimitiveKind::Boolean | PrimitiveKind::String | PrimitiveKind::StringMulti
    ) {
        return err(
            SchemaErrorKind::InvalidDomain,
            location,
            format!("ranges are not defined for {}", kind.name()),
        );
    }
    let min = kind.coerce(&range.min).filter(|v| !v.is_null()).ok_or_else(|| mismatch(&range.min))?;
    let max = kind.coerce(&range.max).filter(|v| !v.is_null()).ok_or_else(|| mismatch(&range.max))?;
    if compare_values(&min, &max) == Some(std::cmp::Ordering::Greater) {
        return err(
            SchemaErrorKind::InvalidDomain,
            location,
            format!("empty range {min}..{max}"),
        );
    }
    let step = match &range.step {
        Some(step) => step.clone(),
        None => kind.default_step().ok_or_else(|| mismatch(&range.min))?,
    };
    let positive = step.as_f64().is_some_and(|s| s > 0.0);
    if !positive || (matches!(kind, PrimitiveKind::Int | PrimitiveKind::Date) && step.as_i64().is_none()) {
        return err(
            SchemaErrorKind::InvalidDomain,
            location,
            format!("range step {step} must be positive"),
        );
    }
    let too_large = || {
        SchemaError::new(
            SchemaErrorKind::DomainTooLarge,
            location,
            format!("more than {limit} values"),
        )
    };

    let values = match kind {
        PrimitiveKind::Int | PrimitiveKind::Date => {
            let (lo, hi) = (
                min.as_i64().ok_or_else(|| mismatch(&min))?,
                max.as_i64().ok_or_else(|| mismatch(&max))?,
            );
            let step = step.as_i64().ok_or_else(|| mismatch(&step))?;
            let count = (i128::from(hi) - i128::from(lo)) / i128::from(step) + 1;
            if count > budget as i128 {
                return Err(too_large());
            }
            let mut values = Vec::with_capacity(count as usize);
            for i in 0..count as i64 {
                let v = lo + i * step;
                values.push(match kind {
                    PrimitiveKind::Date => Value::Date(date_from_days(v).ok_or_else(|| mismatch(&max))?),
                    _ => Value::Int(v),
                });
            }
            values
        }
        PrimitiveKind::Decimal(scale) => {
            let (lo, hi) = (
                min.as_decimal().ok_or_else(|| mismatch(&min))?,
                max.as_decimal().ok_or_else(|| mismatch(&max))?,
            );
            let step = step.as_decimal().ok_or_else(|| mismatch(&step))?;
            let count = hi
                .checked_sub(lo)
                .and_then(|span| span.checked_div(step))
                .and_then(|steps| steps.floor().to_u64())
                .filter(|steps| *steps < budget as u64)
                .ok_or_else(too_large)?
                + 1;
            (0..count)
                .map(|i| Value::Decimal((lo + step * Decimal::from(i)).round_dp(scale)))
                .collect()
        }
        PrimitiveKind::Double(scale) => {
            let (lo, hi) = (
                min.as_f64().ok_or_else(|| mismatch(&min))?,
                max.as_f64().ok_or_else(|| mismatch(&max))?,
            );
            let step = step.as_f64().ok_or_else(|| mismatch(&step))?;
            let steps = ((hi - lo) / step + 1e-9).floor();
            if !steps.is_finite() || steps >= budget as f64 {
                return Err(too_large());
            }
            let count = steps as u64 + 1;
            let factor = 10f64.powi(scale as i32);
            (0..count)
                .map(|i| Value::Double(((lo + step * i as f64) * factor).round() / factor))
                .collect()
        }
        PrimitiveKind::Boolean | PrimitiveKind::String | PrimitiveKind::StringMulti => Vec::new(),
    };
    Ok(values)
}

/// Resolves names inside one flattened type.
struct Resolver<'a> {
    types: &'a [TypeDef],
    by_name: &'a HashMap<Arc<str>, TypeId>,
    parents_of: &'a [Vec<TypeId>],
    ty: TypeId,
}

impl Resolver<'_> {
    fn def(&self) -> &TypeDef {
        &self.types[self.ty.index()]
    }

    fn location(&self, member: &str) -> String {
        format!("{}.{}", self.def().name, member)
    }

    /// Types an instance may have `level` steps up.
    fn ancestors_at(&self, level: u32) -> Vec<TypeId> {
        let mut current = vec![self.ty];
        for _ in 0..level {
            let mut next = Vec::new();
            for t in &current {
                for p in &self.parents_of[t.index()] {
                    if !next.contains(p) {
                        next.push(*p);
                    }
                }
            }
            current = next;
        }
        current
    }

    /// Kind of `var` as seen `level` steps up.
    fn kind_at(&self, var: &str, level: u32, location: &str) -> LoadResult<PrimitiveKind> {
        let kinds: Vec<PrimitiveKind> = self
            .ancestors_at(level)
            .iter()
            .filter_map(|t| self.types[t.index()].variable(var).map(|v| v.kind))
            .collect();
        match kinds.first() {
            Some(kind) => Ok(*kind),
            None => err(
                SchemaErrorKind::UnknownVariable,
                location,
                format!("no variable {var} at level {level}"),
            ),
        }
    }

    fn check_sources(&self) -> LoadResult<()> {
        let def = self.def();
        for var in &def.variables {
            let Some(source) = &var.source else { continue };
            let location = self.location(&var.name);
            let kind = self.kind_at(&source.var, source.level, &location)?;
            if discriminant(&kind) != discriminant(&var.kind) {
                return err(
                    SchemaErrorKind::TypeMismatch,
                    location,
                    format!("source {} is a {}, not a {}", source.var, kind.name(), var.kind.name()),
                );
            }
        }
        // Same-instance sources must not loop
        for (start, var) in def.variables.iter().enumerate() {
            let mut current = var.source.as_ref();
            let mut steps = 0;
            while let Some(source) = current.filter(|s| s.level == 0) {
                let Some(next) = def.variable_index(&source.var) else { break };
                steps += 1;
                if next == start || steps > def.variables.len() {
                    return err(
                        SchemaErrorKind::SourceCycle,
                        self.location(&var.name),
                        "source attributes form a cycle",
                    );
                }
                current = def.variables[next].source.as_ref();
            }
        }
        Ok(())
    }

    /// Statically known kind of an expression, used to coerce literals.
    fn static_kind(&self, expr: &Expr) -> Option<PrimitiveKind> {
        match expr {
            Expr::Var(name) => self.def().variable(name).map(|v| v.kind),
            Expr::Parent { var, level } => self.kind_at(var, *level, "").ok(),
            Expr::Aggregate {
                func: AggregateFn::Min | AggregateFn::Max,
                relation,
                var: Some(var),
            } => {
                let rel = self.def().relation(relation)?;
                self.types[rel.target.index()].variable(var).map(|v| v.kind)
            }
            _ => None,
        }
    }

    fn coerce_literal(&self, kind: Option<PrimitiveKind>, value: &Value, location: &str) -> LoadResult<Value> {
        let Some(kind) = kind else {
            return Ok(value.clone());
        };
        let coerced = match kind {
            PrimitiveKind::StringMulti => kind.coerce_option(value).or_else(|| kind.coerce(value)),
            // Comparisons between numeric kinds need no conversion
            PrimitiveKind::Int if value.is_numeric() => Some(value.clone()),
            _ => kind.coerce(value),
        };
        coerced.ok_or_else(|| {
            SchemaError::new(
                SchemaErrorKind::TypeMismatch,
                location,
                format!("literal {value} cannot be compared with a {}", kind.name()),
            )
        })
    }

    fn resolve_pair(&self, l: &Expr, r: &Expr, location: &str) -> LoadResult<(Box<Expr>, Box<Expr>)> {
        let (lk, rk) = (self.static_kind(l), self.static_kind(r));
        let left = match l {
            Expr::Literal(v) => Expr::Literal(self.coerce_literal(rk, v, location)?),
            other => self.resolve_expr(other, location)?,
        };
        let right = match r {
            Expr::Literal(v) => Expr::Literal(self.coerce_literal(lk, v, location)?),
            other => self.resolve_expr(other, location)?,
        };
        Ok((Box::new(left), Box::new(right)))
    }

    /// Checks every name in the expression and coerces literals compared
    /// with typed variables.
    fn resolve_expr(&self, expr: &Expr, location: &str) -> LoadResult<Expr> {
        let def = self.def();
        let resolved = match expr {
            Expr::Literal(_) | Expr::Quantity => expr.clone(),
            Expr::Var(name) => {
                if def.variable_index(name).is_none() {
                    return err(
                        SchemaErrorKind::UnknownVariable,
                        location,
                        format!("{} has no variable {name}", def.name),
                    );
                }
                expr.clone()
            }
            Expr::Parent { var, level } => {
                if *level == 0 {
                    return self.resolve_expr(&Expr::Var(var.clone()), location);
                }
                self.kind_at(var, *level, location)?;
                expr.clone()
            }
            Expr::Cardinality {
                type_name,
                relation,
            } => {
                if let Some(name) = type_name {
                    if !self.by_name.contains_key(name.as_str()) {
                        return err(
                            SchemaErrorKind::UnknownType,
                            location,
                            format!("cardinality over undeclared type {name}"),
                        );
                    }
                }
                if let Some(rel) = relation {
                    if def.relation_index(rel).is_none() {
                        return err(
                            SchemaErrorKind::UnknownRelation,
                            location,
                            format!("{} has no relation {rel}", def.name),
                        );
                    }
                }
                expr.clone()
            }
            Expr::Aggregate {
                func,
                relation,
                var,
            } => {
                let Some(rel) = def.relation(relation) else {
                    return err(
                        SchemaErrorKind::UnknownRelation,
                        location,
                        format!("{} has no relation {relation}", def.name),
                    );
                };
                if *func != AggregateFn::Count {
                    let target = &self.types[rel.target.index()];
                    let known = var.as_deref().and_then(|v| target.variable(v));
                    if known.is_none() {
                        return err(
                            SchemaErrorKind::UnknownVariable,
                            location,
                            format!("{} has no variable {:?}", target.name, var),
                        );
                    }
                }
                expr.clone()
            }
            Expr::Not(e) => Expr::Not(Box::new(self.resolve_expr(e, location)?)),
            Expr::Neg(e) => Expr::Neg(Box::new(self.resolve_expr(e, location)?)),
            Expr::And(l, r) => Expr::And(
                Box::new(self.resolve_expr(l, location)?),
                Box::new(self.resolve_expr(r, location)?),
            ),
            Expr::Or(l, r) => Expr::Or(
                Box::new(self.resolve_expr(l, location)?),
                Box::new(self.resolve_expr(r, location)?),
            ),
            Expr::Implies(l, r) => Expr::Implies(
                Box::new(self.resolve_expr(l, location)?),
                Box::new(self.resolve_expr(r, location)?),
            ),
            Expr::Eq(l, r) => {
                let (l, r) = self.resolve_pair(l, r, location)?;
                Expr::Eq(l, r)
            }
            Expr::Ne(l, r) => {
                let (l, r) = self.resolve_pair(l, r, location)?;
                Expr::Ne(l, r)
            }
            Expr::Lt(l, r) => {
                let (l, r) = self.resolve_pair(l, r, location)?;
                Expr::Lt(l, r)
            }
            Expr::Le(l, r) => {
                let (l, r) = self.resolve_pair(l, r, location)?;
                Expr::Le(l, r)
            }
            Expr::Gt(l, r) => {
                let (l, r) = self.resolve_pair(l, r, location)?;
                Expr::Gt(l, r)
            }
            Expr::Ge(l, r) => {
                let (l, r) = self.resolve_pair(l, r, location)?;
                Expr::Ge(l, r)
            }
            Expr::Add(l, r) => Expr::Add(
                Box::new(self.resolve_expr(l, location)?),
                Box::new(self.resolve_expr(r, location)?),
            ),
            Expr::Sub(l, r) => Expr::Sub(
                Box::new(self.resolve_expr(l, location)?),
                Box::new(self.resolve_expr(r, location)?),
            ),
            Expr::Mul(l, r) => Expr::Mul(
                Box::new(self.resolve_expr(l, location)?),
                Box::new(self.resolve_expr(r, location)?),
            ),
            Expr::Div(l, r) => Expr::Div(
                Box::new(self.resolve_expr(l, location)?),
                Box::new(self.resolve_expr(r, location)?),
            ),
            Expr::In(e, list) => {
                let kind = self.static_kind(e);
                let list = list
                    .iter()
                    .map(|v| self.coerce_literal(kind, v, location))
                    .collect::<LoadResult<Vec<_>>>()?;
                Expr::In(Box::new(self.resolve_expr(e, location)?), list)
            }
            Expr::Contains(e, option) => {
                Expr::Contains(Box::new(self.resolve_expr(e, location)?), option.clone())
            }
            Expr::If {
                cond,
                then_expr,
                else_expr,
            } => Expr::If {
                cond: Box::new(self.resolve_expr(cond, location)?),
                then_expr: Box::new(self.resolve_expr(then_expr, location)?),
                else_expr: Box::new(self.resolve_expr(else_expr, location)?),
            },
        };
        Ok(resolved)
    }

    fn resolve_rules(&self, rules: &[(&str, &RuleDef)]) -> LoadResult<Vec<Rule>> {
        let mut resolved = Vec::with_capacity(rules.len());
        for (declaration, (owner, def)) in rules.iter().enumerate() {
            let location = self.location(&def.name);
            let condition = Arc::new(self.resolve_expr(&def.condition, &location)?);
            let (effect, target_sequence) = self.resolve_action(&def.action, &location)?;
            resolved.push(Rule {
                name: ConstraintRef::new(*owner, def.name.clone()),
                condition,
                effect,
                sequence: def.sequence.unwrap_or(target_sequence),
                declaration,
            });
        }
        self.check_rule_conflicts(&resolved)?;
        resolved.sort_by_key(Rule::order_key);
        Ok(resolved)
    }

    fn check_rule_conflicts(&self, rules: &[Rule]) -> LoadResult<()> {
        for (i, a) in rules.iter().enumerate() {
            for b in &rules[i + 1..] {
                if a.sequence != b.sequence {
                    continue;
                }
                let contradictory = match (&a.effect, &b.effect) {
                    (
                        RuleEffect::Visibility { hide: ha, target: ta },
                        RuleEffect::Visibility { hide: hb, target: tb },
                    ) => ha != hb && ta == tb,
                    (
                        RuleEffect::Enablement { disable: da, target: ta },
                        RuleEffect::Enablement { disable: db, target: tb },
                    ) => da != db && ta == tb,
                    _ => false,
                };
                if contradictory {
                    return err(
                        SchemaErrorKind::RuleConflict,
                        self.location(&b.name.name),
                        format!(
                            "contradicts rule {} on the same target with equal sequence {}",
                            a.name, a.sequence
                        ),
                    );
                }
            }
        }
        Ok(())
    }

    fn resolve_action(&self, action: &RuleAction, location: &str) -> LoadResult<(RuleEffect, i32)> {
        let resolved = match action {
            RuleAction::Hide(target) | RuleAction::Show(target) => {
                let (target, sequence) = self.resolve_target(target, location)?;
                let hide = matches!(action, RuleAction::Hide(_));
                (RuleEffect::Visibility { hide, target }, sequence)
            }
            RuleAction::Disable(target) | RuleAction::Enable(target) => {
                let (target, sequence) = self.resolve_target(target, location)?;
                let disable = matches!(action, RuleAction::Disable(_));
                (RuleEffect::Enablement { disable, target }, sequence)
            }
            RuleAction::Require(pattern) => {
                let (pattern, sequence) = self.resolve_pattern(pattern, location, true)?;
                (RuleEffect::Require(pattern), sequence)
            }
            RuleAction::Exclude(pattern) => {
                let (pattern, sequence) = self.resolve_pattern(pattern, location, false)?;
                (RuleEffect::Exclude(pattern), sequence)
            }
            RuleAction::Message { severity, text } => (
                RuleEffect::Message {
                    severity: *severity,
                    text: text.clone(),
                },
                i32::MAX,
            ),
            RuleAction::Preference { score } => (RuleEffect::Preference { score: *score }, i32::MAX),
        };
        Ok(resolved)
    }

    fn resolve_target(&self, target: &ActionTarget, location: &str) -> LoadResult<(RuleTarget, i32)> {
        let def = self.def();
        let var = match target.scope {
            ActionScope::Attribute => def.variable_index(&target.target),
            ActionScope::Relation => None,
        };
        if let Some(var) = var {
            let variable = &def.variables[var];
            let value = match (target.classification, &target.value_target) {
                (None, _) => None,
                (Some(ActionClassification::Value), Some(raw)) => {
                    let value = variable.kind.coerce_option(raw).ok_or_else(|| {
                        SchemaError::new(
                            SchemaErrorKind::TypeMismatch,
                            location,
                            format!("{raw} is not a {}", variable.kind.name()),
                        )
                    })?;
                    if !variable.domain.is_empty() && !variable.domain.contains(&value) {
                        return err(
                            SchemaErrorKind::InvalidRuleTarget,
                            location,
                            format!("{value} is not in the domain of {}", variable.name),
                        );
                    }
                    Some(value)
                }
                _ => {
                    return err(
                        SchemaErrorKind::InvalidRuleTarget,
                        location,
                        "attribute targets can only be narrowed by value",
                    )
                }
            };
            return Ok((RuleTarget::Variable { var, value }, variable.sequence));
        }

        let Some(rel) = def.relation_index(&target.target) else {
            let kind = match target.scope {
                ActionScope::Attribute => SchemaErrorKind::UnknownVariable,
                ActionScope::Relation => SchemaErrorKind::UnknownRelation,
            };
            return err(kind, location, format!("{} has no member {}", def.name, target.target));
        };
        let relation = &def.relations[rel];
        let type_name = match target.classification {
            None => None,
            Some(ActionClassification::Type) => target.type_target.as_deref(),
            Some(ActionClassification::Value) => target.value_target.as_ref().and_then(Value::as_str),
        };
        let option = match (target.classification, type_name) {
            (None, _) => None,
            (Some(_), None) => {
                return err(
                    SchemaErrorKind::InvalidRuleTarget,
                    location,
                    "relation narrowing must name a type",
                )
            }
            (Some(_), Some(name)) => {
                let Some(&id) = self.by_name.get(name) else {
                    return err(SchemaErrorKind::UnknownType, location, format!("undeclared type {name}"));
                };
                if !self.types[id.index()].ancestors.contains(&relation.target) {
                    return err(
                        SchemaErrorKind::InvalidRuleTarget,
                        location,
                        format!("{name} cannot be a child of relation {}", relation.name),
                    );
                }
                Some(id)
            }
        };
        Ok((RuleTarget::Relation { rel, option }, relation.sequence))
    }

    fn resolve_pattern(
        &self,
        pattern: &RelationPattern,
        location: &str,
        require: bool,
    ) -> LoadResult<(InstancePattern, i32)> {
        let def = self.def();
        let Some(rel) = def.relation_index(&pattern.relation) else {
            return err(
                SchemaErrorKind::UnknownRelation,
                location,
                format!("{} has no relation {}", def.name, pattern.relation),
            );
        };
        let relation = &def.relations[rel];
        let Some(&type_id) = self.by_name.get(pattern.type_name.as_str()) else {
            return err(
                SchemaErrorKind::UnknownType,
                location,
                format!("undeclared type {}", pattern.type_name),
            );
        };
        let ty = &self.types[type_id.index()];
        if !ty.ancestors.contains(&relation.target) {
            return err(
                SchemaErrorKind::InvalidRuleTarget,
                location,
                format!("{} cannot be a child of relation {}", ty.name, relation.name),
            );
        }
        if require {
            if relation.close_relation {
                return err(
                    SchemaErrorKind::RequireIntoClosedRelation,
                    location,
                    format!("relation {} is closed after resolution", relation.name),
                );
            }
            if !relation.options.contains(&type_id) {
                return err(
                    SchemaErrorKind::InvalidRuleTarget,
                    location,
                    format!("{} is not instantiable", ty.name),
                );
            }
        }
        let assignments = pattern
            .assignments
            .iter()
            .map(|(name, raw)| {
                let Some(idx) = ty.variable_index(name) else {
                    return err(
                        SchemaErrorKind::UnknownVariable,
                        location,
                        format!("{} has no variable {name}", ty.name),
                    );
                };
                let kind = ty.variables[idx].kind;
                match kind.coerce(raw) {
                    Some(value) => Ok((idx, value)),
                    None => err(
                        SchemaErrorKind::TypeMismatch,
                        location,
                        format!("{raw} is not a {}", kind.name()),
                    ),
                }
            })
            .collect::<LoadResult<Vec<_>>>()?;
        Ok((
            InstancePattern {
                relation: rel,
                type_id,
                assignments,
            },
            relation.sequence,
        ))
    }
}

//! The domain store: current and base domains of every cell.

use std::collections::BTreeMap;
use std::sync::Arc;

use configforge_core::{CellRef, Domain, InstanceId, Value};
use configforge_model::{Model, TypeDef, TypeId, Variable};

use crate::graph::InstanceGraph;

/// Values supplied by the context provider, keyed by the declaring type and
/// variable index. Variable indices are stable across inheritance, so one
/// entry covers every subtype.
pub type ExternalValues = BTreeMap<(TypeId, usize), Value>;

/// Per-instance variable domains.
///
/// `base` is what a cell resets to: the declared domain narrowed by context
/// values, source attributes and pinned values. `cells` is the working
/// domain narrowed by assignments, propagation and search.
#[derive(Debug, Clone, Default)]
pub struct DomainStore {
    cells: Vec<Vec<Domain>>,
    base: Vec<Vec<Domain>>,
}

impl DomainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes base domains for every variable of `id` and resets its
    /// cells to them. Ancestors must already be initialized.
    pub fn init_instance(
        &mut self,
        model: &Model,
        graph: &InstanceGraph,
        id: InstanceId,
        externals: &ExternalValues,
    ) {
        let Some(instance) = graph.get(id) else {
            return;
        };
        let def = model.type_def(instance.type_id);
        let mut bases: Vec<Option<Domain>> = vec![None; def.variables.len()];
        for var in 0..def.variables.len() {
            self.resolve_base(model, graph, id, def, var, externals, &mut bases, 0);
        }
        let mut bases: Vec<Domain> = bases.into_iter().map(Option::unwrap_or_default).collect();
        for (var, value) in &instance.pinned {
            if let Some(base) = bases.get_mut(*var) {
                match admit(&def.variables[*var], base, value) {
                    Some(value) => *base = Domain::singleton(value),
                    None => {
                        base.retain(|_| false);
                    }
                }
            }
        }

        let index = id.index();
        if self.cells.len() <= index {
            self.cells.resize_with(index + 1, Vec::new);
            self.base.resize_with(index + 1, Vec::new);
        }
        self.cells[index] = bases.clone();
        self.base[index] = bases;
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_base(
        &self,
        model: &Model,
        graph: &InstanceGraph,
        id: InstanceId,
        def: &TypeDef,
        var: usize,
        externals: &ExternalValues,
        bases: &mut Vec<Option<Domain>>,
        depth: usize,
    ) -> Domain {
        if let Some(done) = &bases[var] {
            return done.clone();
        }
        let variable = &def.variables[var];
        let declared = declared_domain(variable);

        let external = def
            .ancestors
            .iter()
            .find_map(|ty| externals.get(&(*ty, var)));
        let domain = if let Some(value) = external {
            Domain::singleton(value.clone())
        } else if let Some(sourced) = variable.source.as_ref().and_then(|source| {
            if source.level == 0 {
                let idx = def.variable_index(&source.var)?;
                if depth > def.variables.len() {
                    return None;
                }
                Some(self.resolve_base(model, graph, id, def, idx, externals, bases, depth + 1))
            } else {
                let ancestor = graph.ancestor(id, source.level)?;
                let ty = graph.get(ancestor)?.type_id;
                let idx = model.type_def(ty).variable_index(&source.var)?;
                let cell = CellRef::new(ancestor, idx);
                if variable.domain_computation {
                    self.base(cell).cloned()
                } else {
                    self.cell(cell).cloned()
                }
            }
        }) {
            let mut sourced = sourced;
            if !variable.domain.is_empty() {
                sourced.restrict_to(&declared);
            }
            sourced
        } else {
            match &variable.default_value {
                Some(default) if !variable.configurable => Domain::singleton(default.clone()),
                _ if !declared.is_empty() => declared,
                Some(default) => Domain::singleton(default.clone()),
                None => Domain::singleton(Value::Null),
            }
        };
        bases[var] = Some(domain.clone());
        domain
    }

    pub fn cell(&self, cell: CellRef) -> Option<&Domain> {
        self.cells.get(cell.instance.index())?.get(cell.var)
    }

    pub fn cell_mut(&mut self, cell: CellRef) -> Option<&mut Domain> {
        self.cells.get_mut(cell.instance.index())?.get_mut(cell.var)
    }

    /// The domain the cell resets to.
    pub fn base(&self, cell: CellRef) -> Option<&Domain> {
        self.base.get(cell.instance.index())?.get(cell.var)
    }

    /// The cell's value, once its domain is a singleton.
    pub fn value(&self, cell: CellRef) -> Option<&Value> {
        self.cell(cell)?.single()
    }

    /// Working domains of one instance, by variable index.
    pub fn domains(&self, id: InstanceId) -> &[Domain] {
        self.cells.get(id.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Cells of one instance.
    pub fn cells_of(&self, id: InstanceId) -> impl Iterator<Item = CellRef> + '_ {
        (0..self.domains(id).len()).map(move |var| CellRef::new(id, var))
    }

    /// Resets a cell to its base domain. Returns true if it changed.
    pub fn reset_cell(&mut self, cell: CellRef) -> bool {
        let Some(base) = self.base(cell).cloned() else {
            return false;
        };
        match self.cell_mut(cell) {
            Some(domain) if *domain != base => {
                *domain = base;
                true
            }
            _ => false,
        }
    }

    /// Collapses a cell to a user-supplied value. Returns false, leaving
    /// the cell untouched, if the base domain does not admit the value.
    pub fn assign(&mut self, model: &Model, graph: &InstanceGraph, cell: CellRef, value: &Value) -> bool {
        let Some(variable) = graph
            .get(cell.instance)
            .and_then(|i| model.type_def(i.type_id).variables.get(cell.var))
        else {
            return false;
        };
        let Some(admitted) = self.base(cell).and_then(|base| admit(variable, base, value)) else {
            return false;
        };
        match self.cell_mut(cell) {
            Some(domain) => {
                domain.collapse_to(&admitted);
                true
            }
            None => false,
        }
    }

    /// Drops the domains of removed instances.
    pub fn remove_instance(&mut self, id: InstanceId) {
        if let Some(cells) = self.cells.get_mut(id.index()) {
            cells.clear();
        }
        if let Some(base) = self.base.get_mut(id.index()) {
            base.clear();
        }
    }
}

/// The declared domain as a cell domain. For `string_multi` variables the
/// cell holds candidate selections: the default selection, then every
/// subset of the options by increasing size, in declaration order.
pub fn declared_domain(variable: &Variable) -> Domain {
    if !variable.is_multi() {
        return variable.domain.clone();
    }
    let options: Vec<&Arc<str>> = variable
        .domain
        .iter()
        .filter_map(|v| match v {
            Value::Str(s) => Some(s),
            _ => None,
        })
        .collect();
    let default: Vec<_> = variable
        .default_value
        .as_ref()
        .and_then(Value::as_multi)
        .map(|items| items.iter().filter(|item| options.contains(item)).cloned().collect())
        .unwrap_or_default();
    // The loader bounds the option count, so the masks fit
    let mut masks: Vec<u64> = (0..1u64 << options.len().min(63)).collect();
    masks.sort_by_key(|mask| mask.count_ones());
    let subsets = masks.into_iter().map(|mask| {
        Value::Multi(
            options
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, item)| (*item).clone())
                .collect(),
        )
    });
    Domain::new(std::iter::once(Value::Multi(default)).chain(subsets))
}

/// The value a cell with `base` takes when `value` is assigned to it, in
/// the domain's own representation.
fn admit(variable: &Variable, base: &Domain, value: &Value) -> Option<Value> {
    if let Some(found) = base.iter().find(|v| *v == value) {
        return Some(found.clone());
    }
    if variable.is_multi() {
        // Any subset of the options is a valid selection
        let items = value.as_multi()?;
        let within = items
            .iter()
            .all(|item| variable.domain.contains(&Value::Str(item.clone())));
        return within.then(|| value.clone());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Origin;
    use configforge_model::{PrimitiveKind, Schema, TypeDecl, VariableDef};
    use configforge_test::{laptop_model, workstation_model};

    #[test]
    fn test_init_root_domains() {
        let model = laptop_model();
        let graph = InstanceGraph::instantiate_root(&model);
        let mut store = DomainStore::new();
        store.init_instance(&model, &graph, InstanceId::ROOT, &ExternalValues::new());

        let display = CellRef::new(InstanceId::ROOT, 0);
        assert_eq!(
            store.cell(display).unwrap().values(),
            &[Value::str("hd"), Value::str("4k")]
        );
        assert_eq!(store.value(display), None);
    }

    #[test]
    fn test_external_value_is_singleton() {
        let model = workstation_model();
        let graph = InstanceGraph::instantiate_root(&model);
        let mut externals = ExternalValues::new();
        let (ty, var) = model.resolve_tag("profile").unwrap();
        externals.insert((ty, var), Value::str("quiet"));

        let mut store = DomainStore::new();
        store.init_instance(&model, &graph, InstanceId::ROOT, &externals);
        assert_eq!(
            store.value(CellRef::new(InstanceId::ROOT, var)),
            Some(&Value::str("quiet"))
        );
    }

    #[test]
    fn test_non_configurable_without_domain_is_null() {
        let model = laptop_model();
        let bays = model.type_def(model.root()).relation_index("Bays").unwrap();
        let ssd = model.type_id("Ssd").unwrap();
        let mut graph = InstanceGraph::instantiate_root(&model);
        let ids = graph
            .place(&model, InstanceId::ROOT, bays, ssd, 1, Origin::User)
            .unwrap();

        let mut store = DomainStore::new();
        store.init_instance(&model, &graph, InstanceId::ROOT, &ExternalValues::new());
        store.init_instance(&model, &graph, ids[0], &ExternalValues::new());
        assert_eq!(store.value(CellRef::new(ids[0], 0)), Some(&Value::Int(512)));
    }

    #[test]
    fn test_assign_and_reset() {
        let model = laptop_model();
        let graph = InstanceGraph::instantiate_root(&model);
        let mut store = DomainStore::new();
        store.init_instance(&model, &graph, InstanceId::ROOT, &ExternalValues::new());
        let display = CellRef::new(InstanceId::ROOT, 0);

        assert!(store.assign(&model, &graph, display, &Value::str("4k")));
        assert_eq!(store.value(display), Some(&Value::str("4k")));
        assert!(!store.assign(&model, &graph, display, &Value::str("8k")));

        assert!(store.reset_cell(display));
        assert_eq!(store.cell(display).unwrap().len(), 2);
        assert!(!store.reset_cell(display));
    }

    fn sourced_schema() -> Schema {
        Schema::new("Desk")
            .with_type(
                TypeDecl::new("Desk")
                    .virtual_type()
                    .with_variable(
                        VariableDef::new("Finish", PrimitiveKind::String)
                            .with_values(["oak", "ash", "walnut"]),
                    )
                    .with_variable(
                        VariableDef::new("Edge", PrimitiveKind::String)
                            .with_values(["oak", "ash"])
                            .with_source("Finish", 0, true),
                    )
                    .with_variable(
                        VariableDef::new("Extras", PrimitiveKind::StringMulti)
                            .with_values(["lamp", "drawer", "shelf"])
                            .with_default(Value::multi(["drawer"])),
                    ),
            )
    }

    #[test]
    fn test_source_attribute_intersects_declared_domain() {
        let model = configforge_model::Model::load(&sourced_schema()).unwrap();
        let graph = InstanceGraph::instantiate_root(&model);
        let mut store = DomainStore::new();
        store.init_instance(&model, &graph, InstanceId::ROOT, &ExternalValues::new());

        assert_eq!(
            store.cell(CellRef::new(InstanceId::ROOT, 1)).unwrap().values(),
            &[Value::str("oak"), Value::str("ash")]
        );
    }

    #[test]
    fn test_multi_candidates_and_assignment() {
        let model = configforge_model::Model::load(&sourced_schema()).unwrap();
        let graph = InstanceGraph::instantiate_root(&model);
        let mut store = DomainStore::new();
        store.init_instance(&model, &graph, InstanceId::ROOT, &ExternalValues::new());
        let extras = CellRef::new(InstanceId::ROOT, 2);

        let selections = store.cell(extras).unwrap().values();
        assert_eq!(selections.len(), 8);
        assert_eq!(
            &selections[..5],
            &[
                Value::multi(["drawer"]),
                Value::multi(Vec::<&str>::new()),
                Value::multi(["lamp"]),
                Value::multi(["shelf"]),
                Value::multi(["lamp", "drawer"]),
            ]
        );
        assert_eq!(selections[7], Value::multi(["lamp", "drawer", "shelf"]));
        assert!(store.assign(&model, &graph, extras, &Value::multi(["shelf", "lamp"])));
        assert_eq!(store.value(extras), Some(&Value::multi(["lamp", "shelf"])));
        assert!(!store.assign(&model, &graph, extras, &Value::multi(["bin"])));
    }
}

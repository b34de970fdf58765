//! The complete mutable state of one configuration.

use std::collections::BTreeSet;
use std::sync::Arc;

use configforge_core::{CellRef, InstanceId};
use configforge_model::{Model, TypeId};

use crate::deps::{Component, DependencyGraph};
use crate::graph::{InstanceGraph, Origin};
use crate::outcome::Unmet;
use crate::store::{DomainStore, ExternalValues};

/// Instance graph, domains and dependency edges, cloned as a unit for
/// search snapshots and for restoring the last consistent state.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub graph: InstanceGraph,
    pub store: DomainStore,
    pub deps: Arc<DependencyGraph>,
    pub externals: Arc<ExternalValues>,
    /// Options removed by firing exclude or option-disabling rules: owner,
    /// relation, type.
    pub excluded: BTreeSet<(InstanceId, usize, TypeId)>,
    /// Options search has refused on the current branch.
    pub refused: BTreeSet<(InstanceId, usize, TypeId)>,
}

impl Configuration {
    /// Instantiates the root, expands eager relations and initializes
    /// every domain.
    pub fn build(model: &Model, externals: ExternalValues) -> Self {
        let mut graph = InstanceGraph::instantiate_root(model);
        graph.expand_all(model, InstanceId::ROOT);
        let mut config = Self {
            graph,
            store: DomainStore::new(),
            deps: Arc::new(DependencyGraph::default()),
            externals: Arc::new(externals),
            excluded: BTreeSet::new(),
            refused: BTreeSet::new(),
        };
        let ids = config.graph.ids();
        config.init_instances(model, &ids);
        config.rebuild_deps(model);
        config
    }

    /// Initializes domains of `ids`, which must be in creation order.
    pub fn init_instances(&mut self, model: &Model, ids: &[InstanceId]) {
        for id in ids {
            self.store.init_instance(model, &self.graph, *id, &self.externals);
        }
    }

    pub fn rebuild_deps(&mut self, model: &Model) {
        self.deps = Arc::new(DependencyGraph::build(model, &self.graph, &self.store));
    }

    /// Expands and initializes freshly placed instances. Returns every
    /// instance created, in creation order. Dependency edges are left to
    /// the caller.
    pub fn add_instances(&mut self, model: &Model, placed: &[InstanceId]) -> Vec<InstanceId> {
        let mut created: Vec<InstanceId> = placed.to_vec();
        for id in placed {
            created.extend(self.graph.expand_all(model, *id));
        }
        created.sort();
        created.dedup();
        self.init_instances(model, &created);
        created
    }

    /// Removes an instance with its subtree. Returns the removed ids.
    pub fn remove_instance(&mut self, id: InstanceId) -> Vec<InstanceId> {
        let removed = self.graph.remove(id);
        for id in &removed {
            self.store.remove_instance(*id);
        }
        removed
    }

    /// Drops every search decision: engine children of relations with a
    /// choice of types go, eager relations are re-expanded and every cell
    /// is reset to a freshly computed base domain.
    pub fn reset_full(&mut self, model: &Model) {
        let chosen: Vec<InstanceId> = self
            .graph
            .iter()
            .filter(|i| i.origin == Origin::Engine)
            .filter(|i| {
                i.parent.is_some_and(|(owner, rel)| {
                    self.graph
                        .get(owner)
                        .is_some_and(|o| model.type_def(o.type_id).relations[rel].options.len() > 1)
                })
            })
            .map(|i| i.id)
            .collect();
        for id in chosen {
            self.remove_instance(id);
        }
        self.refused.clear();
        for id in self.graph.ids() {
            self.graph.expand_all(model, id);
        }
        let ids = self.graph.ids();
        self.init_instances(model, &ids);
        self.rebuild_deps(model);
    }

    /// Resets the cells of a component to their base domains. Returns the
    /// instances touched.
    pub fn reset_component(&mut self, component: &Component) -> BTreeSet<InstanceId> {
        for cell in &component.cells {
            self.store.reset_cell(*cell);
        }
        component.instances()
    }

    /// True if search may not place `ty` into `rel` of `id`.
    pub fn is_refused(&self, model: &Model, id: InstanceId, rel: usize, ty: TypeId) -> bool {
        self.refused.contains(&(id, rel, ty))
            || self
                .excluded
                .iter()
                .any(|(i, r, option)| *i == id && *r == rel && model.is_a(ty, *option))
    }

    /// Relations below their minimum.
    pub fn unmet(&self, model: &Model) -> Vec<Unmet> {
        let mut unmet = Vec::new();
        for instance in self.graph.iter() {
            let def = model.type_def(instance.type_id);
            for (rel, relation) in def.relations.iter().enumerate() {
                let count = self.graph.weighted_count(model, instance.id, rel);
                if count < relation.min {
                    unmet.push(Unmet {
                        instance: instance.id,
                        relation: relation.name.clone(),
                        min: relation.min,
                        count,
                    });
                }
            }
        }
        unmet
    }

    /// Configurable cells whose domain still holds several values.
    pub fn open_cells(&self, model: &Model) -> Vec<CellRef> {
        let mut open = Vec::new();
        for instance in self.graph.iter() {
            let def = model.type_def(instance.type_id);
            for cell in self.store.cells_of(instance.id) {
                let configurable = def.variables.get(cell.var).is_some_and(|v| v.configurable);
                if configurable && self.store.cell(cell).is_some_and(|d| d.len() > 1) {
                    open.push(cell);
                }
            }
        }
        open
    }
}

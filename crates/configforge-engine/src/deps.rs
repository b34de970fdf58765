//! Dependency edges between cells.
//!
//! Every hard constraint instance, every value-narrowing rule and every
//! recomputed source attribute becomes one edge over the cells it reads.
//! The propagator revises exactly the edges incident to a narrowed cell,
//! and an incremental re-solve resets exactly the connected component of
//! the edited cells.

use std::collections::{BTreeSet, HashMap, VecDeque};

use smallvec::SmallVec;

use configforge_core::{CellRef, InstanceId};
use configforge_model::{Model, RuleEffect, RuleTarget};

use crate::eval::Evaluator;
use crate::graph::InstanceGraph;
use crate::store::DomainStore;

/// What an edge enforces, by index into its owner's type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeKind {
    /// `constraints[i]`
    Constraint(usize),
    /// `rules[i]`, a disable rule on a variable.
    Rule(usize),
    /// `variables[i]` follows its source attribute.
    Source(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub owner: InstanceId,
    pub kind: EdgeKind,
    pub cells: SmallVec<[CellRef; 4]>,
    /// The edge reads relation contents through an aggregate or a
    /// cardinality, so structural changes alter its scope.
    pub reads_relations: bool,
}

/// Edges of one instance graph with a cell-to-edge incidence index.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: Vec<Edge>,
    incident: HashMap<CellRef, Vec<usize>>,
}

/// Cells and edges reachable from a set of seed cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Component {
    pub cells: BTreeSet<CellRef>,
    pub edges: BTreeSet<usize>,
}

impl Component {
    /// Instances owning at least one cell of the component.
    pub fn instances(&self) -> BTreeSet<InstanceId> {
        self.cells.iter().map(|c| c.instance).collect()
    }
}

impl DependencyGraph {
    /// Collects the edges of every live instance, in creation order.
    pub fn build(model: &Model, graph: &InstanceGraph, store: &DomainStore) -> Self {
        let eval = Evaluator::new(model, graph, store);
        let mut deps = Self::default();
        for instance in graph.iter() {
            let owner = instance.id;
            let def = model.type_def(instance.type_id);

            for (ci, constraint) in def.constraints.iter().enumerate() {
                deps.push(Edge {
                    owner,
                    kind: EdgeKind::Constraint(ci),
                    cells: eval.scope_cells(owner, &constraint.expr),
                    reads_relations: constraint.expr.reads_relations(),
                });
            }

            for (ri, rule) in def.rules.iter().enumerate() {
                let RuleEffect::Enablement {
                    disable: true,
                    target: target @ RuleTarget::Variable { var, .. },
                } = &rule.effect
                else {
                    continue;
                };
                let mut cells = eval.scope_cells(owner, &rule.condition);
                let mut reads_relations = rule.condition.reads_relations();
                cells.push(CellRef::new(owner, *var));
                // Earlier enable rules on the same target can veto this one
                for enable in def.rules[..ri].iter().filter(|r| {
                    matches!(&r.effect, RuleEffect::Enablement { disable: false, target: t } if t == target)
                }) {
                    cells.extend(eval.scope_cells(owner, &enable.condition));
                    reads_relations |= enable.condition.reads_relations();
                }
                cells.sort();
                cells.dedup();
                deps.push(Edge {
                    owner,
                    kind: EdgeKind::Rule(ri),
                    cells,
                    reads_relations,
                });
            }

            for (vi, variable) in def.variables.iter().enumerate() {
                if !variable.domain_computation {
                    continue;
                }
                let Some(source) = &variable.source else {
                    continue;
                };
                let source_cell = graph.ancestor(owner, source.level).and_then(|ancestor| {
                    let ty = graph.get(ancestor)?.type_id;
                    let idx = model.type_def(ty).variable_index(&source.var)?;
                    Some(CellRef::new(ancestor, idx))
                });
                if let Some(source_cell) = source_cell {
                    let mut cells = SmallVec::new();
                    cells.push(source_cell);
                    cells.push(CellRef::new(owner, vi));
                    deps.push(Edge {
                        owner,
                        kind: EdgeKind::Source(vi),
                        cells,
                        reads_relations: false,
                    });
                }
            }
        }
        deps
    }

    fn push(&mut self, edge: Edge) {
        let index = self.edges.len();
        for cell in &edge.cells {
            self.incident.entry(*cell).or_default().push(index);
        }
        self.edges.push(edge);
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, index: usize) -> Option<&Edge> {
        self.edges.get(index)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Edges that read `cell`.
    pub fn incident(&self, cell: CellRef) -> &[usize] {
        self.incident.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Breadth-first closure over shared cells, starting at `seeds`.
    pub fn component(&self, seeds: impl IntoIterator<Item = CellRef>) -> Component {
        let mut component = Component::default();
        let mut queue: VecDeque<CellRef> = VecDeque::new();
        for seed in seeds {
            if component.cells.insert(seed) {
                queue.push_back(seed);
            }
        }
        while let Some(cell) = queue.pop_front() {
            for &edge in self.incident(cell) {
                if !component.edges.insert(edge) {
                    continue;
                }
                for &next in &self.edges[edge].cells {
                    if component.cells.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        component
    }

    /// True if any edge of the component reads relation contents.
    pub fn reads_relations(&self, component: &Component) -> bool {
        component
            .edges
            .iter()
            .any(|&e| self.edges.get(e).is_some_and(|edge| edge.reads_relations))
    }
}

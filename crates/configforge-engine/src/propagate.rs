//! Constraint propagation to a fixpoint.
//!
//! The propagator runs a work queue of dependency edges. Revising a
//! constraint edge removes every value of every open cell in its scope
//! under which the constraint evaluates definitely false; a narrowed cell
//! re-enqueues the edges that read it. Domains only shrink, so the queue
//! drains, and the fixpoint it reaches does not depend on queue order.

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use configforge_core::{CellRef, ConstraintRef, InstanceId, Value};
use configforge_model::{Model, RuleEffect, RuleTarget};

use crate::deps::{DependencyGraph, EdgeKind};
use crate::eval::Evaluator;
use crate::graph::InstanceGraph;
use crate::statistics::StatisticsCollector;
use crate::store::DomainStore;

/// Why propagation stopped without a fixpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contradiction {
    /// The constraint or rule that emptied a domain or evaluated false.
    pub constraint: Option<ConstraintRef>,
    /// The cell whose domain became empty, if any.
    pub cell: Option<CellRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationResult {
    pub narrowed: BTreeSet<CellRef>,
    pub contradiction: Option<Contradiction>,
}

impl PropagationResult {
    pub fn is_consistent(&self) -> bool {
        self.contradiction.is_none()
    }
}

/// Where the work queue starts.
#[derive(Debug, Clone, Copy)]
pub enum Seeds<'s> {
    /// Every edge.
    All,
    /// Edges reading one of these cells.
    Cells(&'s [CellRef]),
}

#[derive(Debug, Clone, Copy)]
pub struct Propagator<'a> {
    model: &'a Model,
    stats: &'a StatisticsCollector,
}

impl<'a> Propagator<'a> {
    pub fn new(model: &'a Model, stats: &'a StatisticsCollector) -> Self {
        Self { model, stats }
    }

    /// Narrows `store` to the fixpoint of every edge reachable from `seeds`.
    pub fn propagate(
        &self,
        graph: &InstanceGraph,
        store: &mut DomainStore,
        deps: &DependencyGraph,
        seeds: Seeds<'_>,
    ) -> PropagationResult {
        let mut result = PropagationResult::default();
        let mut queue: VecDeque<usize> = VecDeque::new();
        let mut in_queue = vec![false; deps.len()];

        let view: &DomainStore = store;
        let seed_cells: Vec<CellRef> = match seeds {
            Seeds::All => graph.iter().flat_map(|i| view.cells_of(i.id)).collect(),
            Seeds::Cells(cells) => cells.to_vec(),
        };
        if let Some(&cell) = seed_cells
            .iter()
            .find(|c| view.cell(**c).is_some_and(|d| d.is_empty()))
        {
            result.contradiction = Some(Contradiction {
                constraint: None,
                cell: Some(cell),
            });
            return result;
        }
        match seeds {
            Seeds::All => {
                for edge in 0..deps.len() {
                    queue.push_back(edge);
                    in_queue[edge] = true;
                }
            }
            Seeds::Cells(cells) => {
                for cell in cells {
                    enqueue(deps, *cell, &mut queue, &mut in_queue);
                }
            }
        }

        while let Some(index) = queue.pop_front() {
            in_queue[index] = false;
            let Some(edge) = deps.edge(index) else {
                continue;
            };
            let revised = match edge.kind {
                EdgeKind::Constraint(ci) => self.revise_constraint(graph, store, edge.owner, ci, &edge.cells),
                EdgeKind::Rule(ri) => self.apply_disable(graph, store, edge.owner, ri),
                EdgeKind::Source(_) => follow_source(store, &edge.cells),
            };
            match revised {
                Ok(narrowed) => {
                    for cell in narrowed {
                        result.narrowed.insert(cell);
                        enqueue(deps, cell, &mut queue, &mut in_queue);
                    }
                }
                Err(contradiction) => {
                    debug!(
                        event = "propagation_contradiction",
                        constraint = contradiction
                            .constraint
                            .as_ref()
                            .map(ConstraintRef::full_name)
                            .unwrap_or_default(),
                        cell = ?contradiction.cell,
                    );
                    result.contradiction = Some(contradiction);
                    return result;
                }
            }
        }
        result
    }

    fn revise_constraint(
        &self,
        graph: &InstanceGraph,
        store: &mut DomainStore,
        owner: InstanceId,
        ci: usize,
        cells: &[CellRef],
    ) -> Result<Vec<CellRef>, Contradiction> {
        let Some(instance) = graph.get(owner) else {
            return Ok(Vec::new());
        };
        let Some(constraint) = self.model.type_def(instance.type_id).constraints.get(ci) else {
            return Ok(Vec::new());
        };
        let violated = |cell: Option<CellRef>| Contradiction {
            constraint: Some(constraint.name.clone()),
            cell,
        };

        let mut narrowed = Vec::new();
        for &cell in cells {
            let values = match store.cell(cell) {
                Some(domain) if domain.len() > 1 => domain.values().to_vec(),
                _ => continue,
            };
            let mut doomed: Vec<Value> = Vec::new();
            for value in &values {
                self.stats.record_evaluation();
                let truth = Evaluator::new(self.model, graph, store)
                    .assuming(cell, value)
                    .truth(owner, &constraint.expr);
                if truth.is_false() {
                    doomed.push(value.clone());
                }
            }
            if doomed.is_empty() {
                continue;
            }
            if let Some(domain) = store.cell_mut(cell) {
                domain.retain(|v| !doomed.contains(v));
                narrowed.push(cell);
                if domain.is_empty() {
                    self.stats.record_violation();
                    return Err(violated(Some(cell)));
                }
            }
        }

        self.stats.record_evaluation();
        let truth = Evaluator::new(self.model, graph, store).truth(owner, &constraint.expr);
        if truth.is_false() {
            self.stats.record_violation();
            return Err(violated(None));
        }
        Ok(narrowed)
    }

    /// Removes what a firing disable rule forbids. The rule is vetoed by
    /// any earlier enable rule on the same target whose condition may
    /// still hold.
    fn apply_disable(
        &self,
        graph: &InstanceGraph,
        store: &mut DomainStore,
        owner: InstanceId,
        ri: usize,
    ) -> Result<Vec<CellRef>, Contradiction> {
        let Some(instance) = graph.get(owner) else {
            return Ok(Vec::new());
        };
        let def = self.model.type_def(instance.type_id);
        let Some(rule) = def.rules.get(ri) else {
            return Ok(Vec::new());
        };
        let RuleEffect::Enablement {
            disable: true,
            target: target @ RuleTarget::Variable { var, value },
        } = &rule.effect
        else {
            return Ok(Vec::new());
        };

        let eval = Evaluator::new(self.model, graph, store);
        self.stats.record_evaluation();
        if !eval.truth(owner, &rule.condition).is_true() {
            return Ok(Vec::new());
        }
        let vetoed = def.rules[..ri].iter().any(|r| {
            matches!(&r.effect, RuleEffect::Enablement { disable: false, target: t } if t == target)
                && !eval.truth(owner, &r.condition).is_false()
        });
        if vetoed {
            return Ok(Vec::new());
        }

        let cell = CellRef::new(owner, *var);
        let variable = &def.variables[*var];
        let Some(domain) = store.cell_mut(cell) else {
            return Ok(Vec::new());
        };
        let changed = match value {
            Some(value) => {
                let option = value.as_str();
                domain.retain(|v| {
                    v != value
                        && !v
                            .as_multi()
                            .is_some_and(|items| items.iter().any(|i| Some(&**i) == option))
                }) > 0
            }
            // A disabled attribute keeps its current or default value
            None if domain.len() > 1 => {
                let keep = variable
                    .default_value
                    .as_ref()
                    .filter(|d| domain.contains(d))
                    .or_else(|| domain.first())
                    .cloned();
                match keep {
                    Some(keep) => domain.collapse_to(&keep),
                    None => false,
                }
            }
            None => false,
        };
        if domain.is_empty() {
            self.stats.record_violation();
            return Err(Contradiction {
                constraint: Some(rule.name.clone()),
                cell: Some(cell),
            });
        }
        Ok(if changed { vec![cell] } else { Vec::new() })
    }
}

fn enqueue(deps: &DependencyGraph, cell: CellRef, queue: &mut VecDeque<usize>, in_queue: &mut [bool]) {
    for &edge in deps.incident(cell) {
        if !in_queue[edge] {
            in_queue[edge] = true;
            queue.push_back(edge);
        }
    }
}

/// Restricts a recomputed attribute to its source's current domain. Source
/// edges hold the source cell first and the attribute second.
fn follow_source(store: &mut DomainStore, cells: &[CellRef]) -> Result<Vec<CellRef>, Contradiction> {
    let [source, own] = cells else {
        return Ok(Vec::new());
    };
    let Some(allowed) = store.cell(*source).cloned() else {
        return Ok(Vec::new());
    };
    let Some(domain) = store.cell_mut(*own) else {
        return Ok(Vec::new());
    };
    if !domain.restrict_to(&allowed) {
        return Ok(Vec::new());
    }
    if domain.is_empty() {
        return Err(Contradiction {
            constraint: None,
            cell: Some(*own),
        });
    }
    Ok(vec![*own])
}

#[cfg(test)]
mod tests;

//! Chronological backtracking search over a trail of choice points.
//!
//! Each step picks the open decision with the lowest key: the sequence of
//! its variable or relation, then instance creation order, variables
//! before relations, then declaration order. Values are tried default
//! first, then in domain order; relation options in presentation order.
//! A choice point snapshots the whole [`Configuration`] before its trial,
//! so backtracking restores exactly the state the decision was made in.

use tracing::trace;

use configforge_core::{CellRef, InstanceId, Value};
use configforge_model::{Model, TypeId};

use crate::graph::Origin;
use crate::propagate::{Contradiction, PropagationResult, Propagator, Seeds};
use crate::rules::RuleEvaluator;
use crate::state::Configuration;
use crate::statistics::StatisticsCollector;
use crate::termination::Termination;

/// A point where propagation alone cannot decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Pick a value for an open configurable cell.
    Assign(CellRef),
    /// Pick the type of the next child of a relation below its minimum.
    Instantiate { instance: InstanceId, relation: usize },
}

/// The alternative tried at a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Choice {
    Value(Value),
    Type(TypeId),
}

/// One entry of the search trail.
#[derive(Debug, Clone)]
pub struct ChoicePoint {
    pub decision: Decision,
    pub tried: Choice,
    /// The configuration before the trial.
    pub snapshot: Configuration,
}

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// Solutions in the order found; at least one.
    Solved(Vec<Configuration>),
    /// The trail ran dry. Carries the last contradiction met.
    Exhausted(Option<Contradiction>),
    Timeout,
    Cancelled,
}

pub struct SearchEngine<'a> {
    model: &'a Model,
    stats: &'a StatisticsCollector,
    termination: &'a dyn Termination,
    /// Ends the search as cancelled rather than timed out.
    cancel: &'a dyn Termination,
    best_of: usize,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        model: &'a Model,
        stats: &'a StatisticsCollector,
        termination: &'a dyn Termination,
        cancel: &'a dyn Termination,
    ) -> Self {
        Self {
            model,
            stats,
            termination,
            cancel,
            best_of: 1,
        }
    }

    /// Collects up to `n` solutions before returning.
    pub fn with_best_of(mut self, n: usize) -> Self {
        self.best_of = n.max(1);
        self
    }

    /// Searches from a propagated, consistent configuration.
    pub fn search(&self, start: Configuration) -> SearchOutcome {
        let mut trail: Vec<ChoicePoint> = Vec::new();
        let mut solutions: Vec<Configuration> = Vec::new();
        let mut last: Option<Contradiction> = None;
        let mut current = start;

        loop {
            if self.cancel.is_terminated(self.stats) {
                return SearchOutcome::Cancelled;
            }
            if self.termination.is_terminated(self.stats) {
                return if solutions.is_empty() {
                    SearchOutcome::Timeout
                } else {
                    SearchOutcome::Solved(solutions)
                };
            }

            let advanced = match self.next_decision(&current) {
                None => {
                    solutions.push(current.clone());
                    if solutions.len() >= self.best_of {
                        return SearchOutcome::Solved(solutions);
                    }
                    false
                }
                Some(decision) => match self.candidates(&current, decision).into_iter().next() {
                    None => false,
                    Some(choice) => {
                        self.stats.record_choice_point();
                        trace!(
                            event = "choice_point",
                            depth = trail.len() + 1,
                            decision = ?decision,
                            choice = ?choice,
                        );
                        trail.push(ChoicePoint {
                            decision,
                            tried: choice.clone(),
                            snapshot: current.clone(),
                        });
                        let result = self.apply(&mut current, decision, &choice);
                        match result.contradiction {
                            None => true,
                            Some(contradiction) => {
                                last = Some(contradiction);
                                false
                            }
                        }
                    }
                },
            };
            if advanced {
                continue;
            }

            match self.backtrack(&mut trail, &mut last) {
                Some(restored) => current = restored,
                None if solutions.is_empty() => return SearchOutcome::Exhausted(last),
                None => return SearchOutcome::Solved(solutions),
            }
        }
    }

    /// Pops choice points until one still has an alternative left.
    fn backtrack(&self, trail: &mut Vec<ChoicePoint>, last: &mut Option<Contradiction>) -> Option<Configuration> {
        while let Some(point) = trail.pop() {
            self.stats.record_backtrack();
            trace!(event = "backtrack", depth = trail.len(), decision = ?point.decision);
            let mut restored = point.snapshot;
            match (point.decision, point.tried) {
                (Decision::Assign(cell), Choice::Value(value)) => {
                    if let Some(domain) = restored.store.cell_mut(cell) {
                        domain.remove(&value);
                    }
                    let deps = restored.deps.clone();
                    let result = Propagator::new(self.model, self.stats).propagate(
                        &restored.graph,
                        &mut restored.store,
                        &deps,
                        Seeds::Cells(&[cell]),
                    );
                    match result.contradiction {
                        None => return Some(restored),
                        Some(contradiction) => *last = Some(contradiction),
                    }
                }
                (Decision::Instantiate { instance, relation }, Choice::Type(ty)) => {
                    restored.refused.insert((instance, relation, ty));
                    return Some(restored);
                }
                _ => {}
            }
        }
        None
    }

    /// The open decision with the lowest key, if any.
    pub fn next_decision(&self, config: &Configuration) -> Option<Decision> {
        let mut best: Option<((i32, InstanceId, u8, usize), Decision)> = None;
        let mut offer = |key: (i32, InstanceId, u8, usize), decision: Decision| {
            if best.as_ref().map_or(true, |(k, _)| key < *k) {
                best = Some((key, decision));
            }
        };
        for instance in config.graph.iter() {
            let def = self.model.type_def(instance.type_id);
            for (var, variable) in def.variables.iter().enumerate() {
                let cell = CellRef::new(instance.id, var);
                if variable.configurable && config.store.cell(cell).is_some_and(|d| d.len() > 1) {
                    offer((variable.sequence, instance.id, 0, var), Decision::Assign(cell));
                }
            }
            for (rel, relation) in def.relations.iter().enumerate() {
                if relation.configurable && config.graph.weighted_count(self.model, instance.id, rel) < relation.min {
                    offer(
                        (relation.sequence, instance.id, 1, rel),
                        Decision::Instantiate {
                            instance: instance.id,
                            relation: rel,
                        },
                    );
                }
            }
        }
        best.map(|(_, decision)| decision)
    }

    /// Alternatives of a decision in the order they are tried.
    pub fn candidates(&self, config: &Configuration, decision: Decision) -> Vec<Choice> {
        match decision {
            Decision::Assign(cell) => {
                let Some(domain) = config.store.cell(cell) else {
                    return Vec::new();
                };
                let default = config
                    .graph
                    .get(cell.instance)
                    .and_then(|i| self.model.type_def(i.type_id).variables.get(cell.var))
                    .and_then(|v| v.default_value.as_ref())
                    .filter(|d| domain.contains(d));
                let mut values: Vec<Choice> = default.into_iter().cloned().map(Choice::Value).collect();
                values.extend(
                    domain
                        .iter()
                        .filter(|v| Some(*v) != default)
                        .cloned()
                        .map(Choice::Value),
                );
                values
            }
            Decision::Instantiate { instance, relation } => {
                let Some(owner) = config.graph.get(instance) else {
                    return Vec::new();
                };
                let flags = RuleEvaluator::new(self.model).instance_flags(&config.graph, &config.store, instance);
                self.model.type_def(owner.type_id).relations[relation]
                    .options
                    .iter()
                    .copied()
                    .filter(|ty| !config.is_refused(self.model, instance, relation, *ty))
                    .filter(|ty| !flags.is_option_disabled(self.model, relation, *ty))
                    .map(Choice::Type)
                    .collect()
            }
        }
    }

    /// Commits a trial and propagates its consequences.
    fn apply(&self, config: &mut Configuration, decision: Decision, choice: &Choice) -> PropagationResult {
        let propagator = Propagator::new(self.model, self.stats);
        match (decision, choice) {
            (Decision::Assign(cell), Choice::Value(value)) => {
                if let Some(domain) = config.store.cell_mut(cell) {
                    domain.collapse_to(value);
                }
                let deps = config.deps.clone();
                propagator.propagate(&config.graph, &mut config.store, &deps, Seeds::Cells(&[cell]))
            }
            (Decision::Instantiate { instance, relation }, Choice::Type(ty)) => {
                let placed = match config
                    .graph
                    .place(self.model, instance, relation, *ty, 1, Origin::Engine)
                {
                    Ok(placed) => placed,
                    Err(_) => {
                        return PropagationResult {
                            contradiction: Some(Contradiction::default()),
                            ..PropagationResult::default()
                        }
                    }
                };
                config.add_instances(self.model, &placed);
                config.rebuild_deps(self.model);
                let deps = config.deps.clone();
                propagator.propagate(&config.graph, &mut config.store, &deps, Seeds::All)
            }
            _ => PropagationResult::default(),
        }
    }
}

#[cfg(test)]
mod tests;

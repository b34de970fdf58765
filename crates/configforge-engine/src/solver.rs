//! One solve: reset, re-apply user assignments, propagate, search, rank and
//! reconcile structural rules until the instance graph settles.
//!
//! A solve never mutates the configuration it is given. On a consistent
//! outcome the result carries the new configuration; on a conflict, a
//! timeout or a cancellation it carries none and the caller keeps its
//! previous state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use configforge_config::EngineConfig;
use configforge_core::{CellRef, ConstraintRef, InstanceId, Value};
use configforge_model::{Model, TypeId};

use crate::event::{DiagnosticsSink, DiagnosticsSupport};
use crate::graph::Origin;
use crate::outcome::{Conflict, ConflictReason, Outcome};
use crate::propagate::{Contradiction, Propagator, Seeds};
use crate::rules::{RuleEvaluator, RuleReport};
use crate::search::{SearchEngine, SearchOutcome};
use crate::state::Configuration;
use crate::statistics::{SolveStatistics, StatisticsCollector};
use crate::termination::{self, ExternalTermination, Termination};

/// How much of the previous state a solve may keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveMode {
    /// Drop every search decision and solve the whole graph again.
    Full,
    /// Reset only the connected component of the edited cells.
    Incremental(Vec<CellRef>),
}

impl ResolveMode {
    fn label(&self) -> &'static str {
        match self {
            ResolveMode::Full => "full",
            ResolveMode::Incremental(_) => "incremental",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolveRequest<'r> {
    /// Every user assignment currently in force.
    pub assignments: &'r BTreeMap<CellRef, Value>,
    pub mode: ResolveMode,
}

#[derive(Debug, Clone)]
pub struct SolveResult {
    pub outcome: Outcome,
    pub statistics: SolveStatistics,
    /// The new state, present exactly when the outcome is consistent.
    pub configuration: Option<Configuration>,
    /// Rule effects on the new state.
    pub report: RuleReport,
}

enum Pass {
    Settled(Configuration, RuleReport),
    /// Structural rules changed the graph; solve again from scratch.
    Changed(Configuration),
    Failed(Outcome),
}

/// Runs solves for one model under one engine configuration.
#[derive(Debug)]
pub struct Solver {
    model: Arc<Model>,
    config: EngineConfig,
    cancel: Arc<AtomicBool>,
    /// Reads `cancel` from inside the search.
    cancelled: ExternalTermination,
    diagnostics: DiagnosticsSupport,
}

impl Solver {
    pub fn new(model: Arc<Model>, config: EngineConfig) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        Self {
            model,
            config,
            cancelled: ExternalTermination::new(Arc::clone(&cancel)),
            cancel,
            diagnostics: DiagnosticsSupport::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics.add_sink(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn DiagnosticsSink>) {
        self.diagnostics.add_sink(sink);
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Flag that cancels the solve in flight, or the next one if none is
    /// running. Each solve clears it when it ends.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Solves from `base`, which holds the structure the caller wants
    /// (user selections already placed) and the domains of the last
    /// consistent state.
    pub fn solve(&self, base: &Configuration, request: SolveRequest<'_>) -> SolveResult {
        let stats = StatisticsCollector::new();
        let termination = termination::from_config(&self.config.termination);
        info!(
            event = "solve_start",
            instances = base.graph.len(),
            assignments = request.assignments.len(),
            mode = request.mode.label(),
        );
        self.diagnostics.fire_solve_start(base.graph.len());

        let (outcome, configuration, report) = self.run(base.clone(), &request, &stats, &termination);
        self.cancel.store(false, Ordering::SeqCst);

        let statistics = stats.snapshot();
        info!(
            event = "solve_end",
            outcome = outcome.label(),
            duration_ms = statistics.duration.as_millis() as u64,
            evaluations = statistics.constraint_evaluations,
            choice_points = statistics.choice_points,
            backtracks = statistics.backtracks,
            touched = statistics.touched_instances,
        );
        self.diagnostics.fire_solve_end(&statistics, &outcome);
        if outcome.is_consistent() {
            self.diagnostics.fire_messages(&report.diagnostics);
        }
        SolveResult {
            outcome,
            statistics,
            configuration,
            report,
        }
    }

    fn run(
        &self,
        mut config: Configuration,
        request: &SolveRequest<'_>,
        stats: &StatisticsCollector,
        termination: &dyn Termination,
    ) -> (Outcome, Option<Configuration>, RuleReport) {
        let mut mode = request.mode.clone();
        // Rule-made structure carried over from the previous state may no
        // longer apply. It is dropped once if a pass fails with it present.
        let mut stripped = false;
        for _ in 0..self.config.search.max_rule_passes.max(1) {
            match self.pass(config.clone(), request.assignments, &mode, stats, termination) {
                Pass::Settled(settled, report) => {
                    let unmet = settled.unmet(&self.model);
                    let outcome = if unmet.is_empty() {
                        Outcome::Solved
                    } else {
                        Outcome::Incomplete { unmet }
                    };
                    return (outcome, Some(settled), report);
                }
                Pass::Changed(changed) => {
                    config = changed;
                    mode = ResolveMode::Full;
                }
                Pass::Failed(outcome) => {
                    let retry = matches!(outcome, Outcome::Conflict(_))
                        && !stripped
                        && strip_rule_structure(&mut config);
                    if !retry {
                        return (outcome, None, RuleReport::default());
                    }
                    debug!(event = "rule_structure_dropped");
                    stripped = true;
                    mode = ResolveMode::Full;
                }
            }
        }
        let conflict = Conflict::new(
            ConflictReason::StructuralRulesDiverged,
            format!(
                "require and exclude rules did not settle within {} passes",
                self.config.search.max_rule_passes
            ),
        );
        (Outcome::Conflict(conflict), None, RuleReport::default())
    }

    fn pass(
        &self,
        mut config: Configuration,
        assignments: &BTreeMap<CellRef, Value>,
        mode: &ResolveMode,
        stats: &StatisticsCollector,
        termination: &dyn Termination,
    ) -> Pass {
        let model = &*self.model;

        let seeds: Option<Vec<CellRef>> = match mode {
            ResolveMode::Incremental(cells) => {
                let component = config.deps.component(cells.iter().copied());
                if config.deps.reads_relations(&component) {
                    None
                } else {
                    let touched = config.reset_component(&component);
                    debug!(
                        event = "incremental_resolve",
                        cells = component.cells.len(),
                        instances = touched.len(),
                    );
                    for id in touched {
                        stats.record_touched(id);
                    }
                    Some(component.cells.into_iter().collect())
                }
            }
            ResolveMode::Full => None,
        };
        if seeds.is_none() {
            config.reset_full(model);
            debug!(event = "full_resolve", instances = config.graph.len());
            for id in config.graph.ids() {
                stats.record_touched(id);
            }
        }

        for (cell, value) in assignments {
            if !config.graph.contains(cell.instance) {
                continue;
            }
            if !config.store.assign(model, &config.graph, *cell, value) {
                let conflict = Conflict::new(
                    ConflictReason::OutsideDomain,
                    format!("{value} is outside the domain of {cell:?}"),
                )
                .with_cell(*cell);
                return Pass::Failed(Outcome::Conflict(conflict));
            }
        }

        let deps = Arc::clone(&config.deps);
        let seeded = match &seeds {
            Some(cells) => Seeds::Cells(cells.as_slice()),
            None => Seeds::All,
        };
        let result = Propagator::new(model, stats).propagate(&config.graph, &mut config.store, &deps, seeded);
        if let Some(contradiction) = result.contradiction {
            return Pass::Failed(Outcome::Conflict(self.conflict_for(Some(contradiction))));
        }

        let engine = SearchEngine::new(model, stats, termination, &self.cancelled)
            .with_best_of(self.config.search.best_of);
        let solutions = match engine.search(config) {
            SearchOutcome::Solved(solutions) => solutions,
            SearchOutcome::Exhausted(last) => return Pass::Failed(Outcome::Conflict(self.conflict_for(last))),
            SearchOutcome::Timeout => return Pass::Failed(Outcome::Timeout),
            SearchOutcome::Cancelled => return Pass::Failed(Outcome::Cancelled),
        };

        let evaluator = RuleEvaluator::new(model).with_statistics(stats);
        let mut best: Option<(Configuration, RuleReport)> = None;
        for solution in solutions {
            let report = evaluator.apply_rules(&solution.graph, &solution.store);
            if best.as_ref().map_or(true, |(_, b)| report.preference > b.preference) {
                best = Some((solution, report));
            }
        }
        let Some((mut winner, report)) = best else {
            return Pass::Failed(Outcome::Conflict(self.conflict_for(None)));
        };

        match self.reconcile(&mut winner, &report) {
            Ok(false) => Pass::Settled(winner, report),
            Ok(true) => Pass::Changed(winner),
            Err(conflict) => Pass::Failed(Outcome::Conflict(conflict)),
        }
    }

    /// Brings rule-made structure in line with the firing require, exclude
    /// and option-disabling rules. Returns true if the graph or the excluded
    /// options changed.
    fn reconcile(&self, config: &mut Configuration, report: &RuleReport) -> Result<bool, Conflict> {
        let model = &*self.model;
        let mut changed = false;

        let firing: BTreeSet<(InstanceId, ConstraintRef)> =
            report.required.iter().map(|r| (r.owner, r.rule.clone())).collect();
        let stale: Vec<InstanceId> = config
            .graph
            .iter()
            .filter(|i| match &i.origin {
                Origin::Rule { owner, rule } => !firing.contains(&(*owner, rule.clone())),
                _ => false,
            })
            .map(|i| i.id)
            .collect();
        for id in stale {
            config.remove_instance(id);
            changed = true;
        }

        for requirement in &report.required {
            let origin = Origin::Rule {
                owner: requirement.owner,
                rule: requirement.rule.clone(),
            };
            let rel = requirement.pattern.relation;
            let present = config
                .graph
                .children(requirement.owner, rel)
                .iter()
                .any(|c| config.graph.get(*c).is_some_and(|c| c.origin == origin));
            if present {
                continue;
            }
            let Some(owner) = config.graph.get(requirement.owner) else {
                continue;
            };
            let relation = &model.type_def(owner.type_id).relations[rel];
            let count = config.graph.weighted_count(model, requirement.owner, rel);
            let weight = model.type_def(requirement.pattern.type_id).weight(1);
            if relation.max.is_some_and(|max| count + weight > max) {
                let conflict = Conflict::new(
                    ConflictReason::CardinalityExceeded,
                    format!("{} needs room in {}", requirement.rule, relation.name),
                )
                .with_constraint(requirement.rule.clone())
                .with_instance(requirement.owner);
                return Err(conflict);
            }
            let id = config.graph.add_pinned(
                model,
                requirement.owner,
                rel,
                requirement.pattern.type_id,
                origin,
                requirement.pattern.assignments.clone(),
            );
            config.add_instances(model, &[id]);
            changed = true;
        }

        // Disabled options forbid existing children the same way exclusions do
        let disabled = report.flags.iter().flat_map(|(owner, flags)| {
            flags
                .option_rules
                .iter()
                .map(move |((rel, ty), rule)| (*owner, *rel, *ty, rule))
        });
        let forbidden: Vec<(InstanceId, usize, TypeId, &ConstraintRef)> = report
            .excluded
            .iter()
            .map(|e| (e.owner, e.pattern.relation, e.pattern.type_id, &e.rule))
            .chain(disabled)
            .collect();

        let mut excluded = BTreeSet::new();
        for (owner, rel, ty, rule) in forbidden {
            excluded.insert((owner, rel, ty));
            let multi_option = config
                .graph
                .get(owner)
                .is_some_and(|o| model.type_def(o.type_id).relations[rel].options.len() > 1);
            let hits: Vec<(InstanceId, Origin)> = config
                .graph
                .children(owner, rel)
                .iter()
                .filter_map(|c| config.graph.get(*c))
                .filter(|c| model.is_a(c.type_id, ty))
                .map(|c| (c.id, c.origin.clone()))
                .collect();
            for (child, origin) in hits {
                if origin == Origin::Engine && multi_option {
                    config.remove_instance(child);
                    changed = true;
                } else {
                    let conflict = Conflict::new(
                        ConflictReason::RuleForbids,
                        format!("{rule} forbids {}", model.type_def(ty).name),
                    )
                    .with_constraint(rule.clone())
                    .with_instance(child);
                    return Err(conflict);
                }
            }
        }
        if excluded != config.excluded {
            config.excluded = excluded;
            changed = true;
        }
        Ok(changed)
    }

    /// A conflict naming the constraint or rule that failed.
    fn conflict_for(&self, contradiction: Option<Contradiction>) -> Conflict {
        let mut conflict = Conflict::from_contradiction(contradiction);
        let by_rule = conflict.constraint.as_ref().is_some_and(|c| {
            self.model
                .type_by_name(&c.owner)
                .is_some_and(|t| t.rules.iter().any(|r| r.name == *c))
        });
        if by_rule {
            conflict.reason = ConflictReason::RuleForbids;
        }
        conflict
    }
}

/// Removes rule-made instances and excluded options. Returns true if there
/// was anything to remove.
fn strip_rule_structure(config: &mut Configuration) -> bool {
    let rule_made: Vec<InstanceId> = config
        .graph
        .iter()
        .filter(|i| matches!(i.origin, Origin::Rule { .. }))
        .map(|i| i.id)
        .collect();
    let changed = !rule_made.is_empty() || !config.excluded.is_empty();
    for id in rule_made {
        config.remove_instance(id);
    }
    config.excluded.clear();
    changed
}

#[cfg(test)]
mod tests;

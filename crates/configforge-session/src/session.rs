//! A configuration session: one owner's edits against one shared model.
//!
//! Every mutating call builds the next configuration on a copy of the last
//! consistent one and solves it. The copy is committed only when the solve
//! ends `Solved` or `Incomplete`; a conflict, a timeout or a cancellation
//! leaves the previous state in place and returns it unchanged.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use configforge_config::EngineConfig;
use configforge_core::{CellRef, ConfigForgeError, InstanceId, Result, SessionId, Value};
use configforge_engine::{
    Configuration, Conflict, ConflictReason, InstanceGraph, Origin, Outcome, ResolveMode, RuleReport,
    SolveRequest, SolveStatistics, Solver,
};
use configforge_model::{Model, PrimitiveKind, SplitMode, TypeId};

use crate::context::Context;
use crate::visible::VisibleState;

/// What to add to a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationOption {
    Type(TypeId),
    /// A type by name.
    Named(String),
    /// Another unit of the type of an existing instance.
    LikeInstance(InstanceId),
}

impl From<TypeId> for RelationOption {
    fn from(ty: TypeId) -> Self {
        RelationOption::Type(ty)
    }
}

impl From<&str> for RelationOption {
    fn from(name: &str) -> Self {
        RelationOption::Named(name.to_string())
    }
}

/// Result of one session call.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignResult {
    pub outcome: Outcome,
    /// The state after the call: the new one if the outcome is consistent,
    /// the previous one otherwise.
    pub state: VisibleState,
    pub statistics: SolveStatistics,
}

/// Notification for a presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateUpdated { session: SessionId, outcome: Outcome },
    Conflict { session: SessionId, conflict: Conflict },
    /// A solve timed out or was cancelled; the state is unchanged.
    Interrupted { session: SessionId, outcome: Outcome },
    Closed { session: SessionId },
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    model: Arc<Model>,
    solver: Solver,
    incremental: bool,
    state: Configuration,
    report: RuleReport,
    visible: VisibleState,
    outcome: Outcome,
    assignments: BTreeMap<CellRef, Value>,
    solved_once: bool,
    totals: SolveStatistics,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
    closed: bool,
}

impl Session {
    /// Opens a standalone session and runs the initial solve.
    pub fn open(model: Arc<Model>, config: EngineConfig, context: &Context) -> Result<Self> {
        Self::open_with(SessionId(0), Solver::new(model, config), context)
    }

    pub fn open_with(id: SessionId, solver: Solver, context: &Context) -> Result<Self> {
        solver
            .config()
            .validate()
            .map_err(|e| ConfigForgeError::Config(e.to_string()))?;
        let model = Arc::clone(solver.model());
        let externals = context.resolve(&model)?;
        let state = Configuration::build(&model, externals);
        info!(
            event = "session_open",
            session = %id,
            instances = state.graph.len(),
            context = context.len(),
        );
        let mut session = Self {
            id,
            incremental: solver.config().session.incremental,
            model,
            solver,
            state: state.clone(),
            report: RuleReport::default(),
            visible: VisibleState::default(),
            outcome: Outcome::Incomplete { unmet: Vec::new() },
            assignments: BTreeMap::new(),
            solved_once: false,
            totals: SolveStatistics::default(),
            subscribers: Vec::new(),
            closed: false,
        };
        session.visible = session.capture();
        let first = session.run(state, BTreeMap::new(), ResolveMode::Full);
        if !first.outcome.is_consistent() {
            session.outcome = first.outcome;
        }
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Outcome of the last solve that committed, or of the initial solve if
    /// none did.
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn visible_state(&self) -> &VisibleState {
        &self.visible
    }

    pub fn configuration(&self) -> &Configuration {
        &self.state
    }

    pub fn assignments(&self) -> &BTreeMap<CellRef, Value> {
        &self.assignments
    }

    /// Statistics summed over every solve of this session.
    pub fn statistics(&self) -> &SolveStatistics {
        &self.totals
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flag that cancels the solve in flight, or the next one if none is
    /// running. [`crate::SessionManager::cancel`] only raises it while a
    /// call is in flight.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.solver.cancel_flag()
    }

    /// Cancels the running solve, or the next one.
    pub fn cancel(&self) {
        self.solver.cancel();
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Sets a configurable variable. A `Null` value clears it.
    pub fn assign(&mut self, instance: InstanceId, variable: &str, value: impl Into<Value>) -> Result<AssignResult> {
        self.ensure_open()?;
        let value = value.into();
        if value.is_null() {
            return self.clear(instance, variable);
        }
        let (cell, kind) = self.configurable_cell(instance, variable)?;
        let coerced = kind.coerce(&value).ok_or_else(|| ConfigForgeError::TypeMismatch {
            variable: variable.to_string(),
            expected: kind.name(),
            actual: value.kind_name().to_string(),
        })?;

        let mut assignments = self.assignments.clone();
        assignments.insert(cell, coerced);
        let mode = self.mode_for(cell);
        Ok(self.run(self.state.clone(), assignments, mode))
    }

    /// Drops a user assignment and lets the engine decide the variable.
    pub fn clear(&mut self, instance: InstanceId, variable: &str) -> Result<AssignResult> {
        self.ensure_open()?;
        let (cell, _) = self.configurable_cell(instance, variable)?;
        let mut assignments = self.assignments.clone();
        assignments.remove(&cell);
        let mode = self.mode_for(cell);
        Ok(self.run(self.state.clone(), assignments, mode))
    }

    /// Adds `quantity` units of an option to a relation of `instance`.
    ///
    /// The selection is checked against the relation's maximum, its closed
    /// flag and the current rule flags before anything is added.
    pub fn select_relation_option(
        &mut self,
        instance: InstanceId,
        relation: &str,
        option: impl Into<RelationOption>,
        quantity: u32,
    ) -> Result<AssignResult> {
        self.ensure_open()?;
        let model = Arc::clone(&self.model);
        let owner = self.state.graph.instance(instance)?;
        let def = model.type_def(owner.type_id);
        let rel = def
            .relation_index(relation)
            .ok_or_else(|| ConfigForgeError::UnknownRelation {
                type_name: def.name.to_string(),
                relation: relation.to_string(),
            })?;
        let relation_def = &def.relations[rel];
        let ty = match option.into() {
            RelationOption::Type(ty) => ty,
            RelationOption::Named(name) => model.type_id(&name).ok_or(ConfigForgeError::UnknownType(name))?,
            RelationOption::LikeInstance(id) => self.state.graph.instance(id)?.type_id,
        };
        if !relation_def.options.contains(&ty) {
            return Err(ConfigForgeError::TypeMismatch {
                variable: relation.to_string(),
                expected: model.type_def(relation_def.target).name.to_string(),
                actual: model.type_def(ty).name.to_string(),
            });
        }
        let type_name = model.type_def(ty).name.clone();

        if relation_def.close_relation && self.solved_once {
            return Ok(self.reject(
                Conflict::new(ConflictReason::RelationClosed, format!("{relation} is closed"))
                    .with_instance(instance),
            ));
        }
        let selectable = self
            .report
            .flags(instance)
            .map_or(true, |flags| flags.is_option_selectable(&model, rel, ty))
            && !self.state.is_refused(&model, instance, rel, ty);
        if !selectable {
            return Ok(self.reject(
                Conflict::new(
                    ConflictReason::RuleForbids,
                    format!("{type_name} is not selectable in {relation}"),
                )
                .with_instance(instance),
            ));
        }

        let mut next = self.state.clone();
        if relation_def.options.len() > 1 {
            let chosen: Vec<InstanceId> = next
                .graph
                .children(instance, rel)
                .iter()
                .copied()
                .filter(|c| next.graph.get(*c).is_some_and(|c| c.origin == Origin::Engine))
                .collect();
            for child in chosen {
                next.remove_instance(child);
            }
        }
        let quantity = quantity.max(1);
        let count = next.graph.weighted_count(&model, instance, rel);
        let added = InstanceGraph::selection_weight(&model, ty, quantity);
        // Under split = false the quantity lands on an existing child
        let merged = match model.type_def(ty).split {
            SplitMode::False => next
                .graph
                .children(instance, rel)
                .iter()
                .filter_map(|c| next.graph.get(*c))
                .find(|c| c.type_id == ty && c.origin == Origin::User)
                .map_or(Some(quantity), |c| c.quantity.checked_add(quantity)),
            _ => Some(quantity),
        };
        let total = count.checked_add(added).filter(|_| merged.is_some());
        let exceeded = match (total, relation_def.max) {
            (None, _) => Some(format!("selecting {quantity} more {type_name} overflows the count of {relation}")),
            (Some(total), Some(max)) if total > max => Some(format!(
                "{relation} holds at most {max}, selecting {type_name} would make {total}"
            )),
            _ => None,
        };
        if let Some(detail) = exceeded {
            return Ok(self.reject(
                Conflict::new(ConflictReason::CardinalityExceeded, detail).with_instance(instance),
            ));
        }

        let placed = next.graph.place(&model, instance, rel, ty, quantity, Origin::User)?;
        next.add_instances(&model, &placed);
        next.rebuild_deps(&model);
        Ok(self.run(next, self.assignments.clone(), ResolveMode::Full))
    }

    /// Removes a user-selected instance with its subtree.
    pub fn deselect(&mut self, instance: InstanceId) -> Result<AssignResult> {
        self.ensure_open()?;
        if self.state.graph.instance(instance)?.origin != Origin::User {
            return Err(ConfigForgeError::NotRemovable(instance));
        }
        let mut next = self.state.clone();
        let removed = next.remove_instance(instance);
        next.rebuild_deps(&self.model);
        let mut assignments = self.assignments.clone();
        assignments.retain(|cell, _| !removed.contains(&cell.instance));
        Ok(self.run(next, assignments, ResolveMode::Full))
    }

    /// Changes the quantity of a user-selected instance. Zero deselects it.
    pub fn set_quantity(&mut self, instance: InstanceId, quantity: u32) -> Result<AssignResult> {
        self.ensure_open()?;
        if quantity == 0 {
            return self.deselect(instance);
        }
        let model = Arc::clone(&self.model);
        let current = self.state.graph.instance(instance)?;
        let def = model.type_def(current.type_id);
        let (owner, rel) = match current.parent {
            Some(parent) if current.origin == Origin::User && def.split != SplitMode::True => parent,
            _ => return Err(ConfigForgeError::NotConfigurable(format!("quantity of {instance}"))),
        };
        let relation_def = &model.type_def(self.state.graph.instance(owner)?.type_id).relations[rel];
        let count = self
            .state
            .graph
            .weighted_count(&model, owner, rel)
            .saturating_sub(def.weight(current.quantity))
            .saturating_add(def.weight(quantity));
        let growing = quantity > current.quantity;
        if growing && relation_def.close_relation && self.solved_once {
            return Ok(self.reject(
                Conflict::new(ConflictReason::RelationClosed, format!("{} is closed", relation_def.name))
                    .with_instance(instance),
            ));
        }
        if let Some(max) = relation_def.max.filter(|max| count > *max) {
            return Ok(self.reject(
                Conflict::new(
                    ConflictReason::CardinalityExceeded,
                    format!("{} holds at most {max}", relation_def.name),
                )
                .with_instance(instance),
            ));
        }

        let mut next = self.state.clone();
        next.graph.set_quantity(instance, quantity)?;
        Ok(self.run(next, self.assignments.clone(), ResolveMode::Full))
    }

    /// Ends the session. Further calls fail with `SessionClosed`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!(
            event = "session_close",
            session = %self.id,
            choice_points = self.totals.choice_points,
            backtracks = self.totals.backtracks,
            duration_ms = self.totals.duration.as_millis() as u64,
        );
        self.notify(SessionEvent::Closed { session: self.id });
        self.subscribers.clear();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ConfigForgeError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn configurable_cell(&self, instance: InstanceId, variable: &str) -> Result<(CellRef, PrimitiveKind)> {
        let def = self.model.type_def(self.state.graph.instance(instance)?.type_id);
        let var = def
            .variable_index(variable)
            .ok_or_else(|| ConfigForgeError::UnknownVariable {
                type_name: def.name.to_string(),
                variable: variable.to_string(),
            })?;
        if !def.variables[var].configurable {
            return Err(ConfigForgeError::NotConfigurable(format!("{}.{variable}", def.name)));
        }
        Ok((CellRef::new(instance, var), def.variables[var].kind))
    }

    fn mode_for(&self, cell: CellRef) -> ResolveMode {
        if self.incremental {
            ResolveMode::Incremental(vec![cell])
        } else {
            ResolveMode::Full
        }
    }

    fn run(&mut self, base: Configuration, assignments: BTreeMap<CellRef, Value>, mode: ResolveMode) -> AssignResult {
        let result = self.solver.solve(
            &base,
            SolveRequest {
                assignments: &assignments,
                mode,
            },
        );
        self.totals.accumulate(&result.statistics);
        match result.configuration {
            Some(configuration) if result.outcome.is_consistent() => {
                self.state = configuration;
                self.report = result.report;
                self.assignments = assignments;
                self.solved_once |= result.outcome.is_solved();
                self.outcome = result.outcome.clone();
                self.visible = self.capture();
                self.notify(SessionEvent::StateUpdated {
                    session: self.id,
                    outcome: result.outcome.clone(),
                });
            }
            _ => {
                debug!(event = "edit_rejected", session = %self.id, outcome = result.outcome.label());
                let event = match &result.outcome {
                    Outcome::Conflict(conflict) => SessionEvent::Conflict {
                        session: self.id,
                        conflict: conflict.clone(),
                    },
                    other => SessionEvent::Interrupted {
                        session: self.id,
                        outcome: other.clone(),
                    },
                };
                self.notify(event);
            }
        }
        AssignResult {
            outcome: result.outcome,
            state: self.visible.clone(),
            statistics: result.statistics,
        }
    }

    /// A conflict found before any solve ran.
    fn reject(&mut self, conflict: Conflict) -> AssignResult {
        debug!(event = "edit_rejected", session = %self.id, reason = ?conflict.reason);
        self.notify(SessionEvent::Conflict {
            session: self.id,
            conflict: conflict.clone(),
        });
        AssignResult {
            outcome: Outcome::Conflict(conflict),
            state: self.visible.clone(),
            statistics: SolveStatistics::default(),
        }
    }

    fn capture(&self) -> VisibleState {
        VisibleState::capture(
            &self.model,
            &self.state,
            &self.report,
            |cell| self.assignments.contains_key(&cell),
            self.solved_once,
        )
    }

    fn notify(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

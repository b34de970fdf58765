//! Rule evaluation.
//!
//! Rules are evaluated per instance in the order their type sorts them:
//! ascending sequence, then declaration. For presentation and narrowing
//! effects the first firing rule on a target decides it, so a `show` or
//! `enable` rule evaluated earlier overrides a later `hide` or `disable`.
//! Value narrowing itself happens in the propagator; the evaluator reports
//! flags, structural requests, messages and the preference score.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use configforge_core::{ConstraintRef, Diagnostic, InstanceId, Value};
use configforge_model::{InstancePattern, Model, RuleEffect, RuleTarget, TypeId};

use crate::eval::Evaluator;
use crate::graph::InstanceGraph;
use crate::statistics::StatisticsCollector;
use crate::store::DomainStore;

/// Presentation and enablement flags of one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFlags {
    pub hidden_vars: BTreeSet<usize>,
    pub disabled_vars: BTreeSet<usize>,
    pub hidden_values: Vec<(usize, Value)>,
    pub disabled_values: Vec<(usize, Value)>,
    pub hidden_relations: BTreeSet<usize>,
    pub disabled_relations: BTreeSet<usize>,
    pub hidden_options: BTreeSet<(usize, TypeId)>,
    pub disabled_options: BTreeSet<(usize, TypeId)>,
    /// Option types forbidden by firing exclude rules.
    pub excluded_options: BTreeSet<(usize, TypeId)>,
    /// The rule behind each entry of `disabled_options`.
    pub option_rules: BTreeMap<(usize, TypeId), ConstraintRef>,
}

impl InstanceFlags {
    pub fn is_value_hidden(&self, var: usize, value: &Value) -> bool {
        self.hidden_values.iter().any(|(v, x)| *v == var && x == value)
    }

    pub fn is_value_disabled(&self, var: usize, value: &Value) -> bool {
        self.disabled_values.iter().any(|(v, x)| *v == var && x == value)
    }

    /// True if search must not instantiate `ty` into `rel`.
    pub fn is_option_disabled(&self, model: &Model, rel: usize, ty: TypeId) -> bool {
        let matches = |set: &BTreeSet<(usize, TypeId)>| {
            set.iter().any(|(r, option)| *r == rel && model.is_a(ty, *option))
        };
        self.disabled_relations.contains(&rel)
            || matches(&self.disabled_options)
            || matches(&self.excluded_options)
    }

    /// True if a user may select `ty` into `rel`.
    pub fn is_option_selectable(&self, model: &Model, rel: usize, ty: TypeId) -> bool {
        let hidden = self.hidden_relations.contains(&rel)
            || self
                .hidden_options
                .iter()
                .any(|(r, option)| *r == rel && model.is_a(ty, *option));
        !hidden && !self.is_option_disabled(model, rel, ty)
    }
}

/// A firing `require` rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub owner: InstanceId,
    pub rule: ConstraintRef,
    pub pattern: InstancePattern,
}

/// What one rule pass over the instance graph produced.
#[derive(Debug, Clone, Default)]
pub struct RuleReport {
    pub flags: BTreeMap<InstanceId, InstanceFlags>,
    pub diagnostics: Vec<Diagnostic>,
    /// Sum of the scores of firing preference rules.
    pub preference: i64,
    pub required: Vec<Requirement>,
    pub excluded: Vec<Requirement>,
}

impl RuleReport {
    pub fn flags(&self, id: InstanceId) -> Option<&InstanceFlags> {
        self.flags.get(&id)
    }

    /// Names of the rules that fired with a structural effect.
    pub fn structural_rules(&self) -> BTreeSet<(InstanceId, ConstraintRef)> {
        self.required
            .iter()
            .chain(&self.excluded)
            .map(|r| (r.owner, r.rule.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuleEvaluator<'a> {
    model: &'a Model,
    stats: Option<&'a StatisticsCollector>,
}

impl<'a> RuleEvaluator<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self { model, stats: None }
    }

    /// Counts every condition evaluation in `stats`.
    pub fn with_statistics(mut self, stats: &'a StatisticsCollector) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Evaluates every rule of every instance against the current domains.
    pub fn apply_rules(&self, graph: &InstanceGraph, store: &DomainStore) -> RuleReport {
        let mut report = RuleReport::default();
        for instance in graph.iter() {
            let flags = self.evaluate(graph, store, instance.id, Some(&mut report));
            report.flags.insert(instance.id, flags);
        }
        report
    }

    /// Flags of one instance, without logging or collecting effects.
    pub fn instance_flags(&self, graph: &InstanceGraph, store: &DomainStore, id: InstanceId) -> InstanceFlags {
        self.evaluate(graph, store, id, None)
    }

    fn evaluate(
        &self,
        graph: &InstanceGraph,
        store: &DomainStore,
        id: InstanceId,
        mut report: Option<&mut RuleReport>,
    ) -> InstanceFlags {
        let mut flags = InstanceFlags::default();
        let Some(instance) = graph.get(id) else {
            return flags;
        };
        let def = self.model.type_def(instance.type_id);
        let eval = Evaluator::new(self.model, graph, store);
        let mut shown: HashSet<&RuleTarget> = HashSet::new();
        let mut enabled: HashSet<&RuleTarget> = HashSet::new();

        for rule in &def.rules {
            let collecting = report.is_some();
            // Outside a full pass only flag-bearing rules matter
            if !collecting
                && !matches!(
                    rule.effect,
                    RuleEffect::Visibility { .. } | RuleEffect::Enablement { .. } | RuleEffect::Exclude(_)
                )
            {
                continue;
            }
            if let Some(stats) = self.stats {
                stats.record_evaluation();
            }
            if !eval.truth(id, &rule.condition).is_true() {
                continue;
            }
            if let Some(report) = report.as_deref_mut() {
                debug!(event = "rule_fired", rule = %rule.name, instance = %id);
                match &rule.effect {
                    RuleEffect::Require(pattern) => report.required.push(Requirement {
                        owner: id,
                        rule: rule.name.clone(),
                        pattern: pattern.clone(),
                    }),
                    RuleEffect::Exclude(pattern) => report.excluded.push(Requirement {
                        owner: id,
                        rule: rule.name.clone(),
                        pattern: pattern.clone(),
                    }),
                    RuleEffect::Message { severity, text } => report.diagnostics.push(Diagnostic {
                        severity: *severity,
                        message: text.clone(),
                        source: rule.name.clone(),
                        instance: id,
                    }),
                    RuleEffect::Preference { score } => report.preference += score,
                    RuleEffect::Visibility { .. } | RuleEffect::Enablement { .. } => {}
                }
            }
            match &rule.effect {
                RuleEffect::Visibility { hide, target } => {
                    if shown.insert(target) && *hide {
                        mark(
                            target,
                            &mut flags.hidden_vars,
                            &mut flags.hidden_values,
                            &mut flags.hidden_relations,
                            &mut flags.hidden_options,
                        );
                    }
                }
                RuleEffect::Enablement { disable, target } => {
                    if enabled.insert(target) && *disable {
                        if let RuleTarget::Relation {
                            rel,
                            option: Some(option),
                        } = target
                        {
                            flags.option_rules.insert((*rel, *option), rule.name.clone());
                        }
                        mark(
                            target,
                            &mut flags.disabled_vars,
                            &mut flags.disabled_values,
                            &mut flags.disabled_relations,
                            &mut flags.disabled_options,
                        );
                    }
                }
                RuleEffect::Exclude(pattern) => {
                    flags.excluded_options.insert((pattern.relation, pattern.type_id));
                }
                _ => {}
            }
        }
        flags
    }
}

fn mark(
    target: &RuleTarget,
    vars: &mut BTreeSet<usize>,
    values: &mut Vec<(usize, Value)>,
    relations: &mut BTreeSet<usize>,
    options: &mut BTreeSet<(usize, TypeId)>,
) {
    match target {
        RuleTarget::Variable { var, value: None } => {
            vars.insert(*var);
        }
        RuleTarget::Variable {
            var,
            value: Some(value),
        } => values.push((*var, value.clone())),
        RuleTarget::Relation { rel, option: None } => {
            relations.insert(*rel);
        }
        RuleTarget::Relation {
            rel,
            option: Some(option),
        } => {
            options.insert((*rel, *option));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ExternalValues;
    use configforge_core::{CellRef, Severity};
    use configforge_test::{laptop_rules_model, workstation_model};

    fn setup(model: &Model, display: Option<&str>) -> (InstanceGraph, DomainStore) {
        let graph = InstanceGraph::instantiate_root(model);
        let mut store = DomainStore::new();
        store.init_instance(model, &graph, InstanceId::ROOT, &ExternalValues::new());
        if let Some(display) = display {
            let var = model.type_def(model.root()).variable_index("Display").unwrap();
            let cell = CellRef::new(InstanceId::ROOT, var);
            assert!(store.assign(model, &graph, cell, &Value::str(display)));
        }
        (graph, store)
    }

    #[test]
    fn test_hide_rule_hides_one_option() {
        let model = laptop_rules_model();
        let (graph, store) = setup(&model, Some("hd"));

        let report = RuleEvaluator::new(&model).apply_rules(&graph, &store);
        let flags = report.flags(InstanceId::ROOT).unwrap();
        let memory = model.type_def(model.root()).relation_index("Memory").unwrap();
        let ram8 = model.type_id("Ram8GB").unwrap();
        let ram16 = model.type_id("Ram16GB").unwrap();

        assert!(!flags.is_option_selectable(&model, memory, ram16));
        assert!(flags.is_option_selectable(&model, memory, ram8));
        // Hidden is not disabled: search may still pick it
        assert!(!flags.is_option_disabled(&model, memory, ram16));
    }

    #[test]
    fn test_undecided_condition_fires_nothing() {
        let model = laptop_rules_model();
        let (graph, store) = setup(&model, None);

        let report = RuleEvaluator::new(&model).apply_rules(&graph, &store);
        assert_eq!(report.flags(InstanceId::ROOT), Some(&InstanceFlags::default()));
        assert!(report.diagnostics.is_empty());
        assert_eq!(report.preference, 0);
    }

    #[test]
    fn test_messages_and_preferences() {
        let model = laptop_rules_model();
        let (graph, store) = setup(&model, Some("4k"));

        let stats = StatisticsCollector::new();
        let report = RuleEvaluator::new(&model)
            .with_statistics(&stats)
            .apply_rules(&graph, &store);

        assert_eq!(report.preference, 5);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].severity, Severity::Warning);
        assert_eq!(report.diagnostics[0].source.name, "FourKBattery");
        assert_eq!(stats.current_evaluations(), 4);

        let keyboard = model.type_def(model.root()).variable_index("Keyboard").unwrap();
        let flags = report.flags(InstanceId::ROOT).unwrap();
        assert!(flags.is_value_disabled(keyboard, &Value::str("de")));
        assert!(!flags.is_value_disabled(keyboard, &Value::str("us")));
    }

    #[test]
    fn test_structural_rules_are_reported() {
        let model = workstation_model();
        let graph = InstanceGraph::instantiate_root(&model);
        let mut store = DomainStore::new();
        store.init_instance(&model, &graph, InstanceId::ROOT, &ExternalValues::new());
        let profile = CellRef::new(
            InstanceId::ROOT,
            model.type_def(model.root()).variable_index("Profile").unwrap(),
        );

        assert!(store.assign(&model, &graph, profile, &Value::str("eco")));
        let report = RuleEvaluator::new(&model).apply_rules(&graph, &store);
        assert!(report.required.is_empty());
        assert_eq!(report.excluded.len(), 1);
        assert_eq!(report.excluded[0].rule.name, "EcoStorage");

        let storage = model.type_def(model.root()).relation_index("Storage").unwrap();
        let flags = report.flags(InstanceId::ROOT).unwrap();
        assert!(flags.is_option_disabled(&model, storage, model.type_id("Hdd").unwrap()));
        assert!(!flags.is_option_disabled(&model, storage, model.type_id("Ssd").unwrap()));

        assert!(store.assign(&model, &graph, profile, &Value::str("turbo")));
        let report = RuleEvaluator::new(&model).apply_rules(&graph, &store);
        assert_eq!(report.required.len(), 1);
        assert_eq!(report.required[0].pattern.assignments.len(), 1);
        assert_eq!(report.structural_rules().len(), 1);
    }
}

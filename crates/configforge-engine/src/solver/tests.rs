use super::*;
use crate::event::CountingDiagnosticsSink;
use crate::store::ExternalValues;
use configforge_test::{laptop_model, laptop_rules_model, workstation_model};

fn root_cell(model: &Model, name: &str) -> CellRef {
    let var = model.type_def(model.root()).variable_index(name).unwrap();
    CellRef::new(InstanceId::ROOT, var)
}

fn assignments(model: &Model, pairs: &[(&str, Value)]) -> BTreeMap<CellRef, Value> {
    pairs
        .iter()
        .map(|(name, value)| (root_cell(model, name), value.clone()))
        .collect()
}

fn full(
    solver: &Solver,
    base: &Configuration,
    assignments: &BTreeMap<CellRef, Value>,
) -> SolveResult {
    solver.solve(
        base,
        SolveRequest {
            assignments,
            mode: ResolveMode::Full,
        },
    )
}

fn children_of(model: &Model, config: &Configuration, relation: &str) -> Vec<InstanceId> {
    let rel = model.type_def(model.root()).relation_index(relation).unwrap();
    config.graph.children(InstanceId::ROOT, rel).to_vec()
}

fn type_name(model: &Model, config: &Configuration, id: InstanceId) -> String {
    model.type_def(config.graph.get(id).unwrap().type_id).name.to_string()
}

#[test]
fn test_workstation_defaults() {
    let model = workstation_model();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let base = Configuration::build(&model, ExternalValues::new());

    let result = full(&solver, &base, &BTreeMap::new());
    assert_eq!(result.outcome, Outcome::Solved);
    let solved = result.configuration.unwrap();
    assert_eq!(
        solved.store.value(root_cell(&model, "Profile")),
        Some(&Value::str("balanced"))
    );
    assert_eq!(solved.store.value(root_cell(&model, "Power")), Some(&Value::Int(65)));
    let storage = children_of(&model, &solved, "Storage");
    assert_eq!(type_name(&model, &solved, storage[0]), "Hdd");
}

#[test]
fn test_require_rule_adds_pinned_instance() {
    let model = workstation_model();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let base = Configuration::build(&model, ExternalValues::new());
    let turbo = assignments(&model, &[("Profile", Value::str("turbo"))]);

    let result = full(&solver, &base, &turbo);
    assert_eq!(result.outcome, Outcome::Solved);
    let solved = result.configuration.unwrap();
    let fans = children_of(&model, &solved, "Fans");
    assert_eq!(fans.len(), 3);

    let forced: Vec<_> = fans
        .iter()
        .filter_map(|id| solved.graph.get(*id))
        .filter(|i| matches!(i.origin, Origin::Rule { .. }))
        .collect();
    assert_eq!(forced.len(), 1);
    let rpm = model.type_by_name("Fan").unwrap().variable_index("rpm").unwrap();
    assert_eq!(
        solved.store.value(CellRef::new(forced[0].id, rpm)),
        Some(&Value::Int(3000))
    );
}

#[test]
fn test_require_rule_instance_goes_when_rule_stops() {
    let model = workstation_model();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let base = Configuration::build(&model, ExternalValues::new());
    let turbo = assignments(&model, &[("Profile", Value::str("turbo"))]);
    let turbo_state = full(&solver, &base, &turbo).configuration.unwrap();

    let balanced = assignments(&model, &[("Profile", Value::str("balanced"))]);
    let result = full(&solver, &turbo_state, &balanced);
    assert_eq!(result.outcome, Outcome::Solved);
    assert_eq!(children_of(&model, &result.configuration.unwrap(), "Fans").len(), 2);
}

#[test]
fn test_exclude_rule_steers_search() {
    let model = workstation_model();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let base = Configuration::build(&model, ExternalValues::new());
    let eco = assignments(&model, &[("Profile", Value::str("eco"))]);

    let result = full(&solver, &base, &eco);
    assert_eq!(result.outcome, Outcome::Solved);
    let solved = result.configuration.unwrap();
    let storage = children_of(&model, &solved, "Storage");
    assert_eq!(type_name(&model, &solved, storage[0]), "Ssd");
    assert_eq!(solved.excluded.len(), 1);
    assert_eq!(solved.store.value(root_cell(&model, "Power")), Some(&Value::Int(45)));
}

#[test]
fn test_structural_rules_need_passes() {
    let model = workstation_model();
    let mut config = EngineConfig::default();
    config.search.max_rule_passes = 1;
    let solver = Solver::new(model.clone(), config);
    let base = Configuration::build(&model, ExternalValues::new());
    let turbo = assignments(&model, &[("Profile", Value::str("turbo"))]);

    let result = full(&solver, &base, &turbo);
    let conflict = result.outcome.conflict().unwrap();
    assert_eq!(conflict.reason, ConflictReason::StructuralRulesDiverged);
    assert!(result.configuration.is_none());
}

#[test]
fn test_constraint_conflict() {
    let model = laptop_model();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let mut base = Configuration::build(&model, ExternalValues::new());
    let memory = model.type_def(model.root()).relation_index("Memory").unwrap();
    let ram8 = model.type_id("Ram8GB").unwrap();
    let placed = base
        .graph
        .place(&model, InstanceId::ROOT, memory, ram8, 1, Origin::User)
        .unwrap();
    base.add_instances(&model, &placed);
    base.rebuild_deps(&model);

    let four_k = assignments(&model, &[("Display", Value::str("4k"))]);
    let result = full(&solver, &base, &four_k);
    let conflict = result.outcome.conflict().unwrap();
    assert_eq!(conflict.reason, ConflictReason::Constraint);
    assert_eq!(
        conflict.constraint.as_ref().unwrap().full_name(),
        "Laptop/FourKNeedsMemory"
    );
    assert!(result.configuration.is_none());
}

#[test]
fn test_disable_rule_conflict() {
    let model = laptop_rules_model();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let base = Configuration::build(&model, ExternalValues::new());
    let edits = assignments(
        &model,
        &[("Display", Value::str("4k")), ("Keyboard", Value::str("de"))],
    );

    let conflict = full(&solver, &base, &edits).outcome.conflict().cloned().unwrap();
    assert_eq!(conflict.reason, ConflictReason::RuleForbids);
    assert_eq!(conflict.constraint.unwrap().name, "NoGermanLayoutOn4k");
}

#[test]
fn test_value_outside_domain() {
    let model = laptop_model();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let base = Configuration::build(&model, ExternalValues::new());
    let edits = assignments(&model, &[("Keyboard", Value::str("jp"))]);

    let conflict = full(&solver, &base, &edits).outcome.conflict().cloned().unwrap();
    assert_eq!(conflict.reason, ConflictReason::OutsideDomain);
    assert_eq!(conflict.cell, Some(root_cell(&model, "Keyboard")));
}

#[test]
fn test_user_driven_relation_leaves_incomplete() {
    let model = laptop_model();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let base = Configuration::build(&model, ExternalValues::new());

    match full(&solver, &base, &BTreeMap::new()).outcome {
        Outcome::Incomplete { unmet } => {
            assert_eq!(unmet.len(), 1);
            assert_eq!(&*unmet[0].relation, "Memory");
        }
        other => panic!("expected incomplete, got {other:?}"),
    }
}

#[test]
fn test_incremental_resolve_touches_component_only() {
    let model = laptop_model();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let base = Configuration::build(&model, ExternalValues::new());
    let first = full(&solver, &base, &BTreeMap::new()).configuration.unwrap();

    let keyboard = root_cell(&model, "Keyboard");
    let edits = assignments(&model, &[("Keyboard", Value::str("fr"))]);
    let result = solver.solve(
        &first,
        SolveRequest {
            assignments: &edits,
            mode: ResolveMode::Incremental(vec![keyboard]),
        },
    );
    assert!(result.outcome.is_consistent());
    assert_eq!(result.statistics.touched_instances, 1);
    let solved = result.configuration.unwrap();
    assert_eq!(solved.store.value(keyboard), Some(&Value::str("fr")));
    // Untouched cells keep their earlier values
    assert_eq!(
        solved.store.value(root_cell(&model, "Display")),
        first.store.value(root_cell(&model, "Display"))
    );
}

#[test]
fn test_incremental_falls_back_when_relations_are_read() {
    let model = laptop_model();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let base = Configuration::build(&model, ExternalValues::new());
    let first = full(&solver, &base, &BTreeMap::new()).configuration.unwrap();

    let edits = assignments(&model, &[("Display", Value::str("4k"))]);
    let result = solver.solve(
        &first,
        SolveRequest {
            assignments: &edits,
            mode: ResolveMode::Incremental(vec![root_cell(&model, "Display")]),
        },
    );
    assert!(result.outcome.is_consistent());
    assert_eq!(result.statistics.touched_instances, first.graph.len() as u64);
}

#[test]
fn test_best_of_ranks_by_preference() {
    let model = laptop_rules_model();
    let solver = Solver::new(model.clone(), EngineConfig::default().with_best_of(4));
    let base = Configuration::build(&model, ExternalValues::new());

    let result = full(&solver, &base, &BTreeMap::new());
    assert!(result.outcome.is_consistent());
    assert_eq!(result.report.preference, 5);
    assert_eq!(result.report.diagnostics.len(), 1);
    let solved = result.configuration.unwrap();
    assert_eq!(
        solved.store.value(root_cell(&model, "Display")),
        Some(&Value::str("4k"))
    );
}

#[test]
fn test_budget_times_out() {
    let model = workstation_model();
    let solver = Solver::new(
        model.clone(),
        EngineConfig::default().with_choice_point_limit(0),
    );
    let base = Configuration::build(&model, ExternalValues::new());

    let result = full(&solver, &base, &BTreeMap::new());
    assert_eq!(result.outcome, Outcome::Timeout);
    assert!(result.configuration.is_none());
}

#[test]
fn test_cancel_is_consumed_by_one_solve() {
    let model = workstation_model();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let base = Configuration::build(&model, ExternalValues::new());

    solver.cancel();
    assert_eq!(full(&solver, &base, &BTreeMap::new()).outcome, Outcome::Cancelled);
    assert_eq!(full(&solver, &base, &BTreeMap::new()).outcome, Outcome::Solved);
}

#[test]
fn test_sinks_see_every_solve() {
    let model = laptop_model();
    let counter = Arc::new(CountingDiagnosticsSink::new());
    let solver = Solver::new(model.clone(), EngineConfig::default()).with_sink(counter.clone());
    let base = Configuration::build(&model, ExternalValues::new());

    full(&solver, &base, &BTreeMap::new());
    full(&solver, &base, &assignments(&model, &[("Keyboard", Value::str("jp"))]));

    assert_eq!(counter.started_count(), 2);
    assert_eq!(counter.solve_count(), 2);
    assert_eq!(counter.conflict_count(), 1);
}

fn glossy_workstation() -> Arc<Model> {
    use configforge_model::{ActionTarget, Expr, PrimitiveKind, RuleAction, RuleDef, VariableDef};

    let mut schema = configforge_test::workstation_schema();
    let root = schema.types.remove(0);
    let root = root
        .with_variable(VariableDef::new("Finish", PrimitiveKind::String).with_values(["matte", "gloss"]))
        .with_rule(RuleDef::new(
            "GlossNoHdd",
            Expr::eq(Expr::var("Finish"), Expr::string("gloss")),
            RuleAction::Disable(ActionTarget::relation("Storage").of_type("Hdd")),
        ));
    schema.types.insert(0, root);
    Arc::new(Model::load(&schema).unwrap())
}

/// A configuration holding one `Hdd` of the given origin, with `Finish`
/// set to gloss.
fn glossy_with_hdd(model: &Model, origin: Origin) -> Configuration {
    let mut config = Configuration::build(model, ExternalValues::new());
    let storage = model.type_def(model.root()).relation_index("Storage").unwrap();
    let hdd = model.type_id("Hdd").unwrap();
    let placed = config
        .graph
        .place(model, InstanceId::ROOT, storage, hdd, 1, origin)
        .unwrap();
    config.add_instances(model, &placed);
    config.rebuild_deps(model);
    assert!(config
        .store
        .assign(model, &config.graph, root_cell(model, "Finish"), &Value::str("gloss")));
    config
}

#[test]
fn test_disabled_option_removes_engine_child() {
    let model = glossy_workstation();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let mut config = glossy_with_hdd(&model, Origin::Engine);
    let report = RuleEvaluator::new(&model).apply_rules(&config.graph, &config.store);

    assert_eq!(solver.reconcile(&mut config, &report), Ok(true));
    assert!(children_of(&model, &config, "Storage").is_empty());
    let storage = model.type_def(model.root()).relation_index("Storage").unwrap();
    assert!(config.is_refused(&model, InstanceId::ROOT, storage, model.type_id("Hdd").unwrap()));
}

#[test]
fn test_disabled_option_forbids_user_child() {
    let model = glossy_workstation();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let mut config = glossy_with_hdd(&model, Origin::User);
    let report = RuleEvaluator::new(&model).apply_rules(&config.graph, &config.store);

    let conflict = solver.reconcile(&mut config, &report).unwrap_err();
    assert_eq!(conflict.reason, ConflictReason::RuleForbids);
    assert_eq!(conflict.constraint.unwrap().name, "GlossNoHdd");
}

#[test]
fn test_disabled_option_steers_search() {
    let model = glossy_workstation();
    let solver = Solver::new(model.clone(), EngineConfig::default());
    let base = Configuration::build(&model, ExternalValues::new());

    let plain = full(&solver, &base, &assignments(&model, &[("Finish", Value::str("matte"))]));
    let plain = plain.configuration.unwrap();
    assert_eq!(type_name(&model, &plain, children_of(&model, &plain, "Storage")[0]), "Hdd");

    let result = full(&solver, &plain, &assignments(&model, &[("Finish", Value::str("gloss"))]));
    assert_eq!(result.outcome, Outcome::Solved);
    let solved = result.configuration.unwrap();
    assert_eq!(type_name(&model, &solved, children_of(&model, &solved, "Storage")[0]), "Ssd");
}

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::*;
use crate::store::ExternalValues;
use crate::termination::{ChoicePointCountTermination, ExternalTermination, Unbounded};
use configforge_test::{laptop_model, workstation_model};

fn start(model: &Model, assignments: &[(&str, &str)]) -> Configuration {
    let mut config = Configuration::build(model, ExternalValues::new());
    for (name, value) in assignments {
        let cell = root_cell(model, name);
        assert!(config
            .store
            .assign(model, &config.graph, cell, &Value::str(*value)));
    }
    let stats = StatisticsCollector::new();
    let deps = config.deps.clone();
    let result = Propagator::new(model, &stats).propagate(&config.graph, &mut config.store, &deps, Seeds::All);
    assert!(result.is_consistent());
    config
}

fn root_cell(model: &Model, name: &str) -> CellRef {
    let var = model.type_def(model.root()).variable_index(name).unwrap();
    CellRef::new(InstanceId::ROOT, var)
}

fn storage_type(model: &Model, config: &Configuration) -> String {
    let storage = model.type_def(model.root()).relation_index("Storage").unwrap();
    let children = config.graph.children(InstanceId::ROOT, storage);
    assert_eq!(children.len(), 1);
    let ty = config.graph.get(children[0]).unwrap().type_id;
    model.type_def(ty).name.to_string()
}

fn solve(model: &Arc<Model>, config: Configuration, stats: &StatisticsCollector) -> Configuration {
    let engine = SearchEngine::new(model, stats, &Unbounded, &Unbounded);
    match engine.search(config) {
        SearchOutcome::Solved(mut solutions) => solutions.remove(0),
        other => panic!("expected a solution, got {other:?}"),
    }
}

#[test]
fn test_defaults_and_declaration_order() {
    let model = workstation_model();
    let stats = StatisticsCollector::new();
    let solved = solve(&model, start(&model, &[]), &stats);

    assert_eq!(
        solved.store.value(root_cell(&model, "Profile")),
        Some(&Value::str("balanced"))
    );
    assert_eq!(storage_type(&model, &solved), "Hdd");
    // An Hdd pushes the budget past 45 W
    assert_eq!(solved.store.value(root_cell(&model, "Power")), Some(&Value::Int(65)));
    assert!(solved.open_cells(&model).is_empty());
    assert!(solved.unmet(&model).is_empty());
    assert_eq!(stats.current_backtracks(), 0);
}

#[test]
fn test_contradiction_backtracks_to_next_option() {
    let model = workstation_model();
    let stats = StatisticsCollector::new();
    let solved = solve(&model, start(&model, &[("Profile", "quiet")]), &stats);

    assert_eq!(storage_type(&model, &solved), "Ssd");
    assert_eq!(solved.store.value(root_cell(&model, "Power")), Some(&Value::Int(45)));
    assert!(stats.current_backtracks() >= 1);
}

#[test]
fn test_exhausted_reports_constraint() {
    let model = workstation_model();
    let mut config = start(&model, &[("Profile", "quiet")]);
    let storage = model.type_def(model.root()).relation_index("Storage").unwrap();
    config
        .excluded
        .insert((InstanceId::ROOT, storage, model.type_id("Ssd").unwrap()));

    let stats = StatisticsCollector::new();
    match SearchEngine::new(&model, &stats, &Unbounded, &Unbounded).search(config) {
        SearchOutcome::Exhausted(Some(contradiction)) => {
            assert_eq!(contradiction.constraint.unwrap().name, "QuietStorage");
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[test]
fn test_backtrack_restores_snapshot() {
    let model = laptop_model();
    let config = start(&model, &[]);
    let display = root_cell(&model, "Display");
    let keyboard = root_cell(&model, "Keyboard");
    let before = config.store.cell(display).unwrap().clone();

    let stats = StatisticsCollector::new();
    let engine = SearchEngine::new(&model, &stats, &Unbounded, &Unbounded);
    let mut trail = vec![ChoicePoint {
        decision: Decision::Assign(display),
        tried: Choice::Value(Value::str("hd")),
        snapshot: config.clone(),
    }];
    let mut last = None;
    let restored = engine.backtrack(&mut trail, &mut last).unwrap();

    let mut expected = before;
    expected.remove(&Value::str("hd"));
    assert_eq!(restored.store.cell(display), Some(&expected));
    assert_eq!(restored.store.cell(keyboard), config.store.cell(keyboard));
    assert!(trail.is_empty());
    assert_eq!(stats.current_backtracks(), 1);
}

#[test]
fn test_decision_order() {
    let model = workstation_model();
    let config = start(&model, &[]);
    let stats = StatisticsCollector::new();
    let engine = SearchEngine::new(&model, &stats, &Unbounded, &Unbounded);

    // Profile is the root's first open variable with the lowest sequence
    assert_eq!(
        engine.next_decision(&config),
        Some(Decision::Assign(root_cell(&model, "Profile")))
    );
    assert_eq!(
        engine.candidates(&config, Decision::Assign(root_cell(&model, "Profile")))[0],
        Choice::Value(Value::str("balanced"))
    );
}

#[test]
fn test_best_of_collects_several_solutions() {
    let model = laptop_model();
    let stats = StatisticsCollector::new();
    let engine = SearchEngine::new(&model, &stats, &Unbounded, &Unbounded).with_best_of(3);

    match engine.search(start(&model, &[])) {
        SearchOutcome::Solved(solutions) => {
            assert_eq!(solutions.len(), 3);
            let display = root_cell(&model, "Display");
            let keyboard = root_cell(&model, "Keyboard");
            let first = &solutions[0];
            assert_eq!(first.store.value(display), Some(&Value::str("hd")));
            assert_eq!(first.store.value(keyboard), Some(&Value::str("us")));
            assert_ne!(
                solutions[1].store.value(keyboard),
                first.store.value(keyboard)
            );
        }
        other => panic!("expected solutions, got {other:?}"),
    }
}

#[test]
fn test_budget_ends_search() {
    let model = workstation_model();
    let stats = StatisticsCollector::new();
    let budget = ChoicePointCountTermination::new(0);
    let outcome = SearchEngine::new(&model, &stats, &budget, &Unbounded).search(start(&model, &[]));
    assert!(matches!(outcome, SearchOutcome::Timeout));
}

#[test]
fn test_cancellation() {
    let model = workstation_model();
    let stats = StatisticsCollector::new();
    let flag = Arc::new(AtomicBool::new(false));
    let cancel = ExternalTermination::new(Arc::clone(&flag));
    let engine = SearchEngine::new(&model, &stats, &Unbounded, &cancel);
    assert!(matches!(engine.search(start(&model, &[])), SearchOutcome::Solved(_)));

    flag.store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(matches!(engine.search(start(&model, &[])), SearchOutcome::Cancelled));
}

#[test]
fn test_multi_selection_search_tries_every_subset() {
    use configforge_model::{Expr, PrimitiveKind, Schema, TypeDecl, VariableDef};

    let schema = Schema::new("Kit").with_type(
        TypeDecl::new("Kit")
            .virtual_type()
            .with_variable(
                VariableDef::new("Features", PrimitiveKind::StringMulti).with_values(["wifi", "bt", "nfc"]),
            )
            .with_constraint("NeedsWifi", Expr::contains(Expr::var("Features"), "wifi"))
            .with_constraint("NeedsBt", Expr::contains(Expr::var("Features"), "bt")),
    );
    let model = Arc::new(Model::load(&schema).unwrap());
    let stats = StatisticsCollector::new();
    let solved = solve(&model, start(&model, &[]), &stats);

    assert_eq!(
        solved.store.value(root_cell(&model, "Features")),
        Some(&Value::multi(["wifi", "bt"]))
    );
    assert!(solved.unmet(&model).is_empty());
}

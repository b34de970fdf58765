use std::sync::Arc;

use super::*;
use crate::graph::Origin;
use crate::store::ExternalValues;
use configforge_core::Domain;
use configforge_test::{laptop_model, laptop_rules_model, workstation_model};

struct Setup {
    model: Arc<Model>,
    graph: InstanceGraph,
    store: DomainStore,
    stats: StatisticsCollector,
}

impl Setup {
    fn new(model: Arc<Model>) -> Self {
        let mut graph = InstanceGraph::instantiate_root(&model);
        graph.expand_all(&model, InstanceId::ROOT);
        let mut store = DomainStore::new();
        for id in graph.ids() {
            store.init_instance(&model, &graph, id, &ExternalValues::new());
        }
        Self {
            model,
            graph,
            store,
            stats: StatisticsCollector::new(),
        }
    }

    fn add(&mut self, relation: &str, type_name: &str) -> InstanceId {
        let root = self.model.type_def(self.model.root());
        let rel = root.relation_index(relation).unwrap();
        let ty = self.model.type_id(type_name).unwrap();
        let id = self
            .graph
            .place(&self.model, InstanceId::ROOT, rel, ty, 1, Origin::Engine)
            .unwrap()[0];
        self.store
            .init_instance(&self.model, &self.graph, id, &ExternalValues::new());
        id
    }

    fn cell(&self, name: &str) -> CellRef {
        let var = self
            .model
            .type_def(self.model.root())
            .variable_index(name)
            .unwrap();
        CellRef::new(InstanceId::ROOT, var)
    }

    fn assign(&mut self, name: &str, value: &str) {
        let cell = self.cell(name);
        assert!(self
            .store
            .assign(&self.model, &self.graph, cell, &Value::str(value)));
    }

    fn propagate(&mut self) -> PropagationResult {
        let deps = DependencyGraph::build(&self.model, &self.graph, &self.store);
        Propagator::new(&self.model, &self.stats).propagate(&self.graph, &mut self.store, &deps, Seeds::All)
    }

    fn domain(&self, name: &str) -> &Domain {
        self.store.cell(self.cell(name)).unwrap()
    }
}

#[test]
fn test_open_relation_prunes_nothing() {
    let mut setup = Setup::new(laptop_model());
    let result = setup.propagate();

    assert!(result.is_consistent());
    assert!(result.narrowed.is_empty());
    assert_eq!(setup.domain("Display").len(), 2);
}

#[test]
fn test_small_memory_rules_out_4k() {
    let mut setup = Setup::new(laptop_model());
    setup.add("Memory", "Ram8GB");

    let result = setup.propagate();
    assert!(result.is_consistent());
    assert!(result.narrowed.contains(&setup.cell("Display")));
    assert_eq!(setup.domain("Display").single(), Some(&Value::str("hd")));
}

#[test]
fn test_assigned_4k_with_small_memory_contradicts() {
    let mut setup = Setup::new(laptop_model());
    setup.assign("Display", "4k");
    setup.add("Memory", "Ram8GB");

    let result = setup.propagate();
    let contradiction = result.contradiction.unwrap();
    assert_eq!(
        contradiction.constraint.unwrap().full_name(),
        "Laptop/FourKNeedsMemory"
    );
    assert!(setup.stats.current_violations() > 0);
}

#[test]
fn test_large_memory_keeps_4k() {
    let mut setup = Setup::new(laptop_model());
    setup.assign("Display", "4k");
    setup.add("Memory", "Ram16GB");

    assert!(setup.propagate().is_consistent());
}

#[test]
fn test_fixpoint_is_idempotent() {
    let mut setup = Setup::new(laptop_model());
    setup.add("Memory", "Ram8GB");

    assert!(!setup.propagate().narrowed.is_empty());
    let again = setup.propagate();
    assert!(again.is_consistent());
    assert!(again.narrowed.is_empty());
}

#[test]
fn test_disable_rule_removes_value() {
    let mut setup = Setup::new(laptop_rules_model());
    setup.assign("Display", "4k");

    assert!(setup.propagate().is_consistent());
    let keyboard = setup.domain("Keyboard");
    assert!(!keyboard.contains(&Value::str("de")));
    assert!(keyboard.contains(&Value::str("us")));
}

#[test]
fn test_disable_rule_waits_for_condition() {
    let mut setup = Setup::new(laptop_rules_model());

    assert!(setup.propagate().is_consistent());
    assert_eq!(setup.domain("Keyboard").len(), 3);
}

#[test]
fn test_disabled_assignment_contradicts() {
    let mut setup = Setup::new(laptop_rules_model());
    setup.assign("Display", "4k");
    setup.assign("Keyboard", "de");

    let contradiction = setup.propagate().contradiction.unwrap();
    assert_eq!(contradiction.cell, Some(setup.cell("Keyboard")));
    assert_eq!(contradiction.constraint.unwrap().name, "NoGermanLayoutOn4k");
}

#[test]
fn test_power_budget_prunes_small_supply() {
    let mut setup = Setup::new(workstation_model());
    setup.add("Storage", "Hdd");

    assert!(setup.propagate().is_consistent());
    assert_eq!(
        setup.domain("Power").values(),
        &[Value::Int(65), Value::Int(90)]
    );
}

#[test]
fn test_power_budget_keeps_small_supply_for_ssd() {
    let mut setup = Setup::new(workstation_model());
    setup.add("Storage", "Ssd");

    assert!(setup.propagate().is_consistent());
    assert_eq!(setup.domain("Power").len(), 3);
}

#[test]
fn test_recomputed_attribute_follows_its_source() {
    use configforge_model::{PrimitiveKind, Schema, TypeDecl, VariableDef};

    let schema = Schema::new("Desk").with_type(
        TypeDecl::new("Desk")
            .virtual_type()
            .with_variable(VariableDef::new("Finish", PrimitiveKind::String).with_values(["oak", "ash", "walnut"]))
            .with_variable(
                VariableDef::new("Edge", PrimitiveKind::String)
                    .with_values(["oak", "ash"])
                    .with_source("Finish", 0, true),
            ),
    );
    let mut setup = Setup::new(Arc::new(Model::load(&schema).unwrap()));
    setup.assign("Finish", "ash");

    assert!(setup.propagate().is_consistent());
    assert_eq!(setup.domain("Edge").values(), &[Value::str("ash")]);

    // Nothing left once the source leaves the edge's options
    let mut setup = Setup::new(Arc::clone(&setup.model));
    setup.assign("Finish", "walnut");
    assert!(!setup.propagate().is_consistent());
}

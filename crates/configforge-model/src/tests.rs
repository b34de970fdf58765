//! Tests for model loading and validation.

use configforge_core::{Domain, SchemaErrorKind, Value};
use rust_decimal::Decimal;

use super::*;

fn memory_schema() -> Schema {
    Schema::new("Laptop")
        .with_type(
            TypeDecl::new("Laptop")
                .virtual_type()
                .with_variable(
                    VariableDef::new("Display", PrimitiveKind::String).with_values(["hd", "4k"]),
                )
                .with_relation(RelationDef::new("Memory", "Ram", 1, Some(2)).user_driven())
                .with_constraint(
                    "FourKNeedsMemory",
                    Expr::implies(
                        Expr::eq(Expr::var("Display"), Expr::string("4k")),
                        Expr::ge(Expr::sum("Memory", "size"), Expr::int(16)),
                    ),
                ),
        )
        .with_type(
            TypeDecl::new("Ram").with_variable(
                VariableDef::new("size", PrimitiveKind::Int)
                    .with_values([8, 16])
                    .not_configurable(),
            ),
        )
        .with_type(
            TypeDecl::new("Ram8GB").extends("Ram").with_variable(
                VariableDef::new("size", PrimitiveKind::Int)
                    .with_values([8])
                    .not_configurable(),
            ),
        )
        .with_type(
            TypeDecl::new("Ram16GB").extends("Ram").with_variable(
                VariableDef::new("size", PrimitiveKind::Int)
                    .with_values([16])
                    .not_configurable(),
            ),
        )
}

fn load_err(schema: &Schema) -> SchemaErrorKind {
    Model::load(schema).unwrap_err().kind
}

#[test]
fn test_load_flattens_inheritance() {
    let model = Model::load(&memory_schema()).unwrap();
    let ram8 = model.type_by_name("Ram8GB").unwrap();
    assert_eq!(ram8.variables.len(), 1);
    assert_eq!(ram8.variables[0].domain.values(), &[Value::Int(8)]);

    let ram = model.type_id("Ram").unwrap();
    assert!(model.is_a(ram8.id, ram));
    assert!(!model.is_a(ram, ram8.id));
    assert_eq!(model.type_def(ram).subtypes.len(), 2);
}

#[test]
fn test_relation_options_are_leaf_types() {
    let model = Model::load(&memory_schema()).unwrap();
    let root = model.type_def(model.root());
    let memory = root.relation("Memory").unwrap();
    let names: Vec<&str> = memory
        .options
        .iter()
        .map(|id| &*model.type_def(*id).name)
        .collect();
    assert_eq!(names, vec!["Ram8GB", "Ram16GB"]);
}

#[test]
fn test_relation_ordering_hint() {
    let mut schema = memory_schema();
    schema.types[0].relations[0] = RelationDef::new("Memory", "Ram", 1, Some(2))
        .user_driven()
        .ordered(["Ram16GB"]);
    let model = Model::load(&schema).unwrap();
    let memory = model.type_def(model.root()).relation("Memory").unwrap();
    assert_eq!(&*model.type_def(memory.options[0]).name, "Ram16GB");
    assert_eq!(&*model.type_def(memory.options[1]).name, "Ram8GB");
}

#[test]
fn test_constraint_owner_is_declaring_type() {
    let model = Model::load(&memory_schema()).unwrap();
    let root = model.type_def(model.root());
    assert_eq!(root.constraints.len(), 1);
    assert_eq!(root.constraints[0].name.full_name(), "Laptop/FourKNeedsMemory");
}

#[test]
fn test_duplicate_type() {
    let schema = memory_schema().with_type(TypeDecl::new("Ram"));
    assert_eq!(load_err(&schema), SchemaErrorKind::DuplicateType);
}

#[test]
fn test_inheritance_cycle() {
    let schema = memory_schema()
        .with_type(TypeDecl::new("A").extends("B"))
        .with_type(TypeDecl::new("B").extends("A"));
    assert_eq!(load_err(&schema), SchemaErrorKind::InheritanceCycle);
}

#[test]
fn test_unknown_relation_target() {
    let mut schema = memory_schema();
    schema.types[0].relations[0].target = "Disk".to_string();
    assert_eq!(load_err(&schema), SchemaErrorKind::UnknownType);
}

#[test]
fn test_unknown_variable_in_constraint() {
    let schema = memory_schema().with_type(
        TypeDecl::new("Dock").with_constraint("Broken", Expr::eq(Expr::var("Nope"), Expr::int(1))),
    );
    let error = Model::load(&schema).unwrap_err();
    assert_eq!(error.kind, SchemaErrorKind::UnknownVariable);
    assert_eq!(error.location, "Dock.Broken");
}

#[test]
fn test_aggregate_over_unknown_variable() {
    let schema = memory_schema().with_type(
        TypeDecl::new("Shelf")
            .with_relation(RelationDef::new("Items", "Ram", 0, None))
            .with_constraint("Weight", Expr::le(Expr::sum("Items", "weight"), Expr::int(3))),
    );
    assert_eq!(load_err(&schema), SchemaErrorKind::UnknownVariable);
}

#[test]
fn test_empty_range_is_invalid() {
    let schema = memory_schema().with_type(
        TypeDecl::new("Fan").with_variable(VariableDef::new("rpm", PrimitiveKind::Int).with_range(10, 1)),
    );
    assert_eq!(load_err(&schema), SchemaErrorKind::InvalidDomain);
}

#[test]
fn test_list_entry_type_mismatch() {
    let schema = memory_schema().with_type(
        TypeDecl::new("Fan").with_variable(
            VariableDef::new("rpm", PrimitiveKind::Int).with_values([Value::Int(1), Value::str("fast")]),
        ),
    );
    assert_eq!(load_err(&schema), SchemaErrorKind::TypeMismatch);
}

#[test]
fn test_configurable_variable_needs_domain() {
    let schema = memory_schema()
        .with_type(TypeDecl::new("Fan").with_variable(VariableDef::new("label", PrimitiveKind::String)));
    assert_eq!(load_err(&schema), SchemaErrorKind::EmptyDomain);

    let schema = memory_schema().with_type(
        TypeDecl::new("Fan")
            .with_variable(VariableDef::new("label", PrimitiveKind::String).not_configurable()),
    );
    assert!(Model::load(&schema).is_ok());
}

#[test]
fn test_domain_union_keeps_item_order() {
    let schema = memory_schema().with_type(
        TypeDecl::new("Fan").with_variable(
            VariableDef::new("rpm", PrimitiveKind::Int)
                .with_values([100])
                .with_stepped_range(10, 30, 10)
                .with_values([20]),
        ),
    );
    let model = Model::load(&schema).unwrap();
    let rpm = &model.type_by_name("Fan").unwrap().variables[0];
    assert_eq!(
        rpm.domain,
        Domain::new([100, 10, 20, 30].map(Value::Int))
    );
}

#[test]
fn test_decimal_range_uses_scale_step() {
    let schema = memory_schema().with_type(
        TypeDecl::new("Fan")
            .with_variable(VariableDef::new("ratio", PrimitiveKind::Decimal(1)).with_range(1, 2)),
    );
    let model = Model::load(&schema).unwrap();
    let ratio = &model.type_by_name("Fan").unwrap().variables[0];
    assert_eq!(ratio.domain.len(), 11);
    assert_eq!(ratio.domain.first(), Some(&Value::Int(1)));
}

#[test]
fn test_domain_too_large() {
    let schema = memory_schema().with_type(
        TypeDecl::new("Fan")
            .with_variable(VariableDef::new("rpm", PrimitiveKind::Int).with_range(0, 1_000_000)),
    );
    assert_eq!(load_err(&schema), SchemaErrorKind::DomainTooLarge);
    assert!(Model::load_with_limit(&schema, 2_000_000).is_ok());
}

#[test]
fn test_date_literals_are_coerced() {
    let schema = memory_schema().with_type(
        TypeDecl::new("Warranty")
            .with_variable(
                VariableDef::new("start", PrimitiveKind::Date)
                    .with_values([Value::str("2024-01-01"), Value::str("2024-06-01")]),
            )
            .with_constraint(
                "NotBeforeJune",
                Expr::ge(Expr::var("start"), Expr::string("2024-06-01")),
            ),
    );
    let model = Model::load(&schema).unwrap();
    let warranty = model.type_by_name("Warranty").unwrap();
    assert!(matches!(warranty.variables[0].domain.first(), Some(Value::Date(_))));
    let Expr::Ge(_, right) = warranty.constraints[0].expr.as_ref() else {
        panic!("constraint shape changed");
    };
    assert!(matches!(right.as_ref(), Expr::Literal(Value::Date(_))));
}

#[test]
fn test_source_cycle() {
    let schema = memory_schema().with_type(
        TypeDecl::new("Fan")
            .with_variable(VariableDef::new("a", PrimitiveKind::Int).with_source("b", 0, true))
            .with_variable(VariableDef::new("b", PrimitiveKind::Int).with_source("a", 0, true)),
    );
    assert_eq!(load_err(&schema), SchemaErrorKind::SourceCycle);
}

#[test]
fn test_parent_source_resolves_through_relations() {
    let mut schema = memory_schema();
    schema.types[1] = TypeDecl::new("Ram")
        .with_variable(
            VariableDef::new("size", PrimitiveKind::Int)
                .with_values([8, 16])
                .not_configurable(),
        )
        .with_variable(VariableDef::new("panel", PrimitiveKind::String).with_source("Display", 1, true));
    let model = Model::load(&schema).unwrap();
    let ram16 = model.type_by_name("Ram16GB").unwrap();
    assert_eq!(
        ram16.variable("panel").unwrap().source.as_ref().map(|s| s.level),
        Some(1)
    );
}

#[test]
fn test_root_must_be_virtual() {
    let mut schema = memory_schema();
    schema.types[0].is_virtual = false;
    assert_eq!(load_err(&schema), SchemaErrorKind::RootNotVirtual);
}

#[test]
fn test_rule_conflict_on_equal_sequence() {
    let mut schema = memory_schema();
    schema.types[0] = schema.types[0]
        .clone()
        .with_rule(RuleDef::new(
            "HideDisplay",
            Expr::bool(true),
            RuleAction::Hide(ActionTarget::attribute("Display")),
        ))
        .with_rule(RuleDef::new(
            "ShowDisplay",
            Expr::bool(true),
            RuleAction::Show(ActionTarget::attribute("Display")),
        ));
    assert_eq!(load_err(&schema), SchemaErrorKind::RuleConflict);

    // Distinct sequences give a deterministic precedence
    schema.types[0].rules[1].sequence = Some(5);
    let model = Model::load(&schema).unwrap();
    let rules = &model.type_def(model.root()).rules;
    assert_eq!(rules[0].name.name, "HideDisplay");
    assert_eq!(rules[1].sequence, 5);
}

#[test]
fn test_attribute_scope_resolves_relation_targets() {
    let mut schema = memory_schema();
    schema.types[0] = schema.types[0].clone().with_rule(RuleDef::new(
        "NoBigRam",
        Expr::bool(true),
        RuleAction::Hide(ActionTarget::attribute("Memory").value("Ram16GB")),
    ));
    let model = Model::load(&schema).unwrap();
    let rule = &model.type_def(model.root()).rules[0];
    let ram16 = model.type_id("Ram16GB").unwrap();
    assert_eq!(
        rule.effect,
        RuleEffect::Visibility {
            hide: true,
            target: RuleTarget::Relation {
                rel: 0,
                option: Some(ram16)
            }
        }
    );
}

#[test]
fn test_require_into_closed_relation() {
    let mut schema = memory_schema();
    schema.types[0].relations[0].close_relation = true;
    schema.types[0] = schema.types[0].clone().with_rule(RuleDef::new(
        "Force16",
        Expr::eq(Expr::var("Display"), Expr::string("4k")),
        RuleAction::Require(RelationPattern::new("Memory", "Ram16GB")),
    ));
    assert_eq!(load_err(&schema), SchemaErrorKind::RequireIntoClosedRelation);
}

#[test]
fn test_invalid_cardinality() {
    let mut schema = memory_schema();
    schema.types[0].relations[0].min = 3;
    assert_eq!(load_err(&schema), SchemaErrorKind::InvalidCardinality);
}

#[test]
fn test_resolve_tag() {
    let mut schema = memory_schema();
    schema.types[0].variables[0].tag_name = Some("display_tag".to_string());
    let model = Model::load(&schema).unwrap();
    assert_eq!(model.resolve_tag("display_tag"), Some((model.root(), 0)));
    assert_eq!(model.resolve_tag("Laptop.Display"), Some((model.root(), 0)));
    assert_eq!(model.resolve_tag("Laptop.Nope"), None);
}

#[test]
fn test_wide_ranges_exceed_the_budget() {
    let wide = |kind: PrimitiveKind, min: Value, max: Value, step: Value| {
        memory_schema().with_type(
            TypeDecl::new("Fan")
                .with_variable(VariableDef::new("ratio", kind).with_stepped_range(min, max, step)),
        )
    };
    let double = wide(
        PrimitiveKind::Double(0),
        Value::Double(0.0),
        Value::Double(1e300),
        Value::Double(1.0),
    );
    assert_eq!(load_err(&double), SchemaErrorKind::DomainTooLarge);

    let infinite = wide(
        PrimitiveKind::Double(0),
        Value::Double(-f64::MAX),
        Value::Double(f64::MAX),
        Value::Double(1.0),
    );
    assert_eq!(load_err(&infinite), SchemaErrorKind::DomainTooLarge);

    let decimal = wide(
        PrimitiveKind::Decimal(0),
        Value::Decimal(Decimal::MIN),
        Value::Decimal(Decimal::MAX),
        Value::Decimal(Decimal::ONE),
    );
    assert_eq!(load_err(&decimal), SchemaErrorKind::DomainTooLarge);

    let tiny_step = wide(
        PrimitiveKind::Decimal(28),
        Value::Int(0),
        Value::Int(1),
        Value::Decimal(Decimal::new(1, 28)),
    );
    assert_eq!(load_err(&tiny_step), SchemaErrorKind::DomainTooLarge);
}

#[test]
fn test_date_range_enumerates_days() {
    let schema = memory_schema().with_type(
        TypeDecl::new("Warranty").with_variable(
            VariableDef::new("start", PrimitiveKind::Date)
                .with_stepped_range("2024-02-27", "2024-03-02", 2),
        ),
    );
    let model = Model::load(&schema).unwrap();
    let days: Vec<String> = model.type_by_name("Warranty").unwrap().variables[0]
        .domain
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(days, vec!["2024-02-27", "2024-02-29", "2024-03-02"]);
}

#[test]
fn test_duplicate_member() {
    let mut schema = memory_schema();
    schema.types[0]
        .variables
        .push(VariableDef::new("Display", PrimitiveKind::String).with_values(["oled"]));
    assert_eq!(load_err(&schema), SchemaErrorKind::DuplicateMember);

    // An inherited variable may not be shadowed by a relation
    let schema = memory_schema().with_type(
        TypeDecl::new("Ram32GB")
            .extends("Ram")
            .with_relation(RelationDef::new("size", "Ram", 0, Some(1))),
    );
    assert_eq!(load_err(&schema), SchemaErrorKind::DuplicateMember);
}

#[test]
fn test_rule_target_must_exist() {
    let mut schema = memory_schema();
    schema.types[0] = schema.types[0].clone().with_rule(RuleDef::new(
        "NoStorage",
        Expr::bool(true),
        RuleAction::Disable(ActionTarget::relation("Storage")),
    ));
    assert_eq!(load_err(&schema), SchemaErrorKind::UnknownRelation);

    let mut schema = memory_schema();
    schema.types[0] = schema.types[0].clone().with_rule(RuleDef::new(
        "NoBrightness",
        Expr::bool(true),
        RuleAction::Hide(ActionTarget::attribute("Brightness")),
    ));
    assert_eq!(load_err(&schema), SchemaErrorKind::UnknownVariable);
}

#[test]
fn test_invalid_rule_target() {
    let with_rule = |action: RuleAction| {
        let mut schema = memory_schema();
        schema.types[0] = schema.types[0]
            .clone()
            .with_rule(RuleDef::new("Narrow", Expr::bool(true), action));
        load_err(&schema)
    };
    // Attributes narrow by value only
    assert_eq!(
        with_rule(RuleAction::Disable(ActionTarget::attribute("Display").of_type("Ram8GB"))),
        SchemaErrorKind::InvalidRuleTarget
    );
    assert_eq!(
        with_rule(RuleAction::Disable(ActionTarget::attribute("Display").value("oled"))),
        SchemaErrorKind::InvalidRuleTarget
    );
    // Laptop is not a kind of Ram
    assert_eq!(
        with_rule(RuleAction::Disable(ActionTarget::relation("Memory").of_type("Laptop"))),
        SchemaErrorKind::InvalidRuleTarget
    );
}

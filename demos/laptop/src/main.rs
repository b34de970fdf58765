//! Laptop Example
//!
//! Walks one configuration session through the memory scenario: a 4k
//! display needs at least 16 GB, a memory bank holds two modules, and a
//! rejected edit leaves the previous configuration in place.
//!
//! Pass a TOML engine configuration path as the first argument to override
//! the defaults.

use std::error::Error;
use std::sync::Arc;

use configforge::prelude::*;
use configforge::{console, ActionTarget, Severity};

fn laptop_schema() -> Schema {
    let four_k = Expr::eq(Expr::var("Display"), Expr::string("4k"));
    let ram = |name: &str, size: i64| {
        TypeDecl::new(name).extends("Ram").with_variable(
            VariableDef::new("size", PrimitiveKind::Int)
                .with_values([size])
                .not_configurable(),
        )
    };

    Schema::new("Laptop")
        .with_type(
            TypeDecl::new("Laptop")
                .virtual_type()
                .with_variable(
                    VariableDef::new("Display", PrimitiveKind::String)
                        .with_values(["hd", "4k"])
                        .with_tag("display"),
                )
                .with_variable(
                    VariableDef::new("Keyboard", PrimitiveKind::String)
                        .with_values(["us", "de", "fr"])
                        .with_default("us"),
                )
                .with_relation(RelationDef::new("Memory", "Ram", 1, Some(2)).user_driven())
                .with_constraint(
                    "FourKNeedsMemory",
                    Expr::implies(
                        four_k.clone(),
                        Expr::ge(Expr::sum("Memory", "size"), Expr::int(16)),
                    ),
                )
                .with_rule(RuleDef::new(
                    "NoGermanLayoutOn4k",
                    four_k.clone(),
                    RuleAction::Disable(ActionTarget::attribute("Keyboard").value("de")),
                ))
                .with_rule(RuleDef::new(
                    "FourKBattery",
                    four_k,
                    RuleAction::Message {
                        severity: Severity::Warning,
                        text: "4k displays shorten battery life".into(),
                    },
                )),
        )
        .with_type(
            TypeDecl::new("Ram").with_variable(
                VariableDef::new("size", PrimitiveKind::Int)
                    .with_values([8, 16])
                    .not_configurable(),
            ),
        )
        .with_type(ram("Ram8GB", 8))
        .with_type(ram("Ram16GB", 16))
}

fn print_result(step: &str, result: &AssignResult) {
    println!("\n{step}: {}", result.outcome.label());
    if let Some(conflict) = result.outcome.conflict() {
        println!("  rejected: {conflict}");
    }
    print_state(&result.state);
}

fn print_state(state: &VisibleState) {
    for instance in &state.instances {
        let indent = if instance.parent.is_some() { "    " } else { "  " };
        println!("{indent}{} {} x{}", instance.id, instance.type_name, instance.quantity);
        for variable in instance.variables.iter().filter(|v| v.configurable) {
            let value = variable
                .value
                .as_ref()
                .map_or_else(|| "?".to_string(), ToString::to_string);
            let disabled = if variable.disabled_values.is_empty() {
                String::new()
            } else {
                let values: Vec<String> = variable.disabled_values.iter().map(ToString::to_string).collect();
                format!(" (disabled: {})", values.join(", "))
            };
            println!("{indent}  {} = {value}{disabled}", variable.name);
        }
        for relation in &instance.relations {
            println!(
                "{indent}  {} [{}/{}] selectable: {}",
                relation.name,
                relation.count,
                relation.max.map_or_else(|| "*".to_string(), |m| m.to_string()),
                relation.selectable.join(", ")
            );
        }
    }
    for diagnostic in &state.diagnostics {
        println!("  {:?}: {}", diagnostic.severity, diagnostic.message);
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    console::init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let model = Arc::new(Model::load(&laptop_schema())?);
    let manager = SessionManager::new(model, config);

    let id = manager.open(&Context::new().with("display", "4k"))?;
    print_state(&manager.visible_state(id)?);

    let small = manager.select_relation_option(id, InstanceId::ROOT, "Memory", "Ram8GB", 1)?;
    print_result("Add an 8 GB module", &small);

    let large = manager.select_relation_option(id, InstanceId::ROOT, "Memory", "Ram16GB", 1)?;
    print_result("Add a 16 GB module", &large);

    let keyboard = manager.assign(id, InstanceId::ROOT, "Keyboard", "de")?;
    print_result("Switch to a German keyboard", &keyboard);

    let keyboard = manager.assign(id, InstanceId::ROOT, "Keyboard", "fr")?;
    print_result("Switch to a French keyboard", &keyboard);

    manager.close(id)?;
    Ok(())
}

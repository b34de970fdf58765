//! Laptop fixtures.
//!
//! The root `Laptop` carries a `Display` choice and three user-driven
//! relations:
//!
//! - `Memory[1..2]` over `Ram` (`Ram8GB`, `Ram16GB`), constrained by
//!   `Display == "4k" -> Memory.sum(size) >= 16`
//! - `Ports[0..]` over `UsbPort`, `split = false`
//! - `Bays[0..4]` over `Drive` (`Ssd` with `split = true`, `Hdd`)
//!
//! `Keyboard` has no dependents, which makes it the cheapest edit.
//!
//! # Example
//!
//! ```
//! use configforge_test::laptop::laptop_model;
//!
//! let model = laptop_model();
//! let root = model.type_def(model.root());
//! assert_eq!(root.relation("Memory").unwrap().max, Some(2));
//! ```

use std::sync::Arc;

use configforge_core::Severity;
use configforge_model::{
    ActionTarget, Expr, Model, PrimitiveKind, RelationDef, RuleAction, RuleDef, Schema, SplitMode,
    TypeDecl, VariableDef,
};

/// The memory scenario model.
pub fn laptop_schema() -> Schema {
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
                .with_relation(RelationDef::new("Ports", "UsbPort", 0, None).user_driven())
                .with_relation(RelationDef::new("Bays", "Drive", 0, Some(4)).user_driven())
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
        .with_type(
            TypeDecl::new("UsbPort")
                .with_split(SplitMode::False)
                .with_variable(
                    VariableDef::new("standard", PrimitiveKind::String)
                        .with_values(["usb-a", "usb-c"])
                        .with_default("usb-c"),
                ),
        )
        .with_type(
            TypeDecl::new("Drive")
                .with_variable(VariableDef::new("capacity", PrimitiveKind::Int).not_configurable()),
        )
        .with_type(
            TypeDecl::new("Ssd")
                .extends("Drive")
                .with_split(SplitMode::True)
                .with_variable(
                    VariableDef::new("capacity", PrimitiveKind::Int)
                        .with_values([512])
                        .not_configurable(),
                ),
        )
        .with_type(
            TypeDecl::new("Hdd").extends("Drive").with_variable(
                VariableDef::new("capacity", PrimitiveKind::Int)
                    .with_values([1000])
                    .not_configurable(),
            ),
        )
}

/// The laptop model, loaded.
pub fn laptop_model() -> Arc<Model> {
    Arc::new(Model::load(&laptop_schema()).expect("laptop fixture must load"))
}

/// The laptop model with presentation, message and preference rules:
///
/// - `HideLargeRam`: on an `hd` display, `Ram16GB` is hidden from `Memory`
/// - `NoGermanLayoutOn4k`: on a `4k` display, keyboard `de` is disabled
/// - `FourKBattery`: a warning on `4k`
/// - `PreferFourK`: preference score 5 on `4k`
pub fn laptop_rules_schema() -> Schema {
    let mut schema = laptop_schema();
    let laptop = &mut schema.types[0];
    let hd = Expr::eq(Expr::var("Display"), Expr::string("hd"));
    let four_k = Expr::eq(Expr::var("Display"), Expr::string("4k"));
    laptop.rules.push(RuleDef::new(
        "HideLargeRam",
        hd,
        RuleAction::Hide(ActionTarget::attribute("Memory").value("Ram16GB")),
    ));
    laptop.rules.push(RuleDef::new(
        "NoGermanLayoutOn4k",
        four_k.clone(),
        RuleAction::Disable(ActionTarget::attribute("Keyboard").value("de")),
    ));
    laptop.rules.push(RuleDef::new(
        "FourKBattery",
        four_k.clone(),
        RuleAction::Message {
            severity: Severity::Warning,
            text: "4k displays shorten battery life".into(),
        },
    ));
    laptop.rules.push(RuleDef::new(
        "PreferFourK",
        four_k,
        RuleAction::Preference { score: 5 },
    ));
    schema
}

pub fn laptop_rules_model() -> Arc<Model> {
    Arc::new(Model::load(&laptop_rules_schema()).expect("laptop rules fixture must load"))
}

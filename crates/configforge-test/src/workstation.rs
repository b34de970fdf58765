//! Workstation fixtures: relations the engine instantiates by itself.
//!
//! The root `Workstation` holds:
//!
//! - `Profile` ∈ {balanced, quiet, turbo, eco}, default `balanced`
//! - `Power` ∈ {45, 65, 90} watts, resolved late (`sequence = 10`)
//! - `Fans[2..4]` over `Fan` and `Battery[1..1]` over `Battery`, expanded eagerly
//! - `Storage[1..1]` over `Disk` (`Hdd`, `Ssd`), chosen by search
//!
//! Constraints:
//!
//! - `QuietStorage`: a quiet profile has no `Hdd`
//! - `PowerBudget`: `Power >= Fans.sum(draw) + Storage.sum(watts)`
//!
//! Rules:
//!
//! - `TurboFan`: a turbo profile requires an extra `Fan` at 3000 rpm
//! - `EcoStorage`: an eco profile excludes `Hdd` from `Storage`
//!
//! With two fans drawing 10 W each, an `Hdd` (30 W) pushes the budget to
//! 50 W and rules out 45 W; an `Ssd` (10 W) fits in 45 W.

use std::sync::Arc;

use configforge_model::{
    Expr, Model, PrimitiveKind, RelationDef, RelationPattern, RuleAction, RuleDef, Schema,
    TypeDecl, VariableDef,
};

pub fn workstation_schema() -> Schema {
    let profile = |name: &str| Expr::eq(Expr::var("Profile"), Expr::string(name));
    Schema::new("Workstation")
        .with_type(
            TypeDecl::new("Workstation")
                .virtual_type()
                .with_variable(
                    VariableDef::new("Profile", PrimitiveKind::String)
                        .with_values(["balanced", "quiet", "turbo", "eco"])
                        .with_default("balanced")
                        .with_tag("profile"),
                )
                .with_variable(
                    VariableDef::new("Power", PrimitiveKind::Int)
                        .with_values([45, 65, 90])
                        .with_sequence(10),
                )
                .with_relation(RelationDef::new("Fans", "Fan", 2, Some(4)))
                .with_relation(RelationDef::new("Battery", "Battery", 1, Some(1)))
                .with_relation(RelationDef::new("Storage", "Disk", 1, Some(1)))
                .with_constraint(
                    "QuietStorage",
                    Expr::implies(
                        profile("quiet"),
                        Expr::eq(Expr::cardinality(Some("Hdd"), Some("Storage")), Expr::int(0)),
                    ),
                )
                .with_constraint(
                    "PowerBudget",
                    Expr::ge(
                        Expr::var("Power"),
                        Expr::add(Expr::sum("Fans", "draw"), Expr::sum("Storage", "watts")),
                    ),
                )
                .with_rule(RuleDef::new(
                    "TurboFan",
                    profile("turbo"),
                    RuleAction::Require(
                        RelationPattern::new("Fans", "Fan").with_assignment("rpm", 3000),
                    ),
                ))
                .with_rule(RuleDef::new(
                    "EcoStorage",
                    profile("eco"),
                    RuleAction::Exclude(RelationPattern::new("Storage", "Hdd")),
                )),
        )
        .with_type(
            TypeDecl::new("Fan")
                .with_variable(
                    VariableDef::new("rpm", PrimitiveKind::Int)
                        .with_stepped_range(1000, 3000, 1000)
                        .with_default(2000),
                )
                .with_variable(
                    VariableDef::new("draw", PrimitiveKind::Int)
                        .with_values([10])
                        .not_configurable(),
                ),
        )
        .with_type(
            TypeDecl::new("Battery").with_variable(
                VariableDef::new("cells", PrimitiveKind::Int).with_values([3, 4, 6]),
            ),
        )
        .with_type(
            TypeDecl::new("Disk")
                .with_variable(VariableDef::new("watts", PrimitiveKind::Int).not_configurable()),
        )
        .with_type(
            TypeDecl::new("Hdd").extends("Disk").with_variable(
                VariableDef::new("watts", PrimitiveKind::Int)
                    .with_values([30])
                    .not_configurable(),
            ),
        )
        .with_type(
            TypeDecl::new("Ssd").extends("Disk").with_variable(
                VariableDef::new("watts", PrimitiveKind::Int)
                    .with_values([10])
                    .not_configurable(),
            ),
        )
}

pub fn workstation_model() -> Arc<Model> {
    Arc::new(Model::load(&workstation_schema()).expect("workstation fixture must load"))
}

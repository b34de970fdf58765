//! The presentation view of a session: what a UI reads after every call.

use std::sync::Arc;

use serde::Serialize;

use configforge_core::{CellRef, Diagnostic, InstanceId, Value};
use configforge_engine::{Configuration, InstanceFlags, Origin, RuleReport};
use configforge_model::Model;

/// Snapshot of the last consistent state of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VisibleState {
    /// Instances in creation order; the root comes first.
    pub instances: Vec<InstanceView>,
    pub diagnostics: Vec<Diagnostic>,
    /// Sum of the scores of firing preference rules.
    pub preference: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceView {
    pub id: InstanceId,
    pub type_name: Arc<str>,
    pub quantity: u32,
    /// Owner and the name of the relation holding this instance.
    pub parent: Option<(InstanceId, Arc<str>)>,
    /// True for instances added through a relation selection.
    pub user_selected: bool,
    /// True for instances a require rule forced in.
    pub rule_required: bool,
    pub variables: Vec<VariableView>,
    pub relations: Vec<RelationView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableView {
    pub name: Arc<str>,
    /// Values still permitted.
    pub domain: Vec<Value>,
    /// The value, once the domain is a singleton.
    pub value: Option<Value>,
    pub configurable: bool,
    /// True if the user assigned the value.
    pub assigned: bool,
    pub hidden: bool,
    pub disabled: bool,
    pub hidden_values: Vec<Value>,
    pub disabled_values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationView {
    pub name: Arc<str>,
    pub children: Vec<InstanceId>,
    /// Quantity-weighted count of the children.
    pub count: u32,
    pub min: u32,
    pub max: Option<u32>,
    /// Option types a user may select, in presentation order.
    pub selectable: Vec<Arc<str>>,
    pub groups: Vec<GroupView>,
    pub hidden: bool,
    pub disabled: bool,
    /// No further instance may be added.
    pub closed: bool,
}

/// Children sharing one value of their type's grouping variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupView {
    pub key: Value,
    pub members: Vec<InstanceId>,
}

impl VisibleState {
    pub(crate) fn capture(
        model: &Model,
        config: &Configuration,
        report: &RuleReport,
        is_assigned: impl Fn(CellRef) -> bool,
        solved_once: bool,
    ) -> Self {
        let empty = InstanceFlags::default();
        let instances = config
            .graph
            .iter()
            .map(|instance| {
                let def = model.type_def(instance.type_id);
                let flags = report.flags(instance.id).unwrap_or(&empty);
                let variables = def
                    .variables
                    .iter()
                    .enumerate()
                    .map(|(var, variable)| {
                        let cell = CellRef::new(instance.id, var);
                        let domain = config
                            .store
                            .cell(cell)
                            .map(|d| d.values().to_vec())
                            .unwrap_or_default();
                        let of_var = |values: &[(usize, Value)]| -> Vec<Value> {
                            values
                                .iter()
                                .filter(|(v, _)| *v == var)
                                .map(|(_, value)| value.clone())
                                .collect()
                        };
                        VariableView {
                            name: variable.name.clone(),
                            value: config.store.value(cell).cloned(),
                            domain,
                            configurable: variable.configurable,
                            assigned: is_assigned(cell),
                            hidden: flags.hidden_vars.contains(&var),
                            disabled: flags.disabled_vars.contains(&var),
                            hidden_values: of_var(&flags.hidden_values),
                            disabled_values: of_var(&flags.disabled_values),
                        }
                    })
                    .collect();
                let relations = def
                    .relations
                    .iter()
                    .enumerate()
                    .map(|(rel, relation)| {
                        let children = instance.children(rel).to_vec();
                        RelationView {
                            name: relation.name.clone(),
                            count: config.graph.weighted_count(model, instance.id, rel),
                            min: relation.min,
                            max: relation.max,
                            selectable: relation
                                .options
                                .iter()
                                .filter(|ty| flags.is_option_selectable(model, rel, **ty))
                                .filter(|ty| !config.is_refused(model, instance.id, rel, **ty))
                                .map(|ty| model.type_def(*ty).name.clone())
                                .collect(),
                            groups: groups(model, config, &children),
                            hidden: flags.hidden_relations.contains(&rel),
                            disabled: flags.disabled_relations.contains(&rel),
                            closed: relation.close_relation && solved_once,
                            children,
                        }
                    })
                    .collect();
                InstanceView {
                    id: instance.id,
                    type_name: def.name.clone(),
                    quantity: instance.quantity,
                    parent: instance.parent.and_then(|(owner, rel)| {
                        let owner_type = config.graph.get(owner)?.type_id;
                        Some((owner, model.type_def(owner_type).relations[rel].name.clone()))
                    }),
                    user_selected: instance.origin == Origin::User,
                    rule_required: matches!(instance.origin, Origin::Rule { .. }),
                    variables,
                    relations,
                }
            })
            .collect();
        Self {
            instances,
            diagnostics: report.diagnostics.clone(),
            preference: report.preference,
        }
    }

    pub fn instance(&self, id: InstanceId) -> Option<&InstanceView> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn root(&self) -> Option<&InstanceView> {
        self.instance(InstanceId::ROOT)
    }

    pub fn variable(&self, id: InstanceId, name: &str) -> Option<&VariableView> {
        self.instance(id)?.variables.iter().find(|v| &*v.name == name)
    }

    pub fn relation(&self, id: InstanceId, name: &str) -> Option<&RelationView> {
        self.instance(id)?.relations.iter().find(|r| &*r.name == name)
    }

    /// The resolved value of a variable, if any.
    pub fn value(&self, id: InstanceId, name: &str) -> Option<&Value> {
        self.variable(id, name)?.value.as_ref()
    }
}

fn groups(model: &Model, config: &Configuration, children: &[InstanceId]) -> Vec<GroupView> {
    let mut groups: Vec<GroupView> = Vec::new();
    for child in children {
        let Some(key) = group_key(model, config, *child) else {
            continue;
        };
        match groups.iter_mut().find(|g| g.key == key) {
            Some(group) => group.members.push(*child),
            None => groups.push(GroupView {
                key,
                members: vec![*child],
            }),
        }
    }
    groups
}

fn group_key(model: &Model, config: &Configuration, id: InstanceId) -> Option<Value> {
    let instance = config.graph.get(id)?;
    let var = model.type_def(instance.type_id).group_by?;
    config.store.value(CellRef::new(id, var)).cloned()
}

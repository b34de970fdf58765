//! The instance graph: the per-session tree of typed instances.

use configforge_core::{ConfigForgeError, ConstraintRef, InstanceId, Result, Value};
use configforge_model::{Model, SplitMode, TypeId};

/// Who created an instance. Only user selections can be deselected, and
/// engine-created instances are the only ones search may rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Root,
    /// Instantiated by the engine to reach a relation minimum.
    Engine,
    /// Selected through the session API.
    User,
    /// Forced by a `require` rule firing on `owner`.
    Rule { owner: InstanceId, rule: ConstraintRef },
}

/// One runtime object of the configuration.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: InstanceId,
    pub type_id: TypeId,
    /// Owning instance and the relation index it sits in.
    pub parent: Option<(InstanceId, usize)>,
    pub quantity: u32,
    pub origin: Origin,
    /// Values fixed by the rule that created the instance.
    pub pinned: Vec<(usize, Value)>,
    children: Vec<Vec<InstanceId>>,
}

impl Instance {
    /// Children in one relation, in creation order.
    pub fn children(&self, relation: usize) -> &[InstanceId] {
        self.children.get(relation).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn relation_count(&self) -> usize {
        self.children.len()
    }
}

/// Arena of instances indexed by id. Ids are never reused, so iteration
/// order is creation order.
#[derive(Debug, Clone, Default)]
pub struct InstanceGraph {
    slots: Vec<Option<Instance>>,
}

impl InstanceGraph {
    /// Creates a graph holding only the root instance of the model's
    /// virtual header type.
    pub fn instantiate_root(model: &Model) -> Self {
        let mut graph = Self::default();
        graph.push(model, model.root(), None, 1, Origin::Root, Vec::new());
        graph
    }

    fn push(
        &mut self,
        model: &Model,
        type_id: TypeId,
        parent: Option<(InstanceId, usize)>,
        quantity: u32,
        origin: Origin,
        pinned: Vec<(usize, Value)>,
    ) -> InstanceId {
        let id = InstanceId(self.slots.len() as u32);
        let relations = model.type_def(type_id).relations.len();
        self.slots.push(Some(Instance {
            id,
            type_id,
            parent,
            quantity,
            origin,
            pinned,
            children: vec![Vec::new(); relations],
        }));
        if let Some((owner, rel)) = parent {
            if let Some(Some(owner)) = self.slots.get_mut(owner.index()) {
                owner.children[rel].push(id);
            }
        }
        id
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Like [`get`](Self::get), failing with `UnknownInstance`.
    pub fn instance(&self, id: InstanceId) -> Result<&Instance> {
        self.get(id).ok_or(ConfigForgeError::UnknownInstance(id))
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.get(id).is_some()
    }

    /// Live instances in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn ids(&self) -> Vec<InstanceId> {
        self.iter().map(|i| i.id).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper bound of instance indices, for sizing per-instance tables.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn children(&self, id: InstanceId, relation: usize) -> &[InstanceId] {
        self.get(id).map(|i| i.children(relation)).unwrap_or(&[])
    }

    /// The instance `level` steps up the tree; level 0 is the instance.
    pub fn ancestor(&self, id: InstanceId, level: u32) -> Option<InstanceId> {
        let mut current = id;
        for _ in 0..level {
            current = self.get(current)?.parent?.0;
        }
        self.get(current).map(|i| i.id)
    }

    /// Quantity-weighted count of children in a relation.
    pub fn weighted_count(&self, model: &Model, id: InstanceId, relation: usize) -> u32 {
        self.count_matching(model, id, Some(relation), None)
    }

    /// Quantity-weighted count of children of `ty` (and subtypes) in one
    /// relation or across all relations. Saturates at `u32::MAX`.
    pub fn count_matching(
        &self,
        model: &Model,
        id: InstanceId,
        relation: Option<usize>,
        ty: Option<TypeId>,
    ) -> u32 {
        let Some(instance) = self.get(id) else {
            return 0;
        };
        let relations: Vec<usize> = match relation {
            Some(rel) => vec![rel],
            None => (0..instance.children.len()).collect(),
        };
        relations
            .into_iter()
            .flat_map(|rel| instance.children(rel).iter())
            .filter_map(|child| self.get(*child))
            .filter(|child| ty.map_or(true, |ty| model.is_a(child.type_id, ty)))
            .map(|child| model.type_def(child.type_id).weight(child.quantity))
            .fold(0u32, u32::saturating_add)
    }

    /// How much selecting `quantity` units of `ty` raises a relation count.
    pub fn selection_weight(model: &Model, ty: TypeId, quantity: u32) -> u32 {
        match model.type_def(ty).split {
            SplitMode::True | SplitMode::False => quantity,
            SplitMode::None => 1,
        }
    }

    /// Adds a child under the type's split semantics and returns the
    /// instances created. Under `split = false` an existing same-type child
    /// absorbs the quantity and no instance is created.
    pub fn place(
        &mut self,
        model: &Model,
        parent: InstanceId,
        relation: usize,
        ty: TypeId,
        quantity: u32,
        origin: Origin,
    ) -> Result<Vec<InstanceId>> {
        self.instance(parent)?;
        let quantity = quantity.max(1);
        match model.type_def(ty).split {
            SplitMode::True => Ok((0..quantity)
                .map(|_| self.push(model, ty, Some((parent, relation)), 1, origin.clone(), Vec::new()))
                .collect()),
            SplitMode::False => {
                let existing = self
                    .children(parent, relation)
                    .iter()
                    .copied()
                    .find(|c| self.get(*c).is_some_and(|c| c.type_id == ty && c.origin == origin));
                match existing.and_then(|id| self.get_mut(id)) {
                    Some(child) => {
                        child.quantity = child
                            .quantity
                            .checked_add(quantity)
                            .ok_or(ConfigForgeError::QuantityOverflow(child.id))?;
                        Ok(Vec::new())
                    }
                    None => Ok(vec![self.push(
                        model,
                        ty,
                        Some((parent, relation)),
                        quantity,
                        origin,
                        Vec::new(),
                    )]),
                }
            }
            SplitMode::None => Ok(vec![self.push(
                model,
                ty,
                Some((parent, relation)),
                quantity,
                origin,
                Vec::new(),
            )]),
        }
    }

    /// Adds a rule-forced child carrying pinned values.
    pub fn add_pinned(
        &mut self,
        model: &Model,
        parent: InstanceId,
        relation: usize,
        ty: TypeId,
        origin: Origin,
        pinned: Vec<(usize, Value)>,
    ) -> InstanceId {
        self.push(model, ty, Some((parent, relation)), 1, origin, pinned)
    }

    /// Creates engine children until the relation minimum is met, when the
    /// relation is engine-managed and has a single instantiable type.
    /// Relations with several options are left to the search engine.
    pub fn expand_relation(&mut self, model: &Model, id: InstanceId, relation: usize) -> Vec<InstanceId> {
        let Some(instance) = self.get(id) else {
            return Vec::new();
        };
        let rel = &model.type_def(instance.type_id).relations[relation];
        if !rel.configurable || rel.options.len() != 1 {
            return Vec::new();
        }
        let option = rel.options[0];
        let mut created = Vec::new();
        while self.weighted_count(model, id, relation) < rel.min {
            created.push(self.push(model, option, Some((id, relation)), 1, Origin::Engine, Vec::new()));
        }
        created
    }

    /// Expands every relation of `id` and of each created descendant.
    pub fn expand_all(&mut self, model: &Model, id: InstanceId) -> Vec<InstanceId> {
        let mut created = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let relations = self.get(next).map_or(0, Instance::relation_count);
            for rel in 0..relations {
                let new = self.expand_relation(model, next, rel);
                pending.extend(new.iter().copied());
                created.extend(new);
            }
        }
        created.sort();
        created
    }

    /// Removes an instance and its subtree. Returns the removed ids.
    pub fn remove(&mut self, id: InstanceId) -> Vec<InstanceId> {
        let Some(instance) = self.get(id) else {
            return Vec::new();
        };
        if let Some((owner, rel)) = instance.parent {
            if let Some(owner) = self.get_mut(owner) {
                owner.children[rel].retain(|c| *c != id);
            }
        }
        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(instance) = self.slots.get_mut(next.index()).and_then(Option::take) {
                pending.extend(instance.children.iter().flatten().copied());
                removed.push(next);
            }
        }
        removed.sort();
        removed
    }

    pub fn set_quantity(&mut self, id: InstanceId, quantity: u32) -> Result<()> {
        let instance = self
            .get_mut(id)
            .ok_or(ConfigForgeError::UnknownInstance(id))?;
        instance.quantity = quantity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configforge_test::{laptop_model, workstation_model};

    #[test]
    fn test_instantiate_root() {
        let model = laptop_model();
        let graph = InstanceGraph::instantiate_root(&model);
        let root = graph.get(InstanceId::ROOT).unwrap();
        assert_eq!(root.type_id, model.root());
        assert_eq!(root.origin, Origin::Root);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_user_driven_relation_is_not_expanded() {
        let model = laptop_model();
        let mut graph = InstanceGraph::instantiate_root(&model);
        assert!(graph.expand_all(&model, InstanceId::ROOT).is_empty());
    }

    #[test]
    fn test_expand_relation_reaches_minimum() {
        let model = workstation_model();
        let mut graph = InstanceGraph::instantiate_root(&model);
        let created = graph.expand_all(&model, InstanceId::ROOT);
        // Two fans and a battery; storage has two options and is left to search
        assert_eq!(created.len(), 3);
        assert!(created
            .iter()
            .all(|id| graph.get(*id).unwrap().origin == Origin::Engine));
    }

    #[test]
    fn test_split_modes() {
        let model = laptop_model();
        let root = model.type_def(model.root());
        let memory = root.relation_index("Memory").unwrap();
        let usb = root.relation_index("Ports").unwrap();
        let ram8 = model.type_id("Ram8GB").unwrap();
        let port = model.type_id("UsbPort").unwrap();
        let mut graph = InstanceGraph::instantiate_root(&model);

        // split = none: one instance carrying the quantity, counting once
        let created = graph
            .place(&model, InstanceId::ROOT, memory, ram8, 1, Origin::User)
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(graph.weighted_count(&model, InstanceId::ROOT, memory), 1);

        // split = false: quantity accumulates on one instance
        let first = graph
            .place(&model, InstanceId::ROOT, usb, port, 2, Origin::User)
            .unwrap();
        let second = graph
            .place(&model, InstanceId::ROOT, usb, port, 3, Origin::User)
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(graph.get(first[0]).unwrap().quantity, 5);
        assert_eq!(graph.weighted_count(&model, InstanceId::ROOT, usb), 5);
    }

    #[test]
    fn test_split_true_creates_unit_instances() {
        let model = laptop_model();
        let root = model.type_def(model.root());
        let bays = root.relation_index("Bays").unwrap();
        let ssd = model.type_id("Ssd").unwrap();
        let mut graph = InstanceGraph::instantiate_root(&model);
        let created = graph
            .place(&model, InstanceId::ROOT, bays, ssd, 2, Origin::User)
            .unwrap();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|id| graph.get(*id).unwrap().quantity == 1));
        assert_eq!(graph.weighted_count(&model, InstanceId::ROOT, bays), 2);
    }

    #[test]
    fn test_remove_detaches_subtree() {
        let model = laptop_model();
        let memory = model.type_def(model.root()).relation_index("Memory").unwrap();
        let ram8 = model.type_id("Ram8GB").unwrap();
        let mut graph = InstanceGraph::instantiate_root(&model);
        let id = graph
            .place(&model, InstanceId::ROOT, memory, ram8, 1, Origin::User)
            .unwrap()[0];
        assert_eq!(graph.ancestor(id, 1), Some(InstanceId::ROOT));
        assert_eq!(graph.remove(id), vec![id]);
        assert!(graph.children(InstanceId::ROOT, memory).is_empty());
        assert!(!graph.contains(id));
        // Ids are not reused
        let next = graph
            .place(&model, InstanceId::ROOT, memory, ram8, 1, Origin::User)
            .unwrap();
        assert!(next[0] > id);
    }

    #[test]
    fn test_quantity_overflow_is_an_error() {
        let model = laptop_model();
        let ports = model.type_def(model.root()).relation_index("Ports").unwrap();
        let port = model.type_id("UsbPort").unwrap();
        let mut graph = InstanceGraph::instantiate_root(&model);
        let id = graph
            .place(&model, InstanceId::ROOT, ports, port, u32::MAX, Origin::User)
            .unwrap()[0];

        assert!(matches!(
            graph.place(&model, InstanceId::ROOT, ports, port, 1, Origin::User),
            Err(ConfigForgeError::QuantityOverflow(overflowed)) if overflowed == id
        ));
        assert_eq!(graph.get(id).unwrap().quantity, u32::MAX);

        graph
            .place(&model, InstanceId::ROOT, ports, port, 1, Origin::Engine)
            .unwrap();
        assert_eq!(graph.weighted_count(&model, InstanceId::ROOT, ports), u32::MAX);
    }
}

//! Node type registry: type names to small stable ids and factories.

use crate::{
    blacklist::Blacklist,
    factory::{InvalidNodeFactory, NodeFactory},
    init_data::InitData,
    model::NodeTypeId,
    node::{FlowNode, NodeCreateContext},
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Upper bound of concurrently registered types, including the reserved id 0.
pub const MAX_NODE_TYPES: usize = 4096;

pub const INVALID_TYPE_NAME: &str = "InvalidType";

pub type SharedRegistry = Rc<RefCell<TypeRegistry>>;

#[derive(Clone, Default)]
pub struct TypeInfo {
    pub name: String,
    pub factory: Option<Rc<dyn NodeFactory>>,
}

impl TypeInfo {
    pub fn is_blank(&self) -> bool {
        self.name.is_empty()
    }
}

#[derive(Default)]
pub struct TypeRegistry {
    types: Vec<TypeInfo>,
    ids: HashMap<String, NodeTypeId>,
    free_ids: Vec<NodeTypeId>,
    next_id: usize,
    blacklist: Blacklist,
    init_data: InitData,
    blank: TypeInfo,
}

impl TypeRegistry {
    /// An empty registry holding only `InvalidType` at id 0.
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register_invalid_type();
        registry
    }

    pub fn shared() -> SharedRegistry {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Clears every type, the free list and the id counter. Blacklist and init data survive.
    pub fn reset(&mut self) {
        self.types.clear();
        self.ids.clear();
        self.free_ids.clear();
        self.next_id = 0;
        self.init_data.clear_registered();
    }

    pub fn register_invalid_type(&mut self) -> NodeTypeId {
        self.register_type(INVALID_TYPE_NAME, Rc::new(InvalidNodeFactory))
    }

    /// Registers `factory` under `name` after applying the blacklist.
    ///
    /// Returns [`NodeTypeId::INVALID`] when the name is vetoed or the id space is exhausted.
    ///
    /// # Panics
    ///
    /// When the name is already registered and `factory` does not allow overriding. Silently
    /// shadowing a node type is a content error that must stop the load.
    pub fn register_type(&mut self, name: &str, factory: Rc<dyn NodeFactory>) -> NodeTypeId {
        let Some(name) = self.blacklist.apply(name) else {
            return NodeTypeId::INVALID;
        };

        if let Some(&id) = self.ids.get(&name) {
            if !factory.allow_overriding() {
                panic!("[flow] node type '{name}' is already registered and may not be overridden");
            }
            log::debug!("[flow] overriding node type '{name}' ({id})");
            self.types[id.index()].factory = Some(factory);
            self.init_data.mark_registered(&name);
            return id;
        }

        let Some(id) = self.allocate_id() else {
            log::error!(
                "[flow] cannot register '{name}': more than {MAX_NODE_TYPES} node types"
            );
            return NodeTypeId::INVALID;
        };
        if self.types.len() <= id.index() {
            self.types.resize_with(id.index() + 1, TypeInfo::default);
        }
        self.types[id.index()] = TypeInfo {
            name: name.clone(),
            factory: Some(factory),
        };
        self.init_data.mark_registered(&name);
        self.ids.insert(name, id);
        id
    }

    fn allocate_id(&mut self) -> Option<NodeTypeId> {
        if let Some(id) = self.free_ids.pop() {
            return Some(id);
        }
        if self.next_id >= MAX_NODE_TYPES {
            return None;
        }
        let id = NodeTypeId(u16::try_from(self.next_id).ok()?);
        self.next_id += 1;
        Some(id)
    }

    /// Removes a type and makes its id available for reuse. Id 0 cannot be removed.
    pub fn unregister_type(&mut self, name: &str) -> bool {
        let Some(&id) = self.ids.get(name) else {
            return false;
        };
        if !id.is_valid() {
            return false;
        }
        self.ids.remove(name);
        if let Some(slot) = self.types.get_mut(id.index()) {
            *slot = TypeInfo::default();
        }
        self.free_ids.push(id);
        true
    }

    pub fn type_info(&self, id: NodeTypeId) -> &TypeInfo {
        self.types.get(id.index()).unwrap_or(&self.blank)
    }

    pub fn type_name(&self, id: NodeTypeId) -> &str {
        &self.type_info(id).name
    }

    pub fn type_id(&self, name: &str) -> NodeTypeId {
        self.ids.get(name).copied().unwrap_or(NodeTypeId::INVALID)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    pub fn factory(&self, id: NodeTypeId) -> Option<Rc<dyn NodeFactory>> {
        self.types.get(id.index()).and_then(|info| info.factory.clone())
    }

    pub fn create_node_of_type(
        &self,
        ctx: &NodeCreateContext,
        id: NodeTypeId,
    ) -> Option<Box<dyn FlowNode>> {
        self.factory(id)?.create(ctx)
    }

    /// Registered types in id order, without id 0 and freed slots.
    pub fn iter(&self) -> TypeIterator<'_> {
        TypeIterator {
            types: &self.types,
            next: 1,
        }
    }

    /// Number of live types, not counting id 0.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub fn set_blacklist(&mut self, blacklist: Blacklist) {
        self.blacklist = blacklist;
    }

    pub fn init_data(&self) -> &InitData {
        &self.init_data
    }

    pub fn set_init_data(&mut self, init_data: InitData) {
        self.init_data = init_data;
    }
}

pub struct TypeIterator<'a> {
    types: &'a [TypeInfo],
    next: usize,
}

impl<'a> Iterator for TypeIterator<'a> {
    type Item = (NodeTypeId, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(info) = self.types.get(self.next) {
            let index = self.next;
            self.next += 1;
            if !info.is_blank() {
                return Some((NodeTypeId(index as u16), info.name.as_str()));
            }
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{factory::NativeNodeFactory, graph::ActivationInfo, model::NodeConfig, node::FlowEvent};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    pub(crate) struct NoopNode;

    impl FlowNode for NoopNode {
        fn config(&self) -> NodeConfig {
            NodeConfig::default()
        }

        fn process_event(&mut self, _event: FlowEvent, _info: &mut ActivationInfo) {}
    }

    pub(crate) fn noop_factory() -> Rc<dyn NodeFactory> {
        Rc::new(NativeNodeFactory::new(|| Box::new(NoopNode)))
    }

    fn overriding_factory() -> Rc<dyn NodeFactory> {
        Rc::new(NativeNodeFactory::new(|| Box::new(NoopNode)).overriding())
    }

    #[test]
    fn distinct_names_get_unique_ids() {
        let mut registry = TypeRegistry::new();
        let names = ["Math:Add", "Math:Sub", "Logic:Gate", "Time:Delay"];
        let ids: Vec<_> = names
            .iter()
            .map(|n| registry.register_type(n, noop_factory()))
            .collect();

        for (name, id) in names.iter().zip(&ids) {
            assert!(id.is_valid());
            assert_eq!(registry.type_id(name), *id);
            assert_eq!(registry.type_name(*id), *name);
        }
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(registry.type_id(INVALID_TYPE_NAME), NodeTypeId::INVALID);
    }

    #[test]
    fn freed_ids_are_reused_last_in_first_out() {
        let mut registry = TypeRegistry::new();
        let a = registry.register_type("A", noop_factory());
        let b = registry.register_type("B", noop_factory());
        registry.register_type("C", noop_factory());

        assert!(registry.unregister_type("A"));
        assert!(registry.unregister_type("B"));
        assert!(!registry.unregister_type("B"));
        assert_eq!(registry.type_id("B"), NodeTypeId::INVALID);

        assert_eq!(registry.register_type("D", noop_factory()), b);
        assert_eq!(registry.register_type("E", noop_factory()), a);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn iteration_skips_reserved_and_freed_slots() {
        let mut registry = TypeRegistry::new();
        registry.register_type("A", noop_factory());
        registry.register_type("B", noop_factory());
        registry.register_type("C", noop_factory());
        registry.unregister_type("B");

        let names: Vec<_> = registry.iter().map(|(_, name)| name).collect();
        assert_eq!(names, vec!["A", "C"]);
        // A fresh iterator starts over.
        assert_eq!(registry.iter().count(), 2);
    }

    #[test]
    fn invalid_type_cannot_be_removed() {
        let mut registry = TypeRegistry::new();
        assert!(!registry.unregister_type(INVALID_TYPE_NAME));
        assert_eq!(registry.type_name(NodeTypeId::INVALID), INVALID_TYPE_NAME);
    }

    #[test]
    #[should_panic(expected = "may not be overridden")]
    fn duplicate_registration_panics() {
        let mut registry = TypeRegistry::new();
        registry.register_type("Math:Add", noop_factory());
        registry.register_type("Math:Add", noop_factory());
    }

    #[test]
    fn failed_override_leaves_other_entries_intact() {
        let mut registry = TypeRegistry::new();
        let add = registry.register_type("Math:Add", noop_factory());
        let sub = registry.register_type("Math:Sub", noop_factory());

        let result = catch_unwind(AssertUnwindSafe(|| {
            registry.register_type("Math:Add", noop_factory())
        }));
        assert!(result.is_err());

        assert_eq!(registry.type_id("Math:Add"), add);
        assert_eq!(registry.type_id("Math:Sub"), sub);
        assert_eq!(registry.len(), 2);
        assert!(registry.factory(add).is_some());
    }

    #[test]
    fn overriding_factory_keeps_the_id() {
        let mut registry = TypeRegistry::new();
        let id = registry.register_type("entity:Door", noop_factory());
        assert_eq!(registry.register_type("entity:Door", overriding_factory()), id);
        assert!(registry.factory(id).unwrap().allow_overriding());
    }

    #[test]
    fn out_of_range_lookups_degrade_safely() {
        let registry = TypeRegistry::new();
        let unknown = NodeTypeId(999);
        assert!(registry.type_info(unknown).is_blank());
        assert_eq!(registry.type_name(unknown), "");
        assert!(registry.factory(unknown).is_none());
        assert!(registry.factory(NodeTypeId::INVALID).is_some());
    }

    #[test]
    fn blacklist_vetoes_and_renames() {
        let mut blacklist = Blacklist::default();
        blacklist.veto("Debug:CSVDumper");
        blacklist.rename("Old:NodeName", "New:NodeName");

        let mut registry = TypeRegistry::new();
        registry.set_blacklist(blacklist);

        assert_eq!(
            registry.register_type("Debug:CSVDumper", noop_factory()),
            NodeTypeId::INVALID
        );
        assert_eq!(registry.type_id("Debug:CSVDumper"), NodeTypeId::INVALID);

        let id = registry.register_type("Old:NodeName", noop_factory());
        assert!(id.is_valid());
        assert_eq!(registry.type_name(id), "New:NodeName");
        assert_eq!(registry.type_id("Old:NodeName"), NodeTypeId::INVALID);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn allocation_stops_at_the_ceiling() {
        let mut registry = TypeRegistry::new();
        for i in 1..MAX_NODE_TYPES {
            assert!(registry.register_type(&format!("T{i}"), noop_factory()).is_valid());
        }
        assert_eq!(
            registry.register_type("OneTooMany", noop_factory()),
            NodeTypeId::INVALID
        );
        registry.unregister_type("T7");
        assert_eq!(registry.register_type("Reuse", noop_factory()), NodeTypeId(7));
    }

    #[test]
    fn registration_marks_init_data() {
        let mut init_data = InitData::default();
        init_data.insert("Math:Add", "Add");
        let mut registry = TypeRegistry::new();
        registry.set_init_data(init_data);
        registry.register_type("Math:Add", noop_factory());
        assert!(registry.init_data().record("Math:Add").unwrap().registered);
    }
}

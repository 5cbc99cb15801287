//! Registry rebuild: every node type source, registered in a fixed order.

use crate::{
    blacklist::Blacklist,
    descriptor::{load_extensions, ExtensionReport},
    entity::{entity_type_name, EntityNodeFactory},
    factory::{NativeNodeFactory, NodeFactory, SingletonNodeFactory},
    init_data::InitData,
    module_manager::ModuleScan,
    nodes::{
        native_node_classes, GameStartNode, LogNode, NativeNodeClass, TrackEventNode, GAME_START,
        GAME_TRACK_EVENT, LOG_NODE,
    },
    registry::TypeRegistry,
    system::FlowSystem,
};
use std::rc::Rc;

/// A host component contributing node types of its own, such as a game plugin.
pub trait ExternalNodeProvider {
    fn name(&self) -> &str;

    fn register_node_types(&self, registry: &mut TypeRegistry);
}

/// Diagnostics of one registry rebuild.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistrationReport {
    /// Registered types, excluding `InvalidType`.
    pub types: usize,
    pub extensions: ExtensionReport,
    pub entity_classes: usize,
    pub providers: usize,
    pub modules: ModuleScan,
}

impl FlowSystem {
    /// Rebuilds the registry from scratch.
    ///
    /// Existing graphs keep their node instances; new nodes see the rebuilt registry. Only an
    /// override violation is fatal, every other failure is logged and skipped.
    pub fn register_all_node_types(&mut self) -> RegistrationReport {
        let mut report = RegistrationReport::default();
        let init_data = InitData::load_dir(&self.config.init_data_dir());
        let blacklist = Blacklist::load(&self.config.blacklist_path());
        log::info!(
            "[flow] registering node types ({} init data entries, {} blacklisted)",
            init_data.len(),
            blacklist.len()
        );

        {
            let mut registry = self.ctx.registry.borrow_mut();
            registry.set_init_data(init_data);
            registry.set_blacklist(blacklist);
            registry.reset();
            registry.register_invalid_type();

            registry.register_type(LOG_NODE, Rc::new(SingletonNodeFactory::new(LogNode::boxed())));
            registry.register_type(GAME_START, native(GameStartNode::boxed));
            registry.register_type(GAME_TRACK_EVENT, native(TrackEventNode::boxed));

            for class in native_node_classes().iter().chain(&self.natives) {
                register_native_class(&mut registry, class);
            }
        }

        report.extensions = load_extensions(&self.ctx, &self.config.descriptor_dir());

        if self.config.monolithic {
            log::debug!("[flow] monolithic build, skipping external node providers");
        } else {
            let mut registry = self.ctx.registry.borrow_mut();
            for provider in &self.providers {
                log::debug!("[flow] registering node types of '{}'", provider.name());
                provider.register_node_types(&mut registry);
                report.providers += 1;
            }
        }

        report.entity_classes = self.register_entity_classes();
        report.modules = self.modules.rescan(&self.ctx, &self.config.modules_dir());

        let registry = self.ctx.registry.borrow();
        report.types = registry.len();
        if self.config.editor {
            for class_tag in registry.init_data().unregistered() {
                log::warn!("[flow] init data names '{class_tag}' but no such node type exists");
            }
        }
        log::info!(
            "[flow] {} node types registered, {} extensions dropped",
            report.types,
            report.extensions.dropped.len()
        );
        drop(registry);

        self.last_report = Some(report.clone());
        report
    }

    fn register_entity_classes(&mut self) -> usize {
        let classes = self.ctx.env.entities.entity_classes();
        let mut registry = self.ctx.registry.borrow_mut();
        let mut count = 0;
        for class in classes {
            let name = entity_type_name(&class.name);
            // Classes without events only fill gaps.
            if !class.has_event_ports() && registry.contains(&name) {
                continue;
            }
            if registry
                .register_type(&name, Rc::new(EntityNodeFactory::new(class)))
                .is_valid()
            {
                count += 1;
            }
        }
        count
    }
}

fn native(create: fn() -> Box<dyn crate::node::FlowNode>) -> Rc<dyn NodeFactory> {
    Rc::new(NativeNodeFactory::new(create))
}

fn register_native_class(registry: &mut TypeRegistry, class: &NativeNodeClass) {
    let factory = native(class.create);
    for name in class.names() {
        registry.register_type(name, factory.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::FlowSystemConfig,
        env::{EntityClassInfo, EntitySystem, Environment},
        model::{EntityId, InputPortConfig, Value},
        nodes::AddNode,
    };
    use std::cell::Cell;
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn data_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "Libs/FlowNodes/FlownodeBlacklist.xml",
            r#"<Blacklist>
                 <Node Name="Debug:CSVDumper" NewName=""/>
                 <Node Name="Math:Mul" NewName="Math:Times"/>
               </Blacklist>"#,
        );
        write(
            root,
            "Libs/FlowNodes/FlowInitData/base.json",
            r#"{ "Nodes": [ { "ClassTag": "Math:Add", "UIName": "Add" },
                            { "ClassTag": "Script:Counter" },
                            { "ClassTag": "Missing:Thing" } ] }"#,
        );
        write(
            root,
            "Libs/FlowNodes/counter.rhai",
            r#"let Counter = #{ Category: "approved", Inputs: ["Add"], Outputs: ["Count"] };"#,
        );
        write(
            root,
            "Libs/FlowNodes/counter.node",
            r#"<Script Name="Script:Counter" File="counter.rhai" Table="Counter"/>"#,
        );
        write(
            root,
            "Libs/FlowNodes/dumper.node",
            r#"<Script Name="Debug:CSVDumper" File="counter.rhai" Table="Counter"/>"#,
        );
        write(
            root,
            "Libs/FlowgraphModules/Wait.xml",
            r#"<Module Name="Wait">
                 <Nodes>
                   <Node Id="start" Class="Module:Start"/>
                   <Node Id="end" Class="Module:End"/>
                 </Nodes>
                 <Edges><Edge From="start:Start" To="end:Success"/></Edges>
               </Module>"#,
        );
        dir
    }

    struct Doors;

    impl EntitySystem for Doors {
        fn entity_classes(&self) -> Vec<EntityClassInfo> {
            vec![
                EntityClassInfo {
                    name: "Door".to_string(),
                    inputs: vec![InputPortConfig::void("Open")],
                    outputs: Vec::new(),
                },
                EntityClassInfo {
                    name: "Rock".to_string(),
                    ..Default::default()
                },
            ]
        }

        fn entity_exists(&self, _id: EntityId) -> bool {
            false
        }

        fn send_event(&self, _id: EntityId, _event: &str, _value: &Value) {}
    }

    #[derive(Default)]
    struct CountingProvider {
        calls: Cell<usize>,
    }

    impl ExternalNodeProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn register_node_types(&self, registry: &mut TypeRegistry) {
            self.calls.set(self.calls.get() + 1);
            registry.register_type("Plugin:Add", native(AddNode::boxed));
        }
    }

    fn system(root: &Path, monolithic: bool) -> FlowSystem {
        let config = FlowSystemConfig {
            monolithic,
            editor: true,
            ..FlowSystemConfig::default().with_data_root(root)
        };
        FlowSystem::new(config, Environment::default().with_entities(Rc::new(Doors)))
    }

    fn snapshot(system: &FlowSystem) -> Vec<(u16, String)> {
        system
            .registry()
            .borrow()
            .iter()
            .map(|(id, name)| (id.0, name.to_string()))
            .collect()
    }

    #[test]
    fn every_source_is_registered() {
        let root = data_root();
        let mut system = system(root.path(), false);
        let provider = Rc::new(CountingProvider::default());
        system.register_external_provider(provider.clone());
        system.add_native_node_class(NativeNodeClass::new("Host:Add", AddNode::boxed));

        let report = system.register_all_node_types();
        let registry = system.registry();
        let registry = registry.borrow();

        for name in [
            "Log",
            "Game:Start",
            "Game:TrackEvent",
            "Math:Add",
            "Math:Sum",
            "Math:Times",
            "Host:Add",
            "Script:Counter",
            "Plugin:Add",
            "entity:Door",
            "entity:Rock",
            "Module:Start",
            "Module:End",
            "Module:Call_Wait",
        ] {
            assert!(registry.contains(name), "{name} missing");
        }
        assert!(!registry.contains("Math:Mul"));
        assert!(!registry.contains("Debug:CSVDumper"));
        assert_eq!(report.extensions.vetoed, vec!["Debug:CSVDumper"]);
        assert_eq!(report.modules.registered, vec!["Wait"]);
        assert_eq!(report.entity_classes, 2);
        assert_eq!(provider.calls.get(), 1);
        assert_eq!(report.types, registry.len());

        let init = registry.init_data();
        assert!(init.record("Script:Counter").unwrap().registered);
        assert_eq!(init.unregistered().collect::<Vec<_>>(), vec!["Missing:Thing"]);
    }

    fn input_names(system: &mut FlowSystem, type_name: &str) -> Vec<String> {
        let shared = system.create_graph();
        let mut graph = shared.borrow_mut();
        let id = graph.create_node(type_name, "node").unwrap();
        let names = graph
            .node_config(id)
            .unwrap()
            .inputs
            .iter()
            .map(|p| p.name.clone())
            .collect();
        names
    }

    #[test]
    fn portless_entity_classes_only_fill_gaps() {
        let root = data_root();
        let mut system = system(root.path(), false);
        system.add_native_node_class(NativeNodeClass::new("entity:Rock", AddNode::boxed));

        let report = system.register_all_node_types();
        assert_eq!(report.entity_classes, 1);
        assert_eq!(input_names(&mut system, "entity:Rock"), vec!["A", "B"]);
        assert_eq!(input_names(&mut system, "entity:Door"), vec!["Open"]);
    }

    #[test]
    fn entity_classes_with_ports_override_natives() {
        let root = data_root();
        let mut system = system(root.path(), false);
        system.add_native_node_class(NativeNodeClass::new("entity:Door", AddNode::boxed));

        let report = system.register_all_node_types();
        assert_eq!(report.entity_classes, 2);
        assert_eq!(input_names(&mut system, "entity:Door"), vec!["Open"]);
        assert!(input_names(&mut system, "entity:Rock").is_empty());
    }

    #[test]
    fn monolithic_builds_skip_providers() {
        let root = data_root();
        let mut system = system(root.path(), true);
        let provider = Rc::new(CountingProvider::default());
        system.register_external_provider(provider.clone());

        let report = system.register_all_node_types();
        assert_eq!(provider.calls.get(), 0);
        assert_eq!(report.providers, 0);
        assert!(!system.registry().borrow().contains("Plugin:Add"));
    }

    #[test]
    fn rebuilding_twice_gives_the_same_registry() {
        let root = data_root();
        let mut system = system(root.path(), false);
        let first_report = system.register_all_node_types();
        let first = snapshot(&system);
        let second_report = system.register_all_node_types();
        assert_eq!(snapshot(&system), first);
        assert_eq!(second_report, first_report);
        assert_eq!(system.last_report(), Some(&second_report));
    }

    #[test]
    fn empty_data_root_still_has_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let mut system = FlowSystem::new(
            FlowSystemConfig::default().with_data_root(dir.path()),
            Environment::default(),
        );
        let report = system.register_all_node_types();
        assert!(report.extensions.loaded.is_empty());
        let registry = system.registry();
        let registry = registry.borrow();
        assert!(registry.contains("Time:Delay"));
        assert_eq!(registry.type_id("InvalidType").0, 0);
    }
}

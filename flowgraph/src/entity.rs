//! Node types derived from entity classes (`entity:<Class>`).

use crate::{
    env::EntityClassInfo,
    factory::NodeFactory,
    graph::ActivationInfo,
    model::{NodeCategory, NodeConfig, PortId, Value},
    node::{FlowEvent, FlowNode, NodeCreateContext},
};
use std::rc::Rc;

pub const ENTITY_PREFIX: &str = "entity:";

pub fn entity_type_name(class: &str) -> String {
    format!("{ENTITY_PREFIX}{class}")
}

pub struct EntityNodeFactory {
    class: Rc<EntityClassInfo>,
}

impl EntityNodeFactory {
    pub fn new(class: EntityClassInfo) -> Self {
        Self {
            class: Rc::new(class),
        }
    }
}

impl NodeFactory for EntityNodeFactory {
    fn create(&self, _ctx: &NodeCreateContext) -> Option<Box<dyn FlowNode>> {
        Some(Box::new(EntityNode {
            class: self.class.clone(),
        }))
    }

    /// Entity classes replace same-named types registered before them.
    fn allow_overriding(&self) -> bool {
        true
    }
}

/// Sends activated inputs as events to its entity and raises entity events on its outputs.
struct EntityNode {
    class: Rc<EntityClassInfo>,
}

impl FlowNode for EntityNode {
    fn config(&self) -> NodeConfig {
        NodeConfig {
            inputs: self.class.inputs.clone(),
            outputs: self.class.outputs.clone(),
            description: format!("Entity class {}", self.class.name),
            category: NodeCategory::Approved,
            target_entity: true,
            hide_ui: false,
        }
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        if event != FlowEvent::Activate {
            return;
        }
        let entity = info.entity_id();
        if !entity.is_valid() {
            log::debug!("[flow] '{}' has no entity, dropping input", info.node_name());
            return;
        }
        let active: Vec<PortId> = info.active_ports().collect();
        for port in active {
            let Some(config) = self.class.inputs.get(port.index()) else {
                continue;
            };
            info.environment()
                .entities
                .send_event(entity, &config.name, info.input(port));
        }
    }

    fn on_entity_event(&mut self, event: &str, value: &Value, info: &mut ActivationInfo) {
        let port = self
            .class
            .outputs
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(event));
        match port {
            Some(index) => info.activate_output(PortId(index as u8), value.clone()),
            None => log::debug!("[flow] {} raised unknown event '{event}'", self.class.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::{EntitySystem, Environment},
        graph::{FlowGraph, GraphContext},
        model::{EntityId, FlowAddress, GraphId, InputPortConfig, OutputPortConfig},
        registry::TypeRegistry,
    };
    use std::cell::RefCell;

    #[derive(Default)]
    struct Doors {
        sent: RefCell<Vec<String>>,
    }

    impl EntitySystem for Doors {
        fn entity_classes(&self) -> Vec<EntityClassInfo> {
            vec![door_class()]
        }

        fn entity_exists(&self, id: EntityId) -> bool {
            id == EntityId(1)
        }

        fn send_event(&self, id: EntityId, event: &str, value: &Value) {
            self.sent
                .borrow_mut()
                .push(format!("{} {event} {value}", id.0));
        }
    }

    fn door_class() -> EntityClassInfo {
        EntityClassInfo {
            name: "Door".to_string(),
            inputs: vec![InputPortConfig::void("Open"), InputPortConfig::any("Lock")],
            outputs: vec![OutputPortConfig::any("Opened")],
        }
    }

    #[test]
    fn inputs_become_entity_events_and_back() {
        let doors = Rc::new(Doors::default());
        let ctx = GraphContext::new(
            TypeRegistry::shared(),
            Environment::default().with_entities(doors.clone()),
        );
        ctx.registry.borrow_mut().register_type(
            &entity_type_name("Door"),
            Rc::new(EntityNodeFactory::new(door_class())),
        );

        let mut graph = FlowGraph::new(ctx, GraphId(1));
        let door = graph.create_node("entity:Door", "door").unwrap();
        assert!(graph.node_config(door).unwrap().target_entity);
        graph.update();

        graph.activate_port(FlowAddress::input(door, PortId(1)), Value::Bool(true));
        graph.update();
        assert!(doors.sent.borrow().is_empty());

        graph.set_entity_id(door, EntityId(1));
        graph.activate_port(FlowAddress::input(door, PortId(1)), Value::Bool(true));
        graph.update();
        assert_eq!(*doors.sent.borrow(), vec!["1 Lock true"]);

        assert_eq!(graph.dispatch_entity_event(EntityId(1), "opened", &Value::Int(1)), 1);
        assert_eq!(graph.stats().pending_activations, 0);
    }
}

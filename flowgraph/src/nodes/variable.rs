//! Graph token access nodes.

use crate::{
    graph::ActivationInfo,
    model::{DataType, InputPortConfig, NodeCategory, NodeConfig, OutputPortConfig, PortId, Value},
    node::{FlowEvent, FlowNode},
};

/// Reads a graph token and sends its current value.
#[derive(Debug, Default)]
pub struct VariableGetNode;

impl VariableGetNode {
    const GET: PortId = PortId(0);
    const NAME: PortId = PortId(1);
    const VALUE: PortId = PortId(0);

    pub fn boxed() -> Box<dyn FlowNode> {
        Box::new(Self)
    }
}

impl FlowNode for VariableGetNode {
    fn config(&self) -> NodeConfig {
        NodeConfig::new()
            .input(InputPortConfig::void("Get"))
            .input(InputPortConfig::new("Name", DataType::String))
            .output(OutputPortConfig::any("Value"))
            .describe("Gets the value of a graph token")
            .category(NodeCategory::Approved)
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        if event != FlowEvent::Activate || !info.is_active(Self::GET) {
            return;
        }
        let name = info.input_string(Self::NAME);
        match info.token_value(&name).cloned() {
            Some(value) => info.activate_output(Self::VALUE, value),
            None => log::warn!("[flow] '{}': unknown graph token '{name}'", info.node_name()),
        }
    }
}

/// Writes a graph token, converted to the token's type, and sends the stored value.
#[derive(Debug, Default)]
pub struct VariableSetNode;

impl VariableSetNode {
    const SET: PortId = PortId(0);
    const NAME: PortId = PortId(1);
    const VALUE: PortId = PortId(2);
    const OUT: PortId = PortId(0);

    pub fn boxed() -> Box<dyn FlowNode> {
        Box::new(Self)
    }
}

impl FlowNode for VariableSetNode {
    fn config(&self) -> NodeConfig {
        NodeConfig::new()
            .input(InputPortConfig::void("Set"))
            .input(InputPortConfig::new("Name", DataType::String))
            .input(InputPortConfig::any("Value"))
            .output(OutputPortConfig::any("Out"))
            .describe("Sets the value of a graph token")
            .category(NodeCategory::Approved)
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        if event != FlowEvent::Activate || !info.is_active(Self::SET) {
            return;
        }
        let name = info.input_string(Self::NAME);
        let value = info.input(Self::VALUE).clone();
        if !info.set_token_value(&name, &value) {
            log::warn!(
                "[flow] '{}': cannot store {value} in graph token '{name}'",
                info.node_name()
            );
            return;
        }
        let stored = info.token_value(&name).cloned().unwrap_or(Value::Void);
        info.activate_output(Self::OUT, stored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        factory::NativeNodeFactory,
        graph::{
            tests::{test_context, Journal},
            FlowGraph, GraphToken,
        },
        model::{FlowAddress, GraphId},
    };
    use std::rc::Rc;

    fn graph_with_score(journal: &Journal) -> FlowGraph {
        let ctx = test_context(journal);
        {
            let mut registry = ctx.registry.borrow_mut();
            registry.register_type("Variable:Get", Rc::new(NativeNodeFactory::new(VariableGetNode::boxed)));
            registry.register_type("Variable:Set", Rc::new(NativeNodeFactory::new(VariableSetNode::boxed)));
        }
        let mut graph = FlowGraph::new(ctx, GraphId(3));
        graph.add_graph_token(GraphToken {
            name: "Score".to_string(),
            data_type: DataType::Int,
        });
        graph
    }

    #[test]
    fn set_then_get_round_trips_through_the_token() {
        let journal = Journal::default();
        let mut graph = graph_with_score(&journal);
        let set = graph.create_node("Variable:Set", "set").unwrap();
        let get = graph.create_node("Variable:Get", "get").unwrap();
        let stored = graph.create_node("Test:Relay", "stored").unwrap();
        let read = graph.create_node("Test:Relay", "read").unwrap();
        graph
            .link_nodes(FlowAddress::output(set, PortId(0)), FlowAddress::input(stored, PortId(0)))
            .unwrap();
        graph
            .link_nodes(FlowAddress::output(get, PortId(0)), FlowAddress::input(read, PortId(0)))
            .unwrap();
        graph.update();
        journal.borrow_mut().clear();

        graph.set_input_value(set, PortId(1), Value::String("Score".to_string()));
        graph.set_input_value(set, PortId(2), Value::Float(7.9));
        graph.activate_port(FlowAddress::input(set, PortId(0)), Value::Void);
        graph.update();
        assert_eq!(graph.token_value("Score"), Some(&Value::Int(7)));

        graph.set_input_value(get, PortId(1), Value::String("Score".to_string()));
        graph.activate_port(FlowAddress::input(get, PortId(0)), Value::Void);
        graph.update();
        assert_eq!(*journal.borrow(), vec!["stored activate 7", "read activate 7"]);
    }

    #[test]
    fn unknown_tokens_send_nothing() {
        let journal = Journal::default();
        let mut graph = graph_with_score(&journal);
        let set = graph.create_node("Variable:Set", "set").unwrap();
        let out = graph.create_node("Test:Relay", "out").unwrap();
        graph
            .link_nodes(FlowAddress::output(set, PortId(0)), FlowAddress::input(out, PortId(0)))
            .unwrap();
        graph.update();
        journal.borrow_mut().clear();

        graph.set_input_value(set, PortId(1), Value::String("Lives".to_string()));
        graph.set_input_value(set, PortId(2), Value::Int(3));
        graph.activate_port(FlowAddress::input(set, PortId(0)), Value::Void);
        graph.update();
        assert!(journal.borrow().is_empty());
        assert_eq!(graph.token_value("Lives"), None);
    }

    #[test]
    fn tokens_start_over_when_the_graph_initializes_again() {
        let journal = Journal::default();
        let mut graph = graph_with_score(&journal);
        let set = graph.create_node("Variable:Set", "set").unwrap();
        graph.update();
        graph.set_input_value(set, PortId(1), Value::String("Score".to_string()));
        graph.set_input_value(set, PortId(2), Value::Int(12));
        graph.activate_port(FlowAddress::input(set, PortId(0)), Value::Void);
        graph.update();
        assert_eq!(graph.token_value("Score"), Some(&Value::Int(12)));

        graph.uninitialize();
        graph.update();
        assert_eq!(graph.token_value("Score"), Some(&Value::Int(0)));
    }
}

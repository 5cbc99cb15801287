//! Node types whose behaviour is itself a graph.

use crate::{
    definition::{GraphDefinition, PortBindings},
    error::DefinitionError,
    factory::NodeFactory,
    graph::{ActivationInfo, FlowGraph, GraphContext},
    model::{InputPortConfig, NodeConfig, OutputPortConfig, PortId},
    node::{FlowEvent, FlowNode, NodeCreateContext},
};
use std::rc::Rc;

pub struct CompositeNodeFactory {
    definition: Rc<GraphDefinition>,
    config: NodeConfig,
}

impl CompositeNodeFactory {
    /// Validates the definition by building it once against the current registry.
    pub fn new(definition: GraphDefinition, ctx: &GraphContext) -> Result<Self, DefinitionError> {
        let mut scratch = FlowGraph::detached(ctx.clone());
        definition.instantiate(&mut scratch)?;
        let bindings = definition.bind_ports(&scratch)?;

        let mut config = NodeConfig::new()
            .describe(definition.description.clone())
            .category(definition.category);
        for (mapping, addr) in definition.inputs.iter().zip(&bindings.inputs) {
            let inner = scratch
                .node_config(addr.node)
                .and_then(|c| c.inputs.get(addr.port.index()));
            config = config.input(match inner {
                Some(port) => InputPortConfig {
                    name: mapping.name.clone(),
                    ..port.clone()
                },
                None => InputPortConfig::any(mapping.name.clone()),
            });
        }
        for (mapping, addr) in definition.outputs.iter().zip(&bindings.outputs) {
            let inner = scratch
                .node_config(addr.node)
                .and_then(|c| c.outputs.get(addr.port.index()));
            config = config.output(match inner {
                Some(port) => OutputPortConfig::new(mapping.name.clone(), port.data_type)
                    .describe(port.description.clone()),
                None => OutputPortConfig::any(mapping.name.clone()),
            });
        }

        if !config.ports_addressable() {
            return Err(DefinitionError::TooManyPorts(definition.name.clone()));
        }

        Ok(Self {
            definition: Rc::new(definition),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

impl NodeFactory for CompositeNodeFactory {
    fn create(&self, ctx: &NodeCreateContext) -> Option<Box<dyn FlowNode>> {
        let mut inner = FlowGraph::detached(ctx.graph.clone());
        inner.set_name(self.definition.name.clone());
        let bindings = self
            .definition
            .instantiate(&mut inner)
            .and_then(|_| self.definition.bind_ports(&inner));
        let bindings = match bindings {
            Ok(bindings) => bindings,
            Err(err) => {
                log::warn!("[flow] cannot build composite '{}': {err}", self.definition.name);
                return None;
            }
        };
        for (slot, addr) in bindings.outputs.iter().enumerate() {
            inner.tap_output(*addr, slot);
        }
        Some(Box::new(CompositeNode {
            inner,
            bindings,
            config: self.config.clone(),
        }))
    }

    fn allow_overriding(&self) -> bool {
        self.definition.allow_override
    }
}

/// Runs its inner graph in lock step with the activations of the outer node.
struct CompositeNode {
    inner: FlowGraph,
    bindings: PortBindings,
    config: NodeConfig,
}

impl CompositeNode {
    fn run_inner(&mut self, info: &mut ActivationInfo) {
        self.inner.update();
        for (slot, value) in self.inner.take_tapped() {
            info.activate_output(PortId(slot as u8), value);
        }
        info.set_regularly_updated(self.inner.needs_update());
    }
}

impl FlowNode for CompositeNode {
    fn config(&self) -> NodeConfig {
        self.config.clone()
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        match event {
            FlowEvent::Initialize => {
                for (index, addr) in self.bindings.inputs.iter().enumerate() {
                    let value = info.input(PortId(index as u8)).clone();
                    self.inner.set_input_value(addr.node, addr.port, value);
                }
                self.run_inner(info);
            }
            FlowEvent::Activate => {
                let active: Vec<PortId> = info.active_ports().collect();
                for port in active {
                    if let Some(addr) = self.bindings.inputs.get(port.index()) {
                        self.inner.activate_port(*addr, info.input(port).clone());
                    }
                }
                self.run_inner(info);
            }
            FlowEvent::Update => self.run_inner(info),
            FlowEvent::Suspend => self.inner.set_suspended(true),
            FlowEvent::Resume => self.inner.set_suspended(false),
            FlowEvent::Uninitialize => self.inner.uninitialize(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::tests::{test_context, Journal},
        model::{DataType, FlowAddress, GraphId, Value, MAX_PORTS},
    };

    const DOUBLE_RELAY: &str = r#"
        <Composite Name="Test:DoubleRelay" Category="advanced">
            <Nodes>
                <Node Id="a" Class="Test:FloatRelay"/>
                <Node Id="b" Class="Test:Relay"/>
            </Nodes>
            <Edges><Edge From="a:Out" To="b:In"/></Edges>
            <Inputs><Port Name="Value" Node="a" Port="In"/></Inputs>
            <Outputs><Port Name="Result" Node="b" Port="Out"/></Outputs>
        </Composite>"#;

    #[test]
    fn config_mirrors_inner_ports() {
        let ctx = test_context(&Journal::default());
        let definition = GraphDefinition::parse(DOUBLE_RELAY).unwrap();
        let factory = CompositeNodeFactory::new(definition, &ctx).unwrap();

        let config = factory.config();
        assert_eq!(factory.name(), "Test:DoubleRelay");
        assert_eq!(config.inputs[0].name, "Value");
        assert_eq!(config.inputs[0].data_type, DataType::Float);
        assert_eq!(config.outputs[0].name, "Result");
        assert!(!factory.allow_overriding());
    }

    #[test]
    fn too_many_outer_ports_are_rejected() {
        let ctx = test_context(&Journal::default());
        let ports: String = (0..=MAX_PORTS)
            .map(|i| format!(r#"<Port Name="P{i}" Node="a" Port="In"/>"#))
            .collect();
        let source = format!(
            r#"<Composite Name="Test:Wide">
                 <Nodes><Node Id="a" Class="Test:Relay"/></Nodes>
                 <Inputs>{ports}</Inputs>
               </Composite>"#
        );
        let definition = GraphDefinition::parse(&source).unwrap();
        let err = CompositeNodeFactory::new(definition, &ctx).err().unwrap();
        assert_eq!(err, DefinitionError::TooManyPorts("Test:Wide".to_string()));
        assert!(!err.is_missing_dependency());
    }

    #[test]
    fn activations_pass_through_the_inner_graph_in_one_update() {
        let journal = Journal::default();
        let ctx = test_context(&journal);
        let definition = GraphDefinition::parse(DOUBLE_RELAY).unwrap();
        let factory = CompositeNodeFactory::new(definition, &ctx).unwrap();
        ctx.registry
            .borrow_mut()
            .register_type("Test:DoubleRelay", Rc::new(factory));

        let mut graph = FlowGraph::new(ctx, GraphId(1));
        let composite = graph.create_node("Test:DoubleRelay", "c").unwrap();
        let sink = graph.create_node("Test:Relay", "sink").unwrap();
        graph
            .link_nodes(
                FlowAddress::output(composite, PortId(0)),
                FlowAddress::input(sink, PortId(0)),
            )
            .unwrap();
        graph.update();
        journal.borrow_mut().clear();

        graph.activate_port(FlowAddress::input(composite, PortId(0)), Value::Int(3));
        graph.update();

        assert_eq!(
            *journal.borrow(),
            vec!["a activate 3", "b activate 3", "sink activate 3"]
        );
    }
}

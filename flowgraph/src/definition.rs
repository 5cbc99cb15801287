//! Data-defined graphs: composite node bodies, modules and standalone graph documents.
//!
//! ```xml
//! <Composite Name="Math:AddThree" Category="approved">
//!   <Nodes>
//!     <Node Id="first" Class="Math:Add"><Input Name="B" Value="1"/></Node>
//!   </Nodes>
//!   <Edges><Edge From="first:Out" To="second:A"/></Edges>
//!   <Inputs><Port Name="X" Node="first" Port="A"/></Inputs>
//!   <Outputs><Port Name="Sum" Node="second" Port="Out"/></Outputs>
//! </Composite>
//! ```
//!
//! Graphs may also declare tokens (`<Tokens><Token Name="Score" Type="int"/></Tokens>`), and a
//! node's `Entity` may be `Graph` or `Graph2` to follow the graph's own entities.

use crate::{
    error::{DefinitionError, ExtensionError, GraphError},
    graph::{FlowGraph, GraphToken},
    model::{DataType, EntityId, FlowAddress, NodeCategory, NodeId, Value},
    registry::TypeRegistry,
    xml::XmlElement,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DefinitionKind {
    Composite,
    Module,
    Graph,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDefinition {
    pub id: String,
    pub class: String,
    pub entity: Option<EntityId>,
    /// `(port, literal)` pairs applied after creation.
    pub inputs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
}

/// A named outer port bound to a port of an inner node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub name: String,
    pub node: String,
    pub port: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphDefinition {
    pub kind: DefinitionKind,
    pub name: String,
    pub category: NodeCategory,
    pub allow_override: bool,
    pub description: String,
    pub nodes: Vec<NodeDefinition>,
    pub edges: Vec<EdgeDefinition>,
    pub inputs: Vec<PortMapping>,
    pub outputs: Vec<PortMapping>,
    pub tokens: Vec<GraphToken>,
}

/// Inner addresses of a definition's outer ports, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortBindings {
    pub inputs: Vec<FlowAddress>,
    pub outputs: Vec<FlowAddress>,
}

impl GraphDefinition {
    pub fn load(path: &Path) -> Result<Self, ExtensionError> {
        let doc = XmlElement::load(path)?;
        Ok(Self::from_xml(&doc)?)
    }

    pub fn parse(source: &str) -> Result<Self, ExtensionError> {
        let doc = XmlElement::parse(source)?;
        Ok(Self::from_xml(&doc)?)
    }

    pub fn from_xml(root: &XmlElement) -> Result<Self, DefinitionError> {
        let kind = if root.is("Composite") {
            DefinitionKind::Composite
        } else if root.is("Module") {
            DefinitionKind::Module
        } else if root.is("Graph") {
            DefinitionKind::Graph
        } else {
            return Err(DefinitionError::UnexpectedElement(root.name.clone()));
        };

        let name = root.attr("Name").unwrap_or("").trim().to_string();
        if name.is_empty() && kind != DefinitionKind::Graph {
            return Err(DefinitionError::MissingName);
        }

        let category = match root.attr("Category") {
            None => NodeCategory::default(),
            Some(text) => NodeCategory::from_name(text).unwrap_or_else(|| {
                log::warn!("[flow] '{name}': unknown category '{text}', using debug");
                NodeCategory::default()
            }),
        };

        let mut definition = GraphDefinition {
            kind,
            name,
            category,
            allow_override: root.bool_attr("Override"),
            description: root.attr("Description").unwrap_or("").to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            tokens: Vec::new(),
        };

        for section in &root.children {
            if section.is("Nodes") {
                for node in &section.children {
                    definition.nodes.push(parse_node(node)?);
                }
            } else if section.is("Edges") {
                for edge in &section.children {
                    expect(edge, "Edge")?;
                    definition.edges.push(EdgeDefinition {
                        from: required(edge, "From")?.to_string(),
                        to: required(edge, "To")?.to_string(),
                    });
                }
            } else if section.is("Inputs") || section.is("Outputs") {
                let mut ports = Vec::new();
                for port in &section.children {
                    expect(port, "Port")?;
                    ports.push(PortMapping {
                        name: required(port, "Name")?.to_string(),
                        node: required(port, "Node")?.to_string(),
                        port: required(port, "Port")?.to_string(),
                    });
                }
                if section.is("Inputs") {
                    definition.inputs = ports;
                } else {
                    definition.outputs = ports;
                }
            } else if section.is("Tokens") {
                for token in &section.children {
                    expect(token, "Token")?;
                    let name = required(token, "Name")?.to_string();
                    let type_name = required(token, "Type")?;
                    let data_type = DataType::from_name(type_name).ok_or_else(|| {
                        DefinitionError::BadTokenType {
                            name: name.clone(),
                            data_type: type_name.to_string(),
                        }
                    })?;
                    definition.tokens.push(GraphToken { name, data_type });
                }
            } else if section.is("Description") {
                definition.description = section.text.clone();
            } else {
                return Err(DefinitionError::UnexpectedElement(section.name.clone()));
            }
        }

        definition.check_references()?;
        Ok(definition)
    }

    fn check_references(&self) -> Result<(), DefinitionError> {
        let mut ids = BTreeSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(DefinitionError::DuplicateNode(node.id.clone()));
            }
        }
        for edge in &self.edges {
            for address in [&edge.from, &edge.to] {
                let (node, _) = split_address(address)?;
                if !ids.contains(node) {
                    return Err(DefinitionError::UnknownNode(node.to_string()));
                }
            }
        }
        for mapping in self.inputs.iter().chain(&self.outputs) {
            if !ids.contains(mapping.node.as_str()) {
                return Err(DefinitionError::UnknownNode(mapping.node.clone()));
            }
        }
        Ok(())
    }

    /// Node classes used by this definition, deduplicated.
    pub fn referenced_classes(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(|n| n.class.as_str()).collect()
    }

    pub fn missing_classes(&self, registry: &TypeRegistry) -> Vec<String> {
        self.referenced_classes()
            .into_iter()
            .filter(|class| !registry.contains(class))
            .map(str::to_string)
            .collect()
    }

    /// Creates the nodes and links of this definition inside `graph`.
    ///
    /// Returns the graph node id of every definition node id. A class that is not registered
    /// yields [`DefinitionError::MissingNodeType`]; anything else is a structural error.
    pub fn instantiate(&self, graph: &mut FlowGraph) -> Result<BTreeMap<String, NodeId>, DefinitionError> {
        let missing = {
            let registry = graph.context().registry.borrow();
            self.nodes.iter().find(|n| !registry.contains(&n.class)).cloned()
        };
        if let Some(node) = missing {
            return Err(DefinitionError::MissingNodeType {
                node: node.id,
                class: node.class,
            });
        }

        for token in &self.tokens {
            graph.add_graph_token(token.clone());
        }

        let mut ids = BTreeMap::new();
        for node in &self.nodes {
            let id = graph
                .create_node(&node.class, &node.id)
                .map_err(|err| match err {
                    GraphError::UnknownType(_) => DefinitionError::MissingNodeType {
                        node: node.id.clone(),
                        class: node.class.clone(),
                    },
                    other => {
                        log::debug!("[flow] creating '{}' failed: {other}", node.id);
                        DefinitionError::NodeCreation(node.id.clone())
                    }
                })?;

            for (port_name, literal) in &node.inputs {
                let config = graph
                    .node_config(id)
                    .ok_or_else(|| DefinitionError::NodeCreation(node.id.clone()))?;
                let port = config.input_port(port_name).ok_or_else(|| DefinitionError::UnknownPort {
                    node: node.id.clone(),
                    port: port_name.clone(),
                    direction: "input",
                })?;
                let data_type = config.inputs[port.index()].data_type;
                let value = Value::parse_literal(literal, data_type).ok_or_else(|| {
                    DefinitionError::BadLiteral {
                        port: format!("{}:{port_name}", node.id),
                        value: literal.clone(),
                    }
                })?;
                graph.set_input_value(id, port, value);
            }

            if let Some(entity) = node.entity {
                graph.set_entity_id(id, entity);
            }
            ids.insert(node.id.clone(), id);
        }

        for edge in &self.edges {
            let from = resolve(graph, &edge.from, true)?;
            let to = resolve(graph, &edge.to, false)?;
            graph
                .link_nodes(from, to)
                .map_err(|err| DefinitionError::Link(format!("{} -> {}", edge.from, edge.to), err))?;
        }
        Ok(ids)
    }

    /// Inner addresses of the outer ports, resolved against an instantiated graph.
    pub fn bind_ports(&self, graph: &FlowGraph) -> Result<PortBindings, DefinitionError> {
        let bind = |mapping: &PortMapping, is_output: bool| {
            resolve(graph, &format!("{}:{}", mapping.node, mapping.port), is_output)
        };
        Ok(PortBindings {
            inputs: self
                .inputs
                .iter()
                .map(|m| bind(m, false))
                .collect::<Result<_, _>>()?,
            outputs: self
                .outputs
                .iter()
                .map(|m| bind(m, true))
                .collect::<Result<_, _>>()?,
        })
    }
}

fn parse_node(element: &XmlElement) -> Result<NodeDefinition, DefinitionError> {
    expect(element, "Node")?;
    let id = element
        .attr("Id")
        .or_else(|| element.attr("Name"))
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| DefinitionError::MissingAttribute {
            element: element.name.clone(),
            attribute: "Id",
        })?
        .trim()
        .to_string();
    let class = required(element, "Class")?.to_string();
    let entity = match element.attr("Entity").map(str::trim) {
        None => None,
        Some("Graph") => Some(EntityId::GRAPH1),
        Some("Graph2") => Some(EntityId::GRAPH2),
        Some(text) => Some(EntityId(text.parse().map_err(|_| {
            DefinitionError::BadLiteral {
                port: format!("{id}:Entity"),
                value: text.to_string(),
            }
        })?)),
    };

    let mut inputs = Vec::new();
    for input in &element.children {
        expect(input, "Input")?;
        let port = required(input, "Name")?.to_string();
        let value = input
            .attr("Value")
            .map(str::to_string)
            .unwrap_or_else(|| input.text.clone());
        inputs.push((port, value));
    }

    Ok(NodeDefinition {
        id,
        class,
        entity,
        inputs,
    })
}

fn expect(element: &XmlElement, name: &str) -> Result<(), DefinitionError> {
    if element.is(name) {
        Ok(())
    } else {
        Err(DefinitionError::UnexpectedElement(element.name.clone()))
    }
}

fn required<'a>(element: &'a XmlElement, attribute: &'static str) -> Result<&'a str, DefinitionError> {
    element
        .attr(attribute)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DefinitionError::MissingAttribute {
            element: element.name.clone(),
            attribute,
        })
}

fn split_address(address: &str) -> Result<(&str, &str), DefinitionError> {
    address
        .rsplit_once(':')
        .map(|(node, port)| (node.trim(), port.trim()))
        .filter(|(node, port)| !node.is_empty() && !port.is_empty())
        .ok_or_else(|| DefinitionError::MalformedAddress(address.to_string()))
}

fn resolve(graph: &FlowGraph, address: &str, is_output: bool) -> Result<FlowAddress, DefinitionError> {
    let (node, port) = split_address(address)?;
    graph
        .resolve_address(address, is_output)
        .ok_or_else(|| DefinitionError::UnknownPort {
            node: node.to_string(),
            port: port.to_string(),
            direction: if is_output { "output" } else { "input" },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::{
            tests::{test_context, Journal},
            GraphContext,
        },
        model::{GraphId, PortId},
    };

    const RELAY_CHAIN: &str = r#"
        <Composite Name="Test:Chain" Category="Approved" Override="1">
            <Description>two relays</Description>
            <Nodes>
                <Node Id="a" Class="Test:Relay"/>
                <Node Id="b" Class="Test:FloatRelay" Entity="12"><Input Name="In" Value="2.5"/></Node>
            </Nodes>
            <Edges><Edge From="a:Out" To="b:In"/></Edges>
            <Inputs><Port Name="Value" Node="a" Port="In"/></Inputs>
            <Outputs><Port Name="Result" Node="b" Port="Out"/></Outputs>
        </Composite>"#;

    fn context() -> GraphContext {
        test_context(&Journal::default())
    }

    #[test]
    fn parses_the_composite_document() {
        let definition = GraphDefinition::parse(RELAY_CHAIN).unwrap();
        assert_eq!(definition.kind, DefinitionKind::Composite);
        assert_eq!(definition.name, "Test:Chain");
        assert_eq!(definition.category, NodeCategory::Approved);
        assert!(definition.allow_override);
        assert_eq!(definition.description, "two relays");
        assert_eq!(definition.nodes[1].entity, Some(EntityId(12)));
        assert_eq!(
            definition.nodes[1].inputs,
            vec![("In".to_string(), "2.5".to_string())]
        );
        assert_eq!(
            definition.referenced_classes().into_iter().collect::<Vec<_>>(),
            vec!["Test:FloatRelay", "Test:Relay"]
        );
    }

    #[test]
    fn instantiates_nodes_values_and_links() {
        let definition = GraphDefinition::parse(RELAY_CHAIN).unwrap();
        let mut graph = FlowGraph::new(context(), GraphId(1));
        let ids = definition.instantiate(&mut graph).unwrap();

        let b = ids["b"];
        assert_eq!(graph.input_value(b, PortId(0)), Some(&Value::Float(2.5)));
        assert_eq!(graph.entity_id(b), EntityId(12));
        assert_eq!(graph.links().len(), 1);

        let ports = definition.bind_ports(&graph).unwrap();
        assert_eq!(ports.inputs, vec![FlowAddress::input(ids["a"], PortId(0))]);
        assert_eq!(ports.outputs, vec![FlowAddress::output(b, PortId(0))]);
    }

    #[test]
    fn unknown_classes_are_a_missing_dependency() {
        let definition = GraphDefinition::parse(
            r#"<Composite Name="X"><Nodes><Node Id="n" Class="Later:Type"/></Nodes></Composite>"#,
        )
        .unwrap();
        let mut graph = FlowGraph::new(context(), GraphId(1));
        let err = definition.instantiate(&mut graph).unwrap_err();
        assert!(err.is_missing_dependency());
        assert_eq!(graph.node_count(), 0);
        assert_eq!(
            definition.missing_classes(&graph.context().registry.borrow()),
            vec!["Later:Type".to_string()]
        );
    }

    #[test]
    fn structural_errors_are_not_retryable() {
        let cases = [
            r#"<Composite><Nodes/></Composite>"#,
            r#"<Composite Name="X"><Nodes><Node Id="a" Class="Test:Relay"/><Node Id="a" Class="Test:Relay"/></Nodes></Composite>"#,
            r#"<Composite Name="X"><Nodes><Node Id="a" Class="Test:Relay"/></Nodes><Edges><Edge From="a:Out" To="zz:In"/></Edges></Composite>"#,
            r#"<Composite Name="X"><Nodes><Node Id="a" Class="Test:Relay"/></Nodes><Edges><Edge From="aOut" To="a:In"/></Edges></Composite>"#,
            r#"<Composite Name="X"><Wires/></Composite>"#,
            r#"<Recipe Name="X"/>"#,
        ];
        for case in cases {
            let err = GraphDefinition::parse(case).unwrap_err();
            assert!(matches!(err, ExtensionError::Definition(_)), "{case}: {err}");
        }

        let bad_port = GraphDefinition::parse(
            r#"<Composite Name="X"><Nodes><Node Id="a" Class="Test:Relay"><Input Name="Nope" Value="1"/></Node></Nodes></Composite>"#,
        )
        .unwrap();
        let mut graph = FlowGraph::new(context(), GraphId(1));
        let err = bad_port.instantiate(&mut graph).unwrap_err();
        assert!(!err.is_missing_dependency());
        assert!(matches!(err, DefinitionError::UnknownPort { .. }));
    }

    #[test]
    fn tokens_and_graph_entities_are_instantiated() {
        let definition = GraphDefinition::parse(
            r#"<Graph>
                 <Tokens>
                   <Token Name="Score" Type="int"/>
                   <Token Name="Target" Type="Entity"/>
                 </Tokens>
                 <Nodes>
                   <Node Id="owner" Class="Test:Relay" Entity="Graph"/>
                   <Node Id="other" Class="Test:Relay" Entity="Graph2"/>
                 </Nodes>
               </Graph>"#,
        )
        .unwrap();
        assert_eq!(definition.tokens.len(), 2);
        assert_eq!(definition.nodes[0].entity, Some(EntityId::GRAPH1));

        let mut graph = FlowGraph::new(context(), GraphId(1));
        let ids = definition.instantiate(&mut graph).unwrap();
        assert_eq!(graph.graph_token_count(), 2);
        assert_eq!(graph.token_value("Score"), Some(&Value::Int(0)));
        assert!(graph.set_graph_entity(EntityId(5), 1));
        assert_eq!(graph.entity_id(ids["other"]), EntityId(5));
        assert_eq!(graph.entity_id(ids["owner"]), EntityId::INVALID);

        let err = GraphDefinition::parse(
            r#"<Graph><Tokens><Token Name="Score" Type="money"/></Tokens></Graph>"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ExtensionError::Definition(DefinitionError::BadTokenType { ref data_type, .. })
                if data_type == "money"
        ));
    }

    #[test]
    fn bad_literals_are_reported() {
        let definition = GraphDefinition::parse(
            r#"<Graph><Nodes><Node Id="f" Class="Test:FloatRelay"><Input Name="In" Value="abc"/></Node></Nodes></Graph>"#,
        )
        .unwrap();
        let mut graph = FlowGraph::new(context(), GraphId(1));
        assert_eq!(
            definition.instantiate(&mut graph),
            Err(DefinitionError::BadLiteral {
                port: "f:In".to_string(),
                value: "abc".to_string()
            })
        );
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a registered node type. `0` is reserved for "no type".
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeTypeId(pub u16);

impl NodeTypeId {
    pub const INVALID: Self = Self(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a node inside one graph.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u16);

impl NodeId {
    pub const INVALID: Self = Self(u16::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortId(pub u8);

/// Most ports one side of a node may declare.
pub const MAX_PORTS: usize = u8::MAX as usize;

impl PortId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphId(pub u32);

impl GraphId {
    /// Graphs owned by a node (composites) rather than by the system.
    pub const DETACHED: Self = Self(u32::MAX);
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph#{}", self.0)
    }
}

/// Handle to an entity owned by the host's entity system.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    pub const INVALID: Self = Self(0);
    /// Placeholders a node may target; they resolve to the owning graph's entities.
    pub const GRAPH1: Self = Self(u64::MAX);
    pub const GRAPH2: Self = Self(u64::MAX - 1);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Graph entity slot of a placeholder id.
    pub fn graph_slot(self) -> Option<usize> {
        match self {
            Self::GRAPH1 => Some(0),
            Self::GRAPH2 => Some(1),
            _ => None,
        }
    }
}

/// A port endpoint: `(node, port, is_output)`.
///
/// Ordering is node, then port, then direction, which keeps all edges leaving one output
/// contiguous once the edge list is sorted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowAddress {
    pub node: NodeId,
    pub port: PortId,
    pub is_output: bool,
}

impl FlowAddress {
    pub fn new(node: NodeId, port: PortId, is_output: bool) -> Self {
        Self {
            node,
            port,
            is_output,
        }
    }

    pub fn input(node: NodeId, port: PortId) -> Self {
        Self::new(node, port, false)
    }

    pub fn output(node: NodeId, port: PortId) -> Self {
        Self::new(node, port, true)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Any,
    Void,
    Int,
    Float,
    Double,
    Bool,
    String,
    EntityId,
    Vec3,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Any => "any",
            DataType::Void => "void",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Bool => "bool",
            DataType::String => "string",
            DataType::EntityId => "entity",
            DataType::Vec3 => "vec3",
        }
    }

    /// Parses the type names used by data files, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Some(match name.as_str() {
            "any" => DataType::Any,
            "void" => DataType::Void,
            "int" | "integer" => DataType::Int,
            "float" | "number" => DataType::Float,
            "double" => DataType::Double,
            "bool" | "boolean" => DataType::Bool,
            "string" => DataType::String,
            "entity" | "entityid" => DataType::EntityId,
            "vec3" | "vector" => DataType::Vec3,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Void,
    Int(i32),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    EntityId(EntityId),
    Vec3([f32; 3]),
}

impl Default for Value {
    fn default() -> Self {
        Self::Void
    }
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Void => DataType::Void,
            Value::Int(_) => DataType::Int,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Bool(_) => DataType::Bool,
            Value::String(_) => DataType::String,
            Value::EntityId(_) => DataType::EntityId,
            Value::Vec3(_) => DataType::Vec3,
        }
    }

    pub fn default_for(data_type: DataType) -> Self {
        match data_type {
            DataType::Any | DataType::Void => Value::Void,
            DataType::Int => Value::Int(0),
            DataType::Float => Value::Float(0.0),
            DataType::Double => Value::Double(0.0),
            DataType::Bool => Value::Bool(false),
            DataType::String => Value::String(String::new()),
            DataType::EntityId => Value::EntityId(EntityId::INVALID),
            DataType::Vec3 => Value::Vec3([0.0; 3]),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(f64::from(*i)),
            Value::Float(f) => Some(f64::from(*f)),
            Value::Double(d) => Some(*d),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::EntityId(id) => Some(id.0 as f64),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Void | Value::Vec3(_) => None,
        }
    }

    /// Converts the value for delivery into a port of type `target`.
    ///
    /// `Any` accepts the value unchanged and `Void` discards it. `None` means the value has no
    /// meaningful representation in the target type.
    pub fn convert(&self, target: DataType) -> Option<Value> {
        if target == DataType::Any || self.data_type() == target {
            return Some(self.clone());
        }
        if let Value::Void = self {
            return Some(Value::default_for(target));
        }

        match target {
            DataType::Any => Some(self.clone()),
            DataType::Void => Some(Value::Void),
            DataType::Int => self.as_f64().map(|v| Value::Int(v as i32)),
            DataType::Float => self.as_f64().map(|v| Value::Float(v as f32)),
            DataType::Double => self.as_f64().map(Value::Double),
            DataType::Bool => match self {
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" => Some(Value::Bool(true)),
                    "false" | "no" => Some(Value::Bool(false)),
                    other => other.parse::<f64>().ok().map(|v| Value::Bool(v != 0.0)),
                },
                Value::Vec3(_) => None,
                other => other.as_f64().map(|v| Value::Bool(v != 0.0)),
            },
            DataType::String => Some(Value::String(self.to_string())),
            DataType::EntityId => self
                .as_f64()
                .filter(|v| *v >= 0.0)
                .map(|v| Value::EntityId(EntityId(v as u64))),
            DataType::Vec3 => match self {
                Value::String(s) => parse_vec3(s).map(Value::Vec3),
                other => other.as_f64().map(|v| Value::Vec3([v as f32; 3])),
            },
        }
    }

    /// Parses a literal from a data file into the given port type.
    pub fn parse_literal(text: &str, data_type: DataType) -> Option<Value> {
        match data_type {
            DataType::Any | DataType::String => Some(Value::String(text.to_string())),
            other => Value::String(text.to_string()).convert(other),
        }
    }
}

fn parse_vec3(text: &str) -> Option<[f32; 3]> {
    let mut out = [0.0; 3];
    let mut parts = text.split(',');
    for slot in out.iter_mut() {
        *slot = parts.next()?.trim().parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => Ok(()),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => f.write_str(s),
            Value::EntityId(id) => write!(f, "{}", id.0),
            Value::Vec3([x, y, z]) => write!(f, "{x},{y},{z}"),
        }
    }
}

/// Editor visibility class of a node type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeCategory {
    Approved,
    Advanced,
    #[default]
    Debug,
    Obsolete,
}

impl NodeCategory {
    pub fn name(self) -> &'static str {
        match self {
            NodeCategory::Approved => "approved",
            NodeCategory::Advanced => "advanced",
            NodeCategory::Debug => "debug",
            NodeCategory::Obsolete => "obsolete",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            NodeCategory::Approved,
            NodeCategory::Advanced,
            NodeCategory::Debug,
            NodeCategory::Obsolete,
        ]
        .into_iter()
        .find(|c| c.name().eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone)]
pub struct InputPortConfig {
    pub name: String,
    pub data_type: DataType,
    pub default: Value,
    pub description: String,
}

impl InputPortConfig {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default: Value::default_for(data_type),
            description: String::new(),
        }
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Any)
    }

    pub fn void(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Void)
    }

    /// Port typed after its default value.
    pub fn with_default(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            data_type: default.data_type(),
            default,
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct OutputPortConfig {
    pub name: String,
    pub data_type: DataType,
    pub description: String,
}

impl OutputPortConfig {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            description: String::new(),
        }
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Any)
    }

    pub fn void(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Void)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Static port layout and editor metadata of a node.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub inputs: Vec<InputPortConfig>,
    pub outputs: Vec<OutputPortConfig>,
    pub description: String,
    pub category: NodeCategory,
    /// The node acts on the entity assigned to it.
    pub target_entity: bool,
    pub hide_ui: bool,
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, port: InputPortConfig) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn output(mut self, port: OutputPortConfig) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: NodeCategory) -> Self {
        self.category = category;
        self
    }

    pub fn target_entity(mut self) -> Self {
        self.target_entity = true;
        self
    }

    /// Whether every port can be addressed by a [`PortId`].
    pub fn ports_addressable(&self) -> bool {
        self.inputs.len() <= MAX_PORTS && self.outputs.len() <= MAX_PORTS
    }

    pub fn input_port(&self, name: &str) -> Option<PortId> {
        port_index(self.inputs.iter().map(|p| p.name.as_str()), name)
    }

    pub fn output_port(&self, name: &str) -> Option<PortId> {
        port_index(self.outputs.iter().map(|p| p.name.as_str()), name)
    }
}

// Port names are matched case-insensitively, as data files are hand written.
fn port_index<'a>(mut names: impl Iterator<Item = &'a str>, name: &str) -> Option<PortId> {
    names
        .position(|n| n.eq_ignore_ascii_case(name))
        .and_then(|i| u8::try_from(i).ok())
        .map(PortId)
}

//! Node instance contract.

use crate::{
    graph::{ActivationInfo, GraphContext},
    model::{GraphId, NodeConfig, NodeId, Value},
};
use std::collections::BTreeMap;

/// Lifecycle and dataflow events delivered to [`FlowNode::process_event`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FlowEvent {
    /// Sent every tick to nodes that asked for regular updates.
    Update,
    /// One or more input ports were activated.
    Activate,
    /// Sent once at the end of the activation pass to nodes that requested it.
    FinalActivate,
    /// Sent once when the graph first updates. All inputs are flagged active.
    Initialize,
    FinalInitialize,
    SetEntityId,
    Suspend,
    Resume,
    ConnectInputPort,
    DisconnectInputPort,
    ConnectOutputPort,
    DisconnectOutputPort,
    Uninitialize,
    PostSerialize,
}

impl FlowEvent {
    /// Event sent to nodes that requested final activation during this event's pass.
    pub fn final_variant(self) -> Option<FlowEvent> {
        match self {
            FlowEvent::Activate => Some(FlowEvent::FinalActivate),
            FlowEvent::Initialize => Some(FlowEvent::FinalInitialize),
            _ => None,
        }
    }
}

/// A unit of visual-scripting logic.
pub trait FlowNode {
    fn config(&self) -> NodeConfig;

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo);

    /// Saves or restores private node state.
    fn serialize(&mut self, _ser: &mut NodeSerializer) {}

    /// An event raised by the entity this node targets.
    fn on_entity_event(&mut self, _event: &str, _value: &Value, _info: &mut ActivationInfo) {}
}

/// What a factory gets to see while creating a node.
pub struct NodeCreateContext<'a> {
    pub graph: &'a GraphContext,
    pub graph_id: GraphId,
    pub node_id: NodeId,
}

/// Bidirectional key/value store handed to [`FlowNode::serialize`].
#[derive(Debug, Default)]
pub struct NodeSerializer {
    reading: bool,
    values: BTreeMap<String, Value>,
}

impl NodeSerializer {
    pub fn writer() -> Self {
        Self::default()
    }

    pub fn reader(values: BTreeMap<String, Value>) -> Self {
        Self {
            reading: true,
            values,
        }
    }

    pub fn is_reading(&self) -> bool {
        self.reading
    }

    /// Writes `value` or overwrites it with the stored one when reading.
    pub fn value(&mut self, key: &str, value: &mut Value) {
        if self.reading {
            if let Some(stored) = self.values.get(key) {
                *value = stored.clone();
            }
        } else {
            self.values.insert(key.to_string(), value.clone());
        }
    }

    pub fn double(&mut self, key: &str, value: &mut f64) {
        let mut boxed = Value::Double(*value);
        self.value(key, &mut boxed);
        if let Value::Double(v) = boxed {
            *value = v;
        }
    }

    pub fn boolean(&mut self, key: &str, value: &mut bool) {
        let mut boxed = Value::Bool(*value);
        self.value(key, &mut boxed);
        if let Value::Bool(v) = boxed {
            *value = v;
        }
    }

    pub fn into_values(self) -> BTreeMap<String, Value> {
        self.values
    }
}

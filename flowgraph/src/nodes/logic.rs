//! Flow routing nodes.

use crate::{
    graph::ActivationInfo,
    model::{InputPortConfig, NodeCategory, NodeConfig, OutputPortConfig, PortId, Value},
    node::{FlowEvent, FlowNode, NodeSerializer},
};

/// Forwards whichever of its inputs was activated.
#[derive(Debug, Default)]
pub struct AnyNode;

impl AnyNode {
    const INPUTS: u8 = 4;

    pub fn boxed() -> Box<dyn FlowNode> {
        Box::new(Self)
    }
}

impl FlowNode for AnyNode {
    fn config(&self) -> NodeConfig {
        let mut config = NodeConfig::new()
            .output(OutputPortConfig::any("Out"))
            .describe("Forwards any activated input")
            .category(NodeCategory::Approved);
        for i in 1..=Self::INPUTS {
            config = config.input(InputPortConfig::any(format!("In{i}")));
        }
        config
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        if event != FlowEvent::Activate {
            return;
        }
        let active: Vec<PortId> = info.active_ports().collect();
        for port in active {
            let value = info.input(port).clone();
            info.activate_output(PortId(0), value);
        }
    }
}

/// Passes `In` through to `Out` while open.
#[derive(Debug, Default)]
pub struct GateNode {
    closed: bool,
}

impl GateNode {
    const IN: PortId = PortId(0);
    const OPEN: PortId = PortId(1);
    const CLOSE: PortId = PortId(2);
    const START_CLOSED: PortId = PortId(3);

    pub fn boxed() -> Box<dyn FlowNode> {
        Box::<Self>::default()
    }
}

impl FlowNode for GateNode {
    fn config(&self) -> NodeConfig {
        NodeConfig::new()
            .input(InputPortConfig::any("In"))
            .input(InputPortConfig::void("Open"))
            .input(InputPortConfig::void("Close"))
            .input(InputPortConfig::with_default("StartClosed", Value::Bool(false)))
            .output(OutputPortConfig::any("Out"))
            .describe("Passes In to Out while open")
            .category(NodeCategory::Approved)
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        match event {
            FlowEvent::Initialize => self.closed = info.input_bool(Self::START_CLOSED),
            FlowEvent::Activate => {
                if info.is_active(Self::OPEN) {
                    self.closed = false;
                }
                if info.is_active(Self::CLOSE) {
                    self.closed = true;
                }
                if info.is_active(Self::IN) && !self.closed {
                    let value = info.input(Self::IN).clone();
                    info.activate_output(PortId(0), value);
                }
            }
            _ => {}
        }
    }

    fn serialize(&mut self, ser: &mut NodeSerializer) {
        ser.boolean("closed", &mut self.closed);
    }
}

//! Game lifecycle and analytics nodes.

use crate::{
    graph::ActivationInfo,
    model::{DataType, InputPortConfig, NodeCategory, NodeConfig, OutputPortConfig, PortId, Value},
    node::{FlowEvent, FlowNode, NodeSerializer},
};

pub const GAME_START: &str = "Game:Start";
pub const GAME_TRACK_EVENT: &str = "Game:TrackEvent";

/// Fires once on the first update after the graph initializes.
#[derive(Debug, Default)]
pub struct GameStartNode {
    fired: bool,
}

impl GameStartNode {
    const OUTPUT: PortId = PortId(0);

    pub fn boxed() -> Box<dyn FlowNode> {
        Box::<Self>::default()
    }
}

impl FlowNode for GameStartNode {
    fn config(&self) -> NodeConfig {
        NodeConfig::new()
            .output(OutputPortConfig::new("Output", DataType::Bool))
            .describe("Triggered when the game starts")
            .category(NodeCategory::Approved)
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        match event {
            FlowEvent::Initialize => {
                self.fired = false;
                info.set_regularly_updated(true);
            }
            FlowEvent::Update => {
                if !self.fired {
                    self.fired = true;
                    info.activate_output(Self::OUTPUT, Value::Bool(true));
                }
                info.set_regularly_updated(false);
            }
            _ => {}
        }
    }

    fn serialize(&mut self, ser: &mut NodeSerializer) {
        ser.boolean("fired", &mut self.fired);
    }
}

/// Forwards a named analytics event to the event tracker.
#[derive(Debug, Default)]
pub struct TrackEventNode;

impl TrackEventNode {
    const TRIGGER: PortId = PortId(0);
    const EVENT: PortId = PortId(1);
    const VALUE: PortId = PortId(2);

    pub fn boxed() -> Box<dyn FlowNode> {
        Box::new(Self)
    }
}

impl FlowNode for TrackEventNode {
    fn config(&self) -> NodeConfig {
        NodeConfig::new()
            .input(InputPortConfig::void("Trigger"))
            .input(InputPortConfig::new("Event", DataType::String))
            .input(InputPortConfig::any("Value"))
            .describe("Sends an analytics event")
            .category(NodeCategory::Advanced)
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        if event != FlowEvent::Activate || !info.is_active(Self::TRIGGER) {
            return;
        }
        let name = info.input_string(Self::EVENT);
        if name.is_empty() {
            log::warn!("[flow] '{}': track event without a name", info.node_name());
            return;
        }
        let value = info.input(Self::VALUE).clone();
        info.environment().tracker.track(&name, &value);
    }
}

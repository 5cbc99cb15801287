//! Debug output node.

use crate::{
    graph::ActivationInfo,
    model::{DataType, InputPortConfig, NodeCategory, NodeConfig, PortId},
    node::{FlowEvent, FlowNode},
};

pub const LOG_NODE: &str = "Log";

/// Writes its message to the log when triggered. Registered as a singleton.
#[derive(Debug, Default)]
pub struct LogNode {
    written: usize,
}

impl LogNode {
    const MESSAGE: PortId = PortId(0);

    pub fn boxed() -> Box<dyn FlowNode> {
        Box::<Self>::default()
    }
}

impl FlowNode for LogNode {
    fn config(&self) -> NodeConfig {
        NodeConfig::new()
            .input(InputPortConfig::new("Message", DataType::String).describe("Text to log"))
            .describe("Writes a message to the log")
            .category(NodeCategory::Debug)
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        if event == FlowEvent::Activate && info.is_active(Self::MESSAGE) {
            self.written += 1;
            log::info!(
                "[flow] {} '{}': {}",
                info.graph_id(),
                info.node_name(),
                info.input(Self::MESSAGE)
            );
        }
    }
}

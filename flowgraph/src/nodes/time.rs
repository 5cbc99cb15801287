//! Delay node.

use crate::{
    graph::ActivationInfo,
    model::{DataType, InputPortConfig, NodeCategory, NodeConfig, OutputPortConfig, PortId, Value},
    node::{FlowEvent, FlowNode, NodeSerializer},
};

/// Re-emits `In` on `Out` after `Delay` seconds. A new `In` restarts the wait.
///
/// Waiting is done by polling the clock on regular updates.
#[derive(Debug, Default)]
pub struct DelayNode {
    due: Option<f64>,
    pending: Value,
}

impl DelayNode {
    const IN: PortId = PortId(0);
    const DELAY: PortId = PortId(1);
    const OUT: PortId = PortId(0);

    pub fn boxed() -> Box<dyn FlowNode> {
        Box::<Self>::default()
    }
}

impl FlowNode for DelayNode {
    fn config(&self) -> NodeConfig {
        NodeConfig::new()
            .input(InputPortConfig::any("In"))
            .input(InputPortConfig::with_default("Delay", Value::Float(1.0)).describe("Seconds"))
            .output(OutputPortConfig::new("Out", DataType::Any))
            .describe("Delays a signal")
            .category(NodeCategory::Approved)
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        match event {
            FlowEvent::Initialize => {
                self.due = None;
                info.set_regularly_updated(false);
            }
            FlowEvent::Activate if info.is_active(Self::IN) => {
                let delay = f64::from(info.input_float(Self::DELAY).max(0.0));
                self.due = Some(info.now() + delay);
                self.pending = info.input(Self::IN).clone();
                info.set_regularly_updated(true);
            }
            FlowEvent::Update => match self.due {
                Some(due) if info.now() >= due => {
                    self.due = None;
                    info.set_regularly_updated(false);
                    let value = std::mem::take(&mut self.pending);
                    info.activate_output(Self::OUT, value);
                }
                Some(_) => {}
                None => info.set_regularly_updated(false),
            },
            FlowEvent::PostSerialize => info.set_regularly_updated(self.due.is_some()),
            _ => {}
        }
    }

    fn serialize(&mut self, ser: &mut NodeSerializer) {
        let mut due = self.due.unwrap_or(-1.0);
        ser.double("due", &mut due);
        ser.value("pending", &mut self.pending);
        if ser.is_reading() {
            self.due = (due >= 0.0).then_some(due);
        }
    }
}

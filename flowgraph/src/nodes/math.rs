//! Arithmetic nodes.

use crate::{
    graph::ActivationInfo,
    model::{DataType, InputPortConfig, NodeCategory, NodeConfig, OutputPortConfig, PortId, Value},
    node::{FlowEvent, FlowNode},
};

const A: PortId = PortId(0);
const B: PortId = PortId(1);
const OUT: PortId = PortId(0);

fn binary_config(description: &str) -> NodeConfig {
    NodeConfig::new()
        .input(InputPortConfig::new("A", DataType::Float))
        .input(InputPortConfig::new("B", DataType::Float))
        .output(OutputPortConfig::new("Out", DataType::Float))
        .describe(description)
        .category(NodeCategory::Approved)
}

fn run_binary(event: FlowEvent, info: &mut ActivationInfo, op: fn(f32, f32) -> f32) {
    if event == FlowEvent::Activate && info.any_active() {
        let result = op(info.input_float(A), info.input_float(B));
        info.activate_output(OUT, Value::Float(result));
    }
}

/// Out = A + B, recomputed whenever an input is activated.
#[derive(Debug, Default)]
pub struct AddNode;

impl AddNode {
    pub fn boxed() -> Box<dyn FlowNode> {
        Box::new(Self)
    }
}

impl FlowNode for AddNode {
    fn config(&self) -> NodeConfig {
        binary_config("Out = A + B")
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        run_binary(event, info, |a, b| a + b);
    }
}

#[derive(Debug, Default)]
pub struct MultiplyNode;

impl MultiplyNode {
    pub fn boxed() -> Box<dyn FlowNode> {
        Box::new(Self)
    }
}

impl FlowNode for MultiplyNode {
    fn config(&self) -> NodeConfig {
        binary_config("Out = A * B")
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        run_binary(event, info, |a, b| a * b);
    }
}

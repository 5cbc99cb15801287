//! Module boundary and call nodes.

use crate::{
    factory::NodeFactory,
    graph::ActivationInfo,
    model::{InputPortConfig, NodeCategory, NodeConfig, OutputPortConfig, PortId, Value},
    module_manager::{ModuleInstanceId, ModuleOutcome, SharedModuleBoard},
    node::{FlowEvent, FlowNode, NodeCreateContext},
};

/// Fires `Start` on the first update of its module instance.
#[derive(Debug, Default)]
pub struct ModuleStartNode;

impl ModuleStartNode {
    pub fn boxed() -> Box<dyn FlowNode> {
        Box::new(Self)
    }
}

impl FlowNode for ModuleStartNode {
    fn config(&self) -> NodeConfig {
        NodeConfig::new()
            .output(OutputPortConfig::void("Start"))
            .describe("Entry point of a module")
            .category(NodeCategory::Approved)
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        match event {
            FlowEvent::Initialize if info.module_instance().is_some() => {
                info.set_regularly_updated(true)
            }
            FlowEvent::Update => {
                info.set_regularly_updated(false);
                info.activate_output(PortId(0), Value::Void);
            }
            _ => {}
        }
    }
}

/// Completes its module instance.
#[derive(Debug, Default)]
pub struct ModuleEndNode;

impl ModuleEndNode {
    const SUCCESS: PortId = PortId(0);
    const CANCEL: PortId = PortId(1);

    pub fn boxed() -> Box<dyn FlowNode> {
        Box::new(Self)
    }
}

impl FlowNode for ModuleEndNode {
    fn config(&self) -> NodeConfig {
        NodeConfig::new()
            .input(InputPortConfig::void("Success"))
            .input(InputPortConfig::void("Cancel"))
            .describe("Ends the running module")
            .category(NodeCategory::Approved)
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        if event != FlowEvent::Activate {
            return;
        }
        let outcome = if info.is_active(Self::CANCEL) {
            ModuleOutcome::Canceled
        } else if info.is_active(Self::SUCCESS) {
            ModuleOutcome::Success
        } else {
            return;
        };
        match info.module_instance() {
            Some(instance) => info.context().modules.borrow_mut().finish(instance, outcome),
            None => log::warn!("[flow] '{}' is not inside a module instance", info.node_name()),
        }
    }
}

/// Creates call nodes for one module.
pub struct ModuleCallFactory {
    module: String,
}

impl ModuleCallFactory {
    pub fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
        }
    }
}

impl NodeFactory for ModuleCallFactory {
    fn create(&self, ctx: &NodeCreateContext) -> Option<Box<dyn FlowNode>> {
        Some(Box::new(ModuleCallNode {
            module: self.module.clone(),
            board: ctx.graph.modules.clone(),
            running: None,
        }))
    }

    fn allow_overriding(&self) -> bool {
        true
    }
}

/// Starts a module instance and reports how it ended.
///
/// An instance outlives its caller only until the next manager update: uninitializing or
/// dropping the call node abandons it.
struct ModuleCallNode {
    module: String,
    board: SharedModuleBoard,
    running: Option<ModuleInstanceId>,
}

impl ModuleCallNode {
    const CALL: PortId = PortId(0);
    const CANCEL: PortId = PortId(1);
    const DONE: PortId = PortId(0);
    const CANCELED: PortId = PortId(1);

    fn abandon(&mut self) {
        let Some(instance) = self.running.take() else {
            return;
        };
        match self.board.try_borrow_mut() {
            Ok(mut board) => board.abandon(instance),
            Err(_) => log::warn!("[flow] module instance {instance} could not be abandoned"),
        }
    }
}

impl Drop for ModuleCallNode {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl FlowNode for ModuleCallNode {
    fn config(&self) -> NodeConfig {
        NodeConfig::new()
            .input(InputPortConfig::void("Call"))
            .input(InputPortConfig::void("Cancel"))
            .output(OutputPortConfig::void("Done"))
            .output(OutputPortConfig::void("Canceled"))
            .describe(format!("Runs module '{}'", self.module))
            .category(NodeCategory::Approved)
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        match event {
            FlowEvent::Activate => {
                if info.is_active(Self::CALL) && self.running.is_none() {
                    let instance = self.board.borrow_mut().request_start(&self.module);
                    self.running = Some(instance);
                    info.set_regularly_updated(true);
                }
                if info.is_active(Self::CANCEL) {
                    if let Some(instance) = self.running {
                        self.board
                            .borrow_mut()
                            .finish(instance, ModuleOutcome::Canceled);
                    }
                }
            }
            FlowEvent::Uninitialize => self.abandon(),
            FlowEvent::Update => {
                let Some(instance) = self.running else {
                    info.set_regularly_updated(false);
                    return;
                };
                let result = self.board.borrow_mut().take_result(instance);
                if let Some(outcome) = result {
                    self.running = None;
                    info.set_regularly_updated(false);
                    let port = match outcome {
                        ModuleOutcome::Success => Self::DONE,
                        ModuleOutcome::Canceled => Self::CANCELED,
                    };
                    info.activate_output(port, Value::Void);
                }
            }
            _ => {}
        }
    }
}

//! Factories create node instances of one registered type.

use crate::{
    graph::ActivationInfo,
    model::{NodeConfig, Value},
    node::{FlowEvent, FlowNode, NodeCreateContext, NodeSerializer},
};
use std::cell::RefCell;
use std::rc::Rc;

pub trait NodeFactory {
    /// Creates a node instance, or `None` when the node cannot be built in this context.
    fn create(&self, ctx: &NodeCreateContext) -> Option<Box<dyn FlowNode>>;

    /// Whether this factory may replace an already registered type of the same name.
    fn allow_overriding(&self) -> bool {
        false
    }
}

/// A native node class constructed from a plain function.
pub struct NativeNodeFactory {
    create: fn() -> Box<dyn FlowNode>,
    allow_overriding: bool,
}

impl NativeNodeFactory {
    pub fn new(create: fn() -> Box<dyn FlowNode>) -> Self {
        Self {
            create,
            allow_overriding: false,
        }
    }

    pub fn overriding(mut self) -> Self {
        self.allow_overriding = true;
        self
    }
}

impl NodeFactory for NativeNodeFactory {
    fn create(&self, _ctx: &NodeCreateContext) -> Option<Box<dyn FlowNode>> {
        Some((self.create)())
    }

    fn allow_overriding(&self) -> bool {
        self.allow_overriding
    }
}

/// Factory backed by a closure, for host code that needs captured state.
pub struct FnNodeFactory<F>(F);

impl<F> FnNodeFactory<F>
where
    F: Fn(&NodeCreateContext) -> Option<Box<dyn FlowNode>>,
{
    pub fn new(create: F) -> Self {
        Self(create)
    }
}

impl<F> NodeFactory for FnNodeFactory<F>
where
    F: Fn(&NodeCreateContext) -> Option<Box<dyn FlowNode>>,
{
    fn create(&self, ctx: &NodeCreateContext) -> Option<Box<dyn FlowNode>> {
        (self.0)(ctx)
    }
}

/// Every created node delegates to one shared instance.
pub struct SingletonNodeFactory {
    instance: Rc<RefCell<Box<dyn FlowNode>>>,
}

impl SingletonNodeFactory {
    pub fn new(node: Box<dyn FlowNode>) -> Self {
        Self {
            instance: Rc::new(RefCell::new(node)),
        }
    }
}

impl NodeFactory for SingletonNodeFactory {
    fn create(&self, _ctx: &NodeCreateContext) -> Option<Box<dyn FlowNode>> {
        Some(Box::new(SharedNode(self.instance.clone())))
    }
}

struct SharedNode(Rc<RefCell<Box<dyn FlowNode>>>);

impl FlowNode for SharedNode {
    fn config(&self) -> NodeConfig {
        match self.0.try_borrow() {
            Ok(node) => node.config(),
            Err(_) => NodeConfig::default(),
        }
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        // Re-entrant activation of the same singleton is dropped.
        match self.0.try_borrow_mut() {
            Ok(mut node) => node.process_event(event, info),
            Err(_) => log::warn!("[flow] singleton node re-entered during {event:?}, ignored"),
        }
    }

    fn serialize(&mut self, ser: &mut NodeSerializer) {
        if let Ok(mut node) = self.0.try_borrow_mut() {
            node.serialize(ser);
        }
    }

    fn on_entity_event(&mut self, event: &str, value: &Value, info: &mut ActivationInfo) {
        if let Ok(mut node) = self.0.try_borrow_mut() {
            node.on_entity_event(event, value, info);
        }
    }
}

/// Factory of the reserved id 0. Never creates anything.
pub struct InvalidNodeFactory;

impl NodeFactory for InvalidNodeFactory {
    fn create(&self, _ctx: &NodeCreateContext) -> Option<Box<dyn FlowNode>> {
        None
    }
}

//! Built-in native node classes.
//!
//! To add a native node:
//! 1. Create a file in this folder implementing [`FlowNode`] for the node.
//! 2. Add a [`NativeNodeClass`] entry for it to [`native_node_classes`].

pub mod debug;
pub mod game;
pub mod logic;
pub mod math;
pub mod module;
pub mod time;
pub mod variable;

pub use debug::*;
pub use game::*;
pub use logic::*;
pub use math::*;
pub use time::*;
pub use variable::*;

use crate::node::FlowNode;

/// Most names a native class may register under besides its primary one.
pub const MAX_ALIASES: usize = 2;

/// A native node class: primary name, aliases and constructor.
#[derive(Clone)]
pub struct NativeNodeClass {
    pub name: String,
    pub aliases: Vec<String>,
    pub create: fn() -> Box<dyn FlowNode>,
}

impl NativeNodeClass {
    pub fn new(name: impl Into<String>, create: fn() -> Box<dyn FlowNode>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            create,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        if self.aliases.len() < MAX_ALIASES {
            self.aliases.push(alias);
        } else {
            log::warn!("[flow] '{}' already has {MAX_ALIASES} aliases, ignoring '{alias}'", self.name);
        }
        self
    }

    /// Primary name followed by aliases.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// The native catalog registered by every registry rebuild.
pub fn native_node_classes() -> Vec<NativeNodeClass> {
    vec![
        // Math
        NativeNodeClass::new("Math:Add", AddNode::boxed).alias("Math:Sum"),
        NativeNodeClass::new("Math:Multiply", MultiplyNode::boxed).alias("Math:Mul"),
        // Logic
        NativeNodeClass::new("Logic:Any", AnyNode::boxed),
        NativeNodeClass::new("Logic:Gate", GateNode::boxed),
        // Time
        NativeNodeClass::new("Time:Delay", DelayNode::boxed),
        // Variables
        NativeNodeClass::new("Variable:Get", VariableGetNode::boxed),
        NativeNodeClass::new("Variable:Set", VariableSetNode::boxed),
    ]
}

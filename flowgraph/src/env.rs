//! Host services consumed by the flow system. Everything the engine would otherwise reach
//! through globals is injected here at construction.

use crate::model::{EntityId, InputPortConfig, OutputPortConfig, Value};
use std::cell::Cell;
use std::rc::Rc;

/// Flow-visible description of an entity class.
#[derive(Debug, Clone, Default)]
pub struct EntityClassInfo {
    pub name: String,
    /// Events the class accepts.
    pub inputs: Vec<InputPortConfig>,
    /// Events the class raises.
    pub outputs: Vec<OutputPortConfig>,
}

impl EntityClassInfo {
    pub fn has_event_ports(&self) -> bool {
        !self.inputs.is_empty() || !self.outputs.is_empty()
    }
}

pub trait EntitySystem {
    fn entity_classes(&self) -> Vec<EntityClassInfo>;

    fn entity_exists(&self, id: EntityId) -> bool;

    /// Delivers a flow input event to an entity.
    fn send_event(&self, id: EntityId, event: &str, value: &Value);

    /// Entity that should receive activations addressed to `id`, when it acts as a proxy.
    fn forwarding_target(&self, _id: EntityId) -> Option<EntityId> {
        None
    }
}

pub trait Clock {
    /// Current game time in seconds.
    fn now(&self) -> f64;
}

/// Sink for gameplay analytics events.
pub trait EventTracker {
    fn track(&self, event: &str, value: &Value);
}

#[derive(Debug, Default)]
pub struct NullEntitySystem;

impl EntitySystem for NullEntitySystem {
    fn entity_classes(&self) -> Vec<EntityClassInfo> {
        Vec::new()
    }

    fn entity_exists(&self, _id: EntityId) -> bool {
        false
    }

    fn send_event(&self, id: EntityId, event: &str, _value: &Value) {
        log::debug!("[flow] dropping event '{event}' for entity {}: no entity system", id.0);
    }
}

/// Clock advanced explicitly by the host once per frame.
#[derive(Debug, Default)]
pub struct FrameClock {
    time: Cell<f64>,
}

impl FrameClock {
    pub fn advance(&self, dt: f64) {
        self.time.set(self.time.get() + dt);
    }
}

impl Clock for FrameClock {
    fn now(&self) -> f64 {
        self.time.get()
    }
}

#[derive(Debug, Default)]
pub struct LogEventTracker;

impl EventTracker for LogEventTracker {
    fn track(&self, event: &str, value: &Value) {
        log::info!("[flow] track event '{event}' = {value}");
    }
}

#[derive(Clone)]
pub struct Environment {
    pub entities: Rc<dyn EntitySystem>,
    pub clock: Rc<dyn Clock>,
    pub tracker: Rc<dyn EventTracker>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            entities: Rc::new(NullEntitySystem),
            clock: Rc::new(FrameClock::default()),
            tracker: Rc::new(LogEventTracker),
        }
    }
}

impl Environment {
    pub fn with_entities(mut self, entities: Rc<dyn EntitySystem>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tracker(mut self, tracker: Rc<dyn EventTracker>) -> Self {
        self.tracker = tracker;
        self
    }
}

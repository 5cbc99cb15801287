//! Debug observers attached to the system or to a single graph.

use crate::{
    model::{FlowAddress, GraphId, NodeId, Value},
    node::FlowEvent,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Receives update brackets and dataflow notifications while inspecting is enabled.
///
/// `pre_update(None)`/`post_update(None)` bracket a whole system pass; `Some(id)` brackets the
/// update of one graph.
pub trait FlowInspector {
    fn pre_update(&self, graph: Option<GraphId>);

    fn post_update(&self, graph: Option<GraphId>);

    fn notify_flow(&self, graph: GraphId, from: FlowAddress, to: FlowAddress, value: &Value);

    fn notify_process_event(&self, _graph: GraphId, _node: NodeId, _event: FlowEvent) {}
}

/// System-wide inspector list and the inspecting switch, shared by every graph of a system.
#[derive(Clone, Default)]
pub struct InspectorHub {
    enabled: Rc<Cell<bool>>,
    system: Rc<RefCell<Vec<Rc<dyn FlowInspector>>>>,
}

impl InspectorHub {
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub fn register(&self, inspector: Rc<dyn FlowInspector>) {
        let mut system = self.system.borrow_mut();
        if !system.iter().any(|i| Rc::ptr_eq(i, &inspector)) {
            system.push(inspector);
        }
    }

    pub fn unregister(&self, inspector: &Rc<dyn FlowInspector>) -> bool {
        let mut system = self.system.borrow_mut();
        let before = system.len();
        system.retain(|i| !Rc::ptr_eq(i, inspector));
        system.len() != before
    }

    /// Snapshot of the system inspectors. Inspectors may register others while being notified.
    pub fn system_inspectors(&self) -> Vec<Rc<dyn FlowInspector>> {
        self.system.borrow().clone()
    }
}

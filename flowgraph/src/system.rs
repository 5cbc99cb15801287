//! The flow system: owns the registry and the graph list, and drives the per-frame update.

use crate::{
    config::FlowSystemConfig,
    definition::GraphDefinition,
    env::Environment,
    error::DefinitionError,
    graph::{FlowGraph, GraphContext},
    inspector::FlowInspector,
    model::{EntityId, GraphId, Value},
    module_manager::ModuleManager,
    nodes::NativeNodeClass,
    pipeline::{ExternalNodeProvider, RegistrationReport},
    registry::{SharedRegistry, TypeRegistry},
};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub type SharedGraph = Rc<RefCell<FlowGraph>>;

pub struct FlowSystem {
    pub(crate) config: FlowSystemConfig,
    pub(crate) ctx: GraphContext,
    /// Graphs are owned by their creators; dropped ones are pruned on update.
    graphs: Vec<Weak<RefCell<FlowGraph>>>,
    next_graph_id: u32,
    single_step: bool,
    step_requested: bool,
    forwarding_dirty: bool,
    pub(crate) natives: Vec<NativeNodeClass>,
    pub(crate) providers: Vec<Rc<dyn ExternalNodeProvider>>,
    pub(crate) modules: ModuleManager,
    pub(crate) last_report: Option<RegistrationReport>,
}

impl FlowSystem {
    pub fn new(config: FlowSystemConfig, env: Environment) -> Self {
        let ctx = GraphContext::new(TypeRegistry::shared(), env);
        ctx.inspectors.set_enabled(config.inspecting);
        let modules = ModuleManager::new(ctx.modules.clone());
        Self {
            config,
            ctx,
            graphs: Vec::new(),
            next_graph_id: 1,
            single_step: false,
            step_requested: false,
            forwarding_dirty: false,
            natives: Vec::new(),
            providers: Vec::new(),
            modules,
            last_report: None,
        }
    }

    pub fn config(&self) -> &FlowSystemConfig {
        &self.config
    }

    pub fn context(&self) -> &GraphContext {
        &self.ctx
    }

    pub fn registry(&self) -> SharedRegistry {
        self.ctx.registry.clone()
    }

    pub fn modules(&self) -> &ModuleManager {
        &self.modules
    }

    /// Report of the most recent registry rebuild.
    pub fn last_report(&self) -> Option<&RegistrationReport> {
        self.last_report.as_ref()
    }

    // ---- graphs ----

    pub fn create_graph(&mut self) -> SharedGraph {
        let id = GraphId(self.next_graph_id);
        self.next_graph_id += 1;
        let graph = Rc::new(RefCell::new(FlowGraph::new(self.ctx.clone(), id)));
        self.graphs.push(Rc::downgrade(&graph));
        log::debug!("[flow] created graph {id}");
        graph
    }

    /// Creates a graph and fills it from a definition.
    pub fn load_graph(&mut self, definition: &GraphDefinition) -> Result<SharedGraph, DefinitionError> {
        let graph = self.create_graph();
        {
            let mut graph = graph.borrow_mut();
            graph.set_name(definition.name.clone());
            definition.instantiate(&mut graph)?;
        }
        Ok(graph)
    }

    /// Number of graphs still alive.
    pub fn graph_count(&self) -> usize {
        self.graphs.iter().filter(|g| g.strong_count() > 0).count()
    }

    fn live_graphs(&mut self) -> Vec<SharedGraph> {
        self.graphs.retain(|g| g.strong_count() > 0);
        self.graphs.iter().filter_map(Weak::upgrade).collect()
    }

    // ---- update ----

    pub fn set_updates_enabled(&mut self, enabled: bool) {
        self.config.updates_enabled = enabled;
    }

    pub fn set_single_step(&mut self, single_step: bool) {
        self.single_step = single_step;
        self.step_requested = false;
    }

    pub fn is_single_step(&self) -> bool {
        self.single_step
    }

    /// Lets the next update run while in single-step mode.
    pub fn step(&mut self) {
        self.step_requested = true;
    }

    pub fn update(&mut self) {
        if !self.config.updates_enabled {
            return;
        }

        let inspecting = self.ctx.inspectors.is_enabled();
        let system = if inspecting {
            self.ctx.inspectors.system_inspectors()
        } else {
            Vec::new()
        };
        for inspector in &system {
            inspector.pre_update(None);
        }

        let graphs = self.live_graphs();
        if self.forwarding_dirty {
            self.forwarding_dirty = false;
            for graph in &graphs {
                graph.borrow_mut().update_forwardings();
            }
        }

        let run = !self.single_step || std::mem::take(&mut self.step_requested);
        if run {
            for graph in &graphs {
                update_graph(graph, &system, inspecting);
            }
            self.modules.update(&self.ctx);
        }

        for inspector in &system {
            inspector.post_update(None);
        }
    }

    // ---- entities ----

    pub fn on_entity_spawned(&mut self, entity: EntityId) {
        log::debug!("[flow] entity {} spawned", entity.0);
        self.forwarding_dirty = true;
    }

    pub fn on_entity_ai_changed(&mut self, entity: EntityId) {
        log::debug!("[flow] entity {} changed ai", entity.0);
        self.forwarding_dirty = true;
    }

    /// Routes an entity-raised event to every node targeting that entity. Returns the number
    /// of nodes reached.
    pub fn dispatch_entity_event(&mut self, entity: EntityId, event: &str, value: &Value) -> usize {
        self.live_graphs()
            .iter()
            .map(|graph| graph.borrow_mut().dispatch_entity_event(entity, event, value))
            .sum()
    }

    // ---- inspection ----

    pub fn register_inspector(&self, inspector: Rc<dyn FlowInspector>) {
        self.ctx.inspectors.register(inspector);
    }

    pub fn unregister_inspector(&self, inspector: &Rc<dyn FlowInspector>) -> bool {
        self.ctx.inspectors.unregister(inspector)
    }

    pub fn set_inspecting(&self, inspecting: bool) {
        self.ctx.inspectors.set_enabled(inspecting);
    }

    pub fn is_inspecting(&self) -> bool {
        self.ctx.inspectors.is_enabled()
    }

    // ---- registration inputs ----

    /// Adds a host native class. It is registered by the next registry rebuild.
    pub fn add_native_node_class(&mut self, class: NativeNodeClass) {
        self.natives.push(class);
    }

    pub fn register_external_provider(&mut self, provider: Rc<dyn ExternalNodeProvider>) {
        self.providers.push(provider);
    }
}

fn update_graph(graph: &SharedGraph, system: &[Rc<dyn FlowInspector>], inspecting: bool) {
    if !inspecting {
        graph.borrow_mut().update();
        return;
    }

    let (id, local) = {
        let graph = graph.borrow();
        (graph.id(), graph.inspectors().to_vec())
    };
    for inspector in system.iter().chain(&local) {
        inspector.pre_update(Some(id));
    }
    graph.borrow_mut().update();
    for inspector in system.iter().chain(&local) {
        inspector.post_update(Some(id));
    }
}

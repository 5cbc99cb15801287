//! Flow graph: node instances, port links and the activation loop.

use crate::{
    env::Environment,
    error::GraphError,
    inspector::{FlowInspector, InspectorHub},
    model::{
        DataType, EntityId, FlowAddress, GraphId, NodeConfig, NodeId, NodeTypeId, PortId, Value,
    },
    module_manager::{ModuleBoard, ModuleInstanceId, SharedModuleBoard},
    node::{FlowEvent, FlowNode, NodeCreateContext, NodeSerializer},
    registry::{SharedRegistry, TypeRegistry},
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

/// Activation passes per update before the remaining activations are deferred to the next tick.
pub const MAX_LOOPS: usize = 256;

static VOID: Value = Value::Void;

/// Services shared by every graph of one flow system.
#[derive(Clone)]
pub struct GraphContext {
    pub registry: SharedRegistry,
    pub env: Environment,
    pub inspectors: InspectorHub,
    pub modules: SharedModuleBoard,
}

impl GraphContext {
    pub fn new(registry: SharedRegistry, env: Environment) -> Self {
        Self {
            registry,
            env,
            inspectors: InspectorHub::default(),
            modules: Rc::new(RefCell::new(ModuleBoard::default())),
        }
    }
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new(TypeRegistry::shared(), Environment::default())
    }
}

/// Lets the host veto or post-process node creation.
pub trait FlowGraphHook {
    fn create_node(&self, _graph: GraphId, _node: NodeId, _type_name: &str) -> bool {
        true
    }

    /// Returning `false` cancels a node that was already built.
    fn created_node(&self, _graph: GraphId, _node: NodeId, _type_name: &str) -> bool {
        true
    }

    fn cancel_created_node(&self, _graph: GraphId, _node: NodeId, _type_name: &str) {}
}

/// Sees every value travelling along a link, whether or not inspecting is enabled.
pub trait FlowActivationListener {
    /// Returning `true` pauses the graph: the rest of the activation queue waits for the next
    /// update.
    fn on_node_activation(&self, graph: GraphId, from: FlowAddress, to: FlowAddress, value: &Value) -> bool;
}

/// A graph-scoped variable. Its value resets to the type default whenever the graph initializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphToken {
    pub name: String,
    pub data_type: DataType,
}

/// Number of entities a graph can be bound to.
pub const GRAPH_ENTITY_SLOTS: usize = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Edge {
    from: FlowAddress,
    to: FlowAddress,
}

struct NodeData {
    name: String,
    type_id: NodeTypeId,
    /// Taken out while the node is processing an event.
    node: Option<Box<dyn FlowNode>>,
    config: NodeConfig,
    inputs: Vec<Value>,
    active: Vec<bool>,
    queued: bool,
    final_requested: bool,
    entity: EntityId,
    /// `entity`, or the entity it forwards to.
    target: EntityId,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub regularly_updated: usize,
    pub pending_activations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub enabled: bool,
    pub active: bool,
    #[serde(default)]
    pub tokens: BTreeMap<String, Value>,
    pub nodes: Vec<NodeState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: NodeId,
    pub name: String,
    pub entity: EntityId,
    pub inputs: Vec<Value>,
    pub data: BTreeMap<String, Value>,
}

pub struct FlowGraph {
    id: GraphId,
    name: String,
    ctx: GraphContext,
    slots: Vec<Option<NodeData>>,
    free_ids: Vec<NodeId>,
    names: BTreeMap<String, NodeId>,
    edges: Vec<Edge>,
    edges_sorted: bool,
    modified: VecDeque<NodeId>,
    finals: Vec<NodeId>,
    regular: BTreeSet<NodeId>,
    inspectors: Vec<Rc<dyn FlowInspector>>,
    hooks: Vec<Rc<dyn FlowGraphHook>>,
    listeners: Vec<Rc<dyn FlowActivationListener>>,
    pause_requested: bool,
    tokens: Vec<GraphToken>,
    token_values: BTreeMap<String, Value>,
    graph_entities: [EntityId; GRAPH_ENTITY_SLOTS],
    enabled: bool,
    active: bool,
    suspended: bool,
    needs_initialize: bool,
    needs_update: bool,
    in_update: bool,
    module_instance: Option<ModuleInstanceId>,
    taps: Vec<(FlowAddress, usize)>,
    tapped: Vec<(usize, Value)>,
}

impl FlowGraph {
    pub fn new(ctx: GraphContext, id: GraphId) -> Self {
        Self {
            id,
            name: String::new(),
            ctx,
            slots: Vec::new(),
            free_ids: Vec::new(),
            names: BTreeMap::new(),
            edges: Vec::new(),
            edges_sorted: true,
            modified: VecDeque::new(),
            finals: Vec::new(),
            regular: BTreeSet::new(),
            inspectors: Vec::new(),
            hooks: Vec::new(),
            listeners: Vec::new(),
            pause_requested: false,
            tokens: Vec::new(),
            token_values: BTreeMap::new(),
            graph_entities: [EntityId::INVALID; GRAPH_ENTITY_SLOTS],
            enabled: true,
            active: true,
            suspended: false,
            needs_initialize: true,
            needs_update: false,
            in_update: false,
            module_instance: None,
            taps: Vec::new(),
            tapped: Vec::new(),
        }
    }

    /// A graph owned by a node or a module instance rather than registered with the system.
    pub fn detached(ctx: GraphContext) -> Self {
        Self::new(ctx, GraphId::DETACHED)
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn context(&self) -> &GraphContext {
        &self.ctx
    }

    pub fn module_instance(&self) -> Option<ModuleInstanceId> {
        self.module_instance
    }

    pub fn set_module_instance(&mut self, instance: Option<ModuleInstanceId>) {
        self.module_instance = instance;
    }

    // ---- nodes ----

    pub fn create_node(&mut self, type_name: &str, name: &str) -> Result<NodeId, GraphError> {
        let type_id = self.ctx.registry.borrow().type_id(type_name);
        if !type_id.is_valid() {
            return Err(GraphError::UnknownType(type_name.to_string()));
        }
        self.create_node_of_type(type_id, name)
    }

    pub fn create_node_of_type(
        &mut self,
        type_id: NodeTypeId,
        name: &str,
    ) -> Result<NodeId, GraphError> {
        // The registry borrow ends before the factory runs; composite factories read it too.
        let (type_name, factory) = {
            let registry = self.ctx.registry.borrow();
            (registry.type_name(type_id).to_string(), registry.factory(type_id))
        };
        let factory = factory.ok_or_else(|| GraphError::UnknownType(format!("#{type_id}")))?;

        let id = self.next_node_id().ok_or(GraphError::OutOfIds)?;
        let name = if name.is_empty() {
            id.0.to_string()
        } else {
            name.to_string()
        };
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateName(name));
        }

        let hooks = self.hooks.clone();
        if !hooks.iter().all(|h| h.create_node(self.id, id, &type_name)) {
            return Err(GraphError::Vetoed);
        }

        let node = factory
            .create(&NodeCreateContext {
                graph: &self.ctx,
                graph_id: self.id,
                node_id: id,
            })
            .ok_or_else(|| GraphError::FactoryFailed(type_name.clone()))?;
        let config = node.config();
        if !config.ports_addressable() {
            return Err(GraphError::TooManyPorts(type_name));
        }

        self.claim_node_id(id);
        self.place_node(id, name, type_id, node, config);

        if !hooks.iter().all(|h| h.created_node(self.id, id, &type_name)) {
            for hook in &hooks {
                hook.cancel_created_node(self.id, id, &type_name);
            }
            self.remove_node(id)?;
            return Err(GraphError::Vetoed);
        }
        Ok(id)
    }

    fn next_node_id(&self) -> Option<NodeId> {
        match self.free_ids.last() {
            Some(id) => Some(*id),
            None if self.slots.len() < NodeId::INVALID.index() => Some(NodeId(self.slots.len() as u16)),
            None => None,
        }
    }

    fn claim_node_id(&mut self, id: NodeId) {
        if self.free_ids.last() == Some(&id) {
            self.free_ids.pop();
        } else if self.slots.len() <= id.index() {
            self.slots.resize_with(id.index() + 1, || None);
        }
    }

    fn place_node(
        &mut self,
        id: NodeId,
        name: String,
        type_id: NodeTypeId,
        node: Box<dyn FlowNode>,
        config: NodeConfig,
    ) {
        let inputs = config.inputs.iter().map(|p| p.default.clone()).collect();
        let active = vec![false; config.inputs.len()];
        self.names.insert(name.clone(), id);
        self.slots[id.index()] = Some(NodeData {
            name,
            type_id,
            node: Some(node),
            config,
            inputs,
            active,
            queued: false,
            final_requested: false,
            entity: EntityId::INVALID,
            target: EntityId::INVALID,
        });
    }

    /// Removes a node and every link touching it. Linked neighbours receive disconnect events.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        if self.slot(id).is_none() {
            return Err(GraphError::UnknownNode(id));
        }

        let (touching, kept): (Vec<Edge>, Vec<Edge>) = self
            .edges
            .iter()
            .partition(|e| e.from.node == id || e.to.node == id);
        self.edges = kept;
        for edge in touching {
            if edge.from.node != id {
                self.send(edge.from.node, FlowEvent::DisconnectOutputPort, Some(edge.from.port));
            }
            if edge.to.node != id {
                self.send(edge.to.node, FlowEvent::DisconnectInputPort, Some(edge.to.port));
            }
        }

        self.regular.remove(&id);
        self.modified.retain(|n| *n != id);
        self.finals.retain(|n| *n != id);
        self.taps.retain(|(addr, _)| addr.node != id);
        if let Some(data) = self.slots.get_mut(id.index()).and_then(Option::take) {
            self.names.remove(&data.name);
            self.free_ids.push(id);
        }
        Ok(())
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| NodeId(i as u16))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.names.len()
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.slot(id).map(|d| d.name.as_str())
    }

    pub fn node_type(&self, id: NodeId) -> NodeTypeId {
        self.slot(id).map(|d| d.type_id).unwrap_or(NodeTypeId::INVALID)
    }

    pub fn node_config(&self, id: NodeId) -> Option<&NodeConfig> {
        self.slot(id).map(|d| &d.config)
    }

    fn slot(&self, id: NodeId) -> Option<&NodeData> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    // ---- links ----

    /// Links an output to an input. A reversed pair is swapped with a warning.
    pub fn link_nodes(&mut self, from: FlowAddress, to: FlowAddress) -> Result<(), GraphError> {
        let (from, to) = match (from.is_output, to.is_output) {
            (true, false) => (from, to),
            (false, true) => {
                log::warn!("[flow] {}: link {from:?} -> {to:?} is reversed, swapping", self.id);
                (to, from)
            }
            (true, true) => return Err(GraphError::SameDirection("output")),
            (false, false) => return Err(GraphError::SameDirection("input")),
        };
        if !self.is_valid_address(from) {
            return Err(GraphError::InvalidAddress(from));
        }
        if !self.is_valid_address(to) {
            return Err(GraphError::InvalidAddress(to));
        }

        let edge = Edge { from, to };
        if self.edges.contains(&edge) {
            return Ok(());
        }
        self.edges.push(edge);
        self.edges_sorted = false;

        self.send(from.node, FlowEvent::ConnectOutputPort, Some(from.port));
        self.send(to.node, FlowEvent::ConnectInputPort, Some(to.port));
        Ok(())
    }

    pub fn unlink_nodes(&mut self, from: FlowAddress, to: FlowAddress) -> bool {
        let before = self.edges.len();
        self.edges.retain(|e| !(e.from == from && e.to == to));
        if self.edges.len() == before {
            return false;
        }
        self.send(from.node, FlowEvent::DisconnectOutputPort, Some(from.port));
        self.send(to.node, FlowEvent::DisconnectInputPort, Some(to.port));
        true
    }

    pub fn is_valid_address(&self, addr: FlowAddress) -> bool {
        let Some(data) = self.slot(addr.node) else {
            return false;
        };
        if addr.is_output {
            addr.port.index() < data.config.outputs.len()
        } else {
            addr.port.index() < data.config.inputs.len()
        }
    }

    /// Resolves `"node:port"` against node names and port names.
    pub fn resolve_address(&self, text: &str, is_output: bool) -> Option<FlowAddress> {
        let (node, port) = text.rsplit_once(':')?;
        let id = self.find_node(node.trim())?;
        let config = &self.slot(id)?.config;
        let port = if is_output {
            config.output_port(port.trim())?
        } else {
            config.input_port(port.trim())?
        };
        Some(FlowAddress::new(id, port, is_output))
    }

    pub fn is_output_connected(&self, addr: FlowAddress) -> bool {
        self.edges.iter().any(|e| e.from == addr)
    }

    /// Outgoing links of every output, in sorted order.
    pub fn links(&mut self) -> Vec<(FlowAddress, FlowAddress)> {
        self.ensure_sorted();
        self.edges.iter().map(|e| (e.from, e.to)).collect()
    }

    fn ensure_sorted(&mut self) {
        if !self.edges_sorted {
            self.edges.sort();
            self.edges.dedup();
            self.edges_sorted = true;
        }
    }

    // ---- values and activation ----

    /// Stores a value on an input without activating it.
    pub fn set_input_value(&mut self, node: NodeId, port: PortId, value: Value) -> bool {
        let Some(data) = self.slot_mut(node) else {
            return false;
        };
        let Some(config) = data.config.inputs.get(port.index()) else {
            return false;
        };
        match value.convert(config.data_type) {
            Some(value) => {
                data.inputs[port.index()] = value;
                true
            }
            None => false,
        }
    }

    pub fn input_value(&self, node: NodeId, port: PortId) -> Option<&Value> {
        self.slot(node)?.inputs.get(port.index())
    }

    /// Activates an output (propagating along its links) or an input directly.
    pub fn activate_port(&mut self, addr: FlowAddress, value: Value) {
        if addr.is_output {
            self.activate_output(addr.node, addr.port, value);
        } else {
            self.deliver(addr, &value);
        }
    }

    fn activate_output(&mut self, node: NodeId, port: PortId, value: Value) {
        let from = FlowAddress::output(node, port);
        if !self.is_valid_address(from) {
            log::warn!("[flow] {}: node {} has no output {}", self.id, node.0, port.0);
            return;
        }

        self.ensure_sorted();
        let start = self.edges.partition_point(|e| e.from < from);
        let targets: Vec<FlowAddress> = self.edges[start..]
            .iter()
            .take_while(|e| e.from == from)
            .map(|e| e.to)
            .collect();

        if !targets.is_empty() && self.ctx.inspectors.is_enabled() {
            let inspectors = self.all_inspectors();
            for to in &targets {
                for inspector in &inspectors {
                    inspector.notify_flow(self.id, from, *to, &value);
                }
            }
        }

        if !self.listeners.is_empty() {
            let listeners = self.listeners.clone();
            for to in &targets {
                for listener in &listeners {
                    if listener.on_node_activation(self.id, from, *to, &value) {
                        self.pause_requested = true;
                    }
                }
            }
        }

        for to in targets {
            self.deliver(to, &value);
        }

        for (addr, slot) in &self.taps {
            if *addr == from {
                self.tapped.push((*slot, value.clone()));
            }
        }
    }

    fn deliver(&mut self, to: FlowAddress, value: &Value) {
        let Some(data) = self.slots.get_mut(to.node.index()).and_then(Option::as_mut) else {
            return;
        };
        let Some(port) = data.config.inputs.get(to.port.index()) else {
            return;
        };
        let Some(converted) = value.convert(port.data_type) else {
            log::debug!(
                "[flow] {}: cannot deliver {value:?} to '{}:{}'",
                self.id,
                data.name,
                port.name
            );
            return;
        };
        data.inputs[to.port.index()] = converted;
        data.active[to.port.index()] = true;
        if !data.queued {
            data.queued = true;
            self.modified.push_back(to.node);
        }
        self.needs_update = true;
    }

    pub fn set_regularly_updated(&mut self, node: NodeId, regularly: bool) {
        if regularly {
            if self.slot(node).is_some() {
                self.regular.insert(node);
                self.needs_update = true;
            }
        } else {
            self.regular.remove(&node);
        }
    }

    pub fn is_regularly_updated(&self, node: NodeId) -> bool {
        self.regular.contains(&node)
    }

    /// Queues `node` for one final activation at the end of the current pass.
    pub fn request_final_activation(&mut self, node: NodeId) {
        let Some(data) = self.slots.get_mut(node.index()).and_then(Option::as_mut) else {
            return;
        };
        if !data.final_requested {
            data.final_requested = true;
            self.finals.push(node);
        }
        self.needs_update = true;
    }

    // ---- entities ----

    pub fn set_entity_id(&mut self, node: NodeId, entity: EntityId) -> bool {
        let target = self.forward_target(entity);
        let Some(data) = self.slot_mut(node) else {
            return false;
        };
        data.entity = entity;
        data.target = target;
        self.send(node, FlowEvent::SetEntityId, None);
        true
    }

    /// The entity a node acts on, after forwarding.
    pub fn entity_id(&self, node: NodeId) -> EntityId {
        self.slot(node).map(|d| d.target).unwrap_or(EntityId::INVALID)
    }

    fn forward_target(&self, entity: EntityId) -> EntityId {
        let entity = match entity.graph_slot() {
            Some(slot) => self.graph_entities[slot],
            None => entity,
        };
        if !entity.is_valid() {
            return entity;
        }
        self.ctx
            .env
            .entities
            .forwarding_target(entity)
            .unwrap_or(entity)
    }

    /// Binds the graph to an entity. Nodes targeting the matching placeholder
    /// ([`EntityId::GRAPH1`], [`EntityId::GRAPH2`]) are retargeted.
    pub fn set_graph_entity(&mut self, entity: EntityId, index: usize) -> bool {
        let Some(slot) = self.graph_entities.get_mut(index) else {
            return false;
        };
        *slot = entity;
        self.update_forwardings();
        true
    }

    pub fn graph_entity(&self, index: usize) -> EntityId {
        self.graph_entities
            .get(index)
            .copied()
            .unwrap_or(EntityId::INVALID)
    }

    /// Recomputes forwarded entities; nodes whose target changed receive `SetEntityId`.
    pub fn update_forwardings(&mut self) -> usize {
        let mut changed = Vec::new();
        for id in self.node_ids() {
            let Some(entity) = self.slot(id).map(|d| d.entity) else {
                continue;
            };
            let target = self.forward_target(entity);
            if let Some(data) = self.slot_mut(id) {
                if data.target != target {
                    data.target = target;
                    changed.push(id);
                }
            }
        }
        for id in &changed {
            self.send(*id, FlowEvent::SetEntityId, None);
        }
        changed.len()
    }

    /// Hands an entity-raised event to every node targeting that entity.
    pub fn dispatch_entity_event(&mut self, entity: EntityId, event: &str, value: &Value) -> usize {
        let targets: Vec<NodeId> = self
            .node_ids()
            .into_iter()
            .filter(|id| self.slot(*id).map(|d| d.target == entity).unwrap_or(false))
            .collect();
        for id in &targets {
            self.with_node(*id, None, Vec::new(), |node, info| {
                node.on_entity_event(event, value, info)
            });
        }
        targets.len()
    }

    // ---- graph tokens ----

    /// Declares a graph token. Its value starts at the type default. Names are unique.
    pub fn add_graph_token(&mut self, token: GraphToken) -> bool {
        if self.tokens.iter().any(|t| t.name == token.name) {
            log::warn!("[flow] {}: graph token '{}' already exists", self.id, token.name);
            return false;
        }
        self.token_values
            .insert(token.name.clone(), Value::default_for(token.data_type));
        self.tokens.push(token);
        true
    }

    pub fn remove_graph_tokens(&mut self) {
        self.tokens.clear();
        self.token_values.clear();
    }

    pub fn graph_token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn graph_token(&self, index: usize) -> Option<&GraphToken> {
        self.tokens.get(index)
    }

    /// Name under which a token is known outside this graph.
    pub fn global_token_name(&self, token: &str) -> String {
        format!("GraphToken.Graph{}.{token}", self.id.0)
    }

    pub fn token_value(&self, name: &str) -> Option<&Value> {
        self.token_values.get(name)
    }

    /// Stores a token value converted to the token's type.
    pub fn set_token_value(&mut self, name: &str, value: &Value) -> bool {
        let Some(token) = self.tokens.iter().find(|t| t.name == name) else {
            return false;
        };
        match value.convert(token.data_type) {
            Some(value) => {
                self.token_values.insert(token.name.clone(), value);
                true
            }
            None => false,
        }
    }

    fn reset_graph_tokens(&mut self) {
        for token in &self.tokens {
            self.token_values
                .insert(token.name.clone(), Value::default_for(token.data_type));
        }
    }

    // ---- lifecycle ----

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        if active {
            self.needs_update = true;
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        if self.suspended == suspended {
            return;
        }
        self.suspended = suspended;
        let event = if suspended {
            FlowEvent::Suspend
        } else {
            FlowEvent::Resume
        };
        for id in self.node_ids() {
            self.send(id, event, None);
        }
    }

    pub fn needs_update(&self) -> bool {
        self.needs_initialize || self.needs_update
    }

    pub fn is_initialized(&self) -> bool {
        !self.needs_initialize
    }

    /// Resets graph tokens, then runs an `Initialize` pass over every node with all inputs
    /// flagged active. Outputs activated during the pass are delivered as `Initialize` too,
    /// followed by `FinalInitialize`.
    pub fn initialize(&mut self) {
        self.needs_initialize = false;
        self.reset_graph_tokens();
        let was_updating = std::mem::replace(&mut self.in_update, true);
        for id in self.node_ids() {
            let Some(data) = self.slot_mut(id) else {
                continue;
            };
            data.active.fill(true);
            if !data.queued {
                data.queued = true;
                self.modified.push_back(id);
            }
        }
        self.do_update(FlowEvent::Initialize);
        self.in_update = was_updating;
        self.needs_update = true;
    }

    /// Sends `Uninitialize` with all inputs flagged and drops pending work. The next update
    /// initializes again.
    pub fn uninitialize(&mut self) {
        for id in self.node_ids() {
            let Some(count) = self.slot(id).map(|d| d.inputs.len()) else {
                continue;
            };
            self.process(id, FlowEvent::Uninitialize, None, vec![true; count]);
        }
        self.modified.clear();
        self.finals.clear();
        self.regular.clear();
        for data in self.slots.iter_mut().flatten() {
            data.queued = false;
            data.final_requested = false;
            data.active.fill(false);
        }
        self.needs_initialize = true;
        self.needs_update = false;
    }

    pub fn update(&mut self) {
        if !self.enabled || !self.active || self.suspended || self.in_update {
            return;
        }
        if self.needs_initialize {
            self.initialize();
        }
        if !self.needs_update {
            return;
        }

        self.in_update = true;
        let regular: Vec<NodeId> = self.regular.iter().copied().collect();
        for id in regular {
            if self.regular.contains(&id) {
                self.send(id, FlowEvent::Update, None);
            }
        }
        self.do_update(FlowEvent::Activate);
        self.pause_requested = false;
        self.in_update = false;

        self.needs_update =
            !self.regular.is_empty() || !self.modified.is_empty() || !self.finals.is_empty();
    }

    fn do_update(&mut self, event: FlowEvent) {
        let mut loops = 0;
        while !self.modified.is_empty() {
            if loops == MAX_LOOPS {
                log::warn!(
                    "[flow] {}: activations did not settle after {MAX_LOOPS} loops, {} nodes deferred",
                    self.id,
                    self.modified.len()
                );
                if event == FlowEvent::Initialize {
                    self.drop_pending();
                }
                break;
            }
            loops += 1;

            let mut batch = std::mem::take(&mut self.modified);
            while let Some(id) = batch.pop_front() {
                let Some(data) = self.slot_mut(id) else {
                    continue;
                };
                data.queued = false;
                let active = data.active.clone();
                data.active.fill(false);
                self.process(id, event, None, active);

                if self.pause_requested {
                    // Unprocessed nodes go back ahead of anything queued since.
                    batch.append(&mut self.modified);
                    self.modified = batch;
                    self.pause_requested = false;
                    log::debug!(
                        "[flow] {}: paused by an activation listener, {} nodes waiting",
                        self.id,
                        self.modified.len()
                    );
                    return;
                }
            }
        }

        if let Some(final_event) = event.final_variant() {
            self.run_finals(final_event);
        }
    }

    fn drop_pending(&mut self) {
        for id in std::mem::take(&mut self.modified) {
            if let Some(data) = self.slot_mut(id) {
                data.queued = false;
                data.active.fill(false);
            }
        }
    }

    fn run_finals(&mut self, event: FlowEvent) {
        let finals = std::mem::take(&mut self.finals);
        for id in finals {
            let Some(data) = self.slot_mut(id) else {
                continue;
            };
            data.final_requested = false;
            self.process(id, event, None, Vec::new());
        }
    }

    fn send(&mut self, id: NodeId, event: FlowEvent, connect_port: Option<PortId>) {
        self.process(id, event, connect_port, Vec::new());
    }

    fn process(&mut self, id: NodeId, event: FlowEvent, connect_port: Option<PortId>, active: Vec<bool>) {
        if self.ctx.inspectors.is_enabled() {
            for inspector in self.all_inspectors() {
                inspector.notify_process_event(self.id, id, event);
            }
        }
        self.with_node(id, connect_port, active, |node, info| {
            node.process_event(event, info)
        });
    }

    fn with_node(
        &mut self,
        id: NodeId,
        connect_port: Option<PortId>,
        active: Vec<bool>,
        f: impl FnOnce(&mut dyn FlowNode, &mut ActivationInfo),
    ) -> bool {
        let Some(mut node) = self.slot_mut(id).and_then(|d| d.node.take()) else {
            return false;
        };
        {
            let mut info = ActivationInfo {
                graph: self,
                node: id,
                connect_port,
                active,
            };
            f(node.as_mut(), &mut info);
        }
        // The node may have removed itself while processing.
        if let Some(data) = self.slot_mut(id) {
            if data.node.is_none() {
                data.node = Some(node);
            }
        }
        true
    }

    // ---- inspection ----

    pub fn register_inspector(&mut self, inspector: Rc<dyn FlowInspector>) {
        if !self.inspectors.iter().any(|i| Rc::ptr_eq(i, &inspector)) {
            self.inspectors.push(inspector);
        }
    }

    pub fn unregister_inspector(&mut self, inspector: &Rc<dyn FlowInspector>) -> bool {
        let before = self.inspectors.len();
        self.inspectors.retain(|i| !Rc::ptr_eq(i, inspector));
        self.inspectors.len() != before
    }

    pub fn inspectors(&self) -> &[Rc<dyn FlowInspector>] {
        &self.inspectors
    }

    fn all_inspectors(&self) -> Vec<Rc<dyn FlowInspector>> {
        let mut all = self.ctx.inspectors.system_inspectors();
        all.extend(self.inspectors.iter().cloned());
        all
    }

    pub fn register_activation_listener(&mut self, listener: Rc<dyn FlowActivationListener>) {
        if !self.listeners.iter().any(|l| Rc::ptr_eq(l, &listener)) {
            self.listeners.push(listener);
        }
    }

    pub fn remove_activation_listener(&mut self, listener: &Rc<dyn FlowActivationListener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !Rc::ptr_eq(l, listener));
        self.listeners.len() != before
    }

    pub fn register_hook(&mut self, hook: Rc<dyn FlowGraphHook>) {
        self.hooks.push(hook);
    }

    pub fn unregister_hook(&mut self, hook: &Rc<dyn FlowGraphHook>) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|h| !Rc::ptr_eq(h, hook));
        self.hooks.len() != before
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.node_count(),
            edges: self.edges.len(),
            regularly_updated: self.regular.len(),
            pending_activations: self.modified.len(),
        }
    }

    // ---- output taps ----

    /// Records values leaving `addr` under `slot`, to be collected with [`Self::take_tapped`].
    pub fn tap_output(&mut self, addr: FlowAddress, slot: usize) {
        self.taps.push((addr, slot));
    }

    pub fn take_tapped(&mut self) -> Vec<(usize, Value)> {
        std::mem::take(&mut self.tapped)
    }

    // ---- copies and persistence ----

    /// Builds a fresh copy with the same node ids, names, input values and links.
    pub fn clone_graph(&self, id: GraphId) -> Result<FlowGraph, GraphError> {
        let mut graph = FlowGraph::new(self.ctx.clone(), id);
        graph.name = self.name.clone();
        graph.slots.resize_with(self.slots.len(), || None);
        graph.free_ids = self.free_ids.clone();

        for (index, data) in self.slots.iter().enumerate() {
            let Some(data) = data else {
                continue;
            };
            let node_id = NodeId(index as u16);
            let factory = self
                .ctx
                .registry
                .borrow()
                .factory(data.type_id)
                .ok_or_else(|| GraphError::UnknownType(format!("#{}", data.type_id)))?;
            let node = factory
                .create(&NodeCreateContext {
                    graph: &graph.ctx,
                    graph_id: id,
                    node_id,
                })
                .ok_or_else(|| GraphError::FactoryFailed(data.name.clone()))?;
            let config = node.config();
            graph.place_node(node_id, data.name.clone(), data.type_id, node, config);
            if let Some(copy) = graph.slot_mut(node_id) {
                for (value, original) in copy.inputs.iter_mut().zip(&data.inputs) {
                    *value = original.clone();
                }
                copy.entity = data.entity;
                copy.target = data.target;
            }
        }

        for edge in &self.edges {
            graph.link_nodes(edge.from, edge.to)?;
        }
        graph.taps = self.taps.clone();
        graph.tokens = self.tokens.clone();
        graph.reset_graph_tokens();
        graph.graph_entities = self.graph_entities;
        graph.enabled = self.enabled;
        graph.active = self.active;
        Ok(graph)
    }

    pub fn save_state(&mut self) -> GraphState {
        let mut nodes = Vec::new();
        for id in self.node_ids() {
            let mut ser = NodeSerializer::writer();
            let Some(data) = self.slot_mut(id) else {
                continue;
            };
            if let Some(node) = data.node.as_mut() {
                node.serialize(&mut ser);
            }
            nodes.push(NodeState {
                id,
                name: data.name.clone(),
                entity: data.entity,
                inputs: data.inputs.clone(),
                data: ser.into_values(),
            });
        }
        GraphState {
            enabled: self.enabled,
            active: self.active,
            tokens: self.token_values.clone(),
            nodes,
        }
    }

    /// Restores node inputs and private state, then sends `PostSerialize` to every node.
    pub fn restore_state(&mut self, state: &GraphState) {
        self.enabled = state.enabled;
        self.active = state.active;
        for (name, value) in &state.tokens {
            if !self.set_token_value(name, value) {
                log::warn!("[flow] {}: saved graph token '{name}' no longer applies", self.id);
            }
        }

        for saved in &state.nodes {
            let target = self.forward_target(saved.entity);
            let Some(data) = self.slot_mut(saved.id) else {
                log::warn!("[flow] saved node '{}' no longer exists", saved.name);
                continue;
            };
            if data.name != saved.name {
                log::warn!(
                    "[flow] saved node '{}' does not match '{}', skipped",
                    saved.name,
                    data.name
                );
                continue;
            }
            for ((value, port), restored) in data
                .inputs
                .iter_mut()
                .zip(&data.config.inputs)
                .zip(&saved.inputs)
            {
                if let Some(converted) = restored.convert(port.data_type) {
                    *value = converted;
                }
            }
            data.entity = saved.entity;
            data.target = target;
            let mut ser = NodeSerializer::reader(saved.data.clone());
            if let Some(node) = data.node.as_mut() {
                node.serialize(&mut ser);
            }
        }

        for id in self.node_ids() {
            self.send(id, FlowEvent::PostSerialize, None);
        }
    }
}

/// A node's view of its graph while it processes one event.
pub struct ActivationInfo<'a> {
    graph: &'a mut FlowGraph,
    node: NodeId,
    connect_port: Option<PortId>,
    active: Vec<bool>,
}

impl ActivationInfo<'_> {
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn node_name(&self) -> &str {
        self.graph.node_name(self.node).unwrap_or("")
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph.id
    }

    /// Port of a connect/disconnect event.
    pub fn connect_port(&self) -> Option<PortId> {
        self.connect_port
    }

    pub fn entity_id(&self) -> EntityId {
        self.graph.entity_id(self.node)
    }

    pub fn input(&self, port: PortId) -> &Value {
        self.graph.input_value(self.node, port).unwrap_or(&VOID)
    }

    pub fn input_as(&self, port: PortId, data_type: DataType) -> Value {
        self.input(port)
            .convert(data_type)
            .unwrap_or_else(|| Value::default_for(data_type))
    }

    pub fn input_float(&self, port: PortId) -> f32 {
        match self.input_as(port, DataType::Float) {
            Value::Float(v) => v,
            _ => 0.0,
        }
    }

    pub fn input_int(&self, port: PortId) -> i32 {
        match self.input_as(port, DataType::Int) {
            Value::Int(v) => v,
            _ => 0,
        }
    }

    pub fn input_bool(&self, port: PortId) -> bool {
        matches!(self.input_as(port, DataType::Bool), Value::Bool(true))
    }

    pub fn input_string(&self, port: PortId) -> String {
        self.input(port).to_string()
    }

    pub fn input_count(&self) -> usize {
        self.graph
            .slot(self.node)
            .map(|d| d.inputs.len())
            .unwrap_or(0)
    }

    pub fn is_active(&self, port: PortId) -> bool {
        self.active.get(port.index()).copied().unwrap_or(false)
    }

    pub fn any_active(&self) -> bool {
        self.active.iter().any(|a| *a)
    }

    pub fn active_ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, a)| **a)
            .map(|(i, _)| PortId(i as u8))
    }

    pub fn activate_output(&mut self, port: PortId, value: Value) {
        self.graph.activate_output(self.node, port, value);
    }

    pub fn set_regularly_updated(&mut self, regularly: bool) {
        self.graph.set_regularly_updated(self.node, regularly);
    }

    pub fn request_final_activation(&mut self) {
        self.graph.request_final_activation(self.node);
    }

    pub fn now(&self) -> f64 {
        self.graph.ctx.env.clock.now()
    }

    pub fn environment(&self) -> &Environment {
        &self.graph.ctx.env
    }

    pub fn context(&self) -> &GraphContext {
        &self.graph.ctx
    }

    pub fn module_instance(&self) -> Option<ModuleInstanceId> {
        self.graph.module_instance
    }

    pub fn graph_entity(&self, index: usize) -> EntityId {
        self.graph.graph_entity(index)
    }

    pub fn token_value(&self, name: &str) -> Option<&Value> {
        self.graph.token_value(name)
    }

    pub fn set_token_value(&mut self, name: &str, value: &Value) -> bool {
        self.graph.set_token_value(name, value)
    }

    pub fn graph(&mut self) -> &mut FlowGraph {
        self.graph
    }
}

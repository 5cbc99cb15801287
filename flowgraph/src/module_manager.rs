//! Reusable subgraphs ("modules") started from other graphs.

use crate::{
    definition::GraphDefinition,
    factory::{NativeNodeFactory, NodeFactory},
    graph::{FlowGraph, GraphContext},
    model::NodeTypeId,
    nodes::module::{ModuleCallFactory, ModuleEndNode, ModuleStartNode},
};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::rc::Rc;

pub type ModuleInstanceId = u64;

pub type SharedModuleBoard = Rc<RefCell<ModuleBoard>>;

pub const MODULE_START: &str = "Module:Start";
pub const MODULE_END: &str = "Module:End";
pub const MODULE_CALL_PREFIX: &str = "Module:Call_";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    Success,
    Canceled,
}

/// Mailbox between module nodes and the manager. Borrowed only for single calls.
#[derive(Debug, Default)]
pub struct ModuleBoard {
    next_instance: ModuleInstanceId,
    starts: Vec<(ModuleInstanceId, String)>,
    finished: BTreeMap<ModuleInstanceId, ModuleOutcome>,
    results: BTreeMap<ModuleInstanceId, ModuleOutcome>,
    /// Instances whose caller is gone; their outcome is discarded on collection.
    abandoned: BTreeSet<ModuleInstanceId>,
}

impl ModuleBoard {
    /// Queues a new instance of `module`; it starts on the next manager update.
    pub fn request_start(&mut self, module: &str) -> ModuleInstanceId {
        self.next_instance += 1;
        self.starts.push((self.next_instance, module.to_string()));
        self.next_instance
    }

    /// Marks an instance complete. The first outcome wins.
    pub fn finish(&mut self, instance: ModuleInstanceId, outcome: ModuleOutcome) {
        self.finished.entry(instance).or_insert(outcome);
    }

    /// Outcome of a collected instance, handed out once.
    pub fn take_result(&mut self, instance: ModuleInstanceId) -> Option<ModuleOutcome> {
        self.results.remove(&instance)
    }

    /// Forgets an instance whose caller no longer waits for it. A running instance is
    /// canceled; an uncollected result is dropped.
    pub fn abandon(&mut self, instance: ModuleInstanceId) {
        if self.results.remove(&instance).is_some() {
            return;
        }
        self.starts.retain(|(id, _)| *id != instance);
        self.finish(instance, ModuleOutcome::Canceled);
        self.abandoned.insert(instance);
    }

    /// Results waiting for their call node.
    pub fn pending_results(&self) -> usize {
        self.results.len()
    }

    fn take_starts(&mut self) -> Vec<(ModuleInstanceId, String)> {
        std::mem::take(&mut self.starts)
    }

    fn take_finished(&mut self) -> BTreeMap<ModuleInstanceId, ModuleOutcome> {
        std::mem::take(&mut self.finished)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModuleScan {
    pub registered: Vec<String>,
    pub skipped: Vec<(String, String)>,
}

struct ModuleInstance {
    id: ModuleInstanceId,
    graph: FlowGraph,
}

pub struct ModuleManager {
    board: SharedModuleBoard,
    modules: BTreeMap<String, Rc<GraphDefinition>>,
    instances: Vec<ModuleInstance>,
}

impl ModuleManager {
    pub fn new(board: SharedModuleBoard) -> Self {
        Self {
            board,
            modules: BTreeMap::new(),
            instances: Vec::new(),
        }
    }

    /// Registers the module boundary nodes, then a `Module:Call_<Name>` type for every module
    /// document in `dir` whose node classes are all registered.
    pub fn rescan(&mut self, ctx: &GraphContext, dir: &Path) -> ModuleScan {
        self.modules.clear();
        {
            let mut registry = ctx.registry.borrow_mut();
            registry.register_type(
                MODULE_START,
                Rc::new(NativeNodeFactory::new(ModuleStartNode::boxed).overriding()),
            );
            registry.register_type(
                MODULE_END,
                Rc::new(NativeNodeFactory::new(ModuleEndNode::boxed).overriding()),
            );
        }

        let mut scan = ModuleScan::default();
        let mut files: Vec<_> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.extension()
                        .map(|ext| ext.eq_ignore_ascii_case("xml"))
                        .unwrap_or(false)
                })
                .collect(),
            Err(_) => {
                log::debug!("[flow] no module directory at {}", dir.display());
                Vec::new()
            }
        };
        files.sort();

        for file in files {
            let label = file.display().to_string();
            let definition = match GraphDefinition::load(&file) {
                Ok(definition) => definition,
                Err(err) => {
                    log::warn!("[flow] skipping module {label}: {err}");
                    scan.skipped.push((label, err.to_string()));
                    continue;
                }
            };
            let name = definition.name.clone();
            match self.load_module(ctx, definition) {
                Ok(_) => scan.registered.push(name),
                Err(reason) => {
                    log::warn!("[flow] skipping module '{name}': {reason}");
                    scan.skipped.push((name, reason));
                }
            }
        }
        scan
    }

    /// Validates a module and registers its call node.
    pub fn load_module(&mut self, ctx: &GraphContext, definition: GraphDefinition) -> Result<NodeTypeId, String> {
        let missing = definition.missing_classes(&ctx.registry.borrow());
        if !missing.is_empty() {
            return Err(format!("unknown node classes {}", missing.join(", ")));
        }
        let mut scratch = FlowGraph::detached(ctx.clone());
        definition
            .instantiate(&mut scratch)
            .map_err(|err| err.to_string())?;

        let name = definition.name.clone();
        let factory: Rc<dyn NodeFactory> = Rc::new(ModuleCallFactory::new(&name));
        let id = ctx
            .registry
            .borrow_mut()
            .register_type(&format!("{MODULE_CALL_PREFIX}{name}"), factory);
        if !id.is_valid() {
            return Err("call node rejected by the registry".to_string());
        }
        self.modules.insert(name, Rc::new(definition));
        Ok(id)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Starts requested instances, updates running ones, then collects those that finished.
    pub fn update(&mut self, ctx: &GraphContext) {
        let starts = self.board.borrow_mut().take_starts();
        for (id, module) in starts {
            self.start_instance(ctx, id, &module);
        }

        for instance in &mut self.instances {
            instance.graph.update();
        }

        self.collect_finished();
    }

    fn start_instance(&mut self, ctx: &GraphContext, id: ModuleInstanceId, module: &str) {
        let Some(definition) = self.modules.get(module).cloned() else {
            log::warn!("[flow] cannot start unknown module '{module}'");
            self.board.borrow_mut().finish(id, ModuleOutcome::Canceled);
            return;
        };
        let mut graph = FlowGraph::detached(ctx.clone());
        graph.set_name(module);
        graph.set_module_instance(Some(id));
        match definition.instantiate(&mut graph) {
            Ok(_) => {
                log::debug!("[flow] module '{module}' instance {id} started");
                self.instances.push(ModuleInstance { id, graph });
            }
            Err(err) => {
                log::warn!("[flow] module '{module}' failed to start: {err}");
                self.board.borrow_mut().finish(id, ModuleOutcome::Canceled);
            }
        }
    }

    fn collect_finished(&mut self) {
        let finished = self.board.borrow_mut().take_finished();
        for (id, outcome) in finished {
            if let Some(pos) = self.instances.iter().position(|i| i.id == id) {
                let mut instance = self.instances.remove(pos);
                instance.graph.uninitialize();
                log::debug!("[flow] module instance {id} finished: {outcome:?}");
            }
            let mut board = self.board.borrow_mut();
            if !board.abandoned.remove(&id) {
                board.results.insert(id, outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_hands_out_each_result_once() {
        let mut board = ModuleBoard::default();
        let a = board.request_start("A");
        let b = board.request_start("B");
        assert_ne!(a, b);
        assert_eq!(board.take_starts().len(), 2);

        board.finish(a, ModuleOutcome::Success);
        board.finish(a, ModuleOutcome::Canceled);
        let finished = board.take_finished();
        assert_eq!(finished[&a], ModuleOutcome::Success);

        board.results.insert(a, ModuleOutcome::Success);
        assert_eq!(board.take_result(a), Some(ModuleOutcome::Success));
        assert_eq!(board.take_result(a), None);
    }
}

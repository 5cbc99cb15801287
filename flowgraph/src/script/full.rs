use super::{drain_actions, value_to_dynamic, ScriptAction, ScriptModule};
use crate::{
    error::ScriptError,
    factory::NodeFactory,
    graph::ActivationInfo,
    model::{InputPortConfig, NodeConfig, OutputPortConfig, PortId},
    node::{FlowEvent, FlowNode, NodeCreateContext},
};
use rhai::{CallFnOptions, Dynamic, Scope};
use std::path::Path;
use std::rc::Rc;

const ON_INIT: &str = "OnInit";
const ON_UPDATE: &str = "OnUpdate";
const ON_ACTIVATE_PREFIX: &str = "OnActivate_";

/// A node type backed by a script table with `Inputs`, `Outputs` and `OnActivate_<port>`
/// handlers. Handlers run with `this` bound to the node's own copy of the table.
///
/// ```rhai
/// let Counter = #{
///     Category: "approved",
///     Inputs: ["Add", "Reset"],
///     Outputs: ["Count"],
///     count: 0,
/// };
///
/// fn OnActivate_Add(value) {
///     this.count += 1;
///     activate_output("Count", this.count);
/// }
/// ```
pub struct ScriptedNodeFactory {
    script: Rc<ScriptModule>,
    config: NodeConfig,
}

impl ScriptedNodeFactory {
    pub fn load(path: &Path, table: &str) -> Result<Self, ScriptError> {
        Self::from_module(ScriptModule::load(path, table)?)
    }

    pub fn from_source(source: &str, table: &str) -> Result<Self, ScriptError> {
        Self::from_module(ScriptModule::compile(source, table)?)
    }

    fn from_module(script: ScriptModule) -> Result<Self, ScriptError> {
        let inputs = port_names(&script, "Inputs")?;
        let outputs = port_names(&script, "Outputs")?;

        let mut config = NodeConfig::new()
            .describe(script.string_field("Description").unwrap_or_default())
            .category(script.category());
        for name in inputs {
            config = config.input(InputPortConfig::any(name));
        }
        for name in outputs {
            config = config.output(OutputPortConfig::any(name));
        }

        if !config.ports_addressable() {
            return Err(ScriptError::TooManyPorts(script.table_name.clone()));
        }

        Ok(Self {
            script: Rc::new(script),
            config,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

fn port_names(script: &ScriptModule, field: &'static str) -> Result<Vec<String>, ScriptError> {
    let malformed = || ScriptError::MalformedField {
        table: script.table_name.clone(),
        field,
    };
    let Some(value) = script.field(field) else {
        return Ok(Vec::new());
    };
    if !value.is_array() {
        return Err(malformed());
    }
    value
        .clone()
        .into_array()
        .map_err(|_| malformed())?
        .into_iter()
        .map(|name| name.into_string().map_err(|_| malformed()))
        .collect()
}

impl NodeFactory for ScriptedNodeFactory {
    fn create(&self, _ctx: &NodeCreateContext) -> Option<Box<dyn FlowNode>> {
        Some(Box::new(ScriptedNode {
            script: self.script.clone(),
            config: self.config.clone(),
            this: Dynamic::from_map(self.script.table.clone()),
        }))
    }
}

struct ScriptedNode {
    script: Rc<ScriptModule>,
    config: NodeConfig,
    this: Dynamic,
}

impl ScriptedNode {
    fn call(&mut self, name: &str, args: Vec<Dynamic>, info: &mut ActivationInfo) {
        let Some(&arity) = self.script.functions.get(name) else {
            return;
        };
        let args: Vec<Dynamic> = args.into_iter().take(arity).collect();
        let mut scope = Scope::new();
        let options = CallFnOptions::new()
            .eval_ast(false)
            .bind_this_ptr(&mut self.this);
        let result = self.script.engine.call_fn_with_options::<Dynamic>(
            options,
            &mut scope,
            &self.script.ast,
            name,
            args,
        );
        if let Err(err) = result {
            log::warn!(
                "[flow] script '{}' failed in {name}: {err}",
                self.script.table_name
            );
        }
        self.apply_actions(info);
    }

    fn apply_actions(&self, info: &mut ActivationInfo) {
        for action in drain_actions(&self.script.actions) {
            match action {
                ScriptAction::Activate(port, value) => match self.config.output_port(&port) {
                    Some(port) => info.activate_output(port, value),
                    None => log::warn!(
                        "[flow] script '{}' has no output '{port}'",
                        self.script.table_name
                    ),
                },
                ScriptAction::SetRegularlyUpdated(regularly) => {
                    info.set_regularly_updated(regularly)
                }
            }
        }
    }
}

impl FlowNode for ScriptedNode {
    fn config(&self) -> NodeConfig {
        self.config.clone()
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        match event {
            FlowEvent::Initialize => self.call(ON_INIT, Vec::new(), info),
            FlowEvent::Update => self.call(ON_UPDATE, Vec::new(), info),
            FlowEvent::Activate => {
                let active: Vec<PortId> = info.active_ports().collect();
                for port in active {
                    let Some(name) = self.config.inputs.get(port.index()).map(|p| p.name.clone())
                    else {
                        continue;
                    };
                    let value = value_to_dynamic(info.input(port));
                    self.call(&format!("{ON_ACTIVATE_PREFIX}{name}"), vec![value], info);
                }
            }
            _ => {}
        }
    }
}

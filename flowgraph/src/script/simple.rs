use super::{drain_actions, dynamic_to_value, value_to_dynamic, ScriptAction, ScriptModule};
use crate::{
    error::ScriptError,
    factory::NodeFactory,
    graph::ActivationInfo,
    model::{DataType, InputPortConfig, NodeConfig, OutputPortConfig, PortId},
    node::{FlowEvent, FlowNode, NodeCreateContext},
};
use rhai::{Dynamic, FnPtr, Map};
use std::path::Path;
use std::rc::Rc;

/// A node type whose whole behavior is one `Implementation` function over typed ports.
///
/// All activations of one update are coalesced; the function then receives every input
/// value in port order. A returned array spreads over the outputs, anything else goes to the
/// first output and unit sends nothing.
pub struct SimpleScriptedNodeFactory {
    script: Rc<ScriptModule>,
    implementation: FnPtr,
    config: NodeConfig,
}

impl SimpleScriptedNodeFactory {
    pub fn load(path: &Path, table: &str) -> Result<Self, ScriptError> {
        Self::from_module(ScriptModule::load(path, table)?)
    }

    pub fn from_source(source: &str, table: &str) -> Result<Self, ScriptError> {
        Self::from_module(ScriptModule::compile(source, table)?)
    }

    fn from_module(script: ScriptModule) -> Result<Self, ScriptError> {
        let implementation = implementation(&script)?;

        let mut config = NodeConfig::new()
            .describe(script.string_field("Description").unwrap_or_default())
            .category(script.category());
        for (name, data_type) in typed_ports(&script, "Inputs")? {
            config = config.input(InputPortConfig::new(name, data_type));
        }
        for (name, data_type) in typed_ports(&script, "Outputs")? {
            config = config.output(OutputPortConfig::new(name, data_type));
        }

        if !config.ports_addressable() {
            return Err(ScriptError::TooManyPorts(script.table_name.clone()));
        }

        Ok(Self {
            script: Rc::new(script),
            implementation,
            config,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

fn implementation(script: &ScriptModule) -> Result<FnPtr, ScriptError> {
    let missing = || ScriptError::MissingImplementation(script.table_name.clone());
    let value = script.field("Implementation").ok_or_else(missing)?;
    if value.is::<FnPtr>() {
        return Ok(value.clone_cast::<FnPtr>());
    }
    let name = script.string_field("Implementation").ok_or_else(missing)?;
    if !script.functions.contains_key(&name) {
        return Err(missing());
    }
    FnPtr::new(name).map_err(|_| missing())
}

fn typed_ports(
    script: &ScriptModule,
    field: &'static str,
) -> Result<Vec<(String, DataType)>, ScriptError> {
    let malformed = || ScriptError::MalformedField {
        table: script.table_name.clone(),
        field,
    };
    let Some(value) = script.field(field) else {
        return Ok(Vec::new());
    };
    let ports = value.clone().into_array().map_err(|_| malformed())?;

    ports
        .into_iter()
        .map(|port| {
            let port = port.try_cast::<Map>().ok_or_else(malformed)?;
            let name = port
                .get("Name")
                .and_then(|v| v.clone().into_string().ok())
                .ok_or_else(malformed)?;
            let data_type = port
                .get("Type")
                .and_then(|v| v.clone().into_string().ok())
                .and_then(|t| DataType::from_name(&t))
                .ok_or_else(malformed)?;
            Ok((name, data_type))
        })
        .collect()
}

impl NodeFactory for SimpleScriptedNodeFactory {
    fn create(&self, _ctx: &NodeCreateContext) -> Option<Box<dyn FlowNode>> {
        Some(Box::new(SimpleScriptedNode {
            script: self.script.clone(),
            implementation: self.implementation.clone(),
            config: self.config.clone(),
        }))
    }
}

struct SimpleScriptedNode {
    script: Rc<ScriptModule>,
    implementation: FnPtr,
    config: NodeConfig,
}

impl SimpleScriptedNode {
    fn run(&self, info: &mut ActivationInfo) {
        let args: Vec<Dynamic> = self
            .config
            .inputs
            .iter()
            .enumerate()
            .map(|(index, port)| value_to_dynamic(&info.input_as(PortId(index as u8), port.data_type)))
            .collect();

        let result = self
            .implementation
            .call::<Dynamic>(&self.script.engine, &self.script.ast, args);
        let actions = drain_actions(&self.script.actions);

        match result {
            Ok(result) => self.emit(result, info),
            Err(err) => log::warn!(
                "[flow] script '{}' implementation failed: {err}",
                self.script.table_name
            ),
        }
        for action in actions {
            match action {
                ScriptAction::Activate(port, value) => {
                    if let Some(port) = self.config.output_port(&port) {
                        info.activate_output(port, value);
                    }
                }
                ScriptAction::SetRegularlyUpdated(regularly) => {
                    info.set_regularly_updated(regularly)
                }
            }
        }
    }

    fn emit(&self, result: Dynamic, info: &mut ActivationInfo) {
        if result.is_unit() {
            return;
        }
        let results = match result.clone().into_array() {
            Ok(values) => values,
            Err(_) => vec![result],
        };
        if results.len() > self.config.outputs.len() {
            log::warn!(
                "[flow] script '{}' returned {} values for {} outputs",
                self.script.table_name,
                results.len(),
                self.config.outputs.len()
            );
        }

        for (index, value) in results.iter().enumerate().take(self.config.outputs.len()) {
            if value.is_unit() {
                continue;
            }
            let port = &self.config.outputs[index];
            match dynamic_to_value(value).and_then(|v| v.convert(port.data_type)) {
                Some(value) => info.activate_output(PortId(index as u8), value),
                None => log::warn!(
                    "[flow] script '{}': cannot send {} on '{}'",
                    self.script.table_name,
                    value.type_name(),
                    port.name
                ),
            }
        }
    }
}

impl FlowNode for SimpleScriptedNode {
    fn config(&self) -> NodeConfig {
        self.config.clone()
    }

    fn process_event(&mut self, event: FlowEvent, info: &mut ActivationInfo) {
        match event {
            FlowEvent::Activate if info.any_active() => info.request_final_activation(),
            FlowEvent::FinalActivate => self.run(info),
            _ => {}
        }
    }
}

//! Rhai bridge for script-defined node types.

mod full;
mod simple;

pub use full::*;
pub use simple::*;

use crate::{
    error::ScriptError,
    model::{EntityId, NodeCategory, Value},
};
use rhai::{Dynamic, Engine, Map, Scope, AST, FLOAT, INT};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Side effects requested by a script while a handler runs, applied once it returns.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptAction {
    Activate(String, Value),
    SetRegularlyUpdated(bool),
}

pub type ActionBuffer = Arc<Mutex<Vec<ScriptAction>>>;

/// Script-side vector type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptVec3 {
    pub x: FLOAT,
    pub y: FLOAT,
    pub z: FLOAT,
}

pub(crate) fn script_engine(actions: &ActionBuffer) -> Engine {
    let mut engine = Engine::new();

    engine
        .register_type_with_name::<EntityId>("EntityId")
        .register_fn("entity", |id: INT| EntityId(u64::try_from(id).unwrap_or(0)))
        .register_get("id", |e: &mut EntityId| e.0 as INT)
        .register_fn("is_valid", |e: &mut EntityId| e.is_valid());

    engine
        .register_type_with_name::<ScriptVec3>("Vec3")
        .register_fn("vec3", |x: FLOAT, y: FLOAT, z: FLOAT| ScriptVec3 { x, y, z })
        .register_get("x", |v: &mut ScriptVec3| v.x)
        .register_get("y", |v: &mut ScriptVec3| v.y)
        .register_get("z", |v: &mut ScriptVec3| v.z);

    engine.register_fn("log", |text: &str| log::info!("[flow] script: {text}"));

    {
        let actions = actions.clone();
        engine.register_fn("activate_output", move |port: &str, value: Dynamic| {
            let Some(value) = dynamic_to_value(&value) else {
                log::warn!("[flow] script: cannot send {} on '{port}'", value.type_name());
                return;
            };
            if let Ok(mut actions) = actions.lock() {
                actions.push(ScriptAction::Activate(port.to_string(), value));
            }
        });
    }
    {
        let actions = actions.clone();
        engine.register_fn("activate_output", move |port: &str| {
            if let Ok(mut actions) = actions.lock() {
                actions.push(ScriptAction::Activate(port.to_string(), Value::Void));
            }
        });
    }
    {
        let actions = actions.clone();
        engine.register_fn("set_regularly_updated", move |regularly: bool| {
            if let Ok(mut actions) = actions.lock() {
                actions.push(ScriptAction::SetRegularlyUpdated(regularly));
            }
        });
    }

    engine
}

pub(crate) fn drain_actions(actions: &ActionBuffer) -> Vec<ScriptAction> {
    actions
        .lock()
        .map(|mut actions| actions.drain(..).collect())
        .unwrap_or_default()
}

pub fn value_to_dynamic(v: &Value) -> Dynamic {
    match v {
        Value::Void => Dynamic::UNIT,
        Value::Int(i) => INT::from(*i).into(),
        Value::Float(f) => FLOAT::from(*f).into(),
        Value::Double(d) => (*d as FLOAT).into(),
        Value::Bool(b) => (*b).into(),
        Value::String(s) => s.clone().into(),
        Value::EntityId(id) => Dynamic::from(*id),
        Value::Vec3([x, y, z]) => Dynamic::from(ScriptVec3 {
            x: FLOAT::from(*x),
            y: FLOAT::from(*y),
            z: FLOAT::from(*z),
        }),
    }
}

/// Marshals a script value by its runtime type. Maps with `x`, `y` and `z` become vectors.
pub fn dynamic_to_value(v: &Dynamic) -> Option<Value> {
    if v.is_unit() {
        return Some(Value::Void);
    }
    if v.is::<bool>() {
        return Some(Value::Bool(v.clone_cast::<bool>()));
    }
    if v.is::<INT>() {
        let i = v.clone_cast::<INT>();
        return Some(match i32::try_from(i) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Double(i as f64),
        });
    }
    if v.is::<FLOAT>() {
        return Some(Value::Float(v.clone_cast::<FLOAT>() as f32));
    }
    if v.is_string() {
        return v.clone().into_string().ok().map(Value::String);
    }
    if v.is::<EntityId>() {
        return Some(Value::EntityId(v.clone_cast::<EntityId>()));
    }
    if v.is::<ScriptVec3>() {
        let s = v.clone_cast::<ScriptVec3>();
        return Some(Value::Vec3([s.x as f32, s.y as f32, s.z as f32]));
    }
    if v.is_map() {
        let map = v.clone_cast::<Map>();
        let axis = |name: &str| map.get(name).and_then(number);
        return Some(Value::Vec3([axis("x")?, axis("y")?, axis("z")?]));
    }
    None
}

fn number(v: &Dynamic) -> Option<f32> {
    if v.is::<INT>() {
        Some(v.clone_cast::<INT>() as f32)
    } else if v.is::<FLOAT>() {
        Some(v.clone_cast::<FLOAT>() as f32)
    } else {
        None
    }
}

/// Case-insensitive category lookup. Missing or unknown names fall back to `Debug`; unknown
/// names are logged.
pub fn resolve_category(table: &str, name: Option<&str>) -> NodeCategory {
    let Some(name) = name else {
        return NodeCategory::Debug;
    };
    NodeCategory::from_name(name).unwrap_or_else(|| {
        log::warn!("[flow] '{table}': unknown category '{name}', using debug");
        NodeCategory::Debug
    })
}

/// A compiled script and the global table it defines.
pub(crate) struct ScriptModule {
    pub engine: Engine,
    pub ast: AST,
    pub table_name: String,
    pub table: Map,
    /// Script function name to parameter count.
    pub functions: HashMap<String, usize>,
    pub actions: ActionBuffer,
}

impl ScriptModule {
    pub fn load(path: &Path, table: &str) -> Result<Self, ScriptError> {
        let source = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::compile(&source, table)
    }

    pub fn compile(source: &str, table: &str) -> Result<Self, ScriptError> {
        let actions = ActionBuffer::default();
        let engine = script_engine(&actions);
        let ast = engine
            .compile(source)
            .map_err(|err| ScriptError::Parse(err.to_string()))?;

        let mut scope = Scope::new();
        engine.run_ast_with_scope(&mut scope, &ast)?;
        // Top-level code runs only to build the table.
        drain_actions(&actions);

        let table_map = scope
            .get_value::<Map>(table)
            .ok_or_else(|| ScriptError::MissingTable(table.to_string()))?;
        let functions = ast
            .iter_functions()
            .map(|f| (f.name.to_string(), f.params.len()))
            .collect();

        Ok(Self {
            engine,
            ast,
            table_name: table.to_string(),
            table: table_map,
            functions,
            actions,
        })
    }

    pub fn field(&self, name: &str) -> Option<&Dynamic> {
        self.table.get(name)
    }

    pub fn string_field(&self, name: &str) -> Option<String> {
        self.field(name)
            .filter(|v| v.is_string())
            .and_then(|v| v.clone().into_string().ok())
    }

    pub fn category(&self) -> NodeCategory {
        resolve_category(&self.table_name, self.string_field("Category").as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_cross_the_bridge() {
        let samples = [
            Value::Void,
            Value::Int(-3),
            Value::Float(1.5),
            Value::Bool(true),
            Value::String("door".to_string()),
            Value::EntityId(EntityId(7)),
            Value::Vec3([1.0, 2.0, 3.0]),
        ];
        for value in samples {
            assert_eq!(dynamic_to_value(&value_to_dynamic(&value)), Some(value));
        }
        assert_eq!(
            dynamic_to_value(&value_to_dynamic(&Value::Double(0.5))),
            Some(Value::Float(0.5))
        );
    }

    #[test]
    fn maps_with_axes_become_vectors() {
        let engine = script_engine(&ActionBuffer::default());
        let v: Dynamic = engine.eval("#{ x: 1, y: 2.5, z: -1 }").unwrap();
        assert_eq!(dynamic_to_value(&v), Some(Value::Vec3([1.0, 2.5, -1.0])));
        let partial: Dynamic = engine.eval("#{ x: 1 }").unwrap();
        assert_eq!(dynamic_to_value(&partial), None);
    }

    #[test]
    fn categories_default_to_debug() {
        assert_eq!(resolve_category("T", Some("ADVANCED")), NodeCategory::Advanced);
        assert_eq!(resolve_category("T", Some("shiny")), NodeCategory::Debug);
        assert_eq!(resolve_category("T", None), NodeCategory::Debug);
    }

    #[test]
    fn missing_table_is_reported() {
        let err = ScriptModule::compile("let Other = #{};", "Door").err().unwrap();
        assert!(matches!(err, ScriptError::MissingTable(name) if name == "Door"));
        assert!(matches!(
            ScriptModule::compile("let = ;", "Door"),
            Err(ScriptError::Parse(_))
        ));
    }
}

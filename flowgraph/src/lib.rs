//! Flow graph runtime: a registry of node types, data-driven extensions and a push-based
//! dataflow update loop.

#![forbid(unsafe_code)]

pub mod blacklist;
pub mod composite;
pub mod config;
pub mod definition;
pub mod descriptor;
pub mod entity;
pub mod env;
pub mod error;
pub mod factory;
pub mod graph;
pub mod init_data;
pub mod inspector;
pub mod model;
pub mod module_manager;
pub mod node;
pub mod nodes;
pub mod pipeline;
pub mod registry;
pub mod script;
pub mod system;
pub mod xml;

pub use crate::{
    config::FlowSystemConfig,
    definition::GraphDefinition,
    env::{Clock, EntitySystem, Environment, EventTracker, FrameClock},
    error::{DefinitionError, ExtensionError, GraphError, ScriptError},
    factory::{NativeNodeFactory, NodeFactory, SingletonNodeFactory},
    graph::{ActivationInfo, FlowGraph, GraphContext},
    inspector::FlowInspector,
    model::{
        DataType, EntityId, FlowAddress, GraphId, NodeCategory, NodeConfig, NodeId, NodeTypeId,
        PortId, Value,
    },
    node::{FlowEvent, FlowNode},
    pipeline::{ExternalNodeProvider, RegistrationReport},
    registry::{SharedRegistry, TypeRegistry},
    system::{FlowSystem, SharedGraph},
};

use crate::model::{FlowAddress, NodeId, MAX_PORTS};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed xml: {0}")]
    Syntax(#[from] quick_xml::Error),

    #[error("malformed xml attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("unbalanced xml element </{0}>")]
    Unbalanced(String),

    #[error("xml document has no root element")]
    NoRoot,
}

/// Why a graph definition could not be turned into a graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// A referenced node type is not registered (yet). Retryable.
    #[error("node '{node}' uses unknown type '{class}'")]
    MissingNodeType { node: String, class: String },

    #[error("definition has no name")]
    MissingName,

    #[error("unexpected element <{0}>")]
    UnexpectedElement(String),

    #[error("element <{element}> is missing attribute '{attribute}'")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("reference to unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{node}' has no {direction} port '{port}'")]
    UnknownPort {
        node: String,
        port: String,
        direction: &'static str,
    },

    #[error("malformed port address '{0}'")]
    MalformedAddress(String),

    #[error("cannot parse '{value}' for port '{port}'")]
    BadLiteral { port: String, value: String },

    #[error("link {0} rejected by graph: {1}")]
    Link(String, GraphError),

    #[error("failed to create node '{0}'")]
    NodeCreation(String),

    #[error("'{0}' exposes more than {max} ports on one side", max = MAX_PORTS)]
    TooManyPorts(String),

    #[error("token '{name}' has unknown type '{data_type}'")]
    BadTokenType { name: String, data_type: String },
}

impl DefinitionError {
    pub fn is_missing_dependency(&self) -> bool {
        matches!(self, DefinitionError::MissingNodeType { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("cannot link an {0} port to an {0} port")]
    SameDirection(&'static str),

    #[error("invalid address {0:?}")]
    InvalidAddress(FlowAddress),

    #[error("a node named '{0}' already exists")]
    DuplicateName(String),

    #[error("unknown node type '{0}'")]
    UnknownType(String),

    #[error("factory for '{0}' produced no node")]
    FactoryFailed(String),

    #[error("graph is out of node ids")]
    OutOfIds,

    #[error("no such node {0:?}")]
    UnknownNode(NodeId),

    #[error("node creation vetoed by hook")]
    Vetoed,

    #[error("node type '{0}' declares more than {max} ports on one side", max = MAX_PORTS)]
    TooManyPorts(String),
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("script parse error: {0}")]
    Parse(String),

    #[error("script evaluation error: {0}")]
    Eval(String),

    #[error("script does not define table '{0}'")]
    MissingTable(String),

    #[error("table '{table}' has a malformed '{field}' field")]
    MalformedField { table: String, field: &'static str },

    #[error("table '{0}' defines no Implementation function")]
    MissingImplementation(String),

    #[error("table '{0}' declares more than {max} ports on one side", max = MAX_PORTS)]
    TooManyPorts(String),
}

impl From<Box<rhai::EvalAltResult>> for ScriptError {
    fn from(err: Box<rhai::EvalAltResult>) -> Self {
        ScriptError::Eval(err.to_string())
    }
}

/// Failure to load one extension descriptor entry.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("unknown descriptor element <{0}>")]
    UnknownElement(String),

    #[error("descriptor <{element}> is missing '{attribute}'")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },

    #[error("type '{0}' was not accepted by the registry")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum InitDataError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed init data {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

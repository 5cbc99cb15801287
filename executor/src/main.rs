//! Headless flow graph runner.
//!
//! ```text
//! executor [--config flowgraph.ron] [--data-root <dir>] [--graph <file.xml>] [--frames N] [--dt S]
//! ```
//!
//! Boots a flow system from the data root, loads one graph document and ticks it for a fixed
//! number of frames.

use flowgraph::{
    env::FrameClock, DefinitionError, Environment, ExtensionError, FlowSystem, FlowSystemConfig,
    GraphDefinition,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use thiserror::Error;

const DEFAULT_CONFIG: &str = "flowgraph.ron";
const DEFAULT_FRAMES: u32 = 10;
const DEFAULT_DT: f64 = 1.0 / 30.0;

#[derive(Debug, Error)]
enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config {path}: {source}")]
    Ron {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("{0} expects a value")]
    MissingValue(String),

    #[error("invalid value '{value}' for {flag}")]
    BadValue { flag: String, value: String },

    #[error("unknown argument '{0}'")]
    UnknownArgument(String),
}

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot load graph: {0}")]
    Extension(#[from] ExtensionError),

    #[error("cannot build graph: {0}")]
    Definition(#[from] DefinitionError),
}

#[derive(Debug, Clone, PartialEq)]
struct Args {
    config: PathBuf,
    data_root: Option<PathBuf>,
    graph: Option<PathBuf>,
    frames: u32,
    dt: f64,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG),
            data_root: None,
            graph: None,
            frames: DEFAULT_FRAMES,
            dt: DEFAULT_DT,
        }
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, ConfigError> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = || args.next().ok_or_else(|| ConfigError::MissingValue(arg.clone()));
        match arg.as_str() {
            "--config" => parsed.config = PathBuf::from(value()?),
            "--data-root" => parsed.data_root = Some(PathBuf::from(value()?)),
            "--graph" => parsed.graph = Some(PathBuf::from(value()?)),
            "--frames" => parsed.frames = number(&arg, value()?)?,
            "--dt" => parsed.dt = number(&arg, value()?)?,
            _ => return Err(ConfigError::UnknownArgument(arg.clone())),
        }
    }
    Ok(parsed)
}

fn number<T: std::str::FromStr>(flag: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::BadValue {
        flag: flag.to_string(),
        value,
    })
}

/// Reads the system config. A missing file means defaults.
fn load_config(path: &Path) -> Result<FlowSystemConfig, ConfigError> {
    if !path.exists() {
        log::info!("no config at {}, using defaults", path.display());
        return Ok(FlowSystemConfig::default());
    }
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ron::from_str(&source).map_err(|source| ConfigError::Ron {
        path: path.to_path_buf(),
        source,
    })
}

fn run(args: Args) -> Result<(), RunError> {
    let mut config = load_config(&args.config)?;
    if let Some(root) = args.data_root {
        config.data_root = root;
    }

    let clock = Rc::new(FrameClock::default());
    let mut system = FlowSystem::new(config, Environment::default().with_clock(clock.clone()));
    let report = system.register_all_node_types();
    for (name, reason) in &report.extensions.dropped {
        log::warn!("dropped '{name}': {reason}");
    }

    let Some(path) = args.graph else {
        log::info!("no graph given, registered {} node types", report.types);
        return Ok(());
    };
    let definition = GraphDefinition::load(&path)?;
    let graph = system.load_graph(&definition)?;
    log::info!(
        "running '{}' ({} nodes) for {} frames",
        path.display(),
        graph.borrow().node_count(),
        args.frames
    );

    for _ in 0..args.frames {
        clock.advance(args.dt);
        system.update();
    }

    let stats = graph.borrow().stats();
    log::info!(
        "done: {} nodes, {} edges, {} pending activations",
        stats.nodes,
        stats.edges,
        stats.pending_activations
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = parse_args(std::env::args().skip(1))
        .map_err(RunError::from)
        .and_then(run);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, ConfigError> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = args(&["--graph", "level.xml", "--frames", "3", "--data-root", "game"]).unwrap();
        assert_eq!(parsed.graph, Some(PathBuf::from("level.xml")));
        assert_eq!(parsed.frames, 3);
        assert_eq!(parsed.data_root, Some(PathBuf::from("game")));
        assert_eq!(parsed.config, PathBuf::from(DEFAULT_CONFIG));
    }

    #[test]
    fn bad_arguments_are_reported() {
        assert!(matches!(args(&["--frames"]), Err(ConfigError::MissingValue(_))));
        assert!(matches!(args(&["--frames", "many"]), Err(ConfigError::BadValue { .. })));
        assert!(matches!(args(&["--fast"]), Err(ConfigError::UnknownArgument(_))));
    }

    #[test]
    fn config_is_read_from_ron() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG);
        std::fs::write(&path, r#"(data_root: "assets", inspecting: true)"#).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.data_root, PathBuf::from("assets"));
        assert!(config.inspecting);
        assert!(config.updates_enabled);

        let missing = load_config(&dir.path().join("none.ron")).unwrap();
        assert_eq!(missing, FlowSystemConfig::default());

        std::fs::write(&path, "(data_root: ").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Ron { .. })));
    }

    #[test]
    fn runs_a_graph_document() {
        let dir = tempfile::tempdir().unwrap();
        let graph = dir.path().join("graph.xml");
        std::fs::write(
            &graph,
            r#"<Graph>
                 <Nodes>
                   <Node Id="start" Class="Game:Start"/>
                   <Node Id="delay" Class="Time:Delay"><Input Name="Delay" Value="0.05"/></Node>
                 </Nodes>
                 <Edges><Edge From="start:Output" To="delay:In"/></Edges>
               </Graph>"#,
        )
        .unwrap();
        let result = run(Args {
            config: dir.path().join("none.ron"),
            data_root: Some(dir.path().to_path_buf()),
            graph: Some(graph),
            frames: 4,
            dt: DEFAULT_DT,
        });
        assert!(result.is_ok());
    }
}

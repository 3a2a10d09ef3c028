use std::any::Any;
use std::fmt::Debug;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ahash::HashMap;
use clap::Parser;
use dyn_clone::DynClone;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::decay::{DecayFunction, DecayParameters};
use crate::routing::tree::Direction;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown decay type {0:?}, expected \"hansen\" or \"isochrone\"")]
    UnknownDecayType(String),
    #[error("{decay} decay requires {parameter}")]
    MissingParameter {
        decay: &'static str,
        parameter: &'static str,
    },
    #[error("beta must be finite and non negative, got {0}")]
    InvalidBeta(f64),
    #[error("{name} must not be negative, got {value}")]
    InvalidCutoff { name: &'static str, value: f64 },
    #[error("percentile must be in (0, 1), got {0}")]
    InvalidPercentile(f64),
    #[error("cost at percentile must be positive and finite, got {0}")]
    InvalidPercentileCost(f64),
    #[error("no valid cost observations to estimate beta from")]
    EmptyCostSample,
    #[error("detour factor must be finite and at least 1.0, got {0}")]
    InvalidDetourFactor(f64),
    #[error("max matrix dimension must be at least 1")]
    InvalidMatrixDimension,
    #[error("no destination groups given")]
    EmptyDestinations,
    #[error("destination group {0} has no access nodes")]
    EmptyAccessNodes(String),
    #[error("weight of destination group {group} must be finite and positive, got {weight}")]
    InvalidWeight { group: String, weight: f64 },
    #[error("thread count must be at least 1")]
    InvalidThreadCount,
    #[error("node {node} does not exist in a graph with {node_count} nodes")]
    NodeOutOfRange { node: usize, node_count: usize },
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("config module {0} is not set")]
    MissingModule(&'static str),
    #[error("invalid value {value:?} for {key}")]
    InvalidOverride { key: String, value: String },
    #[error("failed to access config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to write config")]
    Write(#[from] serde_yaml::Error),
}

/// Registers a handler for `--set key=value` overrides.
macro_rules! register_override {
    ($key:literal, $func:expr) => {
        inventory::submit! {
            OverrideHandler {
                key: $key,
                apply: $func,
            }
        }
    };
}

struct OverrideHandler {
    key: &'static str,
    apply: fn(config: &mut Config, value: &str) -> Result<(), ConfigError>,
}

inventory::collect!(OverrideHandler);

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineArgs {
    #[arg(long, short)]
    pub config: String,
    #[arg(long = "set", value_parser = parse_key_val)]
    pub overrides: Vec<(String, String)>,
}

impl CommandLineArgs {
    pub fn new_with_path(path: impl ToString) -> Self {
        CommandLineArgs {
            config: path.to_string(),
            overrides: Vec::new(),
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.find('=') {
        Some(pos) => Ok((s[..pos].to_string(), s[pos + 1..].to_string())),
        None => Err(format!("invalid KEY=VALUE: no `=` found in `{}`", s)),
    }
}

fn parse_override<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Config {
    modules: Mutex<HashMap<String, Box<dyn ConfigModule>>>,
    #[serde(skip)]
    context: Option<PathBuf>,
}

impl TryFrom<CommandLineArgs> for Config {
    type Error = ConfigError;

    fn try_from(args: CommandLineArgs) -> Result<Self, Self::Error> {
        let mut config = Config::from_file(&args.config)?;
        config.apply_overrides(&args.overrides)?;
        Ok(config)
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config =
            serde_yaml::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.context = Some(path.to_path_buf());
        info!("Read config from {:?}", path);
        Ok(config)
    }

    /// Directory of the config file, against which relative paths are resolved.
    pub fn context(&self) -> Option<&Path> {
        self.context.as_deref().and_then(Path::parent)
    }

    /// Apply generic key-value overrides to the config, e.g. decay.beta=0.01
    pub fn apply_overrides(&mut self, overrides: &[(String, String)]) -> Result<(), ConfigError> {
        info!("Applying overrides: {:?}", overrides);

        for (key, value) in overrides {
            if let Some(handler) =
                inventory::iter::<OverrideHandler>().find(|h| h.key == key.as_str())
            {
                (handler.apply)(self, value)?;
            } else {
                warn!("No override handler found for key: {}", key);
            }
        }
        Ok(())
    }

    fn module<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.modules
            .lock()
            .get(key)
            .and_then(|boxed| boxed.as_any().downcast_ref::<T>().cloned())
    }

    fn set_module(&self, key: &str, module: Box<dyn ConfigModule>) {
        self.modules.lock().insert(key.to_string(), module);
    }

    fn module_or_default<T: ConfigModule + Clone + Default + 'static>(&self, key: &str) -> T {
        if let Some(module) = self.module::<T>(key) {
            module
        } else {
            let default = T::default();
            self.set_module(key, Box::new(default.clone()));
            default
        }
    }

    pub fn decay_parameters(&self) -> Result<DecayParameters, ConfigError> {
        self.module::<Decay>("decay")
            .map(|d| d.parameters)
            .ok_or(ConfigError::MissingModule("decay"))
    }

    pub fn decay(&self) -> Result<DecayFunction, ConfigError> {
        DecayFunction::try_from(self.decay_parameters()?)
    }

    pub fn set_decay(&mut self, parameters: DecayParameters) {
        self.set_module("decay", Box::new(Decay { parameters }));
    }

    pub fn accessibility(&self) -> Accessibility {
        self.module_or_default("accessibility")
    }

    pub fn set_accessibility(&mut self, accessibility: Accessibility) {
        self.set_module("accessibility", Box::new(accessibility));
    }

    pub fn corridor(&self) -> Corridor {
        self.module_or_default("corridor")
    }

    pub fn set_corridor(&mut self, corridor: Corridor) {
        self.set_module("corridor", Box::new(corridor));
    }

    pub fn output(&self) -> Output {
        self.module_or_default("output")
    }

    pub fn set_output(&mut self, output: Output) {
        self.set_module("output", Box::new(output));
    }
}

pub fn write_config(config: &Config, output_path: &Path) -> Result<(), ConfigError> {
    let output_config = output_path.join("output_config.yml");
    let file = File::create(&output_config).map_err(|source| ConfigError::Io {
        path: output_config.clone(),
        source,
    })?;
    serde_yaml::to_writer(BufWriter::new(file), config)?;
    Ok(())
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Decay {
    pub parameters: DecayParameters,
}

register_override!("decay.beta", |config, value| {
    let mut parameters = config.decay_parameters()?;
    parameters.beta = Some(parse_override("decay.beta", value)?);
    config.set_decay(parameters);
    Ok(())
});

register_override!("decay.cutoff_time", |config, value| {
    let mut parameters = config.decay_parameters()?;
    parameters.cutoff_time = Some(parse_override("decay.cutoff_time", value)?);
    config.set_decay(parameters);
    Ok(())
});

register_override!("decay.cutoff_distance", |config, value| {
    let mut parameters = config.decay_parameters()?;
    parameters.cutoff_distance = Some(parse_override("decay.cutoff_distance", value)?);
    config.set_decay(parameters);
    Ok(())
});

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Accessibility {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub direction: Direction,
}

impl Default for Accessibility {
    fn default() -> Self {
        Accessibility {
            threads: default_threads(),
            direction: Direction::Forward,
        }
    }
}

pub(crate) fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

register_override!("accessibility.threads", |config, value| {
    let mut accessibility = config.accessibility();
    accessibility.threads = parse_override("accessibility.threads", value)?;
    config.set_accessibility(accessibility);
    Ok(())
});

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Corridor {
    #[serde(default = "default_detour_factor")]
    pub detour_factor: f64,
    #[serde(default = "default_max_matrix_dimension")]
    pub max_matrix_dimension: usize,
}

impl Default for Corridor {
    fn default() -> Self {
        Corridor {
            detour_factor: default_detour_factor(),
            max_matrix_dimension: default_max_matrix_dimension(),
        }
    }
}

fn default_detour_factor() -> f64 {
    1.0
}

fn default_max_matrix_dimension() -> usize {
    2000
}

register_override!("corridor.detour_factor", |config, value| {
    let mut corridor = config.corridor();
    corridor.detour_factor = parse_override("corridor.detour_factor", value)?;
    config.set_corridor(corridor);
    Ok(())
});

register_override!("corridor.max_matrix_dimension", |config, value| {
    let mut corridor = config.corridor();
    corridor.max_matrix_dimension = parse_override("corridor.max_matrix_dimension", value)?;
    config.set_corridor(corridor);
    Ok(())
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Output {
    pub output_dir: PathBuf,
    #[serde(default)]
    pub logging: Logging,
}

impl Default for Output {
    fn default() -> Self {
        Output {
            output_dir: PathBuf::from("./"),
            logging: Logging::None,
        }
    }
}

register_override!("output.output_dir", |config, value| {
    let mut output = config.output();
    output.output_dir = PathBuf::from(value);
    config.set_output(output);
    Ok(())
});

/// Have this extra layer of log level enum, as tracing subscriber has no
/// off/none option by default. At least it can't be parsed
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub enum Logging {
    #[default]
    None,
    Info,
}

#[typetag::serde(tag = "type")]
pub trait ConfigModule: Debug + Send + DynClone {
    fn as_any(&self) -> &dyn Any;
}

#[typetag::serde]
impl ConfigModule for Decay {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[typetag::serde]
impl ConfigModule for Accessibility {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[typetag::serde]
impl ConfigModule for Corridor {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[typetag::serde]
impl ConfigModule for Output {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// This is needed to allow cloning of the trait object.
dyn_clone::clone_trait_object!(ConfigModule);

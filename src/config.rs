//! Configuration of a co-simulation run.
//!
//! A run is described declaratively in YAML or JSON: the simulation
//! parameters, the slaves with their variable tables, and the couplings.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   end_time: 5.0
//!   step_size: 0.1
//!   logging: false
//!   separator: ","
//!   output_dir: out
//!
//! slaves:
//!   - name: producer
//!     library: ./producer.so
//!     model_identifier: producer
//!     guid: "{8c4e810f-3df3-4a00-8276-176fa3c9f000}"
//!     variables:
//!       - { name: y, value_reference: 0, type: real }
//!   - library: ./consumer.so
//!     model_identifier: consumer
//!     guid: "{8c4e810f-3df3-4a00-8276-176fa3c9f001}"
//!     variables:
//!       - { name: u, value_reference: 0, type: real }
//!
//! connections:
//!   - { from: [0, 0], to: [1, 0] }
//!
//! # flattened (fromSlave, fromRef, toSlave, toRef) quadruples,
//! # appended after `connections`
//! couplings: []
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::connection::CouplingSpec;
use crate::error::LoadError;
use crate::registry::SlaveRegistry;
use crate::slave::{SlaveDescriptor, SlaveLoader};
use crate::types::SimTime;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Global simulation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// End time of the run; the run starts at 0
    #[serde(default = "default_end_time")]
    pub end_time: SimTime,

    /// Fixed macro step size
    #[serde(default = "default_step_size")]
    pub step_size: SimTime,

    /// Enables component debug logging at instantiation
    #[serde(default)]
    pub logging: bool,

    /// Field separator of result rows
    #[serde(default = "default_separator")]
    pub separator: char,

    /// Directory receiving the `result<i>.csv` files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Accept `Warning` from a slave step instead of aborting
    #[serde(default)]
    pub tolerate_step_warnings: bool,
}

fn default_end_time() -> SimTime {
    1.0
}

fn default_step_size() -> SimTime {
    0.1
}

fn default_separator() -> char {
    ','
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            end_time: default_end_time(),
            step_size: default_step_size(),
            logging: false,
            separator: default_separator(),
            output_dir: default_output_dir(),
            log_level: default_log_level(),
            tolerate_step_warnings: false,
        }
    }
}

impl SimulationParams {
    /// Validates the simulation parameters.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "step_size must be positive, got {}",
                self.step_size
            )));
        }
        if !self.end_time.is_finite() || self.end_time <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "end_time must be after the start time 0, got {}",
                self.end_time
            )));
        }
        if !self.separator.is_ascii()
            || matches!(self.separator, '"' | '\n' | '\r')
            || self.separator.is_ascii_digit()
        {
            return Err(ConfigError::Validation(format!(
                "separator {:?} cannot delimit result fields",
                self.separator
            )));
        }
        Ok(())
    }
}

/// Complete co-simulation configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Global simulation parameters
    #[serde(default)]
    pub simulation: SimulationParams,

    /// Slaves in index order
    #[serde(default)]
    pub slaves: Vec<SlaveDescriptor>,

    /// Couplings as endpoint pairs
    #[serde(default)]
    pub connections: Vec<CouplingSpec>,

    /// Couplings as a flat `4×M` integer list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub couplings: Vec<i64>,
}

impl MasterConfig {
    /// Creates a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// Relative library paths are resolved against the file's directory.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?.relative_to(path))
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: MasterConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    ///
    /// Relative library paths are resolved against the file's directory.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?.relative_to(path))
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: MasterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    fn relative_to(mut self, file: &Path) -> Self {
        let Some(base) = file.parent() else {
            return self;
        };
        for slave in &mut self.slaves {
            if slave.library.is_relative() {
                slave.library = base.join(&slave.library);
            }
        }
        self
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.simulation.validate()?;

        if self.slaves.is_empty() {
            return Err(ConfigError::Validation("at least one slave is required".to_string()));
        }
        for (index, slave) in self.slaves.iter().enumerate() {
            if slave.model_identifier.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "slave {index} has an empty model_identifier"
                )));
            }
        }

        for spec in self.all_couplings()? {
            for endpoint in [spec.from, spec.to] {
                if endpoint.slave >= self.slaves.len() {
                    return Err(ConfigError::Validation(format!(
                        "coupling {spec} references slave {}, but only {} slave(s) are configured",
                        endpoint.slave,
                        self.slaves.len()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Returns `connections` followed by the decoded flat `couplings`.
    pub fn all_couplings(&self) -> ConfigResult<Vec<CouplingSpec>> {
        let flat = CouplingSpec::from_flat(&self.couplings).map_err(ConfigError::Validation)?;
        Ok(self.connections.iter().copied().chain(flat).collect())
    }

    /// Loads every configured slave through `loader`.
    pub fn load_registry(&self, loader: &dyn SlaveLoader) -> Result<SlaveRegistry, LoadError> {
        Ok(SlaveRegistry::load(&self.slaves, loader)?
            .with_step_warnings_tolerated(self.simulation.tolerate_step_warnings))
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns the number of slaves.
    pub fn slave_count(&self) -> usize {
        self.slaves.len()
    }

    /// Returns the number of configured couplings in both notations.
    pub fn coupling_count(&self) -> usize {
        self.connections.len() + self.couplings.len() / 4
    }
}

/// Builder for creating a `MasterConfig` programmatically.
#[derive(Default)]
pub struct MasterConfigBuilder {
    config: MasterConfig,
}

impl MasterConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the end time.
    pub fn end_time(mut self, time: SimTime) -> Self {
        self.config.simulation.end_time = time;
        self
    }

    /// Sets the fixed step size.
    pub fn step_size(mut self, step: SimTime) -> Self {
        self.config.simulation.step_size = step;
        self
    }

    /// Enables component logging.
    pub fn logging(mut self, enable: bool) -> Self {
        self.config.simulation.logging = enable;
        self
    }

    /// Sets the result field separator.
    pub fn separator(mut self, separator: char) -> Self {
        self.config.simulation.separator = separator;
        self
    }

    /// Sets the result directory.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.simulation.output_dir = dir.into();
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    /// Accepts `Warning` step results.
    pub fn tolerate_step_warnings(mut self, tolerate: bool) -> Self {
        self.config.simulation.tolerate_step_warnings = tolerate;
        self
    }

    /// Adds a slave.
    pub fn add_slave(mut self, slave: SlaveDescriptor) -> Self {
        self.config.slaves.push(slave);
        self
    }

    /// Adds a coupling.
    pub fn add_connection(mut self, spec: CouplingSpec) -> Self {
        self.config.connections.push(spec);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<MasterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

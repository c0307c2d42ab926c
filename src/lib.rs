//! # cosim
//!
//! A fixed-step co-simulation master for components following the FMI for
//! Co-Simulation 1.0 contract.
//!
//! ## Design Principles
//!
//! - **Registry-Owned Slaves**: The [`SlaveRegistry`] owns every loaded
//!   component and its live instance. Couplings and the master loop refer
//!   to slaves by index only.
//! - **Static Couplings**: The [`ConnectionGraph`] resolves and type-checks
//!   every coupling once; couplings with mismatched types are skipped with a
//!   warning, unknown endpoints abort setup.
//! - **Fixed Macro Step**: The [`MasterLoop`] propagates all couplings, then
//!   steps all slaves by the same `h`, then emits one result row per slave.
//! - **Guaranteed Teardown**: Instances are terminated and disposed exactly
//!   once on every path, including aborts.
//!
//! ## Quick Start
//!
//! ```rust
//! use cosim::{ConnectionGraph, CouplingSpec, MasterLoop, MemorySink, SlaveRegistry};
//! use cosim::mock::MockComponent;
//!
//! let mut registry = SlaveRegistry::new();
//! registry.add(Box::new(MockComponent::ramp("producer")));
//! registry.add(Box::new(MockComponent::gain("consumer", 0.5)));
//!
//! let graph = ConnectionGraph::build(&[CouplingSpec::new(0, 0, 1, 0)], &registry).unwrap();
//! let mut sink = MemorySink::new();
//! let report = MasterLoop::new(&mut registry, &graph, 5.0, 0.1)
//!     .unwrap()
//!     .run(&mut sink)
//!     .unwrap();
//!
//! assert_eq!(report.steps, 50);
//! println!("{}", report.summary());
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use cosim::{ConnectionGraph, CsvResultSink, MasterConfig, MasterLoop, NativeLoader};
//!
//! let config = MasterConfig::from_file("run.yaml")?;
//! let mut registry = config.load_registry(&NativeLoader)?;
//! let graph = ConnectionGraph::build(&config.all_couplings()?, &registry)?;
//! let mut sink = CsvResultSink::new(&config.simulation.output_dir, config.simulation.separator);
//! MasterLoop::new(&mut registry, &graph, config.simulation.end_time, config.simulation.step_size)?
//!     .run(&mut sink)?;
//! ```

pub mod types;
pub mod error;
pub mod variable;
pub mod slave;
pub mod native;
pub mod registry;
pub mod connection;
pub mod master;
pub mod output;
pub mod report;
pub mod config;
pub mod mock;

// Re-export commonly used types
pub use types::{AliasKind, ScalarType, ScalarValue, SimTime, SlaveIndex, Status, ValueReference};
pub use error::{ConnectionError, LoadError, MasterError, MasterResult};
pub use variable::{VariableDescriptor, VariableResolver, VariableTable};
pub use slave::{InstanceGuard, SlaveComponent, SlaveDescriptor, SlaveInstance, SlaveLoader};
pub use native::{NativeComponent, NativeLoader};
pub use registry::{SlaveRegistry, SlaveState};
pub use connection::{ConnectionGraph, Coupling, CouplingSpec, Endpoint};
pub use master::{MasterLoop, MasterState, SimulationClock};
pub use output::{CsvResultSink, MemorySink, ResultSink};
pub use report::{RunReport, SlaveReport, Timer};
pub use config::{ConfigError, MasterConfig, MasterConfigBuilder};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// takes precedence over `level`.
///
/// # Example
///
/// ```rust,ignore
/// cosim::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

//! The master orchestration loop.
//!
//! `MasterLoop` drives a [`SlaveRegistry`] through one run:
//!
//! ```text
//! Created → AllInstantiated → AllInitialized → Running → Terminated
//!                 └───────────────┴──────────────┴──→ Aborted
//! ```
//!
//! Each macro step first propagates every coupling for the current time,
//! then steps every slave by the fixed step size in index order, advances
//! the clock, and finally emits one result row per slave. A failing step
//! aborts immediately: no row is written for that step and every instance
//! is still terminated and disposed.
//!
//! # Example
//!
//! ```
//! use cosim::connection::{ConnectionGraph, CouplingSpec};
//! use cosim::master::MasterLoop;
//! use cosim::mock::MockComponent;
//! use cosim::output::MemorySink;
//! use cosim::registry::SlaveRegistry;
//!
//! let mut registry = SlaveRegistry::new();
//! registry.add(Box::new(MockComponent::ramp("source")));
//! registry.add(Box::new(MockComponent::gain("sink", 2.0)));
//! let graph = ConnectionGraph::build(&[CouplingSpec::new(0, 0, 1, 0)], &registry).unwrap();
//!
//! let mut sink = MemorySink::new();
//! let report = MasterLoop::new(&mut registry, &graph, 1.0, 0.25)
//!     .unwrap()
//!     .run(&mut sink)
//!     .unwrap();
//! assert_eq!(report.steps, 4);
//! assert_eq!(sink.table(1).unwrap().rows.len(), 5);
//! ```

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionGraph, PropagationStats};
use crate::error::{MasterError, MasterResult};
use crate::output::ResultSink;
use crate::registry::SlaveRegistry;
use crate::report::{RunReport, SlaveReport, Timer};
use crate::types::SimTime;

/// Relative slack when dividing the run length by the step size, so that a
/// quotient rounded a hair above an integer `k` still plans `k` steps.
const STEP_COUNT_TOLERANCE: f64 = 1e-12;

/// Current time, fixed step size and end time of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationClock {
    start: SimTime,
    time: SimTime,
    step_size: SimTime,
    end: SimTime,
    taken: u64,
    planned: u64,
}

impl SimulationClock {
    /// Creates a clock at `start`.
    ///
    /// Fails unless all values are finite, `step_size > 0` and `end > start`.
    pub fn new(start: SimTime, end: SimTime, step_size: SimTime) -> MasterResult<Self> {
        if !(start.is_finite() && end.is_finite() && step_size.is_finite()) {
            return Err(MasterError::InvalidClock(format!(
                "start {start}, end {end} and step size {step_size} must be finite"
            )));
        }
        if step_size <= 0.0 {
            return Err(MasterError::InvalidClock(format!(
                "step size must be positive, got {step_size}"
            )));
        }
        if end <= start {
            return Err(MasterError::InvalidClock(format!(
                "end time {end} must be after start time {start}"
            )));
        }
        let steps = (end - start) / step_size;
        Ok(Self {
            start,
            time: start,
            step_size,
            end,
            taken: 0,
            planned: (steps - steps * STEP_COUNT_TOLERANCE).ceil().max(1.0) as u64,
        })
    }

    pub fn start(&self) -> SimTime {
        self.start
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn step_size(&self) -> SimTime {
        self.step_size
    }

    pub fn end(&self) -> SimTime {
        self.end
    }

    /// Returns the number of macro steps the run takes to reach `end`.
    pub fn planned_steps(&self) -> u64 {
        self.planned
    }

    /// Returns true while another macro step is due.
    ///
    /// The step count is fixed up front: the smallest `k` with
    /// `start + k·h >= end`. Time itself is accumulated without
    /// re-synchronisation to the step grid, so drift in the sum never adds
    /// or drops a step.
    pub fn is_running(&self) -> bool {
        self.taken < self.planned
    }

    /// Advances time by one step and returns the new time.
    pub fn advance(&mut self) -> SimTime {
        self.time += self.step_size;
        self.taken += 1;
        self.time
    }
}

/// Lifecycle state of the master loop.
#[derive(Clone, Debug, PartialEq)]
pub enum MasterState {
    Created,
    AllInstantiated,
    AllInitialized,
    Running,
    Terminated,
    Aborted { reason: String },
}

impl MasterState {
    /// Returns true for `Terminated` and `Aborted`.
    pub fn is_final(&self) -> bool {
        matches!(self, MasterState::Terminated | MasterState::Aborted { .. })
    }
}

impl fmt::Display for MasterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterState::Created => f.write_str("created"),
            MasterState::AllInstantiated => f.write_str("all instantiated"),
            MasterState::AllInitialized => f.write_str("all initialized"),
            MasterState::Running => f.write_str("running"),
            MasterState::Terminated => f.write_str("terminated"),
            MasterState::Aborted { reason } => write!(f, "aborted ({reason})"),
        }
    }
}

/// The fixed-step co-simulation master.
///
/// Borrows the registry and the connection graph for the duration of the
/// run and owns the simulation clock.
pub struct MasterLoop<'a> {
    registry: &'a mut SlaveRegistry,
    graph: &'a ConnectionGraph,
    clock: SimulationClock,
    state: MasterState,
    logging_on: bool,
    steps: u64,
    rows: u64,
    propagation: PropagationStats,
}

impl<'a> MasterLoop<'a> {
    /// Creates a master for a run over `[0, end_time]` with step `step_size`.
    pub fn new(
        registry: &'a mut SlaveRegistry,
        graph: &'a ConnectionGraph,
        end_time: SimTime,
        step_size: SimTime,
    ) -> MasterResult<Self> {
        Ok(Self {
            registry,
            graph,
            clock: SimulationClock::new(0.0, end_time, step_size)?,
            state: MasterState::Created,
            logging_on: false,
            steps: 0,
            rows: 0,
            propagation: PropagationStats::default(),
        })
    }

    /// Enables component debug logging at instantiation.
    pub fn with_logging(mut self, logging_on: bool) -> Self {
        self.logging_on = logging_on;
        self
    }

    /// Returns the current state.
    pub fn state(&self) -> &MasterState {
        &self.state
    }

    /// Returns the simulation clock.
    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    /// Returns the number of completed macro steps.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Runs the co-simulation to completion.
    ///
    /// On failure every instantiated slave is terminated and disposed, the
    /// sink is closed, and the error names the failing slave and operation.
    pub fn run(&mut self, sink: &mut dyn ResultSink) -> MasterResult<RunReport> {
        if self.state != MasterState::Created {
            return Err(MasterError::Lifecycle {
                state: self.state.to_string(),
            });
        }

        let timer = Timer::start();
        match self.execute(sink) {
            Ok(mut report) => {
                report.wall_time_ms = timer.elapsed_ms();
                info!(
                    steps = report.steps,
                    final_time = report.final_time,
                    wall_time_ms = report.wall_time_ms,
                    "simulation finished"
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    slave = ?err.slave(),
                    operation = err.operation(),
                    time = self.clock.time(),
                    "simulation aborted: {err}"
                );
                self.state = MasterState::Aborted {
                    reason: err.to_string(),
                };
                self.registry.terminate_and_dispose_all();
                if let Err(close_err) = sink.close() {
                    warn!("could not close result streams: {close_err}");
                }
                Err(err)
            }
        }
    }

    fn execute(&mut self, sink: &mut dyn ResultSink) -> MasterResult<RunReport> {
        info!(
            slaves = self.registry.len(),
            couplings = self.graph.active_count(),
            end_time = self.clock.end(),
            step_size = self.clock.step_size(),
            "starting co-simulation"
        );

        self.registry.instantiate_all(self.logging_on)?;
        self.state = MasterState::AllInstantiated;

        for index in 0..self.registry.len() {
            let name = self.registry.name(index).unwrap_or_default().to_string();
            sink.open(index, &name, &self.registry.column_names(index))?;
        }
        self.registry.initialize_all(self.clock.start(), self.clock.end())?;
        self.emit_rows(sink)?;
        self.state = MasterState::AllInitialized;

        self.state = MasterState::Running;
        while self.clock.is_running() {
            self.step(sink)?;
        }

        let teardown = self.registry.terminate_and_dispose_all();
        debug!(released = teardown.released, "slaves terminated");
        let artifacts = sink.close()?;
        self.state = MasterState::Terminated;

        Ok(self.report(artifacts))
    }

    fn step(&mut self, sink: &mut dyn ResultSink) -> MasterResult<()> {
        let time = self.clock.time();
        let stats = self.graph.propagate(self.registry)?;
        self.propagation.transferred += stats.transferred;
        self.propagation.failed += stats.failed;

        self.registry.step_all(time, self.clock.step_size())?;
        let now = self.clock.advance();
        self.steps += 1;
        debug!(step = self.steps, time = now, "macro step completed");

        self.emit_rows(sink)
    }

    fn emit_rows(&mut self, sink: &mut dyn ResultSink) -> MasterResult<()> {
        let time = self.clock.time();
        for index in 0..self.registry.len() {
            let row = self.registry.read_row(index)?;
            sink.write_row(index, time, &row)?;
        }
        self.rows += 1;
        Ok(())
    }

    fn report(&self, artifacts: Vec<String>) -> RunReport {
        let mut artifacts = artifacts.into_iter();
        let slaves = (0..self.registry.len())
            .map(|index| SlaveReport {
                index,
                name: self.registry.name(index).unwrap_or_default().to_string(),
                artifact: artifacts.next(),
            })
            .collect();
        RunReport {
            start_time: self.clock.start(),
            end_time: self.clock.end(),
            step_size: self.clock.step_size(),
            steps: self.steps,
            final_time: self.clock.time(),
            rows_per_slave: self.rows,
            couplings_active: self.graph.active_count(),
            couplings_disabled: self.graph.disabled().len(),
            values_propagated: self.propagation.transferred,
            propagation_failures: self.propagation.failed,
            wall_time_ms: 0.0,
            slaves,
        }
    }
}

//! Slave registry and lifecycle driver.
//!
//! The registry exclusively owns every slave of a run, one entry per
//! slave, and drives them through
//! `Loaded → Instantiated → Initialized → Terminated`.
//!
//! # Example
//!
//! ```
//! use cosim::mock::MockComponent;
//! use cosim::registry::SlaveRegistry;
//!
//! let mut registry = SlaveRegistry::new();
//! registry.add(Box::new(MockComponent::ramp("ramp")));
//!
//! registry.instantiate_all(false).unwrap();
//! registry.initialize_all(0.0, 1.0).unwrap();
//! registry.step_all(0.0, 0.5).unwrap();
//! registry.terminate_and_dispose_all();
//! ```

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info, warn};

use crate::error::{LoadError, MasterError, MasterResult};
use crate::slave::{
    InstanceGuard, InstantiateParams, SlaveComponent, SlaveDescriptor, SlaveInstance, SlaveLoader,
    DEFAULT_TIMEOUT_MS, MIME_TYPE,
};
use crate::types::{ScalarType, ScalarValue, SimTime, SlaveIndex, Status, ValueReference};
use crate::variable::VariableTable;

/// Lifecycle state of a single slave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlaveState {
    /// Entry points resolved, no instance yet
    Loaded,
    /// Instance created, not yet initialized
    Instantiated,
    /// Ready to be stepped
    Initialized,
    /// Instance terminated and disposed
    Terminated,
}

impl fmt::Display for SlaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlaveState::Loaded => "loaded",
            SlaveState::Instantiated => "instantiated",
            SlaveState::Initialized => "initialized",
            SlaveState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Everything the master knows about one slave.
struct SlaveEntry {
    name: String,
    // Dropped before `component`, so instances never outlive their library.
    instance: Option<InstanceGuard>,
    component: Box<dyn SlaveComponent>,
    state: SlaveState,
}

/// Summary of a teardown pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Slaves whose instance was released in this pass
    pub released: usize,
    /// Slaves whose terminate call reported a fatal status
    pub terminate_failures: Vec<SlaveIndex>,
}

/// Owner of all slaves of a run.
#[derive(Default)]
pub struct SlaveRegistry {
    slaves: Vec<SlaveEntry>,
    tolerate_step_warnings: bool,
}

impl SlaveRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves every descriptor through `loader`, in order.
    ///
    /// Nothing is instantiated yet.
    pub fn load(descriptors: &[SlaveDescriptor], loader: &dyn SlaveLoader) -> Result<Self, LoadError> {
        let mut registry = Self::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            let component = loader
                .load(index, descriptor)
                .map_err(|err| err.for_slave(index, descriptor.display_name()))?;
            info!(
                slave = index,
                model = component.model_identifier(),
                variables = component.variables().len(),
                "slave loaded"
            );
            registry.add_named(descriptor.display_name(), component);
        }
        Ok(registry)
    }

    /// Adds a loaded component, named after its model identifier.
    pub fn add(&mut self, component: Box<dyn SlaveComponent>) -> SlaveIndex {
        let name = component.model_identifier().to_string();
        self.add_named(&name, component)
    }

    /// Adds a loaded component under the given name.
    ///
    /// Names double as instance names and must be unique within a run, so
    /// a clashing name gets the slave index appended.
    pub fn add_named(&mut self, name: &str, component: Box<dyn SlaveComponent>) -> SlaveIndex {
        let index = self.slaves.len();
        let taken: HashSet<&str> = self.slaves.iter().map(|s| s.name.as_str()).collect();
        let name = if taken.contains(name) {
            format!("{name}_{index}")
        } else {
            name.to_string()
        };
        self.slaves.push(SlaveEntry {
            name,
            instance: None,
            component,
            state: SlaveState::Loaded,
        });
        index
    }

    /// Treats a `Warning` step status as success instead of aborting.
    pub fn with_step_warnings_tolerated(mut self, tolerate: bool) -> Self {
        self.tolerate_step_warnings = tolerate;
        self
    }

    /// Returns the number of slaves.
    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    /// Returns true if no slaves are registered.
    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }

    /// Returns the unique name of a slave.
    pub fn name(&self, index: SlaveIndex) -> Option<&str> {
        self.slaves.get(index).map(|s| s.name.as_str())
    }

    /// Returns the lifecycle state of a slave.
    pub fn state(&self, index: SlaveIndex) -> Option<SlaveState> {
        self.slaves.get(index).map(|s| s.state)
    }

    /// Returns the variable table of a slave.
    pub fn variables(&self, index: SlaveIndex) -> Option<&VariableTable> {
        self.slaves.get(index).map(|s| s.component.variables())
    }

    /// Returns the result column names of a slave: its canonical variables.
    pub fn column_names(&self, index: SlaveIndex) -> Vec<String> {
        self.variables(index)
            .map(|table| table.canonical().map(|v| v.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Instantiates every slave in index order.
    ///
    /// Stops at the first slave that returns no instance. Slaves
    /// instantiated before it keep their instance until the caller runs
    /// [`SlaveRegistry::terminate_and_dispose_all`] (or drops the registry).
    pub fn instantiate_all(&mut self, logging_on: bool) -> MasterResult<()> {
        for (index, slave) in self.slaves.iter_mut().enumerate() {
            slave.expect_state(index, SlaveState::Loaded, "instantiate")?;
            let component = &slave.component;
            let params = InstantiateParams {
                instance_name: &slave.name,
                guid: component.guid(),
                location: component.location(),
                mime_type: MIME_TYPE,
                timeout_ms: DEFAULT_TIMEOUT_MS,
                visible: false,
                interactive: false,
                logging_on,
            };
            let instance = component.instantiate(&params).ok_or_else(|| MasterError::Instantiation {
                slave: index,
                name: slave.name.clone(),
            })?;
            slave.instance = Some(InstanceGuard::new(slave.name.clone(), instance));
            slave.state = SlaveState::Instantiated;
            debug!(slave = index, name = %slave.name, "slave instantiated");
        }
        Ok(())
    }

    /// Initializes every slave for a run over `[t_start, t_end]`.
    ///
    /// Any status worse than `Warning` aborts with the offending index.
    pub fn initialize_all(&mut self, t_start: SimTime, t_end: SimTime) -> MasterResult<()> {
        for (index, slave) in self.slaves.iter_mut().enumerate() {
            slave.expect_state(index, SlaveState::Instantiated, "initialize")?;
            let status = slave
                .instance_mut(index, "initialize")?
                .initialize(t_start, true, t_end);
            if status.is_fatal() {
                return Err(MasterError::Initialization {
                    slave: index,
                    name: slave.name.clone(),
                    status,
                });
            }
            if status == Status::Warning {
                warn!(slave = index, name = %slave.name, "initialize returned a warning");
            }
            if let Some(guard) = slave.instance.as_mut() {
                guard.mark_initialized();
            }
            slave.state = SlaveState::Initialized;
        }
        Ok(())
    }

    /// Steps every slave from `time` by `step_size`, in index order.
    ///
    /// The first non-OK status aborts; slaves after the failing one are not
    /// stepped for this interval.
    pub fn step_all(&mut self, time: SimTime, step_size: SimTime) -> MasterResult<()> {
        let tolerate = self.tolerate_step_warnings;
        for (index, slave) in self.slaves.iter_mut().enumerate() {
            slave.expect_state(index, SlaveState::Initialized, "step")?;
            let status = slave
                .instance_mut(index, "step")?
                .do_step(time, step_size, true);
            let accepted = status == Status::Ok || (tolerate && status == Status::Warning);
            if !accepted {
                return Err(MasterError::Step {
                    slave: index,
                    name: slave.name.clone(),
                    time,
                    status,
                });
            }
        }
        Ok(())
    }

    /// Terminates and disposes every slave still holding an instance.
    ///
    /// Best effort: a failing slave never prevents the others from being
    /// released, and nothing is propagated to the caller.
    pub fn terminate_and_dispose_all(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        for (index, slave) in self.slaves.iter_mut().enumerate() {
            let Some(mut guard) = slave.instance.take() else {
                continue;
            };
            if let Some(status) = guard.release() {
                if status.is_fatal() {
                    report.terminate_failures.push(index);
                }
            }
            slave.state = SlaveState::Terminated;
            report.released += 1;
        }
        if !report.terminate_failures.is_empty() {
            warn!(slaves = ?report.terminate_failures, "some slaves failed to terminate");
        }
        report
    }

    /// Reads one scalar from a slave.
    pub fn get_value(
        &mut self,
        index: SlaveIndex,
        ty: ScalarType,
        value_ref: ValueReference,
    ) -> MasterResult<(Status, ScalarValue)> {
        Ok(self.live_instance(index, "get")?.get_value(ty, value_ref))
    }

    /// Writes one scalar to a slave.
    pub fn set_value(
        &mut self,
        index: SlaveIndex,
        value_ref: ValueReference,
        value: &ScalarValue,
    ) -> MasterResult<Status> {
        Ok(self.live_instance(index, "set")?.set_value(value_ref, value))
    }

    /// Reads every canonical variable of a slave, in table order.
    ///
    /// A variable that cannot be read is logged and reported as its type's
    /// zero value, so result rows always have one cell per column.
    pub fn read_row(&mut self, index: SlaveIndex) -> MasterResult<Vec<ScalarValue>> {
        let slave = self.entry_mut(index, "read")?;
        let refs: Vec<(ScalarType, ValueReference)> = slave
            .component
            .variables()
            .canonical()
            .map(|v| (v.scalar_type, v.value_reference))
            .collect();
        let name = slave.name.clone();
        let instance = slave.instance_mut(index, "read")?;
        let row = refs
            .into_iter()
            .map(|(ty, vr)| {
                let (status, value) = instance.get_value(ty, vr);
                if status.is_fatal() {
                    warn!(slave = index, name = %name, value_ref = vr, %status, "could not read variable");
                    ScalarValue::default_for(ty)
                } else {
                    value
                }
            })
            .collect();
        Ok(row)
    }

    fn entry_mut(&mut self, index: SlaveIndex, operation: &'static str) -> MasterResult<&mut SlaveEntry> {
        let count = self.slaves.len();
        self.slaves.get_mut(index).ok_or_else(|| MasterError::InvalidState {
            slave: index,
            name: String::new(),
            operation,
            state: format!("out of range (registry holds {count} slaves)"),
        })
    }

    fn live_instance(
        &mut self,
        index: SlaveIndex,
        operation: &'static str,
    ) -> MasterResult<&mut (dyn SlaveInstance + 'static)> {
        self.entry_mut(index, operation)?.instance_mut(index, operation)
    }
}

impl SlaveEntry {
    fn expect_state(&self, index: SlaveIndex, expected: SlaveState, operation: &'static str) -> MasterResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid_state(index, operation))
        }
    }

    fn invalid_state(&self, index: SlaveIndex, operation: &'static str) -> MasterError {
        MasterError::InvalidState {
            slave: index,
            name: self.name.clone(),
            operation,
            state: self.state.to_string(),
        }
    }

    fn instance_mut(
        &mut self,
        index: SlaveIndex,
        operation: &'static str,
    ) -> MasterResult<&mut (dyn SlaveInstance + 'static)> {
        let (name, state) = (&self.name, self.state);
        self.instance
            .as_mut()
            .and_then(InstanceGuard::get_mut)
            .ok_or_else(|| MasterError::InvalidState {
                slave: index,
                name: name.clone(),
                operation,
                state: state.to_string(),
            })
    }
}

impl Drop for SlaveRegistry {
    fn drop(&mut self) {
        let report = self.terminate_and_dispose_all();
        if report.released > 0 {
            debug!(released = report.released, "registry dropped with live instances");
        }
    }
}

impl fmt::Debug for SlaveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlaveRegistry")
            .field(
                "slaves",
                &self
                    .slaves
                    .iter()
                    .map(|s| (s.name.as_str(), s.state))
                    .collect::<Vec<_>>(),
            )
            .field("tolerate_step_warnings", &self.tolerate_step_warnings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockComponent, MockJournal};

    #[test]
    fn test_registry_basic() {
        let mut registry = SlaveRegistry::new();
        assert!(registry.is_empty());

        let index = registry.add(Box::new(MockComponent::ramp("ramp")));
        assert_eq!(index, 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.name(0), Some("ramp"));
        assert_eq!(registry.state(0), Some(SlaveState::Loaded));
        assert_eq!(registry.column_names(0), vec!["y".to_string()]);
        assert!(registry.state(1).is_none());
    }

    #[test]
    fn test_duplicate_names_get_index_suffix() {
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(MockComponent::ramp("ramp")));
        registry.add(Box::new(MockComponent::ramp("ramp")));
        assert_eq!(registry.name(0), Some("ramp"));
        assert_eq!(registry.name(1), Some("ramp_1"));
    }

    #[test]
    fn test_lifecycle_in_index_order() {
        let journal = MockJournal::new();
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(MockComponent::ramp("a").with_journal(journal.clone())));
        registry.add(Box::new(MockComponent::ramp("b").with_journal(journal.clone())));

        registry.instantiate_all(true).unwrap();
        assert_eq!(registry.state(1), Some(SlaveState::Instantiated));
        registry.initialize_all(0.0, 1.0).unwrap();
        registry.step_all(0.0, 0.5).unwrap();
        let report = registry.terminate_and_dispose_all();

        assert_eq!(report.released, 2);
        assert_eq!(registry.state(0), Some(SlaveState::Terminated));
        assert_eq!(
            journal.calls(),
            vec![
                MockCall::Instantiate("a".into()),
                MockCall::Instantiate("b".into()),
                MockCall::Initialize("a".into()),
                MockCall::Initialize("b".into()),
                MockCall::Step("a".into(), 0.0),
                MockCall::Step("b".into(), 0.0),
                MockCall::Terminate("a".into()),
                MockCall::Dispose("a".into()),
                MockCall::Terminate("b".into()),
                MockCall::Dispose("b".into()),
            ]
        );
    }

    #[test]
    fn test_instantiation_failure_names_index() {
        let first = MockComponent::ramp("a");
        let first_monitor = first.monitor();
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(first));
        registry.add(Box::new(MockComponent::ramp("b").refuse_instantiation()));

        let err = registry.instantiate_all(false).unwrap_err();
        assert!(matches!(err, MasterError::Instantiation { slave: 1, .. }));
        assert_eq!(registry.state(0), Some(SlaveState::Instantiated));

        registry.terminate_and_dispose_all();
        assert_eq!(first_monitor.terminate_count(), 0);
        assert_eq!(first_monitor.dispose_count(), 1);
    }

    #[test]
    fn test_initialize_warning_is_accepted() {
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(
            MockComponent::ramp("a").with_initialize_status(Status::Warning),
        ));
        registry.instantiate_all(false).unwrap();
        registry.initialize_all(0.0, 1.0).unwrap();
        assert_eq!(registry.state(0), Some(SlaveState::Initialized));
    }

    #[test]
    fn test_initialize_error_is_fatal() {
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(MockComponent::ramp("a")));
        registry.add(Box::new(
            MockComponent::ramp("b").with_initialize_status(Status::Discard),
        ));
        registry.instantiate_all(false).unwrap();
        let err = registry.initialize_all(0.0, 1.0).unwrap_err();
        assert!(matches!(
            err,
            MasterError::Initialization { slave: 1, status: Status::Discard, .. }
        ));
    }

    #[test]
    fn test_step_warning_policy() {
        let mut strict = SlaveRegistry::new();
        strict.add(Box::new(MockComponent::ramp("a").fail_step_at(0, Status::Warning)));
        strict.instantiate_all(false).unwrap();
        strict.initialize_all(0.0, 1.0).unwrap();
        assert!(matches!(
            strict.step_all(0.0, 0.1),
            Err(MasterError::Step { slave: 0, status: Status::Warning, .. })
        ));

        let mut lenient = SlaveRegistry::new().with_step_warnings_tolerated(true);
        lenient.add(Box::new(MockComponent::ramp("a").fail_step_at(0, Status::Warning)));
        lenient.instantiate_all(false).unwrap();
        lenient.initialize_all(0.0, 1.0).unwrap();
        assert!(lenient.step_all(0.0, 0.1).is_ok());
    }

    #[test]
    fn test_step_failure_stops_later_slaves() {
        let later = MockComponent::ramp("c");
        let later_monitor = later.monitor();
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(MockComponent::ramp("a")));
        registry.add(Box::new(MockComponent::ramp("b").fail_step_at(0, Status::Error)));
        registry.add(Box::new(later));
        registry.instantiate_all(false).unwrap();
        registry.initialize_all(0.0, 1.0).unwrap();

        let err = registry.step_all(0.0, 0.1).unwrap_err();
        assert_eq!(err.slave(), Some(1));
        assert_eq!(later_monitor.step_count(), 0);
    }

    #[test]
    fn test_step_before_initialize_is_rejected() {
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(MockComponent::ramp("a")));
        registry.instantiate_all(false).unwrap();
        let err = registry.step_all(0.0, 0.1).unwrap_err();
        assert!(matches!(err, MasterError::InvalidState { operation: "step", .. }));
    }

    #[test]
    fn test_read_row_and_values() {
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(MockComponent::gain("g", 3.0)));
        registry.instantiate_all(false).unwrap();
        registry.initialize_all(0.0, 1.0).unwrap();

        registry.set_value(0, 0, &ScalarValue::Real(2.0)).unwrap();
        registry.step_all(0.0, 0.1).unwrap();

        let (status, value) = registry.get_value(0, ScalarType::Real, 1).unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(value, ScalarValue::Real(6.0));
        assert_eq!(
            registry.read_row(0).unwrap(),
            vec![ScalarValue::Real(2.0), ScalarValue::Real(6.0)]
        );
    }

    #[test]
    fn test_drop_releases_instances() {
        let component = MockComponent::ramp("a");
        let monitor = component.monitor();
        {
            let mut registry = SlaveRegistry::new();
            registry.add(Box::new(component));
            registry.instantiate_all(false).unwrap();
            registry.initialize_all(0.0, 1.0).unwrap();
        }
        assert_eq!(monitor.terminate_count(), 1);
        assert_eq!(monitor.dispose_count(), 1);
    }

    #[test]
    fn test_teardown_continues_past_terminate_failure() {
        let failing = MockComponent::ramp("a").with_terminate_status(Status::Error);
        let healthy = MockComponent::ramp("b");
        let (fp, hp) = (failing.monitor(), healthy.monitor());

        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(failing));
        registry.add(Box::new(healthy));
        registry.instantiate_all(false).unwrap();
        registry.initialize_all(0.0, 1.0).unwrap();

        let report = registry.terminate_and_dispose_all();
        assert_eq!(report.released, 2);
        assert_eq!(report.terminate_failures, vec![0]);

        assert_eq!(fp.terminate_count(), 1);
        assert_eq!(fp.dispose_count(), 1);
        assert_eq!(hp.terminate_count(), 1);
        assert_eq!(hp.dispose_count(), 1);
        assert_eq!(registry.state(0), Some(SlaveState::Terminated));
        assert_eq!(registry.state(1), Some(SlaveState::Terminated));

        // A second pass has nothing left to release.
        let again = registry.terminate_and_dispose_all();
        assert_eq!(again.released, 0);
        assert_eq!(fp.dispose_count(), 1);
    }

    #[test]
    fn test_native_load_failure_names_slave() {
        let descriptors = [
            SlaveDescriptor::new("/nonexistent/a.so", "a", "{a}").with_name("plant"),
        ];
        let err = SlaveRegistry::load(&descriptors, &crate::native::NativeLoader).unwrap_err();
        assert_eq!(err.slave(), Some(0));
        assert!(err.to_string().starts_with("slave 0 (plant): could not load library"));

        let err = MasterError::from(err);
        assert_eq!(err.slave(), Some(0));
        assert_eq!(err.operation(), "load");
    }
}

//! Mock slave implementations for testing.
//!
//! These components live entirely in-process and provide simple,
//! predictable behaviours. Every component shares its state with a
//! [`MockMonitor`] so tests can inspect variable values and lifecycle call
//! counts after the registry has taken ownership of the component.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::slave::{InstantiateParams, SlaveComponent, SlaveInstance};
use crate::types::{ScalarType, ScalarValue, SimTime, Status, ValueReference};
use crate::variable::{VariableDescriptor, VariableTable};

/// Variable storage of a mock instance, keyed by value reference.
pub type MockValues = HashMap<ValueReference, ScalarValue>;

/// Step behaviour: `(values, time, step_size)`.
pub type StepFn = Arc<dyn Fn(&mut MockValues, SimTime, SimTime) + Send + Sync>;

/// A call observed by a [`MockJournal`].
#[derive(Clone, Debug, PartialEq)]
pub enum MockCall {
    Instantiate(String),
    Initialize(String),
    Get(String, ValueReference),
    Set(String, ValueReference, ScalarValue),
    Step(String, SimTime),
    Terminate(String),
    Dispose(String),
}

/// Call log shared by several mock components, to check cross-slave ordering.
#[derive(Clone, Debug, Default)]
pub struct MockJournal {
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    /// Returns a copy of all recorded calls in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }
}

#[derive(Debug, Default)]
struct MockState {
    values: MockValues,
    instantiated: u32,
    initialized: u32,
    step_times: Vec<SimTime>,
    terminated: u32,
    disposed: u32,
    writes: u64,
}

/// Read access to a mock component's state.
#[derive(Clone, Debug, Default)]
pub struct MockMonitor {
    state: Arc<Mutex<MockState>>,
}

impl MockMonitor {
    /// Returns the current value of a variable.
    pub fn value(&self, value_ref: ValueReference) -> Option<ScalarValue> {
        self.state.lock().values.get(&value_ref).cloned()
    }

    /// Overwrites a variable from outside the instance.
    pub fn set_value(&self, value_ref: ValueReference, value: ScalarValue) {
        self.state.lock().values.insert(value_ref, value);
    }

    /// Start times of every successful step call.
    pub fn step_times(&self) -> Vec<SimTime> {
        self.state.lock().step_times.clone()
    }

    pub fn step_count(&self) -> usize {
        self.state.lock().step_times.len()
    }

    pub fn instantiate_count(&self) -> u32 {
        self.state.lock().instantiated
    }

    pub fn initialize_count(&self) -> u32 {
        self.state.lock().initialized
    }

    pub fn terminate_count(&self) -> u32 {
        self.state.lock().terminated
    }

    pub fn dispose_count(&self) -> u32 {
        self.state.lock().disposed
    }

    /// Number of values written through the setters.
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }
}

/// A scriptable in-process component.
pub struct MockComponent {
    model_identifier: String,
    guid: String,
    variables: VariableTable,
    monitor: MockMonitor,
    step_fn: Option<StepFn>,
    refuse_instantiation: bool,
    initialize_status: Status,
    terminate_status: Status,
    step_failure: Option<(usize, Status)>,
    journal: Option<MockJournal>,
}

impl MockComponent {
    /// Creates a component whose canonical variables start at their zero value.
    pub fn new(model_identifier: impl Into<String>, variables: Vec<VariableDescriptor>) -> Self {
        let model_identifier = model_identifier.into();
        let variables = VariableTable::new(variables);
        let monitor = MockMonitor::default();
        {
            let mut state = monitor.state.lock();
            for var in variables.canonical() {
                state
                    .values
                    .insert(var.value_reference, ScalarValue::default_for(var.scalar_type));
            }
        }
        Self {
            guid: format!("{{mock-{model_identifier}}}"),
            model_identifier,
            variables,
            monitor,
            step_fn: None,
            refuse_instantiation: false,
            initialize_status: Status::Ok,
            terminate_status: Status::Ok,
            step_failure: None,
            journal: None,
        }
    }

    /// A component whose real output `y` (ref 0) tracks the end of each step.
    pub fn ramp(model_identifier: impl Into<String>) -> Self {
        Self::new(
            model_identifier,
            vec![VariableDescriptor::new("y", 0, ScalarType::Real)],
        )
        .with_step(|values, time, h| {
            values.insert(0, ScalarValue::Real(time + h));
        })
    }

    /// A component computing `y = k * u` with input `u` (ref 0) and output `y` (ref 1).
    pub fn gain(model_identifier: impl Into<String>, k: f64) -> Self {
        Self::new(
            model_identifier,
            vec![
                VariableDescriptor::new("u", 0, ScalarType::Real),
                VariableDescriptor::new("y", 1, ScalarType::Real),
            ],
        )
        .with_step(move |values, _time, _h| {
            let u = values.get(&0).and_then(ScalarValue::as_real).unwrap_or(0.0);
            values.insert(1, ScalarValue::Real(k * u));
        })
    }

    /// Returns a monitor sharing this component's state.
    pub fn monitor(&self) -> MockMonitor {
        self.monitor.clone()
    }

    /// Sets the initial value of a variable.
    pub fn with_value(self, value_ref: ValueReference, value: ScalarValue) -> Self {
        self.monitor.set_value(value_ref, value);
        self
    }

    /// Sets the step behaviour.
    pub fn with_step<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut MockValues, SimTime, SimTime) + Send + Sync + 'static,
    {
        self.step_fn = Some(Arc::new(f));
        self
    }

    /// Makes instantiation return no instance.
    pub fn refuse_instantiation(mut self) -> Self {
        self.refuse_instantiation = true;
        self
    }

    /// Sets the status returned by initialize.
    pub fn with_initialize_status(mut self, status: Status) -> Self {
        self.initialize_status = status;
        self
    }

    /// Sets the status returned by terminate.
    pub fn with_terminate_status(mut self, status: Status) -> Self {
        self.terminate_status = status;
        self
    }

    /// Makes the step call with the given 0-based index return `status`.
    pub fn fail_step_at(mut self, step: usize, status: Status) -> Self {
        self.step_failure = Some((step, status));
        self
    }

    /// Records every call into the given journal.
    pub fn with_journal(mut self, journal: MockJournal) -> Self {
        self.journal = Some(journal);
        self
    }
}

impl SlaveComponent for MockComponent {
    fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    fn guid(&self) -> &str {
        &self.guid
    }

    fn variables(&self) -> &VariableTable {
        &self.variables
    }

    fn instantiate(&self, params: &InstantiateParams<'_>) -> Option<Box<dyn SlaveInstance>> {
        if let Some(journal) = &self.journal {
            journal.record(MockCall::Instantiate(params.instance_name.to_string()));
        }
        if self.refuse_instantiation {
            return None;
        }
        self.monitor.state.lock().instantiated += 1;
        Some(Box::new(MockInstance {
            name: params.instance_name.to_string(),
            state: self.monitor.state.clone(),
            step_fn: self.step_fn.clone(),
            initialize_status: self.initialize_status,
            terminate_status: self.terminate_status,
            step_failure: self.step_failure,
            steps_called: 0,
            journal: self.journal.clone(),
        }))
    }
}

struct MockInstance {
    name: String,
    state: Arc<Mutex<MockState>>,
    step_fn: Option<StepFn>,
    initialize_status: Status,
    terminate_status: Status,
    step_failure: Option<(usize, Status)>,
    steps_called: usize,
    journal: Option<MockJournal>,
}

impl MockInstance {
    fn record(&self, call: MockCall) {
        if let Some(journal) = &self.journal {
            journal.record(call);
        }
    }

    fn read<T>(
        &mut self,
        refs: &[ValueReference],
        values: &mut [T],
        extract: impl Fn(&ScalarValue) -> Option<T>,
    ) -> Status {
        for (vr, slot) in refs.iter().zip(values.iter_mut()) {
            self.record(MockCall::Get(self.name.clone(), *vr));
            let state = self.state.lock();
            match state.values.get(vr).and_then(&extract) {
                Some(v) => *slot = v,
                None => return Status::Error,
            }
        }
        Status::Ok
    }

    fn write(&mut self, refs: &[ValueReference], values: impl Iterator<Item = ScalarValue>) -> Status {
        for (vr, value) in refs.iter().zip(values) {
            self.record(MockCall::Set(self.name.clone(), *vr, value.clone()));
            let mut state = self.state.lock();
            // Integer writes keep an enumeration's tag.
            let value = match (state.values.get(vr), value) {
                (Some(ScalarValue::Enumeration(_)), ScalarValue::Integer(v)) => ScalarValue::Enumeration(v),
                (_, value) => value,
            };
            state.values.insert(*vr, value);
            state.writes += 1;
        }
        Status::Ok
    }
}

impl SlaveInstance for MockInstance {
    fn initialize(&mut self, _t_start: SimTime, _stop_time_defined: bool, _t_stop: SimTime) -> Status {
        self.record(MockCall::Initialize(self.name.clone()));
        self.state.lock().initialized += 1;
        self.initialize_status
    }

    fn do_step(&mut self, time: SimTime, step_size: SimTime, _new_step: bool) -> Status {
        let call = self.steps_called;
        self.steps_called += 1;
        self.record(MockCall::Step(self.name.clone(), time));
        if let Some((at, status)) = self.step_failure {
            if at == call {
                return status;
            }
        }
        let mut state = self.state.lock();
        if let Some(step_fn) = &self.step_fn {
            step_fn(&mut state.values, time, step_size);
        }
        state.step_times.push(time);
        Status::Ok
    }

    fn terminate(&mut self) -> Status {
        self.record(MockCall::Terminate(self.name.clone()));
        self.state.lock().terminated += 1;
        self.terminate_status
    }

    fn dispose(&mut self) {
        self.record(MockCall::Dispose(self.name.clone()));
        self.state.lock().disposed += 1;
    }

    fn get_real(&mut self, refs: &[ValueReference], values: &mut [f64]) -> Status {
        self.read(refs, values, ScalarValue::as_real)
    }

    fn get_integer(&mut self, refs: &[ValueReference], values: &mut [i32]) -> Status {
        self.read(refs, values, ScalarValue::as_integer)
    }

    fn get_boolean(&mut self, refs: &[ValueReference], values: &mut [bool]) -> Status {
        self.read(refs, values, ScalarValue::as_bool)
    }

    fn get_string(&mut self, refs: &[ValueReference], values: &mut [String]) -> Status {
        self.read(refs, values, |v| v.as_str().map(str::to_string))
    }

    fn set_real(&mut self, refs: &[ValueReference], values: &[f64]) -> Status {
        self.write(refs, values.iter().map(|v| ScalarValue::Real(*v)))
    }

    fn set_integer(&mut self, refs: &[ValueReference], values: &[i32]) -> Status {
        self.write(refs, values.iter().map(|v| ScalarValue::Integer(*v)))
    }

    fn set_boolean(&mut self, refs: &[ValueReference], values: &[bool]) -> Status {
        self.write(refs, values.iter().map(|v| ScalarValue::Boolean(*v)))
    }

    fn set_string(&mut self, refs: &[ValueReference], values: &[String]) -> Status {
        self.write(refs, values.iter().map(|v| ScalarValue::String(v.clone())))
    }
}

//! The slave plug-in contract and the owned instance handle.
//!
//! A [`SlaveComponent`] is a loaded, not yet instantiated component: its
//! entry points plus its variable table. Instantiating it yields a
//! [`SlaveInstance`], which the registry wraps in an [`InstanceGuard`] so
//! that terminate and dispose run exactly once, even on abort paths.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::types::{ScalarType, ScalarValue, SimTime, SlaveIndex, Status, ValueReference};
use crate::variable::VariableTable;

/// MIME type announced to shared-library components.
pub const MIME_TYPE: &str = "application/x-fmu-sharedlibrary";

/// Default instantiation timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: f64 = 1000.0;

/// Static description of a slave to load.
///
/// This is what the bundle extractor and the variable-table provider hand
/// to the master: where the binary lives, how its entry points are
/// prefixed, and which variables it publishes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlaveDescriptor {
    /// Display name; defaults to the model identifier
    #[serde(default)]
    pub name: Option<String>,
    /// Path to the shared library implementing the component
    pub library: PathBuf,
    /// Prefix of the exported entry points
    pub model_identifier: String,
    /// Global unique id of the component
    pub guid: String,
    /// Optional bundle location URL handed to instantiation
    #[serde(default)]
    pub location: Option<String>,
    /// Published variables in table order
    #[serde(default)]
    pub variables: VariableTable,
}

impl SlaveDescriptor {
    /// Creates a descriptor for the given library and identifier.
    pub fn new(
        library: impl Into<PathBuf>,
        model_identifier: impl Into<String>,
        guid: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            library: library.into(),
            model_identifier: model_identifier.into(),
            guid: guid.into(),
            location: None,
            variables: VariableTable::default(),
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the bundle location URL.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the variable table.
    pub fn with_variables(mut self, variables: VariableTable) -> Self {
        self.variables = variables;
        self
    }

    /// Returns the display name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.model_identifier)
    }
}

/// Arguments of the instantiation entry point.
#[derive(Clone, Debug)]
pub struct InstantiateParams<'a> {
    /// Unique instance name within the run
    pub instance_name: &'a str,
    /// Global unique id of the component
    pub guid: &'a str,
    /// Bundle location URL, if known
    pub location: Option<&'a str>,
    /// MIME type of the hosting tool
    pub mime_type: &'a str,
    /// Timeout in milliseconds, 0 for unlimited
    pub timeout_ms: f64,
    /// Whether the component may show a user interface
    pub visible: bool,
    /// Whether the run needs user interaction
    pub interactive: bool,
    /// Whether the component should emit debug log messages
    pub logging_on: bool,
}

/// A loaded component that can be instantiated.
pub trait SlaveComponent: Send {
    /// Prefix of the component's entry points.
    fn model_identifier(&self) -> &str;

    /// Global unique id of the component.
    fn guid(&self) -> &str;

    /// Bundle location URL, if any.
    fn location(&self) -> Option<&str> {
        None
    }

    /// The component's variable table.
    fn variables(&self) -> &VariableTable;

    /// Instantiates the component.
    ///
    /// Returns `None` when the component refuses to create an instance.
    fn instantiate(&self, params: &InstantiateParams<'_>) -> Option<Box<dyn SlaveInstance>>;
}

/// One live instance of a component.
///
/// All accessors take slices so implementations can forward them to the
/// vectorised native entry points unchanged.
pub trait SlaveInstance: Send {
    /// Initializes the instance for a run over `[t_start, t_stop]`.
    fn initialize(&mut self, t_start: SimTime, stop_time_defined: bool, t_stop: SimTime) -> Status;

    /// Advances the instance from `time` by `step_size`.
    fn do_step(&mut self, time: SimTime, step_size: SimTime, new_step: bool) -> Status;

    /// Terminates the simulation run of this instance.
    fn terminate(&mut self) -> Status;

    /// Releases the instance. No other call is valid afterwards.
    fn dispose(&mut self);

    fn get_real(&mut self, refs: &[ValueReference], values: &mut [f64]) -> Status;
    fn get_integer(&mut self, refs: &[ValueReference], values: &mut [i32]) -> Status;
    fn get_boolean(&mut self, refs: &[ValueReference], values: &mut [bool]) -> Status;
    fn get_string(&mut self, refs: &[ValueReference], values: &mut [String]) -> Status;

    fn set_real(&mut self, refs: &[ValueReference], values: &[f64]) -> Status;
    fn set_integer(&mut self, refs: &[ValueReference], values: &[i32]) -> Status;
    fn set_boolean(&mut self, refs: &[ValueReference], values: &[bool]) -> Status;
    fn set_string(&mut self, refs: &[ValueReference], values: &[String]) -> Status;

    /// Reads one scalar of the given type through the matching accessor.
    fn get_value(&mut self, ty: ScalarType, value_ref: ValueReference) -> (Status, ScalarValue) {
        let refs = [value_ref];
        match ty {
            ScalarType::Real => {
                let mut v = [0.0];
                let status = self.get_real(&refs, &mut v);
                (status, ScalarValue::Real(v[0]))
            }
            ScalarType::Integer | ScalarType::Enumeration => {
                let mut v = [0];
                let status = self.get_integer(&refs, &mut v);
                let value = if ty == ScalarType::Integer {
                    ScalarValue::Integer(v[0])
                } else {
                    ScalarValue::Enumeration(v[0])
                };
                (status, value)
            }
            ScalarType::Boolean => {
                let mut v = [false];
                let status = self.get_boolean(&refs, &mut v);
                (status, ScalarValue::Boolean(v[0]))
            }
            ScalarType::String => {
                let mut v = [String::new()];
                let status = self.get_string(&refs, &mut v);
                let [s] = v;
                (status, ScalarValue::String(s))
            }
        }
    }

    /// Writes one scalar through the accessor matching its type tag.
    fn set_value(&mut self, value_ref: ValueReference, value: &ScalarValue) -> Status {
        let refs = [value_ref];
        match value {
            ScalarValue::Real(v) => self.set_real(&refs, &[*v]),
            ScalarValue::Integer(v) | ScalarValue::Enumeration(v) => self.set_integer(&refs, &[*v]),
            ScalarValue::Boolean(v) => self.set_boolean(&refs, &[*v]),
            ScalarValue::String(v) => self.set_string(&refs, std::slice::from_ref(v)),
        }
    }
}

/// Creates components from descriptors.
pub trait SlaveLoader {
    /// Resolves the binary and entry points of one slave.
    fn load(&self, index: SlaveIndex, descriptor: &SlaveDescriptor) -> Result<Box<dyn SlaveComponent>, LoadError>;
}

/// Exclusive owner of one instance.
///
/// Releasing the guard terminates the instance (only if it was
/// initialized) and then disposes it. Release happens at most once: either
/// through [`InstanceGuard::release`] or when the guard is dropped.
pub struct InstanceGuard {
    name: String,
    instance: Option<Box<dyn SlaveInstance>>,
    initialized: bool,
}

impl InstanceGuard {
    /// Takes ownership of a freshly instantiated instance.
    pub fn new(name: impl Into<String>, instance: Box<dyn SlaveInstance>) -> Self {
        Self {
            name: name.into(),
            instance: Some(instance),
            initialized: false,
        }
    }

    /// Returns the live instance, or `None` once released.
    pub fn get_mut(&mut self) -> Option<&mut (dyn SlaveInstance + 'static)> {
        self.instance.as_deref_mut()
    }

    /// Records that initialization succeeded, so release must terminate.
    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Returns true if the instance has been initialized and not released.
    pub fn is_initialized(&self) -> bool {
        self.initialized && self.instance.is_some()
    }

    /// Returns true once the instance has been released.
    pub fn is_released(&self) -> bool {
        self.instance.is_none()
    }

    /// Terminates (if initialized) and disposes the instance.
    ///
    /// Returns the terminate status, or `None` if terminate was not called.
    pub fn release(&mut self) -> Option<Status> {
        let mut instance = self.instance.take()?;
        let status = if self.initialized {
            let status = instance.terminate();
            if status.is_fatal() {
                tracing::warn!(slave = %self.name, %status, "terminate failed, disposing anyway");
            }
            Some(status)
        } else {
            None
        };
        instance.dispose();
        self.initialized = false;
        tracing::debug!(slave = %self.name, "instance released");
        status
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for InstanceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceGuard")
            .field("name", &self.name)
            .field("initialized", &self.initialized)
            .field("released", &self.instance.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockComponent, MockMonitor};
    use crate::variable::VariableDescriptor;

    fn params(name: &str) -> InstantiateParams<'_> {
        InstantiateParams {
            instance_name: name,
            guid: "{guid}",
            location: None,
            mime_type: MIME_TYPE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            visible: false,
            interactive: false,
            logging_on: false,
        }
    }

    fn component() -> (MockComponent, MockMonitor) {
        let component = MockComponent::new(
            "m",
            vec![
                VariableDescriptor::new("r", 0, ScalarType::Real),
                VariableDescriptor::new("e", 1, ScalarType::Enumeration),
                VariableDescriptor::new("s", 2, ScalarType::String),
            ],
        );
        let monitor = component.monitor();
        (component, monitor)
    }

    #[test]
    fn test_guard_releases_once_on_drop() {
        let (component, monitor) = component();
        let instance = component.instantiate(&params("m")).unwrap();
        let mut guard = InstanceGuard::new("m", instance);
        guard.get_mut().unwrap().initialize(0.0, true, 1.0);
        guard.mark_initialized();
        assert!(guard.is_initialized());

        assert_eq!(guard.release(), Some(Status::Ok));
        assert!(guard.is_released());
        assert_eq!(guard.release(), None);
        drop(guard);

        assert_eq!(monitor.terminate_count(), 1);
        assert_eq!(monitor.dispose_count(), 1);
    }

    #[test]
    fn test_guard_skips_terminate_when_not_initialized() {
        let (component, monitor) = component();
        let instance = component.instantiate(&params("m")).unwrap();
        drop(InstanceGuard::new("m", instance));

        assert_eq!(monitor.terminate_count(), 0);
        assert_eq!(monitor.dispose_count(), 1);
    }

    #[test]
    fn test_typed_value_dispatch() {
        let (component, _monitor) = component();
        let mut instance = component.instantiate(&params("m")).unwrap();

        assert_eq!(instance.set_value(0, &ScalarValue::Real(2.5)), Status::Ok);
        assert_eq!(instance.set_value(1, &ScalarValue::Enumeration(3)), Status::Ok);
        assert_eq!(
            instance.set_value(2, &ScalarValue::String("on".to_string())),
            Status::Ok
        );

        assert_eq!(instance.get_value(ScalarType::Real, 0), (Status::Ok, ScalarValue::Real(2.5)));
        assert_eq!(
            instance.get_value(ScalarType::Enumeration, 1),
            (Status::Ok, ScalarValue::Enumeration(3))
        );
        assert_eq!(
            instance.get_value(ScalarType::String, 2),
            (Status::Ok, ScalarValue::String("on".to_string()))
        );
    }

    #[test]
    fn test_descriptor_display_name() {
        let desc = SlaveDescriptor::new("lib.so", "plant", "{1}");
        assert_eq!(desc.display_name(), "plant");
        assert_eq!(desc.with_name("p0").display_name(), "p0");
    }
}

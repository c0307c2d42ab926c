//! Native components loaded from shared libraries.
//!
//! A native component exports the FMI for Co-Simulation 1.0 entry points,
//! each prefixed with the component's model identifier, e.g.
//! `bouncingBall_fmiDoStep`. All symbols are resolved when the component
//! is loaded, so a missing entry point fails before anything runs.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use libloading::Library;
use tracing::{debug, error, warn};

use crate::error::LoadError;
use crate::slave::{InstantiateParams, SlaveComponent, SlaveDescriptor, SlaveInstance, SlaveLoader};
use crate::types::{SimTime, SlaveIndex, Status, ValueReference};
use crate::variable::VariableTable;

type Component = *mut c_void;
type FmiBoolean = c_char;
type FmiString = *const c_char;
type FmiStatus = c_int;

const FMI_TRUE: FmiBoolean = 1;
const FMI_FALSE: FmiBoolean = 0;

fn fmi_bool(value: bool) -> FmiBoolean {
    if value {
        FMI_TRUE
    } else {
        FMI_FALSE
    }
}

// The component declares the logger as variadic. Only the fixed arguments
// are read here, so the format arguments of `message` are not expanded.
type LoggerFn = unsafe extern "C" fn(Component, FmiString, FmiStatus, FmiString, FmiString);
type AllocateFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);
type StepFinishedFn = unsafe extern "C" fn(Component, FmiStatus);

#[repr(C)]
#[derive(Clone, Copy)]
struct CallbackFunctions {
    logger: LoggerFn,
    allocate_memory: AllocateFn,
    free_memory: FreeFn,
    step_finished: Option<StepFinishedFn>,
}

extern "C" {
    fn calloc(count: usize, size: usize) -> *mut c_void;
    fn free(ptr: *mut c_void);
}

type InstantiateSlaveFn = unsafe extern "C" fn(
    FmiString,
    FmiString,
    FmiString,
    FmiString,
    f64,
    FmiBoolean,
    FmiBoolean,
    CallbackFunctions,
    FmiBoolean,
) -> Component;
type InitializeSlaveFn = unsafe extern "C" fn(Component, f64, FmiBoolean, f64) -> FmiStatus;
type DoStepFn = unsafe extern "C" fn(Component, f64, f64, FmiBoolean) -> FmiStatus;
type TerminateSlaveFn = unsafe extern "C" fn(Component) -> FmiStatus;
type FreeSlaveInstanceFn = unsafe extern "C" fn(Component);
type GetFn<T> = unsafe extern "C" fn(Component, *const ValueReference, usize, *mut T) -> FmiStatus;
type SetFn<T> = unsafe extern "C" fn(Component, *const ValueReference, usize, *const T) -> FmiStatus;

/// Resolved entry points of one library.
#[derive(Clone, Copy)]
struct Api {
    instantiate: InstantiateSlaveFn,
    initialize: InitializeSlaveFn,
    do_step: DoStepFn,
    terminate: TerminateSlaveFn,
    free_instance: FreeSlaveInstanceFn,
    get_real: GetFn<f64>,
    get_integer: GetFn<c_int>,
    get_boolean: GetFn<FmiBoolean>,
    get_string: GetFn<FmiString>,
    set_real: SetFn<f64>,
    set_integer: SetFn<c_int>,
    set_boolean: SetFn<FmiBoolean>,
    set_string: SetFn<FmiString>,
}

impl Api {
    fn resolve(library: &Library, path: &Path, prefix: &str) -> Result<Self, LoadError> {
        Ok(Self {
            instantiate: symbol(library, path, prefix, "fmiInstantiateSlave")?,
            initialize: symbol(library, path, prefix, "fmiInitializeSlave")?,
            do_step: symbol(library, path, prefix, "fmiDoStep")?,
            terminate: symbol(library, path, prefix, "fmiTerminateSlave")?,
            free_instance: symbol(library, path, prefix, "fmiFreeSlaveInstance")?,
            get_real: symbol(library, path, prefix, "fmiGetReal")?,
            get_integer: symbol(library, path, prefix, "fmiGetInteger")?,
            get_boolean: symbol(library, path, prefix, "fmiGetBoolean")?,
            get_string: symbol(library, path, prefix, "fmiGetString")?,
            set_real: symbol(library, path, prefix, "fmiSetReal")?,
            set_integer: symbol(library, path, prefix, "fmiSetInteger")?,
            set_boolean: symbol(library, path, prefix, "fmiSetBoolean")?,
            set_string: symbol(library, path, prefix, "fmiSetString")?,
        })
    }
}

fn symbol<T: Copy>(library: &Library, path: &Path, prefix: &str, name: &str) -> Result<T, LoadError> {
    let symbol = format!("{prefix}_{name}");
    // SAFETY: `T` is one of the function pointer types above, matching the
    // FMI 1.0 co-simulation signature of the named entry point.
    unsafe { library.get::<T>(symbol.as_bytes()) }
        .map(|s| *s)
        .map_err(|source| LoadError::Symbol {
            path: path.to_path_buf(),
            symbol,
            source,
        })
}

fn c_string(value: &str, field: &'static str) -> Result<CString, LoadError> {
    CString::new(value).map_err(|_| LoadError::InvalidString { field })
}

/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn lossy(ptr: FmiString) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

unsafe extern "C" fn log_message(
    _component: Component,
    instance_name: FmiString,
    status: FmiStatus,
    category: FmiString,
    message: FmiString,
) {
    let instance = lossy(instance_name);
    let category = lossy(category);
    let message = lossy(message);
    match Status::from_code(status) {
        Status::Ok => debug!(target: "cosim::slave", %instance, %category, "{message}"),
        Status::Warning => warn!(target: "cosim::slave", %instance, %category, "{message}"),
        status => error!(target: "cosim::slave", %instance, %category, %status, "{message}"),
    }
}

/// A shared-library component with resolved entry points.
pub struct NativeComponent {
    library: Arc<Library>,
    api: Api,
    path: PathBuf,
    model_identifier: String,
    guid: String,
    location: Option<String>,
    variables: VariableTable,
}

impl NativeComponent {
    /// Loads the library named by `descriptor` and resolves every entry point.
    pub fn load(descriptor: &SlaveDescriptor) -> Result<Self, LoadError> {
        let path = descriptor.library.clone();
        // SAFETY: loading runs the library's initialisers; components are
        // trusted code supplied by the user.
        let library = unsafe { Library::new(&path) }.map_err(|source| LoadError::Library {
            path: path.clone(),
            source,
        })?;
        let api = Api::resolve(&library, &path, &descriptor.model_identifier)?;
        Ok(Self {
            library: Arc::new(library),
            api,
            path,
            model_identifier: descriptor.model_identifier.clone(),
            guid: descriptor.guid.clone(),
            location: descriptor.location.clone(),
            variables: descriptor.variables.clone(),
        })
    }

    /// Returns the path of the loaded library.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_instantiate(&self, params: &InstantiateParams<'_>) -> Result<Option<NativeInstance>, LoadError> {
        let name = c_string(params.instance_name, "instance name")?;
        let guid = c_string(params.guid, "guid")?;
        let location = params.location.map(|l| c_string(l, "location")).transpose()?;
        let mime_type = c_string(params.mime_type, "mime type")?;
        let callbacks = CallbackFunctions {
            logger: log_message,
            allocate_memory: calloc,
            free_memory: free,
            step_finished: None,
        };

        // SAFETY: all strings outlive the call; the callbacks are valid for
        // the lifetime of the process.
        let component = unsafe {
            (self.api.instantiate)(
                name.as_ptr(),
                guid.as_ptr(),
                location.as_ref().map_or(ptr::null(), |l| l.as_ptr()),
                mime_type.as_ptr(),
                params.timeout_ms,
                fmi_bool(params.visible),
                fmi_bool(params.interactive),
                callbacks,
                fmi_bool(params.logging_on),
            )
        };
        if component.is_null() {
            return Ok(None);
        }
        Ok(Some(NativeInstance {
            _library: Arc::clone(&self.library),
            api: self.api,
            component,
            _name: name,
            _guid: guid,
            _location: location,
        }))
    }
}

impl SlaveComponent for NativeComponent {
    fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    fn guid(&self) -> &str {
        &self.guid
    }

    fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    fn variables(&self) -> &VariableTable {
        &self.variables
    }

    fn instantiate(&self, params: &InstantiateParams<'_>) -> Option<Box<dyn SlaveInstance>> {
        match self.try_instantiate(params) {
            Ok(instance) => instance.map(|i| Box::new(i) as Box<dyn SlaveInstance>),
            Err(err) => {
                error!(model = %self.model_identifier, "{err}");
                None
            }
        }
    }
}

/// A live instance of a native component.
struct NativeInstance {
    // Keeps the code behind `api` mapped while the instance lives.
    _library: Arc<Library>,
    api: Api,
    component: Component,
    // The component may hold on to these pointers.
    _name: CString,
    _guid: CString,
    _location: Option<CString>,
}

// SAFETY: the instance is only ever used by one thread at a time (the
// registry hands out `&mut` access only) and components do not rely on
// thread-local state between calls.
unsafe impl Send for NativeInstance {}

impl NativeInstance {
    fn checked(&self, refs: &[ValueReference], len: usize) -> Option<Status> {
        if self.component.is_null() {
            Some(Status::Fatal)
        } else if refs.len() != len {
            Some(Status::Error)
        } else {
            None
        }
    }
}

impl SlaveInstance for NativeInstance {
    fn initialize(&mut self, t_start: SimTime, stop_time_defined: bool, t_stop: SimTime) -> Status {
        if self.component.is_null() {
            return Status::Fatal;
        }
        // SAFETY: `component` is a live instance created by this library.
        let code = unsafe { (self.api.initialize)(self.component, t_start, fmi_bool(stop_time_defined), t_stop) };
        Status::from_code(code)
    }

    fn do_step(&mut self, time: SimTime, step_size: SimTime, new_step: bool) -> Status {
        if self.component.is_null() {
            return Status::Fatal;
        }
        // SAFETY: as above.
        let code = unsafe { (self.api.do_step)(self.component, time, step_size, fmi_bool(new_step)) };
        Status::from_code(code)
    }

    fn terminate(&mut self) -> Status {
        if self.component.is_null() {
            return Status::Fatal;
        }
        // SAFETY: as above.
        Status::from_code(unsafe { (self.api.terminate)(self.component) })
    }

    fn dispose(&mut self) {
        if !self.component.is_null() {
            // SAFETY: as above; the pointer is cleared so it is freed once.
            unsafe { (self.api.free_instance)(self.component) };
            self.component = ptr::null_mut();
        }
    }

    fn get_real(&mut self, refs: &[ValueReference], values: &mut [f64]) -> Status {
        if let Some(status) = self.checked(refs, values.len()) {
            return status;
        }
        // SAFETY: both buffers hold `refs.len()` elements.
        Status::from_code(unsafe { (self.api.get_real)(self.component, refs.as_ptr(), refs.len(), values.as_mut_ptr()) })
    }

    fn get_integer(&mut self, refs: &[ValueReference], values: &mut [i32]) -> Status {
        if let Some(status) = self.checked(refs, values.len()) {
            return status;
        }
        // SAFETY: as above; `c_int` is `i32` on every supported platform.
        Status::from_code(unsafe {
            (self.api.get_integer)(self.component, refs.as_ptr(), refs.len(), values.as_mut_ptr())
        })
    }

    fn get_boolean(&mut self, refs: &[ValueReference], values: &mut [bool]) -> Status {
        if let Some(status) = self.checked(refs, values.len()) {
            return status;
        }
        let mut raw: Vec<FmiBoolean> = vec![FMI_FALSE; refs.len()];
        // SAFETY: as above.
        let status = Status::from_code(unsafe {
            (self.api.get_boolean)(self.component, refs.as_ptr(), refs.len(), raw.as_mut_ptr())
        });
        for (slot, flag) in values.iter_mut().zip(raw) {
            *slot = flag != FMI_FALSE;
        }
        status
    }

    fn get_string(&mut self, refs: &[ValueReference], values: &mut [String]) -> Status {
        if let Some(status) = self.checked(refs, values.len()) {
            return status;
        }
        let mut raw: Vec<FmiString> = vec![ptr::null(); refs.len()];
        // SAFETY: as above; returned strings are owned by the component and
        // copied before the next call.
        let status = Status::from_code(unsafe {
            (self.api.get_string)(self.component, refs.as_ptr(), refs.len(), raw.as_mut_ptr())
        });
        for (slot, s) in values.iter_mut().zip(raw) {
            // SAFETY: the component returns NUL-terminated strings or null.
            *slot = unsafe { lossy(s) };
        }
        status
    }

    fn set_real(&mut self, refs: &[ValueReference], values: &[f64]) -> Status {
        if let Some(status) = self.checked(refs, values.len()) {
            return status;
        }
        // SAFETY: both buffers hold `refs.len()` elements.
        Status::from_code(unsafe { (self.api.set_real)(self.component, refs.as_ptr(), refs.len(), values.as_ptr()) })
    }

    fn set_integer(&mut self, refs: &[ValueReference], values: &[i32]) -> Status {
        if let Some(status) = self.checked(refs, values.len()) {
            return status;
        }
        // SAFETY: as above.
        Status::from_code(unsafe {
            (self.api.set_integer)(self.component, refs.as_ptr(), refs.len(), values.as_ptr())
        })
    }

    fn set_boolean(&mut self, refs: &[ValueReference], values: &[bool]) -> Status {
        if let Some(status) = self.checked(refs, values.len()) {
            return status;
        }
        let raw: Vec<FmiBoolean> = values.iter().map(|v| fmi_bool(*v)).collect();
        // SAFETY: as above.
        Status::from_code(unsafe { (self.api.set_boolean)(self.component, refs.as_ptr(), refs.len(), raw.as_ptr()) })
    }

    fn set_string(&mut self, refs: &[ValueReference], values: &[String]) -> Status {
        if let Some(status) = self.checked(refs, values.len()) {
            return status;
        }
        let Ok(owned) = values
            .iter()
            .map(|v| CString::new(v.as_str()))
            .collect::<Result<Vec<_>, _>>()
        else {
            warn!("string value with an interior NUL byte cannot be passed to a component");
            return Status::Error;
        };
        let raw: Vec<FmiString> = owned.iter().map(|s| s.as_ptr()).collect();
        // SAFETY: as above; `owned` outlives the call.
        Status::from_code(unsafe { (self.api.set_string)(self.component, refs.as_ptr(), refs.len(), raw.as_ptr()) })
    }
}

impl Drop for NativeInstance {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Loads every slave as a native shared-library component.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeLoader;

impl SlaveLoader for NativeLoader {
    fn load(&self, index: SlaveIndex, descriptor: &SlaveDescriptor) -> Result<Box<dyn SlaveComponent>, LoadError> {
        let component = NativeComponent::load(descriptor)?;
        debug!(slave = index, library = %component.path().display(), "native component loaded");
        Ok(Box::new(component))
    }
}

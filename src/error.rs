//! Error taxonomy of the co-simulation master.
//!
//! Fatal conditions abort the whole run. The only non-fatal condition is a
//! coupling whose endpoint types differ, which disables that coupling.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ScalarType, SimTime, SlaveIndex, Status, ValueReference};

/// Errors raised while resolving a slave's binary and entry points.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("could not load library {path}: {source}")]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("library {path} does not export {symbol}: {source}")]
    Symbol {
        path: PathBuf,
        symbol: String,
        #[source]
        source: libloading::Error,
    },

    #[error("invalid component string {field}: contains an interior NUL byte")]
    InvalidString { field: &'static str },

    #[error("slave {index} ({name}) could not be loaded: {reason}")]
    Component {
        index: SlaveIndex,
        name: String,
        reason: String,
    },

    #[error("slave {index} ({name}): {source}")]
    Slave {
        index: SlaveIndex,
        name: String,
        #[source]
        source: Box<LoadError>,
    },
}

impl LoadError {
    /// Returns the index of the slave that failed to load, if known.
    pub fn slave(&self) -> Option<SlaveIndex> {
        match self {
            LoadError::Component { index, .. } | LoadError::Slave { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Attaches the slave index and name unless the error already names a slave.
    pub fn for_slave(self, index: SlaveIndex, name: &str) -> Self {
        if self.slave().is_some() {
            self
        } else {
            LoadError::Slave {
                index,
                name: name.to_string(),
                source: Box::new(self),
            }
        }
    }
}

/// Errors raised while building the connection graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("coupling references slave {slave}, but only {count} slave(s) are loaded")]
    UnknownSlave { slave: SlaveIndex, count: usize },

    #[error("slave {slave} has no non-alias variable with value reference {value_ref}")]
    UnknownVariable {
        slave: SlaveIndex,
        value_ref: ValueReference,
    },

    #[error(
        "connection between slave {from_slave} (value ref {from_ref}, {from_type}) and \
         slave {to_slave} (value ref {to_ref}, {to_type}) has incompatible data types"
    )]
    TypeMismatch {
        from_slave: SlaveIndex,
        from_ref: ValueReference,
        from_type: ScalarType,
        to_slave: SlaveIndex,
        to_ref: ValueReference,
        to_type: ScalarType,
    },
}

/// Errors that abort a co-simulation run.
#[derive(Error, Debug)]
pub enum MasterError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("could not instantiate slave {slave} ({name})")]
    Instantiation { slave: SlaveIndex, name: String },

    #[error("could not initialize slave {slave} ({name}): status {status}")]
    Initialization {
        slave: SlaveIndex,
        name: String,
        status: Status,
    },

    #[error("step of slave {slave} ({name}) at t={time} returned {status}")]
    Step {
        slave: SlaveIndex,
        name: String,
        time: SimTime,
        status: Status,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("result output failed: {0}")]
    Output(#[from] std::io::Error),

    #[error("slave {slave} ({name}) cannot {operation} while {state}")]
    InvalidState {
        slave: SlaveIndex,
        name: String,
        operation: &'static str,
        state: String,
    },

    #[error("invalid simulation clock: {0}")]
    InvalidClock(String),

    #[error("master loop cannot start from state {state}")]
    Lifecycle { state: String },
}

impl MasterError {
    /// Returns the index of the slave that caused the failure, if any.
    pub fn slave(&self) -> Option<SlaveIndex> {
        match self {
            MasterError::Instantiation { slave, .. }
            | MasterError::Initialization { slave, .. }
            | MasterError::Step { slave, .. }
            | MasterError::InvalidState { slave, .. } => Some(*slave),
            MasterError::Load(err) => err.slave(),
            _ => None,
        }
    }

    /// Returns the name of the failing operation.
    pub fn operation(&self) -> &'static str {
        match self {
            MasterError::Load(_) => "load",
            MasterError::Instantiation { .. } => "instantiate",
            MasterError::Initialization { .. } => "initialize",
            MasterError::Step { .. } => "step",
            MasterError::Connection(_) => "connect",
            MasterError::Output(_) => "output",
            MasterError::InvalidState { operation, .. } => *operation,
            MasterError::InvalidClock(_) => "configure clock",
            MasterError::Lifecycle { .. } => "run",
        }
    }
}

/// Result type for master operations.
pub type MasterResult<T> = Result<T, MasterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reports_slave_and_operation() {
        let err = MasterError::Step {
            slave: 2,
            name: "plant".to_string(),
            time: 0.5,
            status: Status::Error,
        };
        assert_eq!(err.slave(), Some(2));
        assert_eq!(err.operation(), "step");
        assert_eq!(
            err.to_string(),
            "step of slave 2 (plant) at t=0.5 returned Error"
        );
    }

    #[test]
    fn test_connection_error_converts() {
        let err: MasterError = ConnectionError::UnknownVariable {
            slave: 1,
            value_ref: 7,
        }
        .into();
        assert_eq!(err.slave(), None);
        assert_eq!(err.operation(), "connect");
        assert!(err.to_string().contains("value reference 7"));
    }

    #[test]
    fn test_load_error_keeps_slave_index() {
        let inner = LoadError::InvalidString { field: "guid" };
        assert_eq!(inner.slave(), None);

        let err = inner.for_slave(3, "plant");
        assert_eq!(err.slave(), Some(3));
        assert_eq!(
            err.to_string(),
            "slave 3 (plant): invalid component string guid: contains an interior NUL byte"
        );

        let named = LoadError::Component {
            index: 1,
            name: "a".to_string(),
            reason: "missing".to_string(),
        };
        assert!(matches!(named.for_slave(2, "b"), LoadError::Component { index: 1, .. }));

        let master: MasterError = err.into();
        assert_eq!(master.slave(), Some(3));
        assert_eq!(master.operation(), "load");
    }
}

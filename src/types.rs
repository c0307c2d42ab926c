//! Core type definitions for the co-simulation master.
//!
//! This module defines the scalar values exchanged between slaves and the
//! status codes every slave entry point reports back.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Simulation time in seconds.
///
/// The master advances time by plain floating-point accumulation, so all
/// slaves see the same (possibly drifting) communication points.
pub type SimTime = f64;

/// Position of a slave inside the registry (0..N-1).
pub type SlaveIndex = usize;

/// Identifier of a variable, unique within one slave's variable table.
pub type ValueReference = u32;

/// The scalar type of a published variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Real,
    Integer,
    Boolean,
    String,
    Enumeration,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::Real => "Real",
            ScalarType::Integer => "Integer",
            ScalarType::Boolean => "Boolean",
            ScalarType::String => "String",
            ScalarType::Enumeration => "Enumeration",
        };
        f.write_str(name)
    }
}

/// Whether a variable holds its own storage or mirrors another one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasKind {
    /// Canonical variable with independent storage
    #[default]
    None,
    /// Mirrors another variable
    Alias,
    /// Mirrors another variable with inverted sign
    NegatedAlias,
}

/// A typed scalar read from or written to a slave.
///
/// Enumerations travel through the integer accessors of a slave but keep
/// their own tag so couplings can tell them apart from plain integers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Real(f64),
    Integer(i32),
    Boolean(bool),
    String(String),
    Enumeration(i32),
}

impl ScalarValue {
    /// Returns the scalar type tag of this value.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ScalarValue::Real(_) => ScalarType::Real,
            ScalarValue::Integer(_) => ScalarType::Integer,
            ScalarValue::Boolean(_) => ScalarType::Boolean,
            ScalarValue::String(_) => ScalarType::String,
            ScalarValue::Enumeration(_) => ScalarType::Enumeration,
        }
    }

    /// Returns the zero value of the given type.
    pub fn default_for(ty: ScalarType) -> Self {
        match ty {
            ScalarType::Real => ScalarValue::Real(0.0),
            ScalarType::Integer => ScalarValue::Integer(0),
            ScalarType::Boolean => ScalarValue::Boolean(false),
            ScalarType::String => ScalarValue::String(String::new()),
            ScalarType::Enumeration => ScalarValue::Enumeration(0),
        }
    }

    /// Returns the real payload, if any.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            ScalarValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the integer payload of `Integer` and `Enumeration` values.
    pub fn as_integer(&self) -> Option<i32> {
        match self {
            ScalarValue::Integer(v) | ScalarValue::Enumeration(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Status returned by every slave entry point, ordered by severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Status {
    Ok,
    Warning,
    Discard,
    Error,
    Fatal,
}

impl Status {
    /// Returns true for anything stricter than `Warning`.
    pub fn is_fatal(self) -> bool {
        self > Status::Warning
    }

    /// Maps a raw component status code to a `Status`.
    ///
    /// Unknown codes (including an asynchronous "pending" answer, which a
    /// synchronous master cannot act on) are treated as `Fatal`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Ok,
            1 => Status::Warning,
            2 => Status::Discard,
            3 => Status::Error,
            _ => Status::Fatal,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "OK",
            Status::Warning => "Warning",
            Status::Discard => "Discard",
            Status::Error => "Error",
            Status::Fatal => "Fatal",
        };
        f.write_str(name)
    }
}

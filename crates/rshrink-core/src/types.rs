//! Shared types used across rshrink crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A value marshaled between the main thread, the worker and a compute
/// module export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Export returned nothing.
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Passed to the guest as `(ptr, len)` over its linear memory.
    Array(Vec<i32>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Vec<i32>> for Value {
    fn from(items: Vec<i32>) -> Self {
        Value::Array(items)
    }
}

/// Which initialization of the compute module a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Initialized without a thread pool. Always available.
    SingleThread,
    /// Initialized with a worker thread pool. Only when threads are supported.
    MultiThread,
}

impl Variant {
    pub fn label(&self) -> &'static str {
        match self {
            Variant::SingleThread => "single-thread",
            Variant::MultiThread => "multi-thread",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the multi-thread path decides whether to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadMode {
    /// Probe the host for shared-memory parallelism.
    #[default]
    Auto,
    /// Never start the multi-thread variant.
    Off,
    /// Skip the probe and always attempt the multi-thread variant.
    Force,
}

#[derive(Debug, Error)]
#[error("invalid thread mode {0:?} (expected auto, off or force)")]
pub struct ThreadModeError(String);

impl FromStr for ThreadMode {
    type Err = ThreadModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ThreadMode::Auto),
            "off" | "none" | "single" => Ok(ThreadMode::Off),
            "force" | "on" => Ok(ThreadMode::Force),
            _ => Err(ThreadModeError(s.to_string())),
        }
    }
}

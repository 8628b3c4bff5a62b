//! Computation engines
//!
//! The dispatcher treats the engine as an opaque, blocking executor behind the
//! [`Engine`] trait. [`ScriptEngine`] is the engine shipped with the binary: it
//! runs an entity script as a child process.

pub mod annotations;
pub mod script;

pub use annotations::{parse_definition, EntityDefinition, ParamSpec, CACHE_RESULTS_PARAM};
pub use script::{resolve_step, ScriptEngine, DEFAULT_STEP};

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;
use crate::result::ExecutionResult;

/// Category of computation. Jobs have no tabular output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Job,
    #[default]
    Transformation,
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "job" => Ok(Self::Job),
            "transformation" => Ok(Self::Transformation),
            other => Err(format!(
                "Invalid kind: {}. Use: job, transformation",
                other
            )),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job => f.write_str("job"),
            Self::Transformation => f.write_str("transformation"),
        }
    }
}

/// Runs one computation
pub trait Engine: Send + Sync {
    /// Execute with the given parameters, reading the named output channel.
    ///
    /// `Ok(None)` means the engine produced nothing at all. A run that completes
    /// with a failure status is `Ok(Some(..))` with `succeeded() == false`; `Err`
    /// is reserved for the engine itself failing.
    fn execute(
        &self,
        parameters: &BTreeMap<String, String>,
        output_selector: Option<&str>,
    ) -> Result<Option<ExecutionResult>, EngineError>;
}

// Common test utilities shared across integration tests
//
// Engines here are in-process stand-ins for entity scripts: they count their
// invocations and can be slowed down to widen race windows. Script-backed
// tests use the fixture entities in fixtures/entities/.

#![allow(dead_code)]

use jobfront::engine::{Engine, EntityDefinition, EntityKind, ParamSpec, CACHE_RESULTS_PARAM};
use jobfront::error::EngineError;
use jobfront::result::{ColumnMeta, ExecutionResult, ValueType};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Produce =
    dyn Fn(usize, &BTreeMap<String, String>) -> Result<Option<ExecutionResult>, EngineError>
        + Send
        + Sync;

/// Engine stub counting its invocations
pub struct CountingEngine {
    calls: AtomicUsize,
    delay: Duration,
    produce: Box<Produce>,
}

impl CountingEngine {
    /// Engine answering every call with `produce(call_index, parameters)`
    pub fn new<F>(produce: F) -> Arc<Self>
    where
        F: Fn(usize, &BTreeMap<String, String>) -> Result<Option<ExecutionResult>, EngineError>
            + Send
            + Sync
            + 'static,
    {
        Self::with_delay(Duration::ZERO, produce)
    }

    pub fn with_delay<F>(delay: Duration, produce: F) -> Arc<Self>
    where
        F: Fn(usize, &BTreeMap<String, String>) -> Result<Option<ExecutionResult>, EngineError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            produce: Box::new(produce),
        })
    }

    /// Engine returning `table(rows, 2)` on every call
    pub fn table(rows: usize) -> Arc<Self> {
        Self::new(move |_, _| Ok(Some(table(rows, 2))))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Engine for CountingEngine {
    fn execute(
        &self,
        parameters: &BTreeMap<String, String>,
        _output_selector: Option<&str>,
    ) -> Result<Option<ExecutionResult>, EngineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        (self.produce)(call, parameters)
    }
}

/// Successful result with `rows` rows of `width` integer columns
pub fn table(rows: usize, width: usize) -> ExecutionResult {
    let shape: Vec<ColumnMeta> = (0..width)
        .map(|c| ColumnMeta::new(format!("c{}", c), ValueType::Integer))
        .collect();
    let mut result = ExecutionResult::new(true, 0);
    for r in 0..rows {
        let row: Vec<Value> = (0..width).map(|c| json!(r * 10 + c)).collect();
        result.store_row(row, &shape);
    }
    result
}

/// In-memory entity definition
pub fn definition(
    id: &str,
    kind: EntityKind,
    cache_results: bool,
    admin_only: bool,
) -> Arc<EntityDefinition> {
    let mut parameters = vec![ParamSpec {
        name: "x".to_string(),
        default: None,
    }];
    if cache_results {
        parameters.push(ParamSpec {
            name: CACHE_RESULTS_PARAM.to_string(),
            default: Some("true".to_string()),
        });
    }

    Arc::new(EntityDefinition {
        id: id.to_string(),
        path: PathBuf::from(format!("{}.sh", id)),
        kind,
        runtime: "bash".to_string(),
        runtime_args: vec![],
        parameters,
        admin_only,
        execute_at_start: false,
        exec_cwd: None,
        exec_timeout: None,
    })
}

/// Fixture entity directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/entities")
}

/// Script engine
///
/// Spawns the entity runtime, streams the row channel from stdout, collects
/// file artifacts from the result directory and enforces the timeout.
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::{Engine, EntityDefinition, EntityKind};
use crate::error::EngineError;
use crate::logging::{operations, services};
use crate::result::{ColumnMeta, ExecutionResult, ResultFile, ValueType};

/// Output step read when the request names none
pub const DEFAULT_STEP: &str = "OUTPUT";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Resolve the requested output selector to a step name.
///
/// Valid step names start with `OUTPUT`; anything else falls back to the
/// default step.
pub fn resolve_step(selector: Option<&str>) -> String {
    match selector.map(str::trim).filter(|s| !s.is_empty()) {
        None => DEFAULT_STEP.to_string(),
        Some(step) if step.starts_with(DEFAULT_STEP) => step.to_string(),
        Some(step) => {
            warn!(
                service = services::ENGINE,
                step, "Invalid output step name, using {}", DEFAULT_STEP
            );
            DEFAULT_STEP.to_string()
        }
    }
}

/// Environment variable name a parameter is exported under
fn param_env_name(name: &str) -> String {
    let suffix: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("JOBFRONT_PARAM_{}", suffix)
}

/// One line of the row channel
#[derive(Debug, Deserialize)]
struct RecordLine {
    step: String,
    #[serde(default)]
    columns: Option<Vec<ColumnSpec>>,
    #[serde(default)]
    row: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ColumnSpec {
    Named(String),
    Typed {
        name: String,
        #[serde(rename = "type", default)]
        value_type: Option<String>,
    },
}

impl ColumnSpec {
    fn into_meta(self) -> ColumnMeta {
        match self {
            Self::Named(spec) => match spec.split_once(':') {
                Some((name, ty)) => ColumnMeta::new(name.trim(), ValueType::parse(ty)),
                None => ColumnMeta::new(spec.trim(), ValueType::String),
            },
            Self::Typed { name, value_type } => ColumnMeta::new(
                name,
                value_type.as_deref().map(ValueType::parse).unwrap_or_default(),
            ),
        }
    }
}

/// Runs an entity script as a child process
pub struct ScriptEngine {
    owner_id: String,
    definition: Arc<EntityDefinition>,
    default_timeout: Option<Duration>,
}

impl ScriptEngine {
    pub fn new(
        owner_id: impl Into<String>,
        definition: Arc<EntityDefinition>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            definition,
            default_timeout,
        }
    }

    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    /// Bind request parameters to the declared ones, filling defaults
    fn bind_parameters(&self, parameters: &BTreeMap<String, String>) -> Vec<(String, String)> {
        for name in parameters.keys() {
            if !self.definition.declares(name) {
                debug!(
                    service = services::ENGINE,
                    entity = %self.definition.id,
                    parameter = %name,
                    "Ignoring undeclared parameter"
                );
            }
        }

        self.definition
            .parameters
            .iter()
            .filter_map(|spec| {
                parameters
                    .get(&spec.name)
                    .cloned()
                    .or_else(|| spec.default.clone())
                    .map(|value| (spec.name.clone(), value))
            })
            .collect()
    }

    fn working_dir(&self) -> Option<PathBuf> {
        let script_dir = self
            .definition
            .path
            .parent()
            .filter(|p| *p != Path::new(""));

        match &self.definition.exec_cwd {
            Some(cwd) if cwd.is_absolute() => Some(cwd.clone()),
            Some(cwd) => Some(script_dir.map(|d| d.join(cwd)).unwrap_or_else(|| cwd.clone())),
            None => script_dir.map(Path::to_path_buf),
        }
    }

    fn build_command(&self, step: &str, result_dir: &Path, bound: &[(String, String)]) -> Command {
        let definition = &self.definition;

        // Resolve runtime from PATH, falling back to the bare name
        let runtime_path = which::which(&definition.runtime).unwrap_or_else(|e| {
            debug!(
                service = services::ENGINE,
                runtime = %definition.runtime,
                "Could not find runtime in PATH: {}. Trying as-is.",
                e
            );
            PathBuf::from(&definition.runtime)
        });

        let mut cmd = Command::new(runtime_path);
        cmd.args(&definition.runtime_args);
        cmd.arg(&definition.path);

        if let Some(dir) = self.working_dir() {
            cmd.current_dir(dir);
        }

        cmd.env("JOBFRONT_OWNER_ID", &self.owner_id)
            .env("JOBFRONT_ENTITY_ID", &definition.id)
            .env("JOBFRONT_OUTPUT_STEP", step)
            .env("JOBFRONT_RESULT_DIR", result_dir);
        for (name, value) in bound {
            cmd.env(param_env_name(name), value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Engine for ScriptEngine {
    fn execute(
        &self,
        parameters: &BTreeMap<String, String>,
        output_selector: Option<&str>,
    ) -> Result<Option<ExecutionResult>, EngineError> {
        let start = Instant::now();
        let definition = &self.definition;
        let step = resolve_step(output_selector);
        let bound = self.bind_parameters(parameters);

        let workspace = tempfile::Builder::new().prefix("jobfront-").tempdir()?;
        let result_dir = workspace.path().join("results");
        fs::create_dir(&result_dir)?;

        let mut cmd = self.build_command(&step, &result_dir, &bound);
        debug!(service = services::ENGINE, "Command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            runtime: definition.runtime.clone(),
            source,
        })?;

        let stdout = child.stdout.take().map(spawn_line_reader);
        let stderr = child.stderr.take().map(spawn_text_reader);

        let timeout = definition.exec_timeout.or(self.default_timeout);
        let status = match timeout {
            Some(timeout) => wait_with_timeout(&mut child, timeout)?,
            None => Some(child.wait()?),
        };

        // Readers are not joined on timeout: grandchildren may still hold the pipes
        let Some(status) = status else {
            warn!(
                service = services::ENGINE,
                operation = operations::EXECUTE,
                entity = %definition.id,
                timeout_secs = timeout.map(|t| t.as_secs()).unwrap_or_default(),
                "Script timed out"
            );
            return Err(EngineError::TimedOut(timeout.unwrap_or_default()));
        };

        let stdout_lines = join_reader(stdout)?;
        let stderr_text = join_reader(stderr)?;
        if !stderr_text.is_empty() {
            debug!(
                service = services::ENGINE,
                entity = %definition.id,
                stderr = %stderr_text.trim_end(),
                "Script stderr"
            );
        }

        let Some(exit_code) = status.code() else {
            warn!(
                service = services::ENGINE,
                operation = operations::EXECUTE,
                entity = %definition.id,
                "Script terminated by signal, no result produced"
            );
            return Ok(None);
        };

        let mut result = ExecutionResult::new(exit_code == 0, exit_code)
            .with_error_count(u64::from(exit_code != 0));

        if definition.kind == EntityKind::Transformation {
            collect_rows(&mut result, &stdout_lines, &step)?;
        }

        for file in collect_files(&result_dir)? {
            result.add_file(file);
        }
        result.retain_workspace(workspace);

        info!(
            service = services::ENGINE,
            operation = operations::EXECUTE,
            entity = %definition.id,
            exit_code,
            rows = result.row_count(),
            files = result.files().len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Script completed"
        );

        Ok(Some(result))
    }
}

/// Parse row channel records for `step` into the result
fn collect_rows(
    result: &mut ExecutionResult,
    lines: &[String],
    step: &str,
) -> Result<(), EngineError> {
    let mut shapes: HashMap<String, Vec<ColumnMeta>> = HashMap::new();

    for line in lines {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let record: RecordLine = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                trace!(service = services::ENGINE, "Skipping stdout line: {}", e);
                continue;
            }
        };
        if record.step != step {
            continue;
        }

        if let Some(columns) = record.columns {
            let shape: Vec<ColumnMeta> = columns.into_iter().map(ColumnSpec::into_meta).collect();
            if shape.iter().any(|c| c.name.is_empty()) {
                return Err(EngineError::InvalidOutput(format!(
                    "step '{}' declares a column without a name",
                    step
                )));
            }
            shapes.insert(record.step.clone(), shape);
        }
        if let Some(row) = record.row {
            let shape = shapes.get(&record.step).map(Vec::as_slice).unwrap_or(&[]);
            result.store_row(row, shape);
        }
    }

    Ok(())
}

/// Entries left in the result directory, in file-name order
fn collect_files(result_dir: &Path) -> Result<Vec<ResultFile>, EngineError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(result_dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    paths.sort();

    paths
        .into_iter()
        .map(|path| ResultFile::from_path(path).map_err(EngineError::from))
        .collect()
}

fn spawn_line_reader<R: Read + Send + 'static>(source: R) -> JoinHandle<Vec<String>> {
    thread::spawn(move || {
        BufReader::new(source)
            .lines()
            .map_while(Result::ok)
            .collect()
    })
}

fn spawn_text_reader<R: Read + Send + 'static>(mut source: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader<T: Default>(handle: Option<JoinHandle<T>>) -> Result<T, EngineError> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| EngineError::Failed("output reader thread panicked".to_string())),
        None => Ok(T::default()),
    }
}

/// Wait for the child, killing it once `timeout` elapsed. `None` means timed out.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> Result<Option<ExitStatus>, EngineError> {
    let start = Instant::now();

    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if start.elapsed() >= timeout {
                    child.kill()?;
                    child.wait()?; // Reap zombie
                    return Ok(None);
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

//! The value produced by one run of an entity: status, rows and file artifacts.

use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Type of a column in the row shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Binary,
    None,
}

impl ValueType {
    /// Parse a declared type name, falling back to `String` for unknown names
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "integer" | "int" | "long" => Self::Integer,
            "number" | "float" | "double" | "bignumber" => Self::Number,
            "boolean" | "bool" => Self::Boolean,
            "date" | "timestamp" => Self::Date,
            "binary" => Self::Binary,
            "none" => Self::None,
            _ => Self::String,
        }
    }

    /// Infer a type from a cell value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::None,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Number,
            _ => Self::String,
        }
    }
}

/// Column descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Whether a produced artifact is a single file or a directory tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    File,
    Directory,
}

/// A file produced by an execution
#[derive(Debug, Clone)]
pub struct ResultFile {
    name: String,
    path: PathBuf,
    kind: ArtifactKind,
}

impl ResultFile {
    /// Describe an existing path, taking the logical name from its file name
    pub fn from_path(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let kind = if metadata.is_dir() {
            ArtifactKind::Directory
        } else {
            ArtifactKind::File
        };
        Ok(Self { name, path, kind })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// File extension, lower-cased
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    /// Size in bytes; directories report the total of the files they contain
    pub fn size(&self) -> io::Result<u64> {
        match self.kind {
            ArtifactKind::File => Ok(fs::metadata(&self.path)?.len()),
            ArtifactKind::Directory => {
                let mut total = 0;
                for entry in walkdir::WalkDir::new(&self.path) {
                    let entry = entry.map_err(io::Error::other)?;
                    if entry.file_type().is_file() {
                        total += entry.metadata().map_err(io::Error::other)?.len();
                    }
                }
                Ok(total)
            }
        }
    }

    /// Open the content for streaming
    pub fn open(&self) -> io::Result<File> {
        File::open(&self.path)
    }
}

/// Outcome of one execution.
///
/// The row shape is fixed by the first stored row and never changes after; every
/// stored row is trimmed or padded to that width. Once a result is handed to the
/// cache it is shared behind an `Arc` and only read.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    succeeded: bool,
    exit_status: i32,
    error_count: u64,
    row_shape: Option<Vec<ColumnMeta>>,
    rows: Vec<Vec<Value>>,
    files: Vec<ResultFile>,
    // Keeps the directory holding `files` alive for as long as the result is.
    workspace: Option<Arc<TempDir>>,
}

impl ExecutionResult {
    pub fn new(succeeded: bool, exit_status: i32) -> Self {
        Self {
            succeeded,
            exit_status,
            ..Default::default()
        }
    }

    pub fn with_error_count(mut self, error_count: u64) -> Self {
        self.error_count = error_count;
        self
    }

    /// Append a row. The first non-empty row (or declared shape) locks the
    /// shape; later rows are trimmed or padded with nulls to the locked width
    /// and `shape` is ignored.
    ///
    /// An empty `shape` synthesizes `field_<i>` columns typed from the row
    /// values. Empty rows stored before the lock are padded once it happens.
    pub fn store_row(&mut self, mut row: Vec<Value>, shape: &[ColumnMeta]) {
        let width = match &self.row_shape {
            Some(locked) => locked.len(),
            None if shape.is_empty() && row.is_empty() => {
                self.rows.push(row);
                return;
            }
            None => {
                let locked: Vec<ColumnMeta> = if shape.is_empty() {
                    row.iter()
                        .enumerate()
                        .map(|(i, v)| {
                            ColumnMeta::new(format!("field_{}", i), ValueType::of(v))
                        })
                        .collect()
                } else {
                    shape.to_vec()
                };
                let width = locked.len();
                self.row_shape = Some(locked);
                for earlier in &mut self.rows {
                    earlier.resize(width, Value::Null);
                }
                width
            }
        };
        row.resize(width, Value::Null);
        self.rows.push(row);
    }

    pub fn add_file(&mut self, file: ResultFile) {
        self.files.push(file);
    }

    pub fn retain_workspace(&mut self, workspace: TempDir) {
        self.workspace = Some(Arc::new(workspace));
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Column descriptors, empty until a row was stored
    pub fn row_shape(&self) -> &[ColumnMeta] {
        self.row_shape.as_deref().unwrap_or(&[])
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn files(&self) -> &[ResultFile] {
        &self.files
    }

    /// Value at row 0, column 0
    pub fn first_cell(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shape(names: &[&str]) -> Vec<ColumnMeta> {
        names
            .iter()
            .map(|n| ColumnMeta::new(*n, ValueType::String))
            .collect()
    }

    #[test]
    fn test_first_row_locks_shape() {
        let mut result = ExecutionResult::new(true, 0);
        result.store_row(vec![json!("a"), json!("b")], &shape(&["x", "y"]));
        result.store_row(
            vec![json!("c"), json!("d"), json!("e")],
            &shape(&["x", "y", "z"]),
        );

        assert_eq!(result.row_shape(), shape(&["x", "y"]).as_slice());
        assert_eq!(result.rows()[1], vec![json!("c"), json!("d")]);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let mut result = ExecutionResult::new(true, 0);
        result.store_row(vec![json!(1), json!(2)], &shape(&["x", "y"]));
        result.store_row(vec![json!(3)], &shape(&["x"]));

        assert_eq!(result.rows()[1], vec![json!(3), Value::Null]);
        assert_eq!(result.row_shape().len(), 2);
    }

    #[test]
    fn test_shape_synthesized_without_declaration() {
        let mut result = ExecutionResult::new(true, 0);
        result.store_row(vec![json!("eu"), json!(12)], &[]);

        assert_eq!(
            result.row_shape(),
            &[
                ColumnMeta::new("field_0", ValueType::String),
                ColumnMeta::new("field_1", ValueType::Integer),
            ]
        );
    }

    #[test]
    fn test_empty_first_row_does_not_lock_shape() {
        let mut result = ExecutionResult::new(true, 0);
        result.store_row(vec![], &[]);
        assert!(result.row_shape().is_empty());

        result.store_row(vec![json!(1), json!(2)], &[]);

        assert_eq!(result.row_shape().len(), 2);
        assert_eq!(
            result.rows(),
            &[vec![Value::Null, Value::Null], vec![json!(1), json!(2)]]
        );
    }

    #[test]
    fn test_rows_keep_insertion_order() {
        let mut result = ExecutionResult::new(true, 0);
        for i in 0..5 {
            result.store_row(vec![json!(i)], &shape(&["n"]));
        }
        let values: Vec<i64> = result
            .rows()
            .iter()
            .map(|r| r[0].as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(result.first_cell(), Some(&json!(0)));
    }

    #[test]
    fn test_value_type_parsing() {
        assert_eq!(ValueType::parse("Integer"), ValueType::Integer);
        assert_eq!(ValueType::parse("double"), ValueType::Number);
        assert_eq!(ValueType::parse("whatever"), ValueType::String);
        assert_eq!(ValueType::of(&json!(1.5)), ValueType::Number);
        assert_eq!(ValueType::of(&json!(true)), ValueType::Boolean);
    }

    #[test]
    fn test_result_file_from_path() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("report.CSV");
        fs::write(&file, "a,b\n1,2\n").unwrap();
        let dir = temp.path().join("charts");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("one.png"), [0u8; 10]).unwrap();
        fs::write(dir.join("two.png"), [0u8; 5]).unwrap();

        let report = ResultFile::from_path(&file).unwrap();
        assert_eq!(report.name(), "report.CSV");
        assert_eq!(report.kind(), ArtifactKind::File);
        assert_eq!(report.extension().as_deref(), Some("csv"));
        assert_eq!(report.size().unwrap(), 8);

        let charts = ResultFile::from_path(&dir).unwrap();
        assert_eq!(charts.kind(), ArtifactKind::Directory);
        assert_eq!(charts.size().unwrap(), 15);
    }
}

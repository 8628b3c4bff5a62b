//! Output rendering
//!
//! A request either names its output kind or leaves it to inference:
//!
//! 1. any file artifacts: [`OutputKind::ResultFiles`]
//! 2. job entities: [`OutputKind::ResultOnly`]
//! 3. exactly one row of one column: [`OutputKind::SingleCell`]
//! 4. everything else: [`OutputKind::Json`]
//!
//! Unrecognised output names fall through to inference instead of failing.

mod files;
mod formats;
mod sink;

pub use files::{mime_type, ResultFilesRenderer, BUNDLE_CONTENT_TYPE, BUNDLE_NAME};
pub use formats::{
    JsonRenderer, ResultOnlyRenderer, SingleCellRenderer, JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE,
};
pub use sink::{Attachment, BufferSink, OutputSink, WriterSink};

use std::fmt;
use std::io::{self, Write};
use tracing::{debug, error, warn};

use crate::engine::EntityKind;
use crate::error::RenderError;
use crate::logging::{operations, services, status};
use crate::result::ExecutionResult;

/// Body written when the engine produced no result at all
pub const NULL_RESULT_MESSAGE: &str =
    "The result is null, please check the server logs for a more detailed message.";

/// Requested output representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    Json,
    ResultFiles,
    ResultOnly,
    SingleCell,
    #[default]
    Inferred,
}

impl OutputKind {
    /// Match an output name case-insensitively; anything else means inference
    pub fn from_selector(selector: Option<&str>) -> Self {
        let Some(selector) = selector else {
            return Self::Inferred;
        };
        match selector.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "resultfiles" => Self::ResultFiles,
            "resultonly" => Self::ResultOnly,
            "singlecell" => Self::SingleCell,
            _ => Self::Inferred,
        }
    }

    /// Pick a concrete kind for a result
    pub fn infer(result: &ExecutionResult, entity_kind: EntityKind) -> Self {
        if !result.files().is_empty() {
            Self::ResultFiles
        } else if entity_kind == EntityKind::Job {
            Self::ResultOnly
        } else if result.row_count() == 1 && result.row_shape().len() == 1 {
            Self::SingleCell
        } else {
            Self::Json
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Json => "Json",
            Self::ResultFiles => "ResultFiles",
            Self::ResultOnly => "ResultOnly",
            Self::SingleCell => "SingleCell",
            Self::Inferred => "Inferred",
        };
        f.write_str(name)
    }
}

/// Per-request rendering state. Writes through it are counted.
pub struct RenderContext<'a> {
    sink: &'a mut dyn OutputSink,
    kind: OutputKind,
    entity_kind: EntityKind,
    download: bool,
    bytes_written: u64,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        sink: &'a mut dyn OutputSink,
        kind: OutputKind,
        entity_kind: EntityKind,
        download: bool,
    ) -> Self {
        Self {
            sink,
            kind,
            entity_kind,
            download,
            bytes_written: 0,
        }
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.entity_kind
    }

    pub fn download(&self) -> bool {
        self.download
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn set_content_type(&mut self, mime: &str) {
        self.sink.set_content_type(mime);
    }

    pub fn set_attachment_headers(&mut self, filename: &str, size: u64) {
        self.sink.set_attachment_headers(filename, size);
    }

    fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.set_content_type(TEXT_CONTENT_TYPE);
        self.write_all(text.as_bytes())
    }
}

impl Write for RenderContext<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write(buf)?;
        self.bytes_written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Turns an execution result into bytes on the context's sink
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        result: &ExecutionResult,
        ctx: &mut RenderContext<'_>,
    ) -> Result<(), RenderError>;
}

/// Picks a concrete renderer from the result shape and delegates to it.
///
/// File rendering failures are logged and leave the response empty.
pub struct InferredRenderer;

impl Renderer for InferredRenderer {
    fn render(
        &self,
        result: &ExecutionResult,
        ctx: &mut RenderContext<'_>,
    ) -> Result<(), RenderError> {
        let kind = OutputKind::infer(result, ctx.entity_kind());
        debug!(
            service = services::RENDERER,
            operation = operations::RENDER,
            inferred = %kind,
            "Output kind inferred"
        );

        match kind {
            OutputKind::ResultFiles => {
                if let Err(e) = ResultFilesRenderer.render(result, ctx) {
                    warn!(
                        service = services::RENDERER,
                        operation = operations::RENDER,
                        status = status::ERROR,
                        error = %e,
                        "Failed to send result files"
                    );
                }
                Ok(())
            }
            other => renderer_for(other).render(result, ctx),
        }
    }
}

/// Renderer for an output kind
pub fn renderer_for(kind: OutputKind) -> &'static dyn Renderer {
    match kind {
        OutputKind::Json => &JsonRenderer,
        OutputKind::ResultFiles => &ResultFilesRenderer,
        OutputKind::ResultOnly => &ResultOnlyRenderer,
        OutputKind::SingleCell => &SingleCellRenderer,
        OutputKind::Inferred => &InferredRenderer,
    }
}

/// Render a dispatch outcome, never failing the response.
///
/// An absent result writes [`NULL_RESULT_MESSAGE`]. Render failures are logged;
/// when nothing was written yet (and the output is not a file transfer) a
/// short diagnostic is written instead.
pub fn render_result(result: Option<&ExecutionResult>, ctx: &mut RenderContext<'_>) {
    let outcome = match result {
        None => ctx.write_text(NULL_RESULT_MESSAGE).map_err(RenderError::from),
        Some(result) => renderer_for(ctx.kind()).render(result, ctx),
    };

    if let Err(e) = outcome {
        if ctx.kind() == OutputKind::ResultFiles {
            warn!(
                service = services::RENDERER,
                operation = operations::RENDER,
                status = status::ERROR,
                error = %e,
                "Failed to send result files"
            );
        } else {
            error!(
                service = services::RENDERER,
                operation = operations::RENDER,
                status = status::ERROR,
                output = %ctx.kind(),
                bytes_written = ctx.bytes_written(),
                error = %e,
                "Failed to render result"
            );
            if ctx.bytes_written() == 0 {
                let _ = ctx.write_text(&format!("Failed to render result: {}", e));
            }
        }
    }

    if let Err(e) = ctx.sink.finish() {
        debug!(service = services::RENDERER, error = %e, "Output sink finish failed");
    }
}

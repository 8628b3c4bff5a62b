//! Result file rendering
//!
//! A single plain file is streamed as-is. Anything else is bundled into a
//! tar+zstd archive staged on disk, so the archive size is known before the
//! attachment headers go out.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use tar::Builder;
use tracing::{debug, info};

use super::{RenderContext, Renderer};
use crate::error::RenderError;
use crate::logging::{operations, services};
use crate::result::{ArtifactKind, ExecutionResult, ResultFile};

/// File name of the bundle sent for multiple artifacts
pub const BUNDLE_NAME: &str = "results.tar.zst";
pub const BUNDLE_CONTENT_TYPE: &str = "application/zstd";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const ZSTD_LEVEL: i32 = 3;

/// MIME type for a file extension
pub fn mime_type(extension: Option<&str>) -> &'static str {
    let Some(extension) = extension else {
        return DEFAULT_CONTENT_TYPE;
    };
    match extension.to_ascii_lowercase().as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "xml" => "text/xml",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "zst" => "application/zstd",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Writes the produced file artifacts
pub struct ResultFilesRenderer;

impl Renderer for ResultFilesRenderer {
    fn render(
        &self,
        result: &ExecutionResult,
        ctx: &mut RenderContext<'_>,
    ) -> Result<(), RenderError> {
        match result.files() {
            [] => {
                info!(
                    service = services::RENDERER,
                    operation = operations::RENDER,
                    "No result files to send"
                );
                Ok(())
            }
            [single] if single.kind() == ArtifactKind::File => send_file(single, ctx),
            files => send_bundle(files, ctx),
        }
    }
}

fn send_file(file: &ResultFile, ctx: &mut RenderContext<'_>) -> Result<(), RenderError> {
    let file_error = |source: io::Error| RenderError::File {
        path: file.path().to_path_buf(),
        source,
    };

    let mut content = file.open().map_err(file_error)?;
    let size = file.size().map_err(file_error)?;

    ctx.set_content_type(mime_type(file.extension().as_deref()));
    if ctx.download() {
        ctx.set_attachment_headers(file.name(), size);
    }

    let copied = io::copy(&mut content, ctx)?;
    debug!(
        service = services::RENDERER,
        operation = operations::RENDER,
        file = %file.name(),
        size_bytes = copied,
        "Result file sent"
    );
    Ok(())
}

fn send_bundle(files: &[ResultFile], ctx: &mut RenderContext<'_>) -> Result<(), RenderError> {
    let mut staged = tempfile::tempfile()?;
    write_bundle(files, &mut staged)?;

    let size = staged.seek(SeekFrom::End(0))?;
    staged.seek(SeekFrom::Start(0))?;

    ctx.set_content_type(BUNDLE_CONTENT_TYPE);
    ctx.set_attachment_headers(BUNDLE_NAME, size);

    io::copy(&mut staged, ctx)?;
    debug!(
        service = services::RENDERER,
        operation = operations::RENDER,
        file_count = files.len(),
        size_bytes = size,
        "Result bundle sent"
    );
    Ok(())
}

/// Write a tar+zstd archive of `files` into `out`
fn write_bundle(files: &[ResultFile], out: &mut File) -> Result<(), RenderError> {
    let encoder = zstd::stream::write::Encoder::new(out, ZSTD_LEVEL)
        .map_err(|e| RenderError::Archive(e.to_string()))?;
    let mut tar = Builder::new(encoder);

    for file in files {
        let appended = match file.kind() {
            ArtifactKind::Directory => tar.append_dir_all(file.name(), file.path()),
            ArtifactKind::File => tar.append_path_with_name(file.path(), file.name()),
        };
        appended.map_err(|source| RenderError::File {
            path: file.path().to_path_buf(),
            source,
        })?;
    }

    let encoder = tar
        .into_inner()
        .map_err(|e| RenderError::Archive(format!("Failed to finalize tar archive: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| RenderError::Archive(format!("Failed to compress archive with zstd: {}", e)))?;
    Ok(())
}

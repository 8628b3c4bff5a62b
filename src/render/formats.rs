//! Tabular and status renderers.

use serde::Serialize;
use serde_json::Value;
use std::io::{BufWriter, Write};

use super::{RenderContext, Renderer};
use crate::error::RenderError;
use crate::result::{ColumnMeta, ExecutionResult};

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

#[derive(Serialize)]
struct TableBody<'a> {
    columns: &'a [ColumnMeta],
    rows: &'a [Vec<Value>],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    result: bool,
    exit_status: i32,
    nr_rows: usize,
    nr_errors: u64,
}

fn write_json<T: Serialize>(ctx: &mut RenderContext<'_>, body: &T) -> Result<(), RenderError> {
    ctx.set_content_type(JSON_CONTENT_TYPE);
    let mut out = BufWriter::new(&mut *ctx);
    serde_json::to_writer(&mut out, body)?;
    out.flush()?;
    Ok(())
}

/// Column metadata plus every row, in row order
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(
        &self,
        result: &ExecutionResult,
        ctx: &mut RenderContext<'_>,
    ) -> Result<(), RenderError> {
        write_json(
            ctx,
            &TableBody {
                columns: result.row_shape(),
                rows: result.rows(),
            },
        )
    }
}

/// Status summary only
pub struct ResultOnlyRenderer;

impl Renderer for ResultOnlyRenderer {
    fn render(
        &self,
        result: &ExecutionResult,
        ctx: &mut RenderContext<'_>,
    ) -> Result<(), RenderError> {
        write_json(
            ctx,
            &StatusBody {
                result: result.succeeded(),
                exit_status: result.exit_status(),
                nr_rows: result.row_count(),
                nr_errors: result.error_count(),
            },
        )
    }
}

/// First cell of the first row as bare text
pub struct SingleCellRenderer;

impl Renderer for SingleCellRenderer {
    fn render(
        &self,
        result: &ExecutionResult,
        ctx: &mut RenderContext<'_>,
    ) -> Result<(), RenderError> {
        ctx.set_content_type(TEXT_CONTENT_TYPE);
        match result.first_cell() {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => ctx.write_all(text.as_bytes())?,
            Some(other) => ctx.write_all(other.to_string().as_bytes())?,
        }
        Ok(())
    }
}

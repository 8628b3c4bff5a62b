//! Structured logging utilities for Jobfront
//!
//! All logs use structured fields for easy parsing and analysis.
//!
//! # Log Format Conventions
//!
//! - `service`: The component emitting the event ("dispatcher", "result_cache", ...)
//! - `operation`: The operation being performed (e.g., "dispatch", "render")
//! - `status`: The result status ("hit", "miss", "error")
//! - `entity`: Entity id
//! - `object_id`: Result key digest
//! - `size_bytes`: Size in bytes
//!
//! # Examples
//!
//! ```rust,ignore
//! use tracing::info;
//!
//! info!(
//!     service = "dispatcher",
//!     operation = "dispatch",
//!     status = "hit",
//!     entity = %entity_id,
//!     object_id = %key.digest(),
//!     "cache hit"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Custom formatter that shows "jobfront" instead of full module path
struct JobfrontFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for JobfrontFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        // Write timestamp
        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        // Write level with jobfront in parentheses and color if ansi enabled
        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m", // Red
                tracing::Level::WARN => "\x1b[33m",  // Yellow
                tracing::Level::INFO => "\x1b[32m",  // Green
                tracing::Level::DEBUG => "\x1b[34m", // Blue
                tracing::Level::TRACE => "\x1b[35m", // Magenta
            };
            write!(writer, "{}{:5}(jobfront)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(jobfront): ", meta.level())?;
        }

        // Write fields and message
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    Pretty,
    /// Compact format (for CI/production)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from environment variable (JOBFRONT_LOG_FORMAT)
    pub fn from_env() -> Self {
        match std::env::var("JOBFRONT_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => {
                // Default: pretty for dev, compact for production/CI
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            }
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "debug", "info", "warn"); ignored when
///   `level` is given
/// - `JOBFRONT_LOG_FORMAT`: Set format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
///
/// # Examples
///
/// ```bash
/// # Pretty format with debug logs
/// RUST_LOG=debug jobfront serve
///
/// # JSON format for production
/// JOBFRONT_LOG_FORMAT=json jobfront serve
///
/// # Compact format in CI
/// CI=true jobfront run sales
/// ```
pub fn init(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let format = LogFormat::from_env();

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(JobfrontFormatter { with_ansi: true })
                        .with_writer(io::stderr),
                )
                .try_init()
                .ok();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(JobfrontFormatter { with_ansi: false })
                        .with_writer(io::stderr),
                )
                .try_init()
                .ok();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_ansi(false)
                        .with_writer(io::stderr)
                        .json(),
                )
                .try_init()
                .ok();
        }
    }
}

/// Service names for consistent logging
pub mod services {
    pub const DISPATCHER: &str = "dispatcher";
    pub const RESULT_CACHE: &str = "result_cache";
    pub const RENDERER: &str = "renderer";
    pub const ENGINE: &str = "engine";
    pub const REGISTRY: &str = "registry";
}

/// Operation names for consistent logging
pub mod operations {
    pub const DISPATCH: &str = "dispatch";
    pub const EXECUTE: &str = "execute";
    pub const EVICT: &str = "evict";
    pub const RENDER: &str = "render";
    pub const LOAD: &str = "load";
}

/// Status values for consistent logging
pub mod status {
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const BYPASS: &str = "bypass";
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
}

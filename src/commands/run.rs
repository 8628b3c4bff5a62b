use anyhow::{bail, Result};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tracing::debug;

use super::{load_config, load_registry};
use crate::cli::RunArgs;
use jobfront::registry::EntityState;
use jobfront::render::{render_result, OutputKind, RenderContext, WriterSink};

pub fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    let registry = load_registry(&config)?;

    let entity = match registry.get(&args.entity) {
        Some(EntityState::Available(entity)) => Arc::clone(entity),
        Some(EntityState::Unavailable(reason)) => {
            bail!("Entity '{}' is unavailable: {}", args.entity, reason)
        }
        None => bail!("Entity not found: {}", args.entity),
    };

    let parameters: HashMap<String, String> = args.params.into_iter().collect();
    let result = entity.dispatch(&parameters, args.step.as_deref(), args.bypass_cache)?;

    let mut sink = WriterSink::new(io::stdout());
    let mut ctx = RenderContext::new(
        &mut sink,
        OutputKind::from_selector(args.output.as_deref()),
        entity.kind(),
        args.download,
    );
    render_result(result.as_deref(), &mut ctx);

    debug!(
        content_type = ?sink.content_type(),
        attachment = ?sink.attachment().map(|a| &a.filename),
        "Rendered to stdout"
    );

    match result {
        Some(result) if !result.succeeded() => bail!(
            "Entity '{}' finished with exit status {}",
            args.entity,
            result.exit_status()
        ),
        _ => Ok(()),
    }
}

use anyhow::Result;

use super::{load_config, load_registry};
use crate::cli::ListArgs;
use jobfront::registry::EntitySummary;

pub fn run(args: ListArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    let registry = load_registry(&config)?;
    let summaries = registry.summaries();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No entities found in {}", config.entities.dir);
        return Ok(());
    }

    println!(
        "{:<24} {:<15} {:<6} {:<6} STATUS",
        "ENTITY", "KIND", "CACHE", "ADMIN"
    );
    for summary in &summaries {
        println!("{}", format_row(summary));
    }

    Ok(())
}

fn format_row(summary: &EntitySummary) -> String {
    let kind = summary
        .kind
        .map(|k| k.to_string())
        .unwrap_or_else(|| "-".to_string());
    let status = match &summary.reason {
        Some(reason) => format!("unavailable: {}", reason),
        None => "available".to_string(),
    };

    format!(
        "{:<24} {:<15} {:<6} {:<6} {}",
        summary.id,
        kind,
        yes_no(summary.cache_results),
        yes_no(summary.admin_only),
        status
    )
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

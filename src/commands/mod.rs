pub mod list;
pub mod run;
pub mod serve;

use anyhow::Result;
use std::sync::Arc;

use crate::cli::CommonConfigArgs;
use jobfront::cache::create_cache;
use jobfront::config::{load_config_with_discovery, JobfrontConfig};
use jobfront::registry::EntityRegistry;

/// Load configuration and apply command-line overrides
pub fn load_config(common: &CommonConfigArgs) -> Result<JobfrontConfig> {
    let mut config = load_config_with_discovery(common.config.as_deref())?;

    if let Some(dir) = &common.entities_dir {
        config.entities.dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Build the shared cache and load every entity
pub fn load_registry(config: &JobfrontConfig) -> Result<Arc<EntityRegistry>> {
    let cache = create_cache(&config.cache)?;
    Ok(Arc::new(EntityRegistry::load(config, cache)?))
}

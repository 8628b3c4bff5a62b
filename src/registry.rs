//! Entity registry: loads entity scripts and owns one dispatcher per entity.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::cache::ResultCache;
use crate::config::JobfrontConfig;
use crate::dispatch::Dispatcher;
use crate::engine::{parse_definition, Engine, EntityDefinition, EntityKind, ScriptEngine};
use crate::error::{ConfigurationError, DispatchError};
use crate::logging::{operations, services, status};
use crate::result::ExecutionResult;

/// A loaded, dispatchable entity
pub struct Entity {
    definition: Arc<EntityDefinition>,
    dispatcher: Dispatcher,
}

impl Entity {
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn kind(&self) -> EntityKind {
        self.definition.kind
    }

    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatch(
        &self,
        parameters: &HashMap<String, String>,
        output_selector: Option<&str>,
        bypass_cache: bool,
    ) -> Result<Option<Arc<ExecutionResult>>, DispatchError> {
        self.dispatcher
            .dispatch(parameters, output_selector, bypass_cache)
    }
}

/// Registry slot: an entity, or the reason it could not be loaded
pub enum EntityState {
    Available(Arc<Entity>),
    Unavailable(ConfigurationError),
}

/// Row of the entity listing
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    pub admin_only: bool,
    pub cache_results: bool,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// All entities of a process, sharing one result cache
pub struct EntityRegistry {
    owner_id: String,
    cache: Arc<dyn ResultCache>,
    entities: BTreeMap<String, EntityState>,
}

impl EntityRegistry {
    pub fn new(owner_id: impl Into<String>, cache: Arc<dyn ResultCache>) -> Self {
        Self {
            owner_id: owner_id.into(),
            cache,
            entities: BTreeMap::new(),
        }
    }

    /// Load every entity script of the configured directory
    pub fn load(config: &JobfrontConfig, cache: Arc<dyn ResultCache>) -> Result<Self> {
        let mut registry = Self::new(&config.owner, cache);
        registry.load_dir(Path::new(&config.entities.dir), config.default_timeout()?)?;
        Ok(registry)
    }

    /// Scan `dir` (non-recursive) for entity scripts.
    ///
    /// A script that fails to parse is registered as unavailable; loading
    /// carries on with the others.
    pub fn load_dir(&mut self, dir: &Path, default_timeout: Option<Duration>) -> Result<()> {
        if !dir.is_dir() {
            anyhow::bail!("Entity directory not found: {}", dir.display());
        }

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry
                .with_context(|| format!("Failed to scan entity directory: {}", dir.display()))?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !entry.file_type().is_file() {
                continue;
            }

            match parse_definition(entry.path()) {
                Ok(definition) => {
                    let definition = Arc::new(definition);
                    let engine = ScriptEngine::new(
                        self.owner_id.clone(),
                        Arc::clone(&definition),
                        default_timeout,
                    );
                    self.register(definition, Arc::new(engine));
                }
                Err(reason) => {
                    let id = entry
                        .path()
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default();
                    self.mark_unavailable(id, reason);
                }
            }
        }

        info!(
            service = services::REGISTRY,
            operation = operations::LOAD,
            dir = %dir.display(),
            entities = self.entities.len(),
            "Entities loaded"
        );
        Ok(())
    }

    /// Register an entity backed by `engine`, replacing any entity with the same id
    pub fn register(&mut self, definition: Arc<EntityDefinition>, engine: Arc<dyn Engine>) {
        let dispatcher = Dispatcher::new(
            self.owner_id.clone(),
            definition.id.clone(),
            definition.cache_results(),
            engine,
            Arc::clone(&self.cache),
        );

        info!(
            service = services::REGISTRY,
            operation = operations::LOAD,
            entity = %definition.id,
            kind = %definition.kind,
            cache_results = definition.cache_results(),
            admin_only = definition.admin_only,
            "Entity registered"
        );

        self.entities.insert(
            definition.id.clone(),
            EntityState::Available(Arc::new(Entity {
                definition,
                dispatcher,
            })),
        );
    }

    pub fn mark_unavailable(&mut self, id: impl Into<String>, reason: ConfigurationError) {
        let id = id.into();
        warn!(
            service = services::REGISTRY,
            operation = operations::LOAD,
            status = status::ERROR,
            entity = %id,
            error = %reason,
            "Entity unavailable"
        );
        self.entities.insert(id, EntityState::Unavailable(reason));
    }

    pub fn get(&self, id: &str) -> Option<&EntityState> {
        self.entities.get(id)
    }

    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.cache
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Listing of every entity, sorted by id
    pub fn summaries(&self) -> Vec<EntitySummary> {
        self.entities
            .iter()
            .map(|(id, state)| match state {
                EntityState::Available(entity) => EntitySummary {
                    id: id.clone(),
                    kind: Some(entity.kind()),
                    admin_only: entity.definition.admin_only,
                    cache_results: entity.dispatcher.caching_enabled(),
                    available: true,
                    reason: None,
                },
                EntityState::Unavailable(reason) => EntitySummary {
                    id: id.clone(),
                    kind: None,
                    admin_only: false,
                    cache_results: false,
                    available: false,
                    reason: Some(reason.to_string()),
                },
            })
            .collect()
    }

    /// Run every `execute-at-start` entity once with no parameters.
    ///
    /// Returns the number of entities that ran without an engine failure.
    pub fn execute_at_start(&self) -> usize {
        let no_params = HashMap::new();
        let mut completed = 0;

        for state in self.entities.values() {
            let EntityState::Available(entity) = state else {
                continue;
            };
            if !entity.definition.execute_at_start {
                continue;
            }

            match entity.dispatch(&no_params, None, false) {
                Ok(result) => {
                    completed += 1;
                    info!(
                        service = services::REGISTRY,
                        entity = %entity.id(),
                        succeeded = result.as_ref().map(|r| r.succeeded()),
                        "Executed at start"
                    );
                }
                Err(e) => error!(
                    service = services::REGISTRY,
                    status = status::ERROR,
                    entity = %entity.id(),
                    error = %e,
                    "Execute at start failed"
                ),
            }
        }

        completed
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::fs;
    use tempfile::TempDir;

    fn registry_for(dir: &Path) -> (Arc<MemoryCache>, EntityRegistry) {
        let cache = Arc::new(MemoryCache::unbounded());
        let mut registry = EntityRegistry::new("owner", cache.clone());
        registry.load_dir(dir, None).unwrap();
        (cache, registry)
    }

    #[test]
    fn test_load_dir_marks_broken_entities_unavailable() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("good.sh"), "#!/usr/bin/env bash\necho hi\n").unwrap();
        fs::write(temp.path().join("bad.sh"), "#!/usr/bin/env bash\n#JOBFRONT nope\n").unwrap();
        fs::write(temp.path().join(".hidden.sh"), "#!/usr/bin/env bash\n").unwrap();
        fs::create_dir(temp.path().join("subdir")).unwrap();

        let (_cache, registry) = registry_for(temp.path());

        assert_eq!(registry.len(), 2);
        assert!(matches!(registry.get("good"), Some(EntityState::Available(_))));
        assert!(matches!(registry.get("bad"), Some(EntityState::Unavailable(_))));
        assert!(registry.get(".hidden").is_none());

        let summaries = registry.summaries();
        assert_eq!(summaries[0].id, "bad");
        assert!(!summaries[0].available);
        assert!(summaries[0].reason.as_deref().unwrap().contains("Unknown directive"));
        assert!(summaries[1].available);
    }

    #[test]
    fn test_missing_dir_is_error() {
        let cache = Arc::new(MemoryCache::unbounded());
        let mut registry = EntityRegistry::new("owner", cache);
        assert!(registry.load_dir(Path::new("/nonexistent/jobfront"), None).is_err());
    }

    #[test]
    fn test_execute_at_start_warms_cache() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("warm.sh"),
            "#!/usr/bin/env bash\n#JOBFRONT execute-at-start\n#JOBFRONT param \"jobfront.cacheResults\" default=\"true\"\necho '{\"step\":\"OUTPUT\",\"row\":[1]}'\n",
        )
        .unwrap();
        fs::write(temp.path().join("lazy.sh"), "#!/usr/bin/env bash\n").unwrap();

        let (cache, registry) = registry_for(temp.path());

        assert_eq!(registry.execute_at_start(), 1);
        assert_eq!(cache.len(), 1);
    }
}

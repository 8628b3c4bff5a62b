use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::EvictionPolicyType;

/// Name of the configuration file looked up by discovery
pub const CONFIG_FILE_NAME: &str = "jobfront.toml";

/// Complete Jobfront configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobfrontConfig {
    /// Owner id shared by every entity of this process (part of each cache key)
    #[serde(default = "default_owner")]
    pub owner: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub entities: EntitiesConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for JobfrontConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            server: ServerConfig::default(),
            entities: EntitiesConfig::default(),
            cache: CacheConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Entity definitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitiesConfig {
    /// Directory holding the entity scripts
    #[serde(default = "default_entities_dir")]
    pub dir: String,

    /// Timeout applied to entities that do not declare one (e.g. "10m")
    #[serde(default)]
    pub default_timeout: Option<String>,
}

impl Default for EntitiesConfig {
    fn default() -> Self {
        Self {
            dir: default_entities_dir(),
            default_timeout: None,
        }
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Eviction policy: none, lru, lfu, ttl
    #[serde(default = "default_eviction_policy")]
    pub eviction_policy: String,

    /// Maximum number of cached results (0 = unbounded)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Lifetime of a cached result under the TTL policy
    #[serde(default = "default_ttl")]
    pub default_ttl: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            eviction_policy: default_eviction_policy(),
            max_entries: default_max_entries(),
            default_ttl: default_ttl(),
        }
    }
}

/// Access control configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Bearer tokens that grant access to admin-only entities
    #[serde(default)]
    pub admin_tokens: Vec<String>,
}

fn default_owner() -> String {
    "jobfront".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_entities_dir() -> String {
    "entities".to_string()
}

fn default_eviction_policy() -> String {
    "lru".to_string()
}

fn default_max_entries() -> usize {
    1000
}

fn default_ttl() -> String {
    "1h".to_string()
}

impl JobfrontConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: JobfrontConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.owner.is_empty() {
            anyhow::bail!("owner must not be empty");
        }

        if self.entities.dir.is_empty() {
            anyhow::bail!("entities.dir must be set");
        }

        if let Some(timeout) = &self.entities.default_timeout {
            parse_duration(timeout).context("entities.default_timeout is invalid")?;
        }

        self.cache
            .eviction_policy
            .parse::<EvictionPolicyType>()
            .context("cache.eviction_policy is invalid")?;

        parse_duration(&self.cache.default_ttl).context("cache.default_ttl is invalid")?;

        Ok(())
    }

    /// Default timeout for entity executions, if configured
    pub fn default_timeout(&self) -> Result<Option<Duration>> {
        self.entities
            .default_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
    }
}

/// Discovers the configuration file by traversing up the directory tree
pub fn discover_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Some(config_path);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    // Fallback to global config
    dirs::config_dir()
        .map(|dir| dir.join("jobfront").join("config.toml"))
        .filter(|path| path.exists())
}

/// Loads configuration with auto-discovery support
///
/// If `explicit_path` is provided, loads config from that path. Otherwise the
/// file is discovered from the current directory upwards; defaults are used when
/// nothing is found.
pub fn load_config_with_discovery(explicit_path: Option<&str>) -> Result<JobfrontConfig> {
    let config = if let Some(path) = explicit_path {
        JobfrontConfig::from_file(path)?
    } else {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;

        match discover_config(&current_dir) {
            Some(path) => {
                tracing::info!("Using config: {}", path.display());
                JobfrontConfig::from_file(&path)?
            }
            None => {
                tracing::warn!("No configuration file found, using defaults");
                JobfrontConfig::default()
            }
        }
    };

    config.validate()?;
    Ok(config)
}

/// Parse duration string (e.g., "30s", "10m", "1h", "7d"); bare numbers are seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err(anyhow!("Empty duration string"));
    }

    let (num_str, multiplier) = match s.as_bytes()[s.len() - 1] {
        b's' => (&s[..s.len() - 1], 1),
        b'm' => (&s[..s.len() - 1], 60),
        b'h' => (&s[..s.len() - 1], 60 * 60),
        b'd' => (&s[..s.len() - 1], 24 * 60 * 60),
        _ => (s.as_str(), 1),
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid duration: {}. Use: s, m, h, d", s))?;

    Ok(Duration::from_secs(num * multiplier))
}

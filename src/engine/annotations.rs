/// KDL annotation parser for entity definitions
///
/// Parses #JOBFRONT directives from entity scripts:
///
/// ```text
/// #!/usr/bin/env bash
/// #JOBFRONT kind "transformation"
/// #JOBFRONT param "region" default="eu"
/// #JOBFRONT param "jobfront.cacheResults" default="true"
/// #JOBFRONT exec timeout="5m"
/// #JOBFRONT admin-only
/// ```
use kdl::{KdlDocument, KdlNode};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::EntityKind;
use crate::config::parse_duration;
use crate::error::ConfigurationError;

/// Declared parameter whose default value switches result caching on
pub const CACHE_RESULTS_PARAM: &str = "jobfront.cacheResults";

const HASH_RUNTIMES: &[&str] = &["bash", "sh", "zsh", "python3", "python", "ruby", "perl"];
const SLASH_RUNTIMES: &[&str] = &["node", "deno", "bun"];

/// Parameter declared by an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub default: Option<String>,
}

/// Complete entity definition parsed from a script
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    /// Entity id (the script's file stem)
    pub id: String,
    pub path: PathBuf,
    pub kind: EntityKind,
    pub runtime: String,
    pub runtime_args: Vec<String>,
    pub parameters: Vec<ParamSpec>,
    pub admin_only: bool,
    pub execute_at_start: bool,
    pub exec_cwd: Option<PathBuf>,
    pub exec_timeout: Option<Duration>,
}

impl EntityDefinition {
    fn empty(id: String, path: PathBuf) -> Self {
        Self {
            id,
            path,
            kind: EntityKind::default(),
            runtime: String::new(),
            runtime_args: Vec::new(),
            parameters: Vec::new(),
            admin_only: false,
            execute_at_start: false,
            exec_cwd: None,
            exec_timeout: None,
        }
    }

    /// Default value of a declared parameter
    pub fn parameter_default(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.default.as_deref())
    }

    pub fn declares(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }

    /// Whether results of this entity are cached. Disabled unless the
    /// cache parameter defaults to `true` (case-insensitive).
    pub fn cache_results(&self) -> bool {
        self.parameter_default(CACHE_RESULTS_PARAM)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

/// Parse an entity definition from a script file
pub fn parse_definition(path: &Path) -> Result<EntityDefinition, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::Invalid {
        path: path.to_path_buf(),
        reason,
    };

    let content = fs::read_to_string(path).map_err(|e| ConfigurationError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("file has no name".to_string()))?;

    let mut lines = content.lines().peekable();

    let (runtime, runtime_args) = match lines.peek() {
        Some(first) if first.starts_with("#!") => {
            let parsed = parse_shebang(first);
            lines.next();
            parsed
        }
        _ => (String::new(), Vec::new()),
    };

    // Detect comment prefix based on runtime; without one, accept both
    let prefixes: &[&str] = if runtime.is_empty() {
        &["#JOBFRONT", "//JOBFRONT"]
    } else if HASH_RUNTIMES.contains(&runtime.as_str()) {
        &["#JOBFRONT"]
    } else if SLASH_RUNTIMES.contains(&runtime.as_str()) {
        &["//JOBFRONT"]
    } else {
        return Err(ConfigurationError::UnsupportedRuntime(runtime));
    };

    let mut kdl_lines = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        for prefix in prefixes {
            if let Some(directive) = trimmed.strip_prefix(prefix) {
                kdl_lines.push(directive.trim());
                break;
            }
        }
    }

    let doc: KdlDocument = kdl_lines
        .join("\n")
        .parse()
        .map_err(|e| invalid(format!("Invalid KDL syntax: {}", e)))?;

    let mut definition = EntityDefinition::empty(id, path.to_path_buf());
    definition.runtime = runtime;
    definition.runtime_args = runtime_args;

    for node in doc.nodes() {
        parse_kdl_node(&mut definition, node)
            .map_err(|reason| invalid(format!("directive '{}': {}", node.name().value(), reason)))?;
    }

    if definition.runtime.is_empty() {
        return Err(invalid(
            "Runtime not specified. Add a shebang (#!/usr/bin/env bash) or a runtime directive"
                .to_string(),
        ));
    }
    if !HASH_RUNTIMES.contains(&definition.runtime.as_str())
        && !SLASH_RUNTIMES.contains(&definition.runtime.as_str())
    {
        return Err(ConfigurationError::UnsupportedRuntime(definition.runtime));
    }

    Ok(definition)
}

/// Parse shebang line to extract runtime and args
///
/// Examples: `#!/usr/bin/env bash`, `#!/usr/bin/env -S python3 -u`, `#!/bin/sh -e`
fn parse_shebang(line: &str) -> (String, Vec<String>) {
    let mut parts = line.trim_start_matches("#!").split_whitespace();

    let Some(program) = parts.next() else {
        return (String::new(), Vec::new());
    };

    let mut rest: Vec<&str> = parts.collect();
    let runtime = if program.ends_with("/env") || program == "env" {
        rest.retain(|p| *p != "-S");
        if rest.is_empty() {
            return (String::new(), Vec::new());
        }
        rest.remove(0).to_string()
    } else {
        Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    };

    (runtime, rest.into_iter().map(str::to_string).collect())
}

/// Parse a single KDL node into the definition
fn parse_kdl_node(definition: &mut EntityDefinition, node: &KdlNode) -> Result<(), String> {
    match node.name().value() {
        "kind" => {
            let kind = get_positional_string(node, 0).ok_or("kind requires a value")?;
            definition.kind = kind.parse()?;
        }

        "param" => {
            let name = get_positional_string(node, 0).ok_or("param requires a name")?;
            let default = node
                .get("default")
                .and_then(|e| e.as_string())
                .map(str::to_string);

            definition.parameters.retain(|p| p.name != name);
            definition.parameters.push(ParamSpec { name, default });
        }

        "runtime" => {
            definition.runtime =
                get_positional_string(node, 0).ok_or("runtime requires a name")?;
        }

        "runtime-arg" => {
            if let Some(arg) = get_positional_string(node, 0) {
                definition.runtime_args.push(arg);
            }
        }

        "admin-only" => definition.admin_only = true,

        "execute-at-start" => definition.execute_at_start = true,

        "exec" => {
            if let Some(cwd) = node.get("cwd").and_then(|e| e.as_string()) {
                definition.exec_cwd = Some(PathBuf::from(cwd));
            }
            if let Some(timeout) = node.get("timeout").and_then(|e| e.as_string()) {
                definition.exec_timeout =
                    Some(parse_duration(timeout).map_err(|e| e.to_string())?);
            }
        }

        other => return Err(format!("Unknown directive: {}", other)),
    }

    Ok(())
}

/// Get positional string argument from KDL node
fn get_positional_string(node: &KdlNode, index: usize) -> Option<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .nth(index)
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_shebang() {
        assert_eq!(parse_shebang("#!/usr/bin/env bash"), ("bash".to_string(), vec![]));
        assert_eq!(
            parse_shebang("#!/usr/bin/env -S python3 -u"),
            ("python3".to_string(), vec!["-u".to_string()])
        );
        assert_eq!(
            parse_shebang("#!/bin/sh -e"),
            ("sh".to_string(), vec!["-e".to_string()])
        );
        assert_eq!(parse_shebang("#!/usr/bin/env"), (String::new(), vec![]));
    }

    #[test]
    fn test_parse_full_definition() {
        let temp = TempDir::new().unwrap();
        let path = write_script(
            &temp,
            "sales.sh",
            r#"#!/usr/bin/env bash
#JOBFRONT kind "transformation"
#JOBFRONT param "region" default="eu"
#JOBFRONT param "year"
#JOBFRONT param "jobfront.cacheResults" default="TRUE"
#JOBFRONT exec timeout="5m" cwd="work"
#JOBFRONT admin-only
#JOBFRONT execute-at-start

echo '{"step":"OUTPUT","row":[1]}'
"#,
        );

        let def = parse_definition(&path).unwrap();
        assert_eq!(def.id, "sales");
        assert_eq!(def.kind, EntityKind::Transformation);
        assert_eq!(def.runtime, "bash");
        assert_eq!(def.parameters.len(), 3);
        assert_eq!(def.parameter_default("region"), Some("eu"));
        assert_eq!(def.parameter_default("year"), None);
        assert!(def.declares("year"));
        assert!(def.cache_results());
        assert!(def.admin_only);
        assert!(def.execute_at_start);
        assert_eq!(def.exec_timeout, Some(Duration::from_secs(300)));
        assert_eq!(def.exec_cwd, Some(PathBuf::from("work")));
    }

    #[test]
    fn test_caching_disabled_by_default() {
        let temp = TempDir::new().unwrap();
        let path = write_script(
            &temp,
            "cleanup.sh",
            "#!/bin/sh\n#JOBFRONT kind \"job\"\n#JOBFRONT param \"jobfront.cacheResults\" default=\"yes\"\n",
        );

        let def = parse_definition(&path).unwrap();
        assert_eq!(def.kind, EntityKind::Job);
        assert!(!def.cache_results());
        assert!(!def.admin_only);
    }

    #[test]
    fn test_runtime_directive_without_shebang() {
        let temp = TempDir::new().unwrap();
        let path = write_script(
            &temp,
            "totals.js",
            "//JOBFRONT runtime \"node\"\nconsole.log(1)\n",
        );

        let def = parse_definition(&path).unwrap();
        assert_eq!(def.runtime, "node");
    }

    #[test]
    fn test_unknown_directive_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let path = write_script(&temp, "bad.sh", "#!/usr/bin/env bash\n#JOBFRONT frobnicate\n");

        let err = parse_definition(&path).unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { .. }));
        assert!(err.to_string().contains("Unknown directive"));
    }

    #[test]
    fn test_unsupported_runtime() {
        let temp = TempDir::new().unwrap();
        let path = write_script(&temp, "x.tcl", "#!/usr/bin/env tclsh\n");

        let err = parse_definition(&path).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnsupportedRuntime(r) if r == "tclsh"));
    }

    #[test]
    fn test_missing_runtime() {
        let temp = TempDir::new().unwrap();
        let path = write_script(&temp, "plain.txt", "#JOBFRONT kind \"job\"\n");

        assert!(parse_definition(&path).is_err());
    }
}

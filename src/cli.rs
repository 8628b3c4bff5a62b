use clap::{Parser, Subcommand};

/// Jobfront - Cached request front for batch jobs and transformations
///
/// Jobfront exposes entity scripts over HTTP, deduplicates identical requests
/// through a result cache and renders results as JSON, text or files.
#[derive(Parser, Debug)]
#[command(name = "jobfront")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cached request front for batch jobs and transformations", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Common configuration arguments shared across commands
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonConfigArgs {
    /// Config file path
    #[arg(short = 'c', long, env = "JOBFRONT_CONFIG")]
    pub config: Option<String>,

    /// Directory holding the entity scripts
    #[arg(long, env = "JOBFRONT_ENTITIES_DIR")]
    pub entities_dir: Option<String>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(long, env = "JOBFRONT_LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve entities over HTTP
    Serve(ServeArgs),

    /// Dispatch one entity and write the rendered result to stdout
    Run(RunArgs),

    /// List entities and their availability
    List(ListArgs),
}

impl Commands {
    pub fn common(&self) -> &CommonConfigArgs {
        match self {
            Self::Serve(args) => &args.common,
            Self::Run(args) => &args.common,
            Self::List(args) => &args.common,
        }
    }
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonConfigArgs,

    /// Address to listen on (e.g., 0.0.0.0:8080)
    #[arg(long, env = "JOBFRONT_BIND")]
    pub bind: Option<String>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Entity id
    pub entity: String,

    /// Entity parameter (repeatable)
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Output kind: Json, ResultFiles, ResultOnly, SingleCell (inferred when omitted)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Output step to read
    #[arg(long)]
    pub step: Option<String>,

    /// Render files as a download
    #[arg(long)]
    pub download: bool,

    /// Execute even if a cached result exists, then refresh the cache
    #[arg(long)]
    pub bypass_cache: bool,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Print the listing as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

/// Parse a `name=value` pair
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid NAME=VALUE: no `=` found in `{}`", s))?;
    if name.is_empty() {
        return Err(format!("invalid NAME=VALUE: empty name in `{}`", s));
    }
    Ok((name.to_string(), value.to_string()))
}

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub const DEFAULT_OUTPUT_DIR: &str = ".modgraph/index";

#[derive(Parser, Debug)]
#[command(
    name = "modgraph",
    version,
    about = "Resolution and indexing engine for modular codebases",
    long_about = "Resolves overrides, interception chains and event fan-out from collected facts \
                  and writes a deterministic, cross-referenced index."
)]
pub struct ModgraphCli {
    #[command(subcommand)]
    pub command: Commands,
}

impl ModgraphCli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a repository and write the canonical index
    Analyze(AnalyzeArgs),
    /// Load and validate the configuration without analyzing anything
    CheckConfig(CheckConfigArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log line format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Human)]
    pub log_format: LogFormat,

    /// Write logs to a rolling file in this directory instead
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Repository root to analyze
    #[arg(default_value = ".")]
    pub repo_path: PathBuf,

    /// Config file (defaults to modgraph.toml in the repository root)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of worker threads (0 means auto-detect based on CPU cores)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Maximum evidence items kept per record
    #[arg(long)]
    pub evidence_cap: Option<usize>,

    /// Maximum references kept per reverse-index entry
    #[arg(long)]
    pub reverse_index_ceiling: Option<usize>,

    /// Maximum execution path depth
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Directory of JSON fact batches, relative to the repository
    #[arg(long, value_name = "DIR")]
    pub facts_dir: Option<PathBuf>,

    /// Include files ignored by .gitignore
    #[arg(long)]
    pub no_gitignore: bool,

    /// Add a scope to the hierarchy, as CHILD=PARENT
    #[arg(long = "scope", value_name = "CHILD=PARENT", value_parser = parse_pair::<String>)]
    pub scopes: Vec<(String, String)>,

    /// Override a fact kind weight, as KIND=WEIGHT
    #[arg(long = "weight", value_name = "KIND=WEIGHT", value_parser = parse_pair::<f64>)]
    pub weights: Vec<(String, f64)>,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,

    /// Output directory (defaults to .modgraph/index in the repository)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Skip reloading and comparing the written documents
    #[arg(long)]
    pub no_verify: bool,

    /// Output statistics. Optionally specify a file path to save to.
    #[arg(long, value_name = "FILE", num_args = 0..=1, require_equals = true)]
    pub stats: Option<Option<PathBuf>>,
}

#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

fn parse_pair<T>(raw: &str) -> Result<(String, T), String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let value = value
        .trim()
        .parse::<T>()
        .map_err(|e| format!("invalid value in '{raw}': {e}"))?;
    Ok((key.trim().to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        ModgraphCli::command().debug_assert();
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            parse_pair::<f64>("call=0.25"),
            Ok(("call".to_string(), 0.25))
        );
        assert!(parse_pair::<f64>("call").is_err());
        assert!(parse_pair::<f64>("call=heavy").is_err());
    }

    #[test]
    fn test_stats_flag_forms() {
        let cli = ModgraphCli::try_parse_from(["modgraph", "analyze", "repo", "--stats"]).unwrap();
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.stats, Some(None));

        let cli =
            ModgraphCli::try_parse_from(["modgraph", "analyze", "--stats=run.json"]).unwrap();
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.stats, Some(Some(PathBuf::from("run.json"))));
        assert_eq!(args.config.repo_path, PathBuf::from("."));
    }
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use relic::config::{MappingRule, MigrationConfig};
use relic::error::Result;
use relic::output::Format;

#[derive(Parser)]
#[command(
    name = "relic",
    version,
    long_version = relic::build_info::long_version(),
    about = "Migrate legacy per-file VCS history into git"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    format: Format,
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by the subcommands; unset flags fall back to the config
/// file, which falls back to built-in defaults.
#[derive(Args)]
struct ConfigArgs {
    /// YAML config file to start from
    #[arg(long)]
    config: Option<PathBuf>,
    /// Snapshot file to read source history from
    #[arg(long)]
    source: Option<PathBuf>,
    /// Project path inside the source hierarchy, e.g. '$/project'
    #[arg(long)]
    project: Option<String>,
    /// Wildcard pattern to exclude (repeatable)
    #[arg(long = "exclude")]
    exclude: Vec<String>,
    /// Abort analysis on the first malformed item
    #[arg(long)]
    fail_fast: bool,
    /// Seconds between same-author revisions merged unconditionally
    #[arg(long)]
    any_comment_secs: Option<u64>,
    /// Seconds merged when the comment matches exactly
    #[arg(long)]
    same_comment_secs: Option<u64>,
}

impl ConfigArgs {
    fn build(&self) -> Result<MigrationConfig> {
        let mut config = match &self.config {
            Some(path) => MigrationConfig::load(path)?,
            None => MigrationConfig::default(),
        };
        if let Some(source) = &self.source {
            config.source = source.clone();
        }
        if let Some(project) = &self.project {
            config.project = project.clone();
        }
        if !self.exclude.is_empty() {
            config.exclude = self.exclude.clone();
        }
        if self.fail_fast {
            config.fail_fast = true;
        }
        if let Some(secs) = self.any_comment_secs {
            config.any_comment_secs = secs;
        }
        if let Some(secs) = self.same_comment_secs {
            config.same_comment_secs = secs;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full migration into a git repository
    Run {
        #[command(flatten)]
        shared: ConfigArgs,
        /// Directory to create the git repository in
        #[arg(long)]
        output: Option<PathBuf>,
        /// Regex applied to every exported path
        #[arg(long, requires = "map_replacement")]
        map_pattern: Option<String>,
        /// Replacement for --map-pattern matches
        #[arg(long, requires = "map_pattern")]
        map_replacement: Option<String>,
        /// Author emails become username@DOMAIN
        #[arg(long)]
        email_domain: Option<String>,
        /// Commit message for changesets without a comment
        #[arg(long)]
        default_comment: Option<String>,
        /// Source character encoding label, e.g. windows-1252
        #[arg(long)]
        encoding: Option<String>,
        /// Transcode commit messages to UTF-8
        #[arg(long)]
        transcode_comments: bool,
        /// Log and continue on individual tree-operation failures
        #[arg(long)]
        ignore_errors: bool,
        /// Create annotated tag objects instead of lightweight tags
        #[arg(long)]
        annotate_tags: bool,
    },
    /// Analyze and cluster without writing anything
    Preview {
        #[command(flatten)]
        shared: ConfigArgs,
    },
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            shared,
            output,
            map_pattern,
            map_replacement,
            email_domain,
            default_comment,
            encoding,
            transcode_comments,
            ignore_errors,
            annotate_tags,
        } => {
            let mut config = shared.build()?;
            if let Some(output) = output {
                config.output = output;
            }
            if let (Some(pattern), Some(replacement)) = (map_pattern, map_replacement) {
                config.path_mapping = Some(MappingRule {
                    pattern,
                    replacement,
                });
            }
            if let Some(domain) = email_domain {
                config.email_domain = Some(domain);
            }
            if let Some(comment) = default_comment {
                config.default_comment = Some(comment);
            }
            if let Some(encoding) = encoding {
                config.encoding = encoding;
            }
            if transcode_comments {
                config.transcode_comments = true;
            }
            if ignore_errors {
                config.ignore_errors = true;
            }
            if annotate_tags {
                config.annotate_tags = true;
            }
            relic::commands::run::run(config, cli.format)
        }
        Commands::Preview { shared } => {
            let config = shared.build()?;
            relic::commands::preview::run(config, cli.format)
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format;
    if let Err(e) = run(cli) {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            Format::Pretty => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}

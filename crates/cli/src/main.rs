// wellset - well-set reconciliation and OPGEE field config generation

mod exit_codes;
mod pivot;
mod run;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use wellset_recon::{PipelineConfig, ReconError};

use exit_codes::{recon_exit_code, EXIT_RUNTIME, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "wellset")]
#[command(about = "Reconcile well data across sources and generate OPGEE field configs")]
#[command(version)]
struct Cli {
    /// Debug-level logging (overrides RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the model input XML
    #[command(after_help = "\
Examples:
  wellset run heritage.wellset.toml
  wellset run heritage.wellset.toml --json
  wellset run heritage.wellset.toml --output fields.xml --summary run.json
  wellset run heritage.wellset.toml --strict")]
    Run {
        /// Path to the .wellset.toml config file
        config: PathBuf,

        /// Write the model input XML here (overrides [output] config)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the JSON run summary here (overrides [output] summary)
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Write the field index CSV here (overrides [output] field_index)
        #[arg(long)]
        field_index: Option<PathBuf>,

        /// Print the JSON run summary to stdout
        #[arg(long)]
        json: bool,

        /// Exit 64 when the run raised conflicts, missing data or defaults
        #[arg(long, env = "WELLSET_STRICT")]
        strict: bool,
    },

    /// Parse and validate a config without reading any data
    #[command(after_help = "\
Examples:
  wellset validate heritage.wellset.toml")]
    Validate {
        /// Path to the .wellset.toml config file
        config: PathBuf,
    },

    /// Load sources and list the wells the cohort criteria select
    #[command(after_help = "\
Examples:
  wellset cohort heritage.wellset.toml
  wellset cohort heritage.wellset.toml --json")]
    Cohort {
        /// Path to the .wellset.toml config file
        config: PathBuf,

        /// Print the cohort as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pivot the model's long-format results into a summary table
    #[command(after_help = "\
Examples:
  wellset pivot heritage.wellset.toml
  wellset pivot heritage.wellset.toml --input results.csv --output summary.csv")]
    Pivot {
        /// Path to the .wellset.toml config file
        config: PathBuf,

        /// Long-format result file (overrides [postprocess] input)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Summary table output (overrides [postprocess] output)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            output,
            summary,
            field_index,
            json,
            strict,
        } => run::cmd_run(run::RunArgs {
            config,
            output,
            summary,
            field_index,
            json,
            strict,
        }),
        Commands::Validate { config } => run::cmd_validate(config),
        Commands::Cohort { config, json } => run::cmd_cohort(config, json),
        Commands::Pivot {
            config,
            input,
            output,
        } => pivot::cmd_pivot(config, input, output),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError {
            code,
            message,
            hint,
        }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self {
            code: EXIT_USAGE,
            message: msg.into(),
            hint: None,
        }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self {
            code: EXIT_RUNTIME,
            message: msg.into(),
            hint: None,
        }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        let hint = match &err {
            ReconError::UnknownUnit { .. } => {
                Some("declare the pair under [[units.conversions]]".to_string())
            }
            ReconError::SchemaViolation { .. } => Some(
                "give the model parameter a `default` or set `required = false`".to_string(),
            ),
            ReconError::DuplicateCell { .. } => {
                Some("the result file reports this cell more than once".to_string())
            }
            ReconError::SchemaMismatch { .. } => {
                Some("check the column names in the config against the file header".to_string())
            }
            _ => None,
        };
        Self {
            code: recon_exit_code(&err),
            message: err.to_string(),
            hint,
        }
    }
}

/// A parsed config plus the directory its relative paths resolve against.
pub struct LoadedConfig {
    pub config: PipelineConfig,
    pub base_dir: PathBuf,
}

impl LoadedConfig {
    pub fn read(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CliError::io(format!("cannot read config {}: {e}", path.display())))?;
        let config = PipelineConfig::from_toml(&text)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        Ok(Self { config, base_dir })
    }

    /// CLI override wins; otherwise the configured path relative to the config.
    pub fn resolve(&self, flag: Option<PathBuf>, configured: Option<&str>) -> Option<PathBuf> {
        flag.or_else(|| configured.map(|p| self.base_dir.join(p)))
    }
}

//! promote — moves PPM configuration between environments.
//!
//! # Usage
//!
//! ```text
//! promote deploy boms/CR-2048.toml
//! promote extract boms/CR-2048.toml && promote import boms/CR-2048.toml
//! promote rollback boms/rollback.toml --reference 4821
//! promote flags functional --explain
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use promote_core::config::{LogFormat, LoggingConfig};
use promote_core::PromoteConfig;
use promote_deploy::DeployError;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

/// Exit status for failures worth retrying (EX_TEMPFAIL).
const EXIT_RETRYABLE: u8 = 75;

#[derive(Parser)]
#[command(
    name = "promote",
    about = "Promote PPM configuration between environments",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to promote.toml.
    #[arg(short, long, global = true, default_value = "promote.toml")]
    config: PathBuf,

    /// Branch used for governance rules (defaults to the CI branch variable).
    #[arg(long, global = true)]
    branch: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the unit's entities from the source server.
    Extract { bom: PathBuf },
    /// Import previously extracted bundles into the target server.
    Import { bom: PathBuf },
    /// Archive an imported run and write its rollback index.
    Archive { bom: PathBuf },
    /// Extract, import and archive in one run.
    Deploy { bom: PathBuf },
    /// Replay a previous run's archive against the target server.
    Rollback {
        bom: PathBuf,
        /// Pipeline id, or `local` for the latest local run. Overrides the
        /// BOM's rollback_reference.
        #[arg(short, long)]
        reference: Option<String>,
    },
    /// Check a BOM against its profile and the governance rules.
    Validate { bom: PathBuf },
    /// Compile a profile into its import flags string.
    Flags {
        /// Profile name (looked up in profiles_dir) or path to a profile file.
        profile: String,
        /// Print every slot with its capability.
        #[arg(long)]
        explain: bool,
    },
    /// Inspect promote.toml.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse and validate the configuration.
    Check,
    /// Print the effective configuration as JSON.
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_config(&cli.config);
    let logging = config.as_ref().map(|c| c.logging.clone()).unwrap_or_default();
    if let Err(e) = init_logging(&logging) {
        eprintln!("cannot initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let retryable = e
                .downcast_ref::<DeployError>()
                .is_some_and(DeployError::is_retryable);
            error!(retryable, "{e:#}");
            eprintln!("error: {e:#}");
            if retryable {
                ExitCode::from(EXIT_RETRYABLE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli, config: anyhow::Result<PromoteConfig>) -> anyhow::Result<()> {
    let branch = cli.branch.as_deref();
    match cli.command {
        Commands::Extract { bom } => commands::phases::extract(&config?, &bom, branch).await,
        Commands::Import { bom } => commands::phases::import(&config?, &bom, branch).await,
        Commands::Archive { bom } => commands::phases::archive(&config?, &bom, branch).await,
        Commands::Deploy { bom } => commands::phases::deploy(&config?, &bom, branch).await,
        Commands::Rollback { bom, reference } => {
            commands::rollback::rollback(&config?, &bom, reference.as_deref()).await
        }
        Commands::Validate { bom } => commands::validate::validate(&config?, &bom, branch),
        Commands::Flags { profile, explain } => {
            commands::flags::flags(config.ok().as_ref(), &profile, explain)
        }
        Commands::Config { action } => match action {
            ConfigAction::Check => commands::config::check(&config?, &cli.config),
            ConfigAction::Show => commands::config::show(&config?),
        },
    }
}

fn load_config(path: &Path) -> anyhow::Result<PromoteConfig> {
    use anyhow::Context;

    PromoteConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

/// `RUST_LOG` wins over `[logging] level`.
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

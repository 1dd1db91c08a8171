//! Converge CLI
//!
//! Offline companion to the reconciliation engine.
//!
//! ## Commands
//!
//! - `validate`: Check a deployment spec document
//! - `config`: Show the effective engine configuration
//! - `classify`: Map a raw provider status code to a lifecycle status
//! - `releases`: Order release names and derive the next release name

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, Level};

use converge_app::{classify_code, is_release_of};
use converge_core::{
    next_revision, order_releases, release_name, DeploymentSpec, EngineConfig,
    ReconciliationStatus, TemplateSource,
};

#[derive(Parser)]
#[command(name = "converge")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive deployment targets to a desired state", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a deployment spec (JSON)
    Validate {
        /// Path to the spec document
        file: PathBuf,
    },

    /// Show the effective engine configuration as TOML
    Config {
        /// TOML file to load instead of the environment
        #[arg(short, long, env = "CONVERGE_CONFIG")]
        file: Option<PathBuf>,
    },

    /// Classify a raw provider status code
    Classify {
        /// Backend the code comes from
        #[arg(short, long, value_enum)]
        provider: ProviderKind,

        /// Raw status code, e.g. UPDATE_ROLLBACK_COMPLETE or STARTED/STAGED
        code: String,
    },

    /// Release naming helpers
    Releases {
        #[command(subcommand)]
        action: ReleasesAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    Stack,
    App,
}

#[derive(Subcommand)]
enum ReleasesAction {
    /// Order release names as history, oldest first
    Order {
        /// Release names
        names: Vec<String>,
    },

    /// Name of the next release for a prefix
    Next {
        /// Release prefix
        prefix: String,

        /// Existing app names; names outside the prefix's history are ignored
        names: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
struct SpecSummary {
    target_name: String,
    template: String,
    parameters: usize,
    tags: usize,
    timeout_secs: u64,
    statuses_to_treat_as_success: Vec<ReconciliationStatus>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    converge_core::telemetry::init_tracing(cli.json, level);

    let output = match cli.command {
        Commands::Validate { file } => cmd_validate(&file)?,
        Commands::Config { file } => cmd_config(file.as_deref())?,
        Commands::Classify { provider, code } => cmd_classify(provider, &code)?,
        Commands::Releases { action } => match action {
            ReleasesAction::Order { names } => cmd_releases_order(&names),
            ReleasesAction::Next { prefix, names } => cmd_releases_next(&prefix, &names)?,
        },
    };
    println!("{output}");
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec file {}", path.display()))?;
    let spec = DeploymentSpec::from_json(&raw)
        .with_context(|| format!("Invalid deployment spec in {}", path.display()))?;
    debug!(target_name = %spec.target_name, "spec validated");

    let summary = SpecSummary {
        target_name: spec.target_name.clone(),
        template: match &spec.template {
            TemplateSource::Body(body) => format!("inline ({} bytes)", body.len()),
            TemplateSource::Url(url) => url.clone(),
        },
        parameters: spec.parameters.len(),
        tags: spec.tags.len(),
        timeout_secs: spec.timeout.as_secs(),
        statuses_to_treat_as_success: spec.statuses_to_treat_as_success.into_iter().collect(),
    };
    serde_json::to_string_pretty(&summary).context("Failed to render spec summary")
}

fn cmd_config(file: Option<&Path>) -> Result<String> {
    let config = match file {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::from_env().context("Invalid engine configuration in environment")?,
    };
    config.to_toml_string().context("Failed to render configuration")
}

fn cmd_classify(provider: ProviderKind, code: &str) -> Result<String> {
    if code.trim().is_empty() {
        bail!("status code is empty");
    }
    let status = match provider {
        ProviderKind::Stack => converge_stack::classify(code),
        ProviderKind::App => classify_code(code),
    };
    Ok(format!("{code} -> {status}"))
}

fn cmd_releases_order(names: &[String]) -> String {
    order_releases(names).join("\n")
}

fn cmd_releases_next(prefix: &str, names: &[String]) -> Result<String> {
    if prefix.trim().is_empty() {
        bail!("release prefix is empty");
    }
    let history: Vec<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|name| is_release_of(prefix, name))
        .collect();
    Ok(release_name(prefix, next_revision(&history)))
}

//! CLI command definitions for detection-scorer.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::config::AppConfig;
use crate::metrics::init_metrics;
use crate::scoring::build_trial_sequence;

/// Default configuration file.
const DEFAULT_CONFIG: &str = "config.yaml";

/// Scores browser-automation detection scripts against real frameworks.
#[derive(Parser)]
#[command(name = "detection-scorer")]
#[command(about = "Score browser-automation detection scripts")]
#[command(version)]
#[command(
    long_about = "detection-scorer runs a submitted detection script against a shuffled sequence of containerized automation frameworks and one human-operated session, then scores how often the script names the right driver.\n\nExample usage:\n  detection-scorer serve --config config.yaml\n  detection-scorer frameworks --config config.yaml --json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the HTTP scoring service.
    Serve(ServeArgs),

    /// Show the configured frameworks and the size of a trial sequence.
    #[command(alias = "ls")]
    Frameworks(FrameworksArgs),
}

/// Arguments for `detection-scorer serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Override the listening host.
    #[arg(long)]
    pub host: Option<String>,

    /// Override the listening port.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Pushcut API key for the human trial.
    #[arg(long, env = "PUSHCUT_API_KEY", hide_env_values = true)]
    pub pushcut_api_key: Option<String>,

    /// Skip host firewall rules (bots keep internet access).
    #[arg(long)]
    pub no_firewall: bool,
}

/// Arguments for `detection-scorer frameworks`.
#[derive(Parser, Debug)]
pub struct FrameworksArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct FrameworkListing {
    frameworks: Vec<FrameworkRow>,
    repetitions: usize,
    trials_per_run: usize,
    sample_sequence: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FrameworkRow {
    name: String,
    image: String,
}

/// Parse CLI arguments without running.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args).await,
        Commands::Frameworks(args) => run_frameworks_command(args),
    }
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Applies command-line overrides on top of the file configuration.
fn apply_serve_overrides(mut config: AppConfig, args: &ServeArgs) -> anyhow::Result<AppConfig> {
    if let Some(host) = &args.host {
        config.api.host = host.clone();
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(key) = &args.pushcut_api_key {
        config.pushcut.api_key = Some(key.clone());
    }
    if args.no_firewall {
        config.challenge.firewall.enabled = false;
    }
    config.validate()?;
    Ok(config)
}

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let config = apply_serve_overrides(load_config(&args.config)?, &args)?;

    init_metrics().context("Failed to initialize metrics")?;

    info!(
        config = %args.config.display(),
        frameworks = config.challenge.frameworks.len(),
        firewall = config.challenge.firewall.enabled,
        human_trial = config.challenge.has_human(),
        "Starting detection scorer"
    );
    crate::server::serve(config).await
}

fn run_frameworks_command(args: FrameworksArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let challenge = &config.challenge;

    let sequence = build_trial_sequence(
        &challenge.frameworks,
        challenge.repeated_framework_count,
        challenge.shuffle_seed,
    );
    let listing = FrameworkListing {
        frameworks: challenge
            .frameworks
            .iter()
            .map(|f| FrameworkRow {
                name: f.identity.clone(),
                image: f.image.clone(),
            })
            .collect(),
        repetitions: challenge.repeated_framework_count,
        trials_per_run: sequence.len(),
        sample_sequence: sequence.into_iter().map(|f| f.identity).collect(),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&listing)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{json}");
        return Ok(());
    }

    println!("{:<20} IMAGE", "FRAMEWORK");
    for row in &listing.frameworks {
        let image = if row.image.is_empty() { "-" } else { &row.image };
        println!("{:<20} {}", row.name, image);
    }
    println!();
    println!(
        "{} framework(s) x {} repetition(s) = {} trials per run",
        listing.frameworks.len(),
        listing.repetitions,
        listing.trials_per_run
    );
    println!("Sample sequence: {}", listing.sample_sequence.join(", "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_args() {
        let cli = Cli::try_parse_from([
            "detection-scorer",
            "serve",
            "--config",
            "scorer.yaml",
            "--port",
            "9000",
            "--no-firewall",
        ])
        .unwrap();

        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.config, PathBuf::from("scorer.yaml"));
                assert_eq!(args.port, Some(9000));
                assert!(args.no_firewall);
            }
            _ => panic!("expected serve"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_serve_overrides() {
        let args = ServeArgs {
            config: PathBuf::from(DEFAULT_CONFIG),
            host: Some("127.0.0.1".to_string()),
            port: Some(9000),
            pushcut_api_key: Some("secret".to_string()),
            no_firewall: true,
        };
        let mut base = AppConfig::default();
        base.challenge.frameworks = vec![crate::scoring::FrameworkEntry::new("selenium", "bots/selenium")];

        let config = apply_serve_overrides(base, &args).unwrap();
        assert_eq!(config.api.host, "127.0.0.1");
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.pushcut.api_key.as_deref(), Some("secret"));
        assert!(!config.challenge.firewall.enabled);
    }

    #[test]
    fn test_frameworks_alias() {
        let cli = Cli::try_parse_from(["detection-scorer", "ls", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Frameworks(FrameworksArgs { json: true, .. })));
    }
}

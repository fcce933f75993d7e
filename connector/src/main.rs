#![allow(missing_docs)]

use clap::{Parser, Subcommand};
use oura_connector::ingest::poll_once;
use oura_connector::{metrics, ServiceUserRepository, UserRepository};
use oura_source_config::{parse_duration, ConnectorConfig, LogFormat};
use std::error::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Oura source connector - user directory and credential tooling.
#[derive(Parser)]
#[command(name = "oura-connector")]
#[command(about = "Oura source connector backed by a user repository")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", env = "OURA_CONNECTOR_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the users in the repository directory
    Users,
    /// Fetch a single user from the repository
    Lookup { id: String },
    /// Print a user's Oura access token
    Token {
        id: String,
        /// Ask the repository for a new token instead of the current one
        #[arg(long)]
        refresh: bool,
    },
    /// Poll every user's credentials until interrupted
    Run,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => oura_source_config::load_from_file(path).unwrap_or_else(|e| {
            eprintln!("Error: Failed to load config from {path}: {e}");
            std::process::exit(1);
        }),
        None => oura_source_config::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config: {e}, using defaults");
            ConnectorConfig::default()
        }),
    };

    if let Err(e) = config.validate() {
        eprintln!("Error: Invalid configuration: {e}");
        std::process::exit(1);
    }

    init_logging(&config);

    if config.metrics.enabled {
        if let Err(e) = metrics::init_metrics(&config.metrics.listen) {
            tracing::warn!(error = %e, "Failed to start metrics exporter");
        }
    }

    if let Err(e) = run(args.command, &config).await {
        tracing::error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}

async fn run(command: Command, config: &ConnectorConfig) -> Result<(), Box<dyn Error>> {
    let repository = ServiceUserRepository::from_config(config)?;

    match command {
        Command::Users => {
            for user in repository.stream().await? {
                println!(
                    "{}\t{}\tauthorized={}",
                    user.versioned_id(),
                    user.user_id,
                    user.is_authorized
                );
            }
        }
        Command::Lookup { id } => {
            let user = repository.lookup(&id).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::Token { id, refresh } => {
            let user = repository.lookup(&id).await?;
            let credentials = if refresh {
                repository.refresh_access_token(&user).await?
            } else {
                repository.get_access_token(&user).await?
            };
            println!("{}", serde_json::to_string_pretty(&credentials)?);
        }
        Command::Run => poll_forever(&repository, config).await?,
    }
    Ok(())
}

async fn poll_forever(
    repository: &ServiceUserRepository,
    config: &ConnectorConfig,
) -> Result<(), Box<dyn Error>> {
    let interval = parse_duration(&config.poll.interval)?;
    let mut ticker = tokio::time::interval(interval);
    tracing::info!(interval = %config.poll.interval, "Polling user credentials");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = poll_once(repository, config.poll.max_concurrent_users).await {
                    tracing::warn!(error = %e, "Poll cycle failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
        }
    }
}

fn init_logging(config: &ConnectorConfig) {
    let filter = if config.logging.filter.is_empty() {
        config.logging.level.as_str().to_string()
    } else {
        config.logging.filter.clone()
    };

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(filter));
    match config.logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

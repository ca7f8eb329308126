//! Aegis - WireGuard VPN Gateway Control Plane
//!
//! Serves the dashboard API and manages peers on one WireGuard interface.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aegis::api::{HttpServer, TOKEN_HEADER};
use aegis::config::{AegisConfig, LoggingConfig, DEFAULT_CONFIG_TEMPLATE};
use aegis::error::{Error, Result};
use aegis::gateway::Gateway;

/// Aegis - WireGuard VPN Gateway Control Plane
#[derive(Parser)]
#[command(name = "aegis")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/aegis/aegis.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control plane API
    Start,

    /// Check a running instance
    Status {
        /// API address to query
        #[arg(short, long, default_value = "127.0.0.1:8000")]
        address: String,

        /// Dashboard token, if the instance requires one
        #[arg(short, long, env = "AEGIS_AUTH_TOKEN")]
        token: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "aegis.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = load_config(&cli.config)?;
            init_logging(&config.logging, cli.log_level.as_deref());
            run_start(config).await
        }
        Commands::Status { address, token } => {
            init_logging(&LoggingConfig::default(), cli.log_level.as_deref());
            run_status(address, token).await
        }
        Commands::Init { output, force } => run_init(output, force),
        Commands::Validate => run_validate(cli.config),
    }
}

/// Initialize logging
fn init_logging(config: &LoggingConfig, cli_level: Option<&str>) {
    let level = cli_level.unwrap_or(&config.level).to_string();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(path: &Path) -> Result<AegisConfig> {
    AegisConfig::from_file(path).map_err(|e| {
        eprintln!("Failed to load configuration from {:?}: {}", path, e);
        e
    })
}

/// Start the control plane
async fn run_start(config: AegisConfig) -> Result<()> {
    tracing::info!("Starting Aegis control plane...");
    tracing::info!(
        interface = %config.wireguard.interface,
        config_path = ?config.wg_config_path(),
        use_sudo = config.use_sudo(),
        "Loaded configuration"
    );
    if config.wireguard.subnet_base.is_none() || config.wireguard.endpoint.is_none() {
        tracing::warn!(
            "wireguard.subnet_base or wireguard.endpoint unset; provisioning is disabled"
        );
    }

    let gateway = Arc::new(Gateway::new(&config));
    let server = HttpServer::new(config.api.clone(), gateway);

    tokio::select! {
        result = server.start() => {
            if let Err(e) = &result {
                tracing::error!("HTTP server error: {}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            Ok(())
        }
    }
}

/// Query a running instance's health
async fn run_status(address: String, token: Option<String>) -> Result<()> {
    let url = format!("http://{}/api/health", address);

    let mut request = reqwest::Client::new().get(&url);
    if let Some(token) = token {
        request = request.header(TOKEN_HEADER, token);
    }

    let response = request.send().await.map_err(|e| {
        eprintln!("Failed to reach {}: {}", url, e);
        Error::Internal(e.to_string())
    })?;

    if !response.status().is_success() {
        let status = response.status();
        eprintln!("{} returned {}", url, status);
        return Err(Error::Internal(format!("status request failed with {}", status)));
    }

    let health: serde_json::Value = response
        .json()
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        )));
    }

    std::fs::write(&output, DEFAULT_CONFIG_TEMPLATE)?;
    println!("Configuration file created: {}", output.display());
    println!("\nSet wireguard.subnet_base and wireguard.endpoint to enable provisioning.");
    println!("Then start with: aegis --config {} start", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match AegisConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Interface:      {}", config.wireguard.interface);
            println!("  Config File:    {}", config.wg_config_path().display());
            match config.wireguard.subnet_base {
                Some(base) => println!("  Subnet Base:    {}", base),
                None => println!("  Subnet Base:    (not set, provisioning disabled)"),
            }
            println!(
                "  Endpoint:       {}",
                config.wireguard.endpoint.as_deref().unwrap_or("(not set)")
            );
            println!("  Admin Peer:     {}", config.admin_peer_ip());
            println!("  Labels Store:   {}", config.store.labels_path.display());
            println!("  Services:       {}", config.services().len());
            if config.api.enabled {
                println!("  API:            {}", config.api.bind_address);
            } else {
                println!("  API:            disabled");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

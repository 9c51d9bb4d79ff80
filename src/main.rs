use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use pickly_agent::config::{AppConfig, ConfigError, DEFAULT_CONFIG_PATH};
use pickly_agent::context::AppContext;
use pickly_agent::core::{Orchestrator, TransferSession};
use pickly_agent::{adapters, logging};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "pickly-agent")]
#[command(about = "Copies photos from inserted camera cards to a network share", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use simulated volumes (driven from stdin) and an in-memory share
    #[arg(long)]
    simulation: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON
    #[arg(long)]
    json: bool,

    /// Validate the configuration and paths, then exit
    #[arg(long)]
    check: bool,

    /// With --check, also open the share
    #[arg(long, requires = "check")]
    test_connection: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(ConfigError::NotFound(path)) => {
            eprintln!("Config file not found: {}", path.display());
            eprintln!("Please copy config.example.json to config.json and configure it");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = logging::init(logging::LogConfig::from_config(
        &config.logging,
        cli.json,
        cli.verbose,
    ));

    let ctx = AppContext::new(config);
    let result = if cli.check {
        run_check(&ctx, cli.simulation, cli.test_connection).await
    } else {
        run_daemon(ctx, cli.simulation)
            .await
            .context("Agent failed")
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_daemon(ctx: AppContext, simulation: bool) -> Result<()> {
    spawn_signal_handler(ctx.cancel.clone());

    let sources = adapters::get_volume_sources(&ctx.config, simulation);
    let connector = adapters::get_connector(&ctx.config, simulation);

    Orchestrator::new(ctx, sources, connector).start().await
}

/// SIGINT and SIGTERM cancel the agent's token.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received SIGINT");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl-C");
        }

        cancel.cancel();
    });
}

async fn run_check(ctx: &AppContext, simulation: bool, test_connection: bool) -> Result<()> {
    let config = &ctx.config;
    println!("Configuration loaded successfully");

    println!("\nPaths:");
    let mount_base = &config.paths.sd_mount_base;
    if mount_base.is_dir() {
        println!("  ok   SD mount base exists: {}", mount_base.display());
    } else {
        println!("  warn SD mount base not found: {}", mount_base.display());
    }

    let temp_dir = &config.paths.temp_dir;
    tokio::fs::create_dir_all(temp_dir)
        .await
        .with_context(|| format!("Temp directory not accessible: {}", temp_dir.display()))?;
    println!("  ok   Temp directory accessible: {}", temp_dir.display());
    println!("  ok   Remote base path: {}", config.paths.remote_base_path);

    println!("\nMonitoring:");
    let monitoring = &config.monitoring;
    if monitoring.supported_extensions.is_empty() {
        println!("  warn No supported extensions configured");
    } else {
        println!(
            "  ok   Supported extensions: {}",
            monitoring.supported_extensions.join(", ")
        );
    }
    println!("  ok   Minimum file size: {} bytes", monitoring.min_file_size);
    println!("  ok   Poll interval: {} seconds", monitoring.poll_interval);

    println!("\nTransfer:");
    let transfer = &config.transfer;
    println!(
        "  ok   {} attempts, {}s apart ({:?} backoff), {} byte chunks, checksums {}",
        transfer.max_retries,
        transfer.retry_delay,
        transfer.backoff,
        transfer.chunk_size,
        if transfer.verify_checksums { "on" } else { "off" }
    );

    if test_connection {
        let smb = &config.smb;
        println!("\nShare:");
        println!("  Server: {}:{}", smb.server, smb.port);
        println!("  Share: {}", smb.share);
        println!("  Username: {}", smb.username);

        let connector = adapters::get_connector(config, simulation);
        TransferSession::new(connector, config, ctx.cancel.clone())
            .check_connection()
            .await
            .context("Share connection test failed")?;
        println!("  ok   Share access successful");
    }

    println!("\nConfiguration check passed");
    Ok(())
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Seckill - grab a scarce OCI instance
//!
//! Commands:
//! - `run` (default): pre-flight, provision the network, then retry the
//!   launch until it succeeds or fails fatally. Ctrl-C stops it early
//! - `check`: pre-flight only, creates nothing
//! - `list`: show instances in the compartment

use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use seckill::config::Config;
use seckill_core::backoff::BackoffConfig;
use seckill_core::{Acquisition, AcquisitionState, Architecture, TargetRequest, run_preflight};

/// Exit code when interrupted by a signal.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "seckill", version)]
#[command(about = "Retry OCI instance launches until capacity frees up", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Acquire an instance (default)
    Run(RunArgs),

    /// Resolve availability domain and image without creating anything
    Check(CheckArgs),

    /// List instances in the compartment
    List,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Architecture to acquire (overrides SECKILL_ARCH)
    #[arg(long)]
    arch: Option<Architecture>,

    /// Seconds between attempts, e.g. 60 or 30-60 (overrides SECKILL_INTERVAL)
    #[arg(long)]
    interval: Option<BackoffConfig>,
}

#[derive(Args)]
struct CheckArgs {
    /// Architecture to check (overrides SECKILL_ARCH)
    #[arg(long)]
    arch: Option<Architecture>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seckill=info,seckill_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => {
            if let Some(arch) = args.arch {
                config.architecture = arch;
            }
            if let Some(interval) = args.interval {
                config.interval = interval;
            }
            run(config).await
        }
        Command::Check(args) => {
            if let Some(arch) = args.arch {
                config.architecture = arch;
            }
            check(config).await
        }
        Command::List => list(config).await,
    }
}

async fn run(config: Config) -> anyhow::Result<ExitCode> {
    let ssh_authorized_keys = config.ssh_authorized_keys()?;
    let session = seckill::connect(&config)?;
    let notifier = seckill::notifier(&config)?;

    info!(
        region = %session.region,
        compartment_id = %session.compartment_id,
        arch = %config.architecture,
        interval = %config.interval,
        notifier = notifier.notifier_type(),
        "Starting seckill"
    );

    let request = TargetRequest {
        architecture: config.architecture,
        profile: config.profile(),
        availability_domain: config.availability_domain.clone(),
        image_id: config.image_id.clone(),
        ssh_authorized_keys,
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let acquisition = Acquisition::builder()
        .session(session)
        .notifier(notifier)
        .backoff(config.interval)
        .unknown_error_threshold(config.unknown_error_threshold)
        .cancellation_token(cancel)
        .build()?;

    let report = acquisition.acquire(&request).await;

    if report.cancelled {
        info!(summary = %report.summary, "Interrupted");
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }

    match report.state {
        AcquisitionState::Succeeded => {
            if let Some(instance) = &report.instance {
                info!(
                    instance_id = %instance.id,
                    display_name = %instance.display_name,
                    summary = %report.summary,
                    "Instance acquired"
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            error!(
                kind = report.failure_kind.map(|k| k.as_str()).unwrap_or("unknown"),
                error = report.failure.as_deref().unwrap_or("-"),
                summary = %report.summary,
                "Acquisition failed"
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn check(config: Config) -> anyhow::Result<ExitCode> {
    let session = seckill::connect(&config)?;
    let report = run_preflight(
        &session,
        config.architecture,
        config.availability_domain.as_deref(),
        config.image_id.as_deref(),
    )
    .await
    .context("pre-flight checks failed")?;

    let profile = config.profile();
    println!("Region:              {}", session.region);
    println!("Compartment:         {}", session.compartment_id);
    println!(
        "Availability domain: {} (of {})",
        report.availability_domain,
        report.availability_domains.join(", ")
    );
    println!(
        "Image:               {} {}",
        report.image_id,
        report.image_name.as_deref().unwrap_or("")
    );
    println!(
        "Shape:               {} ({} OCPU, {} GB)",
        config.architecture.shape(),
        profile.ocpus,
        profile.memory_gb
    );
    println!(
        "Boot volume:         {} GB, {} VPUs/GB",
        profile.boot_volume_gb, profile.boot_volume_vpus_per_gb
    );
    println!("Interval:            {}", config.interval);
    Ok(ExitCode::SUCCESS)
}

async fn list(config: Config) -> anyhow::Result<ExitCode> {
    let session = seckill::connect(&config)?;
    let inventory = seckill::inventory::collect(&session)
        .await
        .context("failed to list instances")?;
    print!("{}", inventory);
    Ok(ExitCode::SUCCESS)
}

/// Cancel the run on Ctrl-C or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Cannot listen for SIGTERM");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("Shutdown signal received");
        cancel.cancel();
    });
}

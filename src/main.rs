//! device-arbiter: pick, lock and hold a compute device for this process.
//!
//! `list` shows the preference order, `acquire` holds the best device until
//! Ctrl-C and `run` holds it for the lifetime of a child command.

use std::fmt::Write as _;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use device_arbiter::backend::simulated::SimulatedBackend;
use device_arbiter::config::{Cli, Command, Config};
use device_arbiter::platform::registry::{PlatformRegistry, RegistrySummary};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging. Logs go to stderr, stdout carries results.
    let filter = if cli.verbose {
        "device_arbiter=debug"
    } else {
        "device_arbiter=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("device-arbiter v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);

    info!(
        lock_dir = %config.lock.dir.display(),
        locking = config.lock.enabled,
        platform = %config.selection.platform,
        device = ?config.selection.device,
        "Configuration loaded"
    );

    let backend = SimulatedBackend::new(config.inventory.clone());
    let mut registry = PlatformRegistry::initialize(
        backend,
        config.registry_options(),
        &config.selection.platform,
    )?;
    let key = registry.preferred_key();

    match cli.command {
        Command::List { json } => {
            registry.rank_all();
            let summary = registry.summary();
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", render_summary(&summary));
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Acquire => {
            // Blocks for at most the bounded retry backoff; nothing else is
            // running on the runtime yet.
            let owned = registry.acquire(config.selection.device)?;
            println!(
                "acquired {key} {} {}",
                owned.identity().device_index,
                owned.name()
            );

            tokio::signal::ctrl_c().await?;
            info!("Interrupted, releasing device");
            owned.release();
            Ok(ExitCode::SUCCESS)
        }

        Command::Run { command } => {
            let owned = registry.acquire(config.selection.device)?;
            let identity = owned.identity().clone();
            info!(device = %identity, command = ?command, "Running command on device");

            let status = tokio::process::Command::new(&command[0])
                .args(&command[1..])
                .env("DEVICE_ARBITER_PLATFORM", key)
                .env("DEVICE_ARBITER_PLATFORM_OFFSET", identity.platform_offset.to_string())
                .env("DEVICE_ARBITER_DEVICE_INDEX", identity.device_index.to_string())
                .env("DEVICE_ARBITER_DEVICE_NAME", &identity.device_name)
                .status()
                .await?;

            owned.release();
            info!(status = %status, "Command finished");
            let code = status.code().and_then(|c| u8::try_from(c).ok()).unwrap_or(1);
            Ok(ExitCode::from(code))
        }
    }
}

fn render_summary(summary: &RegistrySummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "File locking: {}",
        if summary.locking { "enabled" } else { "disabled" }
    );
    for platform in &summary.platforms {
        let marker = if platform.key == summary.preferred { " (preferred)" } else { "" };
        let _ = writeln!(out, "{}{}: {}", platform.key, marker, platform.names.join(", "));
        if platform.devices.is_empty() {
            let _ = writeln!(out, "    None");
        }
        for (rank, device) in platform.devices.iter().enumerate() {
            let _ = writeln!(
                out,
                "    {rank}. {} (id = {}, {}, {} compute units, {} MiB){}",
                device.identity.device_name,
                device.identity.device_index,
                device.class,
                device.compute_units,
                device.global_mem_bytes / (1024 * 1024),
                if device.in_use { " [in use]" } else { "" }
            );
        }
        if platform.excluded > 0 {
            let _ = writeln!(out, "    ({} device(s) could not be probed)", platform.excluded);
        }
    }
    out
}

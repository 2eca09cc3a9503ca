// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! redub daemon (redubd)
//!
//! Background process hosting the download/dub/mux pipeline:
//! - HTTP Control API + WebSocket subscription gateway
//! - Queue dispatchers feeding the yt-dlp / vot-cli / ffmpeg workers
//! - Event aggregator persisting worker events and fanning them out

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use rd_daemon::lifecycle::{self, WorkerSet};
use rd_daemon::Config;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("redubd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("redubd {}", env!("CARGO_PKG_VERSION"));
                println!("redub daemon - video download, voice-over dubbing and muxing pipeline");
                println!();
                println!("USAGE:");
                println!("    redubd");
                println!();
                println!("Configuration comes from REDUB_* environment variables and the");
                println!("optional TOML file named by REDUB_CONFIG. See the project README");
                println!("for the full option table.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: redubd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;

    rotate_log_if_needed(&config.log_path());
    let _log_guard = setup_logging(&config)?;

    info!("Starting redubd");

    let (daemon, listener) = match lifecycle::startup(&config, WorkerSet::external_tools()).await {
        Ok(started) => started,
        Err(e @ lifecycle::LifecycleError::LockFailed(_)) => {
            let pid = std::fs::read_to_string(config.lock_path())
                .unwrap_or_default()
                .trim()
                .to_string();
            eprintln!("redubd is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            error!("Failed to start daemon: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Failed to start daemon: {}", e);
            return Err(e.into());
        }
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!("Daemon ready");
    println!("READY");

    let serve = axum::serve(listener, daemon.router()).with_graceful_shutdown(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
        }
    });

    let result = serve.await;
    daemon.shutdown();
    result?;

    info!("Daemon stopped");
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `redubd.log` → `redubd.log.1` → `.2` → `.3`, deleting the
/// oldest. Best-effort: rotation failures do not block startup.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_path = config.log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = tracing_appender::rolling::never(
        log_path.parent().ok_or("log path has no parent")?,
        log_path.file_name().ok_or("log path has no file name")?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

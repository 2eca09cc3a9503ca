// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup ordering, background tasks, shutdown.
//!
//! Startup: lock file → store recovery → bus/gateway/service → admin
//! bootstrap → aggregator → coordinator recovery + dispatchers → flush
//! and checkpoint tasks → HTTP bind. Shutdown reverses what matters:
//! flush the journal and save a final snapshot so the next start skips
//! the replay.

use crate::auth::{Auth, AuthError};
use crate::config::Config;
use crate::gateway::SubscriptionGateway;
use crate::http::{AppState, Service};
use fs2::FileExt;
use rd_core::{Clock, QueueName, SystemClock};
use rd_engine::{
    CoordinatorConfig, EventAggregator, EventBus, JobDefaults, JobService, MediaLayout,
    QueueCoordinator, QueueHandle, Worker,
};
use rd_storage::{Checkpointer, Store, StoreError};
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Journal flush cadence (group commit window).
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Snapshot cadence.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

/// Expired-session purge cadence.
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind port {0}: {1}")]
    BindFailed(u16, std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The three worker implementations wired into the coordinator.
pub struct WorkerSet {
    pub download: Arc<dyn Worker>,
    pub dub: Arc<dyn Worker>,
    pub mux: Arc<dyn Worker>,
}

impl WorkerSet {
    /// Production set: yt-dlp, vot-cli and ffmpeg subprocesses.
    pub fn external_tools() -> Self {
        use crate::tools::{Ffmpeg, VotCli, YtDlp};
        use rd_engine::{DownloadWorker, DubWorker, MuxWorker};
        Self {
            download: Arc::new(DownloadWorker::new(YtDlp::new())),
            dub: Arc::new(DubWorker::new(VotCli::new())),
            mux: Arc::new(MuxWorker::new(Ffmpeg::new())),
        }
    }
}

/// Running daemon state. The HTTP listener is returned separately from
/// startup so the caller can hand it to the server loop.
pub struct Daemon {
    pub state: Arc<AppState>,
    pub store: Arc<Store>,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

impl Daemon {
    pub fn router(&self) -> axum::Router {
        crate::http::router(Arc::clone(&self.state))
    }

    /// Graceful shutdown: flush the journal and save a final snapshot.
    pub fn shutdown(&self) {
        info!("Shutting down daemon...");

        if let Err(e) = self.store.flush() {
            warn!("Failed to flush journal on shutdown: {}", e);
        }

        let (state, seq) = self.store.checkpoint_data();
        if seq > 0 {
            let checkpointer = Checkpointer::new(self.store.snapshot_path().to_path_buf());
            match checkpointer.checkpoint_sync(seq, &state) {
                Ok(result) => {
                    info!(seq = result.seq, size_bytes = result.size_bytes, "saved final snapshot");
                    if let Err(e) = self.store.truncate_journal(seq) {
                        warn!("Failed to truncate journal after final snapshot: {}", e);
                    }
                }
                Err(e) => warn!("Failed to save shutdown snapshot: {}", e),
            }
        }

        info!("Daemon shutdown complete");
    }
}

/// Start the daemon. Returns the daemon state and the bound listener.
pub async fn startup(
    config: &Config,
    workers: WorkerSet,
) -> Result<(Daemon, TcpListener), LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    // Acquire the lock first; use OpenOptions to avoid truncating a
    // running daemon's PID before we hold the lock.
    let mut lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(config.lock_path())?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    // Recover persisted state
    let store = Arc::new(Store::open(&config.state_dir)?);
    store.purge_expired_sessions(SystemClock.epoch_ms())?;
    info!(
        jobs = store.with_state(|s| s.jobs.len()),
        users = store.with_state(|s| s.users.len()),
        "store recovered"
    );

    let layout = MediaLayout::new(&config.media_root);
    layout.ensure_dirs()?;

    // Wiring: bus → aggregator → gateway; service shares the gateway seam
    let bus = EventBus::new();
    let gateway = Arc::new(SubscriptionGateway::new());
    let queue = QueueHandle::new(Arc::clone(&store));
    let defaults = JobDefaults {
        target_lang: config.default_target_lang.clone(),
        container: config.default_container.clone(),
        format_preset: config.default_format_preset.clone(),
        ducking_level: config.ducking_level,
        normalization_lufs: config.normalization_lufs,
        min_free_space_gb: config.min_free_space_gb,
    };
    let service: Arc<Service> = Arc::new(JobService::new(
        Arc::clone(&store),
        queue.clone(),
        layout.clone(),
        Arc::clone(&gateway) as Arc<dyn rd_engine::Forward>,
        defaults,
        SystemClock,
    ));

    // Initial admin user (mandatory in production, validated by Config)
    let auth = Auth::new(Arc::clone(&store), &config.jwt_secret, config.jwt_expires_secs);
    if let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) {
        auth.bootstrap_admin(username, password)?;
    } else {
        warn!("no admin credentials configured; only existing users can log in");
    }

    // Aggregator task: the single bus consumer
    let aggregator = EventAggregator::new(
        Arc::clone(&store),
        Arc::clone(&gateway) as Arc<dyn rd_engine::Forward>,
        SystemClock,
    );
    let aggregator_bus = bus.clone();
    tokio::spawn(async move { aggregator.run(&aggregator_bus).await });

    // Coordinator: recover stranded entries, then dispatch
    let coordinator_config = CoordinatorConfig::default()
        .with_concurrency(QueueName::Download, config.download_concurrency)
        .with_concurrency(QueueName::Dub, config.dubbing_concurrency)
        .with_concurrency(QueueName::Mux, config.muxing_concurrency);
    let mut worker_map: std::collections::HashMap<QueueName, Arc<dyn Worker>> =
        std::collections::HashMap::new();
    worker_map.insert(QueueName::Download, workers.download);
    worker_map.insert(QueueName::Dub, workers.dub);
    worker_map.insert(QueueName::Mux, workers.mux);
    let coordinator = Arc::new(QueueCoordinator::new(
        Arc::clone(&store),
        bus.clone(),
        queue,
        Arc::clone(&service),
        worker_map,
        coordinator_config,
        SystemClock,
    ));
    coordinator.recover()?;
    coordinator.start();

    spawn_flush_task(Arc::clone(&store));
    spawn_checkpoint_task(Arc::clone(&store));
    spawn_session_purge_task(Arc::clone(&store));

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(|e| LifecycleError::BindFailed(config.port, e))?;
    info!(port = config.port, "daemon listening");

    let state = Arc::new(AppState {
        service,
        store: Arc::clone(&store),
        auth,
        gateway,
        layout,
        min_free_space_gb: config.min_free_space_gb,
        start_time: Instant::now(),
    });

    Ok((
        Daemon {
            state,
            store,
            lock_file,
        },
        listener,
    ))
}

/// Group commit: flush the journal on a short interval.
fn spawn_flush_task(store: Arc<Store>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            interval.tick().await;
            if store.needs_flush() {
                if let Err(e) = store.flush() {
                    error!("Failed to flush journal: {}", e);
                }
            }
        }
    });
}

/// Periodic snapshot; the journal is truncated only after the snapshot
/// is durable (including the directory fsync).
fn spawn_checkpoint_task(store: Arc<Store>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CHECKPOINT_INTERVAL);
        // The first tick fires immediately; skip it
        interval.tick().await;
        loop {
            interval.tick().await;

            let (state, seq) = store.checkpoint_data();
            if seq == 0 {
                continue;
            }

            let checkpointer = Checkpointer::new(store.snapshot_path().to_path_buf());
            let handle = checkpointer.start(seq, &state);
            let result = tokio::task::spawn_blocking(move || handle.wait()).await;

            match result {
                Ok(Ok(checkpoint)) => {
                    tracing::debug!(
                        seq = checkpoint.seq,
                        size_bytes = checkpoint.size_bytes,
                        "checkpoint complete"
                    );
                    if let Err(e) = store.truncate_journal(seq) {
                        warn!(error = %e, "failed to truncate journal after checkpoint");
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "checkpoint failed, journal not truncated"),
                Err(e) => warn!(error = %e, "checkpoint task panicked"),
            }
        }
    });
}

fn spawn_session_purge_task(store: Arc<Store>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = store.purge_expired_sessions(SystemClock.epoch_ms()) {
                warn!("Failed to purge expired sessions: {}", e);
            }
        }
    });
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background checkpointing with zstd compression and durable fsync.
//!
//! The key invariant: the snapshot must be fully durable (including the
//! directory fsync that makes the rename stick) before the journal is
//! truncated. Serialization, compression and I/O run on a dedicated
//! thread; only the state clone happens on the caller.

use crate::snapshot::{rotate_bak_path, Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
use crate::StoreState;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::warn;

/// Errors from checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("compression error: {0}")]
    Compress(String),
    #[error("checkpoint failed: {0}")]
    Failed(String),
}

/// Result of a completed checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointResult {
    /// Sequence number that was checkpointed
    pub seq: u64,
    /// Size of the compressed snapshot in bytes
    pub size_bytes: u64,
}

/// Handle to a running checkpoint operation.
///
/// Call `wait()` to block until the snapshot is durable; only then is it
/// safe to truncate the journal.
pub struct CheckpointHandle {
    pub seq: u64,
    receiver: mpsc::Receiver<Result<CheckpointResult, CheckpointError>>,
    // NOTE(lifetime): Keep thread alive
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

impl CheckpointHandle {
    /// Wait for the checkpoint to complete, including the directory fsync.
    pub fn wait(self) -> Result<CheckpointResult, CheckpointError> {
        self.receiver
            .recv()
            .map_err(|_| CheckpointError::Failed("checkpoint thread panicked".into()))?
    }
}

/// Checkpointer manages background snapshot operations.
pub struct Checkpointer {
    snapshot_path: PathBuf,
    compression_level: i32,
}

impl Checkpointer {
    pub fn new(snapshot_path: PathBuf) -> Self {
        Self {
            snapshot_path,
            // zstd level 3 is a good balance of speed and compression
            compression_level: 3,
        }
    }

    /// Start a background checkpoint.
    pub fn start(&self, seq: u64, state: &StoreState) -> CheckpointHandle {
        let state_clone = state.clone();
        let snapshot_path = self.snapshot_path.clone();
        let compression_level = self.compression_level;

        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let result = checkpoint_blocking(seq, &state_clone, &snapshot_path, compression_level);
            let _ = tx.send(result);
        });

        CheckpointHandle {
            seq,
            receiver: rx,
            handle,
        }
    }

    /// Perform a synchronous checkpoint (for shutdown).
    pub fn checkpoint_sync(
        &self,
        seq: u64,
        state: &StoreState,
    ) -> Result<CheckpointResult, CheckpointError> {
        checkpoint_blocking(seq, state, &self.snapshot_path, self.compression_level)
    }
}

/// Perform checkpoint I/O (runs on the background thread).
fn checkpoint_blocking(
    seq: u64,
    state: &StoreState,
    snapshot_path: &Path,
    compression_level: i32,
) -> Result<CheckpointResult, CheckpointError> {
    let tmp_path = snapshot_path.with_extension("tmp");

    let snapshot = Snapshot::new(seq, state.clone());
    let json_bytes = serde_json::to_vec(&snapshot)?;
    let compressed = zstd::encode_all(json_bytes.as_slice(), compression_level)
        .map_err(|e| CheckpointError::Compress(e.to_string()))?;

    if let Some(parent) = tmp_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write to temp, fsync, atomic rename, then fsync the directory so the
    // rename survives power loss.
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&compressed)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, snapshot_path)?;
    if let Some(parent) = snapshot_path.parent() {
        File::open(parent)?.sync_all()?;
    }

    let size_bytes = std::fs::metadata(snapshot_path)
        .map(|m| m.len())
        .unwrap_or(compressed.len() as u64);

    Ok(CheckpointResult { seq, size_bytes })
}

/// Load a zstd-compressed snapshot.
///
/// Returns `Ok(None)` when the file does not exist, is corrupt, or has an
/// incompatible version. Corrupt/incompatible snapshots are rotated to
/// `.bak` so recovery can proceed from the journal.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    if !path.exists() {
        return Ok(None);
    }

    let parse = || -> Result<Snapshot, String> {
        let file = File::open(path).map_err(|e| e.to_string())?;
        let decoder = zstd::stream::read::Decoder::new(file).map_err(|e| e.to_string())?;
        let snapshot: Snapshot = serde_json::from_reader(decoder).map_err(|e| e.to_string())?;
        if snapshot.version != CURRENT_SNAPSHOT_VERSION {
            return Err(format!(
                "unsupported snapshot version {} (current {})",
                snapshot.version, CURRENT_SNAPSHOT_VERSION
            ));
        }
        Ok(snapshot)
    };

    match parse() {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(e) => {
            let bak_path = rotate_bak_path(path);
            warn!(
                error = %e,
                path = %path.display(),
                bak = %bak_path.display(),
                "Unusable snapshot, moving to .bak and recovering from journal",
            );
            std::fs::rename(path, &bak_path)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;

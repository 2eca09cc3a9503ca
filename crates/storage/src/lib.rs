// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rd-storage: durable persistence for jobs, media, events, users,
//! sessions and queue entries.
//!
//! The store is a write-ahead journal plus an in-memory materialized state:
//! every mutation is appended to the journal as a [`Record`] and then
//! applied to the state. Recovery loads the latest snapshot and replays the
//! journal tail. Writers serialize on the journal; readers share a lock and
//! proceed during journal I/O.

pub mod checkpoint;
pub mod record;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod wal;

pub use checkpoint::{
    load_snapshot, CheckpointError, CheckpointHandle, CheckpointResult, Checkpointer,
};
pub use record::Record;
pub use snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use state::{JobFilter, QueueEntry, QueueEntryStatus, QueueStats, StoreState};
pub use store::{Store, StoreError};
pub use wal::{Journal, JournalEntry, WalError};

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rd-engine: queue coordination, job service, event aggregation and the
//! worker contract for the redub pipeline.

pub mod aggregator;
pub mod bus;
pub mod coordinator;
pub mod fs_layout;
pub mod resume;
pub mod service;
pub mod stages;
pub mod worker;

pub use aggregator::EventAggregator;
pub use bus::{EventBus, Forward, NullForward};
pub use coordinator::{CoordinatorConfig, QueueCoordinator, QueueHandle, RecoverPolicy};
pub use fs_layout::MediaLayout;
pub use resume::{plan_resume, ResumeDiagnostic, ResumePlan, ResumeStage};
pub use service::{CreateJobRequest, JobDefaults, JobDetail, JobService, ServiceError};
pub use stages::{
    DownloadWorker, DubWorker, FetchOutcome, FetchVideo, MixAudio, MuxWorker, TranslateAudio,
};
pub use worker::{wait_for, Worker, WorkerContext};

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The three stage workers, generic over the external capabilities.
//!
//! The yt-dlp invocation, the translation service client and the FFmpeg
//! mix are collaborators behind the [`FetchVideo`] / [`TranslateAudio`] /
//! [`MixAudio`] traits. The workers own everything else: state and
//! metadata events, file staging under `incomplete/{id}/`, the atomic
//! move into `complete/`, and cancellation probes between suspension
//! points.

use crate::worker::{Worker, WorkerContext};
use async_trait::async_trait;
use rd_core::{
    codes, DownloadParams, DubParams, JobId, JobState, LogLevel, MediaPatch, MuxParams,
    QueuePayload, WorkerError,
};
use std::path::PathBuf;

/// Outcome of a successful fetch: where the video landed in the temp dir
/// and whatever source metadata the downloader reported.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub video_path: PathBuf,
    pub metadata: MediaPatch,
}

/// Downloads the source video into the job's temp dir.
#[async_trait]
pub trait FetchVideo: Send + Sync {
    async fn fetch(
        &self,
        params: &DownloadParams,
        ctx: &WorkerContext,
    ) -> Result<FetchOutcome, WorkerError>;
}

/// Produces the translated voice-over track.
#[async_trait]
pub trait TranslateAudio: Send + Sync {
    async fn translate(
        &self,
        params: &DubParams,
        ctx: &WorkerContext,
    ) -> Result<PathBuf, WorkerError>;
}

/// Mixes the final output into the temp dir; the worker moves it to
/// `complete/`.
#[async_trait]
pub trait MixAudio: Send + Sync {
    async fn mix(&self, params: &MuxParams, ctx: &WorkerContext) -> Result<PathBuf, WorkerError>;
}

#[async_trait]
impl<T: FetchVideo + ?Sized> FetchVideo for std::sync::Arc<T> {
    async fn fetch(
        &self,
        params: &DownloadParams,
        ctx: &WorkerContext,
    ) -> Result<FetchOutcome, WorkerError> {
        (**self).fetch(params, ctx).await
    }
}

#[async_trait]
impl<T: TranslateAudio + ?Sized> TranslateAudio for std::sync::Arc<T> {
    async fn translate(
        &self,
        params: &DubParams,
        ctx: &WorkerContext,
    ) -> Result<PathBuf, WorkerError> {
        (**self).translate(params, ctx).await
    }
}

#[async_trait]
impl<T: MixAudio + ?Sized> MixAudio for std::sync::Arc<T> {
    async fn mix(&self, params: &MuxParams, ctx: &WorkerContext) -> Result<PathBuf, WorkerError> {
        (**self).mix(params, ctx).await
    }
}

fn canceled(id: &JobId) -> WorkerError {
    WorkerError::permanent(codes::CANCELED, format!("job {id} canceled"))
}

/// Publish a capability error unless it is just the cancellation probe.
fn report(ctx: &WorkerContext, id: &JobId, err: WorkerError) -> WorkerError {
    if err.code != codes::CANCELED {
        ctx.publish_error(id, &err);
    }
    err
}

fn wrong_payload(expected: &str) -> WorkerError {
    WorkerError::permanent(
        codes::MISSING_INPUT,
        format!("expected a {expected} payload"),
    )
}

/// Download stage.
pub struct DownloadWorker<F> {
    fetcher: F,
}

impl<F> DownloadWorker<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<F: FetchVideo> Worker for DownloadWorker<F> {
    async fn run(&self, payload: &QueuePayload, ctx: &WorkerContext) -> Result<(), WorkerError> {
        let QueuePayload::Download(params) = payload else {
            return Err(wrong_payload("download"));
        };
        let id = &params.job_id;
        if ctx.is_canceled(id) {
            return Err(canceled(id));
        }

        ctx.publish_state(id, JobState::Downloading);
        ctx.layout
            .create_incomplete_dir(id)
            .map_err(|e| WorkerError::permanent(codes::TOOL_FAILED, e.to_string()))?;

        let outcome = match self.fetcher.fetch(params, ctx).await {
            Ok(outcome) => outcome,
            Err(err) => return Err(report(ctx, id, err)),
        };

        if ctx.is_canceled(id) {
            return Err(canceled(id));
        }

        let mut patch = outcome.metadata;
        patch.video_path = Some(outcome.video_path);
        patch.temp_dir = Some(params.temp_dir.clone());
        ctx.publish_metadata(id, patch);
        ctx.publish_state(id, JobState::Downloaded);
        ctx.publish_log(id, LogLevel::Info, format!("download finished for {}", params.url));
        Ok(())
    }
}

/// Dub stage.
pub struct DubWorker<T> {
    translator: T,
}

impl<T> DubWorker<T> {
    pub fn new(translator: T) -> Self {
        Self { translator }
    }
}

#[async_trait]
impl<T: TranslateAudio> Worker for DubWorker<T> {
    async fn run(&self, payload: &QueuePayload, ctx: &WorkerContext) -> Result<(), WorkerError> {
        let QueuePayload::Dub(params) = payload else {
            return Err(wrong_payload("dub"));
        };
        let id = &params.job_id;
        if ctx.is_canceled(id) {
            return Err(canceled(id));
        }
        if !params.video_path.exists() {
            let err = WorkerError::permanent(
                codes::MISSING_INPUT,
                format!("video file missing: {}", params.video_path.display()),
            );
            ctx.publish_error(id, &err);
            return Err(err);
        }

        ctx.publish_state(id, JobState::Dubbing);

        let dubbed = match self.translator.translate(params, ctx).await {
            Ok(path) => path,
            Err(err) => return Err(report(ctx, id, err)),
        };

        if ctx.is_canceled(id) {
            return Err(canceled(id));
        }

        ctx.publish_metadata(
            id,
            MediaPatch {
                audio_dubbed_path: Some(dubbed),
                ..Default::default()
            },
        );
        ctx.publish_state(id, JobState::Dubbed);
        ctx.publish_log(
            id,
            LogLevel::Info,
            format!("voice-over ready ({})", params.target_lang),
        );
        Ok(())
    }
}

/// Mux stage: mixes, then finalizes the output atomically.
pub struct MuxWorker<M> {
    mixer: M,
}

impl<M> MuxWorker<M> {
    pub fn new(mixer: M) -> Self {
        Self { mixer }
    }
}

#[async_trait]
impl<M: MixAudio> Worker for MuxWorker<M> {
    async fn run(&self, payload: &QueuePayload, ctx: &WorkerContext) -> Result<(), WorkerError> {
        let QueuePayload::Mux(params) = payload else {
            return Err(wrong_payload("mux"));
        };
        let id = &params.job_id;
        if ctx.is_canceled(id) {
            return Err(canceled(id));
        }
        if !params.video_path.exists() {
            let err = WorkerError::permanent(
                codes::MISSING_INPUT,
                format!("video file missing: {}", params.video_path.display()),
            );
            ctx.publish_error(id, &err);
            return Err(err);
        }

        ctx.publish_state(id, JobState::Muxing);

        let mixed = match self.mixer.mix(params, ctx).await {
            Ok(path) => path,
            Err(err) => return Err(report(ctx, id, err)),
        };

        if ctx.is_canceled(id) {
            return Err(canceled(id));
        }

        ctx.layout
            .finalize(&mixed, &params.final_path)
            .map_err(|e| {
                let err = WorkerError::permanent(codes::TOOL_FAILED, e.to_string());
                ctx.publish_error(id, &err);
                err
            })?;

        let file_size = std::fs::metadata(&params.final_path).map(|m| m.len()).ok();
        ctx.publish_metadata(
            id,
            MediaPatch {
                audio_mixed_path: Some(params.final_path.clone()),
                file_size,
                ..Default::default()
            },
        );

        // Work-in-progress dir is no longer needed
        if let Err(e) = std::fs::remove_dir_all(&params.temp_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                ctx.publish_log(
                    id,
                    LogLevel::Warn,
                    format!("could not remove temp dir: {e}"),
                );
            }
        }

        ctx.publish_state(id, JobState::Complete);
        Ok(())
    }
}

#[cfg(test)]
#[path = "stages_tests.rs"]
mod tests;

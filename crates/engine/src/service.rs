// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job service: creation, control operations, retry/resume, deletion.
//!
//! All mutations go through the store; control-op transitions are pushed
//! to subscribers through the same [`Forward`] seam the aggregator uses.
//! Filesystem cleanup always runs before rows are deleted — the store
//! never touches files.

use crate::bus::Forward;
use crate::coordinator::QueueHandle;
use crate::fs_layout::MediaLayout;
use crate::resume::{plan_resume, ResumeDiagnostic, ResumeStage};
use rd_core::{
    Clock, DownloadParams, DubParams, IdGen, Job, JobEvent, JobId, JobOptions, JobState, Media,
    MonotonicIdGen, MuxParams, QueueName, QueuePayload, ServerMessage, ServerMessageKind,
    MAX_PRIORITY,
};
use rd_storage::{Store, StoreError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Default priority when the creation request doesn't carry one.
const DEFAULT_PRIORITY: u8 = 5;

/// Errors surfaced by job service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("invalid state for {action}: {state}")]
    InvalidState {
        action: &'static str,
        state: JobState,
    },

    #[error("cannot resume: no completed stage is recoverable")]
    CannotResume(ResumeDiagnostic),

    #[error("insufficient disk space: {available_gb:.1} GB free, {required_gb:.1} GB required")]
    InsufficientSpace {
        available_gb: f64,
        required_gb: f64,
    },

    #[error("{what} is not recorded for this job")]
    MissingArtifact { what: &'static str },

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Creation request after transport decoding; unset options fall back to
/// the configured defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateJobRequest {
    pub url: String,
    pub dubbing: Option<bool>,
    pub target_lang: Option<String>,
    pub lively_voice: Option<bool>,
    pub format_preset: Option<String>,
    pub container: Option<String>,
    pub subtitles: Option<bool>,
    pub priority: Option<u8>,
    pub cookies: Option<String>,
}

/// Configured defaults applied at creation and mux time.
#[derive(Debug, Clone)]
pub struct JobDefaults {
    pub target_lang: String,
    pub container: String,
    pub format_preset: String,
    pub ducking_level: f64,
    pub normalization_lufs: f64,
    pub min_free_space_gb: f64,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            target_lang: "ru".to_string(),
            container: "mp4".to_string(),
            format_preset: "best".to_string(),
            ducking_level: 0.3,
            normalization_lufs: -16.0,
            min_free_space_gb: 5.0,
        }
    }
}

/// Job + media + recent audit rows, for the detail endpoint.
#[derive(Debug, Clone)]
pub struct JobDetail {
    pub job: Job,
    pub media: Media,
    pub events: Vec<JobEvent>,
}

/// The state machine driver.
pub struct JobService<C: Clock> {
    store: Arc<Store>,
    queue: QueueHandle,
    layout: MediaLayout,
    forwarder: Arc<dyn Forward>,
    defaults: JobDefaults,
    clock: C,
    ids: MonotonicIdGen,
}

impl<C: Clock> JobService<C> {
    pub fn new(
        store: Arc<Store>,
        queue: QueueHandle,
        layout: MediaLayout,
        forwarder: Arc<dyn Forward>,
        defaults: JobDefaults,
        clock: C,
    ) -> Self {
        Self {
            store,
            queue,
            layout,
            forwarder,
            defaults,
            clock,
            ids: MonotonicIdGen::new(),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn layout(&self) -> &MediaLayout {
        &self.layout
    }

    /// Create a job: validate, check disk space, write job + media +
    /// `started` event atomically, enqueue the download payload.
    pub fn create_job(&self, req: &CreateJobRequest) -> Result<Job, ServiceError> {
        validate_url(&req.url)?;
        let priority = req.priority.unwrap_or(DEFAULT_PRIORITY);
        if priority > MAX_PRIORITY {
            return Err(ServiceError::Validation {
                field: "priority",
                message: format!("must be 0..={MAX_PRIORITY}, got {priority}"),
            });
        }
        self.check_free_space()?;

        let now = self.clock.epoch_ms();
        let id = JobId::new(self.ids.next());
        let options = JobOptions {
            dubbing: req.dubbing.unwrap_or(false),
            target_lang: req
                .target_lang
                .clone()
                .unwrap_or_else(|| self.defaults.target_lang.clone()),
            lively_voice: req.lively_voice.unwrap_or(false),
            format_preset: req
                .format_preset
                .clone()
                .unwrap_or_else(|| self.defaults.format_preset.clone()),
            container: req
                .container
                .clone()
                .unwrap_or_else(|| self.defaults.container.clone()),
            subtitles: req.subtitles.unwrap_or(false),
        };

        let cookies_file = match &req.cookies {
            Some(contents) => Some(self.layout.write_cookies(&id, contents)?),
            None => None,
        };

        let job = Job::new(id.clone(), req.url.clone(), options, priority, now);
        let media = Media::empty(id.clone());
        let job = self.store.create_job(job, media, now)?;

        let params = self.download_params(&job, cookies_file);
        self.queue
            .enqueue(QueuePayload::Download(params), priority, now)?;

        self.forwarder.forward(ServerMessage::global(
            ServerMessageKind::JobAdded,
            now,
            json!({ "job": job }),
        ));
        info!(job = %id, url = %job.url, "job created");
        Ok(job)
    }

    /// Cancel: idempotent on an already-canceled job; rejected on other
    /// terminal states. Clears pending queue entries and cleans the
    /// filesystem. An in-flight worker notices at its next suspension
    /// point; cleanup here handles whatever it already wrote.
    pub fn cancel(&self, id: &JobId) -> Result<Job, ServiceError> {
        let job = self.store.get_job(id)?;
        if job.state == JobState::Canceled {
            return Ok(job);
        }
        if job.is_terminal() {
            return Err(ServiceError::InvalidState {
                action: "cancel",
                state: job.state,
            });
        }

        let now = self.clock.epoch_ms();
        let from = job.state;
        let job = self
            .store
            .transition_job(id, JobState::Canceled, None, now)?;

        for queue in QueueName::ALL {
            self.queue.remove(queue, id)?;
        }

        let media = self.store.get_media(id)?;
        self.layout.cleanup(&media)?;

        self.forwarder.forward(ServerMessage::for_job(
            id.clone(),
            ServerMessageKind::StateChange,
            now,
            json!({ "from": from, "to": JobState::Canceled }),
        ));
        info!(job = %id, "job canceled");
        Ok(job)
    }

    /// Update persisted priority and reshuffle any waiting queue entries.
    pub fn prioritize(&self, id: &JobId, priority: u8) -> Result<Job, ServiceError> {
        if priority > MAX_PRIORITY {
            return Err(ServiceError::Validation {
                field: "priority",
                message: format!("must be 0..={MAX_PRIORITY}, got {priority}"),
            });
        }
        let now = self.clock.epoch_ms();
        let job = self.store.set_priority(id, priority, now)?;
        self.queue.wake_all();
        Ok(job)
    }

    /// Reserved control actions.
    pub fn pause(&self, _id: &JobId) -> Result<Job, ServiceError> {
        Err(ServiceError::NotImplemented("pause"))
    }

    pub fn resume_control(&self, _id: &JobId) -> Result<Job, ServiceError> {
        Err(ServiceError::NotImplemented("resume"))
    }

    /// Retry: fresh lineage from the download stage. Allowed from failed
    /// and canceled only.
    pub fn retry(&self, id: &JobId) -> Result<Job, ServiceError> {
        let job = self.store.get_job(id)?;
        if !matches!(job.state, JobState::Failed | JobState::Canceled) {
            return Err(ServiceError::InvalidState {
                action: "retry",
                state: job.state,
            });
        }

        let now = self.clock.epoch_ms();
        let job = self.store.requeue_job(
            id,
            JobState::Queued,
            json!({ "previousStatus": job.state }),
            now,
        )?;

        let cookies = Some(self.layout.cookies_path(id)).filter(|p| p.exists());
        let params = self.download_params(&job, cookies);
        self.queue
            .enqueue(QueuePayload::Download(params), job.priority, now)?;
        info!(job = %id, retry_count = job.retry_count, "job retried");
        Ok(job)
    }

    /// Resume: restart a failed job at the stage the planner picks.
    pub fn resume(&self, id: &JobId) -> Result<(Job, ResumeStage), ServiceError> {
        let job = self.store.get_job(id)?;
        if job.state != JobState::Failed {
            return Err(ServiceError::InvalidState {
                action: "resume",
                state: job.state,
            });
        }

        let media = self.store.get_media(id)?;
        let (events, _) = self.store.list_events(id, 0, 0)?;
        let plan = plan_resume(&job, &media, &events).map_err(ServiceError::CannotResume)?;

        let now = self.clock.epoch_ms();
        let job = self.store.requeue_job(
            id,
            plan.state,
            json!({ "previousStatus": JobState::Failed, "resumeFrom": plan.resume_from }),
            now,
        )?;

        let payload = match plan.resume_from {
            ResumeStage::Dubbing => QueuePayload::Dub(self.dub_params(&job, &media)?),
            ResumeStage::Muxing => QueuePayload::Mux(self.mux_params(&job, &media)?),
        };
        self.queue.enqueue(payload, job.priority, now)?;
        info!(job = %id, resume_from = %plan.resume_from, "job resumed");
        Ok((job, plan.resume_from))
    }

    /// Delete: filesystem cleanup first, then cascade delete of every row.
    pub fn delete(&self, id: &JobId) -> Result<(), ServiceError> {
        let media = self.store.get_media(id)?;
        self.layout.cleanup(&media)?;

        for queue in QueueName::ALL {
            self.queue.remove(queue, id)?;
        }
        self.store.delete_job(id)?;

        self.forwarder.forward(ServerMessage::global(
            ServerMessageKind::JobRemoved,
            self.clock.epoch_ms(),
            json!({ "id": id }),
        ));
        info!(job = %id, "job deleted");
        Ok(())
    }

    pub fn get_detail(&self, id: &JobId, recent: usize) -> Result<JobDetail, ServiceError> {
        let job = self.store.get_job(id)?;
        let media = self.store.get_media(id)?;
        let (events, _) = self.store.list_events(id, recent, 0)?;
        Ok(JobDetail { job, media, events })
    }

    /// On stage success, hand the job to the next pool: download → dub
    /// (iff requested) or mux; dub → mux; mux → done.
    pub fn enqueue_next_stage(
        &self,
        id: &JobId,
        completed: QueueName,
    ) -> Result<Option<QueueName>, ServiceError> {
        let job = match self.store.get_job(id) {
            Ok(job) => job,
            // Deleted while the worker ran; nothing to chain
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if job.state == JobState::Canceled {
            return Ok(None);
        }

        let now = self.clock.epoch_ms();
        let media = self.store.get_media(id)?;
        let next = match completed {
            QueueName::Download if job.options.dubbing => {
                let params = self.dub_params(&job, &media)?;
                self.queue
                    .enqueue(QueuePayload::Dub(params), job.priority, now)?;
                Some(QueueName::Dub)
            }
            QueueName::Download | QueueName::Dub => {
                let params = self.mux_params(&job, &media)?;
                self.queue
                    .enqueue(QueuePayload::Mux(params), job.priority, now)?;
                Some(QueueName::Mux)
            }
            QueueName::Mux => None,
        };
        Ok(next)
    }

    fn download_params(&self, job: &Job, cookies_file: Option<std::path::PathBuf>) -> DownloadParams {
        DownloadParams {
            job_id: job.id.clone(),
            url: job.url.clone(),
            format_preset: job.options.format_preset.clone(),
            container: job.options.container.clone(),
            dubbing: job.options.dubbing,
            target_lang: job.options.target_lang.clone(),
            lively_voice: job.options.lively_voice,
            subtitles: job.options.subtitles,
            temp_dir: self.layout.incomplete_dir(&job.id),
            final_path: self.layout.final_path(&job.id, &job.options.container),
            cookies_file,
            proxy: None,
            rate_limit: None,
        }
    }

    fn dub_params(&self, job: &Job, media: &Media) -> Result<DubParams, ServiceError> {
        let video_path = media
            .video_path
            .clone()
            .ok_or(ServiceError::MissingArtifact { what: "video_path" })?;
        let temp_dir = self.layout.incomplete_dir(&job.id);
        Ok(DubParams {
            job_id: job.id.clone(),
            source_url: job.url.clone(),
            video_path,
            target_lang: job.options.target_lang.clone(),
            lively_voice: job.options.lively_voice,
            output_path: temp_dir.join(format!("dubbed.{}.mp3", job.options.target_lang)),
            final_path: self.layout.final_path(&job.id, &job.options.container),
            container: job.options.container.clone(),
            temp_dir,
        })
    }

    fn mux_params(&self, job: &Job, media: &Media) -> Result<MuxParams, ServiceError> {
        let video_path = media
            .video_path
            .clone()
            .ok_or(ServiceError::MissingArtifact { what: "video_path" })?;
        let dubbed_audio_path = if job.options.dubbing {
            Some(media.audio_dubbed_path.clone().ok_or(
                ServiceError::MissingArtifact {
                    what: "audio_dubbed_path",
                },
            )?)
        } else {
            None
        };
        Ok(MuxParams {
            job_id: job.id.clone(),
            video_path,
            dubbed_audio_path,
            target_lang: job.options.target_lang.clone(),
            container: job.options.container.clone(),
            ducking_level: self.defaults.ducking_level,
            normalization_lufs: self.defaults.normalization_lufs,
            temp_dir: self.layout.incomplete_dir(&job.id),
            final_path: self.layout.final_path(&job.id, &job.options.container),
        })
    }

    /// Reject creation when the media filesystem is low on space.
    fn check_free_space(&self) -> Result<(), ServiceError> {
        let required_gb = self.defaults.min_free_space_gb;
        if required_gb <= 0.0 {
            return Ok(());
        }
        let available = match fs2::available_space(self.layout.root()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "could not determine free space, allowing creation");
                return Ok(());
            }
        };
        let available_gb = available as f64 / 1_000_000_000.0;
        if available_gb < required_gb {
            return Err(ServiceError::InsufficientSpace {
                available_gb,
                required_gb,
            });
        }
        Ok(())
    }
}

/// Syntactic URL validation: http/https scheme and a nonempty host.
fn validate_url(url: &str) -> Result<(), ServiceError> {
    let invalid = |message: &str| ServiceError::Validation {
        field: "url",
        message: message.to_string(),
    };

    if url.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| invalid("must start with http:// or https://"))?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bus::EventBus;
use crate::fs_layout::MediaLayout;
use rd_core::{BusMessage, ChannelPayload, Job, JobOptions, JobState, Media};
use rd_storage::Store;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::broadcast;

struct Fixture {
    _dir: TempDir,
    store: Arc<Store>,
    ctx: WorkerContext,
    rx: broadcast::Receiver<BusMessage>,
    layout: MediaLayout,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("state")).unwrap());
    let layout = MediaLayout::new(dir.path().join("media"));
    layout.ensure_dirs().unwrap();
    let bus = EventBus::new();
    let rx = bus.subscribe();
    let ctx = WorkerContext::new(bus, Arc::clone(&store), layout.clone());
    Fixture {
        _dir: dir,
        store,
        ctx,
        rx,
        layout,
    }
}

fn seed_job(store: &Store, id: &str, state: JobState, dubbing: bool) -> JobId {
    let job_id = JobId::new(id);
    let mut job = Job::new(
        job_id.clone(),
        format!("https://example.test/{id}"),
        JobOptions {
            dubbing,
            ..JobOptions::default()
        },
        5,
        1_000,
    );
    job.state = state;
    store
        .create_job(job, Media::empty(job_id.clone()), 1_000)
        .unwrap();
    job_id
}

fn drain(rx: &mut broadcast::Receiver<BusMessage>) -> Vec<BusMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn states(messages: &[BusMessage]) -> Vec<JobState> {
    messages
        .iter()
        .filter_map(|m| match m.payload {
            ChannelPayload::State { to, .. } => Some(to),
            _ => None,
        })
        .collect()
}

struct FakeFetcher {
    result: Result<MediaPatch, WorkerError>,
}

#[async_trait]
impl FetchVideo for FakeFetcher {
    async fn fetch(
        &self,
        params: &DownloadParams,
        ctx: &WorkerContext,
    ) -> Result<FetchOutcome, WorkerError> {
        let metadata = self.result.clone()?;
        ctx.publish_progress(&params.job_id, rd_core::ProgressStage::Downloading, 100.0);
        let video_path = params.temp_dir.join("video.mp4");
        std::fs::write(&video_path, b"video").map_err(|e| {
            WorkerError::permanent(codes::TOOL_FAILED, e.to_string())
        })?;
        Ok(FetchOutcome {
            video_path,
            metadata,
        })
    }
}

struct FakeTranslator;

#[async_trait]
impl TranslateAudio for FakeTranslator {
    async fn translate(
        &self,
        params: &DubParams,
        _ctx: &WorkerContext,
    ) -> Result<PathBuf, WorkerError> {
        std::fs::write(&params.output_path, b"audio")
            .map_err(|e| WorkerError::permanent(codes::TOOL_FAILED, e.to_string()))?;
        Ok(params.output_path.clone())
    }
}

struct FakeMixer;

#[async_trait]
impl MixAudio for FakeMixer {
    async fn mix(&self, params: &MuxParams, _ctx: &WorkerContext) -> Result<PathBuf, WorkerError> {
        let out = params.temp_dir.join("mixed.mp4");
        std::fs::write(&out, b"mixed")
            .map_err(|e| WorkerError::permanent(codes::TOOL_FAILED, e.to_string()))?;
        Ok(out)
    }
}

fn download_payload(f: &Fixture, id: &JobId) -> QueuePayload {
    QueuePayload::Download(DownloadParams {
        job_id: id.clone(),
        url: format!("https://example.test/{id}"),
        format_preset: "best".to_string(),
        container: "mp4".to_string(),
        dubbing: false,
        target_lang: "ru".to_string(),
        lively_voice: false,
        subtitles: false,
        temp_dir: f.layout.incomplete_dir(id),
        final_path: f.layout.final_path(id, "mp4"),
        cookies_file: None,
        proxy: None,
        rate_limit: None,
    })
}

fn mux_payload(f: &Fixture, id: &JobId, video: PathBuf) -> QueuePayload {
    QueuePayload::Mux(MuxParams {
        job_id: id.clone(),
        video_path: video,
        dubbed_audio_path: None,
        target_lang: "ru".to_string(),
        container: "mp4".to_string(),
        ducking_level: 0.3,
        normalization_lufs: -16.0,
        temp_dir: f.layout.incomplete_dir(id),
        final_path: f.layout.final_path(id, "mp4"),
    })
}

#[tokio::test]
async fn download_worker_stages_files_and_reports_metadata() {
    let mut f = fixture();
    let id = seed_job(&f.store, "job-1", JobState::Queued, false);
    let worker = DownloadWorker::new(FakeFetcher {
        result: Ok(MediaPatch {
            title: Some("clip".to_string()),
            ..Default::default()
        }),
    });

    worker
        .run(&download_payload(&f, &id), &f.ctx)
        .await
        .unwrap();

    let messages = drain(&mut f.rx);
    assert_eq!(
        states(&messages),
        vec![JobState::Downloading, JobState::Downloaded]
    );
    let patch = messages
        .iter()
        .find_map(|m| match &m.payload {
            ChannelPayload::Metadata { patch } => Some(patch.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(patch.title.as_deref(), Some("clip"));
    assert!(patch.video_path.as_deref().unwrap().exists());
    assert_eq!(patch.temp_dir.as_deref(), Some(f.layout.incomplete_dir(&id).as_path()));
}

#[tokio::test]
async fn download_worker_publishes_capability_errors() {
    let mut f = fixture();
    let id = seed_job(&f.store, "job-1", JobState::Queued, false);
    let worker = DownloadWorker::new(FakeFetcher {
        result: Err(WorkerError::transient(codes::NETWORK, "reset")),
    });

    let err = worker
        .run(&download_payload(&f, &id), &f.ctx)
        .await
        .unwrap_err();
    assert!(err.retryable);

    let messages = drain(&mut f.rx);
    assert!(messages.iter().any(|m| matches!(
        &m.payload,
        ChannelPayload::Error { code, retryable: true, .. } if code == codes::NETWORK
    )));
}

#[tokio::test]
async fn canceled_job_short_circuits_without_state_events() {
    let mut f = fixture();
    let id = seed_job(&f.store, "job-1", JobState::Canceled, false);
    let worker = DownloadWorker::new(FakeFetcher {
        result: Ok(MediaPatch::default()),
    });

    let err = worker
        .run(&download_payload(&f, &id), &f.ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::CANCELED);
    assert!(states(&drain(&mut f.rx)).is_empty());
}

#[tokio::test]
async fn dub_worker_requires_the_video_file() {
    let mut f = fixture();
    let id = seed_job(&f.store, "job-1", JobState::Downloaded, true);
    let temp = f.layout.create_incomplete_dir(&id).unwrap();
    let worker = DubWorker::new(FakeTranslator);

    let payload = QueuePayload::Dub(DubParams {
        job_id: id.clone(),
        source_url: "https://example.test/job-1".to_string(),
        video_path: temp.join("missing.mp4"),
        target_lang: "ru".to_string(),
        lively_voice: false,
        output_path: temp.join("dubbed.ru.mp3"),
        final_path: f.layout.final_path(&id, "mp4"),
        container: "mp4".to_string(),
        temp_dir: temp,
    });

    let err = worker.run(&payload, &f.ctx).await.unwrap_err();
    assert_eq!(err.code, codes::MISSING_INPUT);
    assert!(!err.retryable);
    assert!(!drain(&mut f.rx).is_empty());
}

#[tokio::test]
async fn dub_worker_reports_dubbed_audio() {
    let mut f = fixture();
    let id = seed_job(&f.store, "job-1", JobState::Downloaded, true);
    let temp = f.layout.create_incomplete_dir(&id).unwrap();
    let video = temp.join("video.mp4");
    std::fs::write(&video, b"video").unwrap();

    let payload = QueuePayload::Dub(DubParams {
        job_id: id.clone(),
        source_url: "https://example.test/job-1".to_string(),
        video_path: video,
        target_lang: "ru".to_string(),
        lively_voice: false,
        output_path: temp.join("dubbed.ru.mp3"),
        final_path: f.layout.final_path(&id, "mp4"),
        container: "mp4".to_string(),
        temp_dir: temp.clone(),
    });

    DubWorker::new(FakeTranslator)
        .run(&payload, &f.ctx)
        .await
        .unwrap();

    let messages = drain(&mut f.rx);
    assert_eq!(states(&messages), vec![JobState::Dubbing, JobState::Dubbed]);
    let patch = messages
        .iter()
        .find_map(|m| match &m.payload {
            ChannelPayload::Metadata { patch } => Some(patch.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(patch.audio_dubbed_path.as_deref(), Some(temp.join("dubbed.ru.mp3").as_path()));
}

#[tokio::test]
async fn mux_worker_finalizes_atomically_and_cleans_temp() {
    let mut f = fixture();
    let id = seed_job(&f.store, "job-1", JobState::Downloaded, false);
    let temp = f.layout.create_incomplete_dir(&id).unwrap();
    let video = temp.join("video.mp4");
    std::fs::write(&video, b"video").unwrap();

    MuxWorker::new(FakeMixer)
        .run(&mux_payload(&f, &id, video), &f.ctx)
        .await
        .unwrap();

    let final_path = f.layout.final_path(&id, "mp4");
    assert_eq!(std::fs::read(&final_path).unwrap(), b"mixed");
    assert!(!f.layout.incomplete_dir(&id).exists());

    let messages = drain(&mut f.rx);
    assert_eq!(states(&messages), vec![JobState::Muxing, JobState::Complete]);
    let patch = messages
        .iter()
        .find_map(|m| match &m.payload {
            ChannelPayload::Metadata { patch } => Some(patch.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(patch.audio_mixed_path.as_deref(), Some(final_path.as_path()));
    assert_eq!(patch.file_size, Some(5));
}

#[tokio::test]
async fn wrong_payload_is_rejected() {
    let f = fixture();
    let id = seed_job(&f.store, "job-1", JobState::Queued, false);
    let err = MuxWorker::new(FakeMixer)
        .run(&download_payload(&f, &id), &f.ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::MISSING_INPUT);
}

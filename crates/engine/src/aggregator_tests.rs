// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bus::Forward;
use parking_lot::Mutex;
use rd_core::{
    ChannelPayload, FakeClock, Job, JobEventKind, JobId, JobOptions, LogLevel, Media, MediaPatch,
    ProgressStage,
};
use tempfile::TempDir;

#[derive(Clone, Default)]
struct RecordingForward(Arc<Mutex<Vec<ServerMessage>>>);

impl Forward for RecordingForward {
    fn forward(&self, msg: ServerMessage) {
        self.0.lock().push(msg);
    }
}

struct Fixture {
    _dir: TempDir,
    store: Arc<Store>,
    aggregator: EventAggregator<FakeClock>,
    forwarded: RecordingForward,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("state")).unwrap());
    let forwarded = RecordingForward::default();
    let aggregator = EventAggregator::new(
        Arc::clone(&store),
        Arc::new(forwarded.clone()),
        FakeClock::new(),
    );
    Fixture {
        _dir: dir,
        store,
        aggregator,
        forwarded,
    }
}

fn seed_job(store: &Store, id: &str) -> JobId {
    let job_id = JobId::new(id);
    let job = Job::new(
        job_id.clone(),
        format!("https://example.test/{id}"),
        JobOptions::default(),
        5,
        1_000,
    );
    store
        .create_job(job, Media::empty(job_id.clone()), 1_000)
        .unwrap();
    job_id
}

fn msg(id: &JobId, payload: ChannelPayload) -> BusMessage {
    BusMessage::new(id.clone(), 9_000, payload)
}

#[test]
fn state_change_persists_and_forwards() {
    let f = fixture();
    let id = seed_job(&f.store, "job-1");

    f.aggregator.handle(&msg(
        &id,
        ChannelPayload::State {
            from: JobState::Queued,
            to: JobState::Downloading,
        },
    ));

    assert_eq!(f.store.get_job(&id).unwrap().state, JobState::Downloading);
    let (events, _) = f.store.list_events(&id, 1, 0).unwrap();
    assert_eq!(events[0].kind, JobEventKind::StateChange);

    let frames = f.forwarded.0.lock();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].kind, ServerMessageKind::StateChange);
    assert_eq!(frames[0].job_id.as_ref().unwrap(), &id);
    assert_eq!(frames[0].payload["to"], "downloading");
    // The internal enum tag does not leak into push frames
    assert!(frames[0].payload.get("kind").is_none());
}

#[test]
fn progress_forwards_without_persisting() {
    let f = fixture();
    let id = seed_job(&f.store, "job-1");
    let (_, before) = f.store.list_events(&id, 0, 0).unwrap();

    f.aggregator.handle(&msg(
        &id,
        ChannelPayload::Progress {
            stage: ProgressStage::Downloading,
            percent: 55.0,
            downloaded_bytes: Some(10),
            total_bytes: Some(20),
            speed: None,
            eta: None,
        },
    ));

    let (_, after) = f.store.list_events(&id, 0, 0).unwrap();
    assert_eq!(before, after);

    let frames = f.forwarded.0.lock();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].kind, ServerMessageKind::Progress);
    assert_eq!(frames[0].payload["percent"], 55.0);
}

#[test]
fn log_appends_event_row_and_forwards() {
    let f = fixture();
    let id = seed_job(&f.store, "job-1");

    f.aggregator.handle(&msg(
        &id,
        ChannelPayload::Log {
            level: LogLevel::Warn,
            message: "slow source".to_string(),
        },
    ));

    let (events, _) = f.store.list_events(&id, 1, 0).unwrap();
    assert_eq!(events[0].kind, JobEventKind::Log);
    assert_eq!(events[0].payload["message"], "slow source");
    assert_eq!(f.forwarded.0.lock().len(), 1);
}

#[test]
fn retryable_error_persists_but_does_not_fail_the_job() {
    let f = fixture();
    let id = seed_job(&f.store, "job-1");

    f.aggregator.handle(&msg(
        &id,
        ChannelPayload::Error {
            code: "NETWORK".to_string(),
            message: "connection reset".to_string(),
            retryable: true,
            stack: None,
        },
    ));

    let job = f.store.get_job(&id).unwrap();
    assert_eq!(job.state, JobState::Queued);
    assert!(job.error.is_none());

    let (events, _) = f.store.list_events(&id, 1, 0).unwrap();
    assert_eq!(events[0].kind, JobEventKind::Error);
}

#[test]
fn permanent_error_fails_the_job_with_matching_message() {
    let f = fixture();
    let id = seed_job(&f.store, "job-1");

    f.aggregator.handle(&msg(
        &id,
        ChannelPayload::Error {
            code: "UNSUPPORTED_LANGUAGE".to_string(),
            message: "no voices for xx".to_string(),
            retryable: false,
            stack: None,
        },
    ));

    let job = f.store.get_job(&id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_deref(), Some("no voices for xx"));
    assert!(job.completed_at_ms.is_some());

    // Provenance: a preceding error event carries the same message
    let (events, _) = f.store.list_events(&id, 0, 0).unwrap();
    assert!(events
        .iter()
        .any(|e| e.kind == JobEventKind::Error && e.payload["message"] == "no voices for xx"));
}

#[test]
fn metadata_patches_media_without_rows_or_frames() {
    let f = fixture();
    let id = seed_job(&f.store, "job-1");
    let (_, before) = f.store.list_events(&id, 0, 0).unwrap();

    f.aggregator.handle(&msg(
        &id,
        ChannelPayload::Metadata {
            patch: MediaPatch {
                title: Some("clip".to_string()),
                duration_secs: Some(61.5),
                ..Default::default()
            },
        },
    ));

    let media = f.store.get_media(&id).unwrap();
    assert_eq!(media.title.as_deref(), Some("clip"));
    assert_eq!(media.duration_secs, Some(61.5));

    let (_, after) = f.store.list_events(&id, 0, 0).unwrap();
    assert_eq!(before, after);
    assert!(f.forwarded.0.lock().is_empty());
}

#[test]
fn completion_appends_a_finished_row() {
    let f = fixture();
    let id = seed_job(&f.store, "job-1");

    f.aggregator.handle(&msg(
        &id,
        ChannelPayload::State {
            from: JobState::Muxing,
            to: JobState::Complete,
        },
    ));

    let (events, _) = f.store.list_events(&id, 0, 0).unwrap();
    assert!(events.iter().any(|e| e.kind == JobEventKind::Finished));
    assert!(f.store.get_job(&id).unwrap().completed_at_ms.is_some());
}

#[test]
fn late_worker_events_cannot_exit_a_terminal_state() {
    let f = fixture();
    let id = seed_job(&f.store, "job-1");
    f.store
        .transition_job(&id, JobState::Canceled, None, 2_000)
        .unwrap();

    // A worker that outlived the cancel still reports progress and a failure
    f.aggregator.handle(&msg(
        &id,
        ChannelPayload::State {
            from: JobState::Downloading,
            to: JobState::Downloaded,
        },
    ));
    f.aggregator.handle(&msg(
        &id,
        ChannelPayload::Error {
            code: "TOOL_FAILED".to_string(),
            message: "interrupted".to_string(),
            retryable: false,
            stack: None,
        },
    ));

    let job = f.store.get_job(&id).unwrap();
    assert_eq!(job.state, JobState::Canceled);
    assert!(f.forwarded.0.lock().is_empty());
}

#[test]
fn events_for_unknown_jobs_are_dropped() {
    let f = fixture();

    f.aggregator.handle(&msg(
        &JobId::new("ghost"),
        ChannelPayload::State {
            from: JobState::Queued,
            to: JobState::Downloading,
        },
    ));

    assert!(f.forwarded.0.lock().is_empty());
}

#[tokio::test]
async fn run_consumes_the_bus_in_order() {
    let f = fixture();
    let id = seed_job(&f.store, "job-1");
    let bus = EventBus::new();

    let aggregator = EventAggregator::new(
        Arc::clone(&f.store),
        Arc::new(f.forwarded.clone()),
        FakeClock::new(),
    );
    let bus_for_task = bus.clone();
    let handle = tokio::spawn(async move { aggregator.run(&bus_for_task).await });

    // Give the task a beat to subscribe before publishing
    tokio::task::yield_now().await;
    for to in [JobState::Downloading, JobState::Downloaded] {
        bus.publish(msg(&id, ChannelPayload::State { from: JobState::Queued, to }));
    }

    // Wait for both transitions to land
    for _ in 0..100 {
        if f.store.get_job(&id).unwrap().state == JobState::Downloaded {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(f.store.get_job(&id).unwrap().state, JobState::Downloaded);

    let (events, _) = f.store.list_events(&id, 2, 0).unwrap();
    assert_eq!(events[0].payload["to"], "downloaded");
    assert_eq!(events[1].payload["to"], "downloading");

    handle.abort();
}

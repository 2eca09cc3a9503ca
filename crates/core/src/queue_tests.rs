// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    download = { QueueName::Download, 1, 1_000, 3_600_000 },
    dub = { QueueName::Dub, 2, 2_000, 1_800_000 },
    mux = { QueueName::Mux, 1, 2_000, 1_800_000 },
)]
fn default_settings_match_the_dispatch_table(
    queue: QueueName,
    concurrency: u32,
    base_ms: u64,
    timeout_ms: u64,
) {
    let s = QueueSettings::defaults(queue);
    assert_eq!(s.concurrency, concurrency);
    assert_eq!(s.attempts, 3);
    assert_eq!(s.backoff_base_ms, base_ms);
    assert_eq!(s.timeout_ms, timeout_ms);
}

#[test]
fn backoff_doubles_per_attempt() {
    let s = QueueSettings::defaults(QueueName::Dub);
    assert_eq!(s.backoff_delay(1), Duration::from_millis(2_000));
    assert_eq!(s.backoff_delay(2), Duration::from_millis(4_000));
    assert_eq!(s.backoff_delay(3), Duration::from_millis(8_000));
}

#[test]
fn with_concurrency_clamps_to_at_least_one() {
    let s = QueueSettings::defaults(QueueName::Mux).with_concurrency(0);
    assert_eq!(s.concurrency, 1);
}

#[test]
fn payload_knows_its_queue_and_job() {
    let payload = QueuePayload::Dub(DubParams {
        job_id: JobId::new("job-7"),
        source_url: "https://example.test/v7".to_string(),
        video_path: PathBuf::from("/m/incomplete/job-7/video.mp4"),
        target_lang: "ru".to_string(),
        lively_voice: false,
        temp_dir: PathBuf::from("/m/incomplete/job-7"),
        output_path: PathBuf::from("/m/incomplete/job-7/dub.mp3"),
        final_path: PathBuf::from("/m/complete/job-7.mp4"),
        container: "mp4".to_string(),
    });
    assert_eq!(payload.queue(), QueueName::Dub);
    assert_eq!(payload.job_id().as_str(), "job-7");
}

#[test]
fn payload_serializes_with_queue_tag() {
    let payload = QueuePayload::Mux(MuxParams {
        job_id: JobId::new("job-3"),
        video_path: PathBuf::from("/m/incomplete/job-3/video.mp4"),
        dubbed_audio_path: None,
        target_lang: "ru".to_string(),
        container: "mp4".to_string(),
        ducking_level: 0.3,
        normalization_lufs: -16.0,
        temp_dir: PathBuf::from("/m/incomplete/job-3"),
        final_path: PathBuf::from("/m/complete/job-3.mp4"),
    });
    let v = serde_json::to_value(&payload).unwrap();
    assert_eq!(v["queue"], "mux");
    assert_eq!(v["ducking_level"], 0.3);

    let back: QueuePayload = serde_json::from_value(v).unwrap();
    assert_eq!(back, payload);
}

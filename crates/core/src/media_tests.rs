// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn empty_media_has_only_job_id() {
    let m = Media::empty(JobId::new("job-1"));
    assert_eq!(m.job_id, "job-1");
    assert!(m.video_path.is_none());
    assert!(m.title.is_none());
}

#[test]
fn patch_applies_only_set_fields() {
    let mut m = Media::empty(JobId::new("job-1"));
    m.title = Some("old title".to_string());
    m.uploader = Some("someone".to_string());

    let patch = MediaPatch {
        title: Some("new title".to_string()),
        video_path: Some(PathBuf::from("/media/incomplete/job-1/video.mp4")),
        ..Default::default()
    };
    patch.apply(&mut m);

    assert_eq!(m.title.as_deref(), Some("new title"));
    assert_eq!(m.uploader.as_deref(), Some("someone"));
    assert_eq!(
        m.video_path.as_deref(),
        Some(std::path::Path::new("/media/incomplete/job-1/video.mp4"))
    );
}

#[test]
fn empty_patch_is_a_noop() {
    let mut m = Media::empty(JobId::new("job-1"));
    m.file_size = Some(42);
    let before = m.clone();

    let patch = MediaPatch::default();
    assert!(patch.is_empty());
    patch.apply(&mut m);
    assert_eq!(m, before);
}

#[test]
fn patch_omits_unset_fields_when_serialized() {
    let patch = MediaPatch {
        duration_secs: Some(12.5),
        ..Default::default()
    };
    let json = serde_json::to_value(&patch).unwrap();
    assert_eq!(json, serde_json::json!({ "duration_secs": 12.5 }));
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess-backed capabilities: yt-dlp for fetching, vot-cli for the
//! voice-over translation, ffmpeg for mixing.
//!
//! Only command assembly and exit-status mapping live here; staging,
//! events and the atomic finalize belong to the stage workers. Stderr is
//! classified into transient (network/timeout/rate-limit) and permanent
//! errors so the queue's retry policy can act on it.

use async_trait::async_trait;
use rd_core::{
    codes, DownloadParams, DubParams, MediaPatch, MuxParams, ProgressStage, WorkerError,
};
use rd_engine::{FetchOutcome, FetchVideo, MixAudio, TranslateAudio, WorkerContext};
use std::ffi::OsString;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Substrings marking an error as transient.
const TRANSIENT_MARKERS: [&str; 8] = [
    "timed out",
    "timeout",
    "connection",
    "network",
    "reset",
    "temporarily",
    "429",
    "503",
];

/// Map a failed tool invocation onto the worker error taxonomy.
fn classify(tool: &str, stderr: &str) -> WorkerError {
    let lowered = stderr.to_lowercase();
    let transient = TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m));
    let summary: String = stderr.chars().take(500).collect();
    if transient {
        WorkerError::transient(codes::NETWORK, format!("{tool}: {summary}"))
    } else {
        WorkerError::permanent(codes::EXTRACTION_FAILED, format!("{tool}: {summary}"))
    }
}

async fn run_tool(tool: &str, mut cmd: Command) -> Result<std::process::Output, WorkerError> {
    debug!(tool, "spawning");
    let output = cmd
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| WorkerError::permanent(codes::TOOL_FAILED, format!("{tool}: {e}")))?;
    if !output.status.success() {
        return Err(classify(tool, &String::from_utf8_lossy(&output.stderr)));
    }
    Ok(output)
}

/// yt-dlp invocation.
pub struct YtDlp {
    binary: String,
}

impl YtDlp {
    pub fn new() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
        }
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new()
    }
}

fn ytdlp_args(params: &DownloadParams) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--no-warnings".into(),
        "--no-progress".into(),
        "--no-playlist".into(),
        "--format".into(),
        params.format_preset.clone().into(),
        "--output".into(),
        params.temp_dir.join("video.%(ext)s").into(),
        "--print".into(),
        "after_move:%(id)s\t%(title)s\t%(uploader)s\t%(upload_date)s\t%(duration)s".into(),
        "--no-simulate".into(),
    ];
    if params.subtitles {
        args.push("--write-subs".into());
    }
    if let Some(cookies) = &params.cookies_file {
        args.push("--cookies".into());
        args.push(cookies.clone().into());
    }
    if let Some(proxy) = &params.proxy {
        args.push("--proxy".into());
        args.push(proxy.clone().into());
    }
    if let Some(rate) = params.rate_limit {
        args.push("--limit-rate".into());
        args.push(rate.to_string().into());
    }
    args.push(params.url.clone().into());
    args
}

/// Parse the tab-separated `--print` line into a metadata patch.
fn parse_ytdlp_print(line: &str) -> MediaPatch {
    let mut fields = line.trim().split('\t');
    let mut field = |name: &str| {
        fields
            .next()
            .filter(|v| !v.is_empty() && *v != "NA")
            .map(str::to_string)
            .or_else(|| {
                debug!(name, "missing yt-dlp metadata field");
                None
            })
    };
    MediaPatch {
        source_id: field("id"),
        title: field("title"),
        uploader: field("uploader"),
        upload_date: field("upload_date"),
        duration_secs: field("duration").and_then(|v| v.parse().ok()),
        ..Default::default()
    }
}

/// Locate the downloaded file: `video.<ext>` in the temp dir.
fn find_video_file(temp_dir: &std::path::Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(temp_dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("video."))
        })
}

#[async_trait]
impl FetchVideo for YtDlp {
    async fn fetch(
        &self,
        params: &DownloadParams,
        ctx: &WorkerContext,
    ) -> Result<FetchOutcome, WorkerError> {
        ctx.publish_progress(&params.job_id, ProgressStage::Downloading, 0.0);

        let mut cmd = Command::new(&self.binary);
        cmd.args(ytdlp_args(params));
        let output = run_tool("yt-dlp", cmd).await?;

        let video_path = find_video_file(&params.temp_dir).ok_or_else(|| {
            WorkerError::permanent(
                codes::EXTRACTION_FAILED,
                "yt-dlp reported success but produced no video file",
            )
        })?;

        ctx.publish_progress(&params.job_id, ProgressStage::Downloading, 100.0);
        Ok(FetchOutcome {
            video_path,
            metadata: parse_ytdlp_print(&String::from_utf8_lossy(&output.stdout)),
        })
    }
}

/// vot-cli invocation.
pub struct VotCli {
    binary: String,
}

impl VotCli {
    pub fn new() -> Self {
        Self {
            binary: "vot-cli".to_string(),
        }
    }
}

impl Default for VotCli {
    fn default() -> Self {
        Self::new()
    }
}

fn votcli_args(params: &DubParams) -> Vec<OsString> {
    let output_name = params
        .output_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| "dubbed.mp3".into());
    let mut args: Vec<OsString> = vec![
        "--reslang".into(),
        params.target_lang.clone().into(),
        "--output".into(),
        params.temp_dir.clone().into(),
        "--output-file".into(),
        output_name,
    ];
    if params.lively_voice {
        args.push("--lively".into());
    }
    args.push(params.source_url.clone().into());
    args
}

#[async_trait]
impl TranslateAudio for VotCli {
    async fn translate(
        &self,
        params: &DubParams,
        ctx: &WorkerContext,
    ) -> Result<PathBuf, WorkerError> {
        ctx.publish_progress(&params.job_id, ProgressStage::Dubbing, 0.0);

        let mut cmd = Command::new(&self.binary);
        cmd.args(votcli_args(params));
        run_tool("vot-cli", cmd).await?;

        if !params.output_path.exists() {
            return Err(WorkerError::permanent(
                codes::EXTRACTION_FAILED,
                "vot-cli reported success but produced no audio file",
            ));
        }
        ctx.publish_progress(&params.job_id, ProgressStage::Dubbing, 100.0);
        Ok(params.output_path.clone())
    }
}

/// ffmpeg invocation.
pub struct Ffmpeg {
    binary: String,
}

impl Ffmpeg {
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new()
    }
}

fn ffmpeg_args(params: &MuxParams, out: &std::path::Path) -> Vec<OsString> {
    match &params.dubbed_audio_path {
        Some(dub) => {
            // Duck the original under the normalized voice-over, keep the
            // original as a second selectable track
            let filter = format!(
                "[0:a]volume={}[orig];[1:a]loudnorm=I={}:TP=-1.5:LRA=11[voice];\
                 [orig][voice]amix=inputs=2:duration=first[mix]",
                params.ducking_level, params.normalization_lufs
            );
            vec![
                "-y".into(),
                "-i".into(),
                params.video_path.clone().into(),
                "-i".into(),
                dub.clone().into(),
                "-filter_complex".into(),
                filter.into(),
                "-map".into(),
                "0:v".into(),
                "-map".into(),
                "[mix]".into(),
                "-map".into(),
                "0:a?".into(),
                "-c:v".into(),
                "copy".into(),
                "-metadata:s:a:0".into(),
                format!("language={}", params.target_lang).into(),
                out.into(),
            ]
        }
        None => vec![
            "-y".into(),
            "-i".into(),
            params.video_path.clone().into(),
            "-c".into(),
            "copy".into(),
            out.into(),
        ],
    }
}

#[async_trait]
impl MixAudio for Ffmpeg {
    async fn mix(&self, params: &MuxParams, ctx: &WorkerContext) -> Result<PathBuf, WorkerError> {
        ctx.publish_progress(&params.job_id, ProgressStage::Mixing, 0.0);

        let out = params.temp_dir.join(format!("mixed.{}", params.container));
        let mut cmd = Command::new(&self.binary);
        cmd.args(ffmpeg_args(params, &out));
        run_tool("ffmpeg", cmd).await?;

        ctx.publish_progress(&params.job_id, ProgressStage::Mixing, 100.0);
        Ok(out)
    }
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;

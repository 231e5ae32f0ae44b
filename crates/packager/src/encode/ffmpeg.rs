//! FFmpeg encoder module for the HLS packager
//!
//! Builds and runs one ffmpeg invocation per ladder profile, producing a VOD
//! media playlist plus MPEG-TS segments.

use super::{EncodeResult, EncodeStatus, Encoder};
use crate::concurrency::ConcurrencyPlan;
use crate::config::Config;
use crate::ladder::ResolutionProfile;
use crate::layout::{playlist_file_name, segment_pattern};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;

/// Lines of encoder stderr kept in failure messages
const STDERR_TAIL_LINES: usize = 5;

/// Error type for a single ffmpeg run
#[derive(Debug, Error)]
pub enum EncodeError {
    /// ffmpeg could not be started
    #[error("failed to spawn encoder: {0}")]
    Spawn(std::io::Error),

    /// ffmpeg exited with non-zero status
    #[error("encoder failed with exit code {code}: {stderr}")]
    ExitCode { code: i32, stderr: String },

    /// ffmpeg was terminated by a signal
    #[error("encoder was terminated by signal: {stderr}")]
    Terminated { stderr: String },

    /// ffmpeg exceeded the per-encode timeout and was killed
    #[error("encoder timed out after {0:?}")]
    TimedOut(Duration),

    /// ffmpeg exited cleanly without writing its playlist
    #[error("encoder exited successfully but playlist {} is missing", .0.display())]
    MissingPlaylist(PathBuf),

    /// IO error while waiting on the process
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encoder settings shared by every profile of a job
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub ffmpeg_path: PathBuf,
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate_kbps: u32,
    pub segment_duration_secs: u32,
    /// Threads per ffmpeg process (0 lets ffmpeg decide)
    pub threads: u32,
    /// Per-profile timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl EncodeSettings {
    /// Derive settings from configuration and the concurrency plan
    pub fn from_config(cfg: &Config, plan: &ConcurrencyPlan) -> Self {
        let timeout = match cfg.packager.encode_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            ffmpeg_path: cfg.encoder.ffmpeg_path.clone(),
            video_codec: cfg.encoder.video_codec.clone(),
            preset: cfg.encoder.preset.clone(),
            crf: cfg.encoder.crf,
            audio_codec: cfg.encoder.audio_codec.clone(),
            audio_bitrate_kbps: cfg.encoder.audio_bitrate_kbps,
            segment_duration_secs: cfg.encoder.segment_duration_secs,
            threads: plan.threads_per_encode,
            timeout,
        }
    }
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            video_codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 128,
            segment_duration_secs: 6,
            threads: 0,
            timeout: Some(Duration::from_secs(3600)),
        }
    }
}

/// Build an ffmpeg command for one ladder profile
///
/// Creates a Command configured with:
/// - Scaling to the profile's width and height
/// - Target video bitrate, capped at the same rate with a 2x buffer
/// - Fixed-rate audio
/// - VOD HLS output: `{name}.m3u8` plus `{name}_NNN.ts` segments
pub fn build_ffmpeg_command(
    settings: &EncodeSettings,
    input_path: &Path,
    output_dir: &Path,
    profile: &ResolutionProfile,
) -> Command {
    let mut cmd = Command::new(&settings.ffmpeg_path);

    cmd.args(["-y", "-hide_banner", "-loglevel", "error"]);
    cmd.arg("-i").arg(input_path);

    // Video
    cmd.arg("-c:v").arg(&settings.video_codec);
    cmd.arg("-preset").arg(&settings.preset);
    cmd.arg("-crf").arg(settings.crf.to_string());
    cmd.arg("-vf").arg(format!("scale={}:{}", profile.width, profile.height));
    cmd.arg("-b:v").arg(format!("{}k", profile.target_bitrate_kbps));
    cmd.arg("-maxrate").arg(format!("{}k", profile.target_bitrate_kbps));
    cmd.arg("-bufsize").arg(format!("{}k", profile.buffer_size_kbps()));

    // Audio
    cmd.arg("-c:a").arg(&settings.audio_codec);
    cmd.arg("-b:a").arg(format!("{}k", settings.audio_bitrate_kbps));

    if settings.threads > 0 {
        cmd.arg("-threads").arg(settings.threads.to_string());
    }

    // HLS muxer
    cmd.arg("-f").arg("hls");
    cmd.arg("-hls_time").arg(settings.segment_duration_secs.to_string());
    cmd.arg("-hls_playlist_type").arg("vod");
    cmd.arg("-hls_segment_filename").arg(output_dir.join(segment_pattern(profile)));
    cmd.arg(output_dir.join(playlist_file_name(profile)));

    cmd
}

/// Runs ffmpeg as a child process per profile
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoder {
    settings: EncodeSettings,
}

impl FfmpegEncoder {
    pub fn new(settings: EncodeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EncodeSettings {
        &self.settings
    }

    /// Execute one encode and wait for it to finish
    ///
    /// # Errors
    /// Returns an error if:
    /// - ffmpeg fails to start
    /// - ffmpeg exits with non-zero status or is killed by a signal
    /// - the timeout expires (the child is killed on drop)
    /// - ffmpeg exits cleanly but its playlist does not exist
    pub async fn run(
        &self,
        input_path: &Path,
        output_dir: &Path,
        profile: &ResolutionProfile,
    ) -> Result<PathBuf, EncodeError> {
        let playlist_path = output_dir.join(playlist_file_name(profile));

        let mut cmd = build_ffmpeg_command(&self.settings, input_path, output_dir, profile);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(EncodeError::Spawn)?;
        let wait = child.wait_with_output();

        let output = match self.settings.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| EncodeError::TimedOut(limit))??,
            None => wait.await?,
        };

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr);
            return Err(match output.status.code() {
                Some(code) => EncodeError::ExitCode { code, stderr },
                None => EncodeError::Terminated { stderr },
            });
        }

        if !tokio::fs::try_exists(&playlist_path).await.unwrap_or(false) {
            return Err(EncodeError::MissingPlaylist(playlist_path));
        }

        Ok(playlist_path)
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        input_path: &Path,
        output_dir: &Path,
        profile: &ResolutionProfile,
    ) -> EncodeResult {
        let started = Instant::now();
        tracing::debug!(profile = %profile.name, input = %input_path.display(), "Starting encode");

        let status = match self.run(input_path, output_dir, profile).await {
            Ok(_) => EncodeStatus::Success,
            Err(e) => EncodeStatus::Failed(e.to_string()),
        };

        EncodeResult {
            profile: profile.clone(),
            status,
            playlist_path: output_dir.join(playlist_file_name(profile)),
            elapsed: started.elapsed(),
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

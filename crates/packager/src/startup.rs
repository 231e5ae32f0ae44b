//! Startup checks module for the HLS packager
//!
//! Provides preflight checks run before packaging or serving:
//! - Ladder validation
//! - FFmpeg availability check

use crate::config::Config;
use crate::ladder::{Ladder, LadderError};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("Invalid ladder: {0}")]
    Ladder(#[from] LadderError),
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 7.1 ..."
/// - N-prefixed: "ffmpeg version n7.1-... ..."
///
/// Git snapshot builds ("ffmpeg version N-113000-g...") carry no release
/// number and yield `None`.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    // Major version is everything before the first '.' or '-'
    let major_str = version_str.split(['.', '-']).next()?;

    major_str.parse().ok()
}

/// Check that the configured ffmpeg binary runs
///
/// Returns the parsed major version, or `None` for builds without one.
pub fn check_ffmpeg_available(ffmpeg_path: &Path) -> Result<Option<u32>, StartupError> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::FfmpegUnavailable(format!(
                "{} -version failed; is ffmpeg installed and in PATH? Error: {}",
                ffmpeg_path.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -version exited with {}",
            ffmpeg_path.display(),
            output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let major = parse_ffmpeg_version(&version_output);
    match major {
        Some(major) => tracing::info!(ffmpeg = %ffmpeg_path.display(), major, "FFmpeg detected"),
        None => tracing::info!(
            ffmpeg = %ffmpeg_path.display(),
            version = version_output.lines().next().unwrap_or("(empty)"),
            "FFmpeg detected, version not parsed"
        ),
    }

    Ok(major)
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. Ladder validation
/// 2. FFmpeg availability
///
/// Returns the validated ladder.
pub fn run_startup_checks(cfg: &Config) -> Result<Ladder, StartupError> {
    let ladder = Ladder::from_config(&cfg.ladder)?;
    check_ffmpeg_available(&cfg.encoder.ffmpeg_path)?;
    Ok(ladder)
}

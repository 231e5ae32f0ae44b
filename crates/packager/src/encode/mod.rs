//! Encoding modules for the HLS packager

pub mod ffmpeg;

use crate::ladder::ResolutionProfile;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use ffmpeg::{build_ffmpeg_command, EncodeError, EncodeSettings, FfmpegEncoder};

/// Outcome of one resolution's encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeStatus {
    Success,
    Failed(String),
}

/// Result of encoding a single ladder profile
#[derive(Debug, Clone)]
pub struct EncodeResult {
    pub profile: ResolutionProfile,
    pub status: EncodeStatus,
    /// Where the profile's media playlist was (or would have been) written
    pub playlist_path: PathBuf,
    pub elapsed: Duration,
}

impl EncodeResult {
    pub fn is_success(&self) -> bool {
        self.status == EncodeStatus::Success
    }

    /// Failure reason, if the encode failed
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            EncodeStatus::Success => None,
            EncodeStatus::Failed(reason) => Some(reason),
        }
    }
}

/// Produces one resolution's segmented playlist from a source video
///
/// Implementations report failure through [`EncodeStatus::Failed`] rather than
/// returning an error, so one bad encode never aborts its siblings.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        input_path: &Path,
        output_dir: &Path,
        profile: &ResolutionProfile,
    ) -> EncodeResult;
}

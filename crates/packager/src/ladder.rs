//! Resolution ladder policy
//!
//! Holds the table of target resolutions and bitrates and derives the
//! per-profile encoder parameters that depend on it.

use crate::config::ProfileConfig;
use crate::layout::MASTER_MANIFEST;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Error type for ladder validation
#[derive(Debug, Error, PartialEq)]
pub enum LadderError {
    #[error("Ladder must contain at least one profile")]
    Empty,

    #[error("Invalid profile name '{0}': use ASCII letters, digits, '-' or '_'")]
    InvalidName(String),

    #[error("Duplicate profile name '{0}'")]
    DuplicateName(String),

    #[error("Profile '{name}' has invalid dimensions {width}x{height}: both must be non-zero and even")]
    InvalidDimensions { name: String, width: u32, height: u32 },

    #[error("Profile '{name}' bitrate {bitrate_kbps}kbps must exceed the previous tier's {previous_kbps}kbps")]
    NonIncreasingBitrate {
        name: String,
        bitrate_kbps: u32,
        previous_kbps: u32,
    },
}

/// A single rung of the ladder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolutionProfile {
    /// Label used for playlist and segment file names (e.g. "720p")
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub target_bitrate_kbps: u32,
}

impl ResolutionProfile {
    pub fn new(name: impl Into<String>, width: u32, height: u32, target_bitrate_kbps: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            target_bitrate_kbps,
        }
    }

    /// Peak bandwidth advertised in the master manifest, in bits per second
    pub fn bandwidth_bps(&self) -> u64 {
        u64::from(self.target_bitrate_kbps) * 1000
    }

    /// Rate-control buffer size: twice the target bitrate
    pub fn buffer_size_kbps(&self) -> u32 {
        self.target_bitrate_kbps.saturating_mul(2)
    }

    /// Pixel resolution as written in manifests, e.g. `1280x720`
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl From<&ProfileConfig> for ResolutionProfile {
    fn from(cfg: &ProfileConfig) -> Self {
        Self::new(cfg.name.clone(), cfg.width, cfg.height, cfg.bitrate_kbps)
    }
}

/// Validated, ordered set of profiles, lowest quality first
///
/// Order is significant: it fixes the emission order of the master manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ladder {
    profiles: Vec<ResolutionProfile>,
}

impl Ladder {
    /// Validate and build a ladder
    pub fn new(profiles: Vec<ResolutionProfile>) -> Result<Self, LadderError> {
        if profiles.is_empty() {
            return Err(LadderError::Empty);
        }

        let mut seen = HashSet::new();
        let mut previous_kbps: Option<u32> = None;

        for profile in &profiles {
            if !is_valid_profile_name(&profile.name) {
                return Err(LadderError::InvalidName(profile.name.clone()));
            }
            if !seen.insert(profile.name.as_str()) {
                return Err(LadderError::DuplicateName(profile.name.clone()));
            }
            // libx264 rejects odd dimensions for 4:2:0 output
            if profile.width == 0
                || profile.height == 0
                || profile.width % 2 != 0
                || profile.height % 2 != 0
            {
                return Err(LadderError::InvalidDimensions {
                    name: profile.name.clone(),
                    width: profile.width,
                    height: profile.height,
                });
            }
            if let Some(prev) = previous_kbps {
                if profile.target_bitrate_kbps <= prev {
                    return Err(LadderError::NonIncreasingBitrate {
                        name: profile.name.clone(),
                        bitrate_kbps: profile.target_bitrate_kbps,
                        previous_kbps: prev,
                    });
                }
            }
            previous_kbps = Some(profile.target_bitrate_kbps);
        }

        Ok(Self { profiles })
    }

    /// Build a ladder from configured profiles, or the reference ladder if none are configured
    pub fn from_config(profiles: &[ProfileConfig]) -> Result<Self, LadderError> {
        if profiles.is_empty() {
            return Ok(reference_ladder());
        }
        Self::new(profiles.iter().map(ResolutionProfile::from).collect())
    }

    pub fn profiles(&self) -> &[ResolutionProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResolutionProfile> {
        self.profiles.iter()
    }
}

impl<'a> IntoIterator for &'a Ladder {
    type Item = &'a ResolutionProfile;
    type IntoIter = std::slice::Iter<'a, ResolutionProfile>;

    fn into_iter(self) -> Self::IntoIter {
        self.profiles.iter()
    }
}

/// The fixed five-rung ladder, 240p to 1080p
pub fn reference_ladder() -> Ladder {
    Ladder {
        profiles: vec![
            ResolutionProfile::new("240p", 426, 240, 400),
            ResolutionProfile::new("360p", 640, 360, 800),
            ResolutionProfile::new("480p", 854, 480, 1200),
            ResolutionProfile::new("720p", 1280, 720, 2500),
            ResolutionProfile::new("1080p", 1920, 1080, 5000),
        ],
    }
}

fn is_valid_profile_name(name: &str) -> bool {
    let stem = MASTER_MANIFEST.trim_end_matches(".m3u8");
    !name.is_empty()
        && name != stem
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

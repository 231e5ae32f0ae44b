//! HLS Packager
//!
//! Turns one source video into an HLS adaptive-bitrate package: one encode per
//! resolution ladder profile, run concurrently, plus a master manifest listing
//! the profiles that succeeded.

pub mod concurrency;
pub mod coordinator;
pub mod daemon;
pub mod encode;
pub mod job;
pub mod ladder;
pub mod layout;
pub mod manifest;
pub mod metrics;
pub mod metrics_server;
pub mod startup;

pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use coordinator::{Packager, PackagingError, PackagingReport, ProfileFailure};
pub use daemon::{Daemon, DaemonError, PackageRequest};
pub use encode::{
    build_ffmpeg_command, EncodeError, EncodeResult, EncodeSettings, EncodeStatus, Encoder,
    FfmpegEncoder,
};
pub use hls_packager_config as config;
pub use hls_packager_config::Config;
pub use job::{JobState, PackagingJob};
pub use ladder::{reference_ladder, Ladder, LadderError, ResolutionProfile};
pub use layout::{prepare_output_directory, LayoutError, MASTER_MANIFEST};
pub use manifest::{render_master_manifest, write_master_manifest, ManifestError};
pub use metrics::{
    collect_system_metrics, new_shared_metrics, JobMetrics, MetricsSnapshot, SharedMetrics,
    SystemMetrics,
};
pub use metrics_server::{create_router, run_server, AppState, ServerError};
pub use startup::{check_ffmpeg_available, parse_ffmpeg_version, run_startup_checks, StartupError};

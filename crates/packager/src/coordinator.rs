//! Job coordinator for the HLS packager
//!
//! Fans out one encode per ladder profile, waits for every one of them, and
//! writes the master manifest for whichever profiles succeeded.

use crate::concurrency::ConcurrencyPlan;
use crate::config::Config;
use crate::encode::{EncodeResult, EncodeSettings, EncodeStatus, Encoder, FfmpegEncoder};
use crate::job::{JobState, PackagingJob};
use crate::ladder::{Ladder, LadderError, ResolutionProfile};
use crate::layout::{
    invalidate_broken_master, playlist_file_name, prepare_output_directory, prune_stale_outputs,
    relative_manifest_path, LayoutError,
};
use crate::manifest::{write_master_manifest, ManifestError};
use crate::metrics::SharedMetrics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;

/// One profile's failure, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFailure {
    pub profile: String,
    pub reason: String,
}

impl std::fmt::Display for ProfileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.profile, self.reason)
    }
}

/// Error type for packaging operations
#[derive(Debug, Error)]
pub enum PackagingError {
    /// Source video does not exist
    #[error("Input file not found: {}", .0.display())]
    InputMissing(PathBuf),

    /// Output directory could not be prepared
    #[error("Output directory error: {0}")]
    Layout(#[from] LayoutError),

    /// Every profile failed to encode
    #[error("All {} profiles failed: {}", .failures.len(), join_failures(.failures))]
    AllFailed { failures: Vec<ProfileFailure> },

    /// Encodes succeeded but the manifest could not be written
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

fn join_failures(failures: &[ProfileFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of a successful (possibly degraded) packaging job
#[derive(Debug, Clone)]
pub struct PackagingReport {
    pub job_id: String,
    /// `{output_name}/master.m3u8`, relative to the output root
    pub manifest_path: String,
    /// Absolute path of the written master manifest
    pub manifest_file: PathBuf,
    /// Profiles referenced by the manifest, in ladder order
    pub succeeded: Vec<ResolutionProfile>,
    /// Profiles left out of the manifest, in ladder order
    pub failures: Vec<ProfileFailure>,
    pub elapsed: Duration,
}

impl PackagingReport {
    /// True if some profiles are missing from the manifest
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Packages source videos into HLS adaptive-bitrate sets
pub struct Packager {
    output_root: PathBuf,
    ladder: Ladder,
    encoder: Arc<dyn Encoder>,
    metrics: SharedMetrics,
}

impl Packager {
    /// Create a packager with an explicit ladder and encoder
    pub fn new(
        output_root: PathBuf,
        ladder: Ladder,
        encoder: Arc<dyn Encoder>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            output_root,
            ladder,
            encoder,
            metrics,
        }
    }

    /// Create an ffmpeg-backed packager from configuration
    ///
    /// Fails if the configured ladder is invalid.
    pub fn from_config(
        cfg: &Config,
        plan: &ConcurrencyPlan,
        metrics: SharedMetrics,
    ) -> Result<Self, LadderError> {
        let ladder = Ladder::from_config(&cfg.ladder)?;
        let encoder = FfmpegEncoder::new(EncodeSettings::from_config(cfg, plan));
        Ok(Self::new(
            cfg.packager.output_root.clone(),
            ladder,
            Arc::new(encoder),
            metrics,
        ))
    }

    pub fn ladder(&self) -> &Ladder {
        &self.ladder
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Package `input_path` under `output_name`
    ///
    /// Returns the master manifest path relative to the output root, e.g.
    /// `movie-42/master.m3u8`. Succeeds as long as one profile encoded.
    pub async fn package(
        &self,
        input_path: &Path,
        output_name: &str,
    ) -> Result<String, PackagingError> {
        self.package_detailed(input_path, output_name)
            .await
            .map(|report| report.manifest_path)
    }

    /// Like [`Packager::package`], returning the full report
    pub async fn package_detailed(
        &self,
        input_path: &Path,
        output_name: &str,
    ) -> Result<PackagingReport, PackagingError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.package_with_id(id, input_path, output_name).await
    }

    /// Run a packaging job under a caller-chosen id
    ///
    /// Dropping the returned future aborts every in-flight encode; their
    /// child processes are killed.
    pub async fn package_with_id(
        &self,
        id: String,
        input_path: &Path,
        output_name: &str,
    ) -> Result<PackagingReport, PackagingError> {
        let started = Instant::now();
        let mut job = PackagingJob::new(
            id,
            input_path.to_path_buf(),
            output_name.to_string(),
            self.ladder.clone(),
        );
        self.publish(&job).await;

        tracing::info!(
            job_id = %job.id,
            input = %input_path.display(),
            output_name,
            profiles = self.ladder.len(),
            "Packaging started"
        );

        let result = self.drive(&mut job, started).await;

        match &result {
            Ok(report) => {
                tracing::info!(
                    job_id = %job.id,
                    manifest = %report.manifest_path,
                    succeeded = report.succeeded.len(),
                    failed = report.failures.len(),
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Packaging completed"
                );
                let mut metrics = self.metrics.write().await;
                metrics.completed_jobs += 1;
                if report.is_degraded() {
                    metrics.degraded_jobs += 1;
                }
                metrics.profiles_encoded += report.succeeded.len() as u64;
                metrics.profiles_failed += report.failures.len() as u64;
            }
            Err(e) => {
                job.fail(e.to_string());
                tracing::error!(job_id = %job.id, error = %e, "Packaging failed");
                let mut metrics = self.metrics.write().await;
                metrics.failed_jobs += 1;
                metrics.profiles_encoded += job.succeeded.len() as u64;
                metrics.profiles_failed += job.failures.len() as u64;
            }
        }

        self.publish(&job).await;
        result
    }

    async fn drive(
        &self,
        job: &mut PackagingJob,
        started: Instant,
    ) -> Result<PackagingReport, PackagingError> {
        // Preparing
        if !tokio::fs::try_exists(&job.input_path).await.unwrap_or(false) {
            return Err(PackagingError::InputMissing(job.input_path.clone()));
        }
        let output_dir = prepare_output_directory(&self.output_root, &job.output_name)?;
        job.output_dir = Some(output_dir.clone());

        job.transition(JobState::Encoding);
        self.publish(job).await;
        let results = self.encode_all(&job.id, &job.input_path, &output_dir).await;

        job.transition(JobState::Aggregating);
        let (succeeded, failed): (Vec<EncodeResult>, Vec<EncodeResult>) =
            results.into_iter().partition(EncodeResult::is_success);

        job.succeeded = succeeded.iter().map(|r| r.profile.name.clone()).collect();
        let failures: Vec<ProfileFailure> = failed
            .iter()
            .map(|r| ProfileFailure {
                profile: r.profile.name.clone(),
                reason: r.failure_reason().unwrap_or_default().to_string(),
            })
            .collect();
        job.failures = failures
            .iter()
            .map(|f| (f.profile.clone(), f.reason.clone()))
            .collect();
        self.publish(job).await;

        if succeeded.is_empty() {
            // Earlier runs may have left a master pointing at playlists this run clobbered
            if let Err(e) = invalidate_broken_master(&output_dir) {
                tracing::warn!(job_id = %job.id, error = %e, "Could not check previous master manifest");
            }
            return Err(PackagingError::AllFailed { failures });
        }

        let kept: Vec<&ResolutionProfile> = succeeded.iter().map(|r| &r.profile).collect();
        let manifest_file = write_master_manifest(&output_dir, &kept)?;

        match prune_stale_outputs(&output_dir, &kept) {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(job_id = %job.id, removed, "Pruned stale package files"),
            Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Failed to prune stale package files"),
        }

        let manifest_path = relative_manifest_path(&job.output_name);
        job.manifest_path = Some(manifest_path.clone());
        job.transition(JobState::Completed {
            degraded: !failures.is_empty(),
        });

        Ok(PackagingReport {
            job_id: job.id.clone(),
            manifest_path,
            manifest_file,
            succeeded: succeeded.into_iter().map(|r| r.profile).collect(),
            failures,
            elapsed: started.elapsed(),
        })
    }

    /// Run every profile's encode concurrently and collect results in ladder order
    async fn encode_all(
        &self,
        job_id: &str,
        input_path: &Path,
        output_dir: &Path,
    ) -> Vec<EncodeResult> {
        let mut set = JoinSet::new();

        for (index, profile) in self.ladder.iter().enumerate() {
            let encoder = Arc::clone(&self.encoder);
            let input = input_path.to_path_buf();
            let dir = output_dir.to_path_buf();
            let profile = profile.clone();
            set.spawn(async move { (index, encoder.encode(&input, &dir, &profile).await) });
        }

        let mut slots: Vec<Option<EncodeResult>> = vec![None; self.ladder.len()];

        // Fan-in: no early exit, partial success is kept
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    match &result.status {
                        EncodeStatus::Success => tracing::info!(
                            job_id,
                            profile = %result.profile.name,
                            elapsed_ms = result.elapsed.as_millis() as u64,
                            "Profile encoded"
                        ),
                        EncodeStatus::Failed(reason) => tracing::warn!(
                            job_id,
                            profile = %result.profile.name,
                            error = %reason,
                            "Profile encode failed"
                        ),
                    }
                    slots[index] = Some(result);
                }
                Err(e) => {
                    tracing::error!(job_id, error = %e, "Encode task did not complete");
                }
            }
        }

        slots
            .into_iter()
            .zip(self.ladder.iter())
            .map(|(slot, profile)| {
                slot.unwrap_or_else(|| EncodeResult {
                    profile: profile.clone(),
                    status: EncodeStatus::Failed("encode task panicked".to_string()),
                    playlist_path: output_dir.join(playlist_file_name(profile)),
                    elapsed: Duration::ZERO,
                })
            })
            .collect()
    }

    async fn publish(&self, job: &PackagingJob) {
        self.metrics.write().await.upsert_job(job.to_metrics());
    }
}

//! Packaging job descriptor and its state machine.
//!
//! A job lives only for the duration of one `package` call; it is never
//! persisted.

use crate::ladder::Ladder;
use crate::metrics::JobMetrics;
use std::path::PathBuf;

/// Stage of a packaging job.
///
/// `Preparing -> Encoding -> Aggregating -> {Completed | Failed}`. Any
/// non-terminal state may also jump straight to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Output directory is being prepared.
    Preparing,
    /// Per-profile encodes are running.
    Encoding,
    /// Results are being partitioned and the manifest written.
    Aggregating,
    /// Manifest written; `degraded` if some profiles failed.
    Completed { degraded: bool },
    /// Job failed with a reason.
    Failed(String),
}

impl JobState {
    /// Convert state to string for metrics
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Preparing => "preparing",
            JobState::Encoding => "encoding",
            JobState::Aggregating => "aggregating",
            JobState::Completed { .. } => "completed",
            JobState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed(_))
    }

    /// Whether the machine allows moving from `self` to `next`.
    fn permits(&self, next: &JobState) -> bool {
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, JobState::Failed(_)) => true,
            (JobState::Preparing, JobState::Encoding)
            | (JobState::Encoding, JobState::Aggregating)
            | (JobState::Aggregating, JobState::Completed { .. }) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory descriptor for one packaging request.
#[derive(Debug, Clone)]
pub struct PackagingJob {
    pub id: String,
    pub input_path: PathBuf,
    pub output_name: String,
    /// Resolved once the output directory has been prepared.
    pub output_dir: Option<PathBuf>,
    pub ladder: Ladder,
    state: JobState,
    /// Names of profiles that encoded successfully, in ladder order.
    pub succeeded: Vec<String>,
    /// `(profile, reason)` for each failed profile, in ladder order.
    pub failures: Vec<(String, String)>,
    pub manifest_path: Option<String>,
}

impl PackagingJob {
    pub fn new(id: String, input_path: PathBuf, output_name: String, ladder: Ladder) -> Self {
        Self {
            id,
            input_path,
            output_name,
            output_dir: None,
            ladder,
            state: JobState::Preparing,
            succeeded: Vec::new(),
            failures: Vec::new(),
            manifest_path: None,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Move to `next` if the transition is legal.
    ///
    /// Returns `false` and leaves the state untouched otherwise; terminal
    /// states never change.
    pub fn transition(&mut self, next: JobState) -> bool {
        if self.state.permits(&next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// Mark the job as failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        self.transition(JobState::Failed(reason.into()))
    }

    /// Create JobMetrics from current job state
    pub fn to_metrics(&self) -> JobMetrics {
        JobMetrics {
            id: self.id.clone(),
            input_path: self.input_path.to_string_lossy().to_string(),
            output_name: self.output_name.clone(),
            stage: self.state.as_str().to_string(),
            profiles_total: self.ladder.len(),
            profiles_succeeded: self.succeeded.len(),
            failed_profiles: self.failures.iter().map(|(name, _)| name.clone()).collect(),
            manifest_path: self.manifest_path.clone(),
            error: match &self.state {
                JobState::Failed(reason) => Some(reason.clone()),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::reference_ladder;

    fn create_test_job(id: &str) -> PackagingJob {
        PackagingJob::new(
            id.to_string(),
            PathBuf::from("/tmp/input.mp4"),
            "movie".to_string(),
            reference_ladder(),
        )
    }

    #[test]
    fn test_job_state_as_str() {
        assert_eq!(JobState::Preparing.as_str(), "preparing");
        assert_eq!(JobState::Encoding.as_str(), "encoding");
        assert_eq!(JobState::Aggregating.as_str(), "aggregating");
        assert_eq!(JobState::Completed { degraded: true }.as_str(), "completed");
        assert_eq!(JobState::Failed("error".to_string()).as_str(), "failed");
    }

    #[test]
    fn test_job_creation() {
        let job = create_test_job("job-001");

        assert_eq!(job.id, "job-001");
        assert_eq!(job.state(), &JobState::Preparing);
        assert!(job.output_dir.is_none());
        assert!(job.succeeded.is_empty());
        assert!(job.failures.is_empty());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = create_test_job("job-002");

        assert!(job.transition(JobState::Encoding));
        assert!(job.transition(JobState::Aggregating));
        assert!(job.transition(JobState::Completed { degraded: false }));
        assert!(job.state().is_terminal());
    }

    #[test]
    fn test_illegal_transitions_are_refused() {
        let mut job = create_test_job("job-003");

        assert!(!job.transition(JobState::Aggregating));
        assert!(!job.transition(JobState::Completed { degraded: false }));
        assert_eq!(job.state(), &JobState::Preparing);

        assert!(job.transition(JobState::Encoding));
        assert!(!job.transition(JobState::Preparing));
        assert_eq!(job.state(), &JobState::Encoding);
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let mut job = create_test_job("job-004");
        assert!(job.fail("disk full"));

        assert!(!job.fail("second failure"));
        assert!(!job.transition(JobState::Encoding));
        assert_eq!(job.state(), &JobState::Failed("disk full".to_string()));

        let mut done = create_test_job("job-005");
        done.transition(JobState::Encoding);
        done.transition(JobState::Aggregating);
        done.transition(JobState::Completed { degraded: true });
        assert!(!done.fail("late failure"));
    }

    #[test]
    fn test_job_to_metrics() {
        let mut job = create_test_job("job-006");
        job.transition(JobState::Encoding);
        job.succeeded = vec!["240p".to_string(), "360p".to_string()];
        job.failures = vec![("1080p".to_string(), "exit code 1".to_string())];

        let metrics = job.to_metrics();

        assert_eq!(metrics.id, "job-006");
        assert_eq!(metrics.stage, "encoding");
        assert_eq!(metrics.output_name, "movie");
        assert_eq!(metrics.profiles_total, 5);
        assert_eq!(metrics.profiles_succeeded, 2);
        assert_eq!(metrics.failed_profiles, vec!["1080p".to_string()]);
        assert_eq!(metrics.error, None);
    }

    #[test]
    fn test_failed_job_metrics_carry_reason() {
        let mut job = create_test_job("job-007");
        job.fail("input missing");

        let metrics = job.to_metrics();
        assert_eq!(metrics.stage, "failed");
        assert_eq!(metrics.error.as_deref(), Some("input missing"));
    }
}

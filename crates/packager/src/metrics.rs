//! Metrics module for the HLS packager
//!
//! Provides structs for job metrics, system metrics, and metrics snapshots
//! with JSON serialization support.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-job metrics tracking packaging progress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetrics {
    pub id: String,
    pub input_path: String,
    pub output_name: String,
    pub stage: String,
    pub profiles_total: usize,
    pub profiles_succeeded: usize,
    pub failed_profiles: Vec<String>,
    /// Relative master manifest path once written
    pub manifest_path: Option<String>,
    pub error: Option<String>,
}

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Complete metrics snapshot including jobs, system, and aggregate stats
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub jobs: Vec<JobMetrics>,
    pub system: SystemMetrics,
    pub queue_len: usize,
    pub running_jobs: usize,
    /// Jobs that produced a manifest, including degraded ones
    pub completed_jobs: u64,
    /// Completed jobs where at least one profile failed
    pub degraded_jobs: u64,
    pub failed_jobs: u64,
    pub profiles_encoded: u64,
    pub profiles_failed: u64,
}

/// Shared metrics state for concurrent access across packager components
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

/// Maximum number of finished jobs kept in the snapshot
pub const MAX_RETAINED_JOBS: usize = 200;

impl MetricsSnapshot {
    /// Insert or replace a job's metrics and recount running jobs
    pub fn upsert_job(&mut self, job: JobMetrics) {
        if let Some(existing) = self.jobs.iter_mut().find(|j| j.id == job.id) {
            *existing = job;
        } else {
            self.jobs.push(job);
        }

        // Drop the oldest finished jobs once over the cap
        while self.jobs.len() > MAX_RETAINED_JOBS {
            match self.jobs.iter().position(|j| is_finished_stage(&j.stage)) {
                Some(idx) => {
                    self.jobs.remove(idx);
                }
                None => break,
            }
        }

        self.running_jobs = self
            .jobs
            .iter()
            .filter(|j| !is_finished_stage(&j.stage))
            .count();
    }
}

fn is_finished_stage(stage: &str) -> bool {
    stage == "completed" || stage == "failed"
}

/// Creates a new SharedMetrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot::default()))
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let total_memory = sys.total_memory();
    let mem_usage = if total_memory > 0 {
        (sys.used_memory() as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: sys.global_cpu_usage(),
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}

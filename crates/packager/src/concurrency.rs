//! Concurrency planning module for the HLS packager
//!
//! Every packaging job runs one encoder per ladder profile at once, so the
//! thread budget is split across the ladder rather than across jobs.

use crate::config::Config;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Target number of threads to use based on utilization
    pub target_threads: u32,
    /// Encoder threads given to each per-profile ffmpeg process
    pub threads_per_encode: u32,
    /// Maximum number of packaging jobs in flight in service mode
    pub max_concurrent_jobs: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus if not specified in config
    /// - Clamps target_cpu_utilization to [0.5, 1.0]
    /// - threads_per_encode: target_threads split evenly across the ladder, at least 1 (unless explicit)
    /// - max_concurrent_jobs: 2 when there are 4+ threads per profile, 1 otherwise (unless explicit)
    pub fn derive(cfg: &Config, ladder_len: usize) -> Self {
        let total_cores = cfg
            .cpu
            .logical_cores
            .unwrap_or_else(|| num_cpus::get() as u32);

        let clamped_utilization = clamp_utilization(cfg.cpu.target_cpu_utilization);
        let target_threads = ((total_cores as f32) * clamped_utilization).round() as u32;

        let ladder_len = ladder_len.max(1) as u32;

        let threads_per_encode = if cfg.encoder.threads_per_encode > 0 {
            cfg.encoder.threads_per_encode
        } else {
            derive_threads_per_encode(target_threads, ladder_len)
        };

        let max_concurrent_jobs = if cfg.server.max_concurrent_jobs > 0 {
            cfg.server.max_concurrent_jobs
        } else {
            derive_max_jobs(target_threads, ladder_len)
        };

        Self {
            total_cores,
            target_threads,
            threads_per_encode,
            max_concurrent_jobs,
        }
    }
}

fn derive_threads_per_encode(target_threads: u32, ladder_len: u32) -> u32 {
    (target_threads / ladder_len).max(1)
}

fn derive_max_jobs(target_threads: u32, ladder_len: u32) -> u32 {
    if target_threads >= ladder_len * 4 {
        2
    } else {
        1
    }
}

/// Clamp utilization to valid range [0.5, 1.0]
fn clamp_utilization(util: f32) -> f32 {
    util.clamp(0.5, 1.0)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config, ladder_len: usize) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg, ladder_len)
}

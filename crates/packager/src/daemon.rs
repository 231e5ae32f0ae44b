//! Service mode for the HLS packager
//!
//! Provides the service entry point, startup sequence, and the loop that
//! drains the job queue.

use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::{Config, ConfigError};
use crate::coordinator::Packager;
use crate::ladder::LadderError;
use crate::metrics::{collect_system_metrics, new_shared_metrics, SharedMetrics};
use crate::metrics_server::{bind_listener, serve, AppState, ServerError};
use crate::startup::{run_startup_checks, StartupError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify, RwLock, Semaphore};
use tokio::task::JoinHandle;

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Configured ladder is invalid
    #[error("Invalid ladder: {0}")]
    Ladder(#[from] LadderError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// The job queue no longer accepts requests
    #[error("Job queue closed")]
    QueueClosed,
}

/// A queued packaging request
#[derive(Debug, Clone, PartialEq)]
pub struct PackageRequest {
    pub id: String,
    pub input_path: PathBuf,
    pub output_name: String,
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Derived concurrency plan
    pub concurrency_plan: ConcurrencyPlan,
    /// Shared metrics state
    pub metrics: SharedMetrics,
    pub packager: Arc<Packager>,
    job_tx: mpsc::Sender<PackageRequest>,
    job_rx: Arc<RwLock<mpsc::Receiver<PackageRequest>>>,
    /// Bounds whole packaging jobs in flight
    job_permits: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// This performs the full startup sequence:
    /// 1. Load config from file
    /// 2. Apply environment overrides
    /// 3. Run startup checks (ladder, ffmpeg)
    /// 4. Derive concurrency plan
    /// 5. Initialize shared metrics and the packager
    pub async fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config)
    }

    /// Initialize the daemon with an existing configuration
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config)?;
        Self::new_without_checks(config)
    }

    /// Initialize the daemon without probing ffmpeg
    ///
    /// The ladder is still validated.
    pub fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        let metrics = new_shared_metrics();
        let ladder_len = if config.ladder.is_empty() {
            crate::ladder::reference_ladder().len()
        } else {
            config.ladder.len()
        };
        let concurrency_plan = derive_plan(&config, ladder_len);
        let packager = Packager::from_config(&config, &concurrency_plan, metrics.clone())?;
        Ok(Self::assemble(config, concurrency_plan, packager, metrics))
    }

    /// Assemble a daemon around an existing packager
    ///
    /// `metrics` must be the handle the packager publishes into.
    pub fn assemble(
        config: Config,
        concurrency_plan: ConcurrencyPlan,
        packager: Packager,
        metrics: SharedMetrics,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.server.queue_capacity.max(1));
        let job_permits = Arc::new(Semaphore::new(
            concurrency_plan.max_concurrent_jobs.max(1) as usize,
        ));

        tracing::info!(
            threads_per_encode = concurrency_plan.threads_per_encode,
            max_concurrent_jobs = concurrency_plan.max_concurrent_jobs,
            profiles = packager.ladder().len(),
            "Daemon initialized"
        );

        Self {
            config,
            concurrency_plan,
            metrics,
            packager: Arc::new(packager),
            job_tx,
            job_rx: Arc::new(RwLock::new(job_rx)),
            job_permits,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Queue a packaging job and return its id
    pub async fn submit(
        &self,
        input_path: PathBuf,
        output_name: String,
    ) -> Result<String, DaemonError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.metrics.write().await.queue_len += 1;

        let request = PackageRequest {
            id: id.clone(),
            input_path,
            output_name,
        };
        if self.job_tx.send(request).await.is_err() {
            let mut metrics = self.metrics.write().await;
            metrics.queue_len = metrics.queue_len.saturating_sub(1);
            return Err(DaemonError::QueueClosed);
        }
        Ok(id)
    }

    /// Get a clone of the job sender for external job submission
    pub fn job_sender(&self) -> mpsc::Sender<PackageRequest> {
        self.job_tx.clone()
    }

    /// Get the shared metrics
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Router state wired to this daemon's queue and metrics
    pub fn app_state(&self) -> AppState {
        AppState {
            metrics: self.metrics.clone(),
            jobs: self.job_tx.clone(),
        }
    }

    /// Bind the configured address and serve HTTP in a background task
    ///
    /// Bind failures are returned here rather than from the task.
    pub async fn start_server(&self) -> Result<JoinHandle<Result<(), ServerError>>, ServerError> {
        let listener = bind_listener(&self.config.server.bind_addr).await?;
        let state = self.app_state();
        Ok(tokio::spawn(async move { serve(listener, state).await }))
    }

    /// Start the metrics update task
    ///
    /// Periodically updates system metrics in the shared state.
    pub fn start_metrics_updater(&self) -> JoinHandle<()> {
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            loop {
                let system_metrics = collect_system_metrics();
                {
                    let mut snapshot = metrics.write().await;
                    snapshot.system = system_metrics;
                    snapshot.timestamp_unix_ms = timestamp_ms();
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
    }

    /// Stop accepting jobs
    ///
    /// Already queued jobs still run; [`Daemon::run`] returns once they and
    /// every in-flight job have finished. Later submissions fail with
    /// [`DaemonError::QueueClosed`] or a 503.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the daemon main loop
    ///
    /// Takes requests off the queue and packages each one in its own task,
    /// with at most `max_concurrent_jobs` in flight. Returns after
    /// [`Daemon::shutdown`] once the queue is drained and every started job
    /// has finished.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let mut rx = self.job_rx.write().await;

        loop {
            let request = tokio::select! {
                request = rx.recv() => request,
                _ = self.shutdown.notified() => {
                    tracing::info!("Shutdown requested, draining job queue");
                    rx.close();
                    continue;
                }
            };

            let Some(request) = request else {
                break;
            };

            {
                let mut metrics = self.metrics.write().await;
                metrics.queue_len = metrics.queue_len.saturating_sub(1);
            }

            let permit = match self.job_permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let packager = self.packager.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let PackageRequest {
                    id,
                    input_path,
                    output_name,
                } = request;
                // Outcome is logged and published to metrics by the packager
                let _ = packager
                    .package_with_id(id, &input_path, &output_name)
                    .await;
            });
        }

        // Wait for in-flight jobs
        let total = self.concurrency_plan.max_concurrent_jobs.max(1);
        let _ = self.job_permits.acquire_many(total).await;
        Ok(())
    }

    /// Run the daemon with all background tasks
    ///
    /// Starts the HTTP server, metrics updater, and main processing loop.
    /// Fails immediately if the server cannot bind, and returns the server's
    /// error if it stops while jobs are being processed.
    pub async fn run_with_server(&self) -> Result<(), DaemonError> {
        let mut server = self.start_server().await?;
        let updater = self.start_metrics_updater();

        let result = tokio::select! {
            result = self.run() => result,
            joined = &mut server => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(ServerError::from(e).into()),
            },
        };

        if let Err(e) = &result {
            tracing::error!(error = %e, "Daemon stopped");
        }
        server.abort();
        updater.abort();
        result
    }
}

/// Get current timestamp in milliseconds
fn timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CpuConfig;
    use crate::encode::{EncodeResult, EncodeStatus, Encoder};
    use crate::ladder::{Ladder, ResolutionProfile};
    use crate::layout::playlist_file_name;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Writes a one-segment playlist and tracks peak concurrency
    #[derive(Default)]
    struct CountingEncoder {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Encoder for CountingEncoder {
        async fn encode(
            &self,
            _input_path: &Path,
            output_dir: &Path,
            profile: &ResolutionProfile,
        ) -> EncodeResult {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;

            let playlist_path = output_dir.join(playlist_file_name(profile));
            std::fs::write(
                &playlist_path,
                format!("#EXTM3U\n#EXTINF:6.0,\n{}_000.ts\n#EXT-X-ENDLIST\n", profile.name),
            )
            .unwrap();
            self.active.fetch_sub(1, Ordering::SeqCst);

            EncodeResult {
                profile: profile.clone(),
                status: EncodeStatus::Success,
                playlist_path,
                elapsed: Duration::from_millis(50),
            }
        }
    }

    fn create_test_config(root: &Path) -> Config {
        let mut config = Config {
            cpu: CpuConfig {
                logical_cores: Some(32),
                target_cpu_utilization: 0.85,
            },
            ..Config::default()
        };
        config.packager.output_root = root.to_path_buf();
        config
    }

    fn test_daemon(temp: &TempDir, max_jobs: u32) -> (Daemon, Arc<CountingEncoder>) {
        let mut config = create_test_config(&temp.path().join("hls"));
        config.server.max_concurrent_jobs = max_jobs;

        let encoder = Arc::new(CountingEncoder::default());
        let metrics = new_shared_metrics();
        let ladder = Ladder::new(vec![ResolutionProfile::new("360p", 640, 360, 800)]).unwrap();
        let packager = Packager::new(
            config.packager.output_root.clone(),
            ladder,
            encoder.clone(),
            metrics.clone(),
        );
        let plan = derive_plan(&config, 1);
        (Daemon::assemble(config, plan, packager, metrics), encoder)
    }

    async fn wait_for_finished(metrics: &SharedMetrics, jobs: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let m = metrics.read().await;
                    if m.completed_jobs + m.failed_jobs >= jobs {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("jobs did not finish in time");
    }

    #[test]
    fn test_daemon_initialization_without_checks() {
        let temp = TempDir::new().unwrap();
        let config = create_test_config(temp.path());
        let daemon = Daemon::new_without_checks(config.clone()).unwrap();

        assert_eq!(daemon.config, config);
        // 32 cores * 0.85 = 27 threads over 5 profiles
        assert_eq!(daemon.concurrency_plan.threads_per_encode, 5);
        assert_eq!(daemon.concurrency_plan.max_concurrent_jobs, 2);
        assert_eq!(daemon.packager.ladder().len(), 5);
    }

    #[test]
    fn test_daemon_rejects_invalid_ladder() {
        let temp = TempDir::new().unwrap();
        let mut config = create_test_config(temp.path());
        config.ladder = vec![crate::config::ProfileConfig {
            name: "odd".to_string(),
            width: 641,
            height: 360,
            bitrate_kbps: 800,
        }];

        let result = Daemon::new_without_checks(config);
        assert!(matches!(
            result,
            Err(DaemonError::Ladder(LadderError::InvalidDimensions { .. }))
        ));
    }

    #[tokio::test]
    async fn test_daemon_metrics_initialized() {
        let temp = TempDir::new().unwrap();
        let (daemon, _) = test_daemon(&temp, 1);

        let metrics = daemon.metrics.read().await;
        assert_eq!(metrics.jobs.len(), 0);
        assert_eq!(metrics.running_jobs, 0);
        assert_eq!(metrics.completed_jobs, 0);
        assert_eq!(metrics.failed_jobs, 0);
    }

    #[tokio::test]
    async fn test_submitted_jobs_are_packaged() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.mp4");
        std::fs::write(&input, b"video").unwrap();
        let (daemon, _) = test_daemon(&temp, 1);
        let daemon = Arc::new(daemon);

        let id = daemon.submit(input.clone(), "first".to_string()).await.unwrap();
        daemon
            .submit(temp.path().join("missing.mp4"), "second".to_string())
            .await
            .unwrap();
        assert_eq!(daemon.metrics.read().await.queue_len, 2);

        let runner = daemon.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        wait_for_finished(&daemon.metrics, 2).await;
        handle.abort();

        let metrics = daemon.metrics.read().await;
        assert_eq!(metrics.queue_len, 0);
        assert_eq!(metrics.completed_jobs, 1);
        assert_eq!(metrics.failed_jobs, 1);
        let first = metrics.jobs.iter().find(|j| j.id == id).unwrap();
        assert_eq!(first.manifest_path.as_deref(), Some("first/master.m3u8"));
        assert!(temp.path().join("hls/first/master.m3u8").is_file());
    }

    #[tokio::test]
    async fn test_max_concurrent_jobs_is_respected() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.mp4");
        std::fs::write(&input, b"video").unwrap();
        let (daemon, encoder) = test_daemon(&temp, 1);
        let daemon = Arc::new(daemon);

        for name in ["a", "b", "c"] {
            daemon.submit(input.clone(), name.to_string()).await.unwrap();
        }

        let runner = daemon.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        wait_for_finished(&daemon.metrics, 3).await;
        handle.abort();

        // Single-profile ladder, one job at a time
        assert_eq!(encoder.peak.load(Ordering::SeqCst), 1);
        assert_eq!(daemon.metrics.read().await.completed_jobs, 3);
    }

    #[tokio::test]
    async fn test_parallel_jobs_overlap() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.mp4");
        std::fs::write(&input, b"video").unwrap();
        let (daemon, encoder) = test_daemon(&temp, 3);
        let daemon = Arc::new(daemon);

        for name in ["a", "b", "c"] {
            daemon.submit(input.clone(), name.to_string()).await.unwrap();
        }

        let runner = daemon.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        wait_for_finished(&daemon.metrics, 3).await;
        handle.abort();

        assert!(encoder.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_then_returns() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.mp4");
        std::fs::write(&input, b"video").unwrap();
        let (daemon, _) = test_daemon(&temp, 1);
        let daemon = Arc::new(daemon);

        for name in ["a", "b"] {
            daemon.submit(input.clone(), name.to_string()).await.unwrap();
        }
        daemon.shutdown();

        let runner = daemon.clone();
        let outcome = tokio::time::timeout(Duration::from_secs(5), runner.run())
            .await
            .expect("run did not return after shutdown");

        assert!(outcome.is_ok());
        let metrics = daemon.metrics.read().await;
        assert_eq!(metrics.completed_jobs, 2);
        assert_eq!(metrics.running_jobs, 0);
        drop(metrics);

        let late = daemon.submit(input, "late".to_string()).await;
        assert!(matches!(late, Err(DaemonError::QueueClosed)));
        assert_eq!(daemon.metrics.read().await.queue_len, 0);
    }

    #[tokio::test]
    async fn test_run_with_server_fails_when_port_taken() {
        let temp = TempDir::new().unwrap();
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let (mut daemon, _) = test_daemon(&temp, 1);
        daemon.config.server.bind_addr = occupied.local_addr().unwrap().to_string();

        let outcome = tokio::time::timeout(Duration::from_secs(2), daemon.run_with_server())
            .await
            .expect("run_with_server kept running without a listener");

        assert!(matches!(
            outcome,
            Err(DaemonError::Server(ServerError::BindError { .. }))
        ));
    }

    #[test]
    fn test_timestamp_ms() {
        let ts = timestamp_ms();
        // Should be a reasonable timestamp (after year 2020)
        assert!(ts > 1577836800000);
    }
}

//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Packaging output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackagerConfig {
    /// Root directory under which every `{output_name}/` package is written
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Per-resolution encode timeout in seconds (0 disables the timeout)
    #[serde(default = "default_encode_timeout_secs")]
    pub encode_timeout_secs: u64,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("uploads/hls")
}

fn default_encode_timeout_secs() -> u64 {
    3600
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            encode_timeout_secs: default_encode_timeout_secs(),
        }
    }
}

/// Settings passed through to the external encoder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u8,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate_kbps")]
    pub audio_bitrate_kbps: u32,
    /// Target HLS segment duration in seconds
    #[serde(default = "default_segment_duration_secs")]
    pub segment_duration_secs: u32,
    /// Encoder threads per resolution (0 = auto-derive)
    #[serde(default)]
    pub threads_per_encode: u32,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "fast".to_string()
}

fn default_crf() -> u8 {
    23
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate_kbps() -> u32 {
    128
}

fn default_segment_duration_secs() -> u32 {
    6
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_codec: default_audio_codec(),
            audio_bitrate_kbps: default_audio_bitrate_kbps(),
            segment_duration_secs: default_segment_duration_secs(),
            threads_per_encode: 0,
        }
    }
}

/// CPU-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpuConfig {
    /// Number of logical cores (auto-detected if None)
    pub logical_cores: Option<u32>,
    /// Target CPU utilization (0.5-1.0, default 0.85)
    #[serde(default = "default_target_cpu_utilization")]
    pub target_cpu_utilization: f32,
}

fn default_target_cpu_utilization() -> f32 {
    0.85
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            logical_cores: None,
            target_cpu_utilization: default_target_cpu_utilization(),
        }
    }
}

/// HTTP service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Maximum packaging jobs in flight (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_jobs: u32,
    /// Capacity of the pending job queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_queue_capacity() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_concurrent_jobs: 0,
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// One rung of a custom resolution ladder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub packager: PackagerConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub cpu: CpuConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Replaces the reference ladder when non-empty
    #[serde(default)]
    pub ladder: Vec<ProfileConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - HLS_OUTPUT_ROOT -> packager.output_root
    /// - HLS_ENCODE_TIMEOUT_SECS -> packager.encode_timeout_secs
    /// - HLS_FFMPEG_PATH -> encoder.ffmpeg_path
    /// - HLS_SEGMENT_DURATION_SECS -> encoder.segment_duration_secs
    /// - HLS_THREADS_PER_ENCODE -> encoder.threads_per_encode
    /// - HLS_MAX_CONCURRENT_JOBS -> server.max_concurrent_jobs
    /// - HLS_BIND_ADDR -> server.bind_addr
    /// - CPU_LOGICAL_CORES -> cpu.logical_cores
    /// - CPU_TARGET_UTILIZATION -> cpu.target_cpu_utilization
    ///
    /// Values that fail to parse leave the existing setting untouched.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("HLS_OUTPUT_ROOT") {
            if !val.trim().is_empty() {
                self.packager.output_root = PathBuf::from(val);
            }
        }

        if let Some(secs) = parse_env::<u64>("HLS_ENCODE_TIMEOUT_SECS") {
            self.packager.encode_timeout_secs = secs;
        }

        if let Ok(val) = env::var("HLS_FFMPEG_PATH") {
            if !val.trim().is_empty() {
                self.encoder.ffmpeg_path = PathBuf::from(val);
            }
        }

        // Zero-length segments make no sense; keep the current value
        if let Some(secs) = parse_env::<u32>("HLS_SEGMENT_DURATION_SECS") {
            if secs > 0 {
                self.encoder.segment_duration_secs = secs;
            }
        }

        if let Some(threads) = parse_env::<u32>("HLS_THREADS_PER_ENCODE") {
            self.encoder.threads_per_encode = threads;
        }

        if let Some(jobs) = parse_env::<u32>("HLS_MAX_CONCURRENT_JOBS") {
            self.server.max_concurrent_jobs = jobs;
        }

        if let Ok(val) = env::var("HLS_BIND_ADDR") {
            if !val.trim().is_empty() {
                self.server.bind_addr = val;
            }
        }

        if let Some(cores) = parse_env::<u32>("CPU_LOGICAL_CORES") {
            self.cpu.logical_cores = Some(cores);
        }

        if let Some(util) = parse_env::<f32>("CPU_TARGET_UTILIZATION") {
            self.cpu.target_cpu_utilization = util;
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    ///
    /// Parse errors and other IO errors are still reported.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Config::default()
            }
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Env var tests share process state
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        for key in [
            "HLS_OUTPUT_ROOT",
            "HLS_ENCODE_TIMEOUT_SECS",
            "HLS_FFMPEG_PATH",
            "HLS_SEGMENT_DURATION_SECS",
            "HLS_THREADS_PER_ENCODE",
            "HLS_MAX_CONCURRENT_JOBS",
            "HLS_BIND_ADDR",
            "CPU_LOGICAL_CORES",
            "CPU_TARGET_UTILIZATION",
        ] {
            env::remove_var(key);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            timeout in 0u64..100_000,
            crf in 0u8..52,
            audio_kbps in 32u32..512,
            segment in 1u32..30,
            threads in 0u32..64,
            logical_cores in proptest::option::of(1u32..256),
            target_util in 0.0f32..2.0,
            max_jobs in 0u32..16,
        ) {
            let toml_str = format!(
                r#"
[packager]
output_root = "/srv/hls"
encode_timeout_secs = {}

[encoder]
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
crf = {}
audio_bitrate_kbps = {}
segment_duration_secs = {}
threads_per_encode = {}

[cpu]
{}
target_cpu_utilization = {}

[server]
max_concurrent_jobs = {}
"#,
                timeout,
                crf,
                audio_kbps,
                segment,
                threads,
                logical_cores.map(|c| format!("logical_cores = {}", c)).unwrap_or_default(),
                target_util,
                max_jobs,
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(&config.packager.output_root, &PathBuf::from("/srv/hls"));
            prop_assert_eq!(config.packager.encode_timeout_secs, timeout);
            prop_assert_eq!(&config.encoder.ffmpeg_path, &PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
            prop_assert_eq!(config.encoder.crf, crf);
            prop_assert_eq!(config.encoder.audio_bitrate_kbps, audio_kbps);
            prop_assert_eq!(config.encoder.segment_duration_secs, segment);
            prop_assert_eq!(config.encoder.threads_per_encode, threads);
            prop_assert_eq!(config.cpu.logical_cores, logical_cores);
            prop_assert!((config.cpu.target_cpu_utilization - target_util).abs() < 0.0001);
            prop_assert_eq!(config.server.max_concurrent_jobs, max_jobs);
            prop_assert!(config.ladder.is_empty());
        }

        #[test]
        fn prop_env_overrides_encode_timeout(
            initial in 0u64..10_000,
            override_secs in 0u64..10_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[packager]\nencode_timeout_secs = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("HLS_ENCODE_TIMEOUT_SECS", override_secs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.packager.encode_timeout_secs, override_secs);
        }

        #[test]
        fn prop_env_overrides_cpu_logical_cores(
            initial_cores in proptest::option::of(1u32..128),
            override_cores in 1u32..256,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                "[cpu]\n{}\n",
                initial_cores.map(|c| format!("logical_cores = {}", c)).unwrap_or_default()
            );
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("CPU_LOGICAL_CORES", override_cores.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.cpu.logical_cores, Some(override_cores));
        }

        #[test]
        fn prop_env_overrides_max_concurrent_jobs(
            initial_jobs in 0u32..8,
            override_jobs in 0u32..16,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[server]\nmax_concurrent_jobs = {}\n", initial_jobs);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("HLS_MAX_CONCURRENT_JOBS", override_jobs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.server.max_concurrent_jobs, override_jobs);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.packager.output_root, PathBuf::from("uploads/hls"));
        assert_eq!(config.packager.encode_timeout_secs, 3600);
        assert_eq!(config.encoder.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.encoder.video_codec, "libx264");
        assert_eq!(config.encoder.preset, "fast");
        assert_eq!(config.encoder.crf, 23);
        assert_eq!(config.encoder.audio_codec, "aac");
        assert_eq!(config.encoder.audio_bitrate_kbps, 128);
        assert_eq!(config.encoder.segment_duration_secs, 6);
        assert_eq!(config.encoder.threads_per_encode, 0);
        assert_eq!(config.cpu.logical_cores, None);
        assert!((config.cpu.target_cpu_utilization - 0.85).abs() < 0.0001);
        assert_eq!(config.server.bind_addr, "127.0.0.1:7878");
        assert_eq!(config.server.queue_capacity, 100);
        assert!(config.ladder.is_empty());
    }

    #[test]
    fn test_custom_ladder_parses_in_order() {
        let toml_str = r#"
[[ladder]]
name = "360p"
width = 640
height = 360
bitrate_kbps = 800

[[ladder]]
name = "720p"
width = 1280
height = 720
bitrate_kbps = 2500
"#;
        let config = Config::parse_toml(toml_str).expect("Ladder TOML should parse");

        assert_eq!(config.ladder.len(), 2);
        assert_eq!(config.ladder[0].name, "360p");
        assert_eq!(config.ladder[1].width, 1280);
        assert_eq!(config.ladder[1].bitrate_kbps, 2500);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("HLS_ENCODE_TIMEOUT_SECS", "soon");
        env::set_var("HLS_SEGMENT_DURATION_SECS", "0");
        env::set_var("HLS_OUTPUT_ROOT", "   ");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_env_overrides_paths() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("HLS_OUTPUT_ROOT", "/var/www/hls");
        env::set_var("HLS_FFMPEG_PATH", "/usr/local/bin/ffmpeg");
        env::set_var("HLS_BIND_ADDR", "0.0.0.0:9000");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.packager.output_root, PathBuf::from("/var/www/hls"));
        assert_eq!(
            config.encoder.ffmpeg_path,
            PathBuf::from("/usr/local/bin/ffmpeg")
        );
        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load_or_default("/nonexistent/hls-packager/config.toml")
            .expect("Missing file should fall back to defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let result = Config::parse_toml("[packager\noutput_root = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}

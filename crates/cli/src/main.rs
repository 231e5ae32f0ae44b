//! CLI entry point for the HLS packager
//!
//! Packages a single video, prints the effective ladder, or runs the HTTP
//! service.

use clap::{Parser, Subcommand};
use hls_packager::{
    derive_plan, new_shared_metrics, run_startup_checks, Config, Daemon, Ladder, Packager,
    PackagingError,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// HLS Packager - adaptive-bitrate HLS packages from a single source video
#[derive(Parser, Debug)]
#[command(name = "hls-packager")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file; defaults apply when it does not exist
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Skip startup checks (ffmpeg probe). For testing only.
    #[arg(long, global = true, default_value = "false")]
    skip_checks: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Package one video and print its master manifest path
    Package {
        /// Source video file
        input: PathBuf,

        /// Directory name for the package below the output root
        name: String,

        /// Override the configured output root
        #[arg(short, long)]
        output_root: Option<PathBuf>,
    },

    /// Print the effective resolution ladder
    Ladder,

    /// Run the HTTP service
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter.as_str())
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match args.command {
        Command::Package {
            input,
            name,
            output_root,
        } => package(config, &input, &name, output_root, args.skip_checks).await,
        Command::Ladder => print_ladder(&config),
        Command::Serve => serve(config, args.skip_checks).await,
    }
}

async fn package(
    mut config: Config,
    input: &Path,
    name: &str,
    output_root: Option<PathBuf>,
    skip_checks: bool,
) -> ExitCode {
    if let Some(root) = output_root {
        config.packager.output_root = root;
    }

    let ladder = if skip_checks {
        tracing::warn!("Skipping startup checks (--skip-checks enabled)");
        Ladder::from_config(&config.ladder).map_err(|e| e.to_string())
    } else {
        run_startup_checks(&config).map_err(|e| e.to_string())
    };
    let ladder = match ladder {
        Ok(ladder) => ladder,
        Err(e) => {
            eprintln!("Startup check failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let plan = derive_plan(&config, ladder.len());
    let packager = match Packager::from_config(&config, &plan, new_shared_metrics()) {
        Ok(packager) => packager,
        Err(e) => {
            eprintln!("Invalid ladder: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match packager.package_detailed(input, name).await {
        Ok(report) => {
            for failure in &report.failures {
                eprintln!("warning: profile {} left out: {}", failure.profile, failure.reason);
            }
            println!("{}", report.manifest_path);
            ExitCode::SUCCESS
        }
        Err(PackagingError::AllFailed { failures }) => {
            eprintln!("Packaging failed: every profile failed to encode");
            for failure in failures {
                eprintln!("  {}", failure);
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Packaging failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_ladder(config: &Config) -> ExitCode {
    let ladder = match Ladder::from_config(&config.ladder) {
        Ok(ladder) => ladder,
        Err(e) => {
            eprintln!("Invalid ladder: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("{:<8} {:>10} {:>10}", "NAME", "RESOLUTION", "BITRATE");
    for profile in &ladder {
        println!(
            "{:<8} {:>10} {:>8}k",
            profile.name,
            profile.resolution(),
            profile.target_bitrate_kbps
        );
    }
    ExitCode::SUCCESS
}

async fn serve(config: Config, skip_checks: bool) -> ExitCode {
    let daemon_result = if skip_checks {
        tracing::warn!("Skipping startup checks (--skip-checks enabled)");
        Daemon::new_without_checks(config)
    } else {
        Daemon::with_config(config)
    };

    match daemon_result {
        Ok(daemon) => {
            let daemon = Arc::new(daemon);
            tracing::info!(
                bind_addr = %daemon.config.server.bind_addr,
                "Serving POST /jobs and GET /metrics"
            );

            let on_signal = daemon.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.shutdown();
                }
            });

            if let Err(e) = daemon.run_with_server().await {
                eprintln!("Daemon error: {}", e);
                return ExitCode::FAILURE;
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to initialize daemon: {}", e);
            ExitCode::FAILURE
        }
    }
}

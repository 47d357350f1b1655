use anyhow::{bail, Context, Result};
use clap::Parser;
use passcam::{
    CameraPosition, Clock, DataDirectory, PasscamConfig, PermissionCollaborator, SimulatedBackend,
    StaticPermissions, StereoRig, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "passcam")]
#[command(about = "Stereo passthrough camera capture with triggered frame persistence")]
#[command(version)]
#[command(long_about = "Streams a left/right passthrough camera pair into pooled frame \
buffers and, on every trigger, captures the next frame from each camera. Captured frames \
are kept in memory for JPEG snapshots and optionally written as raw YUV files together with \
per-camera format descriptors and characteristics.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "passcam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without opening cameras")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long, value_name = "SECONDS")]
    duration_secs: Option<u64>,

    /// Data directory name, overriding storage.directory_name
    #[arg(long, value_name = "NAME")]
    directory_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting passcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match PasscamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(name) = args.directory_name.clone() {
        config.storage.directory_name = Some(name);
    }

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate().context("Invalid configuration")?;

    run(config, args.duration_secs.map(Duration::from_secs)).await
}

async fn run(config: PasscamConfig, duration: Option<Duration>) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (width, height) = config.simulation.resolution;
    let backend = Arc::new(SimulatedBackend::stereo(
        width,
        height,
        Arc::clone(&clock),
        config.simulation.fps,
    ));

    let permissions = StaticPermissions::new(true);
    if !permissions.request_if_needed().granted().await {
        bail!("Camera permission was not granted");
    }

    let data_dir = DataDirectory::create(
        &config.storage.base_path,
        config.storage.directory_name.as_deref(),
    )?;

    let rig = Arc::new(
        StereoRig::start(
            &config,
            data_dir,
            backend.clone(),
            backend.as_ref(),
            permissions,
            clock,
        )
        .context("Failed to start stereo rig")?,
    );
    backend.start_frame_generator()?;

    info!(
        "Capturing every {:?} into {}",
        config.trigger_interval(),
        rig.data_dir().path().display()
    );

    let mut ticker = tokio::time::interval(config.trigger_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Received Ctrl-C, shutting down");
                break;
            }
            _ = &mut deadline => {
                info!("Capture duration elapsed, shutting down");
                break;
            }
            _ = ticker.tick() => {
                if rig.is_terminated() {
                    warn!("A camera session closed unexpectedly, shutting down");
                    break;
                }
                rig.capture_next_frame();
            }
        }
    }

    let stats = tokio::task::spawn_blocking(move || {
        backend.stop_frame_generator();
        rig.close();
        if let Ok(Some(jpeg)) = rig.latest_jpeg(CameraPosition::Left) {
            info!("Last left capture encodes to a {} byte JPEG", jpeg.len());
        }
        rig.stats()
    })
    .await?;

    for camera in [&stats.left, &stats.right] {
        info!(
            "Camera {}: captured {}, discarded {}, dropped {}, wrote {} frames ({} failed)",
            camera.camera_id,
            camera.ingest.captured,
            camera.ingest.discarded,
            camera.ingest.dropped,
            camera.ingest.persistence.frame_writes,
            camera.ingest.persistence.failed_writes
        );
    }

    info!("passcam stopped");
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("passcam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match args.log_dir.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "passcam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Passcam Configuration File");
    println!("# This is the default configuration with all available options.");
    println!("# Optional keys: camera.left_camera_id, camera.right_camera_id,");
    println!("# storage.directory_name (a timestamped name is used when unset).");
    println!();
    print!("{}", PasscamConfig::default().to_toml()?);
    Ok(())
}

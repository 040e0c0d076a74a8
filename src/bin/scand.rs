//! scand - camera scanner daemon
//!
//! This daemon:
//! 1. Loads the camera configuration
//! 2. Builds the shared detector
//! 3. Starts one worker per enabled camera
//! 4. Serves the latest annotated images over HTTP
//! 5. Stops and joins every worker on Ctrl-C / SIGTERM

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use camscan::{
    BackendRegistry, JsonlStatsLog, ResultServer, ScanConfig, ServerConfig, SharedStatsSink,
    Supervisor,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Snapshot cameras, run detection and serve the annotated results"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension). Falls back to SCAN_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds between snapshots.
    #[arg(long)]
    interval: Option<f64>,

    /// Archive images every N steps (0 disables).
    #[arg(long)]
    archive_steps: Option<u64>,

    /// Address for the result server.
    #[arg(long)]
    addr: Option<String>,

    /// Directory for snapshots, detect images and archives.
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// Directory for the scalars log.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Read snapshots from the image proxy instead of the cameras.
    #[arg(long)]
    use_image_proxy: bool,

    #[arg(long, env = "SCAN_DEBUG")]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Installed before anything is started so an early signal still goes
    // through the orderly shutdown below.
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = ScanConfig::load(args.config.as_deref())?;
    if let Some(secs) = args.interval {
        config.set_interval_secs(secs)?;
    }
    if let Some(every) = args.archive_steps {
        config.archive_every = every;
    }
    if let Some(addr) = args.addr {
        config.http_addr = addr;
    }
    if let Some(dir) = args.image_dir {
        config.image_dir = dir;
    }
    if let Some(dir) = args.log_dir {
        config.log_dir = dir;
    }
    if args.use_image_proxy {
        config.use_image_proxy = true;
    }

    let detector = BackendRegistry::with_builtin().build(&config.detector)?;
    detector
        .warm_up()
        .with_context(|| format!("{} detector warm-up failed", detector.backend_name()))?;
    log::info!("detector backend: {}", detector.backend_name());

    let stats_log = JsonlStatsLog::open(&config.log_dir)?;
    log::info!("writing scalars to {}", stats_log.path().display());
    let sink = SharedStatsSink::new(stats_log);

    let supervisor = Supervisor::start(&config, detector, Some(sink))?;
    let server = ResultServer::new(
        ServerConfig {
            addr: config.http_addr.clone(),
        },
        supervisor.directory(),
    )
    .spawn();
    let server = match server {
        Ok(server) => server,
        Err(err) => {
            supervisor.shutdown();
            return Err(err);
        }
    };
    log::info!(
        "scanning {} camera(s) every {:?}; results on http://{}",
        supervisor.handles().len(),
        config.interval,
        server.addr
    );

    let _ = rx.recv();
    log::info!("shutdown signal received, stopping workers...");
    supervisor.shutdown();
    server.stop()?;
    log::info!("scand stopped");

    Ok(())
}

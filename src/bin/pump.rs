//! pump - feed the image proxy
//!
//! Snapshots every enabled camera on a timer and rsyncs the images to the
//! image proxy host, where `scand --use-image-proxy` reads them.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use camscan::camera::open_camera;
use camscan::pump::{test_camera, CameraPump, ImageProxy};
use camscan::ScanConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pump camera snapshots to the image proxy")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension). Falls back to SCAN_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the image proxy host.
    #[arg(long)]
    host: Option<String>,

    /// Override the image proxy directory.
    #[arg(long)]
    image_path: Option<String>,

    /// Seconds between snapshots.
    #[arg(long, default_value_t = 5.0)]
    interval: f64,

    /// Snapshot one camera to the temp dir and exit.
    #[arg(long, value_name = "KEY")]
    test: Option<String>,

    #[arg(long, env = "SCAN_DEBUG")]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = ScanConfig::load(args.config.as_deref())?;

    if let Some(key) = &args.test {
        let Some(settings) = config.camera(key) else {
            eprintln!("No such camera: {}", key);
            std::process::exit(1);
        };
        let mut camera = open_camera(settings, None)?;
        let path = test_camera(camera.as_mut(), &std::env::temp_dir())?;
        println!("Snapshot of {} written to {}", key, path.display());
        return Ok(());
    }

    if !args.interval.is_finite() || args.interval <= 0.0 {
        return Err(anyhow!("--interval must be a positive number of seconds"));
    }
    let interval = Duration::try_from_secs_f64(args.interval)
        .map_err(|e| anyhow!("--interval {} is out of range: {}", args.interval, e))?;
    let proxy = ImageProxy::new(
        &config.image_proxy,
        args.host.as_deref(),
        args.image_path.as_deref(),
    );
    log::info!("writing images to image proxy {}", proxy.host());

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let mut pumps = Vec::new();
    for settings in config.enabled_cameras() {
        let camera = open_camera(settings, None)?;
        log::debug!("camera {}: {}", settings.key, camera.describe());
        let pump = CameraPump::new(camera, proxy.clone(), interval);
        pumps.push(pump.spawn()?);
    }
    if pumps.is_empty() {
        log::warn!("no enabled cameras configured");
    }

    log::info!("running image pump (press Ctrl-C to stop)");
    let _ = rx.recv();
    log::info!("stopping");
    for pump in &pumps {
        pump.stop();
    }
    for pump in pumps {
        let key = pump.key().to_string();
        if let Err(err) = pump.join() {
            log::error!("{}: {:#}", key, err);
        }
    }
    Ok(())
}

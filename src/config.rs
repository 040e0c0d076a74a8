use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::detect::DEFAULT_BOX_LINE_SIZE;

const DEFAULT_CAMERA_HOST: &str = "192.168.1.8";
const DEFAULT_CAMERA_USER: &str = "admin";
const DEFAULT_CAMERA_PASSWORD: &str = "admin";
const DEFAULT_CAMERA_PATH: &str = "cam/realmonitor?channel=1&subtype=0";
const DEFAULT_CAMERA_TIMEOUT_SECS: u64 = 5;
const DEFAULT_PROXY_HOST: &str = "localhost";
pub const DEFAULT_SCAN_PROXY_DIR: &str = "/tmp/camera-images";
pub const DEFAULT_PUMP_PROXY_DIR: &str = "/tmp/pump-images";
const DEFAULT_PROXY_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_INTERVAL_SECS: f64 = 5.0;
const DEFAULT_IMAGE_DIR: &str = "images";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8004";
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_THRESHOLD: f32 = 0.5;

// -------------------- File schema --------------------

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct ScanConfigFile {
    cameras: Option<BTreeMap<String, CameraConfigFile>>,
    servers: Option<ServersConfigFile>,
    scan: Option<ScanSectionFile>,
    http: Option<HttpConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct CameraConfigFile {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    path: Option<String>,
    enabled: Option<bool>,
    timeout_secs: Option<u64>,
    archive_every: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct ServersConfigFile {
    image_proxy: Option<ImageProxyConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct ImageProxyConfigFile {
    host: Option<String>,
    image_dir: Option<String>,
    connect_timeout: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct ScanSectionFile {
    interval_secs: Option<f64>,
    archive_every: Option<u64>,
    image_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    use_image_proxy: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct HttpConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    threshold: Option<f32>,
    box_line_size: Option<u32>,
}

// -------------------- Resolved config --------------------

/// Immutable scanner configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Every configured camera, enabled or not, sorted by key.
    pub cameras: Vec<CameraSettings>,
    pub image_proxy: ImageProxySettings,
    pub interval: Duration,
    pub archive_every: u64,
    pub image_dir: PathBuf,
    pub log_dir: PathBuf,
    pub use_image_proxy: bool,
    pub http_addr: String,
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub key: String,
    /// Source URL, credentials included.
    pub url: String,
    pub enabled: bool,
    pub timeout: Duration,
    /// Per-camera override of `ScanConfig::archive_every`.
    pub archive_every: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageProxySettings {
    pub host: String,
    /// `None` means "use the caller's default directory".
    pub image_dir: Option<String>,
    pub connect_timeout: Duration,
}

impl ImageProxySettings {
    pub fn image_dir_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.image_dir.as_deref().unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub threshold: f32,
    pub box_line_size: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            model_path: None,
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            threshold: DEFAULT_THRESHOLD,
            box_line_size: DEFAULT_BOX_LINE_SIZE,
        }
    }
}

impl ScanConfig {
    /// Load from `path` (or `SCAN_CONFIG`), apply environment overrides and
    /// validate. Without a path the built-in defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("SCAN_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => ScanConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a config document without touching the environment.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: ScanConfigFile =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ScanConfigFile) -> Result<Self> {
        let cameras = file
            .cameras
            .unwrap_or_default()
            .into_iter()
            .map(|(key, cam)| CameraSettings::from_file(key, cam))
            .collect::<Result<Vec<_>>>()?;

        let proxy = file
            .servers
            .and_then(|servers| servers.image_proxy)
            .unwrap_or_default();
        let image_proxy = ImageProxySettings {
            host: proxy
                .host
                .unwrap_or_else(|| DEFAULT_PROXY_HOST.to_string()),
            image_dir: proxy.image_dir,
            connect_timeout: Duration::from_secs(
                proxy
                    .connect_timeout
                    .unwrap_or(DEFAULT_PROXY_CONNECT_TIMEOUT_SECS),
            ),
        };

        let scan = file.scan.unwrap_or_default();
        let interval = seconds(scan.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS))?;

        let detector = file.detector.unwrap_or_default();
        let defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            backend: detector.backend.unwrap_or(defaults.backend),
            model_path: detector.model_path,
            input_width: detector.input_width.unwrap_or(defaults.input_width),
            input_height: detector.input_height.unwrap_or(defaults.input_height),
            threshold: detector.threshold.unwrap_or(defaults.threshold),
            box_line_size: detector.box_line_size.unwrap_or(defaults.box_line_size),
        };

        Ok(Self {
            cameras,
            image_proxy,
            interval,
            archive_every: scan.archive_every.unwrap_or(0),
            image_dir: scan
                .image_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR)),
            log_dir: scan
                .log_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            use_image_proxy: scan.use_image_proxy.unwrap_or(false),
            http_addr: file
                .http
                .and_then(|http| http.addr)
                .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
            detector,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SCAN_HTTP_ADDR") {
            if !addr.trim().is_empty() {
                self.http_addr = addr;
            }
        }
        if let Ok(interval) = std::env::var("SCAN_INTERVAL_SECS") {
            let secs: f64 = interval
                .parse()
                .map_err(|_| anyhow!("SCAN_INTERVAL_SECS must be a number of seconds"))?;
            self.interval = seconds(secs)?;
        }
        if let Ok(every) = std::env::var("SCAN_ARCHIVE_EVERY") {
            self.archive_every = every
                .parse()
                .map_err(|_| anyhow!("SCAN_ARCHIVE_EVERY must be a non-negative integer"))?;
        }
        if let Ok(dir) = std::env::var("SCAN_IMAGE_DIR") {
            if !dir.trim().is_empty() {
                self.image_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.interval.is_zero() {
            bail!("interval must be greater than zero");
        }
        for camera in &self.cameras {
            crate::validate_camera_key(&camera.key)?;
            if !self.use_image_proxy {
                validate_camera_url(&camera.key, &camera.url)?;
            }
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            bail!("detector backend 'tract' requires detector.model-path");
        }
        if self.detector.box_line_size == 0 {
            bail!("detector.box-line-size must be at least 1");
        }
        Ok(())
    }

    /// Override the scan interval, e.g. from a command-line flag.
    pub fn set_interval_secs(&mut self, secs: f64) -> Result<()> {
        self.interval = seconds(secs)?;
        Ok(())
    }

    /// Enabled cameras in key order.
    pub fn enabled_cameras(&self) -> impl Iterator<Item = &CameraSettings> {
        self.cameras.iter().filter(|camera| camera.enabled)
    }

    pub fn camera(&self, key: &str) -> Option<&CameraSettings> {
        self.cameras.iter().find(|camera| camera.key == key)
    }

    /// Effective archive interval for one camera.
    pub fn archive_every_for(&self, camera: &CameraSettings) -> u64 {
        camera.archive_every.unwrap_or(self.archive_every)
    }
}

impl CameraSettings {
    fn from_file(key: String, file: CameraConfigFile) -> Result<Self> {
        let url = match file.url {
            Some(url) => url,
            None => rtsp_url(
                file.host.as_deref().unwrap_or(DEFAULT_CAMERA_HOST),
                file.port,
                file.user.as_deref().unwrap_or(DEFAULT_CAMERA_USER),
                file.password.as_deref().unwrap_or(DEFAULT_CAMERA_PASSWORD),
                file.path.as_deref().unwrap_or(DEFAULT_CAMERA_PATH),
            )
            .map_err(|e| anyhow!("camera {}: {}", key, e))?,
        };
        Ok(Self {
            key,
            url,
            enabled: file.enabled.unwrap_or(true),
            timeout: Duration::from_secs(file.timeout_secs.unwrap_or(DEFAULT_CAMERA_TIMEOUT_SECS)),
            archive_every: file.archive_every,
        })
    }
}

fn rtsp_url(host: &str, port: Option<u16>, user: &str, password: &str, path: &str) -> Result<String> {
    let authority = match port {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let mut url = Url::parse(&format!("rtsp://{}/", authority))
        .map_err(|e| anyhow!("invalid camera host '{}': {}", host, e))?;
    url.set_username(user)
        .map_err(|_| anyhow!("cannot set user on camera url"))?;
    url.set_password(Some(password))
        .map_err(|_| anyhow!("cannot set password on camera url"))?;
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };
    url.set_path(&format!("/{}", path.trim_start_matches('/')));
    url.set_query(query);
    Ok(url.to_string())
}

fn validate_camera_url(key: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| anyhow!("camera {}: invalid url: {}", key, e))?;
    match url.scheme() {
        "rtsp" | "rtsps" | "http" | "https" | "stub" => Ok(()),
        other => Err(anyhow!(
            "camera {}: unsupported url scheme '{}'; expected rtsp, http(s) or stub",
            key,
            other
        )),
    }
}

fn seconds(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        bail!("interval must be a positive number of seconds, got {}", secs);
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| anyhow!("interval of {} seconds is out of range: {}", secs, e))
}

fn read_config_file(path: &Path) -> Result<ScanConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use super::{Camera, CameraError};
use crate::config::{ImageProxySettings, DEFAULT_SCAN_PROXY_DIR};
use crate::process::run_with_deadline;

/// Camera that pulls the latest snapshot of `key` from an image proxy host
/// with rsync. The proxy side is fed by the `pump` binary.
pub struct ProxyCamera {
    key: String,
    src: String,
    timeout: Duration,
}

impl ProxyCamera {
    pub fn new(key: &str, proxy: &ImageProxySettings, timeout: Duration) -> Self {
        let src = format!(
            "{}:{}/{}.jpg",
            proxy.host,
            proxy.image_dir_or(DEFAULT_SCAN_PROXY_DIR),
            key
        );
        Self {
            key: key.to_string(),
            src,
            timeout,
        }
    }

    fn command(&self, dest: &Path) -> Command {
        let mut cmd = Command::new("rsync");
        cmd.arg("-vL")
            .arg("--timeout")
            .arg(self.timeout.as_secs().max(1).to_string())
            .args(["-e", "ssh -o StrictHostKeyChecking=no"])
            .arg(&self.src)
            .arg(dest);
        cmd
    }
}

impl Camera for ProxyCamera {
    fn key(&self) -> &str {
        &self.key
    }

    fn describe(&self) -> String {
        self.src.clone()
    }

    fn snapshot(&mut self, dest: &Path) -> Result<(), CameraError> {
        let mut cmd = self.command(dest);
        // rsync enforces its own I/O timeout; the deadline also covers ssh setup.
        run_with_deadline(&mut cmd, self.timeout * 3)
            .map_err(|failure| CameraError::new(&self.key, self.describe(), failure.into()))
    }
}

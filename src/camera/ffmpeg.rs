use std::path::Path;
use std::process::Command;
use std::time::Duration;

use url::Url;

use super::{redact_url, Camera, CameraError};
use crate::process::{run_with_deadline, CommandFailure};

/// RTSP camera. Each snapshot runs ffmpeg to grab a single frame.
///
/// Opening the RTSP stream per snapshot is slower than holding a session,
/// but it survives camera reboots and flaky links without any reconnect
/// state.
pub struct FfmpegCamera {
    key: String,
    url: Url,
    timeout: Duration,
    program: String,
}

impl FfmpegCamera {
    pub fn new(key: &str, url: Url, timeout: Duration) -> Self {
        Self {
            key: key.to_string(),
            url,
            timeout,
            program: "ffmpeg".to_string(),
        }
    }

    fn command(&self, dest: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-y", "-loglevel", "error"]);
        if matches!(self.url.scheme(), "rtsp" | "rtsps") {
            cmd.args(["-rtsp_transport", "tcp"]);
        }
        cmd.arg("-i")
            .arg(self.url.as_str())
            .args(["-frames:v", "1"])
            .arg(dest);
        cmd
    }

    /// ffmpeg echoes its input URL in errors; keep credentials out of them.
    fn redact_failure(&self, failure: CommandFailure) -> CommandFailure {
        match failure {
            CommandFailure::Exit {
                program,
                status,
                message,
            } => {
                let mut message = message.replace(self.url.as_str(), &self.describe());
                if let Some(password) = self.url.password().filter(|p| !p.is_empty()) {
                    message = message.replace(password, "***");
                }
                CommandFailure::Exit {
                    program,
                    status,
                    message,
                }
            }
            other => other,
        }
    }
}

impl Camera for FfmpegCamera {
    fn key(&self) -> &str {
        &self.key
    }

    fn describe(&self) -> String {
        redact_url(&self.url)
    }

    fn snapshot(&mut self, dest: &Path) -> Result<(), CameraError> {
        let mut cmd = self.command(dest);
        run_with_deadline(&mut cmd, self.timeout).map_err(|failure| {
            let failure = self.redact_failure(failure);
            CameraError::new(&self.key, self.describe(), failure.into())
        })
    }
}

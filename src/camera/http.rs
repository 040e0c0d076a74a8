use std::io::Read;
use std::path::Path;
use std::time::Duration;

use url::Url;

use super::{redact_url, Camera, CameraError, CameraFailure};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// Camera exposing a still JPEG over HTTP (e.g. `/cgi-bin/snapshot.cgi`).
pub struct HttpCamera {
    key: String,
    url: Url,
    agent: ureq::Agent,
}

impl HttpCamera {
    pub fn new(key: &str, url: Url, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            key: key.to_string(),
            url,
            agent,
        }
    }

    fn fetch(&self) -> Result<Vec<u8>, CameraFailure> {
        let response = match self.agent.get(self.url.as_str()).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                return Err(CameraFailure::Http(format!(
                    "status {} {}",
                    code,
                    response.status_text()
                )))
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(CameraFailure::Http(transport.to_string()))
            }
        };
        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64 + 1)
            .read_to_end(&mut body)?;
        if body.len() > MAX_JPEG_BYTES {
            return Err(CameraFailure::Http(format!(
                "snapshot exceeds {} bytes",
                MAX_JPEG_BYTES
            )));
        }
        if body.is_empty() {
            return Err(CameraFailure::Http("empty snapshot body".to_string()));
        }
        Ok(body)
    }
}

impl Camera for HttpCamera {
    fn key(&self) -> &str {
        &self.key
    }

    fn describe(&self) -> String {
        redact_url(&self.url)
    }

    fn snapshot(&mut self, dest: &Path) -> Result<(), CameraError> {
        let result = self
            .fetch()
            .and_then(|jpeg| std::fs::write(dest, jpeg).map_err(CameraFailure::from));
        result.map_err(|cause| CameraError::new(&self.key, self.describe(), cause))
    }
}

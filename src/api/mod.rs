//! Result server.
//!
//! Minimal HTTP/1.1 over a nonblocking `TcpListener`:
//! - `GET /cameras` lists enabled camera keys
//! - `GET /detected/<key>.png` serves the latest annotated image
//! - `GET /health`
//!
//! The server only sees a [`CameraDirectory`] of read handles, fixed at
//! startup.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::worker::{ImageReader, ReadImageError};

const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8004".to_string(),
        }
    }
}

/// Immutable map from camera key to its image reader.
#[derive(Clone, Default)]
pub struct CameraDirectory {
    readers: BTreeMap<String, ImageReader>,
}

impl CameraDirectory {
    pub fn new(readers: impl IntoIterator<Item = ImageReader>) -> Self {
        Self {
            readers: readers
                .into_iter()
                .map(|reader| (reader.key().to_string(), reader))
                .collect(),
        }
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> Vec<&str> {
        self.readers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    pub fn read_latest(&self, key: &str) -> Result<Arc<[u8]>, ReadImageError> {
        self.readers
            .get(key)
            .ok_or_else(|| ReadImageError::UnknownCamera(key.to_string()))?
            .read_latest()
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("result server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ResultServer {
    cfg: ServerConfig,
    cameras: CameraDirectory,
}

impl ResultServer {
    pub fn new(cfg: ServerConfig, cameras: CameraDirectory) -> Self {
        Self { cfg, cameras }
    }

    /// Bind and serve on a background thread.
    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid http addr '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cameras = self.cameras;
        let join = std::thread::Builder::new()
            .name("result-server".to_string())
            .spawn(move || {
                if let Err(err) = serve(listener, &cameras, shutdown_thread) {
                    log::error!("result server stopped: {}", err);
                }
            })?;
        log::info!("serving results on http://{}", addr);

        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn serve(listener: TcpListener, cameras: &CameraDirectory, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, cameras) {
                    log::warn!("result request failed: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_BACKOFF);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, cameras: &CameraDirectory) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    log::debug!("{} {}", request.method, request.path);
    if request.method != "GET" {
        return write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }

    match request.path.as_str() {
        "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        "/cameras" => {
            let payload = serde_json::to_vec(&cameras.keys())?;
            write_response(
                &mut stream,
                200,
                "application/json",
                &[("Access-Control-Allow-Origin", "*")],
                &payload,
            )
        }
        path => match detected_key(path) {
            Some(key) => match cameras.read_latest(key) {
                Ok(png) => write_response(&mut stream, 200, "image/png", &[], &png),
                Err(err) => {
                    log::debug!("{}", err);
                    write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)
                }
            },
            None => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
        },
    }
}

/// `/detected/<key>.png` -> `<key>`.
fn detected_key(path: &str) -> Option<&str> {
    let key = path.strip_prefix("/detected/")?.strip_suffix(".png")?;
    if key.is_empty() || key.contains('/') {
        return None;
    }
    Some(key)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", &[], body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    for (name, value) in extra_headers {
        header.push_str(&format!("{}: {}\r\n", name, value));
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detected_key_parses_png_paths() {
        assert_eq!(detected_key("/detected/front.png"), Some("front"));
        assert_eq!(detected_key("/detected/back-2.png"), Some("back-2"));
        assert_eq!(detected_key("/detected/.png"), None);
        assert_eq!(detected_key("/detected/a/b.png"), None);
        assert_eq!(detected_key("/detected/front.jpg"), None);
        assert_eq!(detected_key("/cameras"), None);
    }

    #[test]
    fn empty_directory_reports_unknown_camera() {
        let cameras = CameraDirectory::default();
        assert!(cameras.is_empty());
        assert_eq!(
            cameras.read_latest("front"),
            Err(ReadImageError::UnknownCamera("front".to_string()))
        );
    }
}

mod common;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::Result;
use tempfile::tempdir;

use camscan::{
    ArchivePolicy, CameraDirectory, CameraWorker, ResultServer, ServerConfig, SharedDetector,
    WorkerSettings,
};
use common::{FakeBackend, FakeCamera};

struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn request(addr: SocketAddr, method: &str, path: &str) -> Result<Response> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    write!(
        stream,
        "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        method, path
    )?;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let body = raw[split + 4..].to_vec();
    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .expect("status line");
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    Ok(Response {
        status,
        headers,
        body,
    })
}

fn worker(dir: &std::path::Path, key: &str) -> Result<CameraWorker> {
    CameraWorker::new(
        Box::new(FakeCamera::new(key)),
        SharedDetector::new(FakeBackend::ok()),
        None,
        WorkerSettings {
            working_dir: dir.to_path_buf(),
            interval: Duration::from_secs(1),
            archive: ArchivePolicy::disabled(),
        },
    )
}

#[test]
fn serves_camera_list_and_latest_images() -> Result<()> {
    let dir = tempdir()?;
    let mut front = worker(dir.path(), "front")?;
    let back = worker(dir.path(), "back")?;
    front.run_cycle();

    let directory = CameraDirectory::new([front.reader(), back.reader()]);
    let server = ResultServer::new(
        ServerConfig {
            addr: "127.0.0.1:0".to_string(),
        },
        directory,
    )
    .spawn()?;

    let cameras = request(server.addr, "GET", "/cameras")?;
    assert_eq!(cameras.status, 200);
    assert_eq!(cameras.header("Content-Type"), Some("application/json"));
    assert_eq!(cameras.header("Access-Control-Allow-Origin"), Some("*"));
    let keys: Vec<String> = serde_json::from_slice(&cameras.body)?;
    assert_eq!(keys, ["back", "front"]);

    let png = request(server.addr, "GET", "/detected/front.png")?;
    assert_eq!(png.status, 200);
    assert_eq!(png.header("Content-Type"), Some("image/png"));
    assert_eq!(png.header("Cache-Control"), Some("no-store"));
    let expected = front.reader().read_latest().expect("published");
    assert_eq!(png.body, expected.to_vec());
    assert_eq!(
        png.header("Content-Length"),
        Some(expected.len().to_string().as_str())
    );

    // Known camera without a successful cycle yet.
    assert_eq!(request(server.addr, "GET", "/detected/back.png")?.status, 404);
    assert_eq!(request(server.addr, "GET", "/detected/side.png")?.status, 404);

    front.run_cycle();
    let newer = request(server.addr, "GET", "/detected/front.png")?;
    assert_eq!(
        newer.body,
        front.reader().read_latest().expect("published").to_vec()
    );
    assert_ne!(newer.body, png.body);

    server.stop()?;
    Ok(())
}

#[test]
fn health_unknown_paths_and_methods() -> Result<()> {
    let server = ResultServer::new(
        ServerConfig {
            addr: "127.0.0.1:0".to_string(),
        },
        CameraDirectory::default(),
    )
    .spawn()?;

    let health = request(server.addr, "GET", "/health")?;
    assert_eq!(health.status, 200);
    assert_eq!(health.body, br#"{"status":"ok"}"#);

    let cameras = request(server.addr, "GET", "/cameras")?;
    assert_eq!(cameras.body, b"[]");

    assert_eq!(request(server.addr, "GET", "/")?.status, 404);
    assert_eq!(request(server.addr, "GET", "/detected/")?.status, 404);
    assert_eq!(request(server.addr, "POST", "/cameras")?.status, 405);
    assert_eq!(
        request(server.addr, "GET", "/cameras?x=1")?.status,
        200,
        "query strings are ignored"
    );

    server.stop()?;
    Ok(())
}

#[test]
fn invalid_bind_address_is_rejected() {
    let err = ResultServer::new(
        ServerConfig {
            addr: "not-an-addr".to_string(),
        },
        CameraDirectory::default(),
    )
    .spawn()
    .err()
    .expect("bad addr");
    assert!(err.to_string().contains("not-an-addr"));
}

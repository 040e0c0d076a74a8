//! Run an external tool (ffmpeg, rsync) with a hard deadline.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum CommandFailure {
    #[error("{program} exited with {}: {message}", status_label(.status))]
    Exit {
        program: String,
        status: Option<i32>,
        message: String,
    },
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

fn status_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {}", code),
        None => "signal".to_string(),
    }
}

/// Run `cmd` to completion, killing it once `timeout` has elapsed.
///
/// stdout is discarded; the last non-empty stderr line becomes the failure
/// message. Grandchildren that inherit stderr (ssh under rsync) can keep the
/// pipe open after the child is gone, so the stderr reader is never waited
/// on past the deadline.
pub fn run_with_deadline(cmd: &mut Command, timeout: Duration) -> Result<(), CommandFailure> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CommandFailure::Spawn {
            program: program.clone(),
            source,
        })?;

    // Drain stderr on a side thread so a chatty tool cannot block on a full pipe.
    let stderr = child.stderr.take();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut text);
        }
        let _ = tx.send(text);
    });

    // A timeout too large to represent never fires.
    let deadline = Instant::now().checked_add(timeout);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if deadline.is_some_and(|d| Instant::now() >= d) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CommandFailure::Timeout { program, timeout });
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CommandFailure::Spawn { program, source });
            }
        }
    };

    if status.success() {
        return Ok(());
    }
    let stderr_text = match deadline {
        Some(deadline) => rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()) + POLL_INTERVAL)
            .unwrap_or_default(),
        None => rx.recv_timeout(Duration::from_secs(1)).unwrap_or_default(),
    };
    Err(CommandFailure::Exit {
        program,
        status: status.code(),
        message: last_line(&stderr_text),
    })
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no output")
        .to_string()
}

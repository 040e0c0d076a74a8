mod common;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tempfile::tempdir;

use camscan::{
    ArchivePolicy, CameraWorker, CycleError, MemoryStatsSink, ReadImageError, SharedDetector,
    SharedStatsSink, WorkerSettings,
};
use common::{archived, wait_until, FakeBackend, FakeCamera};

fn settings(dir: &Path, interval: Duration, archive_every: u64) -> WorkerSettings {
    WorkerSettings {
        working_dir: dir.to_path_buf(),
        interval,
        archive: ArchivePolicy::new(archive_every),
    }
}

fn worker(dir: &Path, camera: FakeCamera, archive_every: u64) -> Result<CameraWorker> {
    CameraWorker::new(
        Box::new(camera),
        SharedDetector::new(FakeBackend::ok()),
        None,
        settings(dir, Duration::from_millis(10), archive_every),
    )
}

#[test]
fn archives_k_pairs_for_k_times_n_cycles() -> Result<()> {
    for every in 1..=3u64 {
        let k = 3;
        let dir = tempdir()?;
        let mut worker = worker(dir.path(), FakeCamera::new("front"), every)?;
        for _ in 0..k * every {
            assert!(worker.run_cycle().published);
        }

        let expected_orig: Vec<String> = (0..k)
            .map(|i| format!("archive-front-{:06}-orig.jpg", i * every))
            .collect();
        let expected_detected: Vec<String> = (0..k)
            .map(|i| format!("archive-front-{:06}-detected.png", i * every))
            .collect();
        assert_eq!(archived(dir.path(), "front", "-orig.jpg"), expected_orig);
        assert_eq!(
            archived(dir.path(), "front", "-detected.png"),
            expected_detected
        );
    }
    Ok(())
}

#[test]
fn zero_archive_every_never_archives() -> Result<()> {
    let dir = tempdir()?;
    let mut worker = worker(dir.path(), FakeCamera::new("front"), 0)?;
    for _ in 0..4 {
        worker.run_cycle();
    }
    assert!(archived(dir.path(), "front", "").is_empty());
    Ok(())
}

#[test]
fn first_cycle_camera_error_leaves_nothing_to_read() -> Result<()> {
    let dir = tempdir()?;
    let mut worker = worker(dir.path(), FakeCamera::new("front").failing_after(0), 1)?;

    let report = worker.run_cycle();
    assert!(!report.published);
    match report.errors.as_slice() {
        [CycleError::Camera(err)] => {
            assert!(err.is_protocol_failure());
            assert_eq!(err.key, "front");
            assert_eq!(err.message(), "camera offline");
        }
        other => panic!("unexpected errors: {:?}", other),
    }
    assert_eq!(worker.step(), 1);
    assert_eq!(
        worker.reader().read_latest(),
        Err(ReadImageError::NotAvailable("front".to_string()))
    );
    assert!(archived(dir.path(), "front", "").is_empty());
    Ok(())
}

#[test]
fn detector_error_keeps_last_image_and_step_advances() -> Result<()> {
    let dir = tempdir()?;
    let mut good = worker(dir.path(), FakeCamera::new("front"), 0)?;
    good.run_cycle();
    let published = good.reader().read_latest().expect("published");

    let mut bad = CameraWorker::new(
        Box::new(FakeCamera::new("back")),
        SharedDetector::new(FakeBackend::failing()),
        None,
        settings(dir.path(), Duration::from_millis(10), 0),
    )?;
    let report = bad.run_cycle();
    assert!(!report.published);
    match report.errors.as_slice() {
        [CycleError::Detector(err)] => assert!(format!("{:#}", err).contains("model not loaded")),
        other => panic!("unexpected errors: {:?}", other),
    }
    assert_eq!(bad.step(), 1);
    assert!(bad.reader().read_latest().is_err());

    good.run_cycle();
    assert_ne!(good.reader().read_latest().expect("published"), published);
    assert_eq!(good.step(), 2);
    Ok(())
}

#[test]
fn archive_failure_does_not_block_publish() -> Result<()> {
    let dir = tempdir()?;
    std::fs::create_dir(dir.path().join("archive-front-000000-orig.jpg"))?;
    let mut worker = worker(dir.path(), FakeCamera::new("front"), 1)?;

    let report = worker.run_cycle();
    assert!(report.published);
    assert!(matches!(
        report.errors.as_slice(),
        [CycleError::Archive { .. }]
    ));
    assert!(dir.path().join("archive-front-000000-detected.png").exists());
    assert_eq!(worker.step(), 1);
    Ok(())
}

#[test]
fn read_returns_last_published_bytes() -> Result<()> {
    let dir = tempdir()?;
    let mut worker = worker(dir.path(), FakeCamera::new("front").failing_after(2), 0)?;
    worker.run_cycle();
    worker.run_cycle();
    let on_disk = std::fs::read(worker.detect_path())?;
    let latest = worker.reader().read_latest().expect("published");
    assert_eq!(latest.to_vec(), on_disk);

    worker.run_cycle();
    assert_eq!(worker.reader().read_latest().expect("kept"), latest);
    Ok(())
}

#[test]
fn stats_are_appended_per_step() -> Result<()> {
    let dir = tempdir()?;
    let memory = Arc::new(Mutex::new(MemoryStatsSink::new()));
    let mut worker = CameraWorker::new(
        Box::new(FakeCamera::new("front").failing_after(1)),
        SharedDetector::new(FakeBackend::ok()),
        Some(SharedStatsSink::from(Arc::clone(&memory))),
        settings(dir.path(), Duration::from_millis(10), 1),
    )?;
    worker.run_cycle();
    worker.run_cycle();

    let sink = memory.lock().unwrap();
    let tags = |step: u64| -> Vec<String> {
        sink.records()
            .iter()
            .filter(|r| r.step == step)
            .map(|r| r.tag.clone())
            .collect()
    };
    let first = tags(0);
    for tag in [
        "performance/front/camera/snapshot",
        "performance/front/camera/all",
        "performance/front/detect/decode",
        "performance/front/detect/inference",
        "performance/front/detect/encode",
        "performance/front/detect/all",
        "performance/front/archive/orig",
        "performance/front/archive/detected",
        "performance/front/archive/all",
    ] {
        assert!(first.iter().any(|t| t == tag), "missing {}", tag);
    }
    // The failed snapshot is still timed.
    assert_eq!(
        tags(1),
        [
            "performance/front/camera/snapshot".to_string(),
            "performance/front/camera/all".to_string()
        ]
    );
    Ok(())
}

#[test]
fn stop_during_wait_exits_promptly() -> Result<()> {
    let dir = tempdir()?;
    let worker = CameraWorker::new(
        Box::new(FakeCamera::new("front")),
        SharedDetector::new(FakeBackend::ok()),
        None,
        settings(dir.path(), Duration::from_secs(60), 0),
    )?;
    let handle = worker.spawn()?;
    assert!(wait_until(Duration::from_secs(10), || handle.step() >= 1));

    let stopped = Instant::now();
    handle.stop();
    handle.join()?;
    assert!(stopped.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[test]
fn stop_mid_cycle_finishes_that_cycle() -> Result<()> {
    let dir = tempdir()?;
    let camera = FakeCamera::new("front").with_delay(Duration::from_millis(300));
    let calls = Arc::clone(&camera.calls);
    let worker = CameraWorker::new(
        Box::new(camera),
        SharedDetector::new(FakeBackend::ok()),
        None,
        settings(dir.path(), Duration::from_secs(60), 0),
    )?;
    let reader = worker.reader();
    let handle = worker.spawn()?;
    assert!(wait_until(Duration::from_secs(10), || calls
        .load(Ordering::SeqCst)
        >= 1));

    handle.stop();
    handle.join()?;
    assert_eq!(reader.step(), 1);
    assert!(reader.read_latest().is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn concurrent_readers_never_see_partial_images() -> Result<()> {
    let dir = tempdir()?;
    let worker = CameraWorker::new(
        Box::new(FakeCamera::new("front")),
        SharedDetector::new(FakeBackend::ok()),
        None,
        settings(dir.path(), Duration::ZERO, 0),
    )?;
    let reader = worker.reader();
    let handle = worker.spawn()?;
    assert!(wait_until(Duration::from_secs(10), || reader
        .read_latest()
        .is_ok()));

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let reader = reader.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut reads = 0u32;
                while !done.load(Ordering::SeqCst) {
                    let png = reader.read_latest().expect("still published");
                    let image = image::load_from_memory_with_format(&png, image::ImageFormat::Png)
                        .expect("complete png");
                    assert_eq!((image.width(), image.height()), (64, 48));
                    let rgb = image.to_rgb8();
                    let first = *rgb.get_pixel(0, 0);
                    assert!(rgb.pixels().all(|p| p.0.iter().zip(first.0).all(
                        |(a, b)| (*a as i16 - b as i16).abs() <= 8
                    )));
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(300));
    done.store(true, Ordering::SeqCst);
    for r in readers {
        assert!(r.join().expect("reader thread") > 0);
    }
    handle.stop();
    handle.join()?;
    assert!(reader.step() > 1);
    Ok(())
}

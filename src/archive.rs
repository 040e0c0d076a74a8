//! Step-numbered archival copies of snapshots and detect images.
//!
//! Archiving is decided against the step value *before* the cycle increments
//! it, so with `every = N` the archived steps are 0, N, 2N, ...

use std::io;
use std::path::{Path, PathBuf};

pub const ORIG_SUFFIX: &str = "-orig";
pub const DETECTED_SUFFIX: &str = "-detected";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArchivePolicy {
    every: u64,
}

impl ArchivePolicy {
    /// `every = 0` disables archiving.
    pub fn new(every: u64) -> Self {
        Self { every }
    }

    pub fn disabled() -> Self {
        Self { every: 0 }
    }

    pub fn every(&self) -> u64 {
        self.every
    }

    pub fn is_enabled(&self) -> bool {
        self.every > 0
    }

    pub fn should_archive(&self, step: u64) -> bool {
        self.every > 0 && step % self.every == 0
    }
}

/// `archive-<key>-<step:06>-<suffix><ext>` next to `src`.
pub fn archive_path(src: &Path, key: &str, step: u64, suffix: &str) -> PathBuf {
    let ext = src
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let name = format!("archive-{}-{:06}{}{}", key, step, suffix, ext);
    match src.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Copy `src` to its archive path and return that path.
pub fn archive_copy(src: &Path, key: &str, step: u64, suffix: &str) -> io::Result<PathBuf> {
    let dest = archive_path(src, key, step, suffix);
    std::fs::copy(src, &dest)?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn disabled_policy_never_archives() {
        let policy = ArchivePolicy::new(0);
        assert!(!policy.is_enabled());
        assert!((0..10).all(|step| !policy.should_archive(step)));
    }

    #[test]
    fn policy_archives_on_multiples_starting_at_zero() {
        let policy = ArchivePolicy::new(3);
        let archived: Vec<u64> = (0..10).filter(|s| policy.should_archive(*s)).collect();
        assert_eq!(archived, vec![0, 3, 6, 9]);
    }

    #[test]
    fn every_one_archives_each_step() {
        let policy = ArchivePolicy::new(1);
        assert!((0..5).all(|step| policy.should_archive(step)));
    }

    #[test]
    fn archive_path_is_zero_padded_and_keeps_extension() {
        let path = archive_path(Path::new("/tmp/images/front.jpg"), "front", 42, ORIG_SUFFIX);
        assert_eq!(
            path,
            PathBuf::from("/tmp/images/archive-front-000042-orig.jpg")
        );

        let path = archive_path(
            Path::new("images/front-detect.png"),
            "front",
            1_000_000,
            DETECTED_SUFFIX,
        );
        assert_eq!(
            path,
            PathBuf::from("images/archive-front-1000000-detected.png")
        );
    }

    #[test]
    fn archive_copy_duplicates_file() -> io::Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("back.jpg");
        std::fs::write(&src, b"jpeg")?;

        let dest = archive_copy(&src, "back", 4, ORIG_SUFFIX)?;
        assert_eq!(dest, dir.path().join("archive-back-000004-orig.jpg"));
        assert_eq!(std::fs::read(&dest)?, b"jpeg");
        assert!(src.exists());
        Ok(())
    }

    #[test]
    fn archive_copy_reports_missing_source() {
        let dir = tempdir().unwrap();
        let err = archive_copy(&dir.path().join("none.jpg"), "none", 0, ORIG_SUFFIX);
        assert!(err.is_err());
    }
}

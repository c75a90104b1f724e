//! Directory-of-JPEGs capture source.
//!
//! Cycles through the `*.jpg` / `*.jpeg` files of a local directory in name order,
//! reading one file per acquisition. Useful for replaying recorded frames against a
//! broker without camera hardware.
//!
//! The directory source is responsible for:
//! - Re-scanning the directory when it wraps around, so new files are picked up
//! - Rejecting files that are empty, oversized or lack a JPEG start-of-image marker
//!
//! Sensor configuration cannot change recorded files; it is logged and otherwise ignored.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{BufferSlot, CaptureSource, CaptureStats, MAX_FRAME_BYTES};
use crate::frame::Frame;
use crate::sensor::SensorConfig;

pub struct DirCaptureSource {
    dir: PathBuf,
    label: String,
    files: Vec<PathBuf>,
    cursor: usize,
    slot: BufferSlot,
}

impl DirCaptureSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(anyhow!("{} is not a directory", dir.display()));
        }
        let files = list_jpegs(&dir)?;
        if files.is_empty() {
            log::warn!("no jpeg files in {} yet", dir.display());
        }
        Ok(Self {
            label: format!("dir://{}", dir.display()),
            dir,
            files,
            cursor: 0,
            slot: BufferSlot::default(),
        })
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn next_path(&mut self) -> Result<PathBuf> {
        if self.cursor >= self.files.len() {
            self.files = list_jpegs(&self.dir)?;
            self.cursor = 0;
        }
        let path = self
            .files
            .get(self.cursor)
            .cloned()
            .ok_or_else(|| anyhow!("no jpeg files in {}", self.dir.display()))?;
        self.cursor += 1;
        Ok(path)
    }

    fn read_frame(&mut self) -> Result<Vec<u8>> {
        let path = self.next_path()?;
        let bytes =
            std::fs::read(&path).with_context(|| format!("read frame {}", path.display()))?;
        check_jpeg(&bytes).with_context(|| format!("frame {}", path.display()))?;
        Ok(bytes)
    }
}

impl CaptureSource for DirCaptureSource {
    fn acquire(&mut self) -> Result<Frame> {
        self.slot.ensure_free()?;
        match self.read_frame() {
            Ok(bytes) => {
                self.slot.check_out();
                Ok(Frame::new(0, bytes))
            }
            Err(e) => {
                self.slot.record_failure();
                Err(e)
            }
        }
    }

    fn release(&mut self, frame: Frame) {
        self.slot.check_in();
        drop(frame);
    }

    fn apply_configuration(&mut self, config: &SensorConfig) {
        log::debug!(
            "{}: recorded frames ignore {} quality={}",
            self.label,
            config.frame_size,
            config.quality
        );
    }

    fn stats(&self) -> CaptureStats {
        self.slot.stats(&self.label)
    }
}

fn list_jpegs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        let is_jpeg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false);
        if is_jpeg && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn check_jpeg(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg"));
    }
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(anyhow!(
            "jpeg of {} bytes exceeds {} byte limit",
            bytes.len(),
            MAX_FRAME_BYTES
        ));
    }
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return Err(anyhow!("missing jpeg start-of-image marker"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, bytes: &[u8]) {
        std::fs::write(dir.join(name), bytes).expect("write fixture");
    }

    #[test]
    fn cycles_jpegs_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "b.jpg", &[0xFF, 0xD8, 2, 0xFF, 0xD9]);
        write(dir.path(), "a.jpeg", &[0xFF, 0xD8, 1, 0xFF, 0xD9]);
        write(dir.path(), "notes.txt", b"skip me");

        let mut source = DirCaptureSource::open(dir.path()).expect("open");
        assert_eq!(source.file_count(), 2);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let frame = source.acquire().expect("frame");
            seen.push(frame.chunk(0, 4096).expect("chunk").bytes[2]);
            source.release(frame);
        }
        assert_eq!(seen, vec![1, 2, 1]);
    }

    #[test]
    fn non_jpeg_file_is_a_capture_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "bad.jpg", b"not a jpeg");

        let mut source = DirCaptureSource::open(dir.path()).expect("open");
        assert!(source.acquire().is_err());
        let stats = source.stats();
        assert_eq!(stats.capture_failures, 1);
        assert!(!stats.checked_out);
    }

    #[test]
    fn empty_directory_fails_until_files_arrive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut source = DirCaptureSource::open(dir.path()).expect("open");
        assert!(source.acquire().is_err());

        write(dir.path(), "late.jpg", &[0xFF, 0xD8, 9, 0xFF, 0xD9]);
        let frame = source.acquire().expect("frame after rescan");
        assert_eq!(frame.total_bytes(), 5);
        source.release(frame);
    }

    #[test]
    fn open_rejects_missing_directory() {
        assert!(DirCaptureSource::open("/nonexistent/frames").is_err());
    }
}

//! JPEG encoding and the `latest_frame.jpg` artifact.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(capacity_hint(img.width(), img.height()));
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(img)
        .context("jpeg encode")?;
    Ok(out)
}

// Roughly a quarter byte per pixel; computed in usize so large frames cannot wrap.
fn capacity_hint(width: u32, height: u32) -> usize {
    (width as usize).saturating_mul(height as usize) / 4
}

/// Write `bytes` to `path` by writing a sibling temp file and renaming it over.
///
/// Readers of `path` see either the previous file or the new one, never a
/// partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("artifact path {} has no file name", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// The annotated-frame artifact rewritten on every recognition completion.
///
/// Writes carry a `(cycle, revision)` stamp. A write older than the last one
/// that reached disk is dropped, so a late completion holding an earlier copy
/// of the frame never replaces a more complete one.
pub struct FrameArtifact {
    path: PathBuf,
    quality: u8,
    last: Mutex<Option<(u64, u64)>>,
}

impl FrameArtifact {
    pub fn new(path: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            path: path.into(),
            quality,
            last: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encode `img` and replace the artifact unless a newer stamp was already
    /// written. Returns whether the file was replaced.
    pub fn write(&self, stamp: (u64, u64), img: &RgbImage) -> Result<bool> {
        let mut last = self
            .last
            .lock()
            .map_err(|_| anyhow!("frame artifact lock poisoned"))?;
        if matches!(*last, Some(prev) if prev >= stamp) {
            return Ok(false);
        }
        let bytes = encode_jpeg(img, self.quality)?;
        write_atomic(&self.path, &bytes)?;
        *last = Some(stamp);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn encodes_a_decodable_jpeg() {
        let img = RgbImage::from_pixel(32, 24, Rgb([200, 10, 10]));
        let bytes = encode_jpeg(&img, 90).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 24));
    }

    #[test]
    fn capacity_hint_does_not_wrap_for_large_frames() {
        assert_eq!(capacity_hint(640, 480), 640 * 480 / 4);
        assert_eq!(capacity_hint(70_000, 70_000), 70_000usize * 70_000 / 4);
        assert!(capacity_hint(u32::MAX, u32::MAX) > u32::MAX as usize);
    }

    #[test]
    fn artifact_is_replaced_without_temp_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = FrameArtifact::new(dir.path().join("latest_frame.jpg"), 80);
        assert!(artifact.write((1, 1), &RgbImage::new(16, 16)).unwrap());
        assert!(artifact.write((1, 2), &RgbImage::new(20, 10)).unwrap());

        let decoded = image::open(artifact.path()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 10));
        assert!(!dir.path().join("latest_frame.jpg.tmp").exists());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let artifact = FrameArtifact::new("/nonexistent/dir/latest_frame.jpg", 80);
        assert!(artifact.write((1, 1), &RgbImage::new(4, 4)).is_err());
    }

    #[test]
    fn stale_writes_do_not_replace_newer_frames() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = FrameArtifact::new(dir.path().join("latest_frame.jpg"), 80);
        assert!(artifact.write((3, 2), &RgbImage::new(30, 10)).unwrap());
        assert!(!artifact.write((3, 1), &RgbImage::new(8, 8)).unwrap());
        assert!(!artifact.write((2, 9), &RgbImage::new(8, 8)).unwrap());
        assert!(!artifact.write((3, 2), &RgbImage::new(8, 8)).unwrap());

        let decoded = image::open(artifact.path()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (30, 10));

        assert!(artifact.write((4, 1), &RgbImage::new(12, 6)).unwrap());
        let decoded = image::open(artifact.path()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 6));
    }

    #[test]
    fn failed_write_does_not_advance_the_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("latest_frame.jpg");
        let artifact = FrameArtifact::new(&path, 80);
        assert!(artifact.write((1, 1), &RgbImage::new(4, 4)).is_err());
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        assert!(artifact.write((1, 1), &RgbImage::new(4, 4)).unwrap());
    }
}

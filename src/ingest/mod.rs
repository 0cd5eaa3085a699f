//! Frame ingestion.
//!
//! `FrameSource` turns transport payloads into canonical-size frames and
//! stores them in the raw `FrameBuffer`. Feeders:
//! - `mqtt`: base64 JPEG payloads from a broker topic
//! - `replay`: JPEG files from a local directory, for running without a broker
//!
//! Undecodable payloads are dropped and counted; they never stop ingestion.

pub mod mqtt;
pub mod replay;

pub use mqtt::{MqttIngest, MqttIngestConfig};
pub use replay::{ReplayConfig, ReplaySource};

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use image::imageops::FilterType;
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::frame::{Frame, FrameBuffer, CANONICAL_HEIGHT, CANONICAL_WIDTH};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub frames_ingested: u64,
    pub payloads_dropped: u64,
}

pub struct FrameSource {
    buffer: Arc<FrameBuffer>,
    width: u32,
    height: u32,
    ingested: AtomicU64,
    dropped: AtomicU64,
}

impl FrameSource {
    pub fn new(buffer: Arc<FrameBuffer>) -> Self {
        Self::with_size(buffer, CANONICAL_WIDTH, CANONICAL_HEIGHT)
    }

    pub fn with_size(buffer: Arc<FrameBuffer>, width: u32, height: u32) -> Self {
        Self {
            buffer,
            width,
            height,
            ingested: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Ingest a base64-encoded JPEG payload.
    pub fn ingest(&self, payload: &[u8]) -> Result<()> {
        let jpeg = match decode_payload(payload) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::SeqCst);
                return Err(e);
            }
        };
        self.ingest_jpeg(&jpeg)
    }

    /// Ingest raw JPEG bytes.
    pub fn ingest_jpeg(&self, jpeg: &[u8]) -> Result<()> {
        match decode_frame(jpeg, self.width, self.height) {
            Ok(image) => {
                self.buffer.set(Frame::new(image));
                self.ingested.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            frames_ingested: self.ingested.load(Ordering::SeqCst),
            payloads_dropped: self.dropped.load(Ordering::SeqCst),
        }
    }
}

/// Decode a base64 payload, ignoring surrounding and embedded whitespace.
pub fn decode_payload(payload: &[u8]) -> Result<Vec<u8>> {
    let compact: Vec<u8> = payload
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(anyhow!("empty frame payload"));
    }
    base64::engine::general_purpose::STANDARD
        .decode(&compact)
        .context("frame payload is not valid base64")
}

/// Decode a JPEG and resize it to `width` x `height` if needed.
pub fn decode_frame(jpeg: &[u8], width: u32, height: u32) -> Result<RgbImage> {
    let rgb = image::load_from_memory(jpeg)
        .context("decode jpeg")?
        .into_rgb8();
    if rgb.dimensions() == (width, height) {
        return Ok(rgb);
    }
    Ok(image::imageops::resize(&rgb, width, height, FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::encode_jpeg;
    use image::Rgb;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        encode_jpeg(&RgbImage::from_pixel(width, height, Rgb([40, 80, 120])), 90).unwrap()
    }

    fn b64(bytes: &[u8]) -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .encode(bytes)
            .into_bytes()
    }

    #[test]
    fn valid_payload_is_resized_into_buffer() {
        let buffer = Arc::new(FrameBuffer::new("raw"));
        let source = FrameSource::new(Arc::clone(&buffer));
        source.ingest(&b64(&jpeg(320, 240))).unwrap();

        let frame = buffer.try_snapshot().unwrap();
        assert_eq!((frame.width(), frame.height()), (640, 480));
        assert_eq!(
            source.stats(),
            IngestStats {
                frames_ingested: 1,
                payloads_dropped: 0
            }
        );
    }

    #[test]
    fn payload_with_line_breaks_decodes() {
        let buffer = Arc::new(FrameBuffer::new("raw"));
        let source = FrameSource::with_size(Arc::clone(&buffer), 16, 16);
        let mut wrapped = Vec::new();
        for chunk in b64(&jpeg(16, 16)).chunks(76) {
            wrapped.extend_from_slice(chunk);
            wrapped.extend_from_slice(b"\r\n");
        }
        source.ingest(&wrapped).unwrap();
        assert_eq!(buffer.generation(), 1);
    }

    #[test]
    fn bad_payloads_are_dropped_and_counted() {
        let buffer = Arc::new(FrameBuffer::new("raw"));
        let source = FrameSource::new(Arc::clone(&buffer));
        assert!(source.ingest(b"!!!not base64!!!").is_err());
        assert!(source.ingest(&b64(b"definitely not a jpeg")).is_err());
        assert!(source.ingest(b"   ").is_err());
        assert_eq!(source.stats().payloads_dropped, 3);
        assert!(buffer.try_snapshot().is_none());
    }

    #[test]
    fn good_frame_after_bad_still_lands() {
        let buffer = Arc::new(FrameBuffer::new("raw"));
        let source = FrameSource::with_size(Arc::clone(&buffer), 8, 8);
        let _ = source.ingest(b"garbage");
        source.ingest(&b64(&jpeg(8, 8))).unwrap();
        assert_eq!(source.stats().frames_ingested, 1);
        assert!(buffer.try_snapshot().is_some());
    }
}

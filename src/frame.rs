//! Frame slots shared between pipeline threads.
//!
//! - `Frame`: decoded RGB image plus the time it was captured.
//! - `FrameBuffer`: single-slot, latest-wins holder. Writers replace the slot,
//!   readers copy it out. There is no queue and no history.
//!
//! The pipeline owns two buffers: the raw buffer written by the ingest thread
//! and the processed buffer written by the detection loop. Both are read by the
//! display loop. The mutex lives inside the buffer and is only held for the
//! duration of a replace or a copy.

use image::RgbImage;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

/// Canonical pipeline resolution. Ingested frames are resized to this.
pub const CANONICAL_WIDTH: u32 = 640;
pub const CANONICAL_HEIGHT: u32 = 480;

/// A decoded video frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    captured_at: SystemTime,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self::captured(image, SystemTime::now())
    }

    pub fn captured(image: RgbImage, captured_at: SystemTime) -> Self {
        Self { image, captured_at }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }
}

struct Slot {
    frame: Option<Frame>,
    generation: u64,
}

/// Single-slot, latest-wins frame holder.
///
/// `set` never waits on readers beyond the lock hold time of a copy, and a slow
/// reader simply misses intermediate frames. Every `set` bumps a generation
/// counter so consumers can tell a new frame from one they already processed.
pub struct FrameBuffer {
    name: &'static str,
    slot: Mutex<Slot>,
    updated: Condvar,
}

impl FrameBuffer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot {
                frame: None,
                generation: 0,
            }),
            updated: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Replace the slot contents unconditionally.
    pub fn set(&self, frame: Frame) {
        {
            let mut slot = self.lock();
            slot.frame = Some(frame);
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.updated.notify_all();
    }

    /// Copy out the current frame, or `None` if nothing was ever set.
    pub fn try_snapshot(&self) -> Option<Frame> {
        self.lock().frame.clone()
    }

    /// Number of `set` calls observed so far.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Wait up to `timeout` for a frame newer than generation `seen`.
    ///
    /// Returns the new generation and a copy of the frame. Returns `None` on
    /// timeout so callers can poll a stop flag between waits.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> Option<(u64, Frame)> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if slot.generation != seen {
                if let Some(frame) = slot.frame.as_ref() {
                    return Some((slot.generation, frame.clone()));
                }
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .updated
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }

    // A poisoned slot still holds a whole frame or none; recover it.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::Arc;

    fn solid(value: u8) -> Frame {
        Frame::new(RgbImage::from_pixel(4, 4, Rgb([value, value, value])))
    }

    #[test]
    fn empty_buffer_has_no_snapshot() {
        let buf = FrameBuffer::new("raw");
        assert!(buf.try_snapshot().is_none());
        assert_eq!(buf.generation(), 0);
    }

    #[test]
    fn snapshot_is_latest_set() {
        let buf = FrameBuffer::new("raw");
        for v in 0..10u8 {
            buf.set(solid(v));
        }
        let snap = buf.try_snapshot().unwrap();
        assert_eq!(snap.image().get_pixel(0, 0), &Rgb([9, 9, 9]));
        assert_eq!(buf.generation(), 10);
    }

    #[test]
    fn snapshot_does_not_alias_slot() {
        let buf = FrameBuffer::new("raw");
        buf.set(solid(1));
        let mut snap = buf.try_snapshot().unwrap();
        snap.image_mut().put_pixel(0, 0, Rgb([200, 0, 0]));
        let again = buf.try_snapshot().unwrap();
        assert_eq!(again.image().get_pixel(0, 0), &Rgb([1, 1, 1]));
    }

    #[test]
    fn wait_newer_times_out_without_new_frame() {
        let buf = FrameBuffer::new("raw");
        buf.set(solid(3));
        let seen = buf.generation();
        assert!(buf.wait_newer(seen, Duration::from_millis(20)).is_none());
    }

    #[test]
    fn wait_newer_wakes_on_set() {
        let buf = Arc::new(FrameBuffer::new("raw"));
        let writer = Arc::clone(&buf);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.set(solid(7));
        });
        let (generation, frame) = buf.wait_newer(0, Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(generation, 1);
        assert_eq!(frame.image().get_pixel(1, 1), &Rgb([7, 7, 7]));
    }

    #[test]
    fn concurrent_writers_leave_one_whole_frame() {
        let buf = Arc::new(FrameBuffer::new("raw"));
        let handles: Vec<_> = (0..4u8)
            .map(|v| {
                let buf = Arc::clone(&buf);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        buf.set(solid(v));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = buf.try_snapshot().unwrap();
        let first = *snap.image().get_pixel(0, 0);
        assert!(snap.image().pixels().all(|p| *p == first));
        assert_eq!(buf.generation(), 200);
    }
}

use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crate::vision::{BoundingBox, Candidate};

/// The annotated frame one detection cycle builds up.
///
/// Every face context of the cycle shares it; recognition completions draw
/// their labels onto it and then write it out as the latest-frame artifact.
pub struct CycleFrame {
    cycle: u64,
    captured_at: SystemTime,
    image: Mutex<RgbImage>,
    revision: AtomicU64,
}

impl CycleFrame {
    pub fn new(cycle: u64, captured_at: SystemTime, image: RgbImage) -> Arc<Self> {
        Arc::new(Self {
            cycle,
            captured_at,
            image: Mutex::new(image),
            revision: AtomicU64::new(0),
        })
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    pub fn lock(&self) -> MutexGuard<'_, RgbImage> {
        self.image.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> RgbImage {
        self.lock().clone()
    }

    /// Apply `draw` under the frame lock and copy the result out.
    ///
    /// The returned revision counts the annotations applied so far, so a
    /// higher revision always carries every label of a lower one.
    pub fn annotate(&self, draw: impl FnOnce(&mut RgbImage)) -> (u64, RgbImage) {
        let mut image = self.lock();
        draw(&mut image);
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        (revision, image.clone())
    }
}

/// Everything the correlator needs to act on one face's result.
///
/// Built by the detection loop from the snapshot it processed and never
/// modified afterwards.
pub struct DetectionContext {
    pub cycle: u64,
    pub face_index: usize,
    pub bbox: BoundingBox,
    /// Crop of the unannotated snapshot, clamped to the frame.
    pub face: Option<RgbImage>,
    pub frame: Arc<CycleFrame>,
}

/// One unit of recognition work. Exactly one per `DetectionContext`.
pub struct RecognitionRequest {
    pub context: DetectionContext,
    /// JPEG of `context.face`; `None` when the box had no visible area or the
    /// crop could not be encoded.
    pub face_jpeg: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecognitionResult {
    /// Ranked candidates; empty means nothing matched.
    Candidates(Vec<Candidate>),
    Failed(String),
}

impl RecognitionResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Crop `bbox` out of `img`, clamped to the image bounds.
pub fn crop_face(img: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (x, y, w, h) = bbox.clamp_to(img.width(), img.height())?;
    Some(image::imageops::crop_imm(img, x, y, w, h).to_image())
}

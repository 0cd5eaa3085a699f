//! Single-flight face detection loop.
//!
//! One cycle per new raw frame: snapshot, one synchronous detection call,
//! then one recognition request per detected face. The loop never waits for
//! recognition results.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::context::{crop_face, CycleFrame, DetectionContext, RecognitionRequest};
use super::correlator::ResultCorrelator;
use super::dispatcher::RecognitionDispatcher;
use crate::actuator::ActuatorController;
use crate::artifact::{encode_jpeg, DEFAULT_JPEG_QUALITY};
use crate::frame::{Frame, FrameBuffer};
use crate::overlay;
use crate::vision::{VisionService, NOT_RECOGNIZED};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
pub struct DetectionLoopConfig {
    /// Longest wait for a new frame before the stop flag is checked again.
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
}

impl Default for DetectionLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No new frame arrived within the poll interval.
    Idle,
    /// Encoding or detection failed; nothing was published or dispatched.
    Skipped,
    NoFaces,
    /// Number of recognition requests submitted.
    Dispatched(usize),
}

#[derive(Default)]
pub struct DetectionStats {
    cycles: AtomicU64,
    skipped: AtomicU64,
    empty: AtomicU64,
    faces: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DetectionSnapshot {
    pub cycles: u64,
    pub skipped: u64,
    pub empty: u64,
    pub faces: u64,
}

impl DetectionStats {
    pub fn snapshot(&self) -> DetectionSnapshot {
        DetectionSnapshot {
            cycles: self.cycles.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            empty: self.empty.load(Ordering::SeqCst),
            faces: self.faces.load(Ordering::SeqCst),
        }
    }
}

pub struct DetectionLoop {
    raw: Arc<FrameBuffer>,
    processed: Arc<FrameBuffer>,
    vision: Arc<dyn VisionService>,
    dispatcher: Arc<RecognitionDispatcher>,
    correlator: Arc<ResultCorrelator>,
    actuator: Arc<ActuatorController>,
    config: DetectionLoopConfig,
    seen: u64,
    cycle: u64,
    stats: Arc<DetectionStats>,
}

impl DetectionLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        raw: Arc<FrameBuffer>,
        processed: Arc<FrameBuffer>,
        vision: Arc<dyn VisionService>,
        dispatcher: Arc<RecognitionDispatcher>,
        correlator: Arc<ResultCorrelator>,
        actuator: Arc<ActuatorController>,
        config: DetectionLoopConfig,
    ) -> Self {
        let seen = raw.generation();
        Self {
            raw,
            processed,
            vision,
            dispatcher,
            correlator,
            actuator,
            config,
            seen,
            cycle: 0,
            stats: Arc::new(DetectionStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DetectionStats> {
        Arc::clone(&self.stats)
    }

    /// Run cycles until `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool) {
        log::info!("detection loop started");
        while !stop.load(Ordering::SeqCst) {
            self.run_cycle();
        }
        log::info!("detection loop stopped after {} cycles", self.cycle);
    }

    /// Wait for the next raw frame and process it.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        match self.raw.wait_newer(self.seen, self.config.poll_interval) {
            Some((generation, frame)) => {
                self.seen = generation;
                self.process(frame)
            }
            None => CycleOutcome::Idle,
        }
    }

    /// Process one snapshot.
    pub fn process(&mut self, snapshot: Frame) -> CycleOutcome {
        self.cycle += 1;
        self.stats.cycles.fetch_add(1, Ordering::SeqCst);
        let cycle = self.cycle;

        let jpeg = match encode_jpeg(snapshot.image(), self.config.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                self.stats.skipped.fetch_add(1, Ordering::SeqCst);
                log::warn!("cycle {}: frame encode failed: {:#}", cycle, e);
                return CycleOutcome::Skipped;
            }
        };

        let boxes = match self.vision.detect_faces(&jpeg) {
            Ok(boxes) => boxes,
            Err(e) => {
                self.stats.skipped.fetch_add(1, Ordering::SeqCst);
                log::warn!("cycle {}: detection failed, skipping: {:#}", cycle, e);
                return CycleOutcome::Skipped;
            }
        };

        if boxes.is_empty() {
            self.stats.empty.fetch_add(1, Ordering::SeqCst);
            log::debug!("cycle {}: no faces", cycle);
            if let Err(e) = self.actuator.disengage() {
                log::warn!("cycle {}: disengage failed: {:#}", cycle, e);
            }
            let mut view = snapshot.clone();
            overlay::draw_banner(view.image_mut(), NOT_RECOGNIZED);
            self.processed.set(view);
            return CycleOutcome::NoFaces;
        }

        log::debug!("cycle {}: {} face(s)", cycle, boxes.len());
        let mut annotated = snapshot.image().clone();
        for bbox in &boxes {
            overlay::draw_box(&mut annotated, bbox, overlay::BOX_COLOR);
        }
        let cycle_frame = CycleFrame::new(cycle, snapshot.captured_at(), annotated.clone());
        self.processed
            .set(Frame::captured(annotated, snapshot.captured_at()));

        let mut dispatched = 0;
        for (face_index, bbox) in boxes.into_iter().enumerate() {
            let face = crop_face(snapshot.image(), &bbox);
            let face_jpeg = match face
                .as_ref()
                .map(|face| encode_jpeg(face, self.config.jpeg_quality))
            {
                Some(Ok(jpeg)) => Some(jpeg),
                Some(Err(e)) => {
                    log::warn!("cycle {}: face {} encode failed: {:#}", cycle, face_index, e);
                    None
                }
                None => None,
            };
            let request = RecognitionRequest {
                context: DetectionContext {
                    cycle,
                    face_index,
                    bbox,
                    face,
                    frame: Arc::clone(&cycle_frame),
                },
                face_jpeg,
            };
            match self
                .dispatcher
                .submit(request, self.correlator.completion_handler())
            {
                Ok(()) => dispatched += 1,
                Err(e) => log::warn!(
                    "cycle {}: face {} not dispatched: {:#}",
                    cycle,
                    face_index,
                    e
                ),
            }
        }
        self.stats
            .faces
            .fetch_add(dispatched as u64, Ordering::SeqCst);
        CycleOutcome::Dispatched(dispatched)
    }
}

//! Turns a recognition result back into side effects for the face it came from.
//!
//! Per completion, in order: resolve the identity, label the cycle frame,
//! issue one actuator command, append one audit record, rewrite the
//! latest-frame artifact. A failing step is logged and the later steps still
//! run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::context::{DetectionContext, RecognitionResult};
use super::dispatcher::CompletionHandler;
use crate::actuator::ActuatorController;
use crate::artifact::FrameArtifact;
use crate::audit::{AuditSink, LogRecord};
use crate::overlay;
use crate::vision::NOT_RECOGNIZED;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    Recognized(String),
    NotRecognized,
}

impl Identity {
    /// First candidate, in service rank order, with a usable id.
    pub fn from_result(result: &RecognitionResult) -> Self {
        match result {
            RecognitionResult::Candidates(candidates) => candidates
                .iter()
                .find_map(|c| c.identity())
                .map(|id| Self::Recognized(id.to_string()))
                .unwrap_or(Self::NotRecognized),
            RecognitionResult::Failed(_) => Self::NotRecognized,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Recognized(name) => name,
            Self::NotRecognized => NOT_RECOGNIZED,
        }
    }

    fn record(&self) -> LogRecord {
        match self {
            Self::Recognized(name) => LogRecord::recognized(name),
            Self::NotRecognized => LogRecord::not_recognized(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub recognized: u64,
    pub not_recognized: u64,
    pub actuator_errors: u64,
    pub audit_errors: u64,
    pub artifact_errors: u64,
}

#[derive(Default)]
struct Counters {
    recognized: AtomicU64,
    not_recognized: AtomicU64,
    actuator_errors: AtomicU64,
    audit_errors: AtomicU64,
    artifact_errors: AtomicU64,
}

pub struct ResultCorrelator {
    actuator: Arc<ActuatorController>,
    audit: Arc<dyn AuditSink>,
    artifact: Option<Arc<FrameArtifact>>,
    counters: Counters,
}

impl ResultCorrelator {
    pub fn new(
        actuator: Arc<ActuatorController>,
        audit: Arc<dyn AuditSink>,
        artifact: Option<Arc<FrameArtifact>>,
    ) -> Self {
        Self {
            actuator,
            audit,
            artifact,
            counters: Counters::default(),
        }
    }

    /// Handler for one dispatched request, bound to this correlator.
    pub fn completion_handler(self: &Arc<Self>) -> CompletionHandler {
        let correlator = Arc::clone(self);
        Box::new(move |result: RecognitionResult, context: DetectionContext| {
            correlator.handle(result, context);
        })
    }

    pub fn handle(&self, result: RecognitionResult, context: DetectionContext) -> Identity {
        let identity = Identity::from_result(&result);
        match &identity {
            Identity::Recognized(name) => {
                self.counters.recognized.fetch_add(1, Ordering::SeqCst);
                log::info!(
                    "recognized {} (cycle {}, face {})",
                    name,
                    context.cycle,
                    context.face_index
                );
            }
            Identity::NotRecognized => {
                self.counters.not_recognized.fetch_add(1, Ordering::SeqCst);
                log::info!(
                    "face not recognized (cycle {}, face {})",
                    context.cycle,
                    context.face_index
                );
            }
        }

        let (revision, annotated) = context
            .frame
            .annotate(|img| overlay::draw_label(img, &context.bbox, identity.label()));

        let actuation = match identity {
            Identity::Recognized(_) => self.actuator.engage(),
            Identity::NotRecognized => self.actuator.disengage(),
        };
        if let Err(e) = actuation {
            self.counters.actuator_errors.fetch_add(1, Ordering::SeqCst);
            log::warn!("actuator command failed: {:#}", e);
        }

        if let Err(e) = self.audit.append(&identity.record()) {
            self.counters.audit_errors.fetch_add(1, Ordering::SeqCst);
            log::warn!("audit append failed: {:#}", e);
        }

        if let Some(artifact) = &self.artifact {
            match artifact.write((context.cycle, revision), &annotated) {
                Ok(true) => {}
                Ok(false) => log::debug!(
                    "latest frame for cycle {} already superseded",
                    context.cycle
                ),
                Err(e) => {
                    self.counters.artifact_errors.fetch_add(1, Ordering::SeqCst);
                    log::warn!("latest frame write failed: {:#}", e);
                }
            }
        }

        identity
    }

    pub fn stats(&self) -> CorrelatorStats {
        CorrelatorStats {
            recognized: self.counters.recognized.load(Ordering::SeqCst),
            not_recognized: self.counters.not_recognized.load(Ordering::SeqCst),
            actuator_errors: self.counters.actuator_errors.load(Ordering::SeqCst),
            audit_errors: self.counters.audit_errors.load(Ordering::SeqCst),
            artifact_errors: self.counters.artifact_errors.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActuatorState, NullChannel};
    use crate::audit::{MemoryAuditLog, RecognitionStatus};
    use crate::pipeline::context::CycleFrame;
    use crate::vision::{BoundingBox, Candidate};
    use anyhow::{anyhow, Result};
    use image::RgbImage;
    use std::time::SystemTime;

    struct FailingAudit;

    impl AuditSink for FailingAudit {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn append(&self, _record: &LogRecord) -> Result<()> {
            Err(anyhow!("read-only filesystem"))
        }
    }

    fn context(frame: &Arc<CycleFrame>) -> DetectionContext {
        DetectionContext {
            cycle: 7,
            face_index: 0,
            bbox: BoundingBox::new(20, 40, 60, 80),
            face: None,
            frame: Arc::clone(frame),
        }
    }

    #[test]
    fn identity_skips_reserved_candidates() {
        let result = RecognitionResult::Candidates(vec![
            Candidate::new("unknown", 0.95),
            Candidate::new("Not Recognized", 0.9),
            Candidate::new("alice", 0.7),
            Candidate::new("bob", 0.65),
        ]);
        assert_eq!(
            Identity::from_result(&result),
            Identity::Recognized("alice".to_string())
        );
        assert_eq!(
            Identity::from_result(&RecognitionResult::Candidates(Vec::new())),
            Identity::NotRecognized
        );
        assert_eq!(
            Identity::from_result(&RecognitionResult::Failed("timeout".to_string())),
            Identity::NotRecognized
        );
    }

    #[test]
    fn recognized_face_engages_logs_and_labels() {
        let actuator = Arc::new(ActuatorController::new(Box::new(NullChannel), 0));
        let audit = Arc::new(MemoryAuditLog::new());
        let dir = tempfile::tempdir().unwrap();
        let artifact = Arc::new(FrameArtifact::new(dir.path().join("latest_frame.jpg"), 80));
        let correlator = ResultCorrelator::new(
            Arc::clone(&actuator),
            audit.clone(),
            Some(Arc::clone(&artifact)),
        );

        let frame = CycleFrame::new(7, SystemTime::now(), RgbImage::new(128, 128));
        let identity = correlator.handle(
            RecognitionResult::Candidates(vec![Candidate::new("alice", 0.8)]),
            context(&frame),
        );

        assert_eq!(identity, Identity::Recognized("alice".to_string()));
        assert_eq!(actuator.state(), ActuatorState::Engaged);
        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "alice");
        assert_eq!(records[0].status, RecognitionStatus::Recognized);
        assert!(frame.snapshot().pixels().any(|p| p.0 != [0, 0, 0]));
        assert!(artifact.path().exists());
    }

    #[test]
    fn audit_failure_does_not_skip_actuation_or_artifact() {
        let actuator = Arc::new(ActuatorController::new(Box::new(NullChannel), 0));
        let dir = tempfile::tempdir().unwrap();
        let artifact = Arc::new(FrameArtifact::new(dir.path().join("latest_frame.jpg"), 80));
        let correlator = ResultCorrelator::new(
            Arc::clone(&actuator),
            Arc::new(FailingAudit),
            Some(Arc::clone(&artifact)),
        );
        let frame = CycleFrame::new(7, SystemTime::now(), RgbImage::new(128, 128));
        correlator.handle(RecognitionResult::Candidates(Vec::new()), context(&frame));

        assert_eq!(actuator.state(), ActuatorState::Disengaged);
        assert!(artifact.path().exists());
        assert_eq!(correlator.stats().audit_errors, 1);
        assert_eq!(correlator.stats().not_recognized, 1);
    }
}

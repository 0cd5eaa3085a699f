//! The frame-processing pipeline.
//!
//! ```text
//! FrameSource -> raw FrameBuffer -> DetectionLoop --+--> processed FrameBuffer -> DisplayLoop
//!                                                   |
//!                                                   +--> RecognitionDispatcher (N workers)
//!                                                           -> ResultCorrelator
//!                                                               -> actuator, audit log, artifact
//! ```

pub mod context;
pub mod correlator;
pub mod detection;
pub mod dispatcher;
pub mod display;

pub use context::{CycleFrame, DetectionContext, RecognitionRequest, RecognitionResult};
pub use correlator::{CorrelatorStats, Identity, ResultCorrelator};
pub use detection::{CycleOutcome, DetectionLoop, DetectionLoopConfig, DetectionStats};
pub use dispatcher::{
    CompletionHandler, DispatcherConfig, DispatcherStats, RecognitionDispatcher, ShutdownReport,
};
pub use display::{spawn_quit_watcher, DisplayLoop, FrameSink, JpegFileSink, NullSink};

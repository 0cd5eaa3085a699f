//! facegate
//!
//! Live face-recognition access pipeline. Frames arrive as base64 JPEG
//! payloads over MQTT, faces are detected and recognized by an external
//! vision HTTP service, and each recognition drives a door-lock actuator and
//! appends an audit record.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and the single-slot, latest-wins `FrameBuffer`
//! - `ingest`: payload decoding, MQTT subscription, directory replay
//! - `vision`: vision service contract and its HTTP client
//! - `pipeline`: detection loop, recognition worker pool, result correlation, display
//! - `actuator`: serialized actuator control over pluggable channels
//! - `audit`: append-only audit sinks (CSV, hash-chained SQLite)
//! - `overlay`: box, label and timestamp drawing
//! - `artifact`: JPEG encoding and the latest-frame artifact
//! - `transport`: MQTT broker addressing and TLS
//! - `config`: `FacegateConfig` (file + environment)
//! - `report`, `verify`: offline audit tooling

pub mod actuator;
pub mod artifact;
pub mod audit;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod pipeline;
pub mod report;
pub mod transport;
pub mod verify;
pub mod vision;

pub use actuator::{ActuatorCommand, ActuatorController, ActuatorState, CommandChannel};
pub use audit::{AuditSink, LogRecord, RecognitionStatus};
pub use config::FacegateConfig;
pub use frame::{Frame, FrameBuffer};
pub use ingest::FrameSource;
pub use pipeline::{
    DetectionLoop, DisplayLoop, RecognitionDispatcher, RecognitionResult, ResultCorrelator,
};
pub use vision::{BoundingBox, Candidate, HttpVisionClient, VisionService};

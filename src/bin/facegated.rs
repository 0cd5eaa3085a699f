//! facegated - face-recognition door access daemon
//!
//! This daemon:
//! 1. Ingests base64 JPEG frames from an MQTT topic (or replays a directory)
//! 2. Runs single-flight face detection on the newest frame
//! 3. Fans recognition requests out to a bounded worker pool
//! 4. Engages the lock actuator on every recognized face
//! 5. Appends one audit record per recognition and publishes the annotated frame
//!
//! Configuration comes from `FACEGATE_CONFIG` (JSON or TOML) plus
//! `FACEGATE_*` environment overrides. Stop with Ctrl-C or `q` on stdin.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use facegate::actuator::{
    MqttChannel, MqttChannelConfig, NullChannel, ProcessChannel, ProcessChannelConfig,
};
use facegate::artifact::FrameArtifact;
use facegate::audit::{AuditSink, CsvAuditLog, FanoutAuditLog, SqliteAuditLog};
use facegate::config::{ActuatorKind, FacegateConfig};
use facegate::ingest::{MqttIngest, MqttIngestConfig, ReplayConfig, ReplaySource};
use facegate::pipeline::{
    spawn_quit_watcher, DetectionLoopConfig, FrameSink, JpegFileSink, NullSink,
};
use facegate::{
    ActuatorController, CommandChannel, DetectionLoop, DisplayLoop, FrameBuffer, FrameSource,
    HttpVisionClient, RecognitionDispatcher, ResultCorrelator, VisionService,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

enum Ingest {
    Mqtt(MqttIngest),
    Replay(JoinHandle<()>),
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = FacegateConfig::load()?;

    let actuator = Arc::new(build_actuator(&cfg)?);
    log::info!("actuator channel: {}", actuator.channel_name());
    if let Err(e) = actuator.disengage() {
        log::warn!("startup disengage failed: {:#}", e);
    }

    let audit = build_audit(&cfg)?;
    let artifact = cfg
        .artifacts
        .latest_frame
        .as_ref()
        .map(|path| Arc::new(FrameArtifact::new(path, cfg.pipeline.jpeg_quality)));

    let vision: Arc<dyn VisionService> =
        Arc::new(HttpVisionClient::new(cfg.vision.client_config())?);
    log::info!("vision service: {}", cfg.vision.url);

    let dispatcher = Arc::new(RecognitionDispatcher::spawn(
        cfg.pipeline.dispatcher_config(cfg.vision.min_confidence),
        Arc::clone(&vision),
    )?);
    let correlator = Arc::new(ResultCorrelator::new(
        Arc::clone(&actuator),
        audit,
        artifact,
    ));

    let raw = Arc::new(FrameBuffer::new("raw"));
    let processed = Arc::new(FrameBuffer::new("processed"));
    let source = Arc::new(FrameSource::with_size(
        Arc::clone(&raw),
        cfg.pipeline.width,
        cfg.pipeline.height,
    ));

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            stop.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }
    spawn_quit_watcher(Arc::clone(&stop))?;

    let mut detection = DetectionLoop::new(
        Arc::clone(&raw),
        Arc::clone(&processed),
        Arc::clone(&vision),
        Arc::clone(&dispatcher),
        Arc::clone(&correlator),
        Arc::clone(&actuator),
        DetectionLoopConfig {
            poll_interval: cfg.pipeline.poll_interval,
            jpeg_quality: cfg.pipeline.jpeg_quality,
        },
    );
    let detection_stats = detection.stats();
    let detection_handle = std::thread::Builder::new()
        .name("detection".to_string())
        .spawn({
            let stop = Arc::clone(&stop);
            move || detection.run(&stop)
        })
        .context("spawn detection thread")?;

    let ingest = start_ingest(&cfg, Arc::clone(&source), Arc::clone(&stop))?;

    let sink: Box<dyn FrameSink> = match &cfg.artifacts.preview {
        Some(path) => {
            log::info!("preview frames written to {}", path.display());
            Box::new(JpegFileSink::new(path, cfg.pipeline.jpeg_quality))
        }
        None => Box::new(NullSink),
    };
    let mut display = DisplayLoop::new(
        Arc::clone(&raw),
        Arc::clone(&processed),
        sink,
        cfg.artifacts.display_interval,
    );

    log::info!(
        "facegated running. workers={} queue={} frame={}x{}",
        cfg.pipeline.workers,
        cfg.pipeline.queue_capacity,
        cfg.pipeline.width,
        cfg.pipeline.height
    );

    let mut last_health_log = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        display.tick();

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let ingest_stats = source.stats();
            let detect = detection_stats.snapshot();
            let dispatch = dispatcher.stats();
            let outcome = correlator.stats();
            log::info!(
                "ingest frames={} dropped={} | detect cycles={} skipped={} faces={} | recognize pending={} failed={} | recognized={} not_recognized={} actuator={}",
                ingest_stats.frames_ingested,
                ingest_stats.payloads_dropped,
                detect.cycles,
                detect.skipped,
                detect.faces,
                dispatch.pending(),
                dispatch.failed,
                outcome.recognized,
                outcome.not_recognized,
                actuator.state()
            );
            last_health_log = Instant::now();
        }

        facegate::transport::sleep_unless_stopped(&stop, cfg.artifacts.display_interval);
    }

    log::info!("stopping facegated...");
    if detection_handle.join().is_err() {
        log::error!("detection thread panicked");
    }
    match ingest {
        Ingest::Mqtt(ingest) => ingest.join(),
        Ingest::Replay(handle) => {
            if handle.join().is_err() {
                log::error!("replay thread panicked");
            }
        }
    }

    let report = dispatcher.shutdown(cfg.pipeline.shutdown_grace);
    if report.abandoned > 0 {
        log::warn!(
            "{} recognition workers still busy after {:?}; {} requests unfinished",
            report.abandoned,
            cfg.pipeline.shutdown_grace,
            report.unfinished
        );
    }
    if let Err(e) = actuator.disengage() {
        log::warn!("shutdown disengage failed: {:#}", e);
    }
    let outcome = correlator.stats();
    log::info!(
        "facegated stopped. recognized={} not_recognized={} audit_errors={}",
        outcome.recognized,
        outcome.not_recognized,
        outcome.audit_errors
    );
    Ok(())
}

fn build_actuator(cfg: &FacegateConfig) -> Result<ActuatorController> {
    let settings = &cfg.actuator;
    let channel: Box<dyn CommandChannel> = match settings.kind {
        ActuatorKind::None => {
            log::warn!("no actuator configured; lock commands are logged only");
            Box::new(NullChannel)
        }
        ActuatorKind::Command => Box::new(ProcessChannel::new(ProcessChannelConfig {
            engage: settings.engage_command.clone(),
            disengage: settings.disengage_command.clone(),
            timeout: settings.timeout,
        })?),
        ActuatorKind::Mqtt => {
            let mqtt = cfg
                .mqtt
                .settings()?
                .with_client_id(format!("{}-actuator", cfg.mqtt.client_id));
            Box::new(MqttChannel::connect(MqttChannelConfig {
                mqtt,
                topic: settings.topic.clone(),
                engage_payload: settings.engage_payload.clone(),
                disengage_payload: settings.disengage_payload.clone(),
                retain: settings.retain,
                ack_timeout: settings.timeout,
            })?)
        }
    };
    Ok(ActuatorController::new(channel, settings.retries))
}

fn build_audit(cfg: &FacegateConfig) -> Result<Arc<dyn AuditSink>> {
    let mut sinks: Vec<Arc<dyn AuditSink>> = Vec::new();
    if let Some(path) = &cfg.audit.csv_path {
        sinks.push(Arc::new(CsvAuditLog::open(path)?));
        log::info!("audit csv: {}", path.display());
    }
    if let Some(path) = &cfg.audit.db_path {
        sinks.push(Arc::new(SqliteAuditLog::open(path)?));
        log::info!("audit db: {}", path.display());
    }
    let fanout = FanoutAuditLog::new(sinks);
    if fanout.is_empty() {
        log::warn!("all audit outputs disabled; recognitions will not be recorded");
    }
    Ok(Arc::new(fanout))
}

fn start_ingest(
    cfg: &FacegateConfig,
    source: Arc<FrameSource>,
    stop: Arc<AtomicBool>,
) -> Result<Ingest> {
    if let Some(replay) = &cfg.replay {
        let replay = ReplaySource::open(ReplayConfig {
            dir: replay.dir.clone(),
            fps: replay.fps,
            looped: replay.looped,
        })?;
        let handle = std::thread::Builder::new()
            .name("ingest-replay".to_string())
            .spawn(move || {
                let fed = replay.run(&source, &stop);
                log::info!("replay finished after {} frames", fed);
            })
            .context("spawn replay thread")?;
        return Ok(Ingest::Replay(handle));
    }

    let ingest = MqttIngest::spawn(
        MqttIngestConfig {
            mqtt: cfg.mqtt.settings()?,
            topic: cfg.mqtt.topic.clone(),
        },
        source,
        stop,
    )?;
    log::info!("subscribing to {} on {}", cfg.mqtt.topic, cfg.mqtt.broker);
    Ok(Ingest::Mqtt(ingest))
}

//! Bounded recognition worker pool.
//!
//! `submit` enqueues onto a bounded channel and only blocks while the queue
//! is full (block-submitter backpressure); requests are never dropped. Each
//! worker performs one blocking recognition call per request and then runs
//! the request's completion handler on the worker thread.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::context::{DetectionContext, RecognitionRequest, RecognitionResult};
use crate::vision::VisionService;

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.6;

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub min_confidence: f32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Runs once per request, on the worker that executed it.
pub type CompletionHandler = Box<dyn FnOnce(RecognitionResult, DetectionContext) + Send>;

struct Job {
    request: RecognitionRequest,
    on_complete: CompletionHandler,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    handler_panics: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub handler_panics: u64,
}

impl DispatcherStats {
    pub fn pending(&self) -> u64 {
        self.submitted.saturating_sub(self.completed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that exited within the grace period.
    pub exited: usize,
    /// Workers still running when the grace period ended.
    pub abandoned: usize,
    /// Requests submitted but not completed when the grace period ended.
    pub unfinished: u64,
}

pub struct RecognitionDispatcher {
    queue: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    exits: Receiver<()>,
    counters: Arc<Counters>,
}

// Signals worker exit even if the worker thread unwinds.
struct ExitGuard(Sender<()>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

impl RecognitionDispatcher {
    pub fn spawn(config: DispatcherConfig, service: Arc<dyn VisionService>) -> Result<Self> {
        if config.workers == 0 {
            return Err(anyhow!("recognition dispatcher needs at least one worker"));
        }
        let (tx, rx) = bounded::<Job>(config.queue_capacity);
        let (exit_tx, exit_rx) = bounded::<()>(config.workers);
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::with_capacity(config.workers);
        for idx in 0..config.workers {
            let rx = rx.clone();
            let service = Arc::clone(&service);
            let counters = Arc::clone(&counters);
            let guard = ExitGuard(exit_tx.clone());
            let min_confidence = config.min_confidence;
            let handle = std::thread::Builder::new()
                .name(format!("recognize-{}", idx))
                .spawn(move || {
                    let _guard = guard;
                    for job in rx.iter() {
                        run_job(job, service.as_ref(), min_confidence, &counters);
                    }
                })
                .with_context(|| format!("spawn recognition worker {}", idx))?;
            workers.push(handle);
        }

        log::info!(
            "recognition dispatcher: {} workers, queue capacity {}",
            config.workers,
            config.queue_capacity
        );
        Ok(Self {
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            exits: exit_rx,
            counters,
        })
    }

    /// Enqueue `request`. Blocks only while the queue is full.
    pub fn submit(&self, request: RecognitionRequest, on_complete: CompletionHandler) -> Result<()> {
        let sender = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| anyhow!("recognition dispatcher is shut down"))?;
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        if sender.send(Job { request, on_complete }).is_err() {
            self.counters.submitted.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!("recognition workers have exited"));
        }
        Ok(())
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            handler_panics: self.counters.handler_panics.load(Ordering::SeqCst),
        }
    }

    /// Submitted requests whose completion handler has not finished yet.
    pub fn pending(&self) -> u64 {
        self.stats().pending()
    }

    /// Close the queue and wait up to `grace` for workers to drain it.
    ///
    /// Workers still busy when the grace period ends are detached, not joined.
    pub fn shutdown(&self, grace: Duration) -> ShutdownReport {
        drop(self.queue.lock().unwrap_or_else(PoisonError::into_inner).take());

        let mut workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let total = workers.len();
        let deadline = Instant::now() + grace;
        let mut exited = 0;
        while exited < total {
            if self.exits.recv_deadline(deadline).is_err() {
                break;
            }
            exited += 1;
        }

        for handle in workers.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }

        let report = ShutdownReport {
            exited,
            abandoned: total - exited,
            unfinished: self.pending(),
        };
        if report.abandoned > 0 {
            log::warn!(
                "recognition dispatcher: abandoned {} busy workers ({} requests unfinished)",
                report.abandoned,
                report.unfinished
            );
        } else {
            log::info!("recognition dispatcher drained");
        }
        report
    }
}

fn run_job(job: Job, service: &dyn VisionService, min_confidence: f32, counters: &Counters) {
    let Job {
        request,
        on_complete,
    } = job;
    let RecognitionRequest { context, face_jpeg } = request;

    let result = match face_jpeg {
        None => RecognitionResult::Failed("face crop is empty".to_string()),
        Some(jpeg) => {
            match catch_unwind(AssertUnwindSafe(|| {
                service.recognize_face(&jpeg, min_confidence)
            })) {
                Ok(Ok(candidates)) => RecognitionResult::Candidates(candidates),
                Ok(Err(e)) => RecognitionResult::Failed(format!("{:#}", e)),
                Err(_) => RecognitionResult::Failed("recognition call panicked".to_string()),
            }
        }
    };
    if let RecognitionResult::Failed(reason) = &result {
        counters.failed.fetch_add(1, Ordering::SeqCst);
        log::warn!(
            "recognition failed (cycle {}, face {}): {}",
            context.cycle,
            context.face_index,
            reason
        );
    }

    if catch_unwind(AssertUnwindSafe(move || on_complete(result, context))).is_err() {
        counters.handler_panics.fetch_add(1, Ordering::SeqCst);
        log::error!("recognition completion handler panicked");
    }
    counters.completed.fetch_add(1, Ordering::SeqCst);
}

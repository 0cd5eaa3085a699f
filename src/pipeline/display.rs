//! Display loop: renders the most useful current view at a fixed rate.

use anyhow::{Context, Result};
use image::RgbImage;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::artifact::{encode_jpeg, write_atomic};
use crate::frame::FrameBuffer;
use crate::overlay;
use crate::transport::sleep_unless_stopped;

pub const DEFAULT_DISPLAY_INTERVAL: Duration = Duration::from_millis(100);

/// Destination for rendered views.
pub trait FrameSink: Send {
    fn render(&mut self, view: &RgbImage) -> Result<()>;
}

/// Discards every view.
#[derive(Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn render(&mut self, _view: &RgbImage) -> Result<()> {
        Ok(())
    }
}

/// Atomically rewrites a JPEG preview file.
pub struct JpegFileSink {
    path: PathBuf,
    quality: u8,
}

impl JpegFileSink {
    pub fn new(path: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            path: path.into(),
            quality,
        }
    }
}

impl FrameSink for JpegFileSink {
    fn render(&mut self, view: &RgbImage) -> Result<()> {
        let bytes = encode_jpeg(view, self.quality)?;
        write_atomic(&self.path, &bytes)
    }
}

pub struct DisplayLoop {
    raw: Arc<FrameBuffer>,
    processed: Arc<FrameBuffer>,
    sink: Box<dyn FrameSink>,
    interval: Duration,
    rendered: u64,
}

impl DisplayLoop {
    pub fn new(
        raw: Arc<FrameBuffer>,
        processed: Arc<FrameBuffer>,
        sink: Box<dyn FrameSink>,
        interval: Duration,
    ) -> Self {
        Self {
            raw,
            processed,
            sink,
            interval,
            rendered: 0,
        }
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    /// The view for this tick: the processed frame when one exists, otherwise
    /// the raw frame stamped with the current time.
    pub fn compose(&self) -> Option<RgbImage> {
        if let Some(processed) = self.processed.try_snapshot() {
            return Some(processed.into_image());
        }
        let mut raw = self.raw.try_snapshot()?.into_image();
        let stamp = chrono::Local::now()
            .format(crate::audit::TIMESTAMP_FORMAT)
            .to_string();
        overlay::draw_timestamp(&mut raw, &stamp);
        Some(raw)
    }

    /// Render one view. Returns whether anything was rendered.
    pub fn tick(&mut self) -> bool {
        let Some(view) = self.compose() else {
            return false;
        };
        match self.sink.render(&view) {
            Ok(()) => {
                self.rendered += 1;
                true
            }
            Err(e) => {
                log::warn!("display render failed: {:#}", e);
                false
            }
        }
    }

    pub fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::SeqCst) {
            self.tick();
            sleep_unless_stopped(stop, self.interval);
        }
        log::debug!("display loop stopped after {} renders", self.rendered);
    }
}

/// Set `stop` when a line starting with `q` is read from stdin.
///
/// The watcher thread is detached; it exits on `q` or end of input.
pub fn spawn_quit_watcher(stop: Arc<AtomicBool>) -> Result<()> {
    std::thread::Builder::new()
        .name("quit-watcher".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().eq_ignore_ascii_case("q") {
                    log::info!("quit requested");
                    stop.store(true, Ordering::SeqCst);
                    break;
                }
            }
        })
        .context("spawn quit watcher")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use image::Rgb;
    use std::sync::Mutex;

    struct Capture(Arc<Mutex<Vec<RgbImage>>>);

    impl FrameSink for Capture {
        fn render(&mut self, view: &RgbImage) -> Result<()> {
            self.0.lock().unwrap().push(view.clone());
            Ok(())
        }
    }

    fn display() -> (DisplayLoop, Arc<FrameBuffer>, Arc<FrameBuffer>, Arc<Mutex<Vec<RgbImage>>>) {
        let raw = Arc::new(FrameBuffer::new("raw"));
        let processed = Arc::new(FrameBuffer::new("processed"));
        let views = Arc::new(Mutex::new(Vec::new()));
        let display = DisplayLoop::new(
            Arc::clone(&raw),
            Arc::clone(&processed),
            Box::new(Capture(Arc::clone(&views))),
            Duration::from_millis(1),
        );
        (display, raw, processed, views)
    }

    #[test]
    fn nothing_to_render_before_first_frame() {
        let (mut display, _, _, views) = display();
        assert!(!display.tick());
        assert!(views.lock().unwrap().is_empty());
    }

    #[test]
    fn raw_frame_gets_timestamp() {
        let (mut display, raw, _, views) = display();
        raw.set(Frame::new(RgbImage::new(200, 60)));
        assert!(display.tick());
        let views = views.lock().unwrap();
        assert!(views[0].pixels().any(|p| *p == overlay::TIMESTAMP_COLOR));
    }

    #[test]
    fn processed_frame_is_preferred() {
        let (mut display, raw, processed, views) = display();
        raw.set(Frame::new(RgbImage::new(8, 8)));
        processed.set(Frame::new(RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]))));
        display.tick();
        assert_eq!(views.lock().unwrap()[0].get_pixel(0, 0), &Rgb([1, 2, 3]));
    }

    #[test]
    fn run_stops_on_flag() {
        let (mut display, raw, _, _) = display();
        raw.set(Frame::new(RgbImage::new(8, 8)));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                display.run(&stop);
                display.rendered()
            })
        };
        std::thread::sleep(Duration::from_millis(30));
        stop.store(true, Ordering::SeqCst);
        assert!(handle.join().unwrap() > 0);
    }

    #[test]
    fn jpeg_sink_writes_preview() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");
        let mut sink = JpegFileSink::new(&path, 75);
        sink.render(&RgbImage::new(10, 10)).unwrap();
        assert!(path.exists());
    }
}

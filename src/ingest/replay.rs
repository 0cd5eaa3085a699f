//! Directory replay: feeds JPEG files to a `FrameSource` at a fixed rate.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::FrameSource;
use crate::transport::sleep_unless_stopped;

#[derive(Clone, Debug)]
pub struct ReplayConfig {
    pub dir: PathBuf,
    pub fps: u32,
    /// Start over after the last file instead of stopping.
    pub looped: bool,
}

pub struct ReplaySource {
    files: Vec<PathBuf>,
    interval: Duration,
    looped: bool,
}

impl ReplaySource {
    pub fn open(config: ReplayConfig) -> Result<Self> {
        if config.fps == 0 {
            return Err(anyhow!("replay fps must be greater than zero"));
        }
        let files = list_jpegs(&config.dir)?;
        if files.is_empty() {
            return Err(anyhow!("no .jpg/.jpeg files in {}", config.dir.display()));
        }
        log::info!(
            "replaying {} frames from {} at {} fps",
            files.len(),
            config.dir.display(),
            config.fps
        );
        Ok(Self {
            files,
            interval: Duration::from_secs(1) / config.fps,
            looped: config.looped,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Feed files until the list is exhausted (or forever when looping) or
    /// `stop` is set. Returns the number of files handed to the source.
    pub fn run(&self, source: &FrameSource, stop: &AtomicBool) -> u64 {
        let mut fed = 0;
        loop {
            for path in &self.files {
                if stop.load(Ordering::SeqCst) {
                    return fed;
                }
                match std::fs::read(path) {
                    Ok(bytes) => {
                        if let Err(e) = source.ingest_jpeg(&bytes) {
                            log::warn!("replay: skipping {}: {:#}", path.display(), e);
                        }
                    }
                    Err(e) => log::warn!("replay: cannot read {}: {}", path.display(), e),
                }
                fed += 1;
                sleep_unless_stopped(stop, self.interval);
            }
            if !self.looped {
                return fed;
            }
        }
    }
}

fn list_jpegs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("read replay dir {}", dir.display()))?
    {
        let path = entry?.path();
        let is_jpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false);
        if is_jpeg && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

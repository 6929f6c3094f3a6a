//! Seam to the platform media player. Only validated local paths cross it.

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info, warn};

/// Platform playback transport (decoding and output live behind this trait).
pub trait PlaybackTransport: Send {
    /// Loads a local file; returns `false` when the transport rejects it.
    fn load(&mut self, path: &Path) -> bool;
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    /// Volume in percent, `0..=100`.
    fn set_volume(&mut self, volume: u8);
    fn set_position(&mut self, position_ms: u64);
    fn position(&self) -> u64;
    fn duration(&self) -> u64;
    fn is_playing(&self) -> bool;
}

/// Converts a `0..=100` seek-bar value into a position for the current track.
pub fn position_for_progress(duration_ms: u64, progress_percent: u8) -> u64 {
    let percent = u64::from(progress_percent.min(100));
    duration_ms.saturating_mul(percent) / 100
}

/// Inverse of [`position_for_progress`], used to drive the seek bar.
pub fn progress_for_position(position_ms: u64, duration_ms: u64) -> u8 {
    if duration_ms == 0 {
        return 0;
    }
    (position_ms.min(duration_ms).saturating_mul(100) / duration_ms) as u8
}

/// Headless transport for the command-line front end: keeps transport state
/// and logs every change instead of producing sound.
///
/// Duration is estimated from the file size at a nominal bitrate and the
/// position follows the wall clock while playing.
#[derive(Debug, Default)]
pub struct LoggingTransport {
    current: Option<PathBuf>,
    playing_since: Option<Instant>,
    volume: u8,
    position_ms: u64,
    duration_ms: u64,
}

const NOMINAL_KBPS: u64 = 128;

impl LoggingTransport {
    pub fn new() -> Self {
        Self {
            volume: 100,
            ..Self::default()
        }
    }

    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    fn estimate_duration_ms(path: &Path) -> u64 {
        std::fs::metadata(path)
            .map(|metadata| metadata.len().saturating_mul(8) / NOMINAL_KBPS)
            .unwrap_or(0)
    }

    /// Folds the running clock into `position_ms`.
    fn settle_position(&mut self) {
        self.position_ms = self.position();
        self.playing_since = None;
    }
}

impl PlaybackTransport for LoggingTransport {
    fn load(&mut self, path: &Path) -> bool {
        if !path.is_file() {
            warn!("Transport refused {}: not a file", path.display());
            return false;
        }
        info!("Transport loaded {}", path.display());
        self.current = Some(path.to_path_buf());
        self.playing_since = None;
        self.position_ms = 0;
        self.duration_ms = Self::estimate_duration_ms(path);
        true
    }

    fn play(&mut self) {
        if self.current.is_some() && self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        self.settle_position();
    }

    fn stop(&mut self) {
        if self.playing_since.is_some() {
            debug!("Transport stopped");
        }
        self.playing_since = None;
        self.position_ms = 0;
    }

    fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
        debug!("Transport volume {}", self.volume);
    }

    fn set_position(&mut self, position_ms: u64) {
        self.position_ms = position_ms.min(self.duration_ms);
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn position(&self) -> u64 {
        let elapsed = self
            .playing_since
            .map(|since| since.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.position_ms.saturating_add(elapsed).min(self.duration_ms)
    }

    fn duration(&self) -> u64 {
        self.duration_ms
    }

    fn is_playing(&self) -> bool {
        self.playing_since.is_some() && self.position() < self.duration_ms
    }
}

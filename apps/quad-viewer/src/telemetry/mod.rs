use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::pipeline::layout::CELL_COUNT;
use crate::source::{SourceSet, SourceSnapshot, VideoSource};

pub const DEFAULT_WINDOW_FRAMES: usize = 30;

pub const NO_SIGNAL_TEXT: &str = "NO SIGNAL";
pub const IDLE_TEXT: &str = "IDLE";

/// Fixed-length window over the most recent frame arrival times
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    arrivals: VecDeque<Duration>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            arrivals: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, arrival: Duration) {
        if self.arrivals.len() == self.capacity {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(arrival);
    }

    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }

    pub fn span(&self) -> Duration {
        match (self.arrivals.front(), self.arrivals.back()) {
            (Some(first), Some(last)) => last.saturating_sub(*first),
            _ => Duration::ZERO,
        }
    }

    /// Frames in the window divided by the time the window covers
    pub fn fps(&self) -> f64 {
        let span = self.span().as_secs_f64();
        if self.arrivals.len() < 2 || span <= 0.0 {
            return 0.0;
        }
        self.arrivals.len() as f64 / span
    }

    pub fn clear(&mut self) {
        self.arrivals.clear();
    }
}

pub fn format_overlay_text(fps: f64, latency: Duration) -> String {
    format!("{:.1} fps / {} ms", fps, latency.as_millis())
}

/// Frame rate and latency per source, each behind its own lock
#[derive(Debug)]
pub struct TelemetryTracker {
    sources: [Arc<VideoSource>; CELL_COUNT],
}

impl TelemetryTracker {
    pub fn new(sources: &SourceSet, window_frames: usize) -> Self {
        let descriptors = sources.descriptors();
        let sources = std::array::from_fn(|cell| {
            Arc::new(VideoSource::new(descriptors[cell].clone(), window_frames))
        });
        Self { sources }
    }

    /// Record one frame for `index`.
    ///
    /// Latency is clamped at zero when the capture timestamp is ahead of the
    /// arrival timestamp. Frames for a disabled or idle source come from its
    /// stand-in and are ignored.
    pub fn record_frame(&self, index: usize, capture: Duration, arrival: Duration) {
        let Some(source) = self.sources.get(index) else {
            debug!("Ignoring frame for unknown source index {}", index);
            return;
        };

        let mut record = source.record.lock();
        if !record.enabled || record.idle {
            return;
        }

        record.window.push(arrival);
        record.fps = record.window.fps();
        record.latency = arrival.saturating_sub(capture);
        record.last_frame = Some(arrival);
        record.frames += 1;
    }

    pub fn render_overlay_text(&self, index: usize) -> String {
        let Some(source) = self.sources.get(index) else {
            return String::new();
        };

        let record = source.record.lock();
        if !record.enabled {
            NO_SIGNAL_TEXT.to_string()
        } else if record.idle {
            IDLE_TEXT.to_string()
        } else {
            format_overlay_text(record.fps, record.latency)
        }
    }

    /// Mark a source as lost; it stays disabled for the rest of the pipeline's life
    pub fn disable(&self, index: usize) {
        if let Some(source) = self.sources.get(index) {
            let mut record = source.record.lock();
            if record.enabled {
                warn!("Source {} ({}) disabled", index, source.descriptor().identifier());
            }
            record.enabled = false;
            record.fps = 0.0;
            record.window.clear();
        }
    }

    /// Mark a source as having reached end-of-stream
    pub fn mark_idle(&self, index: usize) {
        if let Some(source) = self.sources.get(index) {
            let mut record = source.record.lock();
            if !record.idle {
                info!("Source {} ({}) went idle", index, source.descriptor().identifier());
            }
            record.idle = true;
            record.fps = 0.0;
            record.window.clear();
        }
    }

    pub fn snapshot(&self, index: usize) -> Option<SourceSnapshot> {
        self.sources.get(index).map(|s| s.snapshot())
    }

    pub fn snapshots(&self) -> Vec<SourceSnapshot> {
        self.sources.iter().map(|s| s.snapshot()).collect()
    }
}

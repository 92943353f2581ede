use parking_lot::Mutex;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::pipeline::layout::{Dimensions, CELL_COUNT};
use crate::telemetry::RollingWindow;
use crate::QuadViewerError;

/// Where a branch takes its frames from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// V4L2 capture device, e.g. `/dev/video0`
    Device(String),
    /// Live `videotestsrc` with the given pattern nick
    TestPattern(String),
}

impl SourceKind {
    pub fn factory_name(&self) -> &'static str {
        match self {
            SourceKind::Device(_) => "v4l2src",
            SourceKind::TestPattern(_) => "videotestsrc",
        }
    }
}

/// Static description of one capture source and the grid cell it feeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub cell: usize,
    pub target: Dimensions,
}

impl SourceDescriptor {
    pub fn device(path: impl Into<String>, cell: usize, target: Dimensions) -> Self {
        Self {
            kind: SourceKind::Device(path.into()),
            cell,
            target,
        }
    }

    pub fn test_pattern(pattern: impl Into<String>, cell: usize, target: Dimensions) -> Self {
        Self {
            kind: SourceKind::TestPattern(pattern.into()),
            cell,
            target,
        }
    }

    /// Human readable identifier used in logs and status output
    pub fn identifier(&self) -> String {
        match &self.kind {
            SourceKind::Device(path) => path.clone(),
            SourceKind::TestPattern(pattern) => format!("test:{}", pattern),
        }
    }
}

/// Exactly one descriptor per grid cell, ordered by cell index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    descriptors: [SourceDescriptor; CELL_COUNT],
}

impl SourceSet {
    pub fn new(mut descriptors: Vec<SourceDescriptor>) -> crate::Result<Self> {
        if descriptors.len() != CELL_COUNT {
            return Err(QuadViewerError::ConfigError(format!(
                "expected exactly {} sources, got {}",
                CELL_COUNT,
                descriptors.len()
            )));
        }

        descriptors.sort_by_key(|d| d.cell);
        for (expected, descriptor) in descriptors.iter().enumerate() {
            if descriptor.cell != expected {
                return Err(QuadViewerError::ConfigError(format!(
                    "sources must cover cells 0-{} exactly once (found cell {} where {} was expected)",
                    CELL_COUNT - 1,
                    descriptor.cell,
                    expected
                )));
            }
            if descriptor.target.width == 0 || descriptor.target.height == 0 {
                return Err(QuadViewerError::ConfigError(format!(
                    "source {} has an empty target size {}",
                    descriptor.identifier(),
                    descriptor.target
                )));
            }
        }

        let descriptors: [SourceDescriptor; CELL_COUNT] = descriptors
            .try_into()
            .map_err(|_| QuadViewerError::ConfigError("invalid source list".to_string()))?;

        Ok(Self { descriptors })
    }

    pub fn from_config(sources: &[SourceConfig]) -> crate::Result<Self> {
        let descriptors = sources
            .iter()
            .enumerate()
            .map(|(cell, source)| {
                let target = Dimensions::new(source.width, source.height);
                match &source.test_pattern {
                    Some(pattern) => SourceDescriptor::test_pattern(pattern.clone(), cell, target),
                    None => SourceDescriptor::device(source.device.clone(), cell, target),
                }
            })
            .collect();
        Self::new(descriptors)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.descriptors.iter()
    }

    pub fn descriptors(&self) -> &[SourceDescriptor; CELL_COUNT] {
        &self.descriptors
    }

    pub fn get(&self, cell: usize) -> Option<&SourceDescriptor> {
        self.descriptors.get(cell)
    }
}

/// Mutable per-source state, written from the branch's streaming thread
#[derive(Debug, Clone)]
pub(crate) struct SourceRecord {
    pub enabled: bool,
    pub idle: bool,
    pub window: RollingWindow,
    pub fps: f64,
    pub latency: Duration,
    pub last_frame: Option<Duration>,
    pub frames: u64,
}

impl SourceRecord {
    fn new(window_frames: usize) -> Self {
        Self {
            enabled: true,
            idle: false,
            window: RollingWindow::new(window_frames),
            fps: 0.0,
            latency: Duration::ZERO,
            last_frame: None,
            frames: 0,
        }
    }
}

/// One live source in the running pipeline
#[derive(Debug)]
pub struct VideoSource {
    descriptor: SourceDescriptor,
    pub(crate) record: Mutex<SourceRecord>,
}

/// Point-in-time copy of a [`VideoSource`]
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSnapshot {
    pub cell: usize,
    pub device: String,
    pub enabled: bool,
    pub idle: bool,
    pub fps: f64,
    pub latency: Duration,
    pub last_frame: Option<Duration>,
    pub frames: u64,
}

impl VideoSource {
    pub fn new(descriptor: SourceDescriptor, window_frames: usize) -> Self {
        Self {
            descriptor,
            record: Mutex::new(SourceRecord::new(window_frames)),
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn snapshot(&self) -> SourceSnapshot {
        let record = self.record.lock();
        SourceSnapshot {
            cell: self.descriptor.cell,
            device: self.descriptor.identifier(),
            enabled: record.enabled,
            idle: record.idle,
            fps: record.fps,
            latency: record.latency,
            last_frame: record.last_frame,
            frames: record.frames,
        }
    }
}

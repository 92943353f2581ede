use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gst::prelude::*;
use quad_viewer::config::{Config, WindowConfig};
use quad_viewer::pipeline::layout::Dimensions;
use quad_viewer::pipeline::{OrchestratorOptions, PipelineOrchestrator, VideoPipeline};
use quad_viewer::source::SourceSet;
use quad_viewer::window::{InputEvent, WindowError, WindowHandle, WindowHost};

pub fn test_handle() -> WindowHandle {
    WindowHandle::new(0x2c00001)
}

pub fn orchestrator_for(config: &Config) -> PipelineOrchestrator {
    PipelineOrchestrator::new(OrchestratorOptions::from_config(config))
}

pub fn source_set(config: &Config) -> SourceSet {
    SourceSet::from_config(&config.sources).unwrap()
}

/// Tick until `done` holds or the timeout passes
pub fn tick_until<P, F>(pipeline: &mut P, timeout: Duration, mut done: F) -> bool
where
    P: VideoPipeline,
    F: FnMut(&P) -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        pipeline.tick().unwrap();
        if done(pipeline) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

pub fn overlay(pipeline: &PipelineOrchestrator, branch: usize) -> gst::Element {
    pipeline
        .element(&format!("overlay_{}", branch))
        .expect("overlay stage exists")
}

pub fn overlay_text(pipeline: &PipelineOrchestrator, branch: usize) -> String {
    overlay(pipeline, branch)
        .property::<Option<String>>("text")
        .unwrap_or_default()
}

pub fn overlay_silent(pipeline: &PipelineOrchestrator, branch: usize) -> bool {
    overlay(pipeline, branch).property::<bool>("silent")
}

/// Queue shared between a test and the window it handed to a coordinator
pub type EventQueue = Arc<Mutex<VecDeque<InputEvent>>>;

/// Window host that never talks to a display server
pub struct HeadlessWindow {
    pub events: EventQueue,
    size: Option<Dimensions>,
    report_size: Option<Dimensions>,
    pub destroyed: Arc<Mutex<u32>>,
}

impl HeadlessWindow {
    pub fn new() -> Self {
        Self {
            events: EventQueue::default(),
            size: None,
            report_size: None,
            destroyed: Arc::default(),
        }
    }

    /// Report this size instead of the configured one
    pub fn with_size(mut self, size: Dimensions) -> Self {
        self.report_size = Some(size);
        self
    }
}

impl WindowHost for HeadlessWindow {
    fn create_window(&mut self, config: &WindowConfig) -> Result<WindowHandle, WindowError> {
        self.size = Some(
            self.report_size
                .unwrap_or_else(|| Dimensions::new(config.width, config.height)),
        );
        Ok(test_handle())
    }

    fn poll_events(&mut self) -> Result<Vec<InputEvent>, WindowError> {
        Ok(self.events.lock().drain(..).collect())
    }

    fn size(&self) -> Option<Dimensions> {
        self.size
    }

    fn destroy(&mut self) {
        if self.size.take().is_some() {
            *self.destroyed.lock() += 1;
        }
    }
}

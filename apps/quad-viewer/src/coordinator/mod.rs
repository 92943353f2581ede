//! Owns the window and the pipeline and runs the control loop.
//!
//! Startup goes window, then graph, then start. Shutdown always stops the
//! pipeline (which detaches it from the window) before the window is
//! destroyed.

use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::pipeline::layout::Dimensions;
use crate::pipeline::{PipelineState, VideoPipeline};
use crate::source::{SourceSet, SourceSnapshot};
use crate::window::{InputEvent, WindowHandle, WindowHost};
use crate::{QuadViewerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    CloseRequested,
    ExitKey,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Exit(ExitReason),
}

/// Overlay shown on mouse activity and hidden after a quiet period
#[derive(Debug, Clone)]
pub struct OverlayVisibility {
    visible: bool,
    last_activity: Instant,
    hide_after: Duration,
}

impl OverlayVisibility {
    pub fn new(visible: bool, now: Instant, hide_after: Duration) -> Self {
        Self {
            visible,
            last_activity: now,
            hide_after,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Returns true when the overlay has to be shown
    pub fn on_activity(&mut self, now: Instant) -> bool {
        self.last_activity = now;
        if self.visible {
            return false;
        }
        self.visible = true;
        true
    }

    /// Returns true when the overlay has to be hidden
    pub fn on_tick(&mut self, now: Instant) -> bool {
        if !self.visible || now.saturating_duration_since(self.last_activity) < self.hide_after {
            return false;
        }
        self.visible = false;
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerStatus {
    pub running: bool,
    pub pipeline_state: PipelineState,
    pub window_size: Option<Dimensions>,
    pub overlay_visible: bool,
    pub sources: Vec<SourceSnapshot>,
}

pub struct Coordinator<W: WindowHost, P: VideoPipeline> {
    config: Config,
    window: W,
    pipeline: P,
    handle: Option<WindowHandle>,
    overlay: OverlayVisibility,
    running: bool,
    shut_down: bool,
    last_status: Instant,
}

impl<W: WindowHost, P: VideoPipeline> Coordinator<W, P> {
    pub fn new(config: Config, window: W, pipeline: P) -> Self {
        let now = Instant::now();
        let overlay = OverlayVisibility::new(
            config.overlay.visible_on_start,
            now,
            config.overlay_hide_after(),
        );
        Self {
            config,
            window,
            pipeline,
            handle: None,
            overlay,
            running: false,
            shut_down: false,
            last_status: now,
        }
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn handle(&self) -> Option<WindowHandle> {
        self.handle
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn overlay(&self) -> &OverlayVisibility {
        &self.overlay
    }

    /// Create the window, build the graph and request playback.
    ///
    /// Anything created before a failure is torn down before returning.
    pub fn start(&mut self) -> Result<()> {
        self.start_at(Instant::now())
    }

    pub fn start_at(&mut self, now: Instant) -> Result<()> {
        if self.running {
            warn!("Coordinator already running");
            return Ok(());
        }
        if let Err(err) = self.try_start(now) {
            error!("Startup failed: {}", err);
            self.shutdown();
            return Err(err);
        }
        self.running = true;
        info!("Viewer running");
        Ok(())
    }

    fn try_start(&mut self, now: Instant) -> Result<()> {
        let handle = self.window.create_window(&self.config.window)?;
        self.handle = Some(handle);

        let window = self.window.size().unwrap_or_else(|| self.config.window_size());
        // A fullscreen window takes the screen size and the output follows it
        let output = if self.config.window.fullscreen {
            window
        } else {
            self.config.output_size()
        };
        if window != output {
            return Err(QuadViewerError::SizeMismatch { window, output });
        }

        let sources = SourceSet::from_config(&self.config.sources)?;
        self.pipeline.build(&sources, output)?;

        self.overlay = OverlayVisibility::new(
            self.config.overlay.visible_on_start,
            now,
            self.config.overlay_hide_after(),
        );
        self.pipeline.toggle_overlay(self.overlay.is_visible());

        self.pipeline.start(handle)?;
        self.last_status = now;
        Ok(())
    }

    /// One loop iteration: input, overlay timer, pipeline messages
    pub fn step(&mut self, now: Instant) -> Result<LoopControl> {
        for event in self.window.poll_events()? {
            if let Some(reason) = self.dispatch(event, now) {
                info!("Exit requested: {:?}", reason);
                return Ok(LoopControl::Exit(reason));
            }
        }

        if self.overlay.on_tick(now) {
            debug!("No mouse activity, hiding overlay");
            self.pipeline.toggle_overlay(false);
        }

        self.pipeline.tick()?;

        let status_interval = self.config.status_interval();
        if !status_interval.is_zero()
            && now.saturating_duration_since(self.last_status) >= status_interval
        {
            self.last_status = now;
            let status = self.status();
            debug!(
                "Status: pipeline {}, window {:?}, overlay {}",
                status.pipeline_state, status.window_size, status.overlay_visible
            );
            for source in &status.sources {
                debug!(
                    "  cell {} {}: {:.1} fps, {} ms, {} frames{}{}",
                    source.cell,
                    source.device,
                    source.fps,
                    source.latency.as_millis(),
                    source.frames,
                    if source.enabled { "" } else { ", lost" },
                    if source.idle { ", idle" } else { "" }
                );
            }
        }

        Ok(LoopControl::Continue)
    }

    fn dispatch(&mut self, event: InputEvent, now: Instant) -> Option<ExitReason> {
        match event {
            InputEvent::CloseRequested => return Some(ExitReason::CloseRequested),
            InputEvent::KeyPress { .. } if event.is_exit_key() => return Some(ExitReason::ExitKey),
            InputEvent::KeyPress { code, keysym } => {
                debug!("Key {} (keysym 0x{:x}) ignored", code, keysym);
            }
            InputEvent::MouseMove { .. } => {
                if self.overlay.on_activity(now) {
                    debug!("Mouse activity, showing overlay");
                    self.pipeline.toggle_overlay(true);
                }
            }
            InputEvent::MouseButton { button, x, y } => {
                debug!("Mouse button {} at {},{}", button, x, y);
            }
            InputEvent::ConfigureNotify { width, height } => {
                info!("Window resized to {}x{}", width, height);
            }
        }
        None
    }

    /// Run the loop until exit, Ctrl+C or a fatal error
    pub async fn run_loop(&mut self) -> Result<ExitReason> {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    if let Err(err) = result {
                        warn!("Failed to listen for Ctrl+C: {}", err);
                    }
                    info!("Interrupted");
                    return Ok(ExitReason::Interrupted);
                }
                _ = interval.tick() => {
                    if let LoopControl::Exit(reason) = self.step(Instant::now())? {
                        return Ok(reason);
                    }
                }
            }
        }
    }

    /// start, run_loop and shutdown, whatever the outcome
    pub async fn run(&mut self) -> Result<ExitReason> {
        self.start()?;
        let result = self.run_loop().await;
        if let Err(err) = &result {
            error!("Fatal error: {}", err);
        }
        self.shutdown();
        result
    }

    /// Stop the pipeline, then destroy the window. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        info!("Shutting down");
        self.pipeline.stop();
        self.window.destroy();
        self.handle = None;
        self.running = false;
        self.shut_down = true;
    }

    pub fn status(&self) -> ViewerStatus {
        ViewerStatus {
            running: self.running,
            pipeline_state: self.pipeline.state(),
            window_size: self.window.size(),
            overlay_visible: self.overlay.is_visible(),
            sources: self
                .pipeline
                .telemetry()
                .map(|t| t.snapshots())
                .unwrap_or_default(),
        }
    }
}

impl<W: WindowHost, P: VideoPipeline> Drop for Coordinator<W, P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

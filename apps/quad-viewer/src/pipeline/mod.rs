use std::fmt;
use std::sync::Arc;

pub mod control;
pub mod embed;
pub mod graph;
pub mod layout;
pub mod orchestrator;

pub use control::{Command, PipelineControl};
pub use embed::{EmbedPhase, EmbedProtocol};
pub use graph::{GraphPlan, SinkChoice, Stage, StageId, StageKind};
pub use layout::{Dimensions, GridLayout, Region};
pub use orchestrator::{OrchestratorOptions, PipelineOrchestrator};

use crate::source::SourceSet;
use crate::telemetry::TelemetryTracker;
use crate::window::WindowHandle;

/// Orchestrator-level pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Unbuilt,
    Stopped,
    Transitioning,
    Playing,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Unbuilt => "unbuilt",
            PipelineState::Stopped => "stopped",
            PipelineState::Transitioning => "transitioning",
            PipelineState::Playing => "playing",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Media framework element state, ordered from Null to Playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ElementState {
    VoidPending,
    Null,
    Ready,
    Paused,
    Playing,
}

impl ElementState {
    /// Earliest state at which the video sink can accept a render target
    pub fn is_paused_or_later(self) -> bool {
        self >= ElementState::Paused
    }
}

impl From<gst::State> for ElementState {
    fn from(state: gst::State) -> Self {
        match state {
            gst::State::VoidPending => ElementState::VoidPending,
            gst::State::Null => ElementState::Null,
            gst::State::Ready => ElementState::Ready,
            gst::State::Paused => ElementState::Paused,
            gst::State::Playing => ElementState::Playing,
        }
    }
}

/// Pipeline error types
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to create element for stage {stage_name}")]
    ElementCreation { stage_name: String },
    #[error("Caps negotiation error: {0}")]
    CapsNegotiation(String),
    #[error("Render target attached before the pipeline reached Paused (state: {state:?})")]
    PrematureEmbed { state: ElementState },
    #[error("Link error: {0}")]
    Link(String),
    #[error("State change error: {0}")]
    StateChange(String),
    #[error("Pipeline has not been built")]
    NotBuilt,
    #[error("Fatal error in {stage_name}: {detail}")]
    Fatal { stage_name: String, detail: String },
}

/// Messages forwarded from the pipeline's bus and pad probes to the control thread
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineMessage {
    StateChanged {
        old: ElementState,
        current: ElementState,
        pending: ElementState,
    },
    Error {
        stage: String,
        error: String,
        debug: Option<String>,
    },
    Warning {
        stage: String,
        message: String,
    },
    SourceEos {
        index: usize,
    },
    Eos,
}

/// What the coordinator needs from a video pipeline
pub trait VideoPipeline {
    /// Construct the full graph. No state transition is requested.
    fn build(&mut self, sources: &SourceSet, output: Dimensions) -> Result<GraphPlan, PipelineError>;

    /// Request the transition towards Playing; returns without waiting for it
    fn start(&mut self, handle: WindowHandle) -> Result<(), PipelineError>;

    /// Drain pending pipeline messages and act on them
    fn tick(&mut self) -> Result<(), PipelineError>;

    /// Detach from the window and tear the graph down. Idempotent.
    fn stop(&mut self);

    fn toggle_overlay(&mut self, visible: bool);

    fn state(&self) -> PipelineState;

    fn telemetry(&self) -> Option<Arc<TelemetryTracker>>;
}

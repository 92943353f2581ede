pub mod config;
pub mod coordinator;
pub mod gst_utils;
pub mod pipeline;
pub mod source;
pub mod telemetry;
pub mod window;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{Coordinator, ExitReason};
pub use pipeline::{PipelineError, PipelineOrchestrator, PipelineState};
pub use window::{WindowError, WindowHandle, X11Host};

// Common error types
use thiserror::Error;

use crate::pipeline::layout::Dimensions;

#[derive(Error, Debug)]
pub enum QuadViewerError {
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Window size {window} does not match compositor output {output}")]
    SizeMismatch { window: Dimensions, output: Dimensions },

    #[error("GStreamer error: {0}")]
    GstError(#[from] gst::glib::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QuadViewerError>;

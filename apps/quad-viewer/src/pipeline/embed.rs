//! Deferred attachment of the window handle to the video sink.
//!
//! The sink must not see the handle before the pipeline has reached Paused.
//! `start()` arms the protocol; the first state notification at Paused or
//! later triggers the attach, and only after that is Playing requested.
//! Further notifications are ignored.

use super::{ElementState, PipelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPhase {
    /// Nothing requested yet
    Unarmed,
    /// start() was called, waiting for Paused
    AwaitingPaused,
    /// Handle attached to the sink
    Attached,
    /// Detached during stop(); terminal
    Released,
}

/// Next step the orchestrator must perform after a state notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedStep {
    None,
    AttachThenPlay,
}

#[derive(Debug, Clone)]
pub struct EmbedProtocol {
    phase: EmbedPhase,
    attach_count: u32,
}

impl Default for EmbedProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbedProtocol {
    pub fn new() -> Self {
        Self {
            phase: EmbedPhase::Unarmed,
            attach_count: 0,
        }
    }

    pub fn phase(&self) -> EmbedPhase {
        self.phase
    }

    pub fn attach_count(&self) -> u32 {
        self.attach_count
    }

    pub fn is_attached(&self) -> bool {
        self.phase == EmbedPhase::Attached
    }

    /// Register interest in the first Paused-or-later notification
    pub fn arm(&mut self) {
        if self.phase == EmbedPhase::Unarmed {
            self.phase = EmbedPhase::AwaitingPaused;
        }
    }

    /// Feed one observed pipeline state.
    pub fn observe(&mut self, current: ElementState) -> EmbedStep {
        if self.phase != EmbedPhase::AwaitingPaused || !current.is_paused_or_later() {
            return EmbedStep::None;
        }
        self.phase = EmbedPhase::Attached;
        self.attach_count += 1;
        EmbedStep::AttachThenPlay
    }

    /// Guard for the attach call itself
    pub fn check_ready(current: ElementState) -> Result<(), PipelineError> {
        if current.is_paused_or_later() {
            Ok(())
        } else {
            Err(PipelineError::PrematureEmbed { state: current })
        }
    }

    /// Returns true when a detach is actually needed
    pub fn release(&mut self) -> bool {
        let was_attached = self.phase == EmbedPhase::Attached;
        self.phase = EmbedPhase::Released;
        was_attached
    }
}

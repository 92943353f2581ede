//! Decision layer of the orchestrator.
//!
//! `PipelineControl` turns lifecycle requests and pipeline messages into
//! [`Command`]s without touching any media objects. The orchestrator executes
//! the commands in the order given.

use tracing::{debug, info, warn};

use super::embed::{EmbedProtocol, EmbedStep};
use super::graph::GraphPlan;
use super::layout::CELL_COUNT;
use super::{ElementState, PipelineError, PipelineMessage, PipelineState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask the pipeline to go to Paused
    RequestPaused,
    /// Hand the window handle to the video sink
    AttachSurface,
    /// Ask the pipeline to go to Playing
    RequestPlaying,
    /// Cut a failed branch out and replace its source with a stand-in
    IsolateBranch(usize),
    /// A branch's source reached end-of-stream
    MarkIdle(usize),
    /// Ask the pipeline to go to Null
    RequestNull,
    /// Forget the window handle
    DetachSurface,
    /// Unlink and remove all stages in reverse build order
    Teardown,
}

#[derive(Debug)]
pub struct PipelineControl {
    state: PipelineState,
    element_state: ElementState,
    embed: EmbedProtocol,
    has_graph: bool,
    lost: [bool; CELL_COUNT],
    idle: [bool; CELL_COUNT],
}

impl Default for PipelineControl {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineControl {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Unbuilt,
            element_state: ElementState::Null,
            embed: EmbedProtocol::new(),
            has_graph: false,
            lost: [false; CELL_COUNT],
            idle: [false; CELL_COUNT],
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn element_state(&self) -> ElementState {
        self.element_state
    }

    pub fn embed(&self) -> &EmbedProtocol {
        &self.embed
    }

    pub fn has_graph(&self) -> bool {
        self.has_graph
    }

    pub fn is_lost(&self, branch: usize) -> bool {
        self.lost.get(branch).copied().unwrap_or(false)
    }

    pub fn is_idle(&self, branch: usize) -> bool {
        self.idle.get(branch).copied().unwrap_or(false)
    }

    /// Record a failure the bus did not report, e.g. a refused state change
    pub fn fail(&mut self) {
        if self.has_graph {
            self.state = PipelineState::Failed;
        }
    }

    /// The graph now exists and no transition has been requested
    pub fn built(&mut self) {
        *self = Self::new();
        self.has_graph = true;
        self.state = PipelineState::Stopped;
    }

    pub fn start(&mut self) -> Result<Vec<Command>, PipelineError> {
        match self.state {
            PipelineState::Unbuilt => Err(PipelineError::NotBuilt),
            PipelineState::Stopped if self.has_graph => {
                self.state = PipelineState::Transitioning;
                self.embed.arm();
                info!("Requesting Paused; window attach deferred until it is reached");
                Ok(vec![Command::RequestPaused])
            }
            PipelineState::Stopped => Err(PipelineError::NotBuilt),
            state => {
                debug!("start() ignored in state {}", state);
                Ok(Vec::new())
            }
        }
    }

    pub fn on_message(
        &mut self,
        message: &PipelineMessage,
        plan: &GraphPlan,
    ) -> Result<Vec<Command>, PipelineError> {
        match message {
            PipelineMessage::StateChanged { old, current, pending } => {
                debug!("Pipeline state {:?} -> {:?} (pending {:?})", old, current, pending);
                self.element_state = *current;

                if !matches!(
                    self.state,
                    PipelineState::Transitioning | PipelineState::Playing
                ) {
                    return Ok(Vec::new());
                }

                self.state = if *current == ElementState::Playing {
                    PipelineState::Playing
                } else {
                    PipelineState::Transitioning
                };

                match self.embed.observe(*current) {
                    EmbedStep::AttachThenPlay => {
                        info!("Pipeline reached {:?}, attaching window", current);
                        Ok(vec![Command::AttachSurface, Command::RequestPlaying])
                    }
                    EmbedStep::None => Ok(Vec::new()),
                }
            }
            PipelineMessage::Error { stage, error, debug: debug_info } => match plan.branch_of(stage) {
                Some(branch) if !self.lost[branch] => {
                    warn!(
                        "Branch {} failed in {}: {} ({:?}); isolating it",
                        branch, stage, error, debug_info
                    );
                    self.lost[branch] = true;
                    Ok(vec![Command::IsolateBranch(branch)])
                }
                Some(branch) => {
                    debug!("Ignoring further error from lost branch {}: {}", branch, error);
                    Ok(Vec::new())
                }
                None => {
                    self.state = PipelineState::Failed;
                    Err(PipelineError::Fatal {
                        stage_name: stage.clone(),
                        detail: match debug_info {
                            Some(debug) => format!("{} ({})", error, debug),
                            None => error.clone(),
                        },
                    })
                }
            },
            PipelineMessage::Warning { stage, message } => {
                warn!("Warning from {}: {}", stage, message);
                Ok(Vec::new())
            }
            PipelineMessage::SourceEos { index } => {
                let branch = *index;
                if branch >= CELL_COUNT || self.lost[branch] || self.idle[branch] {
                    return Ok(Vec::new());
                }
                self.idle[branch] = true;
                Ok(vec![Command::MarkIdle(branch)])
            }
            PipelineMessage::Eos => {
                warn!("Pipeline reached end-of-stream; all sources are idle");
                let commands = (0..CELL_COUNT)
                    .filter(|b| !self.lost[*b] && !self.idle[*b])
                    .map(Command::MarkIdle)
                    .collect();
                self.idle = [true; CELL_COUNT];
                Ok(commands)
            }
        }
    }

    /// Stop request. Empty once the graph is gone.
    pub fn stop(&mut self) -> Vec<Command> {
        if !self.has_graph {
            return Vec::new();
        }

        let mut commands = vec![Command::RequestNull];
        if self.embed.release() {
            commands.push(Command::DetachSurface);
        }
        commands.push(Command::Teardown);

        self.has_graph = false;
        self.element_state = ElementState::Null;
        if self.state != PipelineState::Failed {
            self.state = PipelineState::Stopped;
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::{SinkChoice, COMPOSITOR_NAME, PRESENT_NAME};
    use crate::pipeline::layout::Dimensions;
    use crate::source::{SourceDescriptor, SourceSet};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn plan() -> GraphPlan {
        let target = Dimensions::new(320, 240);
        let set = SourceSet::new(
            (0..CELL_COUNT)
                .map(|cell| SourceDescriptor::test_pattern("smpte", cell, target))
                .collect(),
        )
        .unwrap();
        GraphPlan::build(&set, Dimensions::new(640, 480), SinkChoice::FakeSink).unwrap()
    }

    fn state_changed(current: ElementState) -> PipelineMessage {
        PipelineMessage::StateChanged {
            old: ElementState::Null,
            current,
            pending: ElementState::VoidPending,
        }
    }

    fn error_from(stage: &str) -> PipelineMessage {
        PipelineMessage::Error {
            stage: stage.to_string(),
            error: "Could not read from resource.".to_string(),
            debug: None,
        }
    }

    fn started() -> PipelineControl {
        let mut control = PipelineControl::new();
        control.built();
        assert_eq!(control.start().unwrap(), vec![Command::RequestPaused]);
        control
    }

    #[test]
    fn test_start_requires_graph() {
        let mut control = PipelineControl::new();
        assert!(matches!(control.start(), Err(PipelineError::NotBuilt)));
    }

    #[test]
    fn test_build_pause_attach_play_ordering() {
        let plan = plan();
        let mut control = started();
        assert_eq!(control.state(), PipelineState::Transitioning);

        let commands = control.on_message(&state_changed(ElementState::Ready), &plan).unwrap();
        assert!(commands.is_empty());

        let commands = control.on_message(&state_changed(ElementState::Paused), &plan).unwrap();
        assert_eq!(commands, vec![Command::AttachSurface, Command::RequestPlaying]);
        assert_eq!(control.state(), PipelineState::Transitioning);

        let commands = control.on_message(&state_changed(ElementState::Playing), &plan).unwrap();
        assert!(commands.is_empty());
        assert_eq!(control.state(), PipelineState::Playing);
    }

    #[test]
    fn test_second_start_is_ignored() {
        let mut control = started();
        assert!(control.start().unwrap().is_empty());
    }

    #[test]
    fn test_branch_error_is_isolated() {
        let plan = plan();
        let mut control = started();
        control.on_message(&state_changed(ElementState::Playing), &plan).unwrap();

        let commands = control.on_message(&error_from("src_2"), &plan).unwrap();
        assert_eq!(commands, vec![Command::IsolateBranch(2)]);
        assert!(control.is_lost(2));
        assert_eq!(control.state(), PipelineState::Playing);

        // Repeated errors from the same branch do nothing more
        assert!(control.on_message(&error_from("convert_2"), &plan).unwrap().is_empty());
        assert!(control.on_message(&error_from("nosignal_2"), &plan).unwrap().is_empty());
    }

    #[test]
    fn test_shared_stage_error_is_fatal() {
        let plan = plan();
        for stage in [PRESENT_NAME, COMPOSITOR_NAME, "quad-viewer"] {
            let mut control = started();
            let err = control.on_message(&error_from(stage), &plan).unwrap_err();
            match err {
                PipelineError::Fatal { stage_name, .. } => assert_eq!(stage_name, stage),
                other => panic!("unexpected error {:?}", other),
            }
            assert_eq!(control.state(), PipelineState::Failed);
        }
    }

    #[test]
    fn test_source_eos_marks_idle_once() {
        let plan = plan();
        let mut control = started();
        let eos = PipelineMessage::SourceEos { index: 1 };
        assert_eq!(control.on_message(&eos, &plan).unwrap(), vec![Command::MarkIdle(1)]);
        assert!(control.on_message(&eos, &plan).unwrap().is_empty());
        assert!(control.is_idle(1));
        assert_ne!(control.state(), PipelineState::Failed);
    }

    #[test]
    fn test_pipeline_eos_is_not_fatal() {
        let plan = plan();
        let mut control = started();
        control.on_message(&PipelineMessage::SourceEos { index: 0 }, &plan).unwrap();
        let commands = control.on_message(&PipelineMessage::Eos, &plan).unwrap();
        assert_eq!(
            commands,
            vec![Command::MarkIdle(1), Command::MarkIdle(2), Command::MarkIdle(3)]
        );
    }

    #[test]
    fn test_refused_state_change_fails_and_stop_keeps_failed() {
        let mut control = started();
        assert_eq!(control.state(), PipelineState::Transitioning);
        control.fail();
        assert_eq!(control.state(), PipelineState::Failed);

        let commands = control.stop();
        assert_eq!(commands.first(), Some(&Command::RequestNull));
        assert_eq!(commands.last(), Some(&Command::Teardown));
        assert_eq!(control.state(), PipelineState::Failed);
    }

    #[test]
    fn test_fail_without_graph_is_ignored() {
        let mut control = PipelineControl::new();
        control.fail();
        assert_eq!(control.state(), PipelineState::Unbuilt);
    }

    #[test]
    fn test_stop_detaches_before_teardown_and_is_idempotent() {
        let plan = plan();
        let mut control = started();
        control.on_message(&state_changed(ElementState::Paused), &plan).unwrap();

        assert_eq!(
            control.stop(),
            vec![Command::RequestNull, Command::DetachSurface, Command::Teardown]
        );
        for _ in 0..5 {
            assert!(control.stop().is_empty());
        }
        assert_eq!(control.state(), PipelineState::Stopped);
        assert!(!control.has_graph());
    }

    #[test]
    fn test_stop_before_attach_skips_detach() {
        let mut control = started();
        assert_eq!(control.stop(), vec![Command::RequestNull, Command::Teardown]);
    }

    #[test]
    fn test_stop_without_graph_is_noop() {
        let mut control = PipelineControl::new();
        assert!(control.stop().is_empty());
        assert_eq!(control.state(), PipelineState::Unbuilt);
    }

    #[test]
    fn test_late_state_messages_after_stop_are_ignored() {
        let plan = plan();
        let mut control = started();
        control.stop();
        let commands = control.on_message(&state_changed(ElementState::Paused), &plan).unwrap();
        assert!(commands.is_empty());
        assert_eq!(control.embed().attach_count(), 0);
    }

    #[test]
    fn test_attach_exactly_once_for_random_message_orderings() {
        let plan = plan();
        let mut rng = StdRng::seed_from_u64(42);
        let states = [
            ElementState::Null,
            ElementState::Ready,
            ElementState::Paused,
            ElementState::Playing,
        ];

        for _ in 0..1_000 {
            let mut control = PipelineControl::new();
            control.built();

            let mut started = false;
            let mut reached_paused = false;
            let mut commands = Vec::new();

            for _ in 0..rng.random_range(1..40) {
                match rng.random_range(0..10) {
                    0 if !started => {
                        started = true;
                        commands.extend(control.start().unwrap());
                    }
                    1..=6 => {
                        let current = states[rng.random_range(0..states.len())];
                        let produced = control.on_message(&state_changed(current), &plan).unwrap();
                        if produced.contains(&Command::AttachSurface) {
                            assert!(started, "attached before start");
                            assert!(current.is_paused_or_later());
                            assert!(!reached_paused, "attached twice");
                            reached_paused = true;
                        }
                        commands.extend(produced);
                    }
                    7 => {
                        let index = rng.random_range(0..CELL_COUNT);
                        commands.extend(
                            control
                                .on_message(&PipelineMessage::SourceEos { index }, &plan)
                                .unwrap(),
                        );
                    }
                    _ => {
                        let branch = rng.random_range(0..CELL_COUNT);
                        let stage = format!("src_{}", branch);
                        commands.extend(control.on_message(&error_from(&stage), &plan).unwrap());
                    }
                }
            }

            let attaches: Vec<_> = commands
                .iter()
                .enumerate()
                .filter(|(_, c)| **c == Command::AttachSurface)
                .map(|(i, _)| i)
                .collect();
            assert!(attaches.len() <= 1);
            if let Some(i) = attaches.first() {
                assert_eq!(commands.get(i + 1), Some(&Command::RequestPlaying));
                assert!(!commands[..*i].contains(&Command::RequestPlaying));
                assert!(commands[..*i].contains(&Command::RequestPaused));
            }
            assert_eq!(control.embed().attach_count() as usize, attaches.len());
        }
    }
}

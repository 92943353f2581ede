use gst::prelude::*;
use gst::MessageView;
use gst_video::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::control::{Command, PipelineControl};
use super::graph::{idle_name, no_signal_name, GraphPlan, Stage, StageId, StageKind};
use super::layout::{Dimensions, CELL_COUNT};
use super::{
    ElementState, PipelineError, PipelineMessage, PipelineState, SinkChoice, VideoPipeline,
};
use crate::config::Config;
use crate::pipeline::embed::EmbedProtocol;
use crate::source::{SourceKind, SourceSet};
use crate::telemetry::{TelemetryTracker, DEFAULT_WINDOW_FRAMES, IDLE_TEXT, NO_SIGNAL_TEXT};
use crate::window::WindowHandle;

pub const PIPELINE_NAME: &str = "quad-viewer";

/// Upper bound on messages handled per tick so a flood cannot starve input
const MAX_MESSAGES_PER_TICK: usize = 64;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub sink: SinkChoice,
    pub overlay_font: String,
    pub overlay_visible: bool,
    pub window_frames: usize,
    pub channel_capacity: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            sink: SinkChoice::Auto,
            overlay_font: "Sans Bold 18".to_string(),
            overlay_visible: true,
            window_frames: DEFAULT_WINDOW_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sink: config.video.sink,
            overlay_font: config.overlay.font.clone(),
            overlay_visible: config.overlay.visible_on_start,
            window_frames: config.telemetry.window_frames,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// GStreamer realisation of a [`GraphPlan`].
///
/// Messages from the bus and from pad probes arrive on streaming threads and
/// are queued into a bounded channel; `tick()` drains the channel on the
/// control thread and executes the resulting [`Command`]s.
pub struct PipelineOrchestrator {
    options: OrchestratorOptions,
    control: PipelineControl,
    plan: Option<GraphPlan>,
    pipeline: Option<gst::Pipeline>,
    elements: Vec<Option<gst::Element>>,
    compositor_pads: Vec<gst::Pad>,
    handle: Option<WindowHandle>,
    telemetry: Option<Arc<TelemetryTracker>>,
    overlay_visible: bool,
    messages: Option<mpsc::Receiver<PipelineMessage>>,
}

impl PipelineOrchestrator {
    pub fn new(options: OrchestratorOptions) -> Self {
        let overlay_visible = options.overlay_visible;
        Self {
            options,
            control: PipelineControl::new(),
            plan: None,
            pipeline: None,
            elements: Vec::new(),
            compositor_pads: Vec::new(),
            handle: None,
            telemetry: None,
            overlay_visible,
            messages: None,
        }
    }

    pub fn plan(&self) -> Option<&GraphPlan> {
        self.plan.as_ref()
    }

    pub fn pipeline(&self) -> Option<&gst::Pipeline> {
        self.pipeline.as_ref()
    }

    /// Look up a live element by stage name
    pub fn element(&self, name: &str) -> Option<gst::Element> {
        self.pipeline.as_ref()?.by_name(name)
    }

    pub fn attach_count(&self) -> u32 {
        self.control.embed().attach_count()
    }

    pub fn is_branch_lost(&self, branch: usize) -> bool {
        self.control.is_lost(branch)
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible
    }

    fn stage_element(&self, id: StageId) -> Option<&gst::Element> {
        self.elements.get(id).and_then(Option::as_ref)
    }

    fn branch_element(&self, branch: usize, kind: StageKind) -> Option<&gst::Element> {
        let plan = self.plan.as_ref()?;
        let stage = plan.branch_stage(branch, kind)?;
        self.stage_element(stage.id)
    }

    fn make_element(stage: &Stage) -> Result<gst::Element, PipelineError> {
        for factory in &stage.factories {
            match gst::ElementFactory::make(factory).name(stage.name.as_str()).build() {
                Ok(element) => {
                    debug!("Created {} for stage {}", factory, stage.name);
                    return Ok(element);
                }
                Err(err) => debug!("Factory {} unavailable for {}: {}", factory, stage.name, err),
            }
        }
        error!("No usable factory for stage {} (tried {:?})", stage.name, stage.factories);
        Err(PipelineError::ElementCreation {
            stage_name: stage.name.clone(),
        })
    }

    fn configure_element(&self, plan: &GraphPlan, stage: &Stage, element: &gst::Element) {
        match stage.kind {
            StageKind::Source => {
                let Some(descriptor) = stage.branch.and_then(|b| plan.sources().get(b)) else {
                    return;
                };
                match &descriptor.kind {
                    SourceKind::Device(path) => element.set_property("device", path.as_str()),
                    SourceKind::TestPattern(pattern) => {
                        element.set_property("is-live", true);
                        element.set_property_from_str("pattern", pattern);
                    }
                }
            }
            StageKind::CapsFilter => {
                let Some(descriptor) = stage.branch.and_then(|b| plan.sources().get(b)) else {
                    return;
                };
                let target = descriptor.target;
                let caps = gst::Caps::builder("video/x-raw")
                    .field("width", target.width as i32)
                    .field("height", target.height as i32)
                    .build();
                debug!(
                    "Branch {} ({}) at {}, cell {}",
                    descriptor.cell,
                    descriptor.identifier(),
                    target,
                    plan.layout().cell_size()
                );
                element.set_property("caps", &caps);
            }
            StageKind::Overlay => {
                element.set_property_from_str("valignment", "top");
                element.set_property_from_str("halignment", "left");
                element.set_property("shaded-background", true);
                element.set_property("font-desc", self.options.overlay_font.as_str());
                element.set_property("silent", !self.overlay_visible);
            }
            StageKind::Compositor => {
                element.set_property_from_str("background", "black");
            }
            StageKind::Present => {
                element.set_property("sync", false);
            }
            StageKind::Convert | StageKind::Scale => {}
        }
    }

    fn link_stages(&mut self, plan: &GraphPlan) -> Result<(), PipelineError> {
        for link in plan.links() {
            let (Some(from), Some(to)) = (self.stage_element(link.from), self.stage_element(link.to))
            else {
                return Err(PipelineError::Link(format!(
                    "missing element for link {} -> {}",
                    plan.stage(link.from).name,
                    plan.stage(link.to).name
                )));
            };

            match link.port {
                None => from.link(to).map_err(|e| {
                    PipelineError::Link(format!(
                        "{} -> {}: {}",
                        plan.stage(link.from).name,
                        plan.stage(link.to).name,
                        e
                    ))
                })?,
                Some(port) => {
                    let region = plan.region(port).copied().ok_or_else(|| {
                        PipelineError::Link(format!("no region for compositor port {}", port))
                    })?;
                    let sink_pad = to.request_pad_simple("sink_%u").ok_or_else(|| {
                        PipelineError::Link(format!("compositor refused pad for port {}", port))
                    })?;
                    sink_pad.set_property("xpos", region.x as i32);
                    sink_pad.set_property("ypos", region.y as i32);
                    sink_pad.set_property("width", region.width as i32);
                    sink_pad.set_property("height", region.height as i32);

                    let src_pad = from.static_pad("src").ok_or_else(|| {
                        PipelineError::Link(format!("{} has no src pad", plan.stage(link.from).name))
                    })?;
                    src_pad.link(&sink_pad).map_err(|e| {
                        PipelineError::Link(format!("{} -> compositor port {}: {:?}", plan.stage(link.from).name, port, e))
                    })?;
                    debug!(
                        "Port {} placed at {},{} size {}x{}",
                        port, region.x, region.y, region.width, region.height
                    );
                    self.compositor_pads.push(sink_pad);
                }
            }
        }
        Ok(())
    }

    fn install_bus_handler(
        pipeline: &gst::Pipeline,
        sender: mpsc::Sender<PipelineMessage>,
    ) -> Result<(), PipelineError> {
        let bus = pipeline
            .bus()
            .ok_or_else(|| PipelineError::StateChange("pipeline has no bus".to_string()))?;

        bus.set_sync_handler(move |_bus, msg| {
            let message = match msg.view() {
                MessageView::StateChanged(state_changed) => {
                    if state_changed.src().map(|s| s.type_().name()) != Some("GstPipeline") {
                        return gst::BusSyncReply::Drop;
                    }
                    PipelineMessage::StateChanged {
                        old: state_changed.old().into(),
                        current: state_changed.current().into(),
                        pending: state_changed.pending().into(),
                    }
                }
                MessageView::Error(err) => PipelineMessage::Error {
                    stage: err.src().map(|s| s.name().to_string()).unwrap_or_default(),
                    error: err.error().to_string(),
                    debug: err.debug().map(|s| s.to_string()),
                },
                MessageView::Warning(warning) => PipelineMessage::Warning {
                    stage: warning.src().map(|s| s.name().to_string()).unwrap_or_default(),
                    message: warning.error().to_string(),
                },
                MessageView::Eos(_) => PipelineMessage::Eos,
                _ => return gst::BusSyncReply::Drop,
            };

            if sender.try_send(message).is_err() {
                warn!("Pipeline message queue full, dropping message");
            }
            gst::BusSyncReply::Drop
        });
        Ok(())
    }

    /// Report end-of-stream on a source pad as an idle branch. The event is
    /// swallowed so the branch stays open for the black stand-in that
    /// replaces the ended source.
    fn install_eos_probe(
        element: &gst::Element,
        branch: usize,
        sender: mpsc::Sender<PipelineMessage>,
    ) {
        let Some(pad) = element.static_pad("src") else {
            warn!("Source for branch {} has no src pad; EOS will not be reported", branch);
            return;
        };
        pad.add_probe(gst::PadProbeType::EVENT_DOWNSTREAM, move |_pad, info| {
            match info.event() {
                Some(event) if event.type_() == gst::EventType::Eos => {
                    if sender.try_send(PipelineMessage::SourceEos { index: branch }).is_err() {
                        warn!("Pipeline message queue full, dropping EOS of branch {}", branch);
                    }
                    gst::PadProbeReturn::Drop
                }
                _ => gst::PadProbeReturn::Ok,
            }
        });
    }

    /// Record every frame entering the overlay and refresh its text on the
    /// same streaming thread.
    fn install_telemetry_probe(
        overlay: &gst::Element,
        branch: usize,
        telemetry: Arc<TelemetryTracker>,
    ) {
        let Some(pad) = overlay.static_pad("video_sink") else {
            warn!("Overlay for branch {} has no video_sink pad", branch);
            return;
        };
        pad.add_probe(gst::PadProbeType::BUFFER, move |pad, info| {
            let Some(buffer) = info.buffer() else {
                return gst::PadProbeReturn::Ok;
            };
            let Some(overlay) = pad.parent_element() else {
                return gst::PadProbeReturn::Ok;
            };

            if let (Some(capture), Some(arrival)) = (buffer.pts(), overlay.current_running_time()) {
                telemetry.record_frame(
                    branch,
                    Duration::from_nanos(capture.nseconds()),
                    Duration::from_nanos(arrival.nseconds()),
                );
            }
            let text = telemetry.render_overlay_text(branch);
            overlay.set_property("text", text.as_str());
            gst::PadProbeReturn::Ok
        });
    }

    /// Release every partially created object after a failed build
    fn discard_partial(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gst::State::Null);
        }
        self.elements.clear();
        self.compositor_pads.clear();
        self.plan = None;
        self.telemetry = None;
        self.messages = None;
    }

    fn request_state(&mut self, target: gst::State) -> Result<(), PipelineError> {
        let Some(pipeline) = self.pipeline.clone() else {
            return Err(PipelineError::NotBuilt);
        };

        match pipeline.set_state(target) {
            Ok(result) => {
                debug!("Requested {:?}: {:?}", target, result);
                Ok(())
            }
            Err(err) => {
                // A branch that fails to open makes the whole change fail.
                // Isolate whatever reported an error and retry once.
                warn!("State change to {:?} failed: {:?}", target, err);
                let lost_before = (0..CELL_COUNT).filter(|b| self.control.is_lost(*b)).count();
                self.tick()?;
                let lost_after = (0..CELL_COUNT).filter(|b| self.control.is_lost(*b)).count();
                if self.control.element_state() >= ElementState::from(target) {
                    return Ok(());
                }
                if lost_after == lost_before {
                    self.control.fail();
                    return Err(PipelineError::StateChange(format!(
                        "could not reach {:?}: {:?}",
                        target, err
                    )));
                }
                if let Err(err) = pipeline.set_state(target) {
                    self.control.fail();
                    return Err(PipelineError::StateChange(format!(
                        "could not reach {:?}: {:?}",
                        target, err
                    )));
                }
                Ok(())
            }
        }
    }

    fn attach_surface(&mut self) -> Result<(), PipelineError> {
        EmbedProtocol::check_ready(self.control.element_state())?;

        let Some(handle) = self.handle else {
            warn!("No window handle to attach");
            return Ok(());
        };
        let Some(sink) = self.plan.as_ref().and_then(|p| self.stage_element(p.present().id)) else {
            return Err(PipelineError::NotBuilt);
        };

        match sink.dynamic_cast_ref::<gst_video::VideoOverlay>() {
            Some(overlay) => {
                // The handle refers to a window that outlives the pipeline:
                // stop() detaches before the window is destroyed.
                unsafe {
                    overlay.set_window_handle(handle.as_raw() as usize);
                }
                info!("Attached video sink to window {}", handle);
            }
            None => warn!(
                "Video sink {} cannot render into a window; output is not shown",
                sink.name()
            ),
        }
        Ok(())
    }

    fn detach_surface(&mut self) {
        let Some(sink) = self.plan.as_ref().and_then(|p| self.stage_element(p.present().id)) else {
            return;
        };
        if let Some(overlay) = sink.dynamic_cast_ref::<gst_video::VideoOverlay>() {
            unsafe {
                overlay.set_window_handle(0);
            }
            debug!("Detached video sink from window");
        }
        self.handle = None;
    }

    /// Replace a failed source with a black live source and show NO SIGNAL
    fn isolate_branch(&mut self, branch: usize) -> Result<(), PipelineError> {
        if let Some(telemetry) = &self.telemetry {
            telemetry.disable(branch);
        }
        if !self.replace_source(branch, no_signal_name(branch))? {
            return Ok(());
        }
        if let Some(overlay) = self.branch_element(branch, StageKind::Overlay) {
            overlay.set_property("text", NO_SIGNAL_TEXT);
            overlay.set_property("silent", false);
        }

        warn!("Branch {} isolated, showing {}", branch, NO_SIGNAL_TEXT);
        Ok(())
    }

    /// Blank the cell of a source that reached end-of-stream
    fn mark_idle(&mut self, branch: usize) -> Result<(), PipelineError> {
        // Before the stand-in links, so its frames are not counted
        if let Some(telemetry) = &self.telemetry {
            telemetry.mark_idle(branch);
        }
        if !self.replace_source(branch, idle_name(branch))? {
            return Ok(());
        }
        if let Some(overlay) = self.branch_element(branch, StageKind::Overlay) {
            overlay.set_property("text", IDLE_TEXT);
        }

        info!("Branch {} idle, cell blanked", branch);
        Ok(())
    }

    /// Stop and remove the branch's current source, then link a black live
    /// test source named `name` into its converter. Returns false when the
    /// branch has nothing to replace.
    fn replace_source(&mut self, branch: usize, name: String) -> Result<bool, PipelineError> {
        let (Some(plan), Some(pipeline)) = (self.plan.as_ref(), self.pipeline.as_ref()) else {
            return Err(PipelineError::NotBuilt);
        };
        let Some(source_stage) = plan.branch_stage(branch, StageKind::Source) else {
            return Ok(false);
        };
        let source_id = source_stage.id;
        let Some(convert) = self.branch_element(branch, StageKind::Convert).cloned() else {
            return Ok(false);
        };

        if let Some(source) = self.elements.get_mut(source_id).and_then(Option::take) {
            let _ = source.set_state(gst::State::Null);
            source.unlink(&convert);
            if let Err(err) = pipeline.remove(&source) {
                warn!("Could not remove source {}: {}", source.name(), err);
            }
        }

        let stand_in = gst::ElementFactory::make("videotestsrc")
            .name(name.as_str())
            .property("is-live", true)
            .property_from_str("pattern", "black")
            .build()
            .map_err(|_| PipelineError::ElementCreation {
                stage_name: name.clone(),
            })?;
        pipeline
            .add(&stand_in)
            .map_err(|e| PipelineError::Link(format!("adding {}: {}", name, e)))?;
        stand_in
            .link(&convert)
            .map_err(|e| PipelineError::Link(format!("{} -> {}: {}", name, convert.name(), e)))?;
        if let Err(err) = stand_in.sync_state_with_parent() {
            warn!("Stand-in {} did not follow the pipeline state: {}", name, err);
        }
        self.elements[source_id] = Some(stand_in);
        Ok(true)
    }

    /// Unlink and remove every stage in reverse build order
    fn teardown(&mut self) {
        let Some(pipeline) = self.pipeline.take() else {
            return;
        };

        if let Some(plan) = self.plan.take() {
            for link in plan.links().iter().rev() {
                let (Some(from), Some(to)) = (self.stage_element(link.from), self.stage_element(link.to))
                else {
                    continue;
                };
                match link.port.and_then(|port| self.compositor_pads.get(port)) {
                    Some(sink_pad) => {
                        if let Some(src_pad) = from.static_pad("src") {
                            let _ = src_pad.unlink(sink_pad);
                        }
                        to.release_request_pad(sink_pad);
                    }
                    None => from.unlink(to),
                }
            }

            for stage in plan.teardown_order() {
                if let Some(element) = self.elements.get_mut(stage.id).and_then(Option::take) {
                    if let Err(err) = pipeline.remove(&element) {
                        debug!("Removing {} failed: {}", stage.name, err);
                    }
                }
            }
        }

        if let Some(bus) = pipeline.bus() {
            bus.unset_sync_handler();
        }
        self.elements.clear();
        self.compositor_pads.clear();
        self.messages = None;
        info!("Pipeline torn down");
    }

    fn execute(&mut self, commands: Vec<Command>) -> Result<(), PipelineError> {
        for command in commands {
            debug!("Executing {:?}", command);
            match command {
                Command::RequestPaused => self.request_state(gst::State::Paused)?,
                Command::AttachSurface => self.attach_surface()?,
                Command::RequestPlaying => self.request_state(gst::State::Playing)?,
                Command::IsolateBranch(branch) => self.isolate_branch(branch)?,
                Command::MarkIdle(branch) => self.mark_idle(branch)?,
                Command::RequestNull => {
                    if let Some(pipeline) = &self.pipeline {
                        if let Err(err) = pipeline.set_state(gst::State::Null) {
                            warn!("Failed to set pipeline to Null: {:?}", err);
                        }
                    }
                }
                Command::DetachSurface => self.detach_surface(),
                Command::Teardown => self.teardown(),
            }
        }
        Ok(())
    }
}

impl VideoPipeline for PipelineOrchestrator {
    fn build(&mut self, sources: &SourceSet, output: Dimensions) -> Result<GraphPlan, PipelineError> {
        if self.control.has_graph() {
            info!("Pipeline already exists, destroying it first");
            self.stop();
        }

        // Validates the output size before any element exists
        let plan = GraphPlan::build(sources, output, self.options.sink)?;
        info!("Building pipeline for {} output", output);

        let pipeline = gst::Pipeline::builder().name(PIPELINE_NAME).build();
        self.pipeline = Some(pipeline.clone());
        self.elements = vec![None; plan.stages().len()];
        self.compositor_pads.clear();

        for stage in plan.build_order() {
            let element = match Self::make_element(stage) {
                Ok(element) => element,
                Err(err) => {
                    self.discard_partial();
                    return Err(err);
                }
            };
            self.configure_element(&plan, stage, &element);
            if let Err(err) = pipeline.add(&element) {
                self.discard_partial();
                return Err(PipelineError::Link(format!("adding {}: {}", stage.name, err)));
            }
            self.elements[stage.id] = Some(element);
        }

        if let Err(err) = self.link_stages(&plan) {
            self.discard_partial();
            return Err(err);
        }

        let (sender, receiver) = mpsc::channel(self.options.channel_capacity.max(1));
        Self::install_bus_handler(&pipeline, sender.clone())?;

        let telemetry = Arc::new(TelemetryTracker::new(sources, self.options.window_frames));
        for branch in 0..CELL_COUNT {
            if let Some(source) = plan
                .branch_stage(branch, StageKind::Source)
                .and_then(|s| self.stage_element(s.id))
            {
                Self::install_eos_probe(source, branch, sender.clone());
            }
            if let Some(overlay) = plan
                .branch_stage(branch, StageKind::Overlay)
                .and_then(|s| self.stage_element(s.id))
            {
                Self::install_telemetry_probe(overlay, branch, telemetry.clone());
            }
        }

        self.telemetry = Some(telemetry);
        self.messages = Some(receiver);
        self.plan = Some(plan.clone());
        self.control.built();

        info!(
            "Pipeline built: {} stages, sink {:?}",
            plan.stages().len(),
            plan.present().factories
        );
        Ok(plan)
    }

    fn start(&mut self, handle: WindowHandle) -> Result<(), PipelineError> {
        let commands = self.control.start()?;
        if commands.is_empty() {
            return Ok(());
        }
        info!("Starting pipeline for window {}", handle);
        self.handle = Some(handle);
        self.execute(commands)
    }

    fn tick(&mut self) -> Result<(), PipelineError> {
        for _ in 0..MAX_MESSAGES_PER_TICK {
            let Some(receiver) = self.messages.as_mut() else {
                return Ok(());
            };
            let message = match receiver.try_recv() {
                Ok(message) => message,
                Err(_) => break,
            };
            let Some(plan) = self.plan.as_ref() else {
                break;
            };

            match self.control.on_message(&message, plan) {
                Ok(commands) => self.execute(commands)?,
                Err(err) => {
                    error!("Pipeline failed: {}", err);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        let commands = self.control.stop();
        if commands.is_empty() {
            return;
        }
        info!("Stopping pipeline");
        if let Err(err) = self.execute(commands) {
            warn!("Error while stopping pipeline: {}", err);
        }
    }

    fn toggle_overlay(&mut self, visible: bool) {
        if self.overlay_visible != visible {
            debug!("Overlay {}", if visible { "shown" } else { "hidden" });
        }
        self.overlay_visible = visible;
        for branch in 0..CELL_COUNT {
            // Lost branches keep showing NO SIGNAL
            let silent = !visible && !self.control.is_lost(branch);
            if let Some(overlay) = self.branch_element(branch, StageKind::Overlay) {
                overlay.set_property("silent", silent);
            }
        }
    }

    fn state(&self) -> PipelineState {
        self.control.state()
    }

    fn telemetry(&self) -> Option<Arc<TelemetryTracker>> {
        self.telemetry.clone()
    }
}

impl Drop for PipelineOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

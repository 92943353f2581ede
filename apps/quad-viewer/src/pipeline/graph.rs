use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::layout::{Dimensions, GridLayout, Region, CELL_COUNT};
use super::PipelineError;
use crate::source::{SourceDescriptor, SourceSet};

pub type StageId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    Convert,
    Scale,
    CapsFilter,
    Overlay,
    Compositor,
    Present,
}

/// Stage kinds making up one branch, upstream first
pub const BRANCH_KINDS: [StageKind; 5] = [
    StageKind::Source,
    StageKind::Convert,
    StageKind::Scale,
    StageKind::CapsFilter,
    StageKind::Overlay,
];

pub const COMPOSITOR_NAME: &str = "comp";
pub const FINAL_CONVERT_NAME: &str = "final_convert";
pub const PRESENT_NAME: &str = "video_sink";

pub fn branch_stage_name(kind: StageKind, branch: usize) -> String {
    let prefix = match kind {
        StageKind::Source => "src",
        StageKind::Convert => "convert",
        StageKind::Scale => "scale",
        StageKind::CapsFilter => "caps",
        StageKind::Overlay => "overlay",
        StageKind::Compositor => COMPOSITOR_NAME,
        StageKind::Present => PRESENT_NAME,
    };
    format!("{}_{}", prefix, branch)
}

/// Name of the black stand-in source linked into a lost branch
pub fn no_signal_name(branch: usize) -> String {
    format!("nosignal_{}", branch)
}

/// Name of the black stand-in source linked into a branch whose source ended
pub fn idle_name(branch: usize) -> String {
    format!("idle_{}", branch)
}

/// Which video sink renders into the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkChoice {
    /// xvimagesink, falling back to ximagesink
    #[default]
    Auto,
    XvImageSink,
    XImageSink,
    /// No window output; used for headless runs and tests
    FakeSink,
}

impl SinkChoice {
    pub fn factories(self) -> Vec<&'static str> {
        match self {
            SinkChoice::Auto => vec!["xvimagesink", "ximagesink"],
            SinkChoice::XvImageSink => vec!["xvimagesink"],
            SinkChoice::XImageSink => vec!["ximagesink"],
            SinkChoice::FakeSink => vec!["fakesink"],
        }
    }
}

impl FromStr for SinkChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SinkChoice::Auto),
            "xvimagesink" => Ok(SinkChoice::XvImageSink),
            "ximagesink" => Ok(SinkChoice::XImageSink),
            "fakesink" => Ok(SinkChoice::FakeSink),
            other => Err(format!(
                "unknown sink '{}' (expected auto, xvimagesink, ximagesink or fakesink)",
                other
            )),
        }
    }
}

impl fmt::Display for SinkChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkChoice::Auto => "auto",
            SinkChoice::XvImageSink => "xvimagesink",
            SinkChoice::XImageSink => "ximagesink",
            SinkChoice::FakeSink => "fakesink",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub id: StageId,
    pub kind: StageKind,
    pub name: String,
    pub branch: Option<usize>,
    /// Candidate element factories, tried in order
    pub factories: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub from: StageId,
    pub to: StageId,
    /// Compositor input port, for links into the compositor
    pub port: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct GraphPlan {
    stages: Vec<Stage>,
    links: Vec<Link>,
    by_name: HashMap<String, StageId>,
    branches: [[StageId; BRANCH_KINDS.len()]; CELL_COUNT],
    compositor: StageId,
    final_convert: StageId,
    present: StageId,
    layout: GridLayout,
    sources: SourceSet,
}

struct PlanBuilder {
    stages: Vec<Stage>,
    links: Vec<Link>,
}

impl PlanBuilder {
    fn stage(
        &mut self,
        kind: StageKind,
        name: String,
        branch: Option<usize>,
        factories: Vec<&'static str>,
    ) -> StageId {
        let id = self.stages.len();
        self.stages.push(Stage {
            id,
            kind,
            name,
            branch,
            factories,
        });
        id
    }

    fn link(&mut self, from: StageId, to: StageId, port: Option<usize>) {
        self.links.push(Link { from, to, port });
    }
}

fn branch_factory(kind: StageKind, descriptor: &SourceDescriptor) -> &'static str {
    match kind {
        StageKind::Source => descriptor.kind.factory_name(),
        StageKind::Convert => "videoconvert",
        StageKind::Scale => "videoscale",
        StageKind::CapsFilter => "capsfilter",
        StageKind::Overlay => "textoverlay",
        StageKind::Compositor => "compositor",
        StageKind::Present => "fakesink",
    }
}

impl GraphPlan {
    /// Plan the full graph for four sources and one output size.
    ///
    /// The output size is validated before anything else so an untileable
    /// size fails without allocating any media resources.
    pub fn build(
        sources: &SourceSet,
        output: Dimensions,
        sink: SinkChoice,
    ) -> Result<Self, PipelineError> {
        let layout = GridLayout::tile(output)?;

        let mut builder = PlanBuilder {
            stages: Vec::new(),
            links: Vec::new(),
        };

        let mut branches = [[0; BRANCH_KINDS.len()]; CELL_COUNT];
        for descriptor in sources.iter() {
            let branch = descriptor.cell;
            for (slot, kind) in BRANCH_KINDS.iter().enumerate() {
                branches[branch][slot] = builder.stage(
                    *kind,
                    branch_stage_name(*kind, branch),
                    Some(branch),
                    vec![branch_factory(*kind, descriptor)],
                );
            }
            for pair in branches[branch].windows(2) {
                builder.link(pair[0], pair[1], None);
            }
        }

        let compositor = builder.stage(
            StageKind::Compositor,
            COMPOSITOR_NAME.to_string(),
            None,
            vec!["compositor"],
        );
        for (branch, stages) in branches.iter().enumerate() {
            builder.link(stages[BRANCH_KINDS.len() - 1], compositor, Some(branch));
        }

        let final_convert = builder.stage(
            StageKind::Convert,
            FINAL_CONVERT_NAME.to_string(),
            None,
            vec!["videoconvert"],
        );
        let present = builder.stage(
            StageKind::Present,
            PRESENT_NAME.to_string(),
            None,
            sink.factories(),
        );
        builder.link(compositor, final_convert, None);
        builder.link(final_convert, present, None);

        let by_name = builder
            .stages
            .iter()
            .map(|s| (s.name.clone(), s.id))
            .collect();

        let plan = Self {
            stages: builder.stages,
            links: builder.links,
            by_name,
            branches,
            compositor,
            final_convert,
            present,
            layout,
            sources: sources.clone(),
        };
        plan.check_invariants()?;
        Ok(plan)
    }

    /// Four branches, one compositor with four distinct ports, and a region per
    /// port that tiles the output exactly.
    pub fn check_invariants(&self) -> Result<(), PipelineError> {
        let compositors = self
            .stages
            .iter()
            .filter(|s| s.kind == StageKind::Compositor)
            .count();
        if compositors != 1 {
            return Err(PipelineError::Link(format!(
                "expected one compositor, found {}",
                compositors
            )));
        }

        let mut ports: Vec<usize> = self
            .links
            .iter()
            .filter(|l| l.to == self.compositor)
            .filter_map(|l| l.port)
            .collect();
        ports.sort_unstable();
        if ports != (0..CELL_COUNT).collect::<Vec<_>>() {
            return Err(PipelineError::Link(format!(
                "compositor ports must be 0-{}, found {:?}",
                CELL_COUNT - 1,
                ports
            )));
        }

        let regions = self.layout.regions();
        let covered: u64 = regions.iter().map(Region::area).sum();
        let overlapping = regions
            .iter()
            .enumerate()
            .any(|(i, a)| regions.iter().skip(i + 1).any(|b| a.intersects(b)));
        if covered != self.layout.output().area() || overlapping {
            return Err(PipelineError::CapsNegotiation(
                "compositor regions do not tile the output".to_string(),
            ));
        }

        Ok(())
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn stage(&self, id: StageId) -> &Stage {
        &self.stages[id]
    }

    pub fn stage_by_name(&self, name: &str) -> Option<&Stage> {
        self.by_name.get(name).map(|id| &self.stages[*id])
    }

    /// Branch owning the named stage, including a branch's stand-in source
    pub fn branch_of(&self, name: &str) -> Option<usize> {
        if let Some(stage) = self.stage_by_name(name) {
            return stage.branch;
        }
        (0..CELL_COUNT).find(|branch| no_signal_name(*branch) == name || idle_name(*branch) == name)
    }

    pub fn branch_stages(&self, branch: usize) -> Option<&[StageId; BRANCH_KINDS.len()]> {
        self.branches.get(branch)
    }

    pub fn branch_stage(&self, branch: usize, kind: StageKind) -> Option<&Stage> {
        let slot = BRANCH_KINDS.iter().position(|k| *k == kind)?;
        self.branches.get(branch).map(|b| &self.stages[b[slot]])
    }

    pub fn compositor(&self) -> &Stage {
        &self.stages[self.compositor]
    }

    pub fn final_convert(&self) -> &Stage {
        &self.stages[self.final_convert]
    }

    pub fn present(&self) -> &Stage {
        &self.stages[self.present]
    }

    pub fn successors(&self, id: StageId) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(move |l| l.from == id)
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn output(&self) -> Dimensions {
        self.layout.output()
    }

    pub fn region(&self, port: usize) -> Option<&Region> {
        self.layout.region(port)
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn build_order(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }

    pub fn teardown_order(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().rev()
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use super::PipelineError;

pub const GRID_COLUMNS: u32 = 2;
pub const GRID_ROWS: u32 = 2;
pub const CELL_COUNT: usize = (GRID_COLUMNS * GRID_ROWS) as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Placement of one compositor input inside the output frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// The four cell regions for one output size, row-major from the top-left
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridLayout {
    output: Dimensions,
    regions: [Region; CELL_COUNT],
}

impl GridLayout {
    /// Split `output` into four equal cells.
    ///
    /// Fails with [`PipelineError::CapsNegotiation`] when either side is zero
    /// or does not divide evenly, since unequal cells would leave a gap or an
    /// overlap in the composited frame.
    pub fn tile(output: Dimensions) -> Result<Self, PipelineError> {
        if output.width == 0 || output.height == 0 {
            return Err(PipelineError::CapsNegotiation(format!(
                "output size {} must be positive",
                output
            )));
        }
        if output.width % GRID_COLUMNS != 0 || output.height % GRID_ROWS != 0 {
            return Err(PipelineError::CapsNegotiation(format!(
                "output size {} is not divisible into a {}x{} grid",
                output, GRID_COLUMNS, GRID_ROWS
            )));
        }

        let cell_width = output.width / GRID_COLUMNS;
        let cell_height = output.height / GRID_ROWS;

        let regions = std::array::from_fn(|index| {
            let column = index as u32 % GRID_COLUMNS;
            let row = index as u32 / GRID_COLUMNS;
            Region {
                x: column * cell_width,
                y: row * cell_height,
                width: cell_width,
                height: cell_height,
            }
        });

        Ok(Self { output, regions })
    }

    pub fn output(&self) -> Dimensions {
        self.output
    }

    pub fn cell_size(&self) -> Dimensions {
        Dimensions::new(self.regions[0].width, self.regions[0].height)
    }

    pub fn region(&self, cell: usize) -> Option<&Region> {
        self.regions.get(cell)
    }

    pub fn regions(&self) -> &[Region; CELL_COUNT] {
        &self.regions
    }
}

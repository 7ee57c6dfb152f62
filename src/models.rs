use std::convert::TryFrom;

use thiserror::Error;

mod config;
pub use config::*;

mod preferences;
pub use preferences::*;

/// Side length of the badge LED matrix
pub const GRID_SIZE: usize = 10;

/// Number of cells in a grid
pub const GRID_CELLS: usize = GRID_SIZE * GRID_SIZE;

pub type Color = palette::Srgb<u8>;

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("a grid sequence needs at least one frame")]
    Empty,
    #[error("frame rate must be positive")]
    InvalidFps,
    #[error("invalid data ({0} bytes) for a {GRID_SIZE}x{GRID_SIZE} RGB grid")]
    InvalidData(usize),
}

/// One displayable frame: a square matrix of colors, row-major
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Grid([[Color; GRID_SIZE]; GRID_SIZE]);

impl Grid {
    pub fn filled(color: Color) -> Self {
        Self([[color; GRID_SIZE]; GRID_SIZE])
    }

    /// Build a grid by evaluating `f(x, y)` for every cell
    pub fn from_fn(mut f: impl FnMut(usize, usize) -> Color) -> Self {
        let mut cells = [[Color::new(0, 0, 0); GRID_SIZE]; GRID_SIZE];

        for (y, row) in cells.iter_mut().enumerate() {
            for (x, cell) in row.iter_mut().enumerate() {
                *cell = f(x, y);
            }
        }

        Self(cells)
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Color> {
        self.0.get(y).and_then(|row| row.get(x)).copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Color; GRID_SIZE]> {
        self.0.iter()
    }

    /// Cells in canonical order: top to bottom, left to right
    pub fn cells(&self) -> impl Iterator<Item = Color> + '_ {
        self.0.iter().flat_map(|row| row.iter().copied())
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::filled(Color::new(0, 0, 0))
    }
}

impl std::fmt::Debug for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for row in self.rows() {
            list.entry(
                &row.iter()
                    .map(|c| format!("#{:02x}{:02x}{:02x}", c.red, c.green, c.blue))
                    .collect::<Vec<_>>(),
            );
        }
        list.finish()
    }
}

impl TryFrom<&[u8]> for Grid {
    type Error = SequenceError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        if data.len() != GRID_CELLS * 3 {
            return Err(SequenceError::InvalidData(data.len()));
        }

        Ok(Self::from_fn(|x, y| {
            let idx = (y * GRID_SIZE + x) * 3;
            Color::new(data[idx], data[idx + 1], data[idx + 2])
        }))
    }
}

/// A finite, replayable sequence of grids played back at a fixed rate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSequence {
    frames: Vec<Grid>,
    fps: u32,
}

impl GridSequence {
    pub fn new(frames: Vec<Grid>, fps: u32) -> Result<Self, SequenceError> {
        if frames.is_empty() {
            return Err(SequenceError::Empty);
        }

        if fps == 0 {
            return Err(SequenceError::InvalidFps);
        }

        Ok(Self { frames, fps })
    }

    /// A one-frame sequence at 1 fps, as used for streaming
    pub fn single(grid: Grid) -> Self {
        Self {
            frames: vec![grid],
            fps: 1,
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Grid] {
        &self.frames
    }

    /// Get a frame, wrapping around the end of the sequence
    pub fn frame(&self, index: usize) -> &Grid {
        &self.frames[index % self.frames.len()]
    }
}

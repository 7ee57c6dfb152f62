//! Binary picture format understood by the badge
//!
//! The payload is a plain concatenation of frames, with no header or checksum. Each frame is
//! a big-endian `u16` display delay in milliseconds followed by the grid cells as RGB triplets,
//! in row-major order. The device infers the frame count from the payload length.

use std::convert::TryFrom;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::models::{Grid, GridSequence, SequenceError, GRID_CELLS};

/// Size of one encoded frame
pub const FRAME_UNIT: usize = 2 + GRID_CELLS * 3;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("payload length {0} is not a multiple of {FRAME_UNIT}")]
    Truncated(usize),
    #[error("zero frame delay")]
    ZeroDelay,
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub delay_ms: u16,
    pub grid: Grid,
}

/// Per-frame delay for a given playback rate
pub fn frame_delay(fps: u32) -> u16 {
    (1000. / fps as f64).round() as u16
}

pub fn encode(sequence: &GridSequence) -> Bytes {
    let delay = frame_delay(sequence.fps());
    let mut buf = BytesMut::with_capacity(FRAME_UNIT * sequence.len());

    for grid in sequence.frames() {
        buf.put_u16(delay);

        for cell in grid.cells() {
            buf.put_slice(&[cell.red, cell.green, cell.blue]);
        }
    }

    buf.freeze()
}

/// Encode a single grid the way streaming mode sends it: one frame at 1 fps
pub fn encode_single(grid: &Grid) -> Bytes {
    encode(&GridSequence::single(*grid))
}

pub fn decode(mut data: &[u8]) -> Result<Vec<Frame>, WireError> {
    if data.len() % FRAME_UNIT != 0 {
        return Err(WireError::Truncated(data.len()));
    }

    let mut frames = Vec::with_capacity(data.len() / FRAME_UNIT);

    while data.has_remaining() {
        let delay_ms = data.get_u16();
        let (cells, rest) = data.split_at(FRAME_UNIT - 2);
        frames.push(Frame {
            delay_ms,
            grid: Grid::try_from(cells)?,
        });
        data = rest;
    }

    Ok(frames)
}

/// Decode a payload back into a sequence, recovering the frame rate from the first delay
pub fn decode_sequence(data: &[u8]) -> Result<GridSequence, WireError> {
    let frames = decode(data)?;

    let delay = frames.first().map(|frame| frame.delay_ms).unwrap_or(1000);
    if delay == 0 {
        return Err(WireError::ZeroDelay);
    }

    let fps = ((1000. / delay as f64).round() as u32).max(1);
    Ok(GridSequence::new(
        frames.into_iter().map(|frame| frame.grid).collect(),
        fps,
    )?)
}

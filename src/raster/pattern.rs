use std::f32::consts::PI;

use crate::{
    color::hue_to_color,
    models::{Grid, GRID_SIZE},
};

/// Rotating color swirl
///
/// The hue of each cell is its angle around the center, offset by a rotation that completes
/// one turn over the whole sequence, blended with its distance to the center.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pattern;

impl Pattern {
    pub const FRAME_COUNT: usize = 100;
    pub const FPS: u32 = 60;

    const CENTER: f32 = (GRID_SIZE / 2) as f32;

    pub fn hue_at(t: usize, x: usize, y: usize) -> f32 {
        let dx = x as f32 - Self::CENTER;
        let dy = y as f32 - Self::CENTER;
        let max_radius = Self::CENTER.hypot(Self::CENTER);

        let rotation = 2. * PI * t as f32 / Self::FRAME_COUNT as f32;
        let angle = (dy.atan2(dx) + PI + rotation).rem_euclid(2. * PI);
        let radius = dx.hypot(dy) / max_radius;

        (angle / (2. * PI) + radius).rem_euclid(1.)
    }

    pub fn render_frame(&self, t: usize) -> Grid {
        Grid::from_fn(|x, y| hue_to_color(Self::hue_at(t, x, y)))
    }
}

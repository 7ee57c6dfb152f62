use std::convert::Infallible;

use embedded_graphics::{
    mono_font::{iso_8859_5::FONT_6X10, MonoFont, MonoTextStyle},
    pixelcolor::{Rgb888, RgbColor},
    prelude::*,
    text::{Baseline, Text as TextDrawable},
};

use crate::models::{Color, Grid, GRID_SIZE};

/// Font used for scrolling text, exactly one grid tall, with Latin and Cyrillic glyphs
const FONT: &MonoFont<'static> = &FONT_6X10;
/// Extra space between two glyphs
const LETTER_SPACING: usize = 2;
/// Blank columns before and after the text, so it scrolls fully in and out of view
const MARGIN: usize = GRID_SIZE;

/// Horizontally scrolling text
#[derive(Debug)]
pub struct Text {
    text: String,
    foreground: Color,
    background: Color,
    strip: Option<Strip>,
}

impl Text {
    pub const FPS: u32 = 15;

    pub fn new(text: String, foreground: Color, background: Color) -> Self {
        Self {
            text,
            foreground,
            background,
            strip: None,
        }
    }

    /// Width of the rasterized strip for a text, margins included
    pub fn strip_width(text: &str) -> usize {
        let glyphs = text.chars().count();
        if glyphs == 0 {
            return GRID_SIZE;
        }

        let advance = FONT.character_size.width as usize;
        2 * MARGIN + glyphs * advance + (glyphs - 1) * LETTER_SPACING
    }

    pub fn frame_count(&self) -> usize {
        match &self.strip {
            Some(strip) => (strip.width + 1).saturating_sub(GRID_SIZE).max(1),
            None => 1,
        }
    }

    /// Rasterize the text onto the strip
    pub fn prepare(&mut self) {
        let mut strip = Strip::new(Self::strip_width(&self.text), self.background);
        let style = MonoTextStyle::new(FONT, to_rgb888(self.foreground));
        let advance = FONT.character_size.width as usize + LETTER_SPACING;

        let mut buf = [0u8; 4];
        for (i, ch) in self.text.chars().enumerate() {
            let position = Point::new((MARGIN + i * advance) as i32, 0);
            let glyph = ch.encode_utf8(&mut buf);

            if let Err(never) =
                TextDrawable::with_baseline(glyph, position, style, Baseline::Top).draw(&mut strip)
            {
                match never {}
            }
        }

        let width = strip.width;
        self.strip = Some(strip);

        debug!(
            text = %self.text,
            width = %width,
            frames = %self.frame_count(),
            "rasterized text"
        );
    }

    /// Window of the strip starting at column `t`
    pub fn render_frame(&self, t: usize) -> Grid {
        match &self.strip {
            Some(strip) => Grid::from_fn(|x, y| strip.get(t + x, y).unwrap_or(self.background)),
            None => Grid::filled(self.background),
        }
    }
}

fn to_rgb888(color: Color) -> Rgb888 {
    Rgb888::new(color.red, color.green, color.blue)
}

/// Rasterized text, `GRID_SIZE` pixels tall
#[derive(Debug)]
struct Strip {
    width: usize,
    pixels: Vec<Color>,
}

impl Strip {
    fn new(width: usize, background: Color) -> Self {
        Self {
            width,
            pixels: vec![background; width * GRID_SIZE],
        }
    }

    fn get(&self, x: usize, y: usize) -> Option<Color> {
        if x < self.width && y < GRID_SIZE {
            self.pixels.get(y * self.width + x).copied()
        } else {
            None
        }
    }
}

impl OriginDimensions for Strip {
    fn size(&self) -> Size {
        Size::new(self.width as u32, GRID_SIZE as u32)
    }
}

impl DrawTarget for Strip {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            if coord.x >= 0
                && (coord.x as usize) < self.width
                && coord.y >= 0
                && (coord.y as usize) < GRID_SIZE
            {
                let idx = coord.y as usize * self.width + coord.x as usize;
                self.pixels[idx] = Color::new(color.r(), color.g(), color.b());
            }
        }

        Ok(())
    }
}

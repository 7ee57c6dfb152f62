//! Color utilities

use std::str::FromStr;

use palette::{FromColor, Hsv, Srgb};
use thiserror::Error;

use crate::models::Color;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseColorError {
    #[error("expected a #rrggbb color, got {0:?}")]
    InvalidFormat(String),
}

/// A color parsed from a `#rrggbb` string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexColor(pub Color);

impl FromStr for HexColor {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseColorError::InvalidFormat(s.to_owned());
        let hex = s.strip_prefix('#').unwrap_or(s);

        // Integer parsing tolerates a sign, so only digits get through
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        Srgb::<u8>::from_str(hex).map(Self).map_err(|_| invalid())
    }
}

impl From<HexColor> for Color {
    fn from(hex: HexColor) -> Self {
        hex.0
    }
}

pub fn to_hex(color: Color) -> String {
    format!("#{:x}", color)
}

/// Fully saturated, full value color for a hue in turns (0..1)
pub fn hue_to_color(hue: f32) -> Color {
    let hsv = Hsv::new_srgb(hue.rem_euclid(1.0) * 360.0, 1.0, 1.0);
    Srgb::from_color(hsv).into_format()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_colors() {
        assert_eq!(
            "#ff8000".parse::<HexColor>().unwrap().0,
            Color::new(255, 128, 0)
        );
        assert_eq!(
            "00FF7f".parse::<HexColor>().unwrap().0,
            Color::new(0, 255, 127)
        );
        assert!("#fff".parse::<HexColor>().is_err());
        assert!("#gg0000".parse::<HexColor>().is_err());
        assert!("#ééé".parse::<HexColor>().is_err());
    }

    #[test]
    fn signed_channels_are_rejected() {
        assert!("#+f+f+f".parse::<HexColor>().is_err());
        assert!("-f0000".parse::<HexColor>().is_err());
        assert!("# ff000".parse::<HexColor>().is_err());
    }

    #[test]
    fn hex_round_trip() {
        let color = Color::new(18, 52, 86);
        assert_eq!(to_hex(color), "#123456");
        assert_eq!(to_hex(color).parse::<HexColor>().unwrap().0, color);
        assert_eq!(to_hex(Color::new(0, 10, 255)), "#000aff");
    }

    #[test]
    fn primary_hues() {
        assert_eq!(hue_to_color(0.0), Color::new(255, 0, 0));
        assert_eq!(hue_to_color(1.0 / 3.0), Color::new(0, 255, 0));
        assert_eq!(hue_to_color(2.0 / 3.0), Color::new(0, 0, 255));
        assert_eq!(hue_to_color(1.0), hue_to_color(0.0));
    }
}

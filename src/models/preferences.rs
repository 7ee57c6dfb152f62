use serde_derive::{Deserialize, Serialize};
use strum_macros::{EnumString, IntoStaticStr};

use super::Color;

/// Kind of content being rendered
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    #[default]
    Pattern,
    Text,
    Photo,
    Video,
}

/// Which badge shell is drawn around the preview
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BadgeTheme {
    #[default]
    White,
    Red,
}

impl BadgeTheme {
    pub fn shell_color(self) -> Color {
        match self {
            Self::White => Color::new(230, 230, 230),
            Self::Red => Color::new(200, 30, 40),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub mode: Mode,
    pub text: String,
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_hex",
        deserialize_with = "crate::serde::deserialize_color_from_hex"
    )]
    pub foreground: Color,
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_hex",
        deserialize_with = "crate::serde::deserialize_color_from_hex"
    )]
    pub background: Color,
    pub badge_theme: BadgeTheme,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            text: "PHDAYS".to_owned(),
            foreground: Color::new(255, 255, 255),
            background: Color::new(0, 0, 0),
            badge_theme: BadgeTheme::default(),
        }
    }
}

use serde::Deserialize;

use crate::{color, models::Color};

pub fn serialize_color_as_hex<S: serde::ser::Serializer>(
    color: &Color,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_str(&color::to_hex(*color))
}

pub fn deserialize_color_from_hex<'de, D>(deserializer: D) -> Result<Color, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value.parse::<color::HexColor>().map(Into::into).map_err(serde::de::Error::custom)
}

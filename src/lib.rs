//! `pixbadge` renders animations, scrolling text, photos and videos for a 10x10 LED badge,
//! and delivers them to it over its HTTP API.
//!
//! # Structure
//!
//! Content goes through a [raster::Rasterizer] to produce a [models::GridSequence], which is
//! either played locally ([preview]) or encoded ([wire]) and pushed to the badge by the
//! [delivery::DeliveryController]. The [link::LinkMonitor] tracks whether the badge is
//! reachable and which firmware it runs; badges on the legacy firmware can be reflashed over
//! USB with a [flash::Flasher].

#[macro_use]
extern crate tracing;

pub mod color;
pub mod delivery;
pub mod device;
pub mod flash;
pub mod link;
pub mod models;
pub mod paths;
pub mod preview;
pub mod raster;
pub mod serde;
pub mod session;
pub mod wire;

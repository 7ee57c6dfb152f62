//! Rasterizers turning user content into grid sequences
//!
//! Every variant exposes the same operations: a frame count, a playback rate, an optional
//! preparation step reporting [Progress], and a pure `render_frame` once prepared.

use std::path::PathBuf;

use bytes::Bytes;
use derive_more::From;
use parse_display::Display;
use thiserror::Error;

use crate::models::{Color, Grid, GridSequence, Mode, SequenceError};

mod pattern;
pub use pattern::*;

mod photo;
pub use photo::*;

mod text;
pub use text::*;

mod video;
pub use video::*;

/// Preparation status, as shown by a progress indicator
#[derive(Display, Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Nothing in progress
    #[display("idle")]
    Idle,
    /// Working, completion unknown
    #[display("preparing")]
    Preparing,
    #[display("{0}%")]
    Percent(u8),
    #[display("failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("frame extraction failed: {0}")]
    Extraction(String),
    #[error("no frames extracted")]
    NoFrames,
    #[error("preparation was cancelled")]
    Cancelled,
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// Where the bytes of a photo or video come from
#[derive(Debug, Clone, From)]
pub enum MediaSource {
    Path(PathBuf),
    Memory(Bytes),
}

impl MediaSource {
    pub async fn load(&self) -> Result<Bytes, std::io::Error> {
        match self {
            Self::Path(path) => Ok(tokio::fs::read(path).await?.into()),
            Self::Memory(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Description of the content to rasterize
#[derive(Debug, Clone)]
pub enum Source {
    Pattern,
    Text {
        text: String,
        foreground: Color,
        background: Color,
    },
    Photo(MediaSource),
    Video {
        source: PathBuf,
        ffmpeg: String,
    },
}

impl Source {
    pub fn mode(&self) -> Mode {
        match self {
            Self::Pattern => Mode::Pattern,
            Self::Text { .. } => Mode::Text,
            Self::Photo(_) => Mode::Photo,
            Self::Video { .. } => Mode::Video,
        }
    }
}

#[derive(Debug)]
pub enum Rasterizer {
    Pattern(Pattern),
    Text(Text),
    Photo(Photo),
    Video(Video),
}

impl From<Source> for Rasterizer {
    fn from(source: Source) -> Self {
        match source {
            Source::Pattern => Self::Pattern(Pattern),
            Source::Text {
                text,
                foreground,
                background,
            } => Self::Text(Text::new(text, foreground, background)),
            Source::Photo(source) => Self::Photo(Photo::new(source)),
            Source::Video { source, ffmpeg } => Self::Video(Video::new(source, ffmpeg)),
        }
    }
}

impl Rasterizer {
    pub fn frame_count(&self) -> usize {
        match self {
            Self::Pattern(_) => Pattern::FRAME_COUNT,
            Self::Text(text) => text.frame_count(),
            Self::Photo(_) => 1,
            Self::Video(video) => video.frame_count(),
        }
    }

    pub fn fps(&self) -> u32 {
        match self {
            Self::Pattern(_) => Pattern::FPS,
            Self::Text(_) => Text::FPS,
            Self::Photo(_) => Photo::FPS,
            Self::Video(_) => Video::FPS,
        }
    }

    /// Run the preparation step, reporting progress through `progress`
    ///
    /// On success, the last reported value is [Progress::Idle]. On failure, it is
    /// [Progress::Failed] and the error is returned.
    pub async fn prepare(
        &mut self,
        progress: &mut (dyn FnMut(Progress) + Send),
    ) -> Result<(), PrepareError> {
        let result = match self {
            Self::Pattern(_) => Ok(()),
            Self::Text(text) => {
                text.prepare();
                Ok(())
            }
            Self::Photo(photo) => photo.prepare(progress).await,
            Self::Video(video) => video.prepare(progress).await,
        };

        match &result {
            Ok(()) => progress(Progress::Idle),
            Err(error) => {
                warn!(error = %error, "preparation failed");
                progress(Progress::Failed(error.to_string()));
            }
        }

        result
    }

    /// Render frame `index`. Indices past the end wrap around.
    pub fn render_frame(&self, index: usize) -> Grid {
        let index = index % self.frame_count();

        match self {
            Self::Pattern(pattern) => pattern.render_frame(index),
            Self::Text(text) => text.render_frame(index),
            Self::Photo(photo) => photo.render_frame(),
            Self::Video(video) => video.render_frame(index),
        }
    }

    /// Render every frame into a sequence
    pub fn sequence(&self) -> Result<GridSequence, SequenceError> {
        GridSequence::new(
            (0..self.frame_count())
                .map(|i| self.render_frame(i))
                .collect(),
            self.fps(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::wire;

    fn solid_png(color: [u8; 3]) -> Bytes {
        let image = image::RgbImage::from_pixel(10, 10, image::Rgb(color));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("failed to encode png");
        buf.into()
    }

    #[tokio::test]
    async fn red_photo_end_to_end() {
        let mut rasterizer = Rasterizer::from(Source::Photo(solid_png([255, 0, 0]).into()));
        let mut reports = Vec::new();
        rasterizer
            .prepare(&mut |p| reports.push(p))
            .await
            .expect("prepare failed");

        assert_eq!(reports.first(), Some(&Progress::Preparing));
        assert_eq!(reports.last(), Some(&Progress::Idle));
        assert_eq!(rasterizer.frame_count(), 1);
        assert_eq!(rasterizer.fps(), 1);
        assert_eq!(
            rasterizer.render_frame(0),
            Grid::filled(Color::new(255, 0, 0))
        );

        let payload = wire::encode(&rasterizer.sequence().unwrap());
        let mut expected = vec![0x03, 0xE8];
        for _ in 0..100 {
            expected.extend_from_slice(&[0xFF, 0x00, 0x00]);
        }
        assert_eq!(&payload[..], &expected[..]);
    }

    #[tokio::test]
    async fn broken_photo_reports_failure() {
        let mut rasterizer = Rasterizer::from(Source::Photo(
            Bytes::from_static(b"definitely not an image").into(),
        ));
        let mut reports = Vec::new();
        let result = rasterizer.prepare(&mut |p| reports.push(p)).await;

        assert!(matches!(result, Err(PrepareError::Image(_))));
        assert!(matches!(reports.last(), Some(Progress::Failed(_))));
    }

    #[tokio::test]
    async fn pattern_sequence_has_fixed_shape() {
        let mut rasterizer = Rasterizer::from(Source::Pattern);
        rasterizer.prepare(&mut |_| {}).await.unwrap();

        let seq = rasterizer.sequence().unwrap();
        assert_eq!(seq.len(), 100);
        assert_eq!(seq.fps(), 60);
        assert_eq!(rasterizer.render_frame(100), rasterizer.render_frame(0));
    }
}

use image::imageops::FilterType;

use super::{MediaSource, PrepareError, Progress};
use crate::models::{Color, Grid, GRID_SIZE};

/// Still image, downsampled to one grid
#[derive(Debug)]
pub struct Photo {
    source: MediaSource,
    grid: Grid,
}

impl Photo {
    pub const FPS: u32 = 1;

    pub fn new(source: MediaSource) -> Self {
        Self {
            source,
            grid: Grid::default(),
        }
    }

    #[instrument(skip(self, progress))]
    pub async fn prepare(
        &mut self,
        progress: &mut (dyn FnMut(Progress) + Send),
    ) -> Result<(), PrepareError> {
        progress(Progress::Preparing);

        let data = self.source.load().await?;
        self.grid = tokio::task::spawn_blocking(move || downsample(&data))
            .await
            .map_err(|error| PrepareError::Extraction(error.to_string()))??;

        debug!("photo ready");
        Ok(())
    }

    pub fn render_frame(&self) -> Grid {
        self.grid
    }
}

/// Decode an encoded image and scale it to exactly one grid
pub fn downsample(data: &[u8]) -> Result<Grid, PrepareError> {
    let image = image::load_from_memory(data)?;
    let small = image
        .resize_exact(GRID_SIZE as u32, GRID_SIZE as u32, FilterType::Triangle)
        .to_rgb8();

    Ok(Grid::from_fn(|x, y| {
        let image::Rgb([r, g, b]) = *small.get_pixel(x as u32, y as u32);
        Color::new(r, g, b)
    }))
}

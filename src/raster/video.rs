use std::{convert::TryFrom, path::PathBuf, process::Stdio};

use tokio::process::Command;

use super::{PrepareError, Progress};
use crate::{
    models::{Grid, GRID_CELLS, GRID_SIZE},
    wire::FRAME_UNIT,
};

/// Size of one raw RGB frame as produced by ffmpeg
const RAW_FRAME: usize = FRAME_UNIT - 2;

/// Video clip, resampled to a fixed rate and cropped to a square
#[derive(Debug)]
pub struct Video {
    source: PathBuf,
    ffmpeg: String,
    frames: Vec<Grid>,
}

impl Video {
    pub const FPS: u32 = 30;

    pub fn new(source: PathBuf, ffmpeg: String) -> Self {
        Self {
            source,
            ffmpeg,
            frames: Vec::new(),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len().max(1)
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-nostdin")
            .args(["-loglevel", "error"])
            .arg("-i")
            .arg(&self.source)
            .arg("-vf")
            .arg(format!(
                "fps={},crop=ih:ih,scale={}:{}",
                Self::FPS,
                GRID_SIZE,
                GRID_SIZE
            ))
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    #[instrument(skip(self, progress), fields(source = %self.source.display()))]
    pub async fn prepare(
        &mut self,
        progress: &mut (dyn FnMut(Progress) + Send),
    ) -> Result<(), PrepareError> {
        progress(Progress::Preparing);

        let output = self.command().output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PrepareError::Extraction(format!(
                "{} ({})",
                output.status,
                stderr.trim()
            )));
        }

        debug!(bytes = %output.stdout.len(), "extracted frames");

        self.frames = split_frames(&output.stdout, progress)?;
        Ok(())
    }

    pub fn render_frame(&self, t: usize) -> Grid {
        self.frames.get(t).copied().unwrap_or_default()
    }
}

/// Split raw RGB24 output into grids, reporting progress per frame
pub fn split_frames(
    raw: &[u8],
    progress: &mut (dyn FnMut(Progress) + Send),
) -> Result<Vec<Grid>, PrepareError> {
    if raw.len() % RAW_FRAME != 0 {
        warn!(
            extra = %(raw.len() % RAW_FRAME),
            "ignoring trailing partial frame"
        );
    }

    let total = raw.len() / RAW_FRAME;
    if total == 0 {
        return Err(PrepareError::NoFrames);
    }

    let mut frames = Vec::with_capacity(total);
    for (i, chunk) in raw.chunks_exact(RAW_FRAME).enumerate() {
        frames.push(Grid::try_from(chunk)?);
        progress(Progress::Percent(((i + 1) * 100 / total) as u8));
    }

    trace!(frames = %frames.len(), cells = %GRID_CELLS, "split frames");
    Ok(frames)
}

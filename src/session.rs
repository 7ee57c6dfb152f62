//! User session: persisted preferences and the active content
//!
//! A [Session] is created once at startup and owns everything that changes when the user
//! picks new content. Each call to [Session::begin] starts a new generation and cancels the
//! previous one; only results from the latest generation can be installed.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::{
    models::{GridSequence, MediaSettings, Mode, Preferences},
    paths::Paths,
    raster::{PrepareError, Progress, Rasterizer, Source},
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot serialize preferences: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error(transparent)]
    Prepare(#[from] PrepareError),
    #[error("{0:?} mode needs an input file")]
    MissingFile(Mode),
    #[error("result of generation {generation} superseded by generation {current}")]
    Stale { generation: u64, current: u64 },
}

/// TOML file holding the last used [Preferences]
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub const FILE_NAME: &'static str = "$ROOT/session.toml";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_paths(paths: &Paths) -> Self {
        Self::new(paths.resolve_path(Self::FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored preferences, falling back to defaults
    pub async fn load(&self) -> Preferences {
        let src = match tokio::fs::read_to_string(&self.path).await {
            Ok(src) => src,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored preferences");
                return Preferences::default();
            }
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "cannot read preferences");
                return Preferences::default();
            }
        };

        match toml::from_str(&src) {
            Ok(preferences) => preferences,
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "invalid preferences, using defaults");
                Preferences::default()
            }
        }
    }

    pub async fn save(&self, preferences: &Preferences) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, toml::to_string_pretty(preferences)?).await?;
        trace!(path = %self.path.display(), "saved preferences");
        Ok(())
    }
}

/// Content ready for preview and delivery
#[derive(Debug)]
pub struct Prepared {
    generation: u64,
    pub rasterizer: Rasterizer,
    pub sequence: GridSequence,
}

impl Prepared {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A preparation in progress, detached from the session
#[derive(Debug)]
pub struct Preparation {
    generation: u64,
    rasterizer: Rasterizer,
    cancel: CancellationToken,
}

impl Preparation {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Prepare the content, unless the session moves on first
    pub async fn run(
        mut self,
        progress: &mut (dyn FnMut(Progress) + Send),
    ) -> Result<Prepared, SessionError> {
        select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(generation = %self.generation, "preparation cancelled");
                return Err(PrepareError::Cancelled.into());
            }
            result = self.rasterizer.prepare(progress) => result?,
        }

        let sequence = self
            .rasterizer
            .sequence()
            .map_err(PrepareError::from)?;

        Ok(Prepared {
            generation: self.generation,
            rasterizer: self.rasterizer,
            sequence,
        })
    }
}

#[derive(Debug)]
pub struct Session {
    preferences: Preferences,
    store: Option<PreferenceStore>,
    generation: u64,
    cancel: CancellationToken,
    active: Option<Prepared>,
}

impl Session {
    pub fn new(preferences: Preferences, store: Option<PreferenceStore>) -> Self {
        Self {
            preferences,
            store,
            generation: 0,
            cancel: CancellationToken::new(),
            active: None,
        }
    }

    /// Open a session with the preferences found in `store`
    pub async fn open(store: PreferenceStore) -> Self {
        let preferences = store.load().await;
        Self::new(preferences, Some(store))
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Change the preferences and persist them
    pub async fn update_preferences(
        &mut self,
        f: impl FnOnce(&mut Preferences),
    ) -> Result<(), SessionError> {
        f(&mut self.preferences);

        if let Some(store) = &self.store {
            store.save(&self.preferences).await?;
        }

        Ok(())
    }

    /// Describe the content selected by the current preferences
    pub fn source(
        &self,
        file: Option<&Path>,
        media: &MediaSettings,
    ) -> Result<Source, SessionError> {
        let prefs = &self.preferences;

        Ok(match prefs.mode {
            Mode::Pattern => Source::Pattern,
            Mode::Text => Source::Text {
                text: prefs.text.clone(),
                foreground: prefs.foreground,
                background: prefs.background,
            },
            Mode::Photo => Source::Photo(
                file.ok_or(SessionError::MissingFile(Mode::Photo))?
                    .to_owned()
                    .into(),
            ),
            Mode::Video => Source::Video {
                source: file
                    .ok_or(SessionError::MissingFile(Mode::Video))?
                    .to_owned(),
                ffmpeg: media.ffmpeg.clone(),
            },
        })
    }

    /// Start preparing new content, cancelling the previous preparation
    pub fn begin(&mut self, source: Source) -> Preparation {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.generation += 1;

        debug!(generation = %self.generation, mode = ?source.mode(), "begin preparation");

        Preparation {
            generation: self.generation,
            rasterizer: source.into(),
            cancel: self.cancel.clone(),
        }
    }

    /// Install prepared content if it belongs to the latest generation
    pub fn accept(&mut self, prepared: Prepared) -> Result<&Prepared, SessionError> {
        if prepared.generation != self.generation {
            return Err(SessionError::Stale {
                generation: prepared.generation,
                current: self.generation,
            });
        }

        info!(
            generation = %prepared.generation,
            frames = %prepared.sequence.len(),
            fps = %prepared.sequence.fps(),
            "content ready"
        );

        Ok(self.active.insert(prepared))
    }

    pub fn active(&self) -> Option<&Prepared> {
        self.active.as_ref()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

//! Firmware recovery over the serial bootloader
//!
//! A [Flasher] drives one recovery attempt at a time: it connects to the bootloader with a
//! bounded number of retries, checks the flash capacity, erases the chip, writes the firmware
//! image and finally pulses the reset line. Progress is published as a [FlashState] on a watch
//! channel. Failures outside the connect loop collapse into [FlashFailure::FlashingFailed],
//! their cause is only logged.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use parse_display::Display;
use thiserror::Error;
use tokio::{select, sync::watch, time};
use tokio_util::sync::CancellationToken;

use crate::{link::LinkState, models::FlashSettings};

mod firmware;
pub use firmware::*;

mod port;
pub use port::*;

mod rom;
pub use rom::*;

mod slip;
pub use slip::*;

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Slip(#[from] SlipError),
    #[error(transparent)]
    Firmware(#[from] FirmwareError),
    #[error("no serial port matching {vendor_id:04x}:{product_id:04x}")]
    NoPort { vendor_id: u16, product_id: u16 },
    #[error("timed out waiting for response to command {0:#04x}")]
    Timeout(u8),
    #[error("serial port closed")]
    Disconnected,
    #[error("command {op:#04x} failed with status {status:#04x}, error {error:#04x}")]
    Command { op: u8, status: u8, error: u8 },
    #[error("invalid response to command {0:#04x}")]
    InvalidResponse(u8),
    #[error("unknown flash size id {0:#04x}")]
    UnknownFlashSize(u8),
}

/// Operations needed from a serial bootloader
#[async_trait]
pub trait Bootloader: Send {
    /// Reset into download mode and synchronize
    async fn connect(&mut self) -> Result<(), FlashError>;

    /// Detected flash capacity, in bytes
    async fn flash_size(&mut self) -> Result<u64, FlashError>;

    async fn erase_all(&mut self) -> Result<(), FlashError>;

    /// Write `image` at `offset`, reporting `(written, total)` bytes as blocks complete
    async fn write_flash(
        &mut self,
        offset: u32,
        image: &[u8],
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<(), FlashError>;

    async fn set_dtr(&mut self, level: bool) -> Result<(), FlashError>;
}

/// Finds the serial port of the badge and opens a bootloader on it
#[async_trait]
pub trait SerialProvider: Send {
    async fn request_port(&mut self) -> Result<Box<dyn Bootloader>, FlashError>;
}

#[async_trait]
pub trait FirmwareSource: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, FirmwareError>;
}

/// Terminal failure of a flash session, as shown to the user
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashFailure {
    #[display("Failed to connect to badge. Make sure it is in flashing mode.")]
    ConnectFailed,
    #[display("You are using PHDays 2 Badge. It is not supported (yet).")]
    UnsupportedHardware,
    #[display("Flashing failed. See logs for details.")]
    FlashingFailed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlashStage {
    Erasing,
    /// Percentage written, with one decimal
    Writing { progress: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FlashState {
    #[default]
    Idle,
    Connecting {
        attempt: u32,
    },
    Flashing(FlashStage),
    Success,
    Failed(FlashFailure),
}

impl FlashState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed(_))
    }
}

impl fmt::Display for FlashState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {})", attempt),
            Self::Flashing(FlashStage::Erasing) => write!(f, "erasing"),
            Self::Flashing(FlashStage::Writing { progress }) => {
                write!(f, "writing {:.1}%", progress)
            }
            Self::Success => write!(f, "Firmware flashed successfully!"),
            Self::Failed(failure) => write!(f, "{}", failure),
        }
    }
}

/// Record of one recovery attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlashSession {
    pub connection_attempts: u32,
    pub flash_capacity: Option<u64>,
    pub progress: f32,
    pub outcome: FlashState,
}

/// Why the procedure stopped early
enum Stop {
    Abandoned,
    Failed(FlashFailure),
}

impl From<FlashError> for Stop {
    fn from(error: FlashError) -> Self {
        error!(error = %error, "flashing failed");
        Self::Failed(FlashFailure::FlashingFailed)
    }
}

/// Round a write ratio to a percentage with one decimal
fn percent(written: usize, total: usize) -> f32 {
    if total == 0 {
        return 100.;
    }

    ((written as f64 / total as f64 * 1000.).round() / 10.) as f32
}

pub struct Flasher {
    settings: FlashSettings,
    state: watch::Sender<FlashState>,
}

impl Flasher {
    /// Offset of the firmware image in flash
    pub const IMAGE_OFFSET: u32 = 0;

    pub fn new(settings: FlashSettings) -> Self {
        let (state, _) = watch::channel(FlashState::Idle);
        Self { settings, state }
    }

    /// Recovery only makes sense for badges running the legacy firmware
    pub fn is_available(link: LinkState) -> bool {
        link.is_legacy()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlashState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> FlashState {
        *self.state.borrow()
    }

    /// Leave a terminal state
    pub fn dismiss(&self) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                *state = FlashState::Idle;
                true
            } else {
                false
            }
        });
    }

    fn set(&self, state: FlashState) {
        trace!(state = %state, "flash state");
        self.state.send_replace(state);
    }

    /// Run one complete recovery attempt
    ///
    /// Cancelling `cancel` while connecting abandons the session and returns to
    /// [FlashState::Idle].
    pub async fn run(
        &self,
        provider: &mut dyn SerialProvider,
        firmware: &dyn FirmwareSource,
        cancel: &CancellationToken,
    ) -> FlashSession {
        let mut session = FlashSession::default();

        let outcome = match self.flash(provider, firmware, cancel, &mut session).await {
            Ok(()) => {
                info!("firmware flashed successfully");
                FlashState::Success
            }
            Err(Stop::Abandoned) => {
                info!("flashing abandoned");
                FlashState::Idle
            }
            Err(Stop::Failed(failure)) => {
                warn!(failure = %failure, "flashing stopped");
                FlashState::Failed(failure)
            }
        };

        self.set(outcome);
        session.outcome = outcome;
        session
    }

    async fn connect(
        &self,
        loader: &mut dyn Bootloader,
        cancel: &CancellationToken,
        session: &mut FlashSession,
    ) -> Result<(), Stop> {
        let attempts = self.settings.connect_attempts;

        for attempt in 1..=attempts {
            self.set(FlashState::Connecting { attempt });
            session.connection_attempts = attempt;

            let result = select! {
                biased;
                _ = cancel.cancelled() => return Err(Stop::Abandoned),
                result = loader.connect() => result,
            };

            match result {
                Ok(()) => {
                    info!(attempt = %attempt, "connected to badge");
                    return Ok(());
                }
                Err(error) => {
                    warn!(attempt = %attempt, error = %error, "error connecting to badge");
                }
            }

            if attempt < attempts {
                select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Stop::Abandoned),
                    _ = time::sleep(self.settings.connect_backoff()) => {}
                }
            }
        }

        Err(Stop::Failed(FlashFailure::ConnectFailed))
    }

    async fn flash(
        &self,
        provider: &mut dyn SerialProvider,
        firmware: &dyn FirmwareSource,
        cancel: &CancellationToken,
        session: &mut FlashSession,
    ) -> Result<(), Stop> {
        self.set(FlashState::Connecting { attempt: 0 });
        let mut loader = provider.request_port().await?;

        self.connect(&mut *loader, cancel, session).await?;

        let capacity = loader.flash_size().await?;
        session.flash_capacity = Some(capacity);
        info!(capacity = %capacity, "detected flash");

        if capacity != self.settings.flash_size {
            return Err(Stop::Failed(FlashFailure::UnsupportedHardware));
        }

        let image = firmware.fetch().await.map_err(FlashError::from)?;
        debug!(len = %image.len(), "fetched firmware image");

        self.set(FlashState::Flashing(FlashStage::Erasing));
        loader.erase_all().await?;

        self.set(FlashState::Flashing(FlashStage::Writing { progress: 0. }));
        {
            let state = &self.state;
            let progress = &mut session.progress;
            loader
                .write_flash(Self::IMAGE_OFFSET, &image, &mut |written, total| {
                    *progress = percent(written, total);
                    state.send_replace(FlashState::Flashing(FlashStage::Writing {
                        progress: *progress,
                    }));
                })
                .await?;
        }

        // Reboot into the new firmware
        loader.set_dtr(false).await?;
        time::sleep(self.settings.reset_pulse()).await;
        loader.set_dtr(true).await?;

        Ok(())
    }
}

impl fmt::Debug for Flasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flasher")
            .field("state", &self.state())
            .finish()
    }
}

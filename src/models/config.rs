use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_device_address() -> String {
    "http://192.168.4.1".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSettings {
    #[validate(length(min = 1))]
    pub address: String,
    /// Upper bound on a picture upload
    #[validate(range(min = 1))]
    pub upload_timeout_ms: u32,
}

impl DeviceSettings {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms as _)
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            address: default_device_address(),
            upload_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct LinkSettings {
    #[validate(range(min = 1))]
    pub probe_interval_ms: u32,
    #[validate(range(min = 1))]
    pub probe_timeout_ms: u32,
}

impl LinkSettings {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms as _)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms as _)
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            probe_interval_ms: 1000,
            probe_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct DeliverySettings {
    /// Payloads at least this large skip the bulk upload and stream instead
    #[validate(range(min = 1))]
    pub bulk_limit: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            bulk_limit: 32 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct MediaSettings {
    #[validate(length(min = 1))]
    pub ffmpeg: String,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct FlashSettings {
    pub usb_vendor_id: u16,
    pub usb_product_id: u16,
    #[validate(range(min = 9600))]
    pub baud_rate: u32,
    #[validate(range(min = 1))]
    pub connect_attempts: u32,
    pub connect_backoff_ms: u32,
    /// Only boards with exactly this much flash are supported
    pub flash_size: u64,
    pub reset_pulse_ms: u32,
    #[validate(length(min = 1))]
    pub firmware: String,
}

impl FlashSettings {
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms as _)
    }

    pub fn reset_pulse(&self) -> Duration {
        Duration::from_millis(self.reset_pulse_ms as _)
    }
}

impl Default for FlashSettings {
    fn default() -> Self {
        Self {
            usb_vendor_id: 0x1A86,
            usb_product_id: 0x7523,
            baud_rate: 460800,
            connect_attempts: 10,
            connect_backoff_ms: 1000,
            flash_size: 16 * 1024 * 1024,
            reset_pulse_ms: 100,
            firmware: "$SYSTEM/firmware/phdays-badge-pro.bin".to_owned(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    #[validate(nested)]
    pub device: DeviceSettings,
    #[validate(nested)]
    pub link: LinkSettings,
    #[validate(nested)]
    pub delivery: DeliverySettings,
    #[validate(nested)]
    pub media: MediaSettings,
    #[validate(nested)]
    pub flash: FlashSettings,
}

impl Config {
    pub async fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let full = tokio::fs::read_to_string(path).await?;
        Self::parse(&full)
    }

    pub fn parse(src: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(src)?;
        config.validate()?;

        debug!(
            device = %config.device.address,
            firmware = %config.flash.firmware,
            "loaded"
        );

        Ok(config)
    }

    pub fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

use async_trait::async_trait;
use tokio_serial::{SerialPortBuilderExt, SerialPortInfo, SerialPortType};

use super::{Bootloader, FlashError, RomLoader, SerialProvider, ROM_BAUD};
use crate::models::FlashSettings;

/// Opens the first USB serial port with the configured vendor and product ids
#[derive(Debug, Clone)]
pub struct UsbSerialProvider {
    vendor_id: u16,
    product_id: u16,
    baud_rate: u32,
}

impl UsbSerialProvider {
    pub fn new(settings: &FlashSettings) -> Self {
        Self {
            vendor_id: settings.usb_vendor_id,
            product_id: settings.usb_product_id,
            baud_rate: settings.baud_rate,
        }
    }

    /// Name of the first matching port in `ports`
    pub fn select<'p>(&self, ports: &'p [SerialPortInfo]) -> Option<&'p str> {
        ports
            .iter()
            .find(|port| match &port.port_type {
                SerialPortType::UsbPort(usb) => {
                    usb.vid == self.vendor_id && usb.pid == self.product_id
                }
                _ => false,
            })
            .map(|port| port.port_name.as_str())
    }
}

#[async_trait]
impl SerialProvider for UsbSerialProvider {
    async fn request_port(&mut self) -> Result<Box<dyn Bootloader>, FlashError> {
        let ports = tokio_serial::available_ports()?;
        let name = self.select(&ports).ok_or(FlashError::NoPort {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
        })?;

        info!(port = %name, "opening serial port");
        let stream = tokio_serial::new(name, ROM_BAUD).open_native_async()?;

        Ok(Box::new(RomLoader::new(stream, self.baud_rate)))
    }
}

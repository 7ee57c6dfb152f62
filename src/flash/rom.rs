//! ESP32-S3 ROM bootloader protocol
//!
//! Requests are SLIP frames `[0x00, op, len: u16, checksum: u32, data]`, responses are
//! `[0x01, op, len: u16, value: u32, data, status: [u8; 4]]`, all little-endian.

use std::time::Duration;

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time,
};
use tokio_serial::{SerialPort, SerialStream};
use tokio_util::codec::Framed;

use super::{Bootloader, FlashError, SlipCodec};

/// Baud rate the ROM starts with
pub const ROM_BAUD: u32 = 115_200;

const FLASH_BEGIN: u8 = 0x02;
const WRITE_REG: u8 = 0x09;
const READ_REG: u8 = 0x0A;
const SYNC: u8 = 0x08;
const SPI_ATTACH: u8 = 0x0D;
const CHANGE_BAUDRATE: u8 = 0x0F;
const FLASH_DEFL_BEGIN: u8 = 0x10;
const FLASH_DEFL_DATA: u8 = 0x11;
const FLASH_DEFL_END: u8 = 0x12;

const CHECKSUM_SEED: u8 = 0xEF;
const STATUS_LEN: usize = 4;
const BLOCK_SIZE: usize = 0x400;
const MAX_STRAY_RESPONSES: usize = 100;
const SYNC_ATTEMPTS: usize = 5;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const SYNC_TIMEOUT: Duration = Duration::from_millis(100);
const ERASE_SECS_PER_MB: u64 = 30;
const WRITE_SECS_PER_MB: u64 = 40;

const SPI_REG_BASE: u32 = 0x6000_2000;
const SPI_CMD: u32 = SPI_REG_BASE;
const SPI_USR: u32 = SPI_REG_BASE + 0x18;
const SPI_USR2: u32 = SPI_REG_BASE + 0x20;
const SPI_MISO_DLEN: u32 = SPI_REG_BASE + 0x28;
const SPI_W0: u32 = SPI_REG_BASE + 0x58;
const SPI_CMD_USR: u32 = 1 << 18;
const SPI_USR_COMMAND: u32 = 1 << 31;
const SPI_USR_MISO: u32 = 1 << 28;
const SPI_USR2_COMMAND_LEN_SHIFT: u32 = 28;
const SPIFLASH_RDID: u32 = 0x9F;

const IMAGE_MAGIC: u8 = 0xE9;
const FLASH_MODE_DIO: u8 = 0x02;
const FLASH_FREQ_80M: u8 = 0x0F;

/// Control lines of a serial port
pub trait SerialLines {
    fn set_dtr(&mut self, level: bool) -> Result<(), FlashError>;

    fn set_rts(&mut self, level: bool) -> Result<(), FlashError>;

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), FlashError>;
}

impl SerialLines for SerialStream {
    fn set_dtr(&mut self, level: bool) -> Result<(), FlashError> {
        Ok(self.write_data_terminal_ready(level)?)
    }

    fn set_rts(&mut self, level: bool) -> Result<(), FlashError> {
        Ok(self.write_request_to_send(level)?)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), FlashError> {
        Ok(SerialPort::set_baud_rate(self, baud_rate)?)
    }
}

fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(CHECKSUM_SEED, |acc, b| acc ^ b) as u32
}

fn timeout_per_mb(secs_per_mb: u64, size: u64) -> Duration {
    DEFAULT_TIMEOUT.max(Duration::from_millis(secs_per_mb * size * 1000 / (1024 * 1024)))
}

/// Capacity from the size byte of a JEDEC id
pub fn flash_size_from_id(size_id: u8) -> Result<u64, FlashError> {
    let shift = match size_id {
        0x12..=0x1C => size_id as u32,
        0x20..=0x22 => (size_id - 0x20) as u32 + 26,
        0x32..=0x3A => (size_id - 0x20) as u32,
        other => return Err(FlashError::UnknownFlashSize(other)),
    };

    Ok(1u64 << shift)
}

/// Set the flash mode, frequency and size fields of a bootable image header
pub fn patch_image_header(image: &mut [u8], capacity: u64) {
    if image.len() < 4 || image[0] != IMAGE_MAGIC {
        return;
    }

    let megabytes = capacity >> 20;
    if megabytes == 0 || !megabytes.is_power_of_two() {
        return;
    }

    image[2] = FLASH_MODE_DIO;
    image[3] = ((megabytes.trailing_zeros() as u8) << 4) | FLASH_FREQ_80M;
}

pub struct RomLoader<T> {
    port: Framed<T, SlipCodec>,
    baud_rate: u32,
    flash_size: Option<u64>,
}

impl<T> RomLoader<T>
where
    T: AsyncRead + AsyncWrite + SerialLines + Unpin + Send,
{
    pub fn new(port: T, baud_rate: u32) -> Self {
        Self {
            port: Framed::new(port, SlipCodec::new()),
            baud_rate,
            flash_size: None,
        }
    }

    async fn command(
        &mut self,
        op: u8,
        data: &[u8],
        checksum: u32,
        timeout: Duration,
    ) -> Result<u32, FlashError> {
        let mut packet = BytesMut::with_capacity(8 + data.len());
        packet.put_u8(0x00);
        packet.put_u8(op);
        packet.put_u16_le(data.len() as u16);
        packet.put_u32_le(checksum);
        packet.put_slice(data);
        self.port.send(packet.freeze()).await?;

        for _ in 0..MAX_STRAY_RESPONSES {
            let frame = match time::timeout(timeout, self.port.next()).await {
                Err(_) => return Err(FlashError::Timeout(op)),
                Ok(None) => return Err(FlashError::Disconnected),
                Ok(Some(frame)) => frame?,
            };

            if frame.len() < 8 || frame[0] != 0x01 || frame[1] != op {
                trace!(op = %op, len = %frame.len(), "ignoring stray frame");
                continue;
            }

            let value = LittleEndian::read_u32(&frame[4..8]);
            let body = frame.slice(8..);
            if body.len() < STATUS_LEN {
                return Err(FlashError::InvalidResponse(op));
            }

            let status_at = body.len() - STATUS_LEN;
            let (status, error) = (body[status_at], body[status_at + 1]);
            if status != 0 {
                return Err(FlashError::Command { op, status, error });
            }

            return Ok(value);
        }

        Err(FlashError::InvalidResponse(op))
    }

    /// Discard pending input
    async fn drain(&mut self) {
        while let Ok(Some(frame)) = time::timeout(SYNC_TIMEOUT, self.port.next()).await {
            if let Err(error) = frame {
                trace!(error = %error, "discarding invalid input");
            }
        }
    }

    async fn read_reg(&mut self, addr: u32) -> Result<u32, FlashError> {
        let mut data = [0; 4];
        LittleEndian::write_u32(&mut data, addr);
        self.command(READ_REG, &data, 0, DEFAULT_TIMEOUT).await
    }

    async fn write_reg(&mut self, addr: u32, value: u32) -> Result<(), FlashError> {
        let mut data = [0; 16];
        LittleEndian::write_u32_into(&[addr, value, u32::MAX, 0], &mut data);
        self.command(WRITE_REG, &data, 0, DEFAULT_TIMEOUT).await?;
        Ok(())
    }

    /// Classic DTR/RTS sequence pulling IO0 low during reset
    async fn reset_to_bootloader(&mut self) -> Result<(), FlashError> {
        let lines = self.port.get_mut();
        lines.set_dtr(false)?;
        lines.set_rts(true)?;
        time::sleep(Duration::from_millis(100)).await;

        let lines = self.port.get_mut();
        lines.set_dtr(true)?;
        lines.set_rts(false)?;
        time::sleep(Duration::from_millis(50)).await;

        self.port.get_mut().set_dtr(false)
    }

    async fn sync(&mut self) -> Result<(), FlashError> {
        let mut data = vec![0x07, 0x07, 0x12, 0x20];
        data.extend_from_slice(&[0x55; 32]);

        let mut last_error = FlashError::Timeout(SYNC);
        for _ in 0..SYNC_ATTEMPTS {
            match self.command(SYNC, &data, 0, SYNC_TIMEOUT).await {
                Ok(_) => {
                    // The ROM answers a single sync several times
                    self.drain().await;
                    return Ok(());
                }
                Err(error) => last_error = error,
            }
        }

        Err(last_error)
    }

    async fn change_baud_rate(&mut self) -> Result<(), FlashError> {
        if self.baud_rate == ROM_BAUD {
            return Ok(());
        }

        let mut data = [0; 8];
        LittleEndian::write_u32_into(&[self.baud_rate, 0], &mut data);
        self.command(CHANGE_BAUDRATE, &data, 0, DEFAULT_TIMEOUT)
            .await?;

        self.port.get_mut().set_baud_rate(self.baud_rate)?;
        time::sleep(Duration::from_millis(50)).await;
        self.drain().await;

        debug!(baud_rate = %self.baud_rate, "changed baud rate");
        Ok(())
    }

    /// Read the JEDEC id of the attached SPI flash
    async fn flash_id(&mut self) -> Result<u32, FlashError> {
        let old_usr = self.read_reg(SPI_USR).await?;
        let old_usr2 = self.read_reg(SPI_USR2).await?;

        self.write_reg(SPI_MISO_DLEN, 24 - 1).await?;
        self.write_reg(SPI_USR, SPI_USR_COMMAND | SPI_USR_MISO)
            .await?;
        self.write_reg(SPI_USR2, (7 << SPI_USR2_COMMAND_LEN_SHIFT) | SPIFLASH_RDID)
            .await?;
        self.write_reg(SPI_W0, 0).await?;
        self.write_reg(SPI_CMD, SPI_CMD_USR).await?;

        let mut done = false;
        for _ in 0..10 {
            if self.read_reg(SPI_CMD).await? & SPI_CMD_USR == 0 {
                done = true;
                break;
            }
        }

        if !done {
            return Err(FlashError::Timeout(READ_REG));
        }

        let id = self.read_reg(SPI_W0).await? & 0xFF_FFFF;

        self.write_reg(SPI_USR, old_usr).await?;
        self.write_reg(SPI_USR2, old_usr2).await?;

        trace!(id = %format_args!("{:06x}", id), "flash id");
        Ok(id)
    }

    async fn capacity(&mut self) -> Result<u64, FlashError> {
        match self.flash_size {
            Some(size) => Ok(size),
            None => {
                let id = self.flash_id().await?;
                let size = flash_size_from_id((id >> 16) as u8)?;
                self.flash_size = Some(size);
                Ok(size)
            }
        }
    }
}

#[async_trait]
impl<T> Bootloader for RomLoader<T>
where
    T: AsyncRead + AsyncWrite + SerialLines + Unpin + Send,
{
    #[instrument(skip(self))]
    async fn connect(&mut self) -> Result<(), FlashError> {
        self.port.get_mut().set_baud_rate(ROM_BAUD)?;
        self.reset_to_bootloader().await?;
        self.drain().await;

        self.sync().await?;
        self.change_baud_rate().await?;
        self.command(SPI_ATTACH, &[0; 8], 0, DEFAULT_TIMEOUT)
            .await?;

        Ok(())
    }

    async fn flash_size(&mut self) -> Result<u64, FlashError> {
        self.flash_size = None;
        self.capacity().await
    }

    #[instrument(skip(self))]
    async fn erase_all(&mut self) -> Result<(), FlashError> {
        let capacity = self.capacity().await?;
        let blocks = (capacity as usize + BLOCK_SIZE - 1) / BLOCK_SIZE;

        let mut data = [0; 20];
        LittleEndian::write_u32_into(
            &[capacity as u32, blocks as u32, BLOCK_SIZE as u32, 0, 0],
            &mut data,
        );

        self.command(
            FLASH_BEGIN,
            &data,
            0,
            timeout_per_mb(ERASE_SECS_PER_MB, capacity),
        )
        .await?;

        debug!(capacity = %capacity, "erased flash");
        Ok(())
    }

    #[instrument(skip(self, image, progress), fields(len = image.len()))]
    async fn write_flash(
        &mut self,
        offset: u32,
        image: &[u8],
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<(), FlashError> {
        let mut image = image.to_vec();
        if offset == 0 {
            let capacity = self.capacity().await?;
            patch_image_header(&mut image, capacity);
        }

        // Pad to a word boundary
        image.resize((image.len() + 3) & !3, 0xFF);

        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&image, 9);
        let total = compressed.len();
        let blocks = (total + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let erase_size = (image.len() + BLOCK_SIZE - 1) / BLOCK_SIZE * BLOCK_SIZE;

        debug!(
            size = %image.len(),
            compressed = %total,
            blocks = %blocks,
            "writing image"
        );

        let mut data = [0; 20];
        LittleEndian::write_u32_into(
            &[erase_size as u32, blocks as u32, BLOCK_SIZE as u32, offset, 0],
            &mut data,
        );
        self.command(
            FLASH_DEFL_BEGIN,
            &data,
            0,
            timeout_per_mb(ERASE_SECS_PER_MB, erase_size as u64),
        )
        .await?;

        let mut written = 0;
        progress(written, total);

        for (seq, block) in compressed.chunks(BLOCK_SIZE).enumerate() {
            let mut data = BytesMut::with_capacity(16 + block.len());
            data.put_u32_le(block.len() as u32);
            data.put_u32_le(seq as u32);
            data.put_u64_le(0);
            data.put_slice(block);

            self.command(
                FLASH_DEFL_DATA,
                &data,
                checksum(block),
                timeout_per_mb(WRITE_SECS_PER_MB, (BLOCK_SIZE * 4) as u64),
            )
            .await?;

            written += block.len();
            progress(written, total);
        }

        // Stay in the loader, the reset line reboots the chip
        self.command(FLASH_DEFL_END, &[1, 0, 0, 0], 0, DEFAULT_TIMEOUT)
            .await?;

        Ok(())
    }

    async fn set_dtr(&mut self, level: bool) -> Result<(), FlashError> {
        self.port.get_mut().set_dtr(level)
    }
}

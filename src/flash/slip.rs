use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

#[derive(Debug, Error)]
pub enum SlipError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid escape sequence {0:#04x}")]
    InvalidEscape(u8),
    #[error("frame exceeds {0} bytes")]
    TooLong(usize),
}

/// SLIP framing, as spoken by the ROM bootloader
///
/// Bytes outside of `END` delimited frames are discarded.
#[derive(Debug, Clone)]
pub struct SlipCodec {
    max_len: usize,
}

impl SlipCodec {
    pub fn new() -> Self {
        Self { max_len: 64 * 1024 }
    }
}

impl Default for SlipCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SlipCodec {
    type Item = Bytes;
    type Error = SlipError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Skip anything before the opening delimiter
            match src.iter().position(|&b| b == END) {
                Some(start) => src.advance(start),
                None => {
                    src.clear();
                    return Ok(None);
                }
            }

            let end = match src[1..].iter().position(|&b| b == END) {
                Some(end) => end + 1,
                None => {
                    if src.len() > self.max_len {
                        src.clear();
                        return Err(SlipError::TooLong(self.max_len));
                    }

                    return Ok(None);
                }
            };

            if end == 1 {
                // Empty frame, the second delimiter opens the next one
                src.advance(1);
                continue;
            }

            let frame = src.split_to(end + 1);
            let mut out = BytesMut::with_capacity(end - 1);
            let mut escaped = frame[1..end].iter();

            while let Some(&b) = escaped.next() {
                match b {
                    ESC => match escaped.next() {
                        Some(&ESC_END) => out.put_u8(END),
                        Some(&ESC_ESC) => out.put_u8(ESC),
                        Some(&other) => return Err(SlipError::InvalidEscape(other)),
                        None => return Err(SlipError::InvalidEscape(END)),
                    },
                    other => out.put_u8(other),
                }
            }

            return Ok(Some(out.freeze()));
        }
    }
}

impl Encoder<Bytes> for SlipCodec {
    type Error = SlipError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 2);
        dst.put_u8(END);

        for b in item {
            match b {
                END => dst.put_slice(&[ESC, ESC_END]),
                ESC => dst.put_slice(&[ESC, ESC_ESC]),
                other => dst.put_u8(other),
            }
        }

        dst.put_u8(END);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_delimiters() {
        let mut codec = SlipCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::from_static(&[0x01, END, 0x02, ESC, 0x03]), &mut buf)
            .unwrap();

        assert_eq!(
            &buf[..],
            &[END, 0x01, ESC, ESC_END, 0x02, ESC, ESC_ESC, 0x03, END]
        );

        let frame = codec.decode(&mut buf).unwrap().expect("no frame");
        assert_eq!(&frame[..], &[0x01, END, 0x02, ESC, 0x03]);
        assert!(buf.is_empty());
    }

    #[test]
    fn skips_noise_and_waits_for_full_frames() {
        let mut codec = SlipCodec::new();
        let mut buf = BytesMut::from(&b"ESP-ROM:esp32s3\r\n"[..]);
        buf.put_slice(&[END, 0x01, 0x08]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], &[END, 0x01, 0x08]);

        buf.put_slice(&[0x04, END, END, 0x01]);
        let frame = codec.decode(&mut buf).unwrap().expect("no frame");
        assert_eq!(&frame[..], &[0x01, 0x08, 0x04]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], &[END, 0x01]);
    }

    #[test]
    fn back_to_back_delimiters_are_not_frames() {
        let mut codec = SlipCodec::new();
        let mut buf = BytesMut::from(&[END, END, 0x05, END][..]);

        let frame = codec.decode(&mut buf).unwrap().expect("no frame");
        assert_eq!(&frame[..], &[0x05]);
    }

    #[test]
    fn rejects_bad_escapes() {
        let mut codec = SlipCodec::new();
        let mut buf = BytesMut::from(&[END, ESC, 0x00, END][..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(SlipError::InvalidEscape(0x00))
        ));
    }
}

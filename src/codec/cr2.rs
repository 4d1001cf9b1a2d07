//! Canon CR2 reader
//!
//! A CR2 file is a TIFF container. IFD0 points (through StripOffsets and
//! StripByteCounts) at a full-resolution baseline JPEG rendered by the camera,
//! which is what we decode. The sensor data in the later IFDs is left alone.

use image::DynamicImage;

use super::{decode_jpeg, CodecError};

const TAG_STRIP_OFFSETS: u16 = 0x0111;
const TAG_STRIP_BYTE_COUNTS: u16 = 0x0117;

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

const IFD_ENTRY_LEN: usize = 12;

#[derive(Debug, Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

struct Container<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> Container<'a> {
    fn parse(data: &'a [u8]) -> Result<Self, CodecError> {
        if data.len() < 16 {
            return Err(CodecError::Container(format!("file too short ({} bytes)", data.len())));
        }

        let order = match &data[..4] {
            b"II*\0" => ByteOrder::Little,
            b"MM\0*" => ByteOrder::Big,
            _ => return Err(CodecError::Container("missing TIFF header".into())),
        };

        if &data[8..10] != b"CR" {
            return Err(CodecError::Container("missing CR2 marker".into()));
        }

        Ok(Self { data, order })
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], CodecError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| {
                CodecError::Container(format!("read of {} bytes at {} is out of bounds", len, offset))
            })
    }

    fn u16_at(&self, offset: usize) -> Result<u16, CodecError> {
        let b = self.bytes(offset, 2)?;
        let b = [b[0], b[1]];
        Ok(match self.order {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        })
    }

    fn u32_at(&self, offset: usize) -> Result<u32, CodecError> {
        let b = self.bytes(offset, 4)?;
        let b = [b[0], b[1], b[2], b[3]];
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        })
    }

    /// Single-valued SHORT or LONG entry stored inline in the IFD.
    fn entry_value(&self, entry: usize) -> Result<u32, CodecError> {
        let kind = self.u16_at(entry + 2)?;
        match kind {
            TYPE_SHORT => Ok(self.u16_at(entry + 8)? as u32),
            TYPE_LONG => self.u32_at(entry + 8),
            other => Err(CodecError::Container(format!("unexpected field type {}", other))),
        }
    }

    fn ifd0_strip(&self) -> Result<(usize, usize), CodecError> {
        let ifd = self.u32_at(4)? as usize;
        let count = self.u16_at(ifd)? as usize;

        let mut offset = None;
        let mut length = None;
        for i in 0..count {
            let entry = ifd + 2 + i * IFD_ENTRY_LEN;
            match self.u16_at(entry)? {
                TAG_STRIP_OFFSETS => offset = Some(self.entry_value(entry)? as usize),
                TAG_STRIP_BYTE_COUNTS => length = Some(self.entry_value(entry)? as usize),
                _ => {}
            }
        }

        match (offset, length) {
            (Some(offset), Some(length)) if length > 0 => Ok((offset, length)),
            _ => Err(CodecError::Container("IFD0 has no preview strip".into())),
        }
    }
}

/// Borrow the embedded full-size JPEG out of a CR2 file.
pub fn embedded_jpeg(data: &[u8]) -> Result<&[u8], CodecError> {
    let container = Container::parse(data)?;
    let (offset, length) = container.ifd0_strip()?;
    container.bytes(offset, length)
}

pub fn decode(data: &[u8]) -> Result<DynamicImage, CodecError> {
    decode_jpeg(embedded_jpeg(data)?)
}

/// Build a minimal little-endian CR2 container around `jpeg`.
///
/// Only IFD0 is populated, which is all [`decode`] reads. Used by the
/// simulated camera.
pub fn build_container(jpeg: &[u8]) -> Vec<u8> {
    const IFD0: u32 = 16;
    const ENTRIES: u16 = 3;
    let ifd_len = 2 + ENTRIES as usize * IFD_ENTRY_LEN + 4;
    let strip = IFD0 + ifd_len as u32;

    let mut out = Vec::with_capacity(strip as usize + jpeg.len());
    out.extend_from_slice(b"II*\0");
    out.extend_from_slice(&IFD0.to_le_bytes());
    out.extend_from_slice(b"CR");
    out.extend_from_slice(&[2, 0]);
    // RAW IFD offset; absent here
    out.extend_from_slice(&0u32.to_le_bytes());

    out.extend_from_slice(&ENTRIES.to_le_bytes());
    let mut entry = |tag: u16, kind: u16, value: u32| {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    };
    // Compression = 6 (old-style JPEG), as written by the camera
    entry(0x0103, TYPE_SHORT, 6);
    entry(TAG_STRIP_OFFSETS, TYPE_LONG, strip);
    entry(TAG_STRIP_BYTE_COUNTS, TYPE_LONG, jpeg.len() as u32);
    out.extend_from_slice(&0u32.to_le_bytes());

    out.extend_from_slice(jpeg);
    out
}

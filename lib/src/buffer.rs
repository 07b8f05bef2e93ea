//! Graphics buffers exchanged through a `BufferQueue`.
//!
//! The application describes each buffer it wants to render into with an
//! `IgbpBuffer` record, which it passes to the display service when
//! preallocating the buffers of a layer. The queue only ever looks at the
//! dimensions of a buffer; every other field is carried along untouched so it
//! can be handed back to the application or to the GPU emulation.
use bitflags::bitflags;
use nix::errno::Errno;
use thiserror::Error;

/// Size in bytes of the `IgbpBuffer` record as laid out by the application.
pub const IGBP_BUFFER_SIZE: usize = 0x16C;

const MAGIC_OFFSET: usize = 0x00;
const WIDTH_OFFSET: usize = 0x04;
const HEIGHT_OFFSET: usize = 0x08;
const STRIDE_OFFSET: usize = 0x0C;
const FORMAT_OFFSET: usize = 0x10;
const USAGE_OFFSET: usize = 0x14;
const INDEX_OFFSET: usize = 0x1C;
const GPU_BUFFER_ID_OFFSET: usize = 0x2C;
const NVMAP_ID_OFFSET: usize = 0x74;
const BUFFER_OFFSET_OFFSET: usize = 0x78;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Transform to apply to a frame when presenting it.
    pub struct TransformFlags: u32 {
        const FLIP_H = 0x01;
        const FLIP_V = 0x02;
        const ROTATE_90 = 0x04;
        const ROTATE_180 = Self::FLIP_H.bits() | Self::FLIP_V.bits();
        const ROTATE_270 = Self::ROTATE_180.bits() | Self::ROTATE_90.bits();
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IgbpBufferError {
    #[error("buffer record too short: got {actual} bytes, expected {expected}")]
    TooShort { expected: usize, actual: usize },
}

impl From<IgbpBufferError> for Errno {
    fn from(err: IgbpBufferError) -> Self {
        match err {
            IgbpBufferError::TooShort { .. } => Errno::EINVAL,
        }
    }
}

/// Description of a graphics buffer, as provided by the application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct IgbpBuffer {
    pub magic: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub usage: u32,
    pub index: u32,
    pub gpu_buffer_id: u32,
    /// Handle of the nvmap object backing the buffer's memory.
    pub nvmap_id: u32,
    /// Offset of the buffer's data within the nvmap object.
    pub offset: u32,
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(word)
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

impl IgbpBuffer {
    /// Returns whether this buffer has exactly the dimensions `width`x`height`.
    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// Decode a buffer from the little-endian record written by the
    /// application. Bytes past `IGBP_BUFFER_SIZE` are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, IgbpBufferError> {
        if data.len() < IGBP_BUFFER_SIZE {
            return Err(IgbpBufferError::TooShort {
                expected: IGBP_BUFFER_SIZE,
                actual: data.len(),
            });
        }

        Ok(IgbpBuffer {
            magic: read_u32(data, MAGIC_OFFSET),
            width: read_u32(data, WIDTH_OFFSET),
            height: read_u32(data, HEIGHT_OFFSET),
            stride: read_u32(data, STRIDE_OFFSET),
            format: read_u32(data, FORMAT_OFFSET),
            usage: read_u32(data, USAGE_OFFSET),
            index: read_u32(data, INDEX_OFFSET),
            gpu_buffer_id: read_u32(data, GPU_BUFFER_ID_OFFSET),
            nvmap_id: read_u32(data, NVMAP_ID_OFFSET),
            offset: read_u32(data, BUFFER_OFFSET_OFFSET),
        })
    }

    /// Encode this buffer into the record layout expected by the application.
    /// Padding words are zeroed.
    pub fn write_to(&self, data: &mut [u8; IGBP_BUFFER_SIZE]) {
        data.fill(0);
        write_u32(data, MAGIC_OFFSET, self.magic);
        write_u32(data, WIDTH_OFFSET, self.width);
        write_u32(data, HEIGHT_OFFSET, self.height);
        write_u32(data, STRIDE_OFFSET, self.stride);
        write_u32(data, FORMAT_OFFSET, self.format);
        write_u32(data, USAGE_OFFSET, self.usage);
        write_u32(data, INDEX_OFFSET, self.index);
        write_u32(data, GPU_BUFFER_ID_OFFSET, self.gpu_buffer_id);
        write_u32(data, NVMAP_ID_OFFSET, self.nvmap_id);
        write_u32(data, BUFFER_OFFSET_OFFSET, self.offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_record() {
        let mut record = [0xffu8; IGBP_BUFFER_SIZE];
        write_u32(&mut record, MAGIC_OFFSET, 0x4743_4244);
        write_u32(&mut record, WIDTH_OFFSET, 1280);
        write_u32(&mut record, HEIGHT_OFFSET, 720);
        write_u32(&mut record, STRIDE_OFFSET, 1280);
        write_u32(&mut record, FORMAT_OFFSET, 1);
        write_u32(&mut record, USAGE_OFFSET, 0xb00);
        write_u32(&mut record, INDEX_OFFSET, 3);
        write_u32(&mut record, GPU_BUFFER_ID_OFFSET, 42);
        write_u32(&mut record, NVMAP_ID_OFFSET, 7);
        write_u32(&mut record, BUFFER_OFFSET_OFFSET, 0x3c0000);

        let buffer = IgbpBuffer::from_bytes(&record).unwrap();
        assert_eq!(
            buffer,
            IgbpBuffer {
                magic: 0x4743_4244,
                width: 1280,
                height: 720,
                stride: 1280,
                format: 1,
                usage: 0xb00,
                index: 3,
                gpu_buffer_id: 42,
                nvmap_id: 7,
                offset: 0x3c0000,
            }
        );
        assert!(buffer.matches(1280, 720));
        assert!(!buffer.matches(720, 1280));

        // Padding is not carried over.
        let mut encoded = [0u8; IGBP_BUFFER_SIZE];
        buffer.write_to(&mut encoded);
        assert_eq!(read_u32(&encoded, 0x18), 0);
        assert_eq!(IgbpBuffer::from_bytes(&encoded).unwrap(), buffer);
    }

    #[test]
    fn decode_short_record() {
        let record = [0u8; IGBP_BUFFER_SIZE - 1];
        let err = IgbpBuffer::from_bytes(&record).unwrap_err();
        assert_eq!(
            err,
            IgbpBufferError::TooShort {
                expected: IGBP_BUFFER_SIZE,
                actual: IGBP_BUFFER_SIZE - 1,
            }
        );
        assert_eq!(Errno::from(err), Errno::EINVAL);
    }

    #[test]
    fn rotations_are_composites() {
        assert_eq!(
            TransformFlags::ROTATE_180,
            TransformFlags::FLIP_H | TransformFlags::FLIP_V
        );
        assert_eq!(TransformFlags::ROTATE_270.bits(), 0x07);
        assert!(TransformFlags::default().is_empty());
    }
}

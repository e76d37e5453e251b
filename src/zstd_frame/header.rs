use byteorder::{ByteOrder, LE};
use fehler::{throw, throws};
use thiserror::Error;

/// Largest block a ZSTD frame may carry, whatever its window.
pub const BLOCK_SIZE_MAX: usize = 128 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("reserved bit in frame header descriptor set")]
    ReservedBitSet,
    #[error("block type 3 is reserved")]
    ReservedBlockType,
}

/// The frame header descriptor byte.
#[derive(Clone, Copy, Debug)]
pub struct Descriptor(pub u8);

impl Descriptor {
    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        if i & 0b0000_1000 != 0 {
            throw!(ParseError::ReservedBitSet);
        }
        Descriptor(i)
    }

    pub fn single_segment(self) -> bool { self.0 & 0b0010_0000 != 0 }
    pub fn content_checksum(self) -> bool { self.0 & 0b0000_0100 != 0 }

    fn content_size_len(self) -> usize {
        match self.0 >> 6 {
            0 if self.single_segment() => 1,
            0 => 0,
            1 => 2,
            2 => 4,
            _ => 8,
        }
    }

    fn dictionary_id_len(self) -> usize {
        [0, 1, 2, 4][(self.0 & 0b11) as usize]
    }

    /// Length of the whole frame header, magic number included.
    pub fn header_len(self) -> usize {
        let window_descriptor_len = if self.single_segment() { 0 } else { 1 };
        4 + 1 + window_descriptor_len + self.dictionary_id_len() + self.content_size_len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub window_size: u64,
    pub content_size: Option<u64>,
    pub dictionary_id: Option<u32>,
    pub content_checksum: bool,
}

impl FrameHeader {
    /// Parse a complete frame header; `header` starts at the magic number and is exactly
    /// `Descriptor::header_len` bytes long.
    #[throws(ParseError)]
    pub fn parse(header: &[u8]) -> Self {
        let descriptor = Descriptor::parse(header[4])?;
        let mut fields = &header[5..];

        let window_size = if descriptor.single_segment() {
            None
        } else {
            let wd = fields[0];
            fields = &fields[1..];
            let window_base = 1u64 << (10 + (wd >> 3));
            let window_add = (window_base / 8) * u64::from(wd & 0b111);
            Some(window_base + window_add)
        };

        let dictionary_id = match descriptor.dictionary_id_len() {
            0 => None,
            len => {
                let id = LE::read_uint(fields, len) as u32;
                fields = &fields[len..];
                Some(id)
            }
        };

        let content_size = match descriptor.content_size_len() {
            0 => None,
            1 => Some(u64::from(fields[0])),
            2 => Some(u64::from(LE::read_u16(fields)) + 256),
            len => Some(LE::read_uint(fields, len)),
        };

        FrameHeader {
            // single segment frames are exactly as large as their window
            window_size: window_size.or(content_size).unwrap_or(0),
            content_size,
            dictionary_id,
            content_checksum: descriptor.content_checksum(),
        }
    }

    /// Largest compressed or regenerated block size allowed in this frame.
    pub fn block_maxsize(&self) -> usize {
        if self.window_size < BLOCK_SIZE_MAX as u64 {
            self.window_size as usize
        } else {
            BLOCK_SIZE_MAX
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockType {
    Raw,
    Rle,
    Compressed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub last: bool,
    pub block_type: BlockType,
    pub size: usize,
}

impl BlockHeader {
    pub const LEN: usize = 3;

    #[throws(ParseError)]
    pub fn parse(bytes: &[u8]) -> Self {
        let raw = LE::read_u24(bytes);
        let block_type = match (raw >> 1) & 0b11 {
            0 => BlockType::Raw,
            1 => BlockType::Rle,
            2 => BlockType::Compressed,
            _ => throw!(ParseError::ReservedBlockType),
        };
        BlockHeader {
            last: raw & 1 != 0,
            block_type,
            size: (raw >> 3) as usize,
        }
    }

    /// Number of bytes following the block header.
    pub fn body_len(&self) -> usize {
        match self.block_type {
            BlockType::Rle => 1,
            _ => self.size,
        }
    }

    /// Decoded size of the block, known up front for everything but compressed blocks.
    pub fn regenerated_size(&self) -> Option<usize> {
        match self.block_type {
            BlockType::Compressed => None,
            _ => Some(self.size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_descriptor() {
        // exponent 0, mantissa 0: 1KiB
        let header = [0x28, 0xb5, 0x2f, 0xfd, 0x00, 0x00];
        assert_eq!(Descriptor(0x00).header_len(), 6);
        assert_eq!(FrameHeader::parse(&header).unwrap().window_size, 1024);

        // exponent 10, mantissa 3: 1MiB + 3/8 MiB
        let header = [0x28, 0xb5, 0x2f, 0xfd, 0x04, (10 << 3) | 3];
        let parsed = FrameHeader::parse(&header).unwrap();
        assert_eq!(parsed.window_size, (1 << 20) + 3 * (1 << 17));
        assert!(parsed.content_checksum);
        assert_eq!(parsed.content_size, None);
        assert_eq!(parsed.block_maxsize(), BLOCK_SIZE_MAX);
    }

    #[test]
    fn single_segment_content_sizes() {
        let header = [0x28, 0xb5, 0x2f, 0xfd, 0x20, 42];
        assert_eq!(Descriptor(0x20).header_len(), 6);
        let parsed = FrameHeader::parse(&header).unwrap();
        assert_eq!(parsed.content_size, Some(42));
        assert_eq!(parsed.window_size, 42);
        assert_eq!(parsed.block_maxsize(), 42);

        // two byte field is offset by 256
        let header = [0x28, 0xb5, 0x2f, 0xfd, 0x60, 0x01, 0x00];
        assert_eq!(FrameHeader::parse(&header).unwrap().content_size, Some(257));

        let header = [0x28, 0xb5, 0x2f, 0xfd, 0xa0, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(Descriptor(0xa0).header_len(), 9);
        assert_eq!(FrameHeader::parse(&header).unwrap().content_size, Some(65536));
    }

    #[test]
    fn dictionary_id() {
        let header = [0x28, 0xb5, 0x2f, 0xfd, 0x02, 0x00, 0x34, 0x12];
        assert_eq!(Descriptor(0x02).header_len(), 8);
        assert_eq!(FrameHeader::parse(&header).unwrap().dictionary_id, Some(0x1234));
    }

    #[test]
    fn reserved_bit() {
        assert_eq!(Descriptor::parse(0x08).unwrap_err(), ParseError::ReservedBitSet);
    }

    #[test]
    fn block_headers() {
        // last raw block of 5 bytes
        let header = BlockHeader::parse(&[(5 << 3) | 1, 0, 0]).unwrap();
        assert_eq!(header, BlockHeader { last: true, block_type: BlockType::Raw, size: 5 });
        assert_eq!(header.body_len(), 5);

        // rle block regenerating 1000 bytes from a single byte
        let raw = (1000u32 << 3) | (1 << 1);
        let header = BlockHeader::parse(&raw.to_le_bytes()[..3]).unwrap();
        assert_eq!(header.block_type, BlockType::Rle);
        assert!(!header.last);
        assert_eq!(header.size, 1000);
        assert_eq!(header.body_len(), 1);
        assert_eq!(header.regenerated_size(), Some(1000));

        let raw = (300u32 << 3) | (2 << 1);
        assert_eq!(BlockHeader::parse(&raw.to_le_bytes()[..3]).unwrap().regenerated_size(), None);

        assert_eq!(BlockHeader::parse(&[0b110, 0, 0]).unwrap_err(), ParseError::ReservedBlockType);
    }
}

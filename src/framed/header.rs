#![allow(non_upper_case_globals)]

use bitflags::bitflags;
use fehler::{throw, throws};
use thiserror::Error;

bitflags! {
    /// The FLG byte of an LZ4 frame descriptor.
    pub struct Flags: u8 {
        const IndependentBlocks = 0b00100000;
        const BlockChecksums    = 0b00010000;
        const ContentSize       = 0b00001000;
        const ContentChecksum   = 0b00000100;
        const DictionaryId      = 0b00000001;
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("block size code {0} is reserved by the frame format")]
    UnimplementedBlocksize(u8),
    #[error("file version {0} not supported")]
    UnsupportedVersion(u8),
    #[error("reserved bits in flags set")]
    ReservedFlagBitsSet,
    #[error("reserved bits in bd set")]
    ReservedBdBitsSet,
}

impl Flags {
    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        let version = i >> 6;
        if version != 1 {
            throw!(ParseError::UnsupportedVersion(version));
        }
        if (i & 0b10) != 0 {
            throw!(ParseError::ReservedFlagBitsSet);
        }

        Flags::from_bits_truncate(i)
    }

    pub fn independent_blocks(&self) -> bool { self.contains(Flags::IndependentBlocks) }
    pub fn block_checksums(&self)    -> bool { self.contains(Flags::BlockChecksums) }
    pub fn content_size(&self)       -> bool { self.contains(Flags::ContentSize) }
    pub fn content_checksum(&self)   -> bool { self.contains(Flags::ContentChecksum) }
    pub fn dictionary_id(&self)      -> bool { self.contains(Flags::DictionaryId) }

    /// Length of the whole frame header (magic and checksum byte included) these flags imply.
    pub fn header_len(&self) -> usize {
        let mut len = 4 + 1 + 1 + 1;
        if self.content_size() {
            len += 8;
        }
        if self.dictionary_id() {
            len += 4;
        }
        len
    }
}

/// The BD byte of an LZ4 frame descriptor.
pub struct BlockDescriptor(pub u8);
impl BlockDescriptor {
    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        if (i & 0b10001111) != 0 {
            throw!(ParseError::ReservedBdBitsSet);
        }
        BlockDescriptor(i)
    }

    #[throws(ParseError)]
    pub fn block_maxsize(&self) -> usize {
        let size = (self.0 >> 4) & 0b111;
        if (4..8).contains(&size) {
            1 << (size * 2 + 8)
        } else {
            throw!(ParseError::UnimplementedBlocksize(size))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_must_be_one() {
        assert_eq!(Flags::parse(0b0000_0000).unwrap_err(), ParseError::UnsupportedVersion(0));
        assert_eq!(Flags::parse(0b1100_0000).unwrap_err(), ParseError::UnsupportedVersion(3));
        assert!(Flags::parse(0b0100_0000).unwrap().is_empty());
    }

    #[test]
    fn reserved_flag_bit() {
        assert_eq!(Flags::parse(0b0100_0010).unwrap_err(), ParseError::ReservedFlagBitsSet);
    }

    #[test]
    fn flags_and_header_len() {
        let flags = Flags::parse(0b0110_1101).unwrap();
        assert!(flags.independent_blocks());
        assert!(!flags.block_checksums());
        assert!(flags.content_size());
        assert!(flags.content_checksum());
        assert!(flags.dictionary_id());
        assert_eq!(flags.header_len(), 19);
        assert_eq!(Flags::parse(0b0110_0000).unwrap().header_len(), 7);
    }

    #[test]
    fn block_sizes() {
        let sizes: Vec<_> = (4..8u8)
            .map(|code| BlockDescriptor::parse(code << 4).unwrap().block_maxsize().unwrap())
            .collect();
        assert_eq!(sizes, [64 * 1024, 256 * 1024, 1024 * 1024, 4 * 1024 * 1024]);

        let bd = BlockDescriptor::parse(0x30).unwrap();
        assert_eq!(bd.block_maxsize().unwrap_err(), ParseError::UnimplementedBlocksize(3));
        assert_eq!(BlockDescriptor::parse(0x41).err(), Some(ParseError::ReservedBdBitsSet));
        assert_eq!(BlockDescriptor::parse(0xC0).err(), Some(ParseError::ReservedBdBitsSet));
    }
}

use std::io::{self, ErrorKind};
use thiserror::Error;

use crate::framed::header::ParseError as LZ4HeaderError;
use crate::raw::DecodeError;
use crate::zstd_frame::header::ParseError as ZstdHeaderError;

/// Errors when decompressing an LZ4 or ZSTD stream.
///
/// Once a reader has produced one of these it is failed for good: every later read reports the
/// same error instead of trying to resynchronize.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecompressionError {
    #[error("the stream ended in the middle of a frame")]
    UnexpectedEof,
    #[error("wrong magic number in frame header: {0:08x}")]
    WrongMagic(u32),
    #[error("invalid LZ4 frame header")]
    LZ4HeaderParseError(#[from] LZ4HeaderError),
    #[error("invalid ZSTD frame header")]
    ZstdHeaderParseError(#[from] ZstdHeaderError),
    #[error("the raw LZ4 decompression failed (data corruption?)")]
    CodecError(#[from] DecodeError),
    #[error("the ZSTD decoder rejected the data: {0}")]
    ZstdCodecError(String),
    #[error("the header checksum was invalid")]
    HeaderChecksumFail,
    #[error("a block checksum was invalid")]
    BlockChecksumFail,
    #[error("the frame checksum was invalid")]
    FrameChecksumFail,
    #[error("a block of {size} bytes exceeds the frame's limit of {max} bytes")]
    BlockSizeOverflow { size: usize, max: usize },
    #[error("frame window of {0} bytes is larger than allowed")]
    WindowTooLarge(u64),
    #[error("frame declared {expected} bytes of content but decoded to {actual}")]
    ContentSizeMismatch { expected: u64, actual: u64 },
    #[error("the source failed earlier ({0:?})")]
    SourceFailed(ErrorKind),
}

impl From<DecompressionError> for io::Error {
    fn from(e: DecompressionError) -> io::Error {
        let kind = match e {
            DecompressionError::UnexpectedEof => ErrorKind::UnexpectedEof,
            DecompressionError::SourceFailed(kind) => kind,
            _ => ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

/// Why a decode step stopped: the source itself failed, or the bytes it gave were bad.
#[derive(Debug)]
pub(crate) enum Fault {
    Source(io::Error),
    Decode(DecompressionError),
}

impl Fault {
    /// Split into the error a failed reader keeps and the error handed to the caller now.
    ///
    /// Source errors reach the caller untouched; only their kind is remembered.
    pub fn into_parts(self) -> (DecompressionError, io::Error) {
        match self {
            Fault::Source(e) => (DecompressionError::SourceFailed(e.kind()), e),
            Fault::Decode(e) => (e.clone(), e.into()),
        }
    }
}

impl From<io::Error> for Fault {
    fn from(e: io::Error) -> Self {
        Fault::Source(e)
    }
}

impl From<DecompressionError> for Fault {
    fn from(e: DecompressionError) -> Self {
        Fault::Decode(e)
    }
}

macro_rules! decode_fault_from {
    ($($t:ty),*) => {$(
        impl From<$t> for Fault {
            fn from(e: $t) -> Self {
                Fault::Decode(e.into())
            }
        }
    )*};
}

decode_fault_from!(LZ4HeaderError, ZstdHeaderError, DecodeError);

//! Picking a reader for a stream by its magic number.

use log::debug;
use std::convert::TryFrom;
use std::io::{self, BufRead, Read, Seek, SeekFrom};
use thiserror::Error;

use crate::error::DecompressionError;
use crate::framed::LZ4StreamReader;
use crate::settings::ReaderSettings;
use crate::zstd_frame::ZstdStreamReader;
use crate::StreamRead;

const LZ4_SIGNATURE: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];
const ZSTD_SIGNATURE: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Selector value that asks [`define_reader`] to look at the data instead.
pub const AUTO_DETECT: u8 = 0;

/// Compression methods a stream can be read with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressionMethod {
    /// Not compressed: the source is read as it is.
    None = 0x02,
    Lz4 = 0x82,
    Zstd = 0x90,
}

#[derive(Error, Debug)]
pub enum SelectError {
    #[error("unknown compression method {0:#04x}")]
    UnknownMethod(u8),
    #[error("error reading from the input you gave me")]
    InputError(#[from] io::Error),
}

impl TryFrom<u8> for CompressionMethod {
    type Error = SelectError;

    fn try_from(value: u8) -> Result<Self, SelectError> {
        match value {
            0x02 => Ok(CompressionMethod::None),
            0x82 => Ok(CompressionMethod::Lz4),
            0x90 => Ok(CompressionMethod::Zstd),
            other => Err(SelectError::UnknownMethod(other)),
        }
    }
}

impl CompressionMethod {
    /// Method for a stream starting with `signature`. Anything unknown, including a stream
    /// shorter than four bytes, is taken to be uncompressed.
    pub fn from_signature(signature: &[u8]) -> Self {
        if signature == LZ4_SIGNATURE {
            CompressionMethod::Lz4
        } else if signature == ZSTD_SIGNATURE {
            CompressionMethod::Zstd
        } else {
            CompressionMethod::None
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Peek at the first four bytes of `source` and restore its position afterwards.
///
/// Needs `Seek` to put the bytes back: streams that can't rewind (pipes, sockets) have to name
/// their method up front with [`ReaderSettings::forced`] or [`StreamReader::with_method`].
pub fn detect_method<R: Read + Seek>(source: &mut R) -> io::Result<CompressionMethod> {
    let pos = source.stream_position()?;
    let mut signature = Vec::with_capacity(4);
    source.by_ref().take(4).read_to_end(&mut signature)?;
    source.seek(SeekFrom::Start(pos))?;

    let method = CompressionMethod::from_signature(&signature);
    debug!("signature {:02x?} detected as {:?}", signature, method);
    Ok(method)
}

/// A stream decoded with whichever method it was selected for.
pub enum StreamReader<R> {
    /// Uncompressed data, handed through untouched.
    Raw(R),
    Lz4(LZ4StreamReader<R>),
    Zstd(ZstdStreamReader<R>),
}

impl<R: Read> StreamReader<R> {
    /// Wrap `source` for `method` without looking at it. Works on any source.
    pub fn with_method(source: R, method: CompressionMethod) -> io::Result<Self> {
        ReaderSettings::default().forced(source, method)
    }

    pub fn method(&self) -> CompressionMethod {
        match self {
            StreamReader::Raw(_) => CompressionMethod::None,
            StreamReader::Lz4(_) => CompressionMethod::Lz4,
            StreamReader::Zstd(_) => CompressionMethod::Zstd,
        }
    }

    pub fn get_ref(&self) -> &R {
        match self {
            StreamReader::Raw(source) => source,
            StreamReader::Lz4(reader) => reader.get_ref(),
            StreamReader::Zstd(reader) => reader.get_ref(),
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        match self {
            StreamReader::Raw(source) => source,
            StreamReader::Lz4(reader) => reader.get_mut(),
            StreamReader::Zstd(reader) => reader.get_mut(),
        }
    }

    pub fn into_inner(self) -> R {
        match self {
            StreamReader::Raw(source) => source,
            StreamReader::Lz4(reader) => reader.into_inner(),
            StreamReader::Zstd(reader) => reader.into_inner(),
        }
    }
}

impl<R: Read> Read for StreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StreamReader::Raw(source) => source.read(buf),
            StreamReader::Lz4(reader) => reader.read(buf),
            StreamReader::Zstd(reader) => reader.read(buf),
        }
    }
}

/// Buffered access needs a buffered source only for the pass-through case.
impl<R: BufRead> BufRead for StreamReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            StreamReader::Raw(source) => source.fill_buf(),
            StreamReader::Lz4(reader) => reader.fill_buf(),
            StreamReader::Zstd(reader) => reader.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            StreamReader::Raw(source) => source.consume(amt),
            StreamReader::Lz4(reader) => reader.consume(amt),
            StreamReader::Zstd(reader) => reader.consume(amt),
        }
    }
}

impl<R: Read> StreamRead for StreamReader<R> {
    fn failure(&self) -> Option<&DecompressionError> {
        match self {
            StreamReader::Raw(_) => None,
            StreamReader::Lz4(reader) => reader.failure(),
            StreamReader::Zstd(reader) => reader.failure(),
        }
    }
}

impl ReaderSettings {
    /// Wrap `source` for `method` without looking at it.
    pub fn forced<R: Read>(&self, source: R, method: CompressionMethod) -> io::Result<StreamReader<R>> {
        Ok(match method {
            CompressionMethod::None => StreamReader::Raw(source),
            CompressionMethod::Lz4 => StreamReader::Lz4(self.lz4(source)),
            CompressionMethod::Zstd => StreamReader::Zstd(self.zstd(source)?),
        })
    }

    /// Pick the method from the stream's magic number; unknown data is passed through as it is.
    pub fn detect<R: Read + Seek>(&self, mut source: R) -> io::Result<StreamReader<R>> {
        let method = detect_method(&mut source)?;
        self.forced(source, method)
    }
}

/// Select a reader for `source` by selector value.
///
/// [`AUTO_DETECT`] sniffs the magic number (see [`detect_method`]); the values of
/// [`CompressionMethod`] force that method. Any other value is rejected before the source is
/// touched.
pub fn define_reader<R: Read + Seek>(source: R, method_value: u8) -> Result<StreamReader<R>, SelectError> {
    let settings = ReaderSettings::default();
    if method_value == AUTO_DETECT {
        return Ok(settings.detect(source)?);
    }
    let method = CompressionMethod::try_from(method_value)?;
    Ok(settings.forced(source, method)?)
}

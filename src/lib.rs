//! Streaming readers for LZ4 and ZSTD framed data.
//!
//! Both readers pull compressed bytes from any [`Read`] source on demand and hand out the
//! decompressed stream through [`Read`] and [`BufRead`](std::io::BufRead), with bounded buffers
//! whatever the length of the stream. [`define_reader`] picks the right one from the magic
//! number and passes data it doesn't recognize through untouched.
//!
//! ```no_run
//! use light_compressor::{define_reader, AUTO_DETECT};
//! use std::fs::File;
//! use std::io::{self, Read};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reader = define_reader(File::open("table.bin.zst")?, AUTO_DETECT)?;
//! io::copy(&mut reader, &mut io::stdout())?;
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

mod buffer;
mod error;
pub mod framed;
pub mod raw;
mod select;
mod settings;
pub mod zstd_frame;

use std::io::{self, Read};

pub use error::DecompressionError;
pub use framed::LZ4StreamReader;
pub use select::{define_reader, detect_method, CompressionMethod, SelectError, StreamReader, AUTO_DETECT};
pub use settings::ReaderSettings;
pub use zstd_frame::ZstdStreamReader;

/// Skippable frames share one magic number range across LZ4 and ZSTD: `0x184D2A50..=0x184D2A5F`.
const SKIPPABLE_MAGIC: u32 = 0x184D2A50;

fn is_skippable(magic: u32) -> bool {
    magic & 0xFFFF_FFF0 == SKIPPABLE_MAGIC
}

/// What every reader of this crate offers on top of [`Read`].
pub trait StreamRead: Read {
    /// Read up to `n` decompressed bytes. Fewer come back only at the end of the stream.
    fn read_chunk(&mut self, n: usize) -> io::Result<Vec<u8>>
    where
        Self: Sized,
    {
        let mut chunk = Vec::with_capacity(n.min(64 * 1024));
        self.by_ref().take(n as u64).read_to_end(&mut chunk)?;
        Ok(chunk)
    }

    /// The fault that stopped this reader, if any. A failed reader keeps reporting it.
    fn failure(&self) -> Option<&DecompressionError>;
}

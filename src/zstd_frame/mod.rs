//! The Zstandard frame format.
//!
//! Frame and block headers are parsed here so the reader knows where every block ends, can bound
//! its buffers and can tell a truncated stream from a finished one. The entropy-coded block
//! contents are decoded by libzstd through the `zstd` crate.

mod decompress;
pub mod header;

/// The four magic bytes at the start of every ZSTD frame.
const MAGIC: u32 = 0xFD2FB528;

pub use decompress::*;

//! The raw LZ4 block format.
//!
//! A block is a sequence of literal runs and back-references into the previous 64KiB of output.
//! It has no header, no checksum and no length of its own: the frame format wraps blocks and
//! supplies all of that. This module only knows how to turn one block back into bytes.

mod decompress;

pub use decompress::*;

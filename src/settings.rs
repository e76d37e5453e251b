use log::warn;
use std::cmp;
use std::io::{self, Read};

use crate::framed::LZ4StreamReader;
use crate::zstd_frame::ZstdStreamReader;

/// Knobs shared by both stream readers.
///
/// ```
/// # use light_compressor::ReaderSettings;
/// # use std::io::Read;
/// let compressed: &[u8] = &[0x04, 0x22, 0x4d, 0x18, 0x60, 0x40, 0x82, 0, 0, 0, 0];
/// let mut reader = ReaderSettings::default()
///     .verify_checksums(false)
///     .read_size(4096)
///     .lz4(compressed);
/// let mut plaintext = Vec::new();
/// reader.read_to_end(&mut plaintext)?;
/// assert!(plaintext.is_empty());
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct ReaderSettings {
    pub(crate) verify_checksums: bool,
    pub(crate) read_size: usize,
    pub(crate) window_log_max: u32,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            read_size: 64 * 1024,
            window_log_max: 27,
        }
    }
}

impl ReaderSettings {
    /// Check header, block and content checksums where the frame carries them.
    pub fn verify_checksums(&mut self, v: bool) -> &mut Self {
        self.verify_checksums = v;
        self
    }

    /// Initial size of the compressed input buffer, which is also the most a single read
    /// from the source asks for. The buffer still grows to fit a whole block when a frame
    /// uses blocks larger than this.
    pub fn read_size(&mut self, v: usize) -> &mut Self {
        self.read_size = cmp::max(v, 16);
        self
    }

    /// Largest ZSTD window (as a power of two) a frame may ask for. Clamped to 10..=31.
    pub fn window_log_max(&mut self, v: u32) -> &mut Self {
        self.window_log_max = cmp::min(cmp::max(v, 10), 31);
        self
    }

    pub fn lz4<R: Read>(&self, source: R) -> LZ4StreamReader<R> {
        self.warn_if_unverified();
        LZ4StreamReader::with_settings(source, self)
    }

    pub fn zstd<R: Read>(&self, source: R) -> io::Result<ZstdStreamReader<R>> {
        self.warn_if_unverified();
        ZstdStreamReader::with_settings(source, self)
    }

    fn warn_if_unverified(&self) {
        if !self.verify_checksums {
            warn!("checksum verification is disabled, corrupted frames may go unnoticed");
        }
    }
}

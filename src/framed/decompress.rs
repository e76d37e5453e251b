use byteorder::{ByteOrder, LE};
use fehler::{throw, throws};
use log::{debug, trace};
use std::cmp;
use std::hash::Hasher;
use std::io::{self, BufRead, Read};
use std::mem;
use twox_hash::XxHash32;

use super::header::{BlockDescriptor, Flags};
use super::{INCOMPRESSIBLE, MAGIC, WINDOW_SIZE};
use crate::buffer::InputBuffer;
use crate::error::{DecompressionError, Fault};
use crate::raw;
use crate::settings::ReaderSettings;
use crate::{is_skippable, StreamRead};

type Error = Fault;

/// Per-frame decoding state, created from the frame descriptor.
struct Frame {
    flags: Flags,
    block_maxsize: usize,
    content_size: Option<u64>,
    dictionary_id: Option<u32>,
    content_hasher: Option<XxHash32>,
    carryover_window: Option<Vec<u8>>,
    decoded: u64,
}

enum State {
    /// Expecting a magic number. `first` is set until a frame with content has been seen;
    /// skippable frames don't count.
    FrameStart { first: bool },
    Blocks(Frame),
    Finished,
    Failed(DecompressionError),
}

/// Streaming reader for LZ4 frames.
///
/// Pulls compressed bytes from `R` as the caller asks for decompressed data and decodes one
/// block at a time, so memory use is bounded by the frame's block size no matter how long the
/// stream is. Concatenated frames and skippable frames are read as one stream.
///
/// Nothing is read from the source until the first call to `read`/`fill_buf`.
/// The reader owns `R`; pass `&mut source` to keep using the source afterwards, or take it
/// back with [`into_inner`](Self::into_inner).
pub struct LZ4StreamReader<R> {
    input: InputBuffer<R>,
    state: State,
    verify_checksums: bool,
    buffer: Vec<u8>,
    bytes_taken: usize,
    /// Source error held back because bytes were copied out before it happened.
    deferred: Option<io::Error>,
}

impl<R: Read> LZ4StreamReader<R> {
    pub fn new(source: R) -> Self {
        ReaderSettings::default().lz4(source)
    }

    pub(crate) fn with_settings(source: R, settings: &ReaderSettings) -> Self {
        LZ4StreamReader {
            input: InputBuffer::new(source, settings.read_size),
            state: State::FrameStart { first: true },
            verify_checksums: settings.verify_checksums,
            buffer: Vec::new(),
            bytes_taken: 0,
            deferred: None,
        }
    }

    /// Maximum block size of the frame currently being read.
    pub fn block_size(&self) -> Option<usize> { self.frame().map(|f| f.block_maxsize) }
    /// Content size declared by the frame currently being read, if it declares one.
    pub fn frame_size(&self) -> Option<u64> { self.frame().and_then(|f| f.content_size) }
    pub fn dictionary_id(&self) -> Option<u32> { self.frame().and_then(|f| f.dictionary_id) }

    fn frame(&self) -> Option<&Frame> {
        match &self.state {
            State::Blocks(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Finished)
    }

    pub fn get_ref(&self) -> &R { self.input.get_ref() }
    pub fn get_mut(&mut self) -> &mut R { self.input.get_mut() }
    pub fn into_inner(self) -> R { self.input.into_inner() }

    #[throws]
    fn decode_step(&mut self) {
        self.state = match mem::replace(&mut self.state, State::Finished) {
            State::FrameStart { first } => self.read_frame_header(first)?,
            State::Blocks(frame) => self.decode_block(frame)?,
            done => done,
        };
    }

    #[throws]
    fn read_frame_header(&mut self, first: bool) -> State {
        let input = &mut self.input;
        if !input.fill(4)? {
            if input.is_exhausted() && !first {
                debug!("end of lz4 stream");
                return State::Finished;
            }
            throw!(DecompressionError::UnexpectedEof);
        }

        let magic = LE::read_u32(input.data());
        if is_skippable(magic) {
            input.skip_frame()?;
            return State::FrameStart { first };
        }
        if magic != MAGIC {
            throw!(DecompressionError::WrongMagic(magic));
        }

        if !input.fill(6)? {
            throw!(DecompressionError::UnexpectedEof);
        }
        let flags = Flags::parse(input.data()[4])?;
        let bd = BlockDescriptor::parse(input.data()[5])?;
        let header_len = flags.header_len();
        if !input.fill(header_len)? {
            throw!(DecompressionError::UnexpectedEof);
        }

        let header = &input.data()[..header_len];
        let mut fields = &header[6..header_len - 1];
        let content_size = if flags.content_size() {
            let i = LE::read_u64(fields);
            fields = &fields[8..];
            Some(i)
        } else {
            None
        };
        let dictionary_id = if flags.dictionary_id() {
            Some(LE::read_u32(fields))
        } else {
            None
        };

        if self.verify_checksums {
            let mut hasher = XxHash32::with_seed(0);
            hasher.write(&header[4..header_len - 1]);
            let header_checksum_actual = (hasher.finish() >> 8) as u8;
            if header[header_len - 1] != header_checksum_actual {
                throw!(DecompressionError::HeaderChecksumFail);
            }
        }

        let block_maxsize = bd.block_maxsize()?;
        input.consume(header_len);
        debug!(
            "lz4 frame: block size {}, flags {:?}, content size {:?}",
            block_maxsize, flags, content_size
        );

        let content_hasher = if flags.content_checksum() && self.verify_checksums {
            Some(XxHash32::with_seed(0))
        } else {
            None
        };

        let carryover_window = if flags.independent_blocks() {
            None
        } else {
            Some(Vec::with_capacity(WINDOW_SIZE))
        };

        State::Blocks(Frame {
            flags,
            block_maxsize,
            content_size,
            dictionary_id,
            content_hasher,
            carryover_window,
            decoded: 0,
        })
    }

    #[throws]
    fn decode_block(&mut self, mut frame: Frame) -> State {
        let input = &mut self.input;
        if !input.fill(4)? {
            throw!(DecompressionError::UnexpectedEof);
        }
        let block_length = LE::read_u32(input.data());
        if block_length == 0 {
            return self.finish_frame(frame)?;
        }

        let is_compressed = block_length & INCOMPRESSIBLE == 0;
        let block_length = (block_length & !INCOMPRESSIBLE) as usize;
        if block_length > frame.block_maxsize {
            throw!(DecompressionError::BlockSizeOverflow { size: block_length, max: frame.block_maxsize });
        }

        let checksum_len = if frame.flags.block_checksums() { 4 } else { 0 };
        let total_len = 4 + block_length + checksum_len;
        if !input.fill(total_len)? {
            throw!(DecompressionError::UnexpectedEof);
        }

        let (data, checksum) = input.data()[4..total_len].split_at(block_length);
        if self.verify_checksums && !checksum.is_empty() {
            let mut hasher = XxHash32::with_seed(0);
            hasher.write(data);
            if hasher.finish() != LE::read_u32(checksum).into() {
                throw!(DecompressionError::BlockChecksumFail);
            }
        }

        let output = &mut self.buffer;
        if is_compressed {
            let prefix = frame.carryover_window.as_deref().unwrap_or(&[]);
            raw::decompress_raw(data, prefix, output, frame.block_maxsize)?;
        } else {
            output.extend_from_slice(data);
        }

        if let Some(window) = frame.carryover_window.as_mut() {
            remember(window, output);
        }
        if let Some(hasher) = frame.content_hasher.as_mut() {
            hasher.write(output);
        }
        frame.decoded += output.len() as u64;
        if let Some(expected) = frame.content_size {
            if frame.decoded > expected {
                throw!(DecompressionError::ContentSizeMismatch { expected, actual: frame.decoded });
            }
        }

        trace!(
            "lz4 block: {} -> {} bytes{}",
            block_length,
            output.len(),
            if is_compressed { "" } else { " (stored)" }
        );
        input.consume(total_len);
        State::Blocks(frame)
    }

    #[throws]
    fn finish_frame(&mut self, frame: Frame) -> State {
        let checksum_len = if frame.flags.content_checksum() { 4 } else { 0 };
        if !self.input.fill(4 + checksum_len)? {
            throw!(DecompressionError::UnexpectedEof);
        }
        if let Some(hasher) = frame.content_hasher {
            let checksum = LE::read_u32(&self.input.data()[4..8]);
            if hasher.finish() != checksum.into() {
                throw!(DecompressionError::FrameChecksumFail);
            }
        }
        if let Some(expected) = frame.content_size {
            if expected != frame.decoded {
                throw!(DecompressionError::ContentSizeMismatch { expected, actual: frame.decoded });
            }
        }
        self.input.consume(4 + checksum_len);
        debug!("lz4 frame complete, {} bytes", frame.decoded);
        State::FrameStart { first: false }
    }

    fn fail(&mut self, fault: Fault) -> io::Error {
        let (kept, err) = fault.into_parts();
        debug!("lz4 stream failed: {}", kept);
        self.state = State::Failed(kept);
        self.buffer.clear();
        self.bytes_taken = 0;
        err
    }
}

/// Keep the last `WINDOW_SIZE` bytes of output around for the next linked block.
fn remember(window: &mut Vec<u8>, output: &[u8]) {
    let outlen = output.len();
    if outlen < WINDOW_SIZE {
        let available_bytes = window.len() + outlen;
        if let Some(surplus_bytes) = available_bytes.checked_sub(WINDOW_SIZE) {
            // remove as many bytes from front as we are replacing
            window.drain(..surplus_bytes);
        }
        window.extend_from_slice(output);
    } else {
        window.clear();
        window.extend_from_slice(&output[outlen - WINDOW_SIZE..]);
    }
    debug_assert!(window.len() <= WINDOW_SIZE);
}

impl<R: Read> Read for LZ4StreamReader<R> {
    /// Fills `buf` completely unless the stream ends first.
    ///
    /// If a fault shows up after some bytes were already copied, those bytes are returned and
    /// the fault is reported by the next call.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }
        let mut written = 0;
        while written < buf.len() {
            let mybuf = match self.fill_buf() {
                Ok(mybuf) => mybuf,
                Err(e) if written == 0 => return Err(e),
                Err(e) => {
                    self.deferred = Some(e);
                    break;
                }
            };
            if mybuf.is_empty() {
                break;
            }
            let bytes_to_take = cmp::min(mybuf.len(), buf.len() - written);
            buf[written..written + bytes_to_take].copy_from_slice(&mybuf[..bytes_to_take]);
            self.consume(bytes_to_take);
            written += bytes_to_take;
        }
        Ok(written)
    }
}

impl<R: Read> BufRead for LZ4StreamReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.bytes_taken == self.buffer.len() {
            match &self.state {
                State::Finished => break,
                State::Failed(e) => return Err(e.clone().into()),
                _ => {}
            }
            self.buffer.clear();
            self.bytes_taken = 0;
            if let Err(fault) = self.decode_step() {
                return Err(self.fail(fault));
            }
        }
        Ok(&self.buffer[self.bytes_taken..])
    }

    fn consume(&mut self, amt: usize) {
        self.bytes_taken += amt;
        assert!(self.bytes_taken <= self.buffer.len(), "You consumed more bytes than I even gave you!");
    }
}

impl<R: Read> StreamRead for LZ4StreamReader<R> {
    fn failure(&self) -> Option<&DecompressionError> {
        match &self.state {
            State::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenience wrapper around `LZ4StreamReader` that reads everything into a vector and returns it.
#[throws(io::Error)]
pub fn decompress_frame<R: Read>(reader: R) -> Vec<u8> {
    let mut plaintext = Vec::new();
    LZ4StreamReader::new(reader).read_to_end(&mut plaintext)?;
    plaintext
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, ErrorKind};

    /// Assemble a frame by hand: FLG, BD, then `blocks` as (stored?, payload) pairs.
    fn frame(flg: u8, bd: u8, blocks: &[(bool, &[u8])], content: Option<&[u8]>) -> Vec<u8> {
        frame_with(flg, bd, &[], blocks, content)
    }

    /// Like `frame`, with the optional content size and dictionary ID fields in `fields`.
    fn frame_with(flg: u8, bd: u8, fields: &[u8], blocks: &[(bool, &[u8])], content: Option<&[u8]>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.push(flg);
        out.push(bd);
        out.extend_from_slice(fields);
        let mut hasher = XxHash32::with_seed(0);
        hasher.write(&out[4..]);
        out.push((hasher.finish() >> 8) as u8);
        for (stored, payload) in blocks {
            let mut len = payload.len() as u32;
            if *stored {
                len |= INCOMPRESSIBLE;
            }
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(payload);
            if flg & 0b0001_0000 != 0 {
                let mut hasher = XxHash32::with_seed(0);
                hasher.write(payload);
                out.extend_from_slice(&(hasher.finish() as u32).to_le_bytes());
            }
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        if let Some(content) = content {
            let mut hasher = XxHash32::with_seed(0);
            hasher.write(content);
            out.extend_from_slice(&(hasher.finish() as u32).to_le_bytes());
        }
        out
    }

    // version 1, independent blocks, block checksums, content checksum
    const FLG: u8 = 0b0111_0100;
    const BD_64K: u8 = 0x40;

    #[test]
    fn empty_frame() {
        let data = frame(0x60, BD_64K, &[], None);
        assert_eq!(decompress_frame(Cursor::new(data)).unwrap(), b"");
    }

    #[test]
    fn stored_and_compressed_blocks_with_checksums() {
        let data = frame(
            FLG,
            BD_64K,
            &[(true, b"hello "), (false, &[0x11, b'a', 1, 0])],
            Some(b"hello aaaaaa"),
        );
        assert_eq!(decompress_frame(Cursor::new(data)).unwrap(), b"hello aaaaaa");
    }

    #[test]
    fn linked_blocks_share_a_window() {
        // second block is a single 7 byte match reaching back into the first one
        let data = frame(0x40, BD_64K, &[(true, b"abc"), (false, &[0x03, 3, 0])], None);
        assert_eq!(decompress_frame(Cursor::new(data)).unwrap(), b"abcabcabca");

        // the same frame with independent blocks must fail
        let data = frame(0x60, BD_64K, &[(true, b"abc"), (false, &[0x03, 3, 0])], None);
        let err = decompress_frame(Cursor::new(data)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn corrupt_block_checksum() {
        let mut data = frame(FLG, BD_64K, &[(true, b"hello")], Some(b"hello"));
        data[7 + 4] ^= 1; // first payload byte
        let mut reader = LZ4StreamReader::new(Cursor::new(data));
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        let inner = err.into_inner().unwrap().downcast::<DecompressionError>().unwrap();
        assert_eq!(*inner, DecompressionError::BlockChecksumFail);
        assert_eq!(reader.failure(), Some(&DecompressionError::BlockChecksumFail));
        // failed for good
        assert!(reader.read(&mut [0; 4]).is_err());
    }

    #[test]
    fn corrupt_content_checksum_unless_disabled() {
        let mut data = frame(0x64, BD_64K, &[(true, b"hello")], Some(b"hello"));
        let last = data.len() - 1;
        data[last] ^= 0xff;
        let err = decompress_frame(Cursor::new(data.clone())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        let mut reader = ReaderSettings::default().verify_checksums(false).lz4(Cursor::new(data));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn bad_header_checksum() {
        let mut data = frame(0x60, BD_64K, &[], None);
        data[6] ^= 0x55;
        let mut reader = LZ4StreamReader::new(Cursor::new(data));
        reader.read(&mut [0; 1]).unwrap_err();
        assert_eq!(reader.failure(), Some(&DecompressionError::HeaderChecksumFail));
    }

    #[test]
    fn oversized_block_is_rejected_before_reading_it() {
        let mut data = frame(0x60, BD_64K, &[], None);
        data.truncate(7);
        data.extend_from_slice(&(65 * 1024u32 | INCOMPRESSIBLE).to_le_bytes());
        let mut reader = LZ4StreamReader::new(Cursor::new(data));
        reader.read(&mut [0; 1]).unwrap_err();
        assert_eq!(
            reader.failure(),
            Some(&DecompressionError::BlockSizeOverflow { size: 65 * 1024, max: 64 * 1024 })
        );
    }

    #[test]
    fn concatenated_and_skippable_frames() {
        let mut data = frame(0x60, BD_64K, &[(true, b"one ")], None);
        data.extend_from_slice(&0x184D2A53u32.to_le_bytes());
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(b"xyz");
        data.extend(frame(0x60, BD_64K, &[(true, b"two")], None));
        assert_eq!(decompress_frame(Cursor::new(data)).unwrap(), b"one two");
    }

    #[test]
    fn trailing_garbage_is_a_fault() {
        let mut data = frame(0x60, BD_64K, &[(true, b"one")], None);
        data.extend_from_slice(b"GARBAGE!");
        let mut reader = LZ4StreamReader::new(Cursor::new(data));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(out, b"one");
        assert!(matches!(reader.failure(), Some(DecompressionError::WrongMagic(_))));
    }

    #[test]
    fn empty_source_is_truncated() {
        let err = decompress_frame(Cursor::new(Vec::new())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn nothing_is_read_before_the_first_read_call() {
        let mut source = Cursor::new(frame(0x60, BD_64K, &[(true, b"x")], None));
        let reader = LZ4StreamReader::new(&mut source);
        assert!(reader.block_size().is_none());
        drop(reader);
        assert_eq!(source.position(), 0);
    }

    #[test]
    fn finished_reader_stays_finished() {
        let mut reader = LZ4StreamReader::new(Cursor::new(frame(0x60, BD_64K, &[(true, b"x")], None)));
        let mut buf = [0; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert!(reader.is_finished());
        for _ in 0..3 {
            assert_eq!(reader.read(&mut buf).unwrap(), 0);
        }
    }

    // independent blocks, content size and dictionary ID
    const FLG_SIZED: u8 = 0b0110_1001;

    fn sized_frame(content_size: u64, blocks: &[(bool, &[u8])]) -> Vec<u8> {
        let mut fields = content_size.to_le_bytes().to_vec();
        fields.extend_from_slice(&0x1234u32.to_le_bytes());
        frame_with(FLG_SIZED, BD_64K, &fields, blocks, None)
    }

    #[test]
    fn frame_metadata() {
        let mut reader = LZ4StreamReader::new(Cursor::new(sized_frame(5, &[(true, b"he"), (true, b"llo")])));
        let mut buf = [0; 2];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"he");
        assert_eq!(reader.frame_size(), Some(5));
        assert_eq!(reader.dictionary_id(), Some(0x1234));
        assert_eq!(reader.block_size(), Some(64 * 1024));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"llo");
        assert!(reader.is_finished());
        assert_eq!(reader.frame_size(), None);
    }

    #[test]
    fn frame_shorter_than_declared() {
        let mut reader = LZ4StreamReader::new(Cursor::new(sized_frame(6, &[(true, b"hello")])));
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(out, b"hello");
        assert_eq!(
            reader.failure(),
            Some(&DecompressionError::ContentSizeMismatch { expected: 6, actual: 5 })
        );
    }

    #[test]
    fn frame_longer_than_declared() {
        let mut reader = LZ4StreamReader::new(Cursor::new(sized_frame(3, &[(true, b"hello")])));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap_err();
        assert!(out.is_empty());
        assert_eq!(
            reader.failure(),
            Some(&DecompressionError::ContentSizeMismatch { expected: 3, actual: 5 })
        );
    }

    #[test]
    fn only_skippable_frames_is_truncated() {
        let mut data = 0x184D2A50u32.to_le_bytes().to_vec();
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(b"meta");
        let err = decompress_frame(Cursor::new(data)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}

use byteorder::{ByteOrder, LE};
use fehler::{throw, throws};
use log::{debug, trace};
use std::cmp;
use std::hash::Hasher;
use std::io::{self, BufRead, Read};
use std::mem;
use twox_hash::XxHash64;
use zstd::stream::raw::{DParameter, Decoder, InBuffer, Operation, OutBuffer};

use super::header::{BlockHeader, Descriptor, FrameHeader, BLOCK_SIZE_MAX};
use super::MAGIC;
use crate::buffer::InputBuffer;
use crate::error::{DecompressionError, Fault};
use crate::settings::ReaderSettings;
use crate::{is_skippable, StreamRead};

type Error = Fault;

struct Frame {
    header: FrameHeader,
    block_maxsize: usize,
    content_hasher: Option<XxHash64>,
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

/// Streaming reader for Zstandard frames.
///
/// Every complete unit of a frame (header, block, checksum) is buffered before it is handed to
/// the decompression context, so each call into libzstd yields at most one block of output. The
/// context, and with it the window of the current frame, belongs to this reader alone and is
/// reset whenever a new frame starts.
///
/// Like [`LZ4StreamReader`](crate::LZ4StreamReader), nothing is read from the source until the
/// first read.
pub struct ZstdStreamReader<R> {
    input: InputBuffer<R>,
    decoder: Decoder<'static>,
    state: State,
    verify_checksums: bool,
    window_size_max: u64,
    buffer: Vec<u8>,
    filled: usize,
    bytes_taken: usize,
    /// Source error held back because bytes were copied out before it happened.
    deferred: Option<io::Error>,
}

impl<R: Read> ZstdStreamReader<R> {
    pub fn new(source: R) -> io::Result<Self> {
        ReaderSettings::default().zstd(source)
    }

    pub(crate) fn with_settings(source: R, settings: &ReaderSettings) -> io::Result<Self> {
        let mut decoder = Decoder::new()?;
        decoder.set_parameter(DParameter::WindowLogMax(settings.window_log_max))?;
        Ok(ZstdStreamReader {
            input: InputBuffer::new(source, settings.read_size),
            decoder,
            state: State::FrameStart { first: true },
            verify_checksums: settings.verify_checksums,
            window_size_max: 1 << settings.window_log_max,
            buffer: vec![0; BLOCK_SIZE_MAX],
            filled: 0,
            bytes_taken: 0,
            deferred: None,
        })
    }

    /// Window size of the frame currently being read.
    pub fn window_size(&self) -> Option<u64> {
        self.frame().map(|f| f.header.window_size)
    }

    /// Content size declared by the frame currently being read, if it declares one.
    pub fn frame_size(&self) -> Option<u64> {
        self.frame().and_then(|f| f.header.content_size)
    }

    pub fn dictionary_id(&self) -> Option<u32> {
        self.frame().and_then(|f| f.header.dictionary_id)
    }

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
                debug!("end of zstd stream");
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

        if !input.fill(5)? {
            throw!(DecompressionError::UnexpectedEof);
        }
        let header_len = Descriptor::parse(input.data()[4])?.header_len();
        if !input.fill(header_len)? {
            throw!(DecompressionError::UnexpectedEof);
        }
        let header_bytes = &input.data()[..header_len];
        let header = FrameHeader::parse(header_bytes)?;
        if header.window_size > self.window_size_max {
            throw!(DecompressionError::WindowTooLarge(header.window_size));
        }

        self.decoder.reinit().map_err(codec_error)?;
        feed(&mut self.decoder, header_bytes, &mut self.buffer, &mut self.filled)?;
        input.consume(header_len);
        debug!(
            "zstd frame: window {} bytes, content size {:?}, checksum {}",
            header.window_size, header.content_size, header.content_checksum
        );

        let content_hasher = if header.content_checksum && self.verify_checksums {
            Some(XxHash64::with_seed(0))
        } else {
            None
        };

        State::Blocks(Frame {
            block_maxsize: header.block_maxsize(),
            header,
            content_hasher,
            decoded: 0,
        })
    }

    #[throws]
    fn decode_block(&mut self, mut frame: Frame) -> State {
        let input = &mut self.input;
        if !input.fill(BlockHeader::LEN)? {
            throw!(DecompressionError::UnexpectedEof);
        }
        let block = BlockHeader::parse(input.data())?;
        if block.size > frame.block_maxsize {
            throw!(DecompressionError::BlockSizeOverflow { size: block.size, max: frame.block_maxsize });
        }

        if let (Some(expected), Some(size)) = (frame.header.content_size, block.regenerated_size()) {
            let actual = frame.decoded + size as u64;
            if actual > expected || (block.last && actual != expected) {
                throw!(DecompressionError::ContentSizeMismatch { expected, actual });
            }
        }

        let total_len = BlockHeader::LEN + block.body_len();
        if !input.fill(total_len)? {
            throw!(DecompressionError::UnexpectedEof);
        }

        let start = self.filled;
        feed(&mut self.decoder, &input.data()[..total_len], &mut self.buffer, &mut self.filled)?;
        let output = &self.buffer[start..self.filled];

        if let Some(hasher) = frame.content_hasher.as_mut() {
            hasher.write(output);
        }
        frame.decoded += output.len() as u64;
        if let Some(expected) = frame.header.content_size {
            if frame.decoded > expected {
                throw!(DecompressionError::ContentSizeMismatch { expected, actual: frame.decoded });
            }
        }

        trace!("zstd block: {:?}, {} bytes out", block, output.len());
        input.consume(total_len);

        if block.last {
            self.finish_frame(frame)?
        } else {
            State::Blocks(frame)
        }
    }

    #[throws]
    fn finish_frame(&mut self, frame: Frame) -> State {
        if frame.header.content_checksum {
            let input = &mut self.input;
            if !input.fill(4)? {
                throw!(DecompressionError::UnexpectedEof);
            }
            let checksum = &input.data()[..4];
            if let Some(hasher) = frame.content_hasher {
                if hasher.finish() as u32 != LE::read_u32(checksum) {
                    throw!(DecompressionError::FrameChecksumFail);
                }
                // let libzstd see the checksum as well so its frame ends cleanly
                feed(&mut self.decoder, checksum, &mut self.buffer, &mut self.filled)?;
            }
            input.consume(4);
        }

        if let Some(expected) = frame.header.content_size {
            if expected != frame.decoded {
                throw!(DecompressionError::ContentSizeMismatch { expected, actual: frame.decoded });
            }
        }
        debug!("zstd frame complete, {} bytes", frame.decoded);
        State::FrameStart { first: false }
    }

    fn fail(&mut self, fault: Fault) -> io::Error {
        let (kept, err) = fault.into_parts();
        debug!("zstd stream failed: {}", kept);
        self.state = State::Failed(kept);
        self.filled = 0;
        self.bytes_taken = 0;
        err
    }
}

fn codec_error(e: io::Error) -> DecompressionError {
    DecompressionError::ZstdCodecError(e.to_string())
}

/// Push one complete unit of a frame through the decompression context, appending what it
/// produces to `output[*filled..]`.
#[throws]
fn feed(decoder: &mut Decoder<'static>, unit: &[u8], output: &mut [u8], filled: &mut usize) {
    let mut input = InBuffer::around(unit);
    loop {
        let consumed_before = input.pos();
        let mut out = OutBuffer::around(&mut output[*filled..]);
        decoder.run(&mut input, &mut out).map_err(codec_error)?;
        let produced = out.pos();
        *filled += produced;
        if produced == 0 && input.pos() == consumed_before {
            if input.pos() < unit.len() {
                throw!(DecompressionError::ZstdCodecError("decoder stopped making progress".into()));
            }
            break;
        }
    }
}

impl<R: Read> Read for ZstdStreamReader<R> {
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

impl<R: Read> BufRead for ZstdStreamReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.bytes_taken == self.filled {
            match &self.state {
                State::Finished => break,
                State::Failed(e) => return Err(e.clone().into()),
                _ => {}
            }
            self.filled = 0;
            self.bytes_taken = 0;
            if let Err(fault) = self.decode_step() {
                return Err(self.fail(fault));
            }
        }
        Ok(&self.buffer[self.bytes_taken..self.filled])
    }

    fn consume(&mut self, amt: usize) {
        self.bytes_taken += amt;
        assert!(self.bytes_taken <= self.filled, "You consumed more bytes than I even gave you!");
    }
}

impl<R: Read> StreamRead for ZstdStreamReader<R> {
    fn failure(&self) -> Option<&DecompressionError> {
        match &self.state {
            State::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenience wrapper around `ZstdStreamReader` that reads everything into a vector and returns it.
#[throws(io::Error)]
pub fn decompress_frame<R: Read>(reader: R) -> Vec<u8> {
    let mut plaintext = Vec::new();
    ZstdStreamReader::new(reader)?.read_to_end(&mut plaintext)?;
    plaintext
}

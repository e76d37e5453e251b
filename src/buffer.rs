//! Bounded buffering of compressed input.

use byteorder::{ByteOrder, LE};
use fehler::{throw, throws};
use log::debug;
use std::cmp;
use std::io::{self, ErrorKind, Read};

use crate::error::{DecompressionError, Fault};

/// Compressed bytes pulled from a source but not yet decoded.
///
/// The storage is allocated once and reused: `start..end` is the unread region, reads from the
/// source land in `end..`. When the tail runs out of room the unread region is moved back to the
/// front. The storage only grows when a caller asks for a contiguous region larger than the
/// current capacity, which frame readers bound by the largest block their format allows.
pub(crate) struct InputBuffer<R> {
    source: R,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    eof: bool,
}

impl<R: Read> InputBuffer<R> {
    pub fn new(source: R, capacity: usize) -> Self {
        InputBuffer {
            source,
            buf: vec![0; capacity],
            start: 0,
            end: 0,
            eof: false,
        }
    }

    /// The unread bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// True once the source reported end of data and every buffered byte was consumed.
    pub fn is_exhausted(&self) -> bool {
        self.eof && self.is_empty()
    }

    pub fn consume(&mut self, amt: usize) {
        self.start += amt;
        assert!(self.start <= self.end, "consumed more compressed bytes than were buffered");
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Pull from the source until at least `needed` bytes are buffered.
    ///
    /// Returns `Ok(false)` if the source runs dry first; whatever it did deliver stays buffered.
    /// Errors of the source are returned as they are, except `Interrupted`, which is retried.
    pub fn fill(&mut self, needed: usize) -> io::Result<bool> {
        if self.len() >= needed {
            return Ok(true);
        }
        self.make_room(needed);
        while self.len() < needed {
            if self.eof {
                return Ok(false);
            }
            match self.source.read(&mut self.buf[self.end..]) {
                Ok(0) => self.eof = true,
                Ok(n) => self.end += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Drop `amt` bytes of the stream, pulling from the source as needed without holding them.
    ///
    /// Returns `Ok(false)` if the source ends before `amt` bytes went by.
    pub fn skip(&mut self, mut amt: u64) -> io::Result<bool> {
        loop {
            let here = cmp::min(amt, self.len() as u64) as usize;
            self.consume(here);
            amt -= here as u64;
            if amt == 0 {
                return Ok(true);
            }
            let chunk = cmp::min(amt, self.capacity() as u64) as usize;
            if !self.fill(chunk)? && self.is_empty() {
                return Ok(false);
            }
        }
    }

    /// Pass over a skippable frame whose magic number sits at the front of the buffer.
    #[throws(Fault)]
    pub fn skip_frame(&mut self) {
        if !self.fill(8)? {
            throw!(DecompressionError::UnexpectedEof);
        }
        let frame_len = LE::read_u32(&self.data()[4..8]);
        self.consume(8);
        if !self.skip(frame_len.into())? {
            throw!(DecompressionError::UnexpectedEof);
        }
        debug!("skipped a skippable frame of {} bytes", frame_len);
    }

    /// Make sure `needed` unread bytes fit contiguously behind `start`.
    fn make_room(&mut self, needed: usize) {
        if self.buf.len() - self.start < needed {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.buf.len() < needed {
            self.buf.resize(needed, 0);
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.source
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

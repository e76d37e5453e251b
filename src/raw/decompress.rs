use byteorder::{ReadBytesExt, LE};
use fehler::{throw, throws};
use std::cmp;
use std::io::{Cursor, Read};
use thiserror::Error;

/// Errors of the raw LZ4 block decoder.
#[derive(Error, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DecodeError {
    /// Expected more bytes, but found none.
    /// Either your input was truncated or you're trying to decompress garbage.
    #[error("the compressed block ended in the middle of a sequence")]
    UnexpectedEnd,
    /// The offset for a deduplication is out of bounds (or zero).
    /// This may be caused by a missing or incomplete dictionary.
    #[error("a match refers to data before the start of the window")]
    InvalidDeduplicationOffset,
    /// The block would decompress to more bytes than the caller allowed.
    #[error("the block decompresses to more than {0} bytes")]
    OutputTooLong(usize),
}
type Error = DecodeError;

/// This is how LZ4 encodes varints.
/// Just keep reading and adding while it's all F
#[throws]
fn read_lsic(initial: u8, cursor: &mut Cursor<&[u8]>) -> usize {
    let mut value = initial as usize;
    if value == 0xF {
        loop {
            let more = cursor.read_u8().map_err(|_| Error::UnexpectedEnd)?;
            value = value.saturating_add(more as usize);
            if more != 0xff {
                break;
            }
        }
    }
    value
}

/// Decompress an LZ4-compressed block, appending the result to `output`.
///
/// LZ4 relies on a lookback mechanism where bytes earlier in the output stream are referenced.
/// For linked blocks the previous output lives in `prefix`, which must hold (up to) the
/// last 64KiB produced before this block. `output` is used as part of the window too,
/// so any bytes already in it count as history.
///
/// `limit` caps the total length of `output`; a block that would grow past it is rejected
/// before the memory is allocated.
#[throws]
pub fn decompress_raw(input: &[u8], prefix: &[u8], output: &mut Vec<u8>, limit: usize) {
    let mut reader = Cursor::new(input);
    loop {
        let token = match reader.read_u8() {
            Ok(x) => x,
            _ => break,
        };

        // read literals
        let literal_length = read_lsic(token >> 4, &mut reader)?;
        let output_pos_pre_literal = output.len();
        if literal_length > limit.saturating_sub(output_pos_pre_literal) {
            throw!(Error::OutputTooLong(limit));
        }
        output.resize(output_pos_pre_literal + literal_length, 0);
        if reader.read_exact(&mut output[output_pos_pre_literal..]).is_err() {
            throw!(Error::UnexpectedEnd);
        }

        // the last sequence of a block carries literals only
        if reader.position() as usize == input.len() {
            break;
        }

        let offset = reader.read_u16::<LE>().map_err(|_| Error::UnexpectedEnd)? as usize;
        let match_len = read_lsic(token & 0xf, &mut reader)?.saturating_add(4);
        if match_len > limit.saturating_sub(output.len()) {
            throw!(Error::OutputTooLong(limit));
        }
        copy_overlapping(offset, match_len, prefix, output)?;
    }
}

#[throws]
fn copy_overlapping(offset: usize, match_len: usize, prefix: &[u8], output: &mut Vec<u8>) {
    let old_len = output.len();
    match offset {
        0 => throw!(Error::InvalidDeduplicationOffset),
        i if i > old_len => {
            // need prefix for this
            let prefix_needed = i - old_len;
            if prefix_needed > prefix.len() {
                throw!(Error::InvalidDeduplicationOffset);
            }
            let how_many_bytes_from_prefix = cmp::min(prefix_needed, match_len);
            output.extend_from_slice(
                &prefix[prefix.len() - prefix_needed..][..how_many_bytes_from_prefix],
            );
            let remaining_len = match_len - how_many_bytes_from_prefix;
            if remaining_len != 0 {
                // offset stays the same because our cursor moved forward by the amount of bytes we took from prefix
                copy_overlapping(offset, remaining_len, &[], output)?;
            }
        }

        // fastpath: memset if we repeat the same byte forever
        1 => output.resize(old_len + match_len, output[old_len - 1]),

        o if match_len <= o => {
            // fastpath: nonoverlapping
            // for borrowck reasons we have to extend with zeroes first and then memcpy
            output.resize(old_len + match_len, 0);
            let (head, tail) = output.split_at_mut(old_len);
            tail.copy_from_slice(&head[old_len - offset..][..match_len]);
        }
        2 | 4 | 8 => {
            // fastpath: overlapping but small, build a 16 byte pattern and stamp it
            let mut buf = [0u8; 16];
            for chunk in buf.chunks_mut(offset) {
                chunk.copy_from_slice(&output[old_len - offset..][..offset]);
            }
            output.resize(old_len + match_len, 0);
            for target in output[old_len..].chunks_mut(buf.len()) {
                target.copy_from_slice(&buf[..target.len()]);
            }
        }
        _ => {
            // slowest path: copy single bytes
            output.reserve(match_len);
            for i in 0..match_len {
                let b = output[old_len - offset + i];
                output.push(b);
            }
        }
    }
}

/// Decompress all bytes of a single independent block.
#[throws]
pub fn decompress(input: &[u8], limit: usize) -> Vec<u8> {
    let mut vec = Vec::new();
    decompress_raw(input, &[], &mut vec, limit)?;
    vec
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 64 * 1024;

    #[test]
    fn aaaaaaaaaaa_lots_of_aaaaaaaaa() {
        assert_eq!(decompress(&[0x11, b'a', 1, 0], LIMIT).unwrap(), b"aaaaaa");
    }

    #[test]
    fn multiple_repeated_blocks() {
        assert_eq!(
            decompress(&[0x11, b'a', 1, 0, 0x22, b'b', b'c', 2, 0], LIMIT).unwrap(),
            b"aaaaaabcbcbcbc"
        );
    }

    #[test]
    fn all_literal() {
        assert_eq!(decompress(&[0x30, b'a', b'4', b'9'], LIMIT).unwrap(), b"a49");
    }

    #[test]
    fn offset_oob() {
        decompress(&[0x10, b'a', 2, 0], LIMIT).unwrap_err();
        decompress(&[0x40, b'a', 1, 0], LIMIT).unwrap_err();
    }

    #[test]
    fn zero_offset_is_an_error() {
        assert_eq!(
            decompress(&[0x11, b'a', 0, 0], LIMIT),
            Err(DecodeError::InvalidDeduplicationOffset)
        );
    }

    #[test]
    fn truncated_length_is_an_error() {
        // literal length 15 announces an extension byte that never comes
        assert_eq!(decompress(&[0xF0], LIMIT), Err(DecodeError::UnexpectedEnd));
        // literal run shorter than announced
        assert_eq!(decompress(&[0x40, b'a', b'b'], LIMIT), Err(DecodeError::UnexpectedEnd));
        // offset cut in half
        assert_eq!(decompress(&[0x11, b'a', 1], LIMIT), Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn limit_is_enforced() {
        assert_eq!(decompress(&[0x11, b'a', 1, 0], 4), Err(DecodeError::OutputTooLong(4)));
        assert_eq!(decompress(&[0x30, b'a', b'4', b'9'], 2), Err(DecodeError::OutputTooLong(2)));
    }

    #[test]
    fn matches_reach_into_prefix() {
        let mut output = Vec::new();
        // one literal, then copy 6 bytes starting 3 back (2 from the prefix)
        decompress_raw(&[0x12, b'c', 3, 0], b"xab", &mut output, LIMIT).unwrap();
        assert_eq!(output, b"cabcabc");
    }
}

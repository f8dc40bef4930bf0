//! CRILAYLA decompression.
//!
//! ```text
//! 0x00 "CRILAYLA"
//! 0x08 u32 LE decoded size (excluding the prefix)
//! 0x0C u32 LE compressed stream size
//! 0x10 compressed stream
//!      0x100 byte verbatim prefix
//! ```
//!
//! The stream is consumed from its last byte toward its first, bits MSB
//! first, and the output is filled from its end toward the prefix.

use nao_common::BinaryReader;
use tracing::trace;

use crate::{Error, Result};

/// Signature of a compressed payload.
pub const MAGIC: &[u8; 8] = b"CRILAYLA";

/// Bytes copied verbatim in front of the decoded data.
pub const PREFIX_SIZE: usize = 0x100;

const HEADER_SIZE: usize = 0x10;
const DISTANCE_BITS: u32 = 13;
const MIN_MATCH: usize = 3;
const LENGTH_WIDTHS: [u32; 4] = [2, 3, 5, 8];

/// Whether `data` begins with a CRILAYLA header.
#[inline]
pub fn is_compressed(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

/// Total output size declared by the header, prefix included.
pub fn decompressed_size(data: &[u8]) -> Result<usize> {
    let mut reader = BinaryReader::new(data);
    reader.expect_magic(MAGIC)?;
    Ok(reader.read_u32()? as usize + PREFIX_SIZE)
}

/// Decompress a CRILAYLA payload.
///
/// Fails with [`Error::Decompression`] when the stream runs out before the
/// declared size is produced or references bytes that were not decoded yet.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut reader = BinaryReader::new(data);
    reader
        .expect_magic(MAGIC)
        .map_err(|_| Error::Decompression("missing CRILAYLA signature".into()))?;
    let body_size = reader
        .read_u32()
        .map_err(|_| Error::Decompression("truncated CRILAYLA header".into()))? as usize;
    let stream_size = reader
        .read_u32()
        .map_err(|_| Error::Decompression("truncated CRILAYLA header".into()))? as usize;

    let prefix_start = HEADER_SIZE
        .checked_add(stream_size)
        .ok_or_else(|| Error::Decompression("compressed size overflows".into()))?;
    let prefix = data
        .get(prefix_start..prefix_start.saturating_add(PREFIX_SIZE))
        .ok_or_else(|| {
            Error::Decompression(format!(
                "payload of {} bytes too short for stream of {stream_size} bytes and prefix",
                data.len()
            ))
        })?;

    let mut output = vec![0u8; PREFIX_SIZE + body_size];
    output[..PREFIX_SIZE].copy_from_slice(prefix);

    let mut bits = ReverseBitReader::new(&data[HEADER_SIZE..prefix_start]);
    let output_end = output.len() - 1;
    let mut written = 0usize;

    while written < body_size {
        let position = output_end - written;

        if bits.read(1)? == 0 {
            output[position] = bits.read(8)? as u8;
            written += 1;
            continue;
        }

        let distance = bits.read(DISTANCE_BITS)? as usize + MIN_MATCH;
        let length = read_match_length(&mut bits)?;

        let mut source = position + distance;
        if source > output_end {
            return Err(Error::Decompression(format!(
                "back-reference at {position:#x} reaches past decoded data (distance {distance})"
            )));
        }
        if length > body_size - written {
            return Err(Error::Decompression(format!(
                "back-reference of {length} bytes overruns output ({} left)",
                body_size - written
            )));
        }

        for _ in 0..length {
            output[output_end - written] = output[source];
            source -= 1;
            written += 1;
        }
    }

    trace!(
        compressed = data.len(),
        decompressed = output.len(),
        "decoded CRILAYLA payload"
    );
    Ok(output)
}

fn read_match_length(bits: &mut ReverseBitReader<'_>) -> Result<usize> {
    let mut length = MIN_MATCH;

    for width in LENGTH_WIDTHS {
        let value = bits.read(width)? as usize;
        length += value;
        if value != (1 << width) - 1 {
            return Ok(length);
        }
    }

    loop {
        let value = bits.read(8)? as usize;
        length += value;
        if value != 0xFF {
            return Ok(length);
        }
    }
}

/// Reads bits MSB-first from bytes walked from the end of the slice.
struct ReverseBitReader<'a> {
    data: &'a [u8],
    /// Number of bytes not yet loaded into `pool`
    unread: usize,
    pool: u8,
    bits_left: u32,
}

impl<'a> ReverseBitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            unread: data.len(),
            pool: 0,
            bits_left: 0,
        }
    }

    fn read(&mut self, count: u32) -> Result<u32> {
        let mut out = 0u32;
        let mut produced = 0;

        while produced < count {
            if self.bits_left == 0 {
                if self.unread == 0 {
                    return Err(Error::Decompression(
                        "compressed stream exhausted before declared size".into(),
                    ));
                }
                self.unread -= 1;
                self.pool = self.data[self.unread];
                self.bits_left = 8;
            }

            let take = (count - produced).min(self.bits_left);
            let bits = (u32::from(self.pool) >> (self.bits_left - take)) & ((1 << take) - 1);
            out = (out << take) | bits;
            self.bits_left -= take;
            produced += take;
        }

        Ok(out)
    }
}

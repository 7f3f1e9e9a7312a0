//! Decompression of compressed IPC messages.
//!
//! The server compresses large messages with a byte-pair LZ scheme: a
//! flag byte precedes every run of eight tokens, each token being either
//! a literal byte or a back-reference (hash index, extra length) into
//! the output produced so far. The uncompressed total length is stored
//! in the 4 bytes after the header.

use crate::error::{Error, Result};
use crate::protocol::{Header, HEADER_SIZE};

/// Offset of the first token byte (after header and uncompressed size).
const DATA_OFFSET: usize = HEADER_SIZE + 4;

/// Expand a compressed message into an uncompressed one.
///
/// The returned message keeps the original header with the compressed
/// flag cleared and the length updated. A declared uncompressed size
/// above `max_size` is rejected before anything is allocated.
pub fn decompress(message: &[u8], max_size: u32) -> Result<Vec<u8>> {
    let mut header = Header::decode(message)
        .ok_or_else(|| Error::Decode("Compressed message shorter than header".to_string()))?;

    let size_bytes: [u8; 4] = message
        .get(HEADER_SIZE..DATA_OFFSET)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(truncated)?;
    let size = if header.is_little_endian() {
        u32::from_le_bytes(size_bytes)
    } else {
        u32::from_be_bytes(size_bytes)
    } as usize;
    if size < HEADER_SIZE {
        return Err(Error::Decode(format!(
            "Uncompressed size {} is shorter than the header",
            size
        )));
    }
    if size > max_size as usize {
        return Err(Error::Decode(format!(
            "Uncompressed size {} exceeds maximum {}",
            size, max_size
        )));
    }

    let mut dst = vec![0u8; size];
    header.compressed = 0;
    header.length = size as u32;
    header.encode_into(&mut dst);

    let src = |d: usize| message.get(d).copied().ok_or_else(truncated);

    let mut index = [0usize; 256];
    let mut s = HEADER_SIZE;
    let mut p = s;
    let mut d = DATA_OFFSET;
    let mut flags = 0u8;
    let mut bit = 0u16;

    while s < size {
        if bit == 0 {
            flags = src(d)?;
            d += 1;
            bit = 1;
        }

        let reference = u16::from(flags) & bit != 0;
        let mut extra = 0;
        if reference {
            let mut r = index[usize::from(src(d)?)];
            extra = usize::from(src(d + 1)?);
            d += 2;
            if s + 2 + extra > size || r + 1 >= s {
                return Err(Error::Decode("Corrupt compressed message".to_string()));
            }
            for _ in 0..2 + extra {
                dst[s] = dst[r];
                s += 1;
                r += 1;
            }
            // Only the first two copied bytes are hashed before the skip.
            s -= extra;
        } else {
            dst[s] = src(d)?;
            s += 1;
            d += 1;
        }

        while p + 1 < s {
            index[usize::from(dst[p] ^ dst[p + 1])] = p;
            p += 1;
        }

        if reference {
            s += extra;
            p = s;
        }

        bit <<= 1;
        if bit == 256 {
            bit = 0;
        }
    }

    Ok(dst)
}

fn truncated() -> Error {
    Error::Decode("Truncated compressed message".to_string())
}

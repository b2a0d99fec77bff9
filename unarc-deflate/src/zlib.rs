//! ZLIB framing (RFC 1950).
//!
//! A ZLIB stream is two header bytes, a DEFLATE stream, and a four-byte
//! big-endian Adler-32 of the decompressed data. The header's CMF/FLG pair,
//! read as a big-endian 16-bit value, must be divisible by 31; the low
//! nibble of CMF must be 8 (DEFLATE). Preset dictionaries (FDICT) are not
//! supported.

use crate::{DeflateError, inflate};
use thiserror::Error;
use unarc_core::checksum::Adler32;
use unarc_core::{BitOrder, BitReader, UnexpectedEnd};

/// Errors produced by the ZLIB unwrapper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZlibError {
    /// The CMF/FLG pair fails the divisibility-by-31 check.
    #[error("corrupt zlib header: {cmf:#04x} {flg:#04x}")]
    WrongHeader {
        /// Compression method and flags byte.
        cmf: u8,
        /// Flags byte.
        flg: u8,
    },

    /// The compression method is not DEFLATE.
    #[error("unsupported zlib compression method {0}")]
    WrongCompressionMethod(u8),

    /// The stream requires a preset dictionary.
    #[error("preset dictionaries are not supported")]
    DictionaryRequired,

    /// The Adler-32 trailer does not match the decompressed data.
    #[error("adler-32 mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the trailer.
        stored: u32,
        /// Checksum of the decompressed bytes.
        computed: u32,
    },

    /// The DEFLATE payload is invalid.
    #[error(transparent)]
    Deflate(#[from] DeflateError),

    /// The input ended mid-stream.
    #[error(transparent)]
    Truncated(#[from] UnexpectedEnd),
}

/// Decompress a ZLIB stream and verify its Adler-32 trailer.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, ZlibError> {
    let mut reader = BitReader::new(data, BitOrder::Lsb);
    let cmf = reader.read_aligned_byte()?;
    let flg = reader.read_aligned_byte()?;

    if (cmf as u16 * 256 + flg as u16) % 31 != 0 {
        return Err(ZlibError::WrongHeader { cmf, flg });
    }
    if cmf & 0x0F != 8 {
        return Err(ZlibError::WrongCompressionMethod(cmf & 0x0F));
    }
    if flg & 0x20 != 0 {
        return Err(ZlibError::DictionaryRequired);
    }

    let output = inflate::inflate_from(&mut reader)?;

    // Adler-32 is the one big-endian integer in the DEFLATE family.
    let mut stored = 0u32;
    for _ in 0..4 {
        stored = (stored << 8) | reader.read_aligned_byte()? as u32;
    }
    let computed = Adler32::compute(&output);
    if stored != computed {
        return Err(ZlibError::ChecksumMismatch { stored, computed });
    }

    Ok(output)
}

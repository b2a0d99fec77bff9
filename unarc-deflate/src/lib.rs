//! # unarc deflate
//!
//! DEFLATE (RFC 1951) decompression for unarc, plus the minimal ZLIB
//! (RFC 1950) framing around it.
//!
//! - [`huffman`]: canonical Huffman table construction and symbol decoding
//! - [`tables`]: the fixed DEFLATE code tables and length/distance maps
//! - [`inflate`]: the block-by-block decompressor
//! - [`zlib`]: CMF/FLG header + DEFLATE + big-endian Adler-32 trailer
//!
//! ## Example
//!
//! ```
//! // A stored block holding "Hello".
//! let block = [0x01, 0x05, 0x00, 0xFA, 0xFF, b'H', b'e', b'l', b'l', b'o'];
//! assert_eq!(unarc_deflate::inflate(&block).unwrap(), b"Hello");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod huffman;
pub mod inflate;
pub mod tables;
pub mod zlib;

pub use huffman::HuffmanTable;
pub use inflate::{Inflater, inflate, inflate_from};
pub use zlib::ZlibError;

use thiserror::Error;
use unarc_core::UnexpectedEnd;

/// Errors produced by the DEFLATE decompressor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeflateError {
    /// A stored block's LEN field is not the complement of its NLEN field.
    #[error("stored block length check failed: LEN={len:#06x}, NLEN={nlen:#06x}")]
    WrongBlockLengths {
        /// The LEN field.
        len: u16,
        /// The NLEN field.
        nlen: u16,
    },

    /// A block used the reserved block type 3.
    #[error("reserved block type")]
    UnknownBlockType,

    /// The bit stream produced a prefix with no assigned symbol.
    #[error("no symbol assigned to Huffman prefix at bit {bit_position}")]
    HuffmanTable {
        /// Bit offset at which decoding failed.
        bit_position: u64,
    },

    /// A code-length vector cannot form a valid prefix code.
    #[error("invalid code lengths: {0}")]
    BadCodeLengths(&'static str),

    /// A decoded symbol is outside its alphabet (286/287 in the
    /// literal/length table, 30/31 in the distance table).
    #[error("symbol {0} has no meaning in this block")]
    BadSymbol(u16),

    /// A back-reference points further back than the bytes produced so far.
    #[error("back-reference distance {distance} exceeds output length {available}")]
    DistanceTooFar {
        /// The decoded distance.
        distance: usize,
        /// Bytes available in the output buffer.
        available: usize,
    },

    /// The input ended mid-stream.
    #[error(transparent)]
    Truncated(#[from] UnexpectedEnd),
}

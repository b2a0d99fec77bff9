//! # unarc bzip2
//!
//! BZIP2 decompression. The format is a pipeline of reversible transforms;
//! decoding applies their inverses in order:
//!
//! 1. Huffman decode (multiple tables, switched every 50 symbols)
//! 2. zero-run expansion (RUNA/RUNB, bijective base 2)
//! 3. inverse move-to-front over the block's used-byte alphabet
//! 4. inverse Burrows-Wheeler transform
//! 5. RLE1 inverse (four equal bytes introduce a repeat-count byte)
//!
//! Only decompression is provided.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod bwt;
mod crc;
mod decode;
mod huffman;
mod mtf;
mod rle;

pub use crc::StreamCrc;
pub use decode::{BzDecoder, decompress};

use thiserror::Error;
use unarc_core::UnexpectedEnd;

/// Stream magic, "BZ".
pub const BZIP2_MAGIC: [u8; 2] = [0x42, 0x5A];

/// 48-bit block magic (pi).
pub const BLOCK_MAGIC: u64 = 0x3141_5926_5359;

/// 48-bit end-of-stream magic (sqrt(pi)).
pub const EOS_MAGIC: u64 = 0x1772_4538_5090;

/// Errors produced by the BZIP2 decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Bzip2Error {
    /// The stream does not start with `BZh`.
    #[error("not a bzip2 stream (bad magic)")]
    WrongMagic,

    /// The block-size digit is outside `1..=9`.
    #[error("invalid block size digit {0:?}")]
    BadBlockSize(char),

    /// A block started with neither the block nor the end-of-stream magic.
    #[error("invalid block magic {0:#014x}")]
    BadBlockMagic(u64),

    /// The deprecated randomization feature is not supported.
    #[error("randomized blocks are not supported")]
    Randomized,

    /// The BWT original pointer is not inside the block.
    #[error("BWT pointer {pointer} outside block of {length} bytes")]
    BadPointer {
        /// The 24-bit original pointer.
        pointer: u32,
        /// Decoded block length.
        length: usize,
    },

    /// The Huffman table count is outside `2..=6`.
    #[error("invalid Huffman table count {0}")]
    BadTableCount(u32),

    /// A selector referenced a table that does not exist, or the selector
    /// list ran out mid-block.
    #[error("invalid Huffman table selector")]
    BadSelector,

    /// A delta-coded code length left the valid `1..=20` range.
    #[error("Huffman code length out of range")]
    BadCodeLength,

    /// The bit stream produced a prefix with no assigned symbol.
    #[error("undecodable Huffman prefix")]
    BadHuffmanCode,

    /// A block CRC did not match the decoded data.
    #[error("block CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    BlockCrcMismatch {
        /// CRC stored in the block header.
        stored: u32,
        /// CRC of the decoded block.
        computed: u32,
    },

    /// The final combined CRC did not match.
    #[error("stream CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    StreamCrcMismatch {
        /// CRC stored in the end-of-stream record.
        stored: u32,
        /// Combined CRC over all blocks.
        computed: u32,
    },

    /// An RLE1 run was cut off before its count byte.
    #[error("run-length data ended mid-run")]
    TruncatedRun,

    /// The input ended mid-stream.
    #[error(transparent)]
    Truncated(#[from] UnexpectedEnd),
}

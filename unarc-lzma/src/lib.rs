//! # unarc lzma
//!
//! LZMA and LZMA2 decompression, conforming to the LZMA SDK reference
//! decoder and the XZ embedding of LZMA2.
//!
//! - [`range`]: the 32-bit range decoder with adaptive 11-bit probabilities
//! - [`model`]: the probability context model (state machine, literal,
//!   length and distance coders)
//! - [`decoder`]: the LZMA packet loop and the `.lzma` (alone) file format
//! - [`lzma2`]: the chunked LZMA2 layer used by XZ
//!
//! Only decompression is provided.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod decoder;
pub mod lzma2;
pub mod model;
pub mod range;

pub use decoder::{decompress, decompress_raw};
pub use lzma2::{Lzma2Decoder, dict_size_from_props};
pub use model::LzmaProperties;

use thiserror::Error;
use unarc_core::UnexpectedEnd;

/// Errors produced by the LZMA and LZMA2 decoders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LzmaError {
    /// The properties byte does not encode valid (lc, lp, pb).
    #[error("invalid LZMA properties byte {0:#04x}")]
    BadProperties(u8),

    /// The first byte of a range-coded chunk must be zero.
    #[error("range coder did not start with a zero byte")]
    BadStreamStart,

    /// A match distance reaches outside the decoded dictionary.
    #[error("match distance {distance} exceeds dictionary contents ({available} bytes)")]
    BadDistance {
        /// Distance the stream asked for (0-based).
        distance: u32,
        /// Bytes available behind the cursor.
        available: u64,
    },

    /// An LZMA2 control byte outside the defined packet space.
    #[error("invalid LZMA2 control byte {0:#04x}")]
    BadControlByte(u8),

    /// An LZMA2 chunk arrived before any dictionary reset.
    #[error("LZMA2 chunk before initial dictionary reset")]
    MissingDictReset,

    /// An LZMA2 compressed chunk arrived with no properties in effect.
    #[error("LZMA2 compressed chunk before any properties")]
    MissingProperties,

    /// The LZMA2 dictionary-size properties byte is out of range.
    #[error("invalid LZMA2 dictionary size properties {0:#04x}")]
    BadDictSize(u8),

    /// A chunk decoded to a different length than its header declared.
    #[error("chunk decoded to {produced} bytes, header declared {declared}")]
    ChunkSizeMismatch {
        /// Bytes the chunk actually produced.
        produced: u64,
        /// Bytes the chunk header declared.
        declared: u64,
    },

    /// An end marker appeared inside a stream with a declared exact size.
    #[error("unexpected end marker in sized stream")]
    UnexpectedEndMarker,

    /// The input ended mid-stream.
    #[error(transparent)]
    Truncated(#[from] UnexpectedEnd),
}

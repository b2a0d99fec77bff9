//! # unarc core
//!
//! Core components shared by the unarc decoder crates.
//!
//! - [`bitstream`]: positional bit-level reads over a byte slice, with
//!   selectable bit order (LSB-first for DEFLATE, MSB-first for BZIP2)
//! - [`checksum`]: CRC-32 (IEEE), CRC-64 (XZ) and Adler-32
//! - [`entry`]: the format-agnostic archive entry record
//! - [`error`]: shared error primitives
//!
//! ## Architecture
//!
//! unarc is a layered decoder stack:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ containers: TAR, ZIP, GZIP, XZ framing               │
//! ├──────────────────────────────────────────────────────┤
//! │ codecs: DEFLATE, LZMA/LZMA2, BZIP2                   │
//! ├──────────────────────────────────────────────────────┤
//! │ this crate: BitReader, checksums, entry model        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use unarc_core::bitstream::{BitOrder, BitReader};
//! use unarc_core::checksum::Crc32;
//!
//! let mut reader = BitReader::new(&[0xB5, 0x01], BitOrder::Lsb);
//! assert_eq!(reader.read_bits(4).unwrap(), 0x5);
//!
//! assert_eq!(Crc32::compute(b"123456789"), 0xCBF43926);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bitstream;
pub mod checksum;
pub mod entry;
pub mod error;

pub use bitstream::{BitOrder, BitReader};
pub use checksum::{Adler32, Crc32, Crc64};
pub use entry::{EntryInfo, EntryKind, FormatExt, UnixDevice};
pub use error::UnexpectedEnd;

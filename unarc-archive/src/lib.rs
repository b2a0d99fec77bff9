//! # unarc archive
//!
//! Container and framing formats on top of the unarc codecs:
//!
//! - **GZIP** (RFC 1952): DEFLATE with header, trailer and member
//!   concatenation
//! - **XZ**: LZMA2 with stream/block framing, filters and integrity checks
//! - **TAR**: UStar, GNU and PAX dialects; streaming reader and a writer
//! - **ZIP**: central-directory reader with the extra-field dictionary
//!
//! Format detection lives in [`detect`]; the [`Container`] trait is the
//! common capability surface of the archive formats.
//!
//! ## Example
//!
//! ```rust,no_run
//! use unarc_archive::detect::ArchiveFormat;
//!
//! let data = std::fs::read("archive.zip").unwrap();
//! match ArchiveFormat::from_magic(&data) {
//!     ArchiveFormat::Zip => {
//!         let archive = unarc_archive::zip::ZipArchive::open(&data).unwrap();
//!         for entry in archive.entries() {
//!             println!("{}", entry.info.name);
//!         }
//!     }
//!     other => println!("not a zip: {}", other),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod container;
pub mod detect;
pub mod gzip;
pub mod tar;
pub mod xz;
pub mod zip;

pub use container::Container;
pub use detect::ArchiveFormat;
pub use gzip::{GzipError, GzipHeader, GzipMember};
pub use tar::{TarArchive, TarEntry, TarError, TarFormat, TarReader, TarWriter};
pub use xz::XzError;
pub use zip::{ZipArchive, ZipEntry, ZipError};

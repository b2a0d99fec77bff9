//! The common capability surface of the archive container formats.

use crate::detect::ArchiveFormat;
use crate::tar::{TarArchive, TarError};
use crate::zip::{ZipArchive, ZipError};
use unarc_core::EntryInfo;

/// What every archive container can do: identify its format, open an
/// input, and list entry attributes. Formats stay plain data; this trait
/// is the only polymorphism across them.
///
/// The lifetime ties zero-copy containers (ZIP borrows its input) to the
/// bytes they were opened from; owning containers ignore it.
pub trait Container<'a>: Sized {
    /// The container's error type.
    type Error: std::error::Error;

    /// Which format this container reads.
    fn format() -> ArchiveFormat;

    /// Parse an archive from bytes.
    fn open(data: &'a [u8]) -> Result<Self, Self::Error>;

    /// List entry attributes without retaining payloads.
    fn info(data: &[u8]) -> Result<Vec<EntryInfo>, Self::Error>;
}

impl<'a> Container<'a> for TarArchive {
    type Error = TarError;

    fn format() -> ArchiveFormat {
        ArchiveFormat::Tar
    }

    fn open(data: &'a [u8]) -> Result<Self, Self::Error> {
        TarArchive::open(data)
    }

    fn info(data: &[u8]) -> Result<Vec<EntryInfo>, Self::Error> {
        crate::tar::info(data)
    }
}

impl<'a> Container<'a> for ZipArchive<'a> {
    type Error = ZipError;

    fn format() -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn open(data: &'a [u8]) -> Result<Self, Self::Error> {
        ZipArchive::open(data)
    }

    fn info(data: &[u8]) -> Result<Vec<EntryInfo>, Self::Error> {
        crate::zip::info(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats() {
        assert_eq!(<TarArchive as Container>::format(), ArchiveFormat::Tar);
        assert_eq!(
            <ZipArchive<'_> as Container>::format(),
            ArchiveFormat::Zip
        );
    }
}

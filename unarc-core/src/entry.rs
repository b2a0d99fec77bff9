//! The format-agnostic archive entry record.
//!
//! Container readers in `unarc-archive` describe every entry with one flat
//! [`EntryInfo`] record: a [`EntryKind`] discriminant, the attributes every
//! format can express, and a [`FormatExt`] tagged variant holding whatever a
//! specific container knows beyond the common set. There is no entry type
//! hierarchy; callers match on `kind` and `ext`.

use std::collections::BTreeMap;
use std::time::SystemTime;

/// What kind of filesystem object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
    /// Regular file.
    #[default]
    Regular,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Hard link to another entry.
    Hardlink,
    /// Character device node.
    CharDevice,
    /// Block device node.
    BlockDevice,
    /// Named pipe.
    Fifo,
    /// Anything else (contiguous files, sockets, unknown type flags).
    Other,
}

impl EntryKind {
    /// Whether this entry is a regular file.
    pub fn is_regular(&self) -> bool {
        matches!(self, Self::Regular)
    }

    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }

    /// Whether this entry is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink)
    }
}

/// Device numbers for character/block device entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixDevice {
    /// Major device number.
    pub major: u32,
    /// Minor device number.
    pub minor: u32,
}

/// Container-specific attributes, held inline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FormatExt {
    /// No format-specific attributes.
    #[default]
    None,
    /// TAR-specific attributes.
    Tar {
        /// Device numbers, for device-node entries.
        device: Option<UnixDevice>,
        /// PAX records applied to this entry (key → value), including keys
        /// the reader does not interpret itself.
        pax: BTreeMap<String, String>,
    },
    /// ZIP-specific attributes.
    Zip {
        /// General-purpose bit flags from the central directory.
        flags: u16,
        /// Compression method id.
        method: u16,
        /// Internal file attributes.
        internal_attrs: u16,
        /// External file attributes (host-dependent; Unix mode in the high
        /// 16 bits for Unix-made archives).
        external_attrs: u32,
        /// DOS attribute byte (low byte of the external attributes).
        dos_attributes: u8,
    },
}

/// One archive entry's attributes.
///
/// Decoded values are owned by the caller; absent attributes are `None`
/// rather than sentinel values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntryInfo {
    /// Entry name (path within the archive, `/`-separated).
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Entry kind.
    pub kind: EntryKind,
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Last access time, when the container records one.
    pub accessed: Option<SystemTime>,
    /// Creation time, when the container records one.
    pub created: Option<SystemTime>,
    /// Unix permission bits.
    pub mode: Option<u32>,
    /// Owner user id. PAX allows values beyond 32 bits.
    pub uid: Option<u64>,
    /// Owner group id.
    pub gid: Option<u64>,
    /// Owner user name.
    pub uname: Option<String>,
    /// Owner group name.
    pub gname: Option<String>,
    /// Target of a symlink or hardlink entry.
    pub link_target: Option<String>,
    /// Entry comment.
    pub comment: Option<String>,
    /// Container-specific attributes.
    pub ext: FormatExt,
}

impl EntryInfo {
    /// Create an info record for a regular file.
    pub fn regular(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            ..Self::default()
        }
    }

    /// Create an info record for a directory.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            ..Self::default()
        }
    }
}

impl std::fmt::Display for EntryInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            EntryKind::Directory => 'd',
            EntryKind::Symlink => 'l',
            EntryKind::Hardlink => 'h',
            EntryKind::CharDevice => 'c',
            EntryKind::BlockDevice => 'b',
            EntryKind::Fifo => 'p',
            _ => '-',
        };
        write!(f, "{}{:>12} {}", kind, self.size, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_entry() {
        let info = EntryInfo::regular("a.txt", 42);
        assert!(info.kind.is_regular());
        assert_eq!(info.size, 42);
        assert_eq!(info.ext, FormatExt::None);
    }

    #[test]
    fn test_directory_entry() {
        let info = EntryInfo::directory("dir/");
        assert!(info.kind.is_dir());
        assert_eq!(info.size, 0);
    }

    #[test]
    fn test_display() {
        let info = EntryInfo::directory("docs");
        assert_eq!(format!("{}", info), "d           0 docs");
    }
}

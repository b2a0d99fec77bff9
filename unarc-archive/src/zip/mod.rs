//! ZIP archives (APPNOTE.TXT), read via the central directory.
//!
//! Reading walks backward to the end-of-central-directory record, follows
//! it (or its Zip64 locator) to the central directory, then cross-checks
//! every entry against its local header. Names must match byte-for-byte;
//! CRC and sizes come from the local header unless the entry used a data
//! descriptor (general-purpose bit 3), in which case the central
//! directory is authoritative.

pub mod cp437;
pub mod extra;
mod header;

pub use header::{
    CENTRAL_DIR_HEADER_SIG, CentralDirEntry, END_OF_CENTRAL_DIR_SIG, FLAG_DATA_DESCRIPTOR,
    FLAG_ENCRYPTED, FLAG_UTF8, LOCAL_FILE_HEADER_SIG, LocalFileHeader, ZIP64_MARKER_16,
    ZIP64_MARKER_32,
};

use extra::{ExtraFields, Zip64Markers};
use header::locate_central_directory;
use thiserror::Error;
use unarc_bzip2::Bzip2Error;
use unarc_core::checksum::Crc32;
use unarc_core::{EntryInfo, EntryKind, FormatExt, UnexpectedEnd};
use unarc_deflate::DeflateError;
use unarc_lzma::{LzmaError, LzmaProperties};

/// Highest `version needed` this reader implements (6.3: Zip64, bzip2
/// and LZMA compression).
pub const MAX_SUPPORTED_VERSION: u16 = 63;

/// Errors produced by the ZIP reader.
#[derive(Debug, Error)]
pub enum ZipError {
    /// No end-of-central-directory record in the trailing 65557 bytes.
    #[error("no end-of-central-directory record found")]
    NoEndOfCentralDirectory,

    /// A record did not start with its expected signature.
    #[error("bad signature at offset {offset}: expected {expected:#010x}, found {found:#010x}")]
    WrongSignature {
        /// Expected signature value.
        expected: u32,
        /// Signature actually present.
        found: u32,
        /// File offset of the record.
        offset: usize,
    },

    /// The entry requires a feature version beyond this reader.
    #[error("unsupported zip version needed: {0}")]
    WrongVersion(u16),

    /// The compression method is not stored, DEFLATE, bzip2 or LZMA.
    #[error("unsupported zip compression method {0}")]
    UnsupportedCompression(u16),

    /// The entry is encrypted.
    #[error("encrypted zip entries are not supported")]
    Encrypted,

    /// Local and central headers disagree on the file name.
    #[error("local header name {local:?} does not match central directory name {central:?}")]
    NameMismatch {
        /// Name in the central directory.
        central: String,
        /// Name in the local header.
        local: String,
    },

    /// Extracted data does not match the recorded CRC.
    #[error("zip CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        /// CRC recorded for the entry.
        stored: u32,
        /// CRC of the extracted data.
        computed: u32,
    },

    /// Extracted data does not match the recorded size.
    #[error("zip size mismatch: declared {declared}, extracted {actual} bytes")]
    SizeMismatch {
        /// Size recorded for the entry.
        declared: u64,
        /// Bytes actually extracted.
        actual: u64,
    },

    /// The DEFLATE payload is invalid.
    #[error(transparent)]
    Deflate(#[from] DeflateError),

    /// The bzip2 payload is invalid.
    #[error(transparent)]
    Bzip2(#[from] Bzip2Error),

    /// The LZMA payload is invalid.
    #[error(transparent)]
    Lzma(#[from] LzmaError),

    /// The input ended mid-record.
    #[error(transparent)]
    Truncated(#[from] UnexpectedEnd),
}

/// One entry of the archive: resolved attributes plus what is needed to
/// extract the payload.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    /// Resolved attributes.
    pub info: EntryInfo,
    /// Compression method id.
    pub method: u16,
    /// General-purpose bit flags from the central directory.
    pub flags: u16,
    /// Authoritative CRC-32 (per the data-descriptor rule).
    pub crc32: u32,
    /// Authoritative compressed size.
    pub compressed_size: u64,
    /// Every extra field attached to the central entry.
    pub extra_fields: ExtraFields,
    data_offset: usize,
}

/// A parsed ZIP archive borrowing the underlying bytes.
#[derive(Debug)]
pub struct ZipArchive<'a> {
    data: &'a [u8],
    entries: Vec<ZipEntry>,
}

impl<'a> ZipArchive<'a> {
    /// Parse the central directory and reconcile every entry with its
    /// local header.
    pub fn open(data: &'a [u8]) -> Result<Self, ZipError> {
        let directory = locate_central_directory(data)?;
        let mut pos = directory.offset as usize;
        let mut entries = Vec::with_capacity(directory.entries.min(65_536) as usize);
        for _ in 0..directory.entries {
            let central = CentralDirEntry::parse(data, &mut pos)?;
            entries.push(resolve_entry(data, central)?);
        }
        Ok(Self { data, entries })
    }

    /// The entries in central-directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Find an entry by name.
    pub fn entry_by_name(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.info.name == name)
    }

    /// Extract and verify one entry's payload.
    pub fn read(&self, entry: &ZipEntry) -> Result<Vec<u8>, ZipError> {
        if entry.flags & FLAG_ENCRYPTED != 0 {
            return Err(ZipError::Encrypted);
        }
        let end = entry
            .data_offset
            .checked_add(entry.compressed_size as usize)
            .ok_or(UnexpectedEnd)?;
        let compressed = self.data.get(entry.data_offset..end).ok_or(UnexpectedEnd)?;

        let data = match entry.method {
            0 => compressed.to_vec(),
            8 => unarc_deflate::inflate(compressed)?,
            12 => unarc_bzip2::decompress(compressed)?,
            14 => extract_lzma(compressed, entry.info.size)?,
            other => return Err(ZipError::UnsupportedCompression(other)),
        };

        if data.len() as u64 != entry.info.size {
            return Err(ZipError::SizeMismatch {
                declared: entry.info.size,
                actual: data.len() as u64,
            });
        }
        let computed = Crc32::compute(&data);
        if computed != entry.crc32 {
            return Err(ZipError::CrcMismatch {
                stored: entry.crc32,
                computed,
            });
        }
        Ok(data)
    }
}

/// ZIP-framed LZMA (method 14): a version word and a sized properties
/// blob precede the raw LZMA stream; the size comes from the entry.
fn extract_lzma(compressed: &[u8], size: u64) -> Result<Vec<u8>, ZipError> {
    let mut pos = 0usize;
    let _version = header::read_u16(compressed, &mut pos)?;
    let props_len = header::read_u16(compressed, &mut pos)? as usize;
    let props = header::read_bytes(compressed, &mut pos, props_len)?;
    if props.len() < 5 {
        return Err(UnexpectedEnd.into());
    }
    let properties = LzmaProperties::from_byte(props[0])?;
    let dict_size = u32::from_le_bytes([props[1], props[2], props[3], props[4]]);
    let stream = &compressed[pos..];
    Ok(unarc_lzma::decompress_raw(
        stream,
        properties,
        dict_size,
        Some(size),
    )?)
}

/// Cross-check a central entry with its local header and resolve the
/// authoritative attributes.
fn resolve_entry(data: &[u8], central: CentralDirEntry) -> Result<ZipEntry, ZipError> {
    if central.version_needed > MAX_SUPPORTED_VERSION {
        return Err(ZipError::WrongVersion(central.version_needed));
    }

    let markers = Zip64Markers {
        uncompressed_size: central.uncompressed_size == ZIP64_MARKER_32,
        compressed_size: central.compressed_size == ZIP64_MARKER_32,
        local_header_offset: central.local_header_offset == ZIP64_MARKER_32,
        disk_start: central.disk_start == ZIP64_MARKER_16,
    };
    let central_extra = ExtraFields::parse(&central.extra, markers);

    let local_offset = central_extra
        .zip64
        .local_header_offset
        .unwrap_or(central.local_header_offset as u64) as usize;
    let local = LocalFileHeader::parse(data, local_offset)?;

    if local.filename != central.filename {
        return Err(ZipError::NameMismatch {
            central: decode_name(&central.filename, central.flags),
            local: decode_name(&local.filename, local.flags),
        });
    }

    // Central sizes, with Zip64 substitution.
    let central_compressed = central_extra
        .zip64
        .compressed_size
        .unwrap_or(central.compressed_size as u64);
    let central_uncompressed = central_extra
        .zip64
        .uncompressed_size
        .unwrap_or(central.uncompressed_size as u64);

    // Data-descriptor rule: without bit 3 the local header is
    // authoritative for CRC and sizes; with it, the central directory is.
    let (crc32, compressed_size, uncompressed_size) =
        if central.flags & FLAG_DATA_DESCRIPTOR != 0 {
            (central.crc32, central_compressed, central_uncompressed)
        } else {
            let local_markers = Zip64Markers {
                uncompressed_size: local.uncompressed_size == ZIP64_MARKER_32,
                compressed_size: local.compressed_size == ZIP64_MARKER_32,
                ..Zip64Markers::default()
            };
            let local_extra = ExtraFields::parse(&local.extra, local_markers);
            (
                local.crc32,
                local_extra
                    .zip64
                    .compressed_size
                    .unwrap_or(local.compressed_size as u64),
                local_extra
                    .zip64
                    .uncompressed_size
                    .unwrap_or(local.uncompressed_size as u64),
            )
        };

    let name = decode_name(&central.filename, central.flags);
    let kind = entry_kind(&central, &name, uncompressed_size);
    let unix_mode = (central.external_attrs >> 16) as u16;
    let (uid, gid) = central_extra.owner_ids();

    let info = EntryInfo {
        name,
        size: uncompressed_size,
        kind,
        modified: central_extra.modified(central.dos_date, central.dos_time),
        accessed: central_extra.accessed(),
        created: central_extra.created(),
        mode: (unix_mode != 0).then(|| (unix_mode & 0o7777) as u32),
        uid,
        gid,
        uname: None,
        gname: None,
        link_target: None,
        comment: (!central.comment.is_empty())
            .then(|| decode_name(&central.comment, central.flags)),
        ext: FormatExt::Zip {
            flags: central.flags,
            method: central.method,
            internal_attrs: central.internal_attrs,
            external_attrs: central.external_attrs,
            dos_attributes: central.external_attrs as u8,
        },
    };

    Ok(ZipEntry {
        info,
        method: central.method,
        flags: central.flags,
        crc32,
        compressed_size,
        extra_fields: central_extra,
        data_offset: local.data_offset,
    })
}

/// Entry kind per the resolution ladder: Unix type bits in the external
/// attributes, then the DOS directory attribute, then a trailing slash.
fn entry_kind(central: &CentralDirEntry, name: &str, size: u64) -> EntryKind {
    let unix_type = (central.external_attrs >> 16) & 0xF000;
    match unix_type {
        0x8000 => return EntryKind::Regular,
        0x4000 => return EntryKind::Directory,
        0xA000 => return EntryKind::Symlink,
        0x2000 => return EntryKind::CharDevice,
        0x6000 => return EntryKind::BlockDevice,
        0x1000 => return EntryKind::Fifo,
        0xC000 => return EntryKind::Other,
        _ => {}
    }
    if central.external_attrs & 0x10 != 0 {
        return EntryKind::Directory;
    }
    if name.ends_with('/') && size == 0 {
        return EntryKind::Directory;
    }
    EntryKind::Regular
}

/// Names and comments are CP437 unless the UTF-8 flag is set.
fn decode_name(bytes: &[u8], flags: u16) -> String {
    if flags & FLAG_UTF8 != 0 {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        cp437::decode(bytes)
    }
}

/// List entry attributes in central-directory order.
pub fn info(data: &[u8]) -> Result<Vec<EntryInfo>, ZipError> {
    Ok(ZipArchive::open(data)?
        .entries
        .into_iter()
        .map(|e| e.info)
        .collect())
}

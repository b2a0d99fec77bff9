//! TAR archives: historic, UStar (POSIX.1-1988), GNU long names and PAX
//! (POSIX.1-2001) extended headers.
//!
//! A TAR archive is a sequence of 512-byte records. Each entry is one
//! header record plus `⌈size/512⌉` data records; two consecutive all-zero
//! records end the archive. PAX extended headers are themselves entries
//! (`x` applies to the next entry, `g` to all subsequent ones) whose
//! payload is `LENGTH KEY=VALUE\n` records; GNU writers use `L`/`K`
//! entries for long names and link targets.
//!
//! [`TarReader`] streams entries one at a time from any [`Read`] source,
//! so memory stays bounded by the largest entry; [`TarArchive`] collects
//! them from an in-memory slice.

mod writer;

pub use writer::{TarFormat, TarWriter};

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use unarc_core::{EntryInfo, EntryKind, FormatExt, UnixDevice};

/// TAR record size.
pub const BLOCK_SIZE: usize = 512;

/// PAX attribute map.
pub type PaxMap = BTreeMap<String, String>;

/// Errors produced by the TAR reader and writer.
#[derive(Debug, Error)]
pub enum TarError {
    /// The input holds fewer bytes than one record.
    #[error("input too small for a tar archive ({0} bytes)")]
    TooSmall(usize),

    /// A numeric header field holds something other than octal digits
    /// (or a base-256 binary value).
    #[error("tar header field `{field}` is not a number")]
    FieldNotNumber {
        /// Field name.
        field: &'static str,
    },

    /// The header checksum matches neither the unsigned nor the signed
    /// byte sum.
    #[error(
        "tar header checksum mismatch: stored {stored}, unsigned sum {unsigned}, signed sum {signed}"
    )]
    WrongHeaderChecksum {
        /// Value stored in the header.
        stored: u64,
        /// Sum over unsigned bytes.
        unsigned: u64,
        /// Sum over sign-extended bytes.
        signed: i64,
    },

    /// A UStar header with a version other than `00`.
    #[error("unsupported ustar version {0:?}")]
    WrongUstarVersion([u8; 2]),

    /// A PAX extended header record is malformed.
    #[error("malformed pax record")]
    BadPaxRecord,

    /// A name does not fit the chosen output format.
    #[error("name does not fit the tar format: {0}")]
    NameTooLong(String),

    /// A numeric value does not fit its header field in the chosen
    /// output format.
    #[error("value of `{field}` does not fit the tar format")]
    FieldTooLarge {
        /// Field name.
        field: &'static str,
    },

    /// The archive ended in the middle of an entry.
    #[error("tar archive truncated mid-entry")]
    Truncated,

    /// I/O error from the underlying reader or writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// UStar flavor of a header record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Magic {
    /// Pre-POSIX header, no magic.
    Old,
    /// `ustar\0` + version `00`.
    Posix,
    /// GNU's `ustar  \0`.
    Gnu,
}

/// A parsed 512-byte header record.
#[derive(Debug, Clone)]
pub struct TarHeader {
    /// Entry name (prefix already joined).
    pub name: String,
    /// Permission bits.
    pub mode: u32,
    /// Owner user id.
    pub uid: u64,
    /// Owner group id.
    pub gid: u64,
    /// Payload size in bytes.
    pub size: u64,
    /// Modification time, seconds since the epoch.
    pub mtime: u64,
    /// Type flag byte.
    pub typeflag: u8,
    /// Link target.
    pub linkname: String,
    /// Owner user name (UStar).
    pub uname: String,
    /// Owner group name (UStar).
    pub gname: String,
    /// Device major number (UStar).
    pub devmajor: u32,
    /// Device minor number (UStar).
    pub devminor: u32,
    magic: Magic,
}

impl TarHeader {
    /// Parse a header record. Returns `None` for an all-zero record.
    pub fn from_block(block: &[u8; BLOCK_SIZE]) -> Result<Option<Self>, TarError> {
        if block.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        verify_checksum(block)?;

        let magic = match &block[257..263] {
            b"ustar\0" => {
                if &block[263..265] != b"00" {
                    return Err(TarError::WrongUstarVersion([block[263], block[264]]));
                }
                Magic::Posix
            }
            b"ustar " => Magic::Gnu,
            _ => Magic::Old,
        };

        let name = parse_string(&block[0..100]);
        let prefix = if magic == Magic::Posix {
            parse_string(&block[345..500])
        } else {
            String::new()
        };
        let full_name = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };

        let (uname, gname, devmajor, devminor) = if magic != Magic::Old {
            (
                parse_string(&block[265..297]),
                parse_string(&block[297..329]),
                parse_numeric("devmajor", &block[329..337])? as u32,
                parse_numeric("devminor", &block[337..345])? as u32,
            )
        } else {
            (String::new(), String::new(), 0, 0)
        };

        Ok(Some(Self {
            name: full_name,
            mode: parse_numeric("mode", &block[100..108])? as u32,
            uid: parse_numeric("uid", &block[108..116])?,
            gid: parse_numeric("gid", &block[116..124])?,
            size: parse_numeric("size", &block[124..136])?,
            mtime: parse_numeric("mtime", &block[136..148])?,
            typeflag: block[156],
            linkname: parse_string(&block[157..257]),
            uname,
            gname,
            devmajor,
            devminor,
            magic,
        }))
    }

    /// Whether this header carried a UStar (POSIX or GNU) magic.
    pub fn is_ustar(&self) -> bool {
        self.magic != Magic::Old
    }

    /// The entry kind this header's type flag describes.
    pub fn kind(&self) -> EntryKind {
        match self.typeflag {
            b'0' | 0 => EntryKind::Regular,
            b'1' => EntryKind::Hardlink,
            b'2' => EntryKind::Symlink,
            b'3' => EntryKind::CharDevice,
            b'4' => EntryKind::BlockDevice,
            b'5' => EntryKind::Directory,
            b'6' => EntryKind::Fifo,
            _ => EntryKind::Other,
        }
    }
}

/// Sum of the header bytes with the checksum field counted as spaces,
/// both as unsigned and as sign-extended bytes. Historical writers
/// disagree on signedness, so either match is accepted.
fn verify_checksum(block: &[u8; BLOCK_SIZE]) -> Result<(), TarError> {
    let stored = parse_numeric("chksum", &block[148..156])?;

    let mut unsigned: u64 = 0;
    let mut signed: i64 = 0;
    for (i, &byte) in block.iter().enumerate() {
        let byte = if (148..156).contains(&i) { b' ' } else { byte };
        unsigned += byte as u64;
        signed += byte as i8 as i64;
    }

    if stored == unsigned || stored as i64 == signed {
        Ok(())
    } else {
        Err(TarError::WrongHeaderChecksum {
            stored,
            unsigned,
            signed,
        })
    }
}

/// NUL-terminated, possibly space-padded field.
fn parse_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end])
        .trim_end_matches(' ')
        .to_string()
}

/// Numeric field: octal ASCII, or GNU base-256 when the first byte has
/// the high bit set. The octal text is parsed directly in base 8.
fn parse_numeric(field: &'static str, bytes: &[u8]) -> Result<u64, TarError> {
    if bytes.first().is_some_and(|&b| b & 0x80 != 0) {
        // Base-256: big-endian binary with the marker bit masked off.
        let mut value = (bytes[0] & 0x7F) as u64;
        for &byte in &bytes[1..] {
            value = (value << 8) | byte as u64;
        }
        return Ok(value);
    }

    let text: &[u8] = {
        let start = bytes
            .iter()
            .position(|&b| b != b' ' && b != 0)
            .unwrap_or(bytes.len());
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b' ' || b == 0)
            .map_or(bytes.len(), |e| start + e);
        &bytes[start..end]
    };
    if text.is_empty() {
        return Ok(0);
    }

    let mut value: u64 = 0;
    for &byte in text {
        if !(b'0'..=b'7').contains(&byte) {
            return Err(TarError::FieldNotNumber { field });
        }
        value = value
            .checked_mul(8)
            .and_then(|v| v.checked_add((byte - b'0') as u64))
            .ok_or(TarError::FieldNotNumber { field })?;
    }
    Ok(value)
}

/// Parse a PAX extended-header payload: `LENGTH KEY=VALUE\n` records
/// where LENGTH counts its own digits and the newline.
pub fn parse_pax(data: &[u8]) -> Result<PaxMap, TarError> {
    let mut map = PaxMap::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let space = data[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or(TarError::BadPaxRecord)?
            + pos;
        let length: usize = std::str::from_utf8(&data[pos..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(TarError::BadPaxRecord)?;
        if length == 0 || pos + length > data.len() {
            return Err(TarError::BadPaxRecord);
        }
        let record = &data[space + 1..pos + length];
        let record = record
            .strip_suffix(b"\n")
            .ok_or(TarError::BadPaxRecord)?;
        let eq = record
            .iter()
            .position(|&b| b == b'=')
            .ok_or(TarError::BadPaxRecord)?;
        let key = std::str::from_utf8(&record[..eq]).map_err(|_| TarError::BadPaxRecord)?;
        let value = std::str::from_utf8(&record[eq + 1..]).map_err(|_| TarError::BadPaxRecord)?;
        map.insert(key.to_string(), value.to_string());
        pos += length;
    }
    Ok(map)
}

/// PAX timestamps are decimal seconds with an optional fraction, possibly
/// negative for pre-epoch times.
fn parse_pax_time(value: &str) -> Option<SystemTime> {
    let negative = value.starts_with('-');
    let value = value.strip_prefix('-').unwrap_or(value);
    let (secs_text, frac_text) = match value.split_once('.') {
        Some((s, f)) => (s, f),
        None => (value, ""),
    };
    let secs: u64 = secs_text.parse().ok()?;
    let mut nanos = 0u32;
    for (i, c) in frac_text.chars().take(9).enumerate() {
        nanos += c.to_digit(10)? * 10u32.pow(8 - i as u32);
    }
    let duration = Duration::new(secs, nanos);
    if negative {
        UNIX_EPOCH.checked_sub(duration)
    } else {
        Some(UNIX_EPOCH + duration)
    }
}

/// One decoded entry: its attributes and payload.
#[derive(Debug, Clone)]
pub struct TarEntry {
    /// Entry attributes.
    pub info: EntryInfo,
    /// Entry payload.
    pub data: Vec<u8>,
}

/// Streaming TAR reader, one entry at a time.
pub struct TarReader<R: Read> {
    reader: R,
    global_pax: PaxMap,
    read_anything: bool,
    finished: bool,
}

impl<R: Read> TarReader<R> {
    /// Create a reader over a byte source.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            global_pax: PaxMap::new(),
            read_anything: false,
            finished: false,
        }
    }

    /// Read the next entry, consuming any PAX or GNU long-name records
    /// that precede it. `None` at the end of the archive.
    pub fn next_entry(&mut self) -> Result<Option<TarEntry>, TarError> {
        if self.finished {
            return Ok(None);
        }

        let mut local_pax: Option<PaxMap> = None;
        let mut gnu_longname: Option<String> = None;
        let mut gnu_longlink: Option<String> = None;

        loop {
            let block = match self.read_block()? {
                Some(block) => block,
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            };

            let mut header = match TarHeader::from_block(&block)? {
                Some(header) => header,
                None => {
                    // First of the two terminator records; accept EOF or a
                    // second zero record without complaint.
                    let _ = self.read_block()?;
                    self.finished = true;
                    return Ok(None);
                }
            };

            match header.typeflag {
                b'x' => {
                    let data = self.read_data(header.size)?;
                    local_pax
                        .get_or_insert_with(PaxMap::new)
                        .extend(parse_pax(&data)?);
                }
                b'g' => {
                    let data = self.read_data(header.size)?;
                    self.global_pax.extend(parse_pax(&data)?);
                }
                b'L' => {
                    let data = self.read_data(header.size)?;
                    gnu_longname = Some(parse_string(&data));
                }
                b'K' => {
                    let data = self.read_data(header.size)?;
                    gnu_longlink = Some(parse_string(&data));
                }
                _ => {
                    if let Some(name) = gnu_longname.take() {
                        header.name = name;
                    }
                    if let Some(link) = gnu_longlink.take() {
                        header.linkname = link;
                    }

                    // Global overrides first; a local PAX header beats them.
                    let mut pax = self.global_pax.clone();
                    if let Some(local) = local_pax.take() {
                        pax.extend(local);
                    }
                    let info = build_info(&mut header, &pax);
                    let data = self.read_data(header.size)?;
                    return Ok(Some(TarEntry { info, data }));
                }
            }
        }
    }

    /// Read one record; `None` on a clean EOF at a record boundary.
    fn read_block(&mut self) -> Result<Option<[u8; BLOCK_SIZE]>, TarError> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut filled = 0usize;
        while filled < BLOCK_SIZE {
            let n = self.reader.read(&mut block[filled..])?;
            if n == 0 {
                return if filled == 0 {
                    if self.read_anything {
                        Ok(None)
                    } else {
                        Err(TarError::TooSmall(0))
                    }
                } else if !self.read_anything {
                    Err(TarError::TooSmall(filled))
                } else {
                    Err(TarError::Truncated)
                };
            }
            filled += n;
        }
        self.read_anything = true;
        Ok(Some(block))
    }

    /// Read `size` payload bytes plus padding to the next record boundary.
    fn read_data(&mut self, size: u64) -> Result<Vec<u8>, TarError> {
        let mut data = vec![0u8; size as usize];
        self.reader
            .read_exact(&mut data)
            .map_err(map_truncation)?;
        let padding = (BLOCK_SIZE - (size as usize % BLOCK_SIZE)) % BLOCK_SIZE;
        if padding > 0 {
            let mut scratch = [0u8; BLOCK_SIZE];
            self.reader
                .read_exact(&mut scratch[..padding])
                .map_err(map_truncation)?;
        }
        Ok(data)
    }
}

fn map_truncation(err: io::Error) -> TarError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        TarError::Truncated
    } else {
        TarError::Io(err)
    }
}

impl<R: Read> Iterator for TarReader<R> {
    type Item = Result<TarEntry, TarError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

/// Merge header fields and PAX overrides into an [`EntryInfo`].
///
/// PAX `size` is written back into the header so the caller reads the
/// right number of payload bytes.
fn build_info(header: &mut TarHeader, pax: &PaxMap) -> EntryInfo {
    if let Some(size) = pax.get("size").and_then(|v| v.parse().ok()) {
        header.size = size;
    }
    if let Some(path) = pax.get("path") {
        header.name = path.clone();
    }
    if let Some(link) = pax.get("linkpath") {
        header.linkname = link.clone();
    }

    let kind = header.kind();
    let device = match kind {
        EntryKind::CharDevice | EntryKind::BlockDevice => Some(UnixDevice {
            major: header.devmajor,
            minor: header.devminor,
        }),
        _ => None,
    };

    let uid = pax
        .get("uid")
        .and_then(|v| v.parse().ok())
        .unwrap_or(header.uid);
    let gid = pax
        .get("gid")
        .and_then(|v| v.parse().ok())
        .unwrap_or(header.gid);
    let uname = pax.get("uname").cloned().unwrap_or_else(|| header.uname.clone());
    let gname = pax.get("gname").cloned().unwrap_or_else(|| header.gname.clone());

    let modified = pax
        .get("mtime")
        .and_then(|v| parse_pax_time(v))
        .or_else(|| Some(UNIX_EPOCH + Duration::from_secs(header.mtime)));

    EntryInfo {
        name: header.name.clone(),
        size: header.size,
        kind,
        modified,
        accessed: pax.get("atime").and_then(|v| parse_pax_time(v)),
        created: pax.get("ctime").and_then(|v| parse_pax_time(v)),
        mode: Some(header.mode & 0o7777),
        uid: Some(uid),
        gid: Some(gid),
        uname: (!uname.is_empty()).then_some(uname),
        gname: (!gname.is_empty()).then_some(gname),
        link_target: (!header.linkname.is_empty()).then(|| header.linkname.clone()),
        comment: pax.get("comment").cloned(),
        ext: FormatExt::Tar {
            device,
            pax: pax.clone(),
        },
    }
}

/// An in-memory TAR archive: every entry, decoded.
#[derive(Debug, Clone)]
pub struct TarArchive {
    entries: Vec<TarEntry>,
}

impl TarArchive {
    /// Decode all entries of `data`.
    pub fn open(data: &[u8]) -> Result<Self, TarError> {
        if data.len() < BLOCK_SIZE {
            return Err(TarError::TooSmall(data.len()));
        }
        let entries = TarReader::new(data).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// The decoded entries, in file order.
    pub fn entries(&self) -> &[TarEntry] {
        &self.entries
    }

    /// Take ownership of the entries.
    pub fn into_entries(self) -> Vec<TarEntry> {
        self.entries
    }

    /// Find an entry by name.
    pub fn entry_by_name(&self, name: &str) -> Option<&TarEntry> {
        self.entries.iter().find(|e| e.info.name == name)
    }
}

/// List entry attributes without keeping payloads around.
pub fn info(data: &[u8]) -> Result<Vec<EntryInfo>, TarError> {
    Ok(TarArchive::open(data)?
        .into_entries()
        .into_iter()
        .map(|e| e.info)
        .collect())
}

//! TAR archive creation in four header dialects.

use super::{BLOCK_SIZE, TarError};
use std::io::Write;
use std::time::UNIX_EPOCH;
use unarc_core::{EntryInfo, EntryKind};

/// Header dialect to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TarFormat {
    /// Historic pre-POSIX headers: no magic, names up to 100 bytes.
    PrePosix,
    /// POSIX.1-1988 UStar: magic + version, prefix splitting for long
    /// names.
    Ustar,
    /// GNU: `L`/`K` records carry long names and link targets.
    Gnu,
    /// POSIX.1-2001 PAX: `x` records carry anything UStar cannot.
    #[default]
    Pax,
}

/// Largest value an 11-digit octal field can hold.
const OCTAL11_MAX: u64 = 0o77777777777;
/// Largest value a 7-digit octal field can hold.
const OCTAL7_MAX: u64 = 0o7777777;

/// Streaming TAR writer.
///
/// Entries are appended with their attributes and payload; [`finish`]
/// writes the two terminating zero records.
///
/// [`finish`]: TarWriter::finish
pub struct TarWriter<W: Write> {
    writer: W,
    format: TarFormat,
    finished: bool,
}

impl<W: Write> TarWriter<W> {
    /// Create a writer emitting the given dialect.
    pub fn new(writer: W, format: TarFormat) -> Self {
        Self {
            writer,
            format,
            finished: false,
        }
    }

    /// Append a regular file with mode 644.
    pub fn add_file(&mut self, name: &str, data: &[u8]) -> Result<(), TarError> {
        let mut info = EntryInfo::regular(name, data.len() as u64);
        info.mode = Some(0o644);
        self.append(&info, data)
    }

    /// Append a directory with mode 755.
    pub fn add_directory(&mut self, name: &str) -> Result<(), TarError> {
        let name = if name.ends_with('/') {
            name.to_string()
        } else {
            format!("{}/", name)
        };
        let mut info = EntryInfo::directory(name);
        info.mode = Some(0o755);
        self.append(&info, &[])
    }

    /// Append a symbolic link.
    pub fn add_symlink(&mut self, name: &str, target: &str) -> Result<(), TarError> {
        let mut info = EntryInfo::regular(name, 0);
        info.kind = EntryKind::Symlink;
        info.mode = Some(0o777);
        info.link_target = Some(target.to_string());
        self.append(&info, &[])
    }

    /// Append an entry from its attributes and payload.
    pub fn append(&mut self, info: &EntryInfo, data: &[u8]) -> Result<(), TarError> {
        let size = data.len() as u64;

        match self.format {
            TarFormat::Pax => {
                let records = self.pax_records(info, size);
                if !records.is_empty() {
                    self.write_pax_header(&info.name, &records)?;
                }
            }
            TarFormat::Gnu => {
                if info.name.len() > 100 {
                    self.write_gnu_record(b'L', &info.name)?;
                }
                if info.link_target.as_ref().is_some_and(|t| t.len() > 100) {
                    let target = info.link_target.clone().unwrap_or_default();
                    self.write_gnu_record(b'K', &target)?;
                }
            }
            TarFormat::PrePosix | TarFormat::Ustar => {}
        }

        let block = self.build_header(info, size)?;
        self.writer.write_all(&block)?;
        self.write_data(data)?;
        Ok(())
    }

    /// Write the two zero records that end the archive.
    pub fn finish(&mut self) -> Result<(), TarError> {
        if !self.finished {
            self.writer.write_all(&[0u8; BLOCK_SIZE])?;
            self.writer.write_all(&[0u8; BLOCK_SIZE])?;
            self.writer.flush()?;
            self.finished = true;
        }
        Ok(())
    }

    /// Finish the archive and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W, TarError> {
        self.finish()?;
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: self is consumed and not dropped; the writer is moved
        // out exactly once.
        Ok(unsafe { std::ptr::read(&this.writer) })
    }

    /// PAX records for whatever does not fit a UStar header.
    fn pax_records(&self, info: &EntryInfo, size: u64) -> Vec<(String, String)> {
        let mut records = Vec::new();
        if info.name.len() > 100 && split_prefix(&info.name).is_none() {
            records.push(("path".to_string(), info.name.clone()));
        }
        if let Some(target) = &info.link_target {
            if target.len() > 100 {
                records.push(("linkpath".to_string(), target.clone()));
            }
        }
        if size > OCTAL11_MAX {
            records.push(("size".to_string(), size.to_string()));
        }
        if info.uid.unwrap_or(0) > OCTAL7_MAX {
            records.push(("uid".to_string(), info.uid.unwrap_or(0).to_string()));
        }
        if info.gid.unwrap_or(0) > OCTAL7_MAX {
            records.push(("gid".to_string(), info.gid.unwrap_or(0).to_string()));
        }
        if let Some(modified) = info.modified {
            // Sub-second times survive only as PAX records.
            if let Ok(duration) = modified.duration_since(UNIX_EPOCH) {
                if duration.subsec_nanos() != 0 {
                    records.push((
                        "mtime".to_string(),
                        format!("{}.{:09}", duration.as_secs(), duration.subsec_nanos()),
                    ));
                }
            } else {
                let before = UNIX_EPOCH
                    .duration_since(modified)
                    .unwrap_or_default();
                records.push(("mtime".to_string(), format!("-{}", before.as_secs())));
            }
        }
        records
    }

    /// Write an `x` extended header carrying the given records.
    fn write_pax_header(
        &mut self,
        for_name: &str,
        records: &[(String, String)],
    ) -> Result<(), TarError> {
        let mut payload = Vec::new();
        for (key, value) in records {
            payload.extend_from_slice(format_pax_record(key, value).as_bytes());
        }

        let short: String = format!("PaxHeaders/{}", tail(for_name, 88));
        let mut info = EntryInfo::regular(short, payload.len() as u64);
        info.mode = Some(0o644);
        let mut block = header_block(&info, payload.len() as u64, b'x', TarFormat::Ustar)?;
        finalize_checksum(&mut block);
        self.writer.write_all(&block)?;
        self.write_data(&payload)?;
        Ok(())
    }

    /// Write a GNU `L` (long name) or `K` (long link) record.
    fn write_gnu_record(&mut self, typeflag: u8, value: &str) -> Result<(), TarError> {
        let payload: Vec<u8> = value.as_bytes().iter().copied().chain([0]).collect();
        let info = EntryInfo::regular("././@LongLink", payload.len() as u64);
        let mut block = header_block(&info, payload.len() as u64, typeflag, TarFormat::Gnu)?;
        finalize_checksum(&mut block);
        self.writer.write_all(&block)?;
        self.write_data(&payload)?;
        Ok(())
    }

    fn build_header(&self, info: &EntryInfo, size: u64) -> Result<[u8; BLOCK_SIZE], TarError> {
        let typeflag = match info.kind {
            EntryKind::Regular => {
                if self.format == TarFormat::PrePosix {
                    0
                } else {
                    b'0'
                }
            }
            EntryKind::Hardlink => b'1',
            EntryKind::Symlink => b'2',
            EntryKind::CharDevice => b'3',
            EntryKind::BlockDevice => b'4',
            EntryKind::Directory => b'5',
            EntryKind::Fifo => b'6',
            EntryKind::Other => b'0',
        };
        let mut block = header_block(info, size, typeflag, self.format)?;
        finalize_checksum(&mut block);
        Ok(block)
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), TarError> {
        self.writer.write_all(data)?;
        let padding = (BLOCK_SIZE - (data.len() % BLOCK_SIZE)) % BLOCK_SIZE;
        if padding > 0 {
            self.writer.write_all(&vec![0u8; padding])?;
        }
        Ok(())
    }
}

impl<W: Write> Drop for TarWriter<W> {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Fill a header block except for its checksum.
fn header_block(
    info: &EntryInfo,
    size: u64,
    typeflag: u8,
    format: TarFormat,
) -> Result<[u8; BLOCK_SIZE], TarError> {
    let mut block = [0u8; BLOCK_SIZE];

    // Name, possibly split across prefix + name for UStar.
    let name = &info.name;
    if name.len() <= 100 {
        block[..name.len()].copy_from_slice(name.as_bytes());
    } else {
        match format {
            TarFormat::Ustar | TarFormat::Pax => match split_prefix(name) {
                Some((prefix, base)) => {
                    block[..base.len()].copy_from_slice(base.as_bytes());
                    block[345..345 + prefix.len()].copy_from_slice(prefix.as_bytes());
                }
                None if format == TarFormat::Ustar => {
                    return Err(TarError::NameTooLong(name.clone()));
                }
                // The PAX record preceding this header carries the real
                // name; keep a truncated tail for old readers.
                None => {
                    let tail = tail(name, 100);
                    block[..tail.len()].copy_from_slice(tail.as_bytes());
                }
            },
            TarFormat::PrePosix => return Err(TarError::NameTooLong(name.clone())),
            TarFormat::Gnu => {
                let tail = tail(name, 100);
                block[..tail.len()].copy_from_slice(tail.as_bytes());
            }
        }
    }

    write_octal(&mut block[100..108], info.mode.unwrap_or(0o644) as u64);
    write_octal_checked(&mut block[108..116], info.uid.unwrap_or(0), "uid", format)?;
    write_octal_checked(&mut block[116..124], info.gid.unwrap_or(0), "gid", format)?;
    write_octal_checked(&mut block[124..136], size, "size", format)?;

    let mtime = info
        .modified
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());
    write_octal_checked(&mut block[136..148], mtime, "mtime", format)?;

    block[156] = typeflag;
    if let Some(target) = &info.link_target {
        let tail = tail(target, 100);
        block[157..157 + tail.len()].copy_from_slice(tail.as_bytes());
    }

    match format {
        TarFormat::PrePosix => {}
        TarFormat::Gnu => {
            block[257..265].copy_from_slice(b"ustar  \0");
        }
        TarFormat::Ustar | TarFormat::Pax => {
            block[257..263].copy_from_slice(b"ustar\0");
            block[263..265].copy_from_slice(b"00");
        }
    }
    if format != TarFormat::PrePosix {
        if let Some(uname) = &info.uname {
            let tail = tail(uname, 31);
            block[265..265 + tail.len()].copy_from_slice(tail.as_bytes());
        }
        if let Some(gname) = &info.gname {
            let tail = tail(gname, 31);
            block[297..297 + tail.len()].copy_from_slice(tail.as_bytes());
        }
        if let unarc_core::FormatExt::Tar {
            device: Some(device),
            ..
        } = &info.ext
        {
            write_octal(&mut block[329..337], device.major as u64);
            write_octal(&mut block[337..345], device.minor as u64);
        }
    }

    Ok(block)
}

/// Write the checksum over a block whose checksum field is still zero.
fn finalize_checksum(block: &mut [u8; BLOCK_SIZE]) {
    block[148..156].copy_from_slice(b"        ");
    let sum: u32 = block.iter().map(|&b| b as u32).sum();
    let checksum = format!("{:06o}\0 ", sum);
    block[148..156].copy_from_slice(checksum.as_bytes());
}

/// Zero-padded octal, NUL-terminated.
fn write_octal(field: &mut [u8], value: u64) {
    let text = format!("{:0width$o}", value, width = field.len() - 1);
    field[..text.len()].copy_from_slice(text.as_bytes());
}

/// Octal write that fails when the value cannot fit. PAX callers have
/// already moved oversized values into extended records, so clamping the
/// header field to the octal maximum keeps old readers working.
fn write_octal_checked(
    field: &mut [u8],
    value: u64,
    name: &'static str,
    format: TarFormat,
) -> Result<(), TarError> {
    let max = match field.len() {
        8 => OCTAL7_MAX,
        12 => OCTAL11_MAX,
        _ => u64::MAX,
    };
    if value > max {
        if format != TarFormat::Pax {
            return Err(TarError::FieldTooLarge { field: name });
        }
        write_octal(field, max);
    } else {
        write_octal(field, value);
    }
    Ok(())
}

/// Split a long name into a UStar (prefix, name) pair at a `/`.
fn split_prefix(name: &str) -> Option<(&str, &str)> {
    for (index, _) in name.match_indices('/') {
        let (prefix, rest) = name.split_at(index);
        let base = &rest[1..];
        if prefix.len() <= 155 && !base.is_empty() && base.len() <= 100 {
            return Some((prefix, base));
        }
    }
    None
}

/// Last `max` bytes of a name, for truncated compatibility fields.
fn tail(name: &str, max: usize) -> &str {
    if name.len() <= max {
        name
    } else {
        let mut start = name.len() - max;
        while !name.is_char_boundary(start) {
            start += 1;
        }
        &name[start..]
    }
}

/// Format one PAX record, whose length prefix counts itself.
fn format_pax_record(key: &str, value: &str) -> String {
    let base_len = key.len() + value.len() + 3; // space, '=', newline
    let mut total = base_len + 1;
    loop {
        let digits = total.to_string().len();
        if base_len + digits == total {
            break;
        }
        total = base_len + digits;
    }
    format!("{} {}={}\n", total, key, value)
}

#[cfg(test)]
mod tests {
    use super::super::TarArchive;
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_roundtrip_simple() {
        let mut output = Vec::new();
        {
            let mut writer = TarWriter::new(&mut output, TarFormat::Ustar);
            writer.add_directory("docs").unwrap();
            writer.add_file("docs/readme.txt", b"Read me first!").unwrap();
            writer.add_symlink("latest", "docs/readme.txt").unwrap();
            writer.finish().unwrap();
        }

        let archive = TarArchive::open(&output).unwrap();
        let entries = archive.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].info.name, "docs/");
        assert!(entries[0].info.kind.is_dir());
        assert_eq!(entries[1].data, b"Read me first!");
        assert_eq!(entries[2].info.kind, EntryKind::Symlink);
        assert_eq!(
            entries[2].info.link_target.as_deref(),
            Some("docs/readme.txt")
        );
    }

    #[test]
    fn test_pre_posix_rejects_long_names() {
        let long = "d/".repeat(60) + "f";
        let mut writer = TarWriter::new(Vec::new(), TarFormat::PrePosix);
        assert!(matches!(
            writer.add_file(&long, b""),
            Err(TarError::NameTooLong(_))
        ));
    }

    #[test]
    fn test_ustar_prefix_split_roundtrip() {
        let name = format!("{}/file.txt", "sub/".repeat(30).trim_end_matches('/'));
        assert!(name.len() > 100);
        let mut output = Vec::new();
        {
            let mut writer = TarWriter::new(&mut output, TarFormat::Ustar);
            writer.add_file(&name, b"deep").unwrap();
            writer.finish().unwrap();
        }
        let archive = TarArchive::open(&output).unwrap();
        assert_eq!(archive.entries()[0].info.name, name);
    }

    #[test]
    fn test_gnu_long_name_roundtrip() {
        let name = "x".repeat(180);
        let mut output = Vec::new();
        {
            let mut writer = TarWriter::new(&mut output, TarFormat::Gnu);
            writer.add_file(&name, b"gnu").unwrap();
            writer.finish().unwrap();
        }
        let archive = TarArchive::open(&output).unwrap();
        assert_eq!(archive.entries()[0].info.name, name);
        assert_eq!(archive.entries()[0].data, b"gnu");
    }

    #[test]
    fn test_pax_long_name_roundtrip() {
        let name = "p".repeat(180);
        let mut output = Vec::new();
        {
            let mut writer = TarWriter::new(&mut output, TarFormat::Pax);
            writer.add_file(&name, b"pax").unwrap();
            writer.finish().unwrap();
        }
        let archive = TarArchive::open(&output).unwrap();
        assert_eq!(archive.entries()[0].info.name, name);
    }

    #[test]
    fn test_pax_subsecond_mtime_roundtrip() {
        let mut info = EntryInfo::regular("timed", 0);
        info.mode = Some(0o644);
        info.modified = Some(UNIX_EPOCH + Duration::new(1_600_000_000, 123_456_789));

        let mut output = Vec::new();
        {
            let mut writer = TarWriter::new(&mut output, TarFormat::Pax);
            writer.append(&info, &[]).unwrap();
            writer.finish().unwrap();
        }
        let archive = TarArchive::open(&output).unwrap();
        assert_eq!(
            archive.entries()[0].info.modified,
            Some(UNIX_EPOCH + Duration::new(1_600_000_000, 123_456_789))
        );
    }

    #[test]
    fn test_pax_large_uid_roundtrip() {
        let mut info = EntryInfo::regular("owned", 0);
        info.uid = Some(1 << 40);
        let mut output = Vec::new();
        {
            let mut writer = TarWriter::new(&mut output, TarFormat::Pax);
            writer.append(&info, &[]).unwrap();
            writer.finish().unwrap();
        }
        let archive = TarArchive::open(&output).unwrap();
        assert_eq!(archive.entries()[0].info.uid, Some(1 << 40));
    }

    #[test]
    fn test_ustar_rejects_oversized_uid() {
        let mut info = EntryInfo::regular("owned", 0);
        info.uid = Some(1 << 40);
        let mut writer = TarWriter::new(Vec::new(), TarFormat::Ustar);
        assert!(matches!(
            writer.append(&info, &[]),
            Err(TarError::FieldTooLarge { field: "uid" })
        ));
    }

    #[test]
    fn test_format_pax_record_self_length() {
        assert_eq!(format_pax_record("path", "test.txt"), "17 path=test.txt\n");
        let long = "a".repeat(200);
        let record = format_pax_record("path", &long);
        assert!(record.starts_with("210 path="));
        assert_eq!(record.len(), 210);
    }

    #[test]
    fn test_split_prefix() {
        assert_eq!(split_prefix("a/b"), Some(("a", "b")));
        assert!(split_prefix(&"x".repeat(200)).is_none());
        let name = format!("{}/{}", "p".repeat(155), "n".repeat(100));
        assert!(split_prefix(&name).is_some());
    }
}

//! The ZIP extra-field dictionary.
//!
//! Extra fields are `(tag, length, payload)` records attached to both the
//! local and central headers. This module parses the tags the reader
//! interprets (Zip64 sizes, three flavors of timestamps and two flavors
//! of Unix ownership) and retains everything else verbatim.
//!
//! Attribute resolution prefers the most precise source: modification,
//! access and creation times come from the extended timestamp field, then
//! NTFS, then the DOS fields of the record itself; owner ids prefer
//! Info-ZIP New Unix over the older Info-ZIP Unix field.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Zip64 extended information (tag 0x0001).
pub const TAG_ZIP64: u16 = 0x0001;
/// Extended timestamp (tag 0x5455, "UT").
pub const TAG_EXTENDED_TIMESTAMP: u16 = 0x5455;
/// NTFS timestamps (tag 0x000A).
pub const TAG_NTFS: u16 = 0x000A;
/// Info-ZIP New Unix (tag 0x7875, "ux").
pub const TAG_UNIX_NEW: u16 = 0x7875;
/// Info-ZIP Unix (tag 0x5855, "UX").
pub const TAG_UNIX_OLD: u16 = 0x5855;

/// An extra field the reader does not interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtraField {
    /// Field tag.
    pub tag: u16,
    /// Field payload, verbatim.
    pub data: Vec<u8>,
}

/// Which 32-bit fields of the carrying record were saturated and must be
/// replaced from the Zip64 field.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64Markers {
    /// Uncompressed size was 0xFFFFFFFF.
    pub uncompressed_size: bool,
    /// Compressed size was 0xFFFFFFFF.
    pub compressed_size: bool,
    /// Local header offset was 0xFFFFFFFF.
    pub local_header_offset: bool,
    /// Disk start number was 0xFFFF.
    pub disk_start: bool,
}

/// Parsed Zip64 extended information.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64Extra {
    /// 64-bit uncompressed size.
    pub uncompressed_size: Option<u64>,
    /// 64-bit compressed size.
    pub compressed_size: Option<u64>,
    /// 64-bit local header offset.
    pub local_header_offset: Option<u64>,
}

/// Extended timestamp field: Unix seconds for whichever times its flag
/// bits announce (the central copy usually carries only the mtime).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedTimestamp {
    /// Modification time.
    pub mtime: Option<i64>,
    /// Access time.
    pub atime: Option<i64>,
    /// Creation time.
    pub ctime: Option<i64>,
}

/// NTFS timestamps, 100-nanosecond ticks since 1601-01-01.
#[derive(Debug, Clone, Copy, Default)]
pub struct NtfsTimes {
    /// Modification time.
    pub mtime: Option<u64>,
    /// Access time.
    pub atime: Option<u64>,
    /// Creation time.
    pub ctime: Option<u64>,
}

/// Info-ZIP New Unix field: explicit-width uid/gid.
#[derive(Debug, Clone, Copy)]
pub struct UnixIds {
    /// Owner user id.
    pub uid: u64,
    /// Owner group id.
    pub gid: u64,
}

/// The older Info-ZIP Unix field: fixed 32-bit times, 16-bit ids.
#[derive(Debug, Clone, Copy)]
pub struct InfoZipUnix {
    /// Access time, Unix seconds.
    pub atime: i64,
    /// Modification time, Unix seconds.
    pub mtime: i64,
    /// Owner user id, when present.
    pub uid: Option<u16>,
    /// Owner group id, when present.
    pub gid: Option<u16>,
}

/// Every extra field of one record, parsed or retained.
#[derive(Debug, Clone, Default)]
pub struct ExtraFields {
    /// Zip64 sizes and offset.
    pub zip64: Zip64Extra,
    /// Extended timestamp field.
    pub timestamp: Option<ExtendedTimestamp>,
    /// NTFS timestamps.
    pub ntfs: Option<NtfsTimes>,
    /// Info-ZIP New Unix ownership.
    pub unix_new: Option<UnixIds>,
    /// Info-ZIP Unix times and ownership.
    pub unix_old: Option<InfoZipUnix>,
    /// Unrecognized fields, verbatim.
    pub unknown: Vec<RawExtraField>,
}

impl ExtraFields {
    /// Walk the `(tag, length, payload)` sequence. Individually malformed
    /// fields are kept in `unknown` rather than failing the entry.
    pub fn parse(extra: &[u8], markers: Zip64Markers) -> Self {
        let mut fields = Self::default();
        let mut pos = 0usize;
        while pos + 4 <= extra.len() {
            let tag = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
            let length = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
            pos += 4;
            let Some(payload) = extra.get(pos..pos + length) else {
                break;
            };
            pos += length;

            let parsed = match tag {
                TAG_ZIP64 => parse_zip64(payload, markers).map(|z| fields.zip64 = z),
                TAG_EXTENDED_TIMESTAMP => {
                    parse_extended_timestamp(payload).map(|t| fields.timestamp = Some(t))
                }
                TAG_NTFS => parse_ntfs(payload).map(|t| fields.ntfs = Some(t)),
                TAG_UNIX_NEW => parse_unix_new(payload).map(|u| fields.unix_new = Some(u)),
                TAG_UNIX_OLD => parse_unix_old(payload).map(|u| fields.unix_old = Some(u)),
                _ => None,
            };
            if parsed.is_none() && tag != TAG_ZIP64 {
                fields.unknown.push(RawExtraField {
                    tag,
                    data: payload.to_vec(),
                });
            }
        }
        fields
    }

    /// Modification time, best source first: extended timestamp, NTFS,
    /// then the DOS date/time of the record.
    pub fn modified(&self, dos_date: u16, dos_time: u16) -> Option<SystemTime> {
        self.timestamp
            .and_then(|t| t.mtime)
            .and_then(unix_time)
            .or_else(|| self.ntfs.and_then(|t| t.mtime).and_then(ntfs_time))
            .or_else(|| self.unix_old.map(|u| u.mtime).and_then(unix_time))
            .or_else(|| dos_datetime(dos_date, dos_time))
    }

    /// Access time; DOS records none.
    pub fn accessed(&self) -> Option<SystemTime> {
        self.timestamp
            .and_then(|t| t.atime)
            .and_then(unix_time)
            .or_else(|| self.ntfs.and_then(|t| t.atime).and_then(ntfs_time))
            .or_else(|| self.unix_old.map(|u| u.atime).and_then(unix_time))
    }

    /// Creation time; DOS records none.
    pub fn created(&self) -> Option<SystemTime> {
        self.timestamp
            .and_then(|t| t.ctime)
            .and_then(unix_time)
            .or_else(|| self.ntfs.and_then(|t| t.ctime).and_then(ntfs_time))
    }

    /// Owner ids, preferring the New Unix field.
    pub fn owner_ids(&self) -> (Option<u64>, Option<u64>) {
        if let Some(ids) = self.unix_new {
            return (Some(ids.uid), Some(ids.gid));
        }
        if let Some(old) = self.unix_old {
            return (old.uid.map(u64::from), old.gid.map(u64::from));
        }
        (None, None)
    }
}

fn parse_zip64(payload: &[u8], markers: Zip64Markers) -> Option<Zip64Extra> {
    // Values appear in a fixed order, but only for the saturated fields.
    let mut pos = 0usize;
    let mut extra = Zip64Extra::default();
    if markers.uncompressed_size {
        extra.uncompressed_size = Some(read_u64(payload, &mut pos)?);
    }
    if markers.compressed_size {
        extra.compressed_size = Some(read_u64(payload, &mut pos)?);
    }
    if markers.local_header_offset {
        extra.local_header_offset = Some(read_u64(payload, &mut pos)?);
    }
    // A disk-start u32 may follow; nothing here needs it.
    Some(extra)
}

fn parse_extended_timestamp(payload: &[u8]) -> Option<ExtendedTimestamp> {
    let flags = *payload.first()?;
    let mut pos = 1usize;
    let mut times = ExtendedTimestamp::default();
    if flags & 0x01 != 0 {
        times.mtime = read_i32(payload, &mut pos);
    }
    if flags & 0x02 != 0 {
        times.atime = read_i32(payload, &mut pos);
    }
    if flags & 0x04 != 0 {
        times.ctime = read_i32(payload, &mut pos);
    }
    Some(times)
}

fn read_i32(payload: &[u8], pos: &mut usize) -> Option<i64> {
    let bytes = payload.get(*pos..*pos + 4)?;
    *pos += 4;
    Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64)
}

fn parse_ntfs(payload: &[u8]) -> Option<NtfsTimes> {
    let mut pos = 4usize; // reserved
    let mut times = NtfsTimes::default();
    while pos + 4 <= payload.len() {
        let tag = u16::from_le_bytes([payload[pos], payload[pos + 1]]);
        let size = u16::from_le_bytes([payload[pos + 2], payload[pos + 3]]) as usize;
        pos += 4;
        let attribute = payload.get(pos..pos + size)?;
        pos += size;
        if tag == 0x0001 && size >= 24 {
            let mut at = 0usize;
            times.mtime = read_u64(attribute, &mut at);
            times.atime = read_u64(attribute, &mut at);
            times.ctime = read_u64(attribute, &mut at);
        }
    }
    Some(times)
}

fn parse_unix_new(payload: &[u8]) -> Option<UnixIds> {
    let mut pos = 0usize;
    let version = *payload.first()?;
    pos += 1;
    if version != 1 {
        return None;
    }
    let uid = read_sized(payload, &mut pos)?;
    let gid = read_sized(payload, &mut pos)?;
    Some(UnixIds { uid, gid })
}

fn parse_unix_old(payload: &[u8]) -> Option<InfoZipUnix> {
    if payload.len() < 8 {
        return None;
    }
    let atime = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as i64;
    let mtime = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as i64;
    let (uid, gid) = if payload.len() >= 12 {
        (
            Some(u16::from_le_bytes([payload[8], payload[9]])),
            Some(u16::from_le_bytes([payload[10], payload[11]])),
        )
    } else {
        (None, None)
    };
    Some(InfoZipUnix {
        atime,
        mtime,
        uid,
        gid,
    })
}

/// Variable-width little-endian integer prefixed by its byte count.
fn read_sized(payload: &[u8], pos: &mut usize) -> Option<u64> {
    let width = *payload.get(*pos)? as usize;
    *pos += 1;
    let bytes = payload.get(*pos..*pos + width)?;
    *pos += width;
    let mut value = 0u64;
    for (i, &b) in bytes.iter().enumerate().take(8) {
        value |= (b as u64) << (8 * i);
    }
    Some(value)
}

fn read_u64(payload: &[u8], pos: &mut usize) -> Option<u64> {
    let bytes = payload.get(*pos..*pos + 8)?;
    *pos += 8;
    Some(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

/// Unix seconds to `SystemTime`, pre-epoch values included.
fn unix_time(secs: i64) -> Option<SystemTime> {
    if secs >= 0 {
        Some(UNIX_EPOCH + Duration::from_secs(secs as u64))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs(secs.unsigned_abs()))
    }
}

/// Seconds between 1601-01-01 and 1970-01-01.
const NTFS_EPOCH_OFFSET: u64 = 11_644_473_600;

/// NTFS 100ns ticks to `SystemTime`.
fn ntfs_time(ticks: u64) -> Option<SystemTime> {
    let secs = ticks / 10_000_000;
    let nanos = (ticks % 10_000_000) * 100;
    let since_1601 = Duration::new(secs, nanos as u32);
    let epoch_gap = Duration::from_secs(NTFS_EPOCH_OFFSET);
    if since_1601 >= epoch_gap {
        Some(UNIX_EPOCH + (since_1601 - epoch_gap))
    } else {
        UNIX_EPOCH.checked_sub(epoch_gap - since_1601)
    }
}

/// DOS date/time to `SystemTime` (two-second resolution, 1980 epoch).
pub fn dos_datetime(date: u16, time: u16) -> Option<SystemTime> {
    let year = ((date >> 9) & 0x7F) as i64 + 1980;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    if month == 0 || day == 0 {
        return None;
    }
    let hours = ((time >> 11) & 0x1F) as u64;
    let minutes = ((time >> 5) & 0x3F) as u64;
    let seconds = ((time & 0x1F) as u64) * 2;

    let days = days_from_civil(year, month, day);
    let secs = days as u64 * 86_400 + hours * 3_600 + minutes * 60 + seconds;
    Some(UNIX_EPOCH + Duration::from_secs(secs))
}

/// Days from 1970-01-01 to the given civil date (proleptic Gregorian).
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let year_of_era = year - era * 400;
    let month_shifted = if month > 2 { month - 3 } else { month + 9 } as i64;
    let day_of_year = (153 * month_shifted + 2) / 5 + day as i64 - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_from_civil() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(1970, 1, 2), 1);
        assert_eq!(days_from_civil(1980, 1, 1), 3652);
        assert_eq!(days_from_civil(2000, 3, 1), 11017);
        assert_eq!(days_from_civil(2024, 2, 29), 19782);
    }

    #[test]
    fn test_dos_datetime() {
        // 2020-01-01 12:30:04: date = (40 << 9) | (1 << 5) | 1,
        // time = (12 << 11) | (30 << 5) | 2.
        let date = (40 << 9) | (1 << 5) | 1;
        let time = (12 << 11) | (30 << 5) | 2;
        let when = dos_datetime(date, time).unwrap();
        let secs = when.duration_since(UNIX_EPOCH).unwrap().as_secs();
        assert_eq!(secs, 1_577_881_804);
    }

    #[test]
    fn test_extended_timestamp_central_copy() {
        // Flags announce mtime+atime, but only mtime is present.
        let payload = [0x03, 0x00, 0x00, 0x00, 0x60];
        let times = parse_extended_timestamp(&payload).unwrap();
        assert_eq!(times.mtime, Some(0x6000_0000));
        assert_eq!(times.atime, None);
    }

    #[test]
    fn test_unix_new_sized_ids() {
        // version 1, 4-byte uid 1000, 4-byte gid 100.
        let payload = [1, 4, 0xE8, 0x03, 0, 0, 4, 0x64, 0, 0, 0];
        let ids = parse_unix_new(&payload).unwrap();
        assert_eq!(ids.uid, 1000);
        assert_eq!(ids.gid, 100);
    }

    #[test]
    fn test_ntfs_times() {
        let mut payload = vec![0u8; 4]; // reserved
        payload.extend_from_slice(&0x0001u16.to_le_bytes());
        payload.extend_from_slice(&24u16.to_le_bytes());
        // 2009-ish tick count; exact value checked by inversion.
        let ticks: u64 = 128_790_414_425_000_000;
        payload.extend_from_slice(&ticks.to_le_bytes());
        payload.extend_from_slice(&ticks.to_le_bytes());
        payload.extend_from_slice(&ticks.to_le_bytes());
        let times = parse_ntfs(&payload).unwrap();
        let when = ntfs_time(times.mtime.unwrap()).unwrap();
        let secs = when.duration_since(UNIX_EPOCH).unwrap().as_secs();
        assert_eq!(secs, ticks / 10_000_000 - NTFS_EPOCH_OFFSET);
    }

    #[test]
    fn test_resolution_prefers_extended_timestamp() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&TAG_EXTENDED_TIMESTAMP.to_le_bytes());
        extra.extend_from_slice(&5u16.to_le_bytes());
        extra.extend_from_slice(&[0x01, 0x10, 0x00, 0x00, 0x60]);
        let fields = ExtraFields::parse(&extra, Zip64Markers::default());
        let when = fields.modified(0x5021, 0).unwrap();
        assert_eq!(
            when.duration_since(UNIX_EPOCH).unwrap().as_secs(),
            0x6000_0010
        );
    }

    #[test]
    fn test_unknown_tags_retained() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&0xCAFEu16.to_le_bytes());
        extra.extend_from_slice(&3u16.to_le_bytes());
        extra.extend_from_slice(&[1, 2, 3]);
        let fields = ExtraFields::parse(&extra, Zip64Markers::default());
        assert_eq!(
            fields.unknown,
            vec![RawExtraField {
                tag: 0xCAFE,
                data: vec![1, 2, 3]
            }]
        );
    }

    #[test]
    fn test_zip64_respects_markers() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(5_000_000_000u64).to_le_bytes());
        payload.extend_from_slice(&(4_000_000_000u64).to_le_bytes());
        let mut extra = Vec::new();
        extra.extend_from_slice(&TAG_ZIP64.to_le_bytes());
        extra.extend_from_slice(&16u16.to_le_bytes());
        extra.extend_from_slice(&payload);

        let markers = Zip64Markers {
            uncompressed_size: true,
            compressed_size: true,
            ..Zip64Markers::default()
        };
        let fields = ExtraFields::parse(&extra, markers);
        assert_eq!(fields.zip64.uncompressed_size, Some(5_000_000_000));
        assert_eq!(fields.zip64.compressed_size, Some(4_000_000_000));
        assert_eq!(fields.zip64.local_header_offset, None);
    }
}

//! GZIP framing (RFC 1952).
//!
//! A GZIP file is one or more members, each a 10-byte fixed header,
//! optional fields selected by the flags byte, a DEFLATE stream, and an
//! 8-byte trailer (CRC-32 of the decompressed data, then its length mod
//! 2^32). Decoding walks all members over one shared bit reader and
//! concatenates their payloads.

use thiserror::Error;
use unarc_core::checksum::Crc32;
use unarc_core::{BitOrder, BitReader, UnexpectedEnd};
use unarc_deflate::DeflateError;

/// GZIP magic bytes.
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// The only defined compression method, DEFLATE.
pub const CM_DEFLATE: u8 = 8;

/// GZIP header flag bits.
pub mod flags {
    /// Payload is probably text.
    pub const FTEXT: u8 = 0x01;
    /// A 16-bit header CRC follows the optional fields.
    pub const FHCRC: u8 = 0x02;
    /// An extra field is present.
    pub const FEXTRA: u8 = 0x04;
    /// A NUL-terminated original file name is present.
    pub const FNAME: u8 = 0x08;
    /// A NUL-terminated comment is present.
    pub const FCOMMENT: u8 = 0x10;
    /// Mask of the reserved bits, which must be zero.
    pub const RESERVED: u8 = 0xE0;
}

/// Errors produced by the GZIP unwrapper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GzipError {
    /// The member does not start with `1F 8B`.
    #[error("not a gzip member (bad magic {0:02x?})")]
    WrongMagic([u8; 2]),

    /// The compression method is not DEFLATE.
    #[error("unsupported gzip compression method {0}")]
    WrongCompressionMethod(u8),

    /// Reserved flag bits are set.
    #[error("reserved gzip flag bits set: {0:#04x}")]
    WrongFlags(u8),

    /// The optional header CRC does not match the header bytes.
    #[error("gzip header CRC mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    WrongHeaderCrc {
        /// CRC16 stored in the header.
        stored: u16,
        /// Low 16 bits of the CRC-32 over the header bytes.
        computed: u16,
    },

    /// The trailer CRC does not match the decompressed data.
    #[error("gzip CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    WrongCrc {
        /// CRC stored in the trailer.
        stored: u32,
        /// CRC of the decompressed bytes.
        computed: u32,
    },

    /// The trailer size field does not match the decompressed length.
    #[error("gzip size mismatch: stored {stored}, decompressed {actual} bytes")]
    WrongSize {
        /// ISIZE stored in the trailer.
        stored: u32,
        /// Low 32 bits of the actual decompressed length.
        actual: u32,
    },

    /// The DEFLATE payload is invalid.
    #[error(transparent)]
    Deflate(#[from] DeflateError),

    /// The input ended mid-member.
    #[error(transparent)]
    Truncated(#[from] UnexpectedEnd),
}

/// A parsed GZIP member header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GzipHeader {
    /// Compression method (always 8).
    pub method: u8,
    /// Flags byte.
    pub flags: u8,
    /// Modification time, Unix seconds (0 = unavailable).
    pub mtime: u32,
    /// Extra flags (compression level hints).
    pub xfl: u8,
    /// Operating system identifier.
    pub os: u8,
    /// Extra field payload, when FEXTRA is set.
    pub extra: Option<Vec<u8>>,
    /// Original file name, when FNAME is set.
    pub filename: Option<String>,
    /// Comment, when FCOMMENT is set.
    pub comment: Option<String>,
    /// Stored header CRC, when FHCRC is set (already verified).
    pub header_crc: Option<u16>,
}

/// One decoded member: its header and decompressed payload.
#[derive(Debug, Clone)]
pub struct GzipMember {
    /// The member's header.
    pub header: GzipHeader,
    /// The decompressed payload.
    pub data: Vec<u8>,
}

impl GzipHeader {
    /// Parse a member header from `reader` (byte-aligned).
    ///
    /// `input` is the full original slice, used to checksum the header
    /// bytes when FHCRC is set.
    fn read(reader: &mut BitReader<'_>, input: &[u8]) -> Result<Self, GzipError> {
        let start = reader.byte_position();

        let magic = [reader.read_aligned_byte()?, reader.read_aligned_byte()?];
        if magic != GZIP_MAGIC {
            return Err(GzipError::WrongMagic(magic));
        }
        let method = reader.read_aligned_byte()?;
        if method != CM_DEFLATE {
            return Err(GzipError::WrongCompressionMethod(method));
        }
        let flag_bits = reader.read_aligned_byte()?;
        if flag_bits & flags::RESERVED != 0 {
            return Err(GzipError::WrongFlags(flag_bits));
        }
        let mtime = reader.read_aligned_uint(4)? as u32;
        let xfl = reader.read_aligned_byte()?;
        let os = reader.read_aligned_byte()?;

        let extra = if flag_bits & flags::FEXTRA != 0 {
            let len = reader.read_aligned_uint(2)? as usize;
            Some(reader.read_aligned_slice(len)?.to_vec())
        } else {
            None
        };
        let filename = if flag_bits & flags::FNAME != 0 {
            Some(read_null_terminated(reader)?)
        } else {
            None
        };
        let comment = if flag_bits & flags::FCOMMENT != 0 {
            Some(read_null_terminated(reader)?)
        } else {
            None
        };

        let header_crc = if flag_bits & flags::FHCRC != 0 {
            let computed = (Crc32::compute(&input[start..reader.byte_position()]) & 0xFFFF) as u16;
            let stored = reader.read_aligned_uint(2)? as u16;
            if stored != computed {
                return Err(GzipError::WrongHeaderCrc { stored, computed });
            }
            Some(stored)
        } else {
            None
        };

        Ok(Self {
            method,
            flags: flag_bits,
            mtime,
            xfl,
            os,
            extra,
            filename,
            comment,
            header_crc,
        })
    }
}

/// Strings in gzip headers are ISO 8859-1; decode losslessly into char.
fn read_null_terminated(reader: &mut BitReader<'_>) -> Result<String, GzipError> {
    let mut text = String::new();
    loop {
        let byte = reader.read_aligned_byte()?;
        if byte == 0 {
            return Ok(text);
        }
        text.push(byte as char);
    }
}

/// Decode every member of `data` and return their headers and payloads.
pub fn members(data: &[u8]) -> Result<Vec<GzipMember>, GzipError> {
    let mut reader = BitReader::new(data, BitOrder::Lsb);
    let mut members = Vec::new();

    loop {
        let header = GzipHeader::read(&mut reader, data)?;
        let payload = unarc_deflate::inflate_from(&mut reader)?;

        reader.align_to_byte();
        let stored_crc = reader.read_aligned_uint(4)? as u32;
        let computed_crc = Crc32::compute(&payload);
        if stored_crc != computed_crc {
            return Err(GzipError::WrongCrc {
                stored: stored_crc,
                computed: computed_crc,
            });
        }
        let stored_size = reader.read_aligned_uint(4)? as u32;
        let actual = (payload.len() as u64 & 0xFFFF_FFFF) as u32;
        if stored_size != actual {
            return Err(GzipError::WrongSize {
                stored: stored_size,
                actual,
            });
        }

        members.push(GzipMember {
            header,
            data: payload,
        });

        if reader.at_end() {
            return Ok(members);
        }
        // Anything after a trailer must be another member.
    }
}

/// Decompress `data`, concatenating all members' payloads.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, GzipError> {
    let members = members(data)?;
    let mut output = Vec::new();
    for member in members {
        output.extend_from_slice(&member.data);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference member: "hello", mtime 0, OS 3 (Unix).
    const HELLO: [u8; 25] = [
        0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xCB, 0x48, 0xCD, 0xC9, 0xC9,
        0x07, 0x00, 0x86, 0xA6, 0x10, 0x36, 0x05, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn test_reference_member() {
        assert_eq!(decompress(&HELLO).unwrap(), b"hello");
    }

    #[test]
    fn test_trailer_values_are_checked() {
        let members = members(&HELLO).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(Crc32::compute(&members[0].data), 0x3610A686);
        assert_eq!(members[0].header.os, 3);
        assert_eq!(members[0].header.mtime, 0);
    }

    #[test]
    fn test_concatenated_members() {
        let mut data = HELLO.to_vec();
        data.extend_from_slice(&HELLO);
        assert_eq!(decompress(&data).unwrap(), b"hellohello");
        assert_eq!(members(&data).unwrap().len(), 2);
    }

    #[test]
    fn test_wrong_magic() {
        let mut data = HELLO.to_vec();
        data[0] = 0x1E;
        assert!(matches!(decompress(&data), Err(GzipError::WrongMagic(_))));
    }

    #[test]
    fn test_wrong_method() {
        let mut data = HELLO.to_vec();
        data[2] = 7;
        assert!(matches!(
            decompress(&data),
            Err(GzipError::WrongCompressionMethod(7))
        ));
    }

    #[test]
    fn test_reserved_flags_rejected() {
        let mut data = HELLO.to_vec();
        data[3] = 0x20;
        assert!(matches!(decompress(&data), Err(GzipError::WrongFlags(_))));
    }

    #[test]
    fn test_filename_field() {
        // Insert FNAME "a.txt\0" after the fixed header.
        let mut data = HELLO[..10].to_vec();
        data[3] |= flags::FNAME;
        data.extend_from_slice(b"a.txt\0");
        data.extend_from_slice(&HELLO[10..]);
        let members = members(&data).unwrap();
        assert_eq!(members[0].header.filename.as_deref(), Some("a.txt"));
        assert_eq!(members[0].data, b"hello");
    }

    #[test]
    fn test_header_crc() {
        // Build a member with FHCRC and a correct header CRC.
        let mut data = HELLO[..10].to_vec();
        data[3] |= flags::FHCRC;
        let crc = (Crc32::compute(&data) & 0xFFFF) as u16;
        data.extend_from_slice(&crc.to_le_bytes());
        data.extend_from_slice(&HELLO[10..]);
        assert_eq!(decompress(&data).unwrap(), b"hello");

        // Now corrupt the stored value.
        let pos = 10;
        let mut bad = data.clone();
        bad[pos] ^= 0xFF;
        assert!(matches!(
            decompress(&bad),
            Err(GzipError::WrongHeaderCrc { .. })
        ));
    }

    #[test]
    fn test_corrupted_trailer_crc() {
        let mut data = HELLO.to_vec();
        data[17] ^= 0x01;
        assert!(matches!(decompress(&data), Err(GzipError::WrongCrc { .. })));
    }

    #[test]
    fn test_corrupted_isize() {
        let mut data = HELLO.to_vec();
        data[21] = 6;
        assert!(matches!(
            decompress(&data),
            Err(GzipError::WrongSize { stored: 6, .. })
        ));
    }

    #[test]
    fn test_truncated_trailer() {
        let data = &HELLO[..20];
        assert!(matches!(decompress(data), Err(GzipError::Truncated(_))));
    }
}

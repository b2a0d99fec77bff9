//! The LZMA2 chunk layer.
//!
//! LZMA2 wraps raw LZMA in one-byte control packets:
//!
//! - `0x00`: end of the LZMA2 stream
//! - `0x01` / `0x02`: uncompressed chunk, with / without dictionary reset
//! - `0x80..=0xFF`: LZMA chunk; bits 0-4 are the high bits of the unpacked
//!   size, bits 5-6 select what to reset (nothing / state / state+props /
//!   state+props+dictionary)
//!
//! Chunk sizes are explicit, so the extent of an LZMA2 stream can be found
//! without decoding it ([`scan_len`]); the XZ reader uses this when a block
//! header omits the compressed size.

use crate::LzmaError;
use crate::decoder::{DICT_SIZE_MIN, LzmaDecoder, OutputLimit};
use crate::model::LzmaProperties;
use crate::range::RangeDecoder;
use unarc_core::UnexpectedEnd;

/// Decode the LZMA2 dictionary-size properties byte from an XZ filter
/// chain: valid values are 0..=40, with 40 meaning 4 GiB - 1.
pub fn dict_size_from_props(byte: u8) -> Result<u32, LzmaError> {
    if byte > 40 {
        return Err(LzmaError::BadDictSize(byte));
    }
    if byte == 40 {
        return Ok(u32::MAX);
    }
    Ok((2 | (byte as u32 & 1)) << (byte / 2 + 11))
}

/// LZMA2 decoder configured with a dictionary size.
#[derive(Debug, Clone)]
pub struct Lzma2Decoder {
    dict_size: u32,
}

impl Lzma2Decoder {
    /// Create a decoder; `dict_size` bounds match distances.
    pub fn new(dict_size: u32) -> Self {
        Self {
            dict_size: dict_size.max(DICT_SIZE_MIN),
        }
    }

    /// Decode a complete LZMA2 stream (through its `0x00` end marker).
    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>, LzmaError> {
        let mut out = Vec::new();
        let mut pos = 0usize;
        let mut dict_base = 0usize;
        let mut need_dict_reset = true;
        let mut props: Option<LzmaProperties> = None;
        let mut decoder: Option<LzmaDecoder> = None;

        loop {
            let control = *data.get(pos).ok_or(UnexpectedEnd)?;
            pos += 1;

            match control {
                0x00 => return Ok(out),
                0x01 | 0x02 => {
                    if control == 0x01 {
                        dict_base = out.len();
                        need_dict_reset = false;
                    } else if need_dict_reset {
                        return Err(LzmaError::MissingDictReset);
                    }
                    let size = read_be16(data, &mut pos)? as usize + 1;
                    let chunk = data.get(pos..pos + size).ok_or(UnexpectedEnd)?;
                    pos += size;
                    out.extend_from_slice(chunk);
                    // An uncompressed chunk resets the LZMA state.
                    decoder = None;
                }
                0x03..=0x7F => return Err(LzmaError::BadControlByte(control)),
                _ => {
                    let unpacked =
                        (((control & 0x1F) as u64) << 16) + read_be16(data, &mut pos)? as u64 + 1;
                    let packed = read_be16(data, &mut pos)? as usize + 1;
                    let reset = (control >> 5) & 0x3;

                    if reset >= 2 {
                        let byte = *data.get(pos).ok_or(UnexpectedEnd)?;
                        pos += 1;
                        props = Some(LzmaProperties::from_byte_lzma2(byte)?);
                    }
                    if reset == 3 {
                        dict_base = out.len();
                        need_dict_reset = false;
                    }
                    if need_dict_reset {
                        return Err(LzmaError::MissingDictReset);
                    }
                    if reset >= 1 || decoder.is_none() {
                        let props = props.ok_or(LzmaError::MissingProperties)?;
                        decoder = Some(LzmaDecoder::new(props));
                    }
                    let dec = decoder.as_mut().ok_or(LzmaError::MissingProperties)?;

                    let chunk = data.get(pos..pos + packed).ok_or(UnexpectedEnd)?;
                    pos += packed;

                    let mut rc = RangeDecoder::new(chunk)?;
                    let before = out.len();
                    let target = (before - dict_base) as u64 + unpacked;
                    dec.decode_into(
                        &mut rc,
                        &mut out,
                        dict_base,
                        self.dict_size,
                        OutputLimit::Exact(target),
                    )?;
                    if out.len() - before != unpacked as usize {
                        return Err(LzmaError::ChunkSizeMismatch {
                            produced: (out.len() - before) as u64,
                            declared: unpacked,
                        });
                    }
                }
            }
        }
    }
}

/// Walk the chunk framing without decoding and return the byte length of
/// the LZMA2 stream starting at `data[0]`, end marker included.
pub fn scan_len(data: &[u8]) -> Result<usize, LzmaError> {
    let mut pos = 0usize;
    loop {
        let control = *data.get(pos).ok_or(UnexpectedEnd)?;
        pos += 1;
        match control {
            0x00 => return Ok(pos),
            0x01 | 0x02 => {
                let size = read_be16(data, &mut pos)? as usize + 1;
                if data.len() - pos < size {
                    return Err(UnexpectedEnd.into());
                }
                pos += size;
            }
            0x03..=0x7F => return Err(LzmaError::BadControlByte(control)),
            _ => {
                let _unpacked = read_be16(data, &mut pos)?;
                let packed = read_be16(data, &mut pos)? as usize + 1;
                if (control >> 5) & 0x3 >= 2 {
                    pos += 1; // properties byte
                }
                if data.len() < pos || data.len() - pos < packed {
                    return Err(UnexpectedEnd.into());
                }
                pos += packed;
            }
        }
    }
}

fn read_be16(data: &[u8], pos: &mut usize) -> Result<u16, UnexpectedEnd> {
    let hi = *data.get(*pos).ok_or(UnexpectedEnd)?;
    let lo = *data.get(*pos + 1).ok_or(UnexpectedEnd)?;
    *pos += 2;
    Ok(u16::from_be_bytes([hi, lo]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    // LZMA2 payload of a reference XZ stream (dictionary props 0x16).
    const HELLO_CHUNK: &str = "e0001600125d00341949ee8de917893a335ffd814408818000";

    #[test]
    fn test_compressed_chunk() {
        let mut data = decode_hex(HELLO_CHUNK);
        data.push(0x00);
        let decoder = Lzma2Decoder::new(dict_size_from_props(0x16).unwrap());
        assert_eq!(decoder.decode(&data).unwrap(), b"hello world hello world");
    }

    #[test]
    fn test_uncompressed_chunks() {
        // Dict-reset chunk "hello", continuation chunk " world".
        let mut data = vec![0x01, 0x00, 0x04];
        data.extend_from_slice(b"hello");
        data.extend_from_slice(&[0x02, 0x00, 0x05]);
        data.extend_from_slice(b" world");
        data.push(0x00);
        let decoder = Lzma2Decoder::new(1 << 16);
        assert_eq!(decoder.decode(&data).unwrap(), b"hello world");
    }

    #[test]
    fn test_first_chunk_must_reset_dict() {
        let mut data = vec![0x02, 0x00, 0x01];
        data.extend_from_slice(b"hi");
        data.push(0x00);
        let decoder = Lzma2Decoder::new(1 << 16);
        assert!(matches!(
            decoder.decode(&data),
            Err(LzmaError::MissingDictReset)
        ));
    }

    #[test]
    fn test_reserved_control_byte() {
        let decoder = Lzma2Decoder::new(1 << 16);
        assert!(matches!(
            decoder.decode(&[0x7F]),
            Err(LzmaError::BadControlByte(0x7F))
        ));
    }

    #[test]
    fn test_missing_end_marker() {
        let mut data = vec![0x01, 0x00, 0x01];
        data.extend_from_slice(b"hi");
        let decoder = Lzma2Decoder::new(1 << 16);
        assert!(matches!(decoder.decode(&data), Err(LzmaError::Truncated(_))));
    }

    #[test]
    fn test_scan_len_matches_stream_extent() {
        let mut data = decode_hex(HELLO_CHUNK);
        data.push(0x00);
        let expected = data.len();
        data.extend_from_slice(&[0xDE, 0xAD]); // trailing bytes ignored
        assert_eq!(scan_len(&data).unwrap(), expected);
    }

    #[test]
    fn test_dict_size_props() {
        assert_eq!(dict_size_from_props(0).unwrap(), 1 << 12);
        assert_eq!(dict_size_from_props(1).unwrap(), 3 << 11);
        assert_eq!(dict_size_from_props(0x16).unwrap(), 1 << 23);
        assert_eq!(dict_size_from_props(40).unwrap(), u32::MAX);
        assert!(dict_size_from_props(41).is_err());
    }
}

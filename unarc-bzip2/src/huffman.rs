//! Canonical Huffman decoding for bzip2.
//!
//! bzip2 transmits 2..6 tables per block and switches between them every
//! 50 symbols. Codes are MSB-first with lengths 1..=20, decoded with the
//! canonical limit/base/permutation method: read the minimum length, then
//! extend one bit at a time while the code exceeds the largest code of the
//! current length.

use crate::Bzip2Error;
use unarc_core::BitReader;

/// Symbols decoded per selector group.
pub const GROUP_SIZE: usize = 50;

/// Longest code length the format allows.
pub const MAX_CODE_LEN: usize = 20;

/// One block's Huffman table, in decode form.
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    min_len: u32,
    max_len: u32,
    /// First canonical code of each length.
    bases: [i64; MAX_CODE_LEN + 2],
    /// Largest canonical code of each length (first - 1 where the length
    /// is unused, so the extend loop always moves on).
    limits: [i64; MAX_CODE_LEN + 2],
    /// Index into `perms` where each length's symbols start.
    base_index: [u32; MAX_CODE_LEN + 2],
    /// Symbols ordered by (length, symbol value).
    perms: Vec<u16>,
}

impl HuffmanTable {
    /// Build a decode table from one code length per symbol.
    pub fn from_lengths(lengths: &[u8]) -> Result<Self, Bzip2Error> {
        let mut min_len = MAX_CODE_LEN as u32;
        let mut max_len = 0u32;
        for &len in lengths {
            if len == 0 || len as usize > MAX_CODE_LEN {
                return Err(Bzip2Error::BadCodeLength);
            }
            min_len = min_len.min(len as u32);
            max_len = max_len.max(len as u32);
        }
        if max_len == 0 {
            return Err(Bzip2Error::BadCodeLength);
        }

        let mut counts = [0u32; MAX_CODE_LEN + 2];
        for &len in lengths {
            counts[len as usize] += 1;
        }

        let mut bases = [0i64; MAX_CODE_LEN + 2];
        let mut limits = [0i64; MAX_CODE_LEN + 2];
        let mut base_index = [0u32; MAX_CODE_LEN + 2];
        let mut code = 0i64;
        let mut index = 0u32;
        for len in 1..=max_len as usize {
            bases[len] = code;
            base_index[len] = index;
            limits[len] = code + counts[len] as i64 - 1;
            code = (code + counts[len] as i64) << 1;
            index += counts[len];
        }

        let mut perms = vec![0u16; lengths.len()];
        let mut next_index = base_index;
        for (symbol, &len) in lengths.iter().enumerate() {
            let slot = next_index[len as usize];
            perms[slot as usize] = symbol as u16;
            next_index[len as usize] += 1;
        }

        Ok(Self {
            min_len,
            max_len,
            bases,
            limits,
            base_index,
            perms,
        })
    }

    /// Decode one symbol from an MSB-first bit stream.
    pub fn decode(&self, reader: &mut BitReader<'_>) -> Result<u16, Bzip2Error> {
        let mut len = self.min_len;
        let mut code = reader.read_bits(len)? as i64;
        while code > self.limits[len as usize] {
            if len >= self.max_len {
                return Err(Bzip2Error::BadHuffmanCode);
            }
            code = (code << 1) | reader.read_bit()? as i64;
            len += 1;
        }
        let index = self.base_index[len as usize] as i64 + (code - self.bases[len as usize]);
        self.perms
            .get(index as usize)
            .copied()
            .ok_or(Bzip2Error::BadHuffmanCode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unarc_core::{BitOrder, BitReader};

    #[test]
    fn test_uniform_two_bit_code() {
        let table = HuffmanTable::from_lengths(&[2, 2, 2, 2]).unwrap();
        // Codes are 00, 01, 10, 11 in symbol order; MSB-first stream
        // 00 01 10 11 = 0b00011011.
        let data = [0b0001_1011u8];
        let mut reader = BitReader::new(&data, BitOrder::Msb);
        for expected in 0..4u16 {
            assert_eq!(table.decode(&mut reader).unwrap(), expected);
        }
    }

    #[test]
    fn test_mixed_lengths() {
        // Lengths 1,2,3,3: canonical codes 0, 10, 110, 111.
        let table = HuffmanTable::from_lengths(&[1, 2, 3, 3]).unwrap();
        // Stream: 111 110 10 0 = 0b11111010 0...
        let data = [0b1111_1010, 0b0000_0000];
        let mut reader = BitReader::new(&data, BitOrder::Msb);
        assert_eq!(table.decode(&mut reader).unwrap(), 3);
        assert_eq!(table.decode(&mut reader).unwrap(), 2);
        assert_eq!(table.decode(&mut reader).unwrap(), 1);
        assert_eq!(table.decode(&mut reader).unwrap(), 0);
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(HuffmanTable::from_lengths(&[1, 0, 2]).is_err());
    }

    #[test]
    fn test_overlong_rejected() {
        assert!(HuffmanTable::from_lengths(&[21, 1]).is_err());
    }
}

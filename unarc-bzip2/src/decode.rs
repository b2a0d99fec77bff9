//! The BZIP2 stream and block decoder.

use crate::crc::StreamCrc;
use crate::huffman::{GROUP_SIZE, HuffmanTable, MAX_CODE_LEN};
use crate::rle::{RUNB, ZeroRun, rle1_decode};
use crate::{BLOCK_MAGIC, BZIP2_MAGIC, Bzip2Error, EOS_MAGIC, bwt, mtf};
use unarc_core::{BitOrder, BitReader};

/// Decoder for one BZIP2 stream.
///
/// Blocks come out one at a time through [`BzDecoder::read_block`]; the
/// end-of-stream record verifies the combined CRC of everything read.
pub struct BzDecoder<'a> {
    reader: BitReader<'a>,
    combined_crc: u32,
    finished: bool,
}

impl<'a> BzDecoder<'a> {
    /// Parse the `BZh` header and position the decoder at the first block.
    pub fn new(data: &'a [u8]) -> Result<Self, Bzip2Error> {
        let mut reader = BitReader::new(data, BitOrder::Msb);
        let magic = reader.read_bits(16)? as u16;
        if magic.to_be_bytes() != BZIP2_MAGIC {
            return Err(Bzip2Error::WrongMagic);
        }
        if reader.read_bits(8)? as u8 != b'h' {
            return Err(Bzip2Error::WrongMagic);
        }
        let digit = reader.read_bits(8)? as u8;
        if !(b'1'..=b'9').contains(&digit) {
            return Err(Bzip2Error::BadBlockSize(digit as char));
        }
        // The digit fixes the maximum block size (digit * 100k); decoding
        // needs no other use of it.

        Ok(Self {
            reader,
            combined_crc: 0,
            finished: false,
        })
    }

    /// Decode the next block, or `None` after the end-of-stream record.
    pub fn read_block(&mut self) -> Result<Option<Vec<u8>>, Bzip2Error> {
        if self.finished {
            return Ok(None);
        }

        let magic = self.reader.read_bits(48)?;
        if magic == EOS_MAGIC {
            let stored = self.reader.read_bits(32)? as u32;
            if stored != self.combined_crc {
                return Err(Bzip2Error::StreamCrcMismatch {
                    stored,
                    computed: self.combined_crc,
                });
            }
            self.finished = true;
            return Ok(None);
        }
        if magic != BLOCK_MAGIC {
            return Err(Bzip2Error::BadBlockMagic(magic));
        }

        let block_crc = self.reader.read_bits(32)? as u32;
        if self.reader.read_bit()? != 0 {
            return Err(Bzip2Error::Randomized);
        }
        let orig_ptr = self.reader.read_bits(24)? as u32;

        // Two-level bitmap of the byte values used in this block.
        let mut used = [false; 256];
        let groups = self.reader.read_bits(16)? as u16;
        for group in 0..16 {
            if groups & (0x8000 >> group) != 0 {
                let bits = self.reader.read_bits(16)? as u16;
                for bit in 0..16 {
                    if bits & (0x8000 >> bit) != 0 {
                        used[group * 16 + bit] = true;
                    }
                }
            }
        }
        let used_count = used.iter().filter(|&&u| u).count();
        let alphabet_size = used_count + 2; // plus RUNA/RUNB..EOB overlay
        let eob = (alphabet_size - 1) as u16;

        let num_tables = self.reader.read_bits(3)? as u32;
        if !(2..=6).contains(&num_tables) {
            return Err(Bzip2Error::BadTableCount(num_tables));
        }
        let num_selectors = self.reader.read_bits(15)? as usize;

        // Selectors are MTF-coded indices into the table list, sent unary.
        let mut selector_mtf: Vec<u8> = (0..num_tables as u8).collect();
        let mut selectors = Vec::with_capacity(num_selectors);
        for _ in 0..num_selectors {
            let mut index = 0usize;
            while self.reader.read_bit()? == 1 {
                index += 1;
                if index >= num_tables as usize {
                    return Err(Bzip2Error::BadSelector);
                }
            }
            let table = selector_mtf[index];
            selector_mtf.copy_within(0..index, 1);
            selector_mtf[0] = table;
            selectors.push(table);
        }

        // Delta-coded code lengths, one table at a time.
        let mut tables = Vec::with_capacity(num_tables as usize);
        for _ in 0..num_tables {
            let mut lengths = Vec::with_capacity(alphabet_size);
            let mut current = self.reader.read_bits(5)? as i32;
            for _ in 0..alphabet_size {
                loop {
                    if !(1..=MAX_CODE_LEN as i32).contains(&current) {
                        return Err(Bzip2Error::BadCodeLength);
                    }
                    if self.reader.read_bit()? == 0 {
                        break;
                    }
                    if self.reader.read_bit()? == 0 {
                        current += 1;
                    } else {
                        current -= 1;
                    }
                }
                lengths.push(current as u8);
            }
            tables.push(HuffmanTable::from_lengths(&lengths)?);
        }

        // Huffman symbols -> MTF indices, expanding RUNA/RUNB zero runs.
        let mut indices: Vec<u16> = Vec::new();
        let mut zero_run = ZeroRun::new();
        let mut selector_iter = selectors.iter();
        let mut group_remaining = 0usize;
        let mut table = &tables[0];
        loop {
            if group_remaining == 0 {
                let selector = *selector_iter.next().ok_or(Bzip2Error::BadSelector)?;
                table = tables.get(selector as usize).ok_or(Bzip2Error::BadSelector)?;
                group_remaining = GROUP_SIZE;
            }
            group_remaining -= 1;

            let symbol = table.decode(&mut self.reader)?;
            if symbol == eob {
                zero_run.flush(&mut indices);
                break;
            } else if symbol <= RUNB {
                zero_run.push(symbol);
            } else {
                zero_run.flush(&mut indices);
                indices.push(symbol - 1);
            }
        }

        // Inverse transforms: MTF, BWT, RLE1.
        let bwt_data = mtf::inverse(&indices, &used);
        let rle_data = bwt::inverse(&bwt_data, orig_ptr)?;
        let data = rle1_decode(&rle_data)?;

        let computed = StreamCrc::compute(&data);
        if computed != block_crc {
            return Err(Bzip2Error::BlockCrcMismatch {
                stored: block_crc,
                computed,
            });
        }
        self.combined_crc = StreamCrc::combine(self.combined_crc, block_crc);

        Ok(Some(data))
    }

    /// Whether the end-of-stream record has been consumed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn into_reader(self) -> BitReader<'a> {
        self.reader
    }
}

/// Decompress one or more concatenated BZIP2 streams.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, Bzip2Error> {
    let mut output = Vec::new();
    let mut remaining = data;
    loop {
        let mut decoder = BzDecoder::new(remaining)?;
        while let Some(block) = decoder.read_block()? {
            output.extend_from_slice(&block);
        }
        let mut reader = decoder.into_reader();
        reader.align_to_byte();
        if reader.at_end() {
            return Ok(output);
        }
        // Streams concatenate at byte boundaries.
        remaining = reader.read_aligned_slice(reader.remaining_bytes())?;
    }
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

    #[test]
    fn test_reference_stream() {
        // "hello world hello world", reference encoder, block size 1.
        let data = decode_hex(
            "425a683131415926535976668c420000039180400006449080200020aa869e81\
             0c08ec4457ed686311a2ee48a70a120eccd18840",
        );
        assert_eq!(decompress(&data).unwrap(), b"hello world hello world");
    }

    #[test]
    fn test_reference_stream_hello() {
        let data = decode_hex(
            "425a68393141592653591931653d00000081000244a000219a68334d07338bb9229c28480c98b29e80",
        );
        assert_eq!(decompress(&data).unwrap(), b"hello");
    }

    #[test]
    fn test_concatenated_streams() {
        let one = decode_hex(
            "425a68393141592653591931653d00000081000244a000219a68334d07338bb9229c28480c98b29e80",
        );
        let mut data = one.clone();
        data.extend_from_slice(&one);
        assert_eq!(decompress(&data).unwrap(), b"hellohello");
    }

    #[test]
    fn test_wrong_magic() {
        assert!(matches!(
            decompress(b"XZXZXZXZ"),
            Err(Bzip2Error::WrongMagic)
        ));
    }

    #[test]
    fn test_bad_block_size_digit() {
        assert!(matches!(
            decompress(b"BZh0rest"),
            Err(Bzip2Error::BadBlockSize('0'))
        ));
    }

    #[test]
    fn test_corrupted_block_crc() {
        let mut data = decode_hex(
            "425a68393141592653591931653d00000081000244a000219a68334d07338bb9229c28480c98b29e80",
        );
        // Flip a bit in the stored block CRC (bytes 10..14 hold it).
        data[11] ^= 0x01;
        assert!(matches!(
            decompress(&data),
            Err(Bzip2Error::BlockCrcMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated() {
        let data = decode_hex("425a68393141592653591931");
        assert!(matches!(decompress(&data), Err(Bzip2Error::Truncated(_))));
    }
}

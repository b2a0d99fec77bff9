//! Canonical Huffman tables for DEFLATE.
//!
//! DEFLATE transmits only the code length of each symbol; the codes
//! themselves are implied (RFC 1951 §3.2.2): codes are assigned in
//! increasing order of length, and within a length in increasing order of
//! symbol value. A length of zero means the symbol is absent.
//!
//! Decoding uses a direct-addressed array of `2^maxlen` entries, prefilled
//! with `(symbol, length)` for every possible window of upcoming bits, so a
//! symbol costs one speculative read plus one lookup. The bits the code did
//! not use are handed back with [`BitReader::rewind`].

use crate::DeflateError;
use unarc_core::BitReader;

/// Longest code length DEFLATE can express.
pub const MAX_CODE_LENGTH: u32 = 15;

/// End-of-block symbol in the literal/length alphabet.
pub const END_OF_BLOCK: u16 = 256;

/// A decoding table for one canonical Huffman code.
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    /// `(symbol, code length)` for every `max_len`-bit window, indexed by
    /// the upcoming bits in LSB-first order. Length 0 marks an unassigned
    /// prefix.
    lookup: Vec<(u16, u8)>,
    /// Longest code length in this table.
    max_len: u8,
}

impl HuffmanTable {
    /// Build a table from a length-per-symbol vector.
    ///
    /// Over-subscribed length vectors are rejected; incomplete codes (unused
    /// prefixes), single-symbol alphabets and fully empty alphabets are
    /// allowed; decoding just fails on the missing prefixes.
    pub fn from_lengths(lengths: &[u8]) -> Result<Self, DeflateError> {
        let mut count = [0u32; MAX_CODE_LENGTH as usize + 1];
        let mut max_len = 0u8;
        for &len in lengths {
            if len as u32 > MAX_CODE_LENGTH {
                return Err(DeflateError::BadCodeLengths("code length exceeds 15 bits"));
            }
            if len > 0 {
                count[len as usize] += 1;
                max_len = max_len.max(len);
            }
        }

        if max_len == 0 {
            return Ok(Self {
                lookup: Vec::new(),
                max_len: 0,
            });
        }

        // Reject over-subscribed codes: more codes of some length than the
        // prefix space can hold.
        let mut available = 1i64;
        for len in 1..=max_len as usize {
            available <<= 1;
            available -= count[len] as i64;
            if available < 0 {
                return Err(DeflateError::BadCodeLengths("over-subscribed code"));
            }
        }

        // First code of each length: code(l) = (code(l-1) + count(l-1)) << 1.
        let mut next_code = [0u32; MAX_CODE_LENGTH as usize + 1];
        let mut code = 0u32;
        for len in 1..=max_len as usize {
            code = (code + count[len - 1]) << 1;
            next_code[len] = code;
        }

        // Assign codes in symbol order and prefill every window that starts
        // with each code. The window index is LSB-first, so the canonical
        // (MSB-first) code is bit-reversed before use.
        let mut lookup = vec![(0u16, 0u8); 1 << max_len];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let code = reverse_bits(next_code[len as usize] as u16, len);
            next_code[len as usize] += 1;
            let mut index = code as usize;
            while index < lookup.len() {
                lookup[index] = (symbol as u16, len);
                index += 1 << len;
            }
        }

        Ok(Self { lookup, max_len })
    }

    /// Build a table from a sparse bootstrap list of
    /// `(start symbol, length)` pairs defining piecewise-constant lengths.
    ///
    /// Each pair applies from its start symbol up to the next pair's start;
    /// the final pair terminates the alphabet and its length is ignored.
    /// Length 0 leaves a range unassigned.
    pub fn from_bootstrap(pairs: &[(u16, u8)]) -> Result<Self, DeflateError> {
        let mut lengths = Vec::new();
        for window in pairs.windows(2) {
            let (start, len) = window[0];
            let (end, _) = window[1];
            if lengths.len() < start as usize {
                lengths.resize(start as usize, 0);
            }
            lengths.resize(end as usize, len);
        }
        Self::from_lengths(&lengths)
    }

    /// Decode one symbol from `reader`.
    ///
    /// Reads up to `max_len` bits speculatively, looks the window up, and
    /// rewinds the bits beyond the matched code's length.
    pub fn decode(&self, reader: &mut BitReader<'_>) -> Result<u16, DeflateError> {
        if self.max_len == 0 {
            return Err(DeflateError::HuffmanTable {
                bit_position: reader.bit_position(),
            });
        }

        let start = reader.bit_position();
        let mut window = 0u32;
        let mut avail = 0u8;
        while avail < self.max_len {
            match reader.read_bit() {
                Ok(bit) => {
                    window |= bit << avail;
                    avail += 1;
                }
                Err(_) => break,
            }
        }
        if avail == 0 {
            return Err(unarc_core::UnexpectedEnd.into());
        }

        let (symbol, len) = self.lookup[window as usize];
        if len == 0 {
            return Err(DeflateError::HuffmanTable {
                bit_position: start,
            });
        }
        if len > avail {
            // The code continues past the end of the input.
            return Err(unarc_core::UnexpectedEnd.into());
        }
        reader.rewind((avail - len) as u32);
        Ok(symbol)
    }
}

/// Reverse the low `len` bits of `code`.
fn reverse_bits(mut code: u16, len: u8) -> u16 {
    let mut reversed = 0u16;
    for _ in 0..len {
        reversed = (reversed << 1) | (code & 1);
        code >>= 1;
    }
    reversed
}

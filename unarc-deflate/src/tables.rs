//! Fixed code tables and length/distance maps for DEFLATE (RFC 1951).

use crate::huffman::HuffmanTable;
use std::sync::OnceLock;

/// Piecewise lengths of the fixed literal/length code (RFC 1951 §3.2.6):
/// 8 bits for 0–143, 9 for 144–255, 7 for 256–279, 8 for 280–287.
const FIXED_LITLEN_BOOTSTRAP: [(u16, u8); 5] = [(0, 8), (144, 9), (256, 7), (280, 8), (288, 0)];

/// All 30 fixed distance codes are 5 bits wide.
const FIXED_DISTANCE_BOOTSTRAP: [(u16, u8); 2] = [(0, 5), (30, 0)];

/// The fixed literal/length table, built once.
pub fn fixed_litlen_table() -> &'static HuffmanTable {
    static TABLE: OnceLock<HuffmanTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        HuffmanTable::from_bootstrap(&FIXED_LITLEN_BOOTSTRAP)
            .expect("fixed literal/length table is well-formed")
    })
}

/// The fixed distance table, built once.
pub fn fixed_distance_table() -> &'static HuffmanTable {
    static TABLE: OnceLock<HuffmanTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        HuffmanTable::from_bootstrap(&FIXED_DISTANCE_BOOTSTRAP)
            .expect("fixed distance table is well-formed")
    })
}

/// Base length for codes 257–285 (RFC 1951 §3.2.5).
pub const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, // 257-264: 0 extra bits
    11, 13, 15, 17, // 265-268: 1 extra bit
    19, 23, 27, 31, // 269-272: 2 extra bits
    35, 43, 51, 59, // 273-276: 3 extra bits
    67, 83, 99, 115, // 277-280: 4 extra bits
    131, 163, 195, 227, // 281-284: 5 extra bits
    258, // 285: 0 extra bits
];

/// Extra bits for length codes 257–285.
pub const LENGTH_EXTRA_BITS: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, // 257-264
    1, 1, 1, 1, // 265-268
    2, 2, 2, 2, // 269-272
    3, 3, 3, 3, // 273-276
    4, 4, 4, 4, // 277-280
    5, 5, 5, 5, // 281-284
    0, // 285
];

/// Base distance for codes 0–29; doubles every two codes from 1.
pub const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, // 0-3: 0 extra bits
    5, 7, // 4-5: 1 extra bit
    9, 13, // 6-7: 2 extra bits
    17, 25, // 8-9: 3 extra bits
    33, 49, // 10-11: 4 extra bits
    65, 97, // 12-13: 5 extra bits
    129, 193, // 14-15: 6 extra bits
    257, 385, // 16-17: 7 extra bits
    513, 769, // 18-19: 8 extra bits
    1025, 1537, // 20-21: 9 extra bits
    2049, 3073, // 22-23: 10 extra bits
    4097, 6145, // 24-25: 11 extra bits
    8193, 12289, // 26-27: 12 extra bits
    16385, 24577, // 28-29: 13 extra bits
];

/// Extra bits for distance codes 0–29.
pub const DISTANCE_EXTRA_BITS: [u8; 30] = [
    0, 0, 0, 0, // 0-3
    1, 1, // 4-5
    2, 2, // 6-7
    3, 3, // 8-9
    4, 4, // 10-11
    5, 5, // 12-13
    6, 6, // 14-15
    7, 7, // 16-17
    8, 8, // 18-19
    9, 9, // 20-21
    10, 10, // 22-23
    11, 11, // 24-25
    12, 12, // 26-27
    13, 13, // 28-29
];

/// Transmission order of the 19 code-length code lengths in a dynamic block
/// header (RFC 1951 §3.2.7).
pub const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

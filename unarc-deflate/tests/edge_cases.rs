//! Edge-case tests driving the public decompression API.

use unarc_deflate::{DeflateError, ZlibError, inflate, zlib};

#[test]
fn empty_input_is_truncated() {
    assert!(matches!(inflate(&[]), Err(DeflateError::Truncated(_))));
}

#[test]
fn stored_payload_is_preserved_verbatim() {
    // Stored blocks must be idempotent: output == payload.
    let payload: Vec<u8> = (0..=255).collect();
    let mut stream = vec![0x01, 0x00, 0x01, 0xFF, 0xFE];
    stream.extend_from_slice(&payload);
    assert_eq!(inflate(&stream).unwrap(), payload);
}

#[test]
fn stored_block_truncated_payload() {
    let stream = [0x01, 0x10, 0x00, 0xEF, 0xFF, b'x'];
    assert!(matches!(inflate(&stream), Err(DeflateError::Truncated(_))));
}

#[test]
fn zlib_empty_payload_roundtrip() {
    // Reference encoder output for b"": 78 9c 03 00 00 00 00 01.
    let stream = [0x78, 0x9C, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01];
    assert_eq!(zlib::decompress(&stream).unwrap(), b"");
}

#[test]
fn zlib_truncated_trailer() {
    let stream = [0x78, 0x9C, 0x03, 0x00, 0x00, 0x00];
    assert!(matches!(
        zlib::decompress(&stream),
        Err(ZlibError::Truncated(_))
    ));
}

#[test]
fn garbage_after_final_block_is_callers_business() {
    // inflate() stops at the final block; trailing bytes are for framing
    // layers to interpret.
    let stream = [0x01, 0x02, 0x00, 0xFD, 0xFF, b'o', b'k', 0xDE, 0xAD];
    assert_eq!(inflate(&stream).unwrap(), b"ok");
}

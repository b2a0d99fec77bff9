//! Inverse Burrows-Wheeler transform.
//!
//! Only the inverse is needed for decoding. A counting pass builds, for
//! each position in the transformed string, the position of its successor
//! in the original string; walking that chain from the transmitted pointer
//! reproduces the block.

use crate::Bzip2Error;

/// Invert the BWT of `data`, starting from the 24-bit original pointer.
pub fn inverse(data: &[u8], orig_ptr: u32) -> Result<Vec<u8>, Bzip2Error> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if orig_ptr as usize >= data.len() {
        return Err(Bzip2Error::BadPointer {
            pointer: orig_ptr,
            length: data.len(),
        });
    }

    // Position of each byte value's first occurrence in the sorted block.
    let mut counts = [0usize; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    let mut starts = [0usize; 256];
    let mut total = 0usize;
    for value in 0..256 {
        starts[value] = total;
        total += counts[value];
    }

    // next[sorted position of data[i]] = i.
    let mut next = vec![0u32; data.len()];
    let mut cursor = starts;
    for (i, &byte) in data.iter().enumerate() {
        next[cursor[byte as usize]] = i as u32;
        cursor[byte as usize] += 1;
    }

    let mut output = Vec::with_capacity(data.len());
    let mut position = next[orig_ptr as usize];
    for _ in 0..data.len() {
        output.push(data[position as usize]);
        position = next[position as usize];
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference forward BWT for the tests: sort all rotations, emit the
    /// last column and the row index of the original string.
    fn forward(data: &[u8]) -> (Vec<u8>, u32) {
        let n = data.len();
        let mut rotations: Vec<usize> = (0..n).collect();
        rotations.sort_by(|&a, &b| {
            (0..n)
                .map(|i| data[(a + i) % n].cmp(&data[(b + i) % n]))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let last: Vec<u8> = rotations.iter().map(|&r| data[(r + n - 1) % n]).collect();
        let ptr = rotations.iter().position(|&r| r == 0).unwrap() as u32;
        (last, ptr)
    }

    #[test]
    fn test_known_transform() {
        // The classic example: BWT("banana") with full rotations.
        let (bwt, ptr) = forward(b"banana");
        assert_eq!(inverse(&bwt, ptr).unwrap(), b"banana");
    }

    #[test]
    fn test_roundtrip_various() {
        for input in [
            &b"abracadabra"[..],
            b"aaaaaaa",
            b"x",
            b"the quick brown fox jumps over the lazy dog",
        ] {
            let (bwt, ptr) = forward(input);
            assert_eq!(inverse(&bwt, ptr).unwrap(), input);
        }
    }

    #[test]
    fn test_empty() {
        assert_eq!(inverse(&[], 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_pointer_out_of_range() {
        assert!(matches!(
            inverse(b"ab", 2),
            Err(Bzip2Error::BadPointer { .. })
        ));
    }
}

//! The LZMA packet decoder and the `.lzma` (alone) container.
//!
//! Packets are `literal`, `match`, `rep0..rep3` and `short rep`; which one
//! comes next is coded through the adaptive switches in [`LzmaModel`].
//! The dictionary is the output buffer itself: matches copy byte-by-byte
//! from `distance` bytes behind the cursor, and LZMA2 dictionary resets
//! simply move the base index forward.

use crate::model::{
    ALIGN_BITS, END_POS_MODEL_INDEX, LEN_LOW_BITS, LEN_MID_BITS, LengthModel, LzmaModel,
    LzmaProperties, MATCH_LEN_MIN, State,
};
use crate::range::RangeDecoder;
use crate::LzmaError;

/// Distance value that marks the end of a marker-terminated stream.
const END_MARKER_DISTANCE: u32 = 0xFFFF_FFFF;

/// Smallest dictionary the format permits.
pub const DICT_SIZE_MIN: u32 = 4096;

/// How a decode run is bounded.
#[derive(Debug, Clone, Copy)]
pub enum OutputLimit {
    /// Decode exactly this many bytes; an end marker is an error.
    Exact(u64),
    /// Decode until the end marker.
    UntilMarker,
}

/// Persistent decoder state: the probability model, the state machine and
/// the four most recent distances. Survives across LZMA2 chunks.
#[derive(Debug, Clone)]
pub(crate) struct LzmaDecoder {
    model: LzmaModel,
    state: State,
    reps: [u32; 4],
}

impl LzmaDecoder {
    pub(crate) fn new(props: LzmaProperties) -> Self {
        Self {
            model: LzmaModel::new(props),
            state: State::new(),
            reps: [0; 4],
        }
    }

    /// Decode packets from `rc`, appending to `out`.
    ///
    /// `dict_base` is the index in `out` where the current dictionary
    /// begins (0 unless an LZMA2 dictionary reset moved it); `dict_size`
    /// bounds match distances.
    pub(crate) fn decode_into(
        &mut self,
        rc: &mut RangeDecoder<'_>,
        out: &mut Vec<u8>,
        dict_base: usize,
        dict_size: u32,
        limit: OutputLimit,
    ) -> Result<(), LzmaError> {
        let pos_mask = self.model.props.num_pos_states() as u64 - 1;

        loop {
            if let OutputLimit::Exact(size) = limit {
                if (out.len() - dict_base) as u64 >= size {
                    return Ok(());
                }
            }

            let total_pos = (out.len() - dict_base) as u64;
            let pos_state = (total_pos & pos_mask) as usize;
            let state_idx = self.state.index();

            if rc.decode_bit(&mut self.model.is_match[state_idx][pos_state])? == 0 {
                let byte = self.decode_literal(rc, out, total_pos)?;
                out.push(byte);
                self.state.update_literal();
                continue;
            }

            let len;
            if rc.decode_bit(&mut self.model.is_rep[state_idx])? == 0 {
                // A fresh match: the three older distances shift down and
                // the new one is decoded from the slot model.
                self.reps[3] = self.reps[2];
                self.reps[2] = self.reps[1];
                self.reps[1] = self.reps[0];
                len = decode_length(rc, &mut self.model.match_len, pos_state)?;
                self.state.update_match();
                self.reps[0] = self.decode_distance(rc, len)?;

                if self.reps[0] == END_MARKER_DISTANCE {
                    return match limit {
                        OutputLimit::UntilMarker => Ok(()),
                        OutputLimit::Exact(_) => Err(LzmaError::UnexpectedEndMarker),
                    };
                }
            } else if rc.decode_bit(&mut self.model.is_rep0[state_idx])? == 0 {
                if rc.decode_bit(&mut self.model.is_rep0_long[state_idx][pos_state])? == 0 {
                    // Short rep: one byte at the most recent distance.
                    let byte = self.byte_at(out, dict_base, self.reps[0])?;
                    out.push(byte);
                    self.state.update_short_rep();
                    continue;
                }
                len = decode_length(rc, &mut self.model.rep_len, pos_state)?;
                self.state.update_rep();
            } else {
                let dist = if rc.decode_bit(&mut self.model.is_rep1[state_idx])? == 0 {
                    self.reps[1]
                } else if rc.decode_bit(&mut self.model.is_rep2[state_idx])? == 0 {
                    let dist = self.reps[2];
                    self.reps[2] = self.reps[1];
                    dist
                } else {
                    let dist = self.reps[3];
                    self.reps[3] = self.reps[2];
                    self.reps[2] = self.reps[1];
                    dist
                };
                self.reps[1] = self.reps[0];
                self.reps[0] = dist;
                len = decode_length(rc, &mut self.model.rep_len, pos_state)?;
                self.state.update_rep();
            }

            let dist = self.reps[0];
            let available = (out.len() - dict_base) as u64;
            if dist as u64 >= available || dist >= dict_size {
                return Err(LzmaError::BadDistance {
                    distance: dist,
                    available,
                });
            }
            if let OutputLimit::Exact(size) = limit {
                if (out.len() - dict_base) as u64 + len as u64 > size {
                    return Err(LzmaError::ChunkSizeMismatch {
                        produced: (out.len() - dict_base) as u64 + len as u64,
                        declared: size,
                    });
                }
            }
            // Byte-by-byte so overlapping matches self-replicate.
            for _ in 0..len {
                let byte = out[out.len() - 1 - dist as usize];
                out.push(byte);
            }
        }
    }

    fn byte_at(&self, out: &[u8], dict_base: usize, dist: u32) -> Result<u8, LzmaError> {
        let available = (out.len() - dict_base) as u64;
        if dist as u64 >= available {
            return Err(LzmaError::BadDistance {
                distance: dist,
                available,
            });
        }
        Ok(out[out.len() - 1 - dist as usize])
    }

    fn decode_literal(
        &mut self,
        rc: &mut RangeDecoder<'_>,
        out: &[u8],
        total_pos: u64,
    ) -> Result<u8, LzmaError> {
        let prev_byte = if total_pos == 0 {
            0
        } else {
            out[out.len() - 1]
        };
        let lit_state = self.model.literal_state(total_pos, prev_byte);
        let probs = &mut self.model.literal[lit_state];

        let mut symbol = 1usize;
        if !self.state.is_literal() {
            // After a match, literals are first coded against the byte the
            // most recent distance points at.
            let mut match_byte = if (self.reps[0] as u64) < total_pos {
                out[out.len() - 1 - self.reps[0] as usize] as u32
            } else {
                return Err(LzmaError::BadDistance {
                    distance: self.reps[0],
                    available: total_pos,
                });
            };
            while symbol < 0x100 {
                let match_bit = (match_byte >> 7) & 1;
                match_byte <<= 1;
                let bit = rc.decode_bit(&mut probs[((1 + match_bit as usize) << 8) + symbol])?;
                symbol = (symbol << 1) | bit as usize;
                if match_bit != bit {
                    break;
                }
            }
        }
        while symbol < 0x100 {
            let bit = rc.decode_bit(&mut probs[symbol])?;
            symbol = (symbol << 1) | bit as usize;
        }
        Ok((symbol - 0x100) as u8)
    }

    fn decode_distance(&mut self, rc: &mut RangeDecoder<'_>, len: u32) -> Result<u32, LzmaError> {
        let len_state = (len - MATCH_LEN_MIN).min(3) as usize;
        let slot = rc.decode_bit_tree(&mut self.model.dist_slot[len_state], 6)?;
        if slot < 4 {
            return Ok(slot);
        }

        let num_direct = (slot >> 1) - 1;
        let mut dist = (2 | (slot & 1)) << num_direct;

        if slot < END_POS_MODEL_INDEX {
            // Shared adaptive bits, reverse order, offset by dist - slot.
            let base = (dist - slot) as usize;
            let mut node = 1usize;
            let mut low = 0u32;
            for i in 0..num_direct {
                let bit = rc.decode_bit(&mut self.model.dist_special[base + node])?;
                node = (node << 1) | bit as usize;
                low |= bit << i;
            }
            dist += low;
        } else {
            dist += rc.decode_direct_bits(num_direct - ALIGN_BITS)? << ALIGN_BITS;
            dist += rc.decode_bit_tree_reverse(&mut self.model.dist_align, ALIGN_BITS)?;
        }
        Ok(dist)
    }
}

fn decode_length(
    rc: &mut RangeDecoder<'_>,
    model: &mut LengthModel,
    pos_state: usize,
) -> Result<u32, LzmaError> {
    let len = if rc.decode_bit(&mut model.choice)? == 0 {
        rc.decode_bit_tree(&mut model.low[pos_state], LEN_LOW_BITS)?
    } else if rc.decode_bit(&mut model.choice2)? == 0 {
        (1 << LEN_LOW_BITS) + rc.decode_bit_tree(&mut model.mid[pos_state], LEN_MID_BITS)?
    } else {
        (1 << LEN_LOW_BITS)
            + (1 << LEN_MID_BITS)
            + rc.decode_bit_tree(&mut model.high, crate::model::LEN_HIGH_BITS)?
    };
    Ok(len + MATCH_LEN_MIN)
}

/// Decompress a `.lzma` (LZMA alone) file: a properties byte, a 4-byte LE
/// dictionary size, an 8-byte LE uncompressed size (`u64::MAX` = unknown,
/// terminated by the end marker), then the range-coded stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, LzmaError> {
    if data.len() < 13 {
        return Err(unarc_core::UnexpectedEnd.into());
    }
    let props = LzmaProperties::from_byte(data[0])?;
    let dict_size = u32::from_le_bytes([data[1], data[2], data[3], data[4]]).max(DICT_SIZE_MIN);
    let unpacked_size = u64::from_le_bytes([
        data[5], data[6], data[7], data[8], data[9], data[10], data[11], data[12],
    ]);
    let limit = if unpacked_size == u64::MAX {
        None
    } else {
        Some(unpacked_size)
    };
    decompress_raw(&data[13..], props, dict_size, limit)
}

/// Decompress a headerless LZMA stream with explicit parameters.
///
/// `unpacked_size` of `None` decodes until the end marker.
pub fn decompress_raw(
    data: &[u8],
    props: LzmaProperties,
    dict_size: u32,
    unpacked_size: Option<u64>,
) -> Result<Vec<u8>, LzmaError> {
    let mut rc = RangeDecoder::new(data)?;
    let mut decoder = LzmaDecoder::new(props);
    let mut out = Vec::new();
    let limit = match unpacked_size {
        Some(size) => OutputLimit::Exact(size),
        None => OutputLimit::UntilMarker,
    };
    decoder.decode_into(&mut rc, &mut out, 0, dict_size.max(DICT_SIZE_MIN), limit)?;
    Ok(out)
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
    fn test_lzma_alone_reference_stream() {
        // "hello world hello world", reference encoder, unknown size +
        // end marker.
        let data = decode_hex(
            "5d00008000ffffffffffffffff00341949ee8de917893a335ffd8144135427fffffae98000",
        );
        assert_eq!(decompress(&data).unwrap(), b"hello world hello world");
    }

    #[test]
    fn test_header_too_short() {
        assert!(matches!(
            decompress(&[0x5D, 0x00]),
            Err(LzmaError::Truncated(_))
        ));
    }

    #[test]
    fn test_bad_properties() {
        let mut data = vec![0xFF];
        data.extend_from_slice(&[0; 12]);
        data.extend_from_slice(&[0; 5]);
        assert!(matches!(
            decompress(&data),
            Err(LzmaError::BadProperties(0xFF))
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let data = decode_hex("5d00008000ffffffffffffffff00341949ee8de917");
        assert!(matches!(decompress(&data), Err(LzmaError::Truncated(_))));
    }
}

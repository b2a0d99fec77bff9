//! The LZMA probability context model.
//!
//! LZMA conditions every coded bit on context:
//!
//! - a 12-state machine remembering the recent packet kinds
//! - literals coded per previous byte (`lc` high bits) and position
//!   (`lp` low bits), with a matched mode after non-literal packets
//! - lengths via a choice/choice2 switch into low/mid/high bit trees
//! - distances via a 6-bit slot tree per length state, a shared block of
//!   adaptive bits for slots 4..13, and four adaptive alignment bits

use crate::LzmaError;
use crate::range::PROB_INIT;

/// Number of states in the packet-history state machine.
pub const NUM_STATES: usize = 12;

/// Upper bound on `1 << pb`.
pub const POS_STATES_MAX: usize = 1 << 4;

/// Shortest match LZMA can encode.
pub const MATCH_LEN_MIN: u32 = 2;

/// Bits in the low/mid/high length trees.
pub const LEN_LOW_BITS: u32 = 3;
/// Bits in the mid length tree.
pub const LEN_MID_BITS: u32 = 3;
/// Bits in the high length tree.
pub const LEN_HIGH_BITS: u32 = 8;

/// Number of distance slots.
pub const DIST_SLOTS: usize = 64;

/// First slot decoded with fixed-probability bits.
pub const END_POS_MODEL_INDEX: u32 = 14;

/// Distances below this use the shared adaptive pos-decoder block.
pub const FULL_DISTANCES: u32 = 1 << (END_POS_MODEL_INDEX / 2);

/// Adaptive low bits of large distances.
pub const ALIGN_BITS: u32 = 4;

/// The packet-history state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct State(u8);

impl State {
    /// Initial state.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Index into the per-state probability tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// States 0..7 follow literals; the matched-literal coder is used in
    /// the others.
    pub fn is_literal(self) -> bool {
        self.0 < 7
    }

    /// Transition after a literal.
    pub fn update_literal(&mut self) {
        self.0 = match self.0 {
            0..=3 => 0,
            4..=9 => self.0 - 3,
            _ => self.0 - 6,
        };
    }

    /// Transition after a match.
    pub fn update_match(&mut self) {
        self.0 = if self.0 < 7 { 7 } else { 10 };
    }

    /// Transition after a rep match.
    pub fn update_rep(&mut self) {
        self.0 = if self.0 < 7 { 8 } else { 11 };
    }

    /// Transition after a short rep.
    pub fn update_short_rep(&mut self) {
        self.0 = if self.0 < 7 { 9 } else { 11 };
    }
}

/// Decoded (lc, lp, pb) properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaProperties {
    /// Literal context bits (high bits of the previous byte), 0..=8.
    pub lc: u32,
    /// Literal position bits, 0..=4.
    pub lp: u32,
    /// Position bits for the match/rep switches, 0..=4.
    pub pb: u32,
}

impl LzmaProperties {
    /// Decode the packed properties byte `(pb * 5 + lp) * 9 + lc`.
    pub fn from_byte(byte: u8) -> Result<Self, LzmaError> {
        if byte >= 225 {
            return Err(LzmaError::BadProperties(byte));
        }
        let lc = byte as u32 % 9;
        let rest = byte as u32 / 9;
        let lp = rest % 5;
        let pb = rest / 5;
        Ok(Self { lc, lp, pb })
    }

    /// Decode an LZMA2 properties byte, which additionally requires
    /// `lc + lp <= 4`.
    pub fn from_byte_lzma2(byte: u8) -> Result<Self, LzmaError> {
        let props = Self::from_byte(byte)?;
        if props.lc + props.lp > 4 {
            return Err(LzmaError::BadProperties(byte));
        }
        Ok(props)
    }

    /// Number of literal coder contexts.
    pub fn num_literal_states(&self) -> usize {
        1 << (self.lc + self.lp)
    }

    /// Number of position states.
    pub fn num_pos_states(&self) -> usize {
        1 << self.pb
    }
}

impl Default for LzmaProperties {
    fn default() -> Self {
        Self { lc: 3, lp: 0, pb: 2 }
    }
}

/// Length coder: a two-level switch into three bit trees.
#[derive(Debug, Clone)]
pub struct LengthModel {
    /// Low lengths (0..8) vs the rest.
    pub choice: u16,
    /// Mid lengths (8..16) vs high (16..272).
    pub choice2: u16,
    /// Per-position-state low tree.
    pub low: Vec<[u16; 1 << LEN_LOW_BITS]>,
    /// Per-position-state mid tree.
    pub mid: Vec<[u16; 1 << LEN_MID_BITS]>,
    /// Shared high tree.
    pub high: [u16; 1 << LEN_HIGH_BITS],
}

impl LengthModel {
    fn new(num_pos_states: usize) -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: vec![[PROB_INIT; 1 << LEN_LOW_BITS]; num_pos_states],
            mid: vec![[PROB_INIT; 1 << LEN_MID_BITS]; num_pos_states],
            high: [PROB_INIT; 1 << LEN_HIGH_BITS],
        }
    }
}

/// Every adaptive probability the LZMA decoder carries.
#[derive(Debug, Clone)]
pub struct LzmaModel {
    /// Properties this model was built for.
    pub props: LzmaProperties,
    /// Literal-vs-match switch, per state and position state.
    pub is_match: [[u16; POS_STATES_MAX]; NUM_STATES],
    /// Match-vs-rep switch, per state.
    pub is_rep: [u16; NUM_STATES],
    /// rep0 vs other reps.
    pub is_rep0: [u16; NUM_STATES],
    /// rep1 vs rep2/rep3.
    pub is_rep1: [u16; NUM_STATES],
    /// rep2 vs rep3.
    pub is_rep2: [u16; NUM_STATES],
    /// Short rep switch, per state and position state.
    pub is_rep0_long: [[u16; POS_STATES_MAX]; NUM_STATES],
    /// Match length coder.
    pub match_len: LengthModel,
    /// Rep match length coder.
    pub rep_len: LengthModel,
    /// Literal coder contexts, 0x300 probabilities each (0x100 plain plus
    /// two matched-mode planes).
    pub literal: Vec<[u16; 0x300]>,
    /// Distance slot trees, one per length state.
    pub dist_slot: [[u16; DIST_SLOTS]; 4],
    /// Shared adaptive bits for slots 4..14, SDK layout: indexed by
    /// `dist - slot` plus the tree node, 1-based.
    pub dist_special: [u16; 115],
    /// Adaptive low bits of large distances.
    pub dist_align: [u16; 1 << ALIGN_BITS],
}

impl LzmaModel {
    /// Fresh model with every probability at 50%.
    pub fn new(props: LzmaProperties) -> Self {
        Self {
            props,
            is_match: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep0: [PROB_INIT; NUM_STATES],
            is_rep1: [PROB_INIT; NUM_STATES],
            is_rep2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            match_len: LengthModel::new(props.num_pos_states()),
            rep_len: LengthModel::new(props.num_pos_states()),
            literal: vec![[PROB_INIT; 0x300]; props.num_literal_states()],
            dist_slot: [[PROB_INIT; DIST_SLOTS]; 4],
            dist_special: [PROB_INIT; 115],
            dist_align: [PROB_INIT; 1 << ALIGN_BITS],
        }
    }

    /// Literal context index for a byte at `pos` preceded by `prev_byte`.
    pub fn literal_state(&self, pos: u64, prev_byte: u8) -> usize {
        let low = (pos & ((1 << self.props.lp) - 1)) as usize;
        let high = prev_byte as usize >> (8 - self.props.lc as usize);
        (low << self.props.lc) + high
    }
}

/*++

Licensed under the Apache-2.0 license.

File Name:

    lc.rs

Abstract:

    Life cycle state and transition counter encodings stored in the
    LIFE_CYCLE partition.

--*/

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display, EnumString};

pub const LC_STATE_WORDS: usize = 20;
pub const LC_TRANSITION_CNT_WORDS: usize = 24;
/// Words staged by the LCI: transition count first, then state.
pub const LC_PARTITION_WORDS: usize = LC_TRANSITION_CNT_WORDS + LC_STATE_WORDS;
pub const LC_TRANSITION_COUNT_MAX: u32 = 24;

const LC_STATE_BIT_WIDTH: u32 = 5;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, TryFromPrimitive, IntoPrimitive,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[repr(u32)]
pub enum LcState {
    Raw = 0,
    TestUnlocked0,
    TestLocked0,
    TestUnlocked1,
    TestLocked1,
    TestUnlocked2,
    TestLocked2,
    TestUnlocked3,
    TestLocked3,
    TestUnlocked4,
    TestLocked4,
    TestUnlocked5,
    TestLocked5,
    TestUnlocked6,
    TestLocked6,
    TestUnlocked7,
    Dev,
    Prod,
    ProdEnd,
    Rma,
    Scrap,
    PostTransition,
    Escalate,
    Invalid,
}

impl LcState {
    /// Encoding exchanged with the life cycle controller: the 5-bit index
    /// replicated six times.
    pub fn encode(self) -> u32 {
        let ix: u32 = self.into();
        (0..6).fold(0, |acc, n| acc | (ix << (LC_STATE_BIT_WIDTH * n)))
    }

    /// Inverse of [`LcState::encode`]; rejects values that are not a clean
    /// replication of a known index.
    pub fn decode(encoded: u32) -> Option<LcState> {
        let state = LcState::try_from(encoded & ((1 << LC_STATE_BIT_WIDTH) - 1)).ok()?;
        (state.encode() == encoded).then_some(state)
    }

    /// States that have a canonical OTP encoding.
    pub fn is_programmable(self) -> bool {
        u32::from(self) <= u32::from(LcState::Scrap)
    }
}

// from lc_ctrl_state_pkg.sv
const A: [u16; LC_STATE_WORDS] = [
    0b0110010010101110,
    0b0000011110110100,
    0b0011000111010010,
    0b0010111001001101,
    0b0100000111111000,
    0b1010110010000101,
    0b1001100110001100,
    0b0101001100001111,
    0b0111000101100000,
    0b0010110001100011,
    0b0110110100001000,
    0b1001001001001100,
    0b0111000001000000,
    0b1001001010111110,
    0b1001010011010010,
    0b0110001010001101,
    0b1011001000101000,
    0b0001111001110001,
    0b0010110110011011,
    0b0100110110001100,
];

const B: [u16; LC_STATE_WORDS] = [
    0b0111010111101110,
    0b0000111111111110,
    0b0111101111111110,
    0b0011111101101111,
    0b0101111111111100,
    0b1111110110011111,
    0b1111100110011111,
    0b1101101101101111,
    0b0111001101111111,
    0b0110110001101111,
    0b0110111110011110,
    0b1101001111011100,
    0b0111011101010010,
    0b1111001011111110,
    0b1011110111010011,
    0b0110111111001101,
    0b1011001011111011,
    0b1001111111110101,
    0b0011111111011111,
    0b1101110110111110,
];

const C: [u16; LC_TRANSITION_CNT_WORDS] = [
    0b0001010010011110,
    0b0101101011000100,
    0b0001111100100100,
    0b1100111010000101,
    0b0100001010011111,
    0b1001111000100010,
    0b0010011110000110,
    0b0010111101000110,
    0b0000001011011011,
    0b0111000011000110,
    0b0100001000010010,
    0b0100101111110001,
    0b1000100101000001,
    0b1000000000010001,
    0b0101110000000100,
    0b1100001000001001,
    0b0101001001101100,
    0b0100001001110100,
    0b1100000001100111,
    0b1010000001001010,
    0b1001001001010101,
    0b1001010000011011,
    0b1011101101100001,
    0b1101101000000111,
];

const D: [u16; LC_TRANSITION_CNT_WORDS] = [
    0b1011011011011111,
    0b1111101011110100,
    0b0001111110111111,
    0b1100111011101111,
    0b0101101110111111,
    0b1111111110100010,
    0b0111011111000110,
    0b1010111111000110,
    0b1010101111011011,
    0b1111111011001110,
    0b0111001010110110,
    0b0110101111110011,
    0b1011110101001111,
    0b1001100010110011,
    0b1111111010001101,
    0b1110011000011011,
    0b0111111001111110,
    0b1100101001110111,
    0b1100011101110111,
    0b1111011101101010,
    0b1101111011011101,
    0b1001111000111011,
    0b1011111101111111,
    0b1101111011100111,
];

/// Words `0..level` take the "set" pattern, the rest the "clear" pattern;
/// level 0 is the blank encoding.
fn encode_level<const N: usize>(level: usize, clear: &[u16; N], set: &[u16; N]) -> [u16; N] {
    let mut words = [0u16; N];
    if level > 0 {
        for (ix, word) in words.iter_mut().enumerate() {
            *word = if ix < level { set[ix] } else { clear[ix] };
        }
    }
    words
}

/// OTP words of the LC_STATE field for a programmable state.
pub fn state_words(state: LcState) -> Option<[u16; LC_STATE_WORDS]> {
    state
        .is_programmable()
        .then(|| encode_level(u32::from(state) as usize, &A, &B))
}

/// OTP words of the LC_TRANSITION_CNT field.
pub fn transition_count_words(count: u32) -> Option<[u16; LC_TRANSITION_CNT_WORDS]> {
    (count <= LC_TRANSITION_COUNT_MAX).then(|| encode_level(count as usize, &C, &D))
}

/// Matches raw partition words against the canonical encodings. Unknown
/// patterns decode as `Invalid` with a count one past the maximum.
pub fn decode_lc_words(state: &[u16], count: &[u16]) -> (LcState, u32) {
    let lc_state = (0..=u32::from(LcState::Scrap))
        .filter_map(|ix| LcState::try_from(ix).ok())
        .find(|s| state_words(*s).is_some_and(|w| w[..] == *state))
        .unwrap_or(LcState::Invalid);
    let tcount = (0..=LC_TRANSITION_COUNT_MAX)
        .find(|n| transition_count_words(*n).is_some_and(|w| w[..] == *count))
        .unwrap_or(LC_TRANSITION_COUNT_MAX + 1);
    (lc_state, tcount)
}

#[cfg(test)]
mod test {
    use super::*;

    fn to_bytes(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_encode_state() {
        assert_eq!(LcState::Raw.encode(), 0);
        assert_eq!(LcState::TestUnlocked0.encode(), 0x0210_8421);
        assert_eq!(LcState::decode(LcState::Prod.encode()), Some(LcState::Prod));
        assert_eq!(LcState::decode(0x0210_8422), None);
        assert_eq!(LcState::decode(LcState::Invalid.encode()), Some(LcState::Invalid));
        assert_eq!("dev".parse::<LcState>().unwrap(), LcState::Dev);
    }

    #[test]
    fn test_known_memory_images() {
        let count = to_bytes(&transition_count_words(1).unwrap());
        assert_eq!(&count[..4], &[0xdf, 0xb6, 0xc4, 0x5a]);
        let state = to_bytes(&state_words(LcState::TestUnlocked0).unwrap());
        assert_eq!(&state[..4], &[0xee, 0x75, 0xb4, 0x07]);
        let state = to_bytes(&state_words(LcState::Dev).unwrap());
        assert_eq!(&state[..4], &[0xee, 0x75, 0xfe, 0x0f]);
        assert!(state_words(LcState::Escalate).is_none());
        assert!(transition_count_words(25).is_none());
    }

    #[test]
    fn test_decode() {
        let state = state_words(LcState::Rma).unwrap();
        let count = transition_count_words(7).unwrap();
        assert_eq!(decode_lc_words(&state, &count), (LcState::Rma, 7));
        assert_eq!(
            decode_lc_words(&[0; LC_STATE_WORDS], &[0; LC_TRANSITION_CNT_WORDS]),
            (LcState::Raw, 0)
        );
        let mut bad = state;
        bad[3] ^= 1;
        assert_eq!(decode_lc_words(&bad, &count).0, LcState::Invalid);
        let mut bad = count;
        bad[0] ^= 0x8000;
        assert_eq!(decode_lc_words(&state, &bad).1, 25);
    }
}

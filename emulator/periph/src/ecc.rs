/*++

Licensed under the Apache-2.0 license.

File Name:

    ecc.rs

Abstract:

    (22,16) SECDED code protecting every 16-bit OTP granule.

--*/

/// Number of ECC bits stored per 16-bit granule.
pub const ECC_BITS: u16 = 6;

/// Size in bytes of the data granule covered by one ECC byte.
pub const ECC_GRANULE: u16 = 2;

const PARITY_MASKS: [u32; 6] = [0x00ad5b, 0x00366d, 0x00c78e, 0x0007f0, 0x00f800, 0x1fffff];

const SYNDROME_MASKS: [u32; 6] = [0x01ad5b, 0x02366d, 0x04c78e, 0x0807f0, 0x10f800, 0x3fffff];

/// Syndrome value pointing at each of the 16 data bits.
const SYNDROME_TO_BIT: [u32; 16] = [
    0x23, 0x25, 0x26, 0x27, 0x29, 0x2a, 0x2b, 0x2c, 0x2d, 0x2e, 0x2f, 0x31, 0x32, 0x33, 0x34, 0x35,
];

/// Outcome of an ECC check, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum EccStatus {
    #[default]
    Ok,
    Corrected,
    Uncorrectable,
}

fn parity(val: u32) -> u32 {
    val.count_ones() & 1
}

/// Computes the 6 ECC bits of a 16-bit granule.
pub fn ecc_u16(data: u16) -> u8 {
    let mut word = data as u32;
    for (bit, mask) in PARITY_MASKS.iter().enumerate() {
        word |= parity(word & mask) << (16 + bit);
    }
    (word >> 16) as u8
}

/// ECC of a 32-bit word: low granule in the low byte, high granule in the high byte.
pub fn ecc_u32(data: u32) -> u16 {
    let lo = ecc_u16(data as u16) as u16;
    let hi = ecc_u16((data >> 16) as u16) as u16;
    (hi << 8) | lo
}

/// ECC of a 64-bit value: one 32-bit word of ECC per 32-bit half.
pub fn ecc_u64(data: u64) -> u32 {
    let lo = ecc_u32(data as u32) as u32;
    let hi = ecc_u32((data >> 32) as u32) as u32;
    (hi << 16) | lo
}

/// Checks a 16-bit granule against its ECC byte, correcting single-bit errors.
pub fn verify_u16(data: u16, ecc: u8) -> (u16, EccStatus) {
    let word = (data as u32) | ((ecc as u32) << 16);
    let syndrome = SYNDROME_MASKS
        .iter()
        .enumerate()
        .fold(0u32, |acc, (bit, mask)| acc | (parity(word & mask) << bit));

    if syndrome == 0 {
        return (data, EccStatus::Ok);
    }
    if syndrome & 0x20 == 0 {
        return (data, EccStatus::Uncorrectable);
    }
    // single error: either a data bit or one of the parity bits
    let fixed = match SYNDROME_TO_BIT.iter().position(|s| *s == syndrome) {
        Some(bit) => data ^ (1 << bit),
        None => data,
    };
    (fixed, EccStatus::Corrected)
}

/// Checks a 32-bit word against its 16-bit ECC.
pub fn verify_u32(data: u32, ecc: u16) -> (u32, EccStatus) {
    let (lo, lo_status) = verify_u16(data as u16, ecc as u8);
    let (hi, hi_status) = verify_u16((data >> 16) as u16, (ecc >> 8) as u8);
    (((hi as u32) << 16) | lo as u32, lo_status.max(hi_status))
}

/// Checks a 64-bit value against its 32-bit ECC.
pub fn verify_u64(data: u64, ecc: u32) -> (u64, EccStatus) {
    let (lo, lo_status) = verify_u32(data as u32, ecc as u16);
    let (hi, hi_status) = verify_u32((data >> 32) as u32, (ecc >> 16) as u16);
    (((hi as u64) << 32) | lo as u64, lo_status.max(hi_status))
}

#[cfg(test)]
mod test {
    use super::*;

    const WORDS: [u32; 6] = [0, 0xffff_ffff, 0x1234_5678, 0xdead_beef, 0x8000_0001, 0x5a5a_a5a5];

    #[test]
    fn test_clean_word() {
        for word in WORDS {
            assert_eq!(verify_u32(word, ecc_u32(word)), (word, EccStatus::Ok));
        }
        assert_eq!(ecc_u16(0), 0);
    }

    #[test]
    fn test_single_bit_corrected() {
        for word in WORDS {
            let ecc = ecc_u32(word);
            for bit in 0..32 {
                let (fixed, status) = verify_u32(word ^ (1 << bit), ecc);
                assert_eq!(status, EccStatus::Corrected, "bit {bit} of {word:#x}");
                assert_eq!(fixed, word);
            }
            for bit in 0..6 {
                let (fixed, status) = verify_u32(word, ecc ^ (1 << bit));
                assert_eq!(status, EccStatus::Corrected);
                assert_eq!(fixed, word);
            }
        }
    }

    #[test]
    fn test_double_bit_detected() {
        for word in WORDS {
            let ecc = ecc_u32(word);
            for (a, b) in [(0, 1), (3, 11), (7, 15), (2, 9)] {
                let (_, status) = verify_u32(word ^ (1 << a) ^ (1 << b), ecc);
                assert_eq!(status, EccStatus::Uncorrectable);
            }
        }
    }

    #[test]
    fn test_u64() {
        let value = 0x0123_4567_89ab_cdefu64;
        let ecc = ecc_u64(value);
        assert_eq!(ecc as u16, ecc_u32(value as u32));
        assert_eq!((ecc >> 16) as u16, ecc_u32((value >> 32) as u32));
        assert_eq!(verify_u64(value ^ (1 << 40), ecc), (value, EccStatus::Corrected));
    }
}

/*++

Licensed under the Apache-2.0 license.

File Name:

    otp_digest.rs

Abstract:

    PRESENT block cipher and the OTP partition digest built on it.

--*/

const ROUNDS: usize = 32;

/// Computes the digest of a partition: a Merkle-Damgard chain with a
/// Davies-Meyer compression function keyed by 128-bit data blocks, closed by
/// one more round keyed by the finalization constant.
///
/// A trailing 64-bit block is duplicated to fill the last 128-bit key.
pub fn otp_digest(data: &[u8], iv: u64, cnst: u128) -> u64 {
    let blocks = data.chunks(8).map(|chunk| {
        let mut bytes = [0u8; 8];
        bytes[..chunk.len()].copy_from_slice(chunk);
        u64::from_le_bytes(bytes)
    });
    otp_digest_iter(blocks, iv, cnst)
}

/// Same as [`otp_digest`] over little-endian 64-bit blocks.
pub fn otp_digest_iter(blocks: impl Iterator<Item = u64>, iv: u64, cnst: u128) -> u64 {
    let mut state = iv;
    let mut pending: Option<u64> = None;

    for block in blocks {
        match pending.take() {
            None => pending = Some(block),
            Some(b0) => {
                let key = b0 as u128 | ((block as u128) << 64);
                state ^= present_encrypt(state, key);
            }
        }
    }
    if let Some(last) = pending {
        let key = last as u128 | ((last as u128) << 64);
        state ^= present_encrypt(state, key);
    }

    state ^ present_encrypt(state, cnst)
}

/// Encrypts one 64-bit block with a little-endian 128-bit key.
pub fn present_encrypt(block: u64, key: u128) -> u64 {
    Present::new_128(&key.to_le_bytes()).encrypt_block(block)
}

/// PRESENT-128 block cipher.
pub struct Present {
    round_keys: [u64; ROUNDS],
}

impl Present {
    pub fn new_128(key: &[u8; 16]) -> Present {
        Present {
            round_keys: generate_round_keys_128(key),
        }
    }

    pub fn encrypt_block(&self, block: u64) -> u64 {
        let mut state = block ^ self.round_keys[0];
        for round_key in &self.round_keys[1..] {
            state = s_box_layer(state);
            state = p_box_layer(state);
            state ^= round_key;
        }
        state
    }

    #[cfg(test)]
    pub fn decrypt_block(&self, block: u64) -> u64 {
        let mut state = block;
        for round_key in self.round_keys[1..].iter().rev() {
            state ^= round_key;
            state = p_box_layer_inv(state);
            state = s_box_layer_inv(state);
        }
        state ^ self.round_keys[0]
    }
}

const S_BOX: [u8; 16] = [
    0x0c, 0x05, 0x06, 0x0b, 0x09, 0x00, 0x0a, 0x0d, 0x03, 0x0e, 0x0f, 0x08, 0x04, 0x07, 0x01, 0x02,
];

#[cfg(test)]
const S_BOX_INV: [u8; 16] = [
    0x05, 0x0e, 0x0f, 0x08, 0x0c, 0x01, 0x02, 0x0d, 0x0b, 0x04, 0x06, 0x03, 0x00, 0x07, 0x09, 0x0a,
];

fn generate_round_keys_128(key: &[u8; 16]) -> [u64; ROUNDS] {
    let mut round_keys = [0u64; ROUNDS];
    let mut key = u128::from_le_bytes(*key);
    for (i, round_key) in round_keys.iter_mut().enumerate() {
        *round_key = (key >> 64) as u64;
        key = key.rotate_left(61);
        key = ((S_BOX[((key >> 124) & 0xf) as usize] as u128) << 124)
            | ((S_BOX[((key >> 120) & 0xf) as usize] as u128) << 120)
            | (key & (!0u128 >> 8));
        key ^= ((i + 1) as u128) << 62;
    }
    round_keys
}

fn s_box_layer(state: u64) -> u64 {
    (0..64)
        .step_by(4)
        .fold(0, |out, i| out | (S_BOX[((state >> i) & 0xf) as usize] as u64) << i)
}

#[cfg(test)]
fn s_box_layer_inv(state: u64) -> u64 {
    (0..64)
        .step_by(4)
        .fold(0, |out, i| out | (S_BOX_INV[((state >> i) & 0xf) as usize] as u64) << i)
}

/// Bit `i` moves to `16 * i mod 63` (bit 63 stays).
fn p_box_layer(state: u64) -> u64 {
    (0..64).fold(0, |out, i| {
        let dst = if i == 63 { 63 } else { (i * 16) % 63 };
        out | ((state >> i) & 1) << dst
    })
}

#[cfg(test)]
fn p_box_layer_inv(state: u64) -> u64 {
    (0..64).fold(0, |out, i| {
        let src = if i == 63 { 63 } else { (i * 16) % 63 };
        out | ((state >> src) & 1) << i
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_enc_128() {
        let cipher = Present::new_128(&[0; 16]);
        assert_eq!(cipher.encrypt_block(0), 0x96db702a2e6900af);
        assert_eq!(cipher.encrypt_block(!0), 0x3c6019e5e5edd563);
        let cipher = Present::new_128(&[0xff; 16]);
        assert_eq!(cipher.encrypt_block(0), 0x13238c710272a5d8);
        assert_eq!(cipher.encrypt_block(!0), 0x628d9fbd4218e5b4);
    }

    #[test]
    fn test_dec_128() {
        let cipher = Present::new_128(&[0xff; 16]);
        assert_eq!(cipher.decrypt_block(0x628d9fbd4218e5b4), !0);
        let cipher = Present::new_128(&[0x5a; 16]);
        assert_eq!(cipher.decrypt_block(cipher.encrypt_block(0x1122334455667788)), 0x1122334455667788);
    }

    #[test]
    fn test_digest_odd_block_duplicated() {
        let iv = 0x1234567890abcdef;
        let cnst = 0xfedcba0987654321fedcba0987654321u128;
        let data: Vec<u8> = (0..24).collect();
        let mut padded = data.clone();
        padded.extend_from_slice(&data[16..24]);
        assert_eq!(otp_digest(&data, iv, cnst), otp_digest(&padded, iv, cnst));
    }

    #[test]
    fn test_digest_manual_chain() {
        let iv = 0x4d5a89aa9109294a;
        let cnst = 0x0102030405060708090a0b0c0d0e0f10u128;
        let data: Vec<u8> = (0..16).map(|x| x * 3).collect();
        let key = u128::from_le_bytes(data.clone().try_into().unwrap());
        let mut state = iv ^ present_encrypt(iv, key);
        state ^= present_encrypt(state, cnst);
        assert_eq!(otp_digest(&data, iv, cnst), state);
        assert_ne!(otp_digest(&data, iv, cnst), otp_digest(&data, iv + 1, cnst));
    }
}

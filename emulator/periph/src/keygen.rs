/*++

Licensed under the Apache-2.0 license.

File Name:

    keygen.rs

Abstract:

    Entropy buffering and scrambling key derivation for memory controllers.

--*/

use crate::otp_digest::Present;
use caliptra_emu_bus::{ActionHandle, Clock, Timer};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::VecDeque;

/// Entropy words held for key derivation: two 128-bit PRESENT keys per seed
/// round pair plus a nonce, with headroom for a second request.
pub const ENTROPY_FIFO_WORDS: usize = 58;

const SRAM_NONCE_WORDS: usize = 4;
const SRAM_KEY_ROUNDS: usize = 2;
const SRAM_ENTROPY_WORDS: usize = SRAM_NONCE_WORDS * (1 + SRAM_KEY_ROUNDS);

const KEY_DERIVATION_IV: u64 = 0x4d5a89aa9109294a;
const KEY_DERIVATION_CONST: [u8; 16] = [
    0xe0, 0x48, 0xb6, 0x57, 0x39, 0x6b, 0x4b, 0x83, 0x27, 0x71, 0x95, 0xfc, 0x47, 0x1e, 0x4b, 0x26,
];
const SRAM_DEFAULT_KEY: [u8; 16] = [
    0xce, 0xbe, 0xb9, 0x6f, 0xfe, 0x0e, 0xce, 0xd7, 0x95, 0xf8, 0xb2, 0xcf, 0xe2, 0x3c, 0x1e, 0x51,
];
const SRAM_DEFAULT_NONCE: [u8; 16] = [
    0x9e, 0x4f, 0xa0, 0x80, 0x47, 0xa6, 0xbc, 0xfb, 0x81, 0x1b, 0x04, 0xf0, 0xa4, 0x79, 0x00, 0x6e,
];

/// Source of 32-bit entropy words, typically an EDN endpoint.
pub trait EntropySource {
    /// Returns a word if one is available right away.
    fn request_entropy(&mut self) -> Option<u32>;
}

/// Entropy source drawing from a seedable PRNG.
pub struct RngEntropySource {
    rng: StdRng,
}

impl RngEntropySource {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: new_rng(seed),
        }
    }
}

impl EntropySource for RngEntropySource {
    fn request_entropy(&mut self) -> Option<u32> {
        Some(self.rng.next_u32())
    }
}

fn new_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtpKeyType {
    Sram,
    Otbn,
    FlashData,
    FlashAddr,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OtpKey {
    pub seed: [u8; 16],
    pub nonce: [u8; 16],
    /// The seed was derived from a committed key seed partition.
    pub seed_valid: bool,
}

pub(crate) struct KeyGen {
    timer: Timer,
    fifo: VecDeque<u32>,
    edn_sched: bool,
    source: Option<Box<dyn EntropySource>>,
    prng: StdRng,
    request: Option<ActionHandle>,
}

impl KeyGen {
    pub fn new(clock: &Clock, prng_seed: Option<u64>) -> Self {
        Self {
            timer: Timer::new(clock),
            fifo: VecDeque::with_capacity(ENTROPY_FIFO_WORDS),
            edn_sched: false,
            source: None,
            prng: new_rng(prng_seed),
            request: None,
        }
    }

    pub fn set_source(&mut self, source: Box<dyn EntropySource>) {
        self.source = Some(source);
        self.schedule_refill();
    }

    pub fn reset(&mut self) {
        if let Some(handle) = self.request.take() {
            self.timer.cancel(handle);
        }
        self.edn_sched = false;
        self.schedule_refill();
    }

    pub fn available(&self) -> usize {
        self.fifo.len()
    }

    fn is_full(&self) -> bool {
        self.fifo.len() >= ENTROPY_FIFO_WORDS
    }

    fn schedule_refill(&mut self) {
        if self.request.is_none() {
            self.request = Some(self.timer.schedule_poll_in(1));
        }
    }

    pub fn poll(&mut self) {
        if self.timer.fired(&mut self.request) {
            self.request_entropy();
        }
    }

    fn request_entropy(&mut self) {
        if self.edn_sched || self.is_full() {
            return;
        }
        let Some(source) = self.source.as_mut() else {
            return;
        };
        self.edn_sched = true;
        match source.request_entropy() {
            Some(word) => self.push_entropy(word),
            None => {
                // refill resumes on the next key request
                log::debug!("otp: entropy source stalled");
                self.edn_sched = false;
            }
        }
    }

    /// Delivers an entropy word requested from the source.
    pub fn push_entropy(&mut self, word: u32) {
        self.edn_sched = false;
        if !self.is_full() {
            self.fifo.push_back(word);
        }
        log::trace!("otp: entropy fifo {}/{}", self.fifo.len(), ENTROPY_FIFO_WORDS);
        if !self.is_full() {
            self.schedule_refill();
        }
    }

    fn fake_entropy(&mut self, count: usize) {
        for _ in 0..count {
            if self.is_full() {
                break;
            }
            self.fifo.push_back(self.prng.next_u32());
        }
    }

    fn pop_block(&mut self) -> [u8; 16] {
        let mut block = [0u8; 16];
        for chunk in block.chunks_exact_mut(4) {
            let word = self.fifo.pop_front().unwrap_or_default();
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        block
    }

    /// Derives the SRAM scrambling key from the SRAM key seed and fresh
    /// entropy.
    pub fn sram_key(&mut self, key_seed: &[u8; 16], seed_valid: bool) -> OtpKey {
        if self.fifo.len() < SRAM_ENTROPY_WORDS {
            let count = SRAM_ENTROPY_WORDS - self.fifo.len();
            log::warn!("otp: not enough entropy for SRAM key, faking {count} words");
            self.fake_entropy(count);
        }

        let nonce = self.pop_block();
        let seed_cipher = Present::new_128(key_seed);
        let const_cipher = Present::new_128(&KEY_DERIVATION_CONST);
        let mut seed = [0u8; 16];
        for round in seed.chunks_exact_mut(8) {
            let mut data = seed_cipher.encrypt_block(KEY_DERIVATION_IV);
            data = Present::new_128(&self.pop_block()).encrypt_block(data);
            data = const_cipher.encrypt_block(data);
            round.copy_from_slice(&data.to_le_bytes());
        }

        self.schedule_refill();
        OtpKey {
            seed,
            nonce,
            seed_valid,
        }
    }

    /// Key handed out before any derivation took place.
    pub fn default_sram_key() -> OtpKey {
        OtpKey {
            seed: SRAM_DEFAULT_KEY,
            nonce: SRAM_DEFAULT_NONCE,
            seed_valid: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Counter(u32);

    impl EntropySource for Counter {
        fn request_entropy(&mut self) -> Option<u32> {
            self.0 += 1;
            Some(self.0)
        }
    }

    struct Stalled;

    impl EntropySource for Stalled {
        fn request_entropy(&mut self) -> Option<u32> {
            None
        }
    }

    struct Bench(KeyGen);

    impl caliptra_emu_bus::Bus for Bench {
        fn read(
            &mut self,
            _: caliptra_emu_types::RvSize,
            _: caliptra_emu_types::RvAddr,
        ) -> Result<caliptra_emu_types::RvData, caliptra_emu_bus::BusError> {
            Ok(0)
        }

        fn write(
            &mut self,
            _: caliptra_emu_types::RvSize,
            _: caliptra_emu_types::RvAddr,
            _: caliptra_emu_types::RvData,
        ) -> Result<(), caliptra_emu_bus::BusError> {
            Ok(())
        }

        fn poll(&mut self) {
            self.0.poll();
        }
    }

    #[test]
    fn test_fifo_fills() {
        let clock = Clock::new();
        let mut bench = Bench(KeyGen::new(&clock, Some(1)));
        bench.0.set_source(Box::new(Counter(0)));
        for _ in 0..100 {
            clock.increment_and_process_timer_actions(1, &mut bench);
        }
        assert_eq!(bench.0.available(), ENTROPY_FIFO_WORDS);
        assert_eq!(bench.0.fifo.front(), Some(&1));

        let key = bench.0.sram_key(&[0; 16], true);
        assert!(key.seed_valid);
        assert_eq!(&key.nonce[..8], &[1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(bench.0.available(), ENTROPY_FIFO_WORDS - SRAM_ENTROPY_WORDS);
        for _ in 0..100 {
            clock.increment_and_process_timer_actions(1, &mut bench);
        }
        assert_eq!(bench.0.available(), ENTROPY_FIFO_WORDS);
    }

    #[test]
    fn test_stalled_source() {
        let clock = Clock::new();
        let mut bench = Bench(KeyGen::new(&clock, Some(7)));
        bench.0.set_source(Box::new(Stalled));
        for _ in 0..10 {
            clock.increment_and_process_timer_actions(1, &mut bench);
        }
        assert_eq!(bench.0.available(), 0);

        let key = bench.0.sram_key(&[0x11; 16], false);
        assert!(!key.seed_valid);
        assert_ne!(key, KeyGen::default_sram_key());
        assert_eq!(bench.0.available(), 0);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let clock = Clock::new();
        let mut a = KeyGen::new(&clock, Some(42));
        let mut b = KeyGen::new(&clock, Some(42));
        assert_eq!(a.sram_key(&[3; 16], true), b.sram_key(&[3; 16], true));
        let mut c = KeyGen::new(&clock, Some(42));
        assert_ne!(a.sram_key(&[3; 16], true), c.sram_key(&[4; 16], true));
    }
}

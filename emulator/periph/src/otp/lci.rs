/*++

Licensed under the Apache-2.0 license.

File Name:

    lci.rs

Abstract:

    Life cycle interface: programs life cycle state and transition count
    transitions requested by the life cycle controller, one 16-bit word at
    a time.

--*/

use super::Otp;
use crate::ecc;
use crate::error::{LcProgramError, OtpErrorCode};
use crate::lc::{
    self, LcState, LC_PARTITION_WORDS, LC_TRANSITION_CNT_WORDS, LC_TRANSITION_COUNT_MAX,
};
use crate::partition::PartitionId;
use crate::regs::Status;
use caliptra_emu_bus::ActionHandle;
use strum_macros::Display;
#[allow(unused_imports)] // Rust compiler doesn't like these
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

const LCI_PROG_DELAY_US: u64 = 500;

/// Acknowledgment of a life cycle programming request.
pub type LcProgramAck = Box<dyn FnOnce(bool)>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LciState {
    #[default]
    Reset,
    Idle,
    Write,
    WriteWait,
    Error,
}

pub(super) struct Lci {
    pub(super) state: LciState,
    /// Sticky error of the request in flight.
    error: OtpErrorCode,
    /// Transition count words followed by the state words.
    data: [u16; LC_PARTITION_WORDS],
    hpos: usize,
    request: Option<(LcState, u32)>,
    ack: Option<LcProgramAck>,
    pub(super) timer: Option<ActionHandle>,
}

impl Default for Lci {
    fn default() -> Self {
        Self {
            state: LciState::Reset,
            error: OtpErrorCode::NoError,
            data: [0; LC_PARTITION_WORDS],
            hpos: 0,
            request: None,
            ack: None,
            timer: None,
        }
    }
}

impl Lci {
    pub(super) fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Otp {
    pub fn lci_state(&self) -> LciState {
        self.lci.state
    }

    pub(super) fn lci_change_state(&mut self, state: LciState) {
        log::trace!("otp: LCI {} -> {}", self.lci.state, state);
        self.lci.state = state;
    }

    /// Requests programming of the life cycle partition. `lc_state` is the
    /// encoding exchanged with the life cycle controller; `ack` is called
    /// once with the outcome.
    pub fn program_req(
        &mut self,
        lc_state: u32,
        transition_count: u32,
        ack: impl FnOnce(bool) + 'static,
    ) -> Result<(), LcProgramError> {
        // a staged request owns the LCI until its ack fires
        let pending = self.lci.ack.is_some();
        if pending || matches!(self.lci.state, LciState::Write | LciState::WriteWait) {
            log::error!("otp: life cycle programming already in progress");
            return Err(LcProgramError::Busy);
        }
        if transition_count > LC_TRANSITION_COUNT_MAX {
            return Err(LcProgramError::InvalidTransitionCount(transition_count));
        }
        let state = LcState::decode(lc_state)
            .filter(|state| state.is_programmable())
            .ok_or(LcProgramError::InvalidState(lc_state))?;
        let count_words = lc::transition_count_words(transition_count)
            .ok_or(LcProgramError::InvalidTransitionCount(transition_count))?;
        let state_words =
            lc::state_words(state).ok_or(LcProgramError::InvalidState(lc_state))?;

        let (count, states) = self.lci.data.split_at_mut(LC_TRANSITION_CNT_WORDS);
        count.copy_from_slice(&count_words);
        states.copy_from_slice(&state_words);
        self.lci.hpos = 0;
        self.lci.error = OtpErrorCode::NoError;
        self.lci.request = Some((state, transition_count));
        log::info!("otp: programming life cycle {state} count {transition_count}");

        self.lci.ack = Some(Box::new(ack));
        self.lci.timer = Some(self.timer.schedule_poll_in(1));
        Ok(())
    }

    pub(super) fn lci_write_word(&mut self) {
        if matches!(self.lci.state, LciState::Error | LciState::Reset) {
            self.lci.error = OtpErrorCode::FsmState;
            self.lci_complete(false);
            return;
        }
        if !self.image.is_writable() {
            log::error!("otp: OTP image is not writable");
            self.lci.error = OtpErrorCode::Macro;
            self.lci_change_state(LciState::Error);
            self.lci_complete(false);
            return;
        }
        if self.lci.hpos >= LC_PARTITION_WORDS {
            if self.lci.error == OtpErrorCode::NoError {
                self.lci_change_state(LciState::Idle);
                self.lci_complete(true);
            } else {
                self.lci_change_state(LciState::Error);
                self.lci_complete(false);
            }
            return;
        }

        self.lci_change_state(LciState::Write);
        let hpos = self.lci.hpos;
        let offset = PartitionId::LifeCycle.desc().offset + hpos * 2;
        let data = self.image.data_mut();
        let current = u16::from_le_bytes([data[offset], data[offset + 1]]);
        let value = self.lci.data[hpos];
        if current & !value != 0 {
            log::warn!("otp: cannot clear life cycle bits at {offset:#x}");
            self.lci.error = OtpErrorCode::MacroWriteBlank;
        }
        let merged = current | value;
        data[offset..offset + 2].copy_from_slice(&merged.to_le_bytes());

        if self.ecc_enabled {
            let ecc_ix = offset / 2;
            let current = self.image.ecc()[ecc_ix];
            let ecc = ecc::ecc_u16(merged);
            if current & !ecc != 0 {
                log::warn!("otp: cannot clear life cycle ECC bits at {offset:#x}");
                self.lci.error = OtpErrorCode::MacroWriteBlank;
            }
            self.image.ecc_mut()[ecc_ix] = current | ecc;
        }

        self.lci.hpos += 1;
        self.lci_change_state(LciState::WriteWait);
        let ticks = self.delay_ticks(LCI_PROG_DELAY_US);
        self.lci.timer = Some(self.timer.schedule_poll_in(ticks));
    }

    fn lci_complete(&mut self, mut success: bool) {
        if self.lci.hpos != 0 {
            let desc = PartitionId::LifeCycle.desc();
            if let Err(err) = self.image.persist(desc.offset, desc.size) {
                log::error!("otp: cannot persist life cycle partition: {err}");
                if self.lci.error == OtpErrorCode::NoError {
                    self.lci.error = OtpErrorCode::Macro;
                    self.lci_change_state(LciState::Error);
                }
                success = false;
            }
        }
        self.lci.hpos = 0;

        let request = self.lci.request.take();
        if success {
            if let Some((state, count)) = request {
                self.lc_state = state;
                self.lc_tcount = count;
            }
        } else if self.lci.error != OtpErrorCode::NoError {
            self.set_error(PartitionId::LifeCycle.index(), self.lci.error);
            self.status.reg.modify(Status::LCI_ERROR::SET);
        }
        log::info!("otp: life cycle programming done, success {success}");

        if let Some(ack) = self.lci.ack.take() {
            ack(success);
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::test::{blank_image_file, boot, run};
    use super::*;
    use crate::image::OtpImage;
    use crate::partition::fields;
    use crate::regs;
    use crate::LcBroadcast;
    use caliptra_emu_bus::{Bus, Clock};
    use caliptra_emu_types::RvSize;
    use std::cell::Cell;
    use std::rc::Rc;

    type Outcome = Rc<Cell<Option<bool>>>;

    fn recorder() -> (Outcome, impl FnOnce(bool) + 'static) {
        let outcome: Outcome = Rc::new(Cell::new(None));
        let sink = outcome.clone();
        (outcome, move |ok| sink.set(Some(ok)))
    }

    fn run_until(clock: &Clock, otp: &mut Otp, outcome: &Outcome) {
        for _ in 0..(LC_PARTITION_WORDS as u64 + 2) * LCI_PROG_DELAY_US {
            if outcome.get().is_some() {
                return;
            }
            run(clock, otp, 1);
        }
        panic!("life cycle programming did not complete");
    }

    fn stored_words(image: &OtpImage) -> Vec<u16> {
        let desc = PartitionId::LifeCycle.desc();
        image.data()[desc.offset..desc.end()]
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_program_life_cycle() {
        let file = blank_image_file();
        let clock = Clock::new();
        let mut otp = boot(&clock, file.path());

        let (first, ack) = recorder();
        otp.program_req(LcState::TestUnlocked0.encode(), 1, ack)
            .unwrap();
        run(&clock, &mut otp, 1);
        assert_eq!(otp.lci_state(), LciState::WriteWait);

        let (second, ack) = recorder();
        assert_eq!(
            otp.program_req(LcState::Dev.encode(), 2, ack),
            Err(LcProgramError::Busy)
        );

        run_until(&clock, &mut otp, &first);
        assert_eq!(first.get(), Some(true));
        assert_eq!(second.get(), None);
        assert_eq!(otp.lci_state(), LciState::Idle);
        assert_eq!(otp.get_lc_info().state, LcState::TestUnlocked0);
        assert_eq!(otp.get_lc_info().transition_count, 1);
        assert_eq!(
            otp.err_code(PartitionId::LifeCycle.index()),
            OtpErrorCode::NoError
        );

        let image = OtpImage::load(file.path(), true).unwrap();
        let words = stored_words(&image);
        let (count, state) = words.split_at(LC_TRANSITION_CNT_WORDS);
        assert_eq!(
            lc::decode_lc_words(state, count),
            (LcState::TestUnlocked0, 1)
        );
        assert_eq!(
            &image.data()[fields::LC_TRANSITION_CNT..fields::LC_TRANSITION_CNT + 4],
            &[0xdf, 0xb6, 0xc4, 0x5a]
        );
        let ecc_ix = fields::LC_STATE / 2;
        assert_eq!(image.ecc()[ecc_ix], ecc::ecc_u16(words[LC_TRANSITION_CNT_WORDS]));

        // the decoded state survives a power cycle
        let clock = Clock::new();
        let otp = boot(&clock, file.path());
        assert_eq!(otp.get_lc_info().state, LcState::TestUnlocked0);
    }

    #[test]
    fn test_back_to_back_requests() {
        let file = blank_image_file();
        let clock = Clock::new();
        let mut otp = boot(&clock, file.path());

        let (first, ack) = recorder();
        otp.program_req(LcState::TestUnlocked0.encode(), 1, ack)
            .unwrap();
        assert_eq!(otp.lci_state(), LciState::Idle);
        let (second, ack) = recorder();
        assert_eq!(
            otp.program_req(LcState::Dev.encode(), 2, ack),
            Err(LcProgramError::Busy)
        );

        run_until(&clock, &mut otp, &first);
        assert_eq!(first.get(), Some(true));
        assert_eq!(second.get(), None);
        assert_eq!(otp.get_lc_info().state, LcState::TestUnlocked0);
        assert_eq!(otp.get_lc_info().transition_count, 1);

        let words = stored_words(otp.image());
        let (count, state) = words.split_at(LC_TRANSITION_CNT_WORDS);
        assert_eq!(
            lc::decode_lc_words(state, count),
            (LcState::TestUnlocked0, 1)
        );

        // the LCI accepts a new request once the first one is acknowledged
        let (third, ack) = recorder();
        otp.program_req(LcState::Dev.encode(), 2, ack).unwrap();
        run_until(&clock, &mut otp, &third);
        assert_eq!(third.get(), Some(true));
        assert_eq!(otp.get_lc_info().state, LcState::Dev);
    }

    #[test]
    fn test_invalid_requests() {
        let file = blank_image_file();
        let clock = Clock::new();
        let mut otp = boot(&clock, file.path());
        assert_eq!(
            otp.program_req(LcState::Dev.encode(), 25, |_| {}),
            Err(LcProgramError::InvalidTransitionCount(25))
        );
        assert_eq!(
            otp.program_req(0x1234, 1, |_| {}),
            Err(LcProgramError::InvalidState(0x1234))
        );
        let escalate = LcState::Escalate.encode();
        assert_eq!(
            otp.program_req(escalate, 1, |_| {}),
            Err(LcProgramError::InvalidState(escalate))
        );
        assert_eq!(otp.lci_state(), LciState::Idle);
    }

    #[test]
    fn test_write_blank_is_sticky() {
        let file = blank_image_file();
        let clock = Clock::new();
        let mut otp = boot(&clock, file.path());
        let (outcome, ack) = recorder();
        otp.program_req(LcState::Dev.encode(), 3, ack).unwrap();
        run_until(&clock, &mut otp, &outcome);
        assert_eq!(outcome.get(), Some(true));

        // moving back to a lower count clears bits
        let (outcome, ack) = recorder();
        otp.program_req(LcState::Scrap.encode(), 1, ack).unwrap();
        run_until(&clock, &mut otp, &outcome);
        assert_eq!(outcome.get(), Some(false));
        assert_eq!(otp.lci_state(), LciState::Error);
        assert_eq!(
            otp.err_code(PartitionId::LifeCycle.index()),
            OtpErrorCode::MacroWriteBlank
        );
        let status = otp.read(RvSize::Word, regs::STATUS).unwrap();
        assert_ne!(status & (1 << 23), 0);

        // every word was still written: the state reached SCRAP
        let words = stored_words(otp.image());
        let (_, state) = words.split_at(LC_TRANSITION_CNT_WORDS);
        assert_eq!(state, &lc::state_words(LcState::Scrap).unwrap()[..]);

        // further requests fail asynchronously
        let (outcome, ack) = recorder();
        otp.program_req(LcState::Scrap.encode(), 4, ack).unwrap();
        run(&clock, &mut otp, 1);
        assert_eq!(outcome.get(), Some(false));
        assert_eq!(
            otp.err_code(PartitionId::LifeCycle.index()),
            OtpErrorCode::FsmState
        );
    }

    #[test]
    fn test_escalation_aborts_programming() {
        let file = blank_image_file();
        let clock = Clock::new();
        let mut otp = boot(&clock, file.path());
        let (outcome, ack) = recorder();
        otp.program_req(LcState::Prod.encode(), 5, ack).unwrap();
        run(&clock, &mut otp, 3 * LCI_PROG_DELAY_US);
        otp.lc_broadcast(LcBroadcast::EscalateEn, true);
        run_until(&clock, &mut otp, &outcome);
        assert_eq!(outcome.get(), Some(false));
        assert_eq!(
            otp.err_code(PartitionId::LifeCycle.index()),
            OtpErrorCode::FsmState
        );
        // words written before escalation were persisted
        let image = OtpImage::load(file.path(), true).unwrap();
        assert_ne!(image.read_u32(fields::LC_TRANSITION_CNT), 0);
    }

    #[test]
    fn test_unbacked_programming_fails() {
        let clock = Clock::new();
        let mut otp = Otp::new(&clock, crate::OtpArgs::default()).unwrap();
        otp.pwr_otp_req(true);
        run(&clock, &mut otp, 2);
        let (outcome, ack) = recorder();
        otp.program_req(LcState::Dev.encode(), 1, ack).unwrap();
        run(&clock, &mut otp, 1);
        assert_eq!(outcome.get(), Some(false));
        assert_eq!(
            otp.err_code(PartitionId::LifeCycle.index()),
            OtpErrorCode::Macro
        );
        assert_ne!(otp.fatal_alerts(), 0);
    }
}

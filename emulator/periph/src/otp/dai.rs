/*++

Licensed under the Apache-2.0 license.

File Name:

    dai.rs

Abstract:

    Direct access interface: guest driven reads, writes and digest
    computation on the OTP array.

--*/

use super::Otp;
use crate::ecc::{self, EccStatus};
use crate::error::OtpErrorCode;
use crate::otp_digest::otp_digest;
use crate::partition::{PartitionCache, PartitionId};
use crate::regs::{Intr, Status, DAI_ERROR_ENTRY};
use caliptra_emu_bus::ActionHandle;
use strum_macros::Display;
#[allow(unused_imports)] // Rust compiler doesn't like these
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

const DAI_READ_DELAY_US: u64 = 100;
const DAI_WRITE_DELAY_US: u64 = 1000;
const DAI_DIGEST_DELAY_US: u64 = 5000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DaiState {
    #[default]
    Reset,
    InitOtp,
    InitPart,
    Idle,
    Error,
    Read,
    ReadWait,
    Write,
    WriteWait,
    DigClr,
    DigRead,
    Dig,
    DigWait,
}

#[derive(Default)]
pub(super) struct Dai {
    pub(super) state: DaiState,
    /// Partition of the command in flight.
    pub(super) partition: Option<PartitionId>,
    pub(super) delay: Option<ActionHandle>,
    pub(super) digest_write: Option<ActionHandle>,
}

impl Dai {
    pub(super) fn reset(&mut self) {
        self.state = DaiState::Reset;
        self.partition = None;
        self.delay = None;
        self.digest_write = None;
    }
}

impl Otp {
    pub fn dai_state(&self) -> DaiState {
        self.dai.state
    }

    pub(super) fn dai_is_busy(&self) -> bool {
        self.dai.state != DaiState::Idle
    }

    pub(super) fn dai_change_state(&mut self, state: DaiState) {
        log::trace!("otp: DAI {} -> {}", self.dai.state, state);
        self.dai.state = state;
    }

    fn dai_set_error(&mut self, err: OtpErrorCode) {
        self.set_error(DAI_ERROR_ENTRY, err);
        match err {
            OtpErrorCode::FsmState | OtpErrorCode::Macro | OtpErrorCode::MacroEccUncorr => {
                self.dai_change_state(DaiState::Error)
            }
            _ => self.dai_change_state(DaiState::Idle),
        }
    }

    fn dai_clear_error(&mut self) {
        self.status.reg.modify(Status::DAI_ERROR::CLEAR);
        self.err_codes[DAI_ERROR_ENTRY] = OtpErrorCode::NoError;
    }

    fn dai_schedule(&mut self, us: u64) {
        let ticks = self.delay_ticks(us);
        self.dai.delay = Some(self.timer.schedule_poll_in(ticks));
    }

    /// Resolves the partition targeted by DIRECT_ACCESS_ADDRESS. The life
    /// cycle partition is reserved to the LCI.
    fn dai_target(&mut self, address: usize) -> Option<PartitionId> {
        match PartitionId::from_address(address) {
            Some(id) if id != PartitionId::LifeCycle => Some(id),
            _ => {
                log::error!("otp: DAI address {address:#x} is not accessible");
                self.dai_set_error(OtpErrorCode::Access);
                None
            }
        }
    }

    /// Checks the macro accepts programming before a write or digest.
    fn dai_check_writable(&mut self) -> bool {
        if self.image.is_writable() {
            return true;
        }
        log::error!("otp: OTP image is not writable");
        self.dai_set_error(OtpErrorCode::Macro);
        false
    }

    fn dai_check_busy(&self, command: &str) -> bool {
        if self.dai_is_busy() {
            log::error!("otp: DAI busy in {}, {command} ignored", self.dai.state);
            return true;
        }
        false
    }

    fn dai_ecc_status(&mut self, status: EccStatus) -> bool {
        match status {
            EccStatus::Ok => true,
            EccStatus::Corrected => {
                self.dai_set_error(OtpErrorCode::MacroEccCorr);
                false
            }
            EccStatus::Uncorrectable => {
                self.dai_set_error(OtpErrorCode::MacroEccUncorr);
                false
            }
        }
    }

    pub(super) fn dai_read(&mut self) {
        if self.dai_check_busy("read") {
            return;
        }
        self.dai_clear_error();
        self.dai_change_state(DaiState::Read);

        let address = (self.dai_address & !3) as usize;
        let Some(id) = self.dai_target(address) else {
            return;
        };
        let desc = id.desc();
        if !desc.is_digest_address(address) && !self.is_readable(id) {
            log::error!("otp: {id} is not readable");
            self.dai_set_error(OtpErrorCode::Access);
            return;
        }

        self.dai_change_state(DaiState::ReadWait);
        let check_ecc = self.ecc_enabled && id != PartitionId::VendorTest;
        let status = if desc.is_wide_address(address) {
            let offset = address & !7;
            let mut data = self.image.read_u64(offset);
            let mut status = EccStatus::Ok;
            if check_ecc {
                (data, status) = ecc::verify_u64(data, self.image.read_ecc_u64(offset));
            }
            self.dai_rdata = [data as u32, (data >> 32) as u32];
            status
        } else {
            let mut data = self.image.read_u32(address);
            let mut status = EccStatus::Ok;
            if check_ecc {
                (data, status) = ecc::verify_u32(data, self.image.read_ecc_u32(address));
            }
            self.dai_rdata = [data, 0];
            status
        };
        if !self.dai_ecc_status(status) {
            return;
        }

        if desc.buffered {
            self.dai_change_state(DaiState::Idle);
        } else {
            self.dai.partition = Some(id);
            self.dai_schedule(DAI_READ_DELAY_US);
        }
    }

    pub(super) fn dai_write(&mut self) {
        if self.dai_check_busy("write") || !self.dai_check_writable() {
            return;
        }
        self.dai_change_state(DaiState::Write);
        self.dai_clear_error();

        let address = (self.dai_address & !3) as usize;
        let Some(id) = self.dai_target(address) else {
            return;
        };
        let desc = id.desc();
        let ctrl = &self.partitions[id.index()];
        if ctrl.locked || ctrl.write_lock {
            log::error!("otp: {id} is locked, write to {address:#x} rejected");
            self.dai_set_error(OtpErrorCode::Access);
            return;
        }
        if desc.hw_digest && desc.is_digest_address(address) {
            log::error!("otp: {id} digest is computed by hardware");
            self.dai_set_error(OtpErrorCode::Access);
            return;
        }

        let programmed = if desc.is_wide_address(address) {
            let value = (self.dai_wdata[1] as u64) << 32 | self.dai_wdata[0] as u64;
            self.dai_program_u64(address & !7, value)
        } else {
            self.dai_program_u32(address, self.dai_wdata[0])
        };
        if !programmed {
            return;
        }

        self.dai.partition = Some(id);
        self.dai_change_state(DaiState::WriteWait);
        self.dai_schedule(DAI_WRITE_DELAY_US);
    }

    fn dai_write_blank(&mut self, offset: usize) {
        log::warn!("otp: cannot clear OTP bits at {offset:#x}");
        self.set_error(DAI_ERROR_ENTRY, OtpErrorCode::MacroWriteBlank);
    }

    fn dai_program_u32(&mut self, offset: usize, value: u32) -> bool {
        let current = self.image.read_u32(offset);
        if current & !value != 0 {
            self.dai_write_blank(offset);
        }
        let merged = current | value;
        self.image.write_u32(offset, merged);
        if self.ecc_enabled {
            let current = self.image.read_ecc_u32(offset);
            let ecc = ecc::ecc_u32(merged);
            if current & !ecc != 0 {
                self.dai_write_blank(offset);
            }
            self.image.write_ecc_u32(offset, current | ecc);
        }
        self.dai_persist(offset, 4)
    }

    fn dai_program_u64(&mut self, offset: usize, value: u64) -> bool {
        let current = self.image.read_u64(offset);
        if current & !value != 0 {
            self.dai_write_blank(offset);
        }
        let merged = current | value;
        self.image.write_u64(offset, merged);
        if self.ecc_enabled {
            let current = self.image.read_ecc_u64(offset);
            let ecc = ecc::ecc_u64(merged);
            if current & !ecc != 0 {
                self.dai_write_blank(offset);
            }
            self.image.write_ecc_u64(offset, current | ecc);
        }
        self.dai_persist(offset, 8)
    }

    fn dai_persist(&mut self, offset: usize, len: usize) -> bool {
        match self.image.persist(offset, len) {
            Ok(()) => true,
            Err(err) => {
                log::error!("otp: cannot persist OTP at {offset:#x}: {err}");
                self.dai_set_error(OtpErrorCode::Macro);
                false
            }
        }
    }

    pub(super) fn dai_digest(&mut self) {
        if self.dai_check_busy("digest") || !self.dai_check_writable() {
            return;
        }
        self.dai_change_state(DaiState::DigClr);
        self.dai_clear_error();

        let address = (self.dai_address & !3) as usize;
        let Some(id) = self.dai_target(address) else {
            return;
        };
        let desc = id.desc();
        if !desc.hw_digest {
            log::error!("otp: {id} has no hardware digest");
            self.dai_set_error(OtpErrorCode::Access);
            return;
        }
        let ctrl = &self.partitions[id.index()];
        if ctrl.locked || ctrl.write_lock {
            log::error!("otp: {id} is locked, digest rejected");
            self.dai_set_error(OtpErrorCode::Access);
            return;
        }

        self.dai_change_state(DaiState::DigRead);
        self.dai_change_state(DaiState::Dig);
        let data = &self.image.data()[desc.offset..desc.offset + desc.data_size()];
        let digest = otp_digest(data, self.image.digest_iv(), self.image.digest_constant());
        log::debug!("otp: {id} digest {digest:#018x}");
        if let PartitionCache::Buffered { next_digest, .. } = &mut self.partitions[id.index()].cache
        {
            *next_digest = digest;
        }

        self.dai.partition = Some(id);
        self.dai_change_state(DaiState::DigWait);
        self.dai_schedule(DAI_DIGEST_DELAY_US);
    }

    /// Commits the digest computed by the last digest command.
    pub(super) fn dai_write_digest(&mut self) {
        if self.dai.state != DaiState::DigWait {
            return;
        }
        let Some(id) = self.dai.partition else {
            self.dai_set_error(OtpErrorCode::FsmState);
            return;
        };
        self.dai_change_state(DaiState::Write);
        let digest = match &mut self.partitions[id.index()].cache {
            PartitionCache::Buffered { next_digest, .. } => std::mem::take(next_digest),
            PartitionCache::Unbuffered => 0,
        };
        let Some(offset) = id.desc().digest_offset else {
            self.dai_set_error(OtpErrorCode::FsmState);
            return;
        };
        if !self.dai_program_u64(offset, digest) {
            return;
        }
        self.dai_change_state(DaiState::WriteWait);
        self.dai_schedule(DAI_WRITE_DELAY_US);
    }

    pub(super) fn dai_complete(&mut self) {
        match self.dai.state {
            DaiState::ReadWait => {
                self.dai.partition = None;
                self.dai_change_state(DaiState::Idle);
            }
            DaiState::WriteWait => {
                self.intr_state.reg.modify(Intr::OTP_OPERATION_DONE::SET);
                self.dai.partition = None;
                self.dai_change_state(DaiState::Idle);
            }
            DaiState::DigWait => {
                self.dai.digest_write = Some(self.timer.schedule_poll_in(1));
            }
            DaiState::Error => {}
            state => log::error!("otp: unexpected DAI completion in {state}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::test::{blank_image_file, boot, dai_write, run};
    use super::*;
    use crate::regs;
    use caliptra_emu_bus::{Bus, Clock};
    use caliptra_emu_types::RvSize;

    #[test]
    fn test_dai_timing() {
        let file = blank_image_file();
        let clock = Clock::new();
        let mut otp = boot(&clock, file.path());
        let addr = PartitionId::CreatorSwCfg.desc().offset as u32;

        otp.write(RvSize::Word, regs::DIRECT_ACCESS_ADDRESS, addr).unwrap();
        otp.write(RvSize::Word, regs::DIRECT_ACCESS_CMD, 1).unwrap();
        assert_eq!(otp.dai_state(), DaiState::ReadWait);
        run(&clock, &mut otp, DAI_READ_DELAY_US - 1);
        assert_eq!(otp.dai_state(), DaiState::ReadWait);
        run(&clock, &mut otp, 1);
        assert_eq!(otp.dai_state(), DaiState::Idle);

        otp.write(RvSize::Word, regs::DIRECT_ACCESS_CMD, 2).unwrap();
        run(&clock, &mut otp, DAI_WRITE_DELAY_US - 1);
        assert_eq!(otp.dai_state(), DaiState::WriteWait);
        run(&clock, &mut otp, 1);
        assert_eq!(otp.dai_state(), DaiState::Idle);

        // buffered partitions answer right away
        let addr = PartitionId::HwCfg0.desc().offset as u32;
        otp.write(RvSize::Word, regs::DIRECT_ACCESS_ADDRESS, addr).unwrap();
        otp.write(RvSize::Word, regs::DIRECT_ACCESS_CMD, 1).unwrap();
        assert_eq!(otp.dai_state(), DaiState::Idle);
    }

    #[test]
    fn test_digest_sequence() {
        let file = blank_image_file();
        let clock = Clock::new();
        let mut otp = boot(&clock, file.path());
        dai_write(&clock, &mut otp, PartitionId::Secret0.desc().offset, 0x1234);
        otp.write(RvSize::Word, regs::INTR_STATE, 0x3).unwrap();

        let addr = PartitionId::Secret0.desc().offset as u32;
        otp.write(RvSize::Word, regs::DIRECT_ACCESS_ADDRESS, addr).unwrap();
        otp.write(RvSize::Word, regs::DIRECT_ACCESS_CMD, 4).unwrap();
        assert_eq!(otp.dai_state(), DaiState::DigWait);
        run(&clock, &mut otp, DAI_DIGEST_DELAY_US);
        assert_eq!(otp.dai_state(), DaiState::DigWait);
        run(&clock, &mut otp, 1);
        assert_eq!(otp.dai_state(), DaiState::WriteWait);
        assert_eq!(otp.read(RvSize::Word, regs::INTR_STATE).unwrap(), 0);
        run(&clock, &mut otp, DAI_WRITE_DELAY_US);
        assert_eq!(otp.dai_state(), DaiState::Idle);
        assert_eq!(otp.read(RvSize::Word, regs::INTR_STATE).unwrap(), 0x1);

        let digest_offset = PartitionId::Secret0.desc().digest_offset.unwrap();
        assert_ne!(otp.image().read_u64(digest_offset), 0);
    }

    #[test]
    fn test_ticks_per_us() {
        let file = blank_image_file();
        let clock = Clock::new();
        let mut otp = Otp::new(
            &clock,
            crate::OtpArgs {
                file_name: Some(file.path().to_path_buf()),
                ticks_per_us: 3,
                ..Default::default()
            },
        )
        .unwrap();
        otp.pwr_otp_req(true);
        run(&clock, &mut otp, 2);

        otp.write(RvSize::Word, regs::DIRECT_ACCESS_ADDRESS, 0x40).unwrap();
        otp.write(RvSize::Word, regs::DIRECT_ACCESS_CMD, 1).unwrap();
        run(&clock, &mut otp, DAI_READ_DELAY_US * 3 - 1);
        assert_eq!(otp.dai_state(), DaiState::ReadWait);
        run(&clock, &mut otp, 1);
        assert_eq!(otp.dai_state(), DaiState::Idle);
    }
}

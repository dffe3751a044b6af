/*++

Licensed under the Apache-2.0 license.

File Name:

    otp.rs

Abstract:

    OpenTitan Darjeeling OTP controller emulated device. Core register
    block, software config window, partition initialization and the
    life cycle, key manager and key derivation interfaces.

--*/

mod dai;
mod lci;

pub use dai::DaiState;
pub use lci::{LcProgramAck, LciState};

use crate::ecc::{self, EccStatus};
use crate::error::{ImageError, OtpErrorCode, SwCfgError};
use crate::image::OtpImage;
use crate::keygen::{EntropySource, KeyGen, OtpKey, OtpKeyType};
use crate::lc::{self, LcState, LC_TRANSITION_CNT_WORDS, LC_TRANSITION_COUNT_MAX};
use crate::otp_digest::otp_digest;
use crate::partition::{fields, PartitionCache, PartitionCtrl, PartitionId, PARTITIONS};
use crate::prim::PrimOtp;
use crate::regs::{self, CheckTrigger, DirectAccessCmd, Intr, RegWen, Status};
use caliptra_emu_bus::{ActionHandle, Bus, BusError, Clock, ReadWriteRegister, Timer};
use caliptra_emu_types::{RvAddr, RvData, RvSize};
use serde::Deserialize;
use std::path::PathBuf;
use strum::IntoEnumIterator;
#[allow(unused_imports)] // Rust compiler doesn't like these
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

/// Partitions exposed through the DIGEST_0/DIGEST_1 register pairs, in
/// register order.
const DIGEST_PARTITIONS: [PartitionId; 19] = [
    PartitionId::VendorTest,
    PartitionId::CreatorSwCfg,
    PartitionId::OwnerSwCfg,
    PartitionId::RotCreatorAuth,
    PartitionId::RotOwnerAuthSlot0,
    PartitionId::RotOwnerAuthSlot1,
    PartitionId::PlatIntegAuthSlot0,
    PartitionId::PlatIntegAuthSlot1,
    PartitionId::PlatOwnerAuthSlot0,
    PartitionId::PlatOwnerAuthSlot1,
    PartitionId::PlatOwnerAuthSlot2,
    PartitionId::PlatOwnerAuthSlot3,
    PartitionId::RomPatch,
    PartitionId::HwCfg0,
    PartitionId::HwCfg1,
    PartitionId::Secret0,
    PartitionId::Secret1,
    PartitionId::Secret2,
    PartitionId::Secret3,
];

const ALERT_FATAL_MACRO: u32 = 1 << 0;
const ALERT_FATAL_CHECK: u32 = 1 << 1;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OtpArgs {
    /// Backing image. Without one the controller runs on zeroed storage
    /// that cannot be programmed.
    pub file_name: Option<PathBuf>,
    pub read_only: bool,
    /// Clock ticks per simulated microsecond.
    pub ticks_per_us: u64,
    /// Seed of the PRNG backfilling missing entropy.
    pub prng_seed: Option<u64>,
}

impl Default for OtpArgs {
    fn default() -> Self {
        Self {
            file_name: None,
            read_only: false,
            ticks_per_us: 1,
            prng_seed: None,
        }
    }
}

/// Life cycle broadcast signals consumed by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LcBroadcast {
    DftEn,
    EscalateEn,
    CheckBypEn,
    CreatorSeedSwRwEn,
    OwnerSeedSwRwEn,
    SeedHwRdEn,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OtpToken {
    pub value: u128,
    /// The owning secret partition is locked.
    pub valid: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LcTokens {
    pub test_unlock: OtpToken,
    pub test_exit: OtpToken,
    pub rma: OtpToken,
}

/// Life cycle view handed to the life cycle controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LcInfo {
    pub state: LcState,
    pub transition_count: u32,
    pub lc_valid: bool,
    pub secret_valid: bool,
    pub tokens: LcTokens,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HwCfg {
    pub device_id: [u32; 8],
    pub manuf_state: [u32; 8],
    pub soc_dbg_state: u32,
    pub en_sram_ifetch: u8,
}

/// Snapshot of a partition controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionState {
    pub locked: bool,
    pub failed: bool,
    pub read_lock: bool,
    pub write_lock: bool,
    pub digest: u64,
    pub error: OtpErrorCode,
}

pub struct Otp {
    timer: Timer,
    ticks_per_us: u64,
    image: OtpImage,
    prim: PrimOtp,
    ecc_enabled: bool,
    partitions: Vec<PartitionCtrl>,

    intr_state: ReadWriteRegister<u32, Intr::Register>,
    intr_enable: ReadWriteRegister<u32, Intr::Register>,
    status: ReadWriteRegister<u32, Status::Register>,
    err_codes: [OtpErrorCode; regs::NUM_ERROR_ENTRIES],
    dai_address: u32,
    dai_wdata: [u32; 2],
    dai_rdata: [u32; 2],
    check_trigger_regwen: ReadWriteRegister<u32, RegWen::Register>,
    check_regwen: ReadWriteRegister<u32, RegWen::Register>,
    check_timeout: u32,
    integrity_check_period: u32,
    consistency_check_period: u32,
    read_lock: [ReadWriteRegister<u32, RegWen::Register>; regs::NUM_READ_LOCKS],
    /// Latched fatal alerts.
    alerts: u32,
    /// Alerts pulsed through ALERT_TEST, cleared once observed.
    alert_test: u32,

    dai: dai::Dai,
    lci: lci::Lci,
    keygen: KeyGen,

    lc_state: LcState,
    lc_tcount: u32,
    hw_cfg: HwCfg,
    tokens: LcTokens,

    power_up: Option<ActionHandle>,
    power_ack: Option<Box<dyn FnMut()>>,
}

impl Otp {
    pub fn new(clock: &Clock, args: OtpArgs) -> Result<Self, ImageError> {
        let image = match &args.file_name {
            Some(path) => OtpImage::load(path, args.read_only)?,
            None => {
                log::warn!("otp: no backing image, OTP cannot be programmed");
                OtpImage::unbacked()
            }
        };
        Ok(Self::with_image(clock, image, &args))
    }

    pub fn with_image(clock: &Clock, image: OtpImage, args: &OtpArgs) -> Self {
        let prim = PrimOtp::new();
        let ecc_enabled = image.has_ecc() && prim.is_ecc_enabled();
        let ticks_per_us = if args.ticks_per_us == 0 {
            log::warn!("otp: ticks_per_us must be non-zero, using 1");
            1
        } else {
            args.ticks_per_us
        };
        let mut otp = Self {
            timer: Timer::new(clock),
            ticks_per_us,
            image,
            prim,
            ecc_enabled,
            partitions: PARTITIONS.iter().map(PartitionCtrl::new).collect(),
            intr_state: 0u32.into(),
            intr_enable: 0u32.into(),
            status: 0u32.into(),
            err_codes: Default::default(),
            dai_address: 0,
            dai_wdata: [0; 2],
            dai_rdata: [0; 2],
            check_trigger_regwen: 0u32.into(),
            check_regwen: 0u32.into(),
            check_timeout: 0,
            integrity_check_period: 0,
            consistency_check_period: 0,
            read_lock: std::array::from_fn(|_| 0u32.into()),
            alerts: 0,
            alert_test: 0,
            dai: dai::Dai::default(),
            lci: lci::Lci::default(),
            keygen: KeyGen::new(clock, args.prng_seed),
            lc_state: LcState::Invalid,
            lc_tcount: LC_TRANSITION_COUNT_MAX + 1,
            hw_cfg: HwCfg::default(),
            tokens: LcTokens::default(),
            power_up: None,
            power_ack: None,
        };
        otp.reset();
        otp
    }

    /// Memory map size: core registers plus the software config window.
    pub fn mmap_size(&self) -> RvAddr {
        regs::SW_CFG_WINDOW + regs::SW_CFG_WINDOW_SIZE
    }

    pub fn image(&self) -> &OtpImage {
        &self.image
    }

    pub fn prim_mut(&mut self) -> &mut PrimOtp {
        &mut self.prim
    }

    pub fn set_entropy_source(&mut self, source: Box<dyn EntropySource>) {
        self.keygen.set_source(source);
    }

    /// Delivers an entropy word to the key derivation FIFO.
    pub fn push_entropy(&mut self, word: u32) {
        self.keygen.push_entropy(word);
    }

    pub fn entropy_available(&self) -> usize {
        self.keygen.available()
    }

    /// Callback pulsed once power-up initialization completes.
    pub fn set_power_ack(&mut self, ack: Box<dyn FnMut()>) {
        self.power_ack = Some(ack);
    }

    fn delay_ticks(&self, us: u64) -> u64 {
        (us * self.ticks_per_us).max(1)
    }

    pub fn reset(&mut self) {
        for handle in [
            self.dai.delay.take(),
            self.dai.digest_write.take(),
            self.lci.timer.take(),
            self.power_up.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.timer.cancel(handle);
        }
        self.keygen.reset();

        self.intr_state.reg.set(0);
        self.intr_enable.reg.set(0);
        self.status.reg.set(0);
        self.err_codes = Default::default();
        self.dai_address = 0;
        self.dai_wdata = [0; 2];
        self.dai_rdata = [0; 2];
        self.check_trigger_regwen.reg.write(RegWen::EN::SET);
        self.check_regwen.reg.write(RegWen::EN::SET);
        self.check_timeout = 0;
        self.integrity_check_period = 0;
        self.consistency_check_period = 0;
        for lock in self.read_lock.iter_mut() {
            lock.reg.write(RegWen::EN::SET);
        }
        self.alerts = 0;
        self.alert_test = 0;

        for (ctrl, desc) in self.partitions.iter_mut().zip(PARTITIONS.iter()) {
            *ctrl = PartitionCtrl::new(desc);
            if desc.iskeymgr_creator || desc.iskeymgr_owner {
                ctrl.read_lock = true;
                ctrl.write_lock = true;
            }
        }

        self.dai.reset();
        self.lci.reset();
        self.lc_state = LcState::Invalid;
        self.lc_tcount = LC_TRANSITION_COUNT_MAX + 1;
        self.hw_cfg = HwCfg::default();
        self.tokens = LcTokens::default();
    }

    /// Power manager initialization request.
    pub fn pwr_otp_req(&mut self, level: bool) {
        if !level {
            return;
        }
        log::debug!("otp: power-up requested");
        if self.power_up.is_none() {
            self.power_up = Some(self.timer.schedule_poll_in(1));
        }
    }

    fn power_up_init(&mut self) {
        self.dai_change_state(DaiState::InitOtp);
        self.dai_change_state(DaiState::InitPart);
        self.initialize_partitions();
        self.decode_lc_partition();
        self.load_hw_cfg();
        self.load_tokens();
        self.dai_change_state(DaiState::Idle);
        self.lci_change_state(LciState::Idle);
        log::info!(
            "otp: initialized, life cycle {} count {}",
            self.lc_state,
            self.lc_tcount
        );
        if let Some(ack) = self.power_ack.as_mut() {
            ack();
        }
    }

    pub(crate) fn set_error(&mut self, entry: usize, err: OtpErrorCode) {
        if err != OtpErrorCode::NoError || self.err_codes[entry] != err {
            log::debug!("otp: error entry {entry} = {err:?}");
        }
        self.err_codes[entry] = err;
        match err {
            OtpErrorCode::Macro => self.alerts |= ALERT_FATAL_MACRO,
            OtpErrorCode::MacroEccUncorr => {
                // partitions without ecc_fatal_alert only latch the error
                let fatal = PARTITIONS.get(entry).map_or(true, |desc| desc.ecc_fatal_alert);
                if fatal {
                    self.alerts |= ALERT_FATAL_MACRO;
                }
            }
            OtpErrorCode::Access => self.status.reg.modify(Status::DAI_ERROR::SET),
            OtpErrorCode::CheckFail | OtpErrorCode::FsmState => self.alerts |= ALERT_FATAL_CHECK,
            OtpErrorCode::NoError | OtpErrorCode::MacroEccCorr | OtpErrorCode::MacroWriteBlank => {}
        }
        if err != OtpErrorCode::NoError {
            self.intr_state.reg.modify(Intr::OTP_ERROR::SET);
        }
    }

    pub fn err_code(&self, entry: usize) -> OtpErrorCode {
        self.err_codes.get(entry).copied().unwrap_or_default()
    }

    fn status_value(&self) -> u32 {
        let partition_errors = self
            .err_codes
            .iter()
            .take(PARTITIONS.len())
            .enumerate()
            .filter(|(_, err)| **err != OtpErrorCode::NoError)
            .fold(0u32, |acc, (ix, _)| acc | (1 << ix));
        let mut status = self.status.reg.get() | partition_errors;
        if !self.dai_is_busy() {
            status |= Status::DAI_IDLE::SET.value;
        }
        status
    }

    /// Interrupt lines: OTP_OPERATION_DONE on bit 0, OTP_ERROR on bit 1.
    pub fn irq_levels(&self) -> u32 {
        self.intr_state.reg.get() & self.intr_enable.reg.get()
    }

    /// Latched fatal alerts, FATAL_MACRO on bit 0 and FATAL_CHECK on bit 1.
    pub fn fatal_alerts(&self) -> u32 {
        self.alerts
    }

    /// Returns and clears the alerts pulsed through ALERT_TEST.
    pub fn take_alert_test(&mut self) -> u32 {
        std::mem::take(&mut self.alert_test)
    }

    fn is_readable(&self, id: PartitionId) -> bool {
        let desc = id.desc();
        if desc.secret {
            return self.partitions[id.index()].buffered_digest() == Some(0);
        }
        if desc.read_lock_csr {
            return self
                .read_lock
                .get(id.index())
                .is_some_and(|lock| lock.reg.is_set(RegWen::EN));
        }
        if !desc.read_lock {
            return true;
        }
        !self.partitions[id.index()].read_lock
    }

    /// Digest field of `id` as stored in OTP, ECC corrected when enabled.
    fn load_digest(&mut self, id: PartitionId) -> u64 {
        let Some(offset) = id.desc().digest_offset else {
            return 0;
        };
        let digest = self.image.read_u64(offset);
        if !self.ecc_enabled || id == PartitionId::VendorTest {
            return digest;
        }
        let (digest, status) = ecc::verify_u64(digest, self.image.read_ecc_u64(offset));
        match status {
            EccStatus::Ok => {}
            EccStatus::Corrected => self.set_error(id.index(), OtpErrorCode::MacroEccCorr),
            EccStatus::Uncorrectable => {
                log::error!("otp: uncorrectable ECC error on {id} digest");
                self.set_error(id.index(), OtpErrorCode::MacroEccUncorr);
            }
        }
        digest
    }

    fn part_digest(&mut self, id: PartitionId) -> u64 {
        match self.partitions[id.index()].buffered_digest() {
            Some(digest) => digest,
            None => self.load_digest(id),
        }
    }

    pub fn partition_state(&self, id: PartitionId) -> PartitionState {
        let ctrl = &self.partitions[id.index()];
        let digest = match (ctrl.buffered_digest(), id.desc().digest_offset) {
            (Some(digest), _) => digest,
            (None, Some(offset)) => self.image.read_u64(offset),
            (None, None) => 0,
        };
        PartitionState {
            locked: ctrl.locked,
            failed: ctrl.failed,
            read_lock: ctrl.read_lock,
            write_lock: ctrl.write_lock,
            digest,
            error: self.err_codes[id.index()],
        }
    }

    /// Verifies and corrects the words of `[start, end)`. Returns false on
    /// the first uncorrectable word.
    fn apply_ecc(&mut self, id: PartitionId, start: usize, end: usize) -> bool {
        for offset in (start..end).step_by(4) {
            let (value, status) =
                ecc::verify_u32(self.image.read_u32(offset), self.image.read_ecc_u32(offset));
            match status {
                EccStatus::Ok => {}
                EccStatus::Corrected => {
                    log::warn!("otp: {id} corrected ECC error at {offset:#x}");
                    self.image.write_u32(offset, value);
                    self.set_error(id.index(), OtpErrorCode::MacroEccCorr);
                }
                EccStatus::Uncorrectable => {
                    log::error!("otp: {id} uncorrectable ECC error at {offset:#x}");
                    self.set_error(id.index(), OtpErrorCode::MacroEccUncorr);
                    return false;
                }
            }
        }
        true
    }

    fn initialize_partitions(&mut self) {
        for id in PartitionId::iter() {
            let desc = id.desc();
            if self.ecc_enabled && id != PartitionId::VendorTest {
                let end = match desc.digest_offset {
                    Some(digest_offset) if desc.buffered => digest_offset,
                    _ => desc.end(),
                };
                if !self.apply_ecc(id, desc.offset, end) {
                    self.partitions[id.index()].failed = true;
                    continue;
                }
            }

            if desc.sw_digest {
                let digest = self.load_digest(id);
                self.partitions[id.index()].locked = digest != 0;
                continue;
            }

            if desc.buffered {
                self.bufferize(id);
                self.verify_buffered_digest(id);
            }
        }
    }

    fn bufferize(&mut self, id: PartitionId) {
        let desc = id.desc();
        let stored = if desc.hw_digest {
            self.load_digest(id)
        } else {
            0
        };
        let source = &self.image.data()[desc.offset..desc.offset + desc.data_size()];
        if let PartitionCache::Buffered { data, digest, .. } =
            &mut self.partitions[id.index()].cache
        {
            data[..source.len()].copy_from_slice(source);
            *digest = stored;
        }
    }

    /// Recomputes the digest of a buffered partition; a mismatch with the
    /// committed digest fails the partition.
    fn verify_buffered_digest(&mut self, id: PartitionId) {
        let desc = id.desc();
        let (iv, cnst) = (self.image.digest_iv(), self.image.digest_constant());
        let ctrl = &mut self.partitions[id.index()];
        let PartitionCache::Buffered { data, digest, .. } = &ctrl.cache else {
            return;
        };
        if !desc.hw_digest || *digest == 0 {
            ctrl.locked = false;
            return;
        }
        ctrl.locked = true;
        let computed = otp_digest(&data[..desc.data_size()], iv, cnst);
        if computed != *digest {
            log::error!(
                "otp: {id} digest mismatch, stored {:#018x} computed {computed:#018x}",
                *digest
            );
            ctrl.failed = true;
            self.set_error(id.index(), OtpErrorCode::CheckFail);
        } else {
            ctrl.failed = false;
        }
    }

    fn integrity_check(&mut self) {
        log::debug!("otp: integrity check");
        for id in PartitionId::iter() {
            let desc = id.desc();
            if desc.buffered && desc.hw_digest && self.partitions[id.index()].locked {
                self.verify_buffered_digest(id);
            }
        }
    }

    /// Compares the buffer of every locked buffered partition with storage.
    fn consistency_check(&mut self) {
        log::debug!("otp: consistency check");
        for id in PartitionId::iter() {
            let desc = id.desc();
            let ctrl = &self.partitions[id.index()];
            let Some(buffer) = ctrl.buffer() else {
                continue;
            };
            if !ctrl.locked {
                continue;
            }
            let size = desc.data_size();
            let stored = &self.image.data()[desc.offset..desc.offset + size];
            if buffer[..size] != *stored {
                log::error!("otp: {id} buffer does not match storage");
                self.partitions[id.index()].failed = true;
                self.set_error(id.index(), OtpErrorCode::CheckFail);
            }
        }
    }

    fn decode_lc_partition(&mut self) {
        let desc = PartitionId::LifeCycle.desc();
        let words: Vec<u16> = self.image.data()[desc.offset..desc.end()]
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        let (count, state) = words.split_at(LC_TRANSITION_CNT_WORDS);
        (self.lc_state, self.lc_tcount) = lc::decode_lc_words(state, count);
    }

    fn load_hw_cfg(&mut self) {
        let read_words = |image: &OtpImage, offset: usize| -> [u32; 8] {
            std::array::from_fn(|ix| image.read_u32(offset + ix * 4))
        };
        self.hw_cfg = HwCfg {
            device_id: read_words(&self.image, fields::HW_CFG0_DEVICE_ID),
            manuf_state: read_words(&self.image, fields::HW_CFG0_MANUF_STATE),
            soc_dbg_state: self.image.read_u32(fields::HW_CFG1_SOC_DBG_STATE),
            en_sram_ifetch: self.image.read_u32(fields::HW_CFG1_EN_SRAM_IFETCH) as u8,
        };
    }

    fn load_tokens(&mut self) {
        // tokens of an uncommitted secret partition read as zero
        let token = |otp: &Self, offset: usize, owner: PartitionId| {
            let ctrl = &otp.partitions[owner.index()];
            if !ctrl.locked {
                return OtpToken::default();
            }
            let mut value = [0u8; 16];
            value.copy_from_slice(&otp.image.data()[offset..offset + 16]);
            OtpToken {
                value: u128::from_le_bytes(value),
                valid: true,
            }
        };
        self.tokens = LcTokens {
            test_unlock: token(self, fields::SECRET0_TEST_UNLOCK_TOKEN, PartitionId::Secret0),
            test_exit: token(self, fields::SECRET0_TEST_EXIT_TOKEN, PartitionId::Secret0),
            rma: token(self, fields::SECRET2_RMA_TOKEN, PartitionId::Secret2),
        };
    }

    pub fn get_lc_info(&self) -> LcInfo {
        let ctrl = |id: PartitionId| &self.partitions[id.index()];
        LcInfo {
            state: self.lc_state,
            transition_count: self.lc_tcount,
            lc_valid: !(ctrl(PartitionId::Secret0).failed
                || ctrl(PartitionId::Secret2).failed
                || ctrl(PartitionId::LifeCycle).failed),
            secret_valid: !ctrl(PartitionId::Secret2).failed && ctrl(PartitionId::Secret2).locked,
            tokens: self.tokens.clone(),
        }
    }

    pub fn get_hw_cfg(&self) -> &HwCfg {
        &self.hw_cfg
    }

    pub fn get_otp_key(&mut self, key_type: OtpKeyType) -> Option<OtpKey> {
        match key_type {
            OtpKeyType::Sram => {
                if self.dai.state == DaiState::Reset {
                    log::debug!("otp: SRAM key requested before initialization");
                    return Some(KeyGen::default_sram_key());
                }
                let ctrl = &self.partitions[PartitionId::Secret1.index()];
                let offset = fields::SECRET1_SRAM_DATA_KEY_SEED - PartitionId::Secret1.desc().offset;
                let mut seed = [0u8; 16];
                if let Some(buffer) = ctrl.buffer() {
                    seed.copy_from_slice(&buffer[offset..offset + 16]);
                }
                let valid = ctrl.locked && !ctrl.failed;
                Some(self.keygen.sram_key(&seed, valid))
            }
            OtpKeyType::Otbn => Some(OtpKey::default()),
            OtpKeyType::FlashData | OtpKeyType::FlashAddr => {
                log::error!("otp: {key_type:?} key is not available");
                None
            }
        }
    }

    pub fn lc_broadcast(&mut self, signal: LcBroadcast, level: bool) {
        log::debug!("otp: life cycle broadcast {signal:?} = {level}");
        match signal {
            LcBroadcast::DftEn => log::warn!("otp: DFT_EN is not implemented"),
            LcBroadcast::EscalateEn => {
                if level {
                    log::warn!("otp: escalation, DAI and LCI disabled");
                    self.dai_change_state(DaiState::Error);
                    self.lci_change_state(LciState::Error);
                }
            }
            LcBroadcast::CheckBypEn | LcBroadcast::SeedHwRdEn => {}
            LcBroadcast::CreatorSeedSwRwEn | LcBroadcast::OwnerSeedSwRwEn => {
                let creator = signal == LcBroadcast::CreatorSeedSwRwEn;
                for (ctrl, desc) in self.partitions.iter_mut().zip(PARTITIONS.iter()) {
                    let selected = if creator {
                        desc.iskeymgr_creator
                    } else {
                        desc.iskeymgr_owner
                    };
                    if selected {
                        ctrl.read_lock = !level;
                        ctrl.write_lock = !level;
                    }
                }
            }
        }
    }

    /// Reads a word of the software config window at byte offset `addr`.
    pub fn swcfg_read(&mut self, addr: usize) -> Result<u32, SwCfgError> {
        let Some(id) = PartitionId::from_address(addr) else {
            return Err(SwCfgError::InvalidAddress(addr));
        };
        let desc = id.desc();
        if desc.buffered {
            self.set_error(id.index(), OtpErrorCode::Access);
            return Err(SwCfgError::Buffered(id));
        }
        if !desc.is_digest_address(addr) && !self.is_readable(id) {
            self.set_error(id.index(), OtpErrorCode::Access);
            return Err(SwCfgError::ReadLocked(id));
        }
        let value = self.image.read_u32(addr & !3);
        self.set_error(id.index(), OtpErrorCode::NoError);
        Ok(value)
    }

    fn read_reg(&mut self, addr: RvAddr) -> RvData {
        match addr {
            regs::INTR_STATE => self.intr_state.reg.get(),
            regs::INTR_ENABLE => self.intr_enable.reg.get(),
            regs::INTR_TEST | regs::ALERT_TEST | regs::DIRECT_ACCESS_CMD | regs::CHECK_TRIGGER => {
                log::error!("otp: read of write-only register {addr:#x}");
                0
            }
            regs::STATUS => self.status_value(),
            regs::ERR_CODE_0..=regs::ERR_CODE_LAST => {
                self.err_codes[((addr - regs::ERR_CODE_0) / 4) as usize].into()
            }
            regs::DIRECT_ACCESS_REGWEN => u32::from(!self.dai_is_busy()),
            regs::DIRECT_ACCESS_ADDRESS => self.dai_address,
            regs::DIRECT_ACCESS_WDATA_0 => self.dai_wdata[0],
            regs::DIRECT_ACCESS_WDATA_1 => self.dai_wdata[1],
            regs::DIRECT_ACCESS_RDATA_0 => self.dai_rdata[0],
            regs::DIRECT_ACCESS_RDATA_1 => self.dai_rdata[1],
            regs::CHECK_TRIGGER_REGWEN => self.check_trigger_regwen.reg.get(),
            regs::CHECK_REGWEN => self.check_regwen.reg.get(),
            regs::CHECK_TIMEOUT => self.check_timeout,
            regs::INTEGRITY_CHECK_PERIOD => self.integrity_check_period,
            regs::CONSISTENCY_CHECK_PERIOD => self.consistency_check_period,
            regs::READ_LOCK_0..=regs::READ_LOCK_LAST => {
                self.read_lock[((addr - regs::READ_LOCK_0) / 4) as usize].reg.get()
            }
            regs::DIGEST_0..=regs::DIGEST_LAST => {
                let ix = ((addr - regs::DIGEST_0) / 4) as usize;
                let digest = self.part_digest(DIGEST_PARTITIONS[ix / 2]);
                if ix % 2 == 0 {
                    digest as u32
                } else {
                    (digest >> 32) as u32
                }
            }
            _ => {
                log::error!("otp: bad read offset {addr:#x}");
                0
            }
        }
    }

    fn write_reg(&mut self, addr: RvAddr, val: RvData) {
        let dai_gated = matches!(
            addr,
            regs::DIRECT_ACCESS_CMD
                | regs::DIRECT_ACCESS_ADDRESS
                | regs::DIRECT_ACCESS_WDATA_0
                | regs::DIRECT_ACCESS_WDATA_1
                | regs::READ_LOCK_0..=regs::READ_LOCK_LAST
        );
        if dai_gated && self.dai_is_busy() {
            log::error!(
                "otp: DAI busy ({}), write to {addr:#x} ignored",
                self.dai.state
            );
            return;
        }
        match addr {
            regs::INTR_STATE => {
                let state = self.intr_state.reg.get();
                self.intr_state.reg.set(state & !(val & regs::INTR_MASK));
            }
            regs::INTR_ENABLE => self.intr_enable.reg.set(val & regs::INTR_MASK),
            regs::INTR_TEST => {
                let state = self.intr_state.reg.get();
                self.intr_state.reg.set(state | (val & regs::INTR_MASK));
            }
            regs::ALERT_TEST => self.alert_test |= val & regs::ALERT_TEST_MASK,
            regs::DIRECT_ACCESS_CMD => self.dai_command(val),
            regs::DIRECT_ACCESS_ADDRESS => self.dai_address = val & regs::DIRECT_ACCESS_ADDRESS_MASK,
            regs::DIRECT_ACCESS_WDATA_0 => self.dai_wdata[0] = val,
            regs::DIRECT_ACCESS_WDATA_1 => self.dai_wdata[1] = val,
            regs::CHECK_TRIGGER_REGWEN => {
                let regwen = self.check_trigger_regwen.reg.get();
                self.check_trigger_regwen.reg.set(regwen & val & 1);
            }
            regs::CHECK_TRIGGER => {
                if !self.check_trigger_regwen.reg.is_set(RegWen::EN) {
                    log::error!("otp: CHECK_TRIGGER is locked");
                    return;
                }
                let trigger: ReadWriteRegister<u32, CheckTrigger::Register> = val.into();
                if trigger.reg.is_set(CheckTrigger::INTEGRITY) {
                    self.integrity_check();
                }
                if trigger.reg.is_set(CheckTrigger::CONSISTENCY) {
                    self.consistency_check();
                }
            }
            regs::CHECK_REGWEN => {
                let regwen = self.check_regwen.reg.get();
                self.check_regwen.reg.set(regwen & val & 1);
            }
            regs::CHECK_TIMEOUT | regs::INTEGRITY_CHECK_PERIOD | regs::CONSISTENCY_CHECK_PERIOD => {
                if !self.check_regwen.reg.is_set(RegWen::EN) {
                    log::error!("otp: check configuration {addr:#x} is locked");
                    return;
                }
                match addr {
                    regs::CHECK_TIMEOUT => self.check_timeout = val,
                    regs::INTEGRITY_CHECK_PERIOD => self.integrity_check_period = val,
                    _ => self.consistency_check_period = val,
                }
            }
            regs::READ_LOCK_0..=regs::READ_LOCK_LAST => {
                let lock = &mut self.read_lock[((addr - regs::READ_LOCK_0) / 4) as usize];
                let current = lock.reg.get();
                lock.reg.set(current & val & 1);
            }
            regs::STATUS
            | regs::ERR_CODE_0..=regs::ERR_CODE_LAST
            | regs::DIRECT_ACCESS_REGWEN
            | regs::DIRECT_ACCESS_RDATA_0
            | regs::DIRECT_ACCESS_RDATA_1
            | regs::DIGEST_0..=regs::DIGEST_LAST => {
                log::error!("otp: write to read-only register {addr:#x}");
            }
            _ => log::error!("otp: bad write offset {addr:#x}"),
        }
    }

    fn dai_command(&mut self, val: RvData) {
        let cmd: ReadWriteRegister<u32, DirectAccessCmd::Register> = val.into();
        if cmd.reg.is_set(DirectAccessCmd::RD) {
            self.dai_read();
        } else if cmd.reg.is_set(DirectAccessCmd::WR) {
            self.dai_write();
        } else if cmd.reg.is_set(DirectAccessCmd::DIGEST) {
            self.dai_digest();
        }
    }
}

impl Bus for Otp {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            return Err(BusError::LoadAccessFault);
        }
        if addr & 3 != 0 {
            return Err(BusError::LoadAddrMisaligned);
        }
        if (regs::SW_CFG_WINDOW..regs::SW_CFG_WINDOW + regs::SW_CFG_WINDOW_SIZE).contains(&addr) {
            return self
                .swcfg_read((addr - regs::SW_CFG_WINDOW) as usize)
                .map_err(|err| {
                    log::error!("otp: {err}");
                    BusError::LoadAccessFault
                });
        }
        Ok(self.read_reg(addr))
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word {
            return Err(BusError::StoreAccessFault);
        }
        if addr & 3 != 0 {
            return Err(BusError::StoreAddrMisaligned);
        }
        if addr >= regs::SW_CFG_WINDOW {
            log::error!("otp: software config window is read-only");
            return Err(BusError::StoreAccessFault);
        }
        self.write_reg(addr, val);
        Ok(())
    }

    /// Called by Bus::poll() to indicate that time has passed
    fn poll(&mut self) {
        if self.timer.fired(&mut self.power_up) {
            self.power_up_init();
        }
        if self.timer.fired(&mut self.dai.delay) {
            self.dai_complete();
        }
        if self.timer.fired(&mut self.dai.digest_write) {
            self.dai_write_digest();
        }
        if self.timer.fired(&mut self.lci.timer) {
            self.lci_write_word();
        }
        self.keygen.poll();
    }

    fn warm_reset(&mut self) {
        self.reset();
        self.prim.warm_reset();
    }
}

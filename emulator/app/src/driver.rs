/*++

Licensed under the Apache-2.0 license.

File Name:

    driver.rs

Abstract:

    Drives an OTP controller instance through its bus interface.

--*/

use anyhow::{anyhow, bail, Context, Result};
use caliptra_emu_bus::{Bus, Clock};
use caliptra_emu_types::{RvAddr, RvSize};
use emulator_otp_ctrl::regs::{self, Status};
use emulator_otp_ctrl::{
    DaiState, LcState, Otp, OtpArgs, OtpErrorCode, OtpKey, OtpKeyType, OtpToken, PartitionId,
    RngEntropySource, ENTROPY_FIFO_WORDS,
};
use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;
use strum::IntoEnumIterator;

/// Upper bound on simulated ticks spent waiting for any single operation.
const MAX_WAIT_TICKS: u64 = 1_000_000;

const CMD_RD: u32 = 1 << 0;
const CMD_WR: u32 = 1 << 1;
const CMD_DIGEST: u32 = 1 << 2;

#[derive(Debug, Serialize)]
pub struct PartitionInfo {
    pub name: String,
    pub offset: usize,
    pub size: usize,
    pub locked: bool,
    pub failed: bool,
    pub read_lock: bool,
    pub write_lock: bool,
    pub digest: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct TokenInfo {
    pub name: &'static str,
    pub value: String,
    pub valid: bool,
}

/// Snapshot of a powered-up controller.
#[derive(Debug, Serialize)]
pub struct OtpInfo {
    pub version: u32,
    pub ecc: bool,
    pub life_cycle: String,
    pub transition_count: u32,
    pub lc_valid: bool,
    pub secret_valid: bool,
    pub device_id: String,
    pub manuf_state: String,
    pub soc_dbg_state: u32,
    pub en_sram_ifetch: u8,
    pub tokens: Vec<TokenInfo>,
    pub partitions: Vec<PartitionInfo>,
}

pub struct OtpDriver {
    clock: Clock,
    otp: Otp,
}

impl OtpDriver {
    /// Opens the image described by `args` and powers the controller up.
    pub fn open(args: OtpArgs) -> Result<Self> {
        if args.file_name.is_none() {
            bail!("no OTP image given, pass --image or set otp.file_name in the config");
        }
        let clock = Clock::new();
        let seed = args.prng_seed;
        let mut otp = Otp::new(&clock, args).context("failed to load OTP image")?;
        otp.set_entropy_source(Box::new(RngEntropySource::new(seed)));

        let powered = Rc::new(Cell::new(false));
        let ack = powered.clone();
        otp.set_power_ack(Box::new(move || ack.set(true)));
        otp.pwr_otp_req(true);

        let mut driver = Self { clock, otp };
        driver
            .run_until(|_| powered.get())
            .context("power-up did not complete")?;
        match driver.otp.dai_state() {
            DaiState::Idle => Ok(driver),
            state => bail!("OTP controller failed to initialize, DAI in {state}"),
        }
    }

    fn step(&mut self) {
        self.clock.increment_and_process_timer_actions(1, &mut self.otp);
    }

    fn run_until(&mut self, mut done: impl FnMut(&Otp) -> bool) -> Result<()> {
        for _ in 0..MAX_WAIT_TICKS {
            if done(&self.otp) {
                return Ok(());
            }
            self.step();
        }
        bail!("timed out after {MAX_WAIT_TICKS} ticks")
    }

    fn reg_read(&mut self, addr: RvAddr) -> Result<u32> {
        self.otp
            .read(RvSize::Word, addr)
            .map_err(|err| anyhow!("read of register {addr:#x} failed: {err:?}"))
    }

    fn reg_write(&mut self, addr: RvAddr, val: u32) -> Result<()> {
        self.otp
            .write(RvSize::Word, addr, val)
            .map_err(|err| anyhow!("write of register {addr:#x} failed: {err:?}"))
    }

    fn dai_error(&mut self) -> Result<OtpErrorCode> {
        let addr = regs::ERR_CODE_0 + 4 * regs::DAI_ERROR_ENTRY as RvAddr;
        let code = self.reg_read(addr)?;
        OtpErrorCode::try_from(code).map_err(|_| anyhow!("bad error code {code}"))
    }

    fn dai_command(&mut self, addr: u32, cmd: u32) -> Result<()> {
        self.reg_write(regs::DIRECT_ACCESS_ADDRESS, addr)?;
        self.reg_write(regs::DIRECT_ACCESS_CMD, cmd)?;
        let mut waited = 0;
        loop {
            let status = self.reg_read(regs::STATUS)?;
            // fatal DAI errors never return to idle
            if Status::DAI_IDLE.is_set(status) || self.otp.dai_state() == DaiState::Error {
                break;
            }
            if waited == MAX_WAIT_TICKS {
                bail!("DAI stuck in {}", self.otp.dai_state());
            }
            self.step();
            waited += 1;
        }
        match self.dai_error()? {
            OtpErrorCode::NoError => Ok(()),
            err => bail!("DAI error {err:?} at {addr:#x}"),
        }
    }

    /// Reads the word at `addr` through the direct access interface. 64-bit
    /// granules fill the upper half.
    pub fn read(&mut self, addr: u32) -> Result<u64> {
        self.dai_command(addr, CMD_RD)?;
        let lo = self.reg_read(regs::DIRECT_ACCESS_RDATA_0)?;
        let hi = self.reg_read(regs::DIRECT_ACCESS_RDATA_1)?;
        Ok(u64::from(hi) << 32 | u64::from(lo))
    }

    pub fn write(&mut self, addr: u32, value: u64) -> Result<()> {
        self.reg_write(regs::DIRECT_ACCESS_WDATA_0, value as u32)?;
        self.reg_write(regs::DIRECT_ACCESS_WDATA_1, (value >> 32) as u32)?;
        self.dai_command(addr, CMD_WR)
    }

    /// Computes and programs the hardware digest of `partition`.
    pub fn digest(&mut self, partition: PartitionId) -> Result<()> {
        let desc = partition.desc();
        if !desc.hw_digest {
            bail!("partition {partition} has no hardware digest");
        }
        self.dai_command(desc.offset as u32, CMD_DIGEST)
    }

    /// Digest currently held in storage, which differs from the buffered
    /// value until the next power cycle.
    pub fn stored_digest(&self, partition: PartitionId) -> Option<u64> {
        let offset = partition.desc().digest_offset?;
        Some(self.otp.image().read_u64(offset))
    }

    pub fn lc_program(&mut self, state: LcState, transition_count: u32) -> Result<()> {
        let outcome = Rc::new(Cell::new(None));
        let sink = outcome.clone();
        self.otp
            .program_req(state.encode(), transition_count, move |ok| {
                sink.set(Some(ok))
            })?;
        self.run_until(|_| outcome.get().is_some())
            .context("life cycle programming did not complete")?;
        if outcome.get() != Some(true) {
            bail!(
                "life cycle programming failed with {:?}",
                self.otp.err_code(PartitionId::LifeCycle.index())
            );
        }
        Ok(())
    }

    /// Derives an SRAM scrambling key once the entropy FIFO is full.
    pub fn sram_key(&mut self) -> Result<OtpKey> {
        self.run_until(|otp| otp.entropy_available() >= ENTROPY_FIFO_WORDS)
            .context("entropy FIFO did not fill")?;
        self.otp
            .get_otp_key(OtpKeyType::Sram)
            .context("SRAM key unavailable")
    }

    pub fn info(&self) -> OtpInfo {
        let lc = self.otp.get_lc_info();
        let hw_cfg = self.otp.get_hw_cfg();
        let words = |words: &[u32]| {
            hex::encode(
                words
                    .iter()
                    .flat_map(|w| w.to_le_bytes())
                    .collect::<Vec<u8>>(),
            )
        };
        let token = |name, token: &OtpToken| TokenInfo {
            name,
            value: hex::encode(token.value.to_le_bytes()),
            valid: token.valid,
        };
        OtpInfo {
            version: self.otp.image().version(),
            ecc: self.otp.image().has_ecc(),
            life_cycle: lc.state.to_string(),
            transition_count: lc.transition_count,
            lc_valid: lc.lc_valid,
            secret_valid: lc.secret_valid,
            device_id: words(&hw_cfg.device_id[..]),
            manuf_state: words(&hw_cfg.manuf_state[..]),
            soc_dbg_state: hw_cfg.soc_dbg_state,
            en_sram_ifetch: hw_cfg.en_sram_ifetch,
            tokens: vec![
                token("test_unlock", &lc.tokens.test_unlock),
                token("test_exit", &lc.tokens.test_exit),
                token("rma", &lc.tokens.rma),
            ],
            partitions: PartitionId::iter()
                .map(|id| {
                    let desc = id.desc();
                    let state = self.otp.partition_state(id);
                    PartitionInfo {
                        name: id.to_string(),
                        offset: desc.offset,
                        size: desc.size,
                        locked: state.locked,
                        failed: state.failed,
                        read_lock: state.read_lock,
                        write_lock: state.write_lock,
                        digest: format!("{:016x}", state.digest),
                        error: format!("{:?}", state.error),
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use emulator_otp_ctrl::{fields, OtpImage, DEFAULT_DIGEST_CONST, DEFAULT_DIGEST_IV};
    use tempfile::NamedTempFile;

    fn blank_image() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        OtpImage::blank_v2(DEFAULT_DIGEST_IV, DEFAULT_DIGEST_CONST)
            .save(file.path())
            .unwrap();
        file
    }

    fn open(file: &NamedTempFile) -> OtpDriver {
        OtpDriver::open(OtpArgs {
            file_name: Some(file.path().to_path_buf()),
            prng_seed: Some(5),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_open_requires_image() {
        assert!(OtpDriver::open(OtpArgs::default()).is_err());
    }

    #[test]
    fn test_blank_info() {
        let file = blank_image();
        let info = open(&file).info();
        assert_eq!(info.version, 2);
        assert!(info.ecc);
        assert_eq!(info.life_cycle, "RAW");
        assert_eq!(info.transition_count, 0);
        assert_eq!(info.partitions.len(), 22);
        assert!(info.partitions.iter().all(|p| !p.failed && !p.locked));
        assert_eq!(info.device_id, "0".repeat(64));
    }

    #[test]
    fn test_write_read_digest() {
        let file = blank_image();
        let mut driver = open(&file);
        let addr = fields::HW_CFG0_DEVICE_ID as u32;
        driver.write(addr, 0x1234_5678).unwrap();
        assert_eq!(driver.read(addr).unwrap(), 0x1234_5678);

        driver.digest(PartitionId::HwCfg0).unwrap();
        let stored = driver.stored_digest(PartitionId::HwCfg0).unwrap();
        assert_ne!(stored, 0);
        assert_eq!(driver.info().partitions[PartitionId::HwCfg0.index()].digest, "0".repeat(16));
        assert!(driver.digest(PartitionId::CreatorSwCfg).is_err());

        let driver = open(&file);
        let info = driver.info();
        let hw_cfg0 = &info.partitions[PartitionId::HwCfg0.index()];
        assert!(hw_cfg0.locked);
        assert_eq!(hw_cfg0.digest, format!("{stored:016x}"));
        assert!(info.device_id.starts_with("78563412"));
    }

    #[test]
    fn test_read_only_write_fails() {
        let file = blank_image();
        let mut driver = OtpDriver::open(OtpArgs {
            file_name: Some(file.path().to_path_buf()),
            read_only: true,
            ..Default::default()
        })
        .unwrap();
        let err = driver
            .write(fields::HW_CFG0_DEVICE_ID as u32, 1)
            .unwrap_err();
        assert!(err.to_string().contains("Macro"));
    }

    #[test]
    fn test_lc_program() {
        let file = blank_image();
        let mut driver = open(&file);
        driver.lc_program(LcState::TestUnlocked0, 1).unwrap();
        assert!(driver.lc_program(LcState::Escalate, 2).is_err());

        let info = open(&file).info();
        assert_eq!(info.life_cycle, "TEST_UNLOCKED0");
        assert_eq!(info.transition_count, 1);
    }

    #[test]
    fn test_sram_key() {
        let file = blank_image();
        let key = open(&file).sram_key().unwrap();
        assert!(!key.seed_valid);
        assert_eq!(open(&file).sram_key().unwrap(), key);
    }
}

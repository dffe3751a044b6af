/*++

Licensed under the Apache-2.0 license.

File Name:

    regs.rs

Abstract:

    Register offsets and bitfields of the OTP controller core block.

--*/

use caliptra_emu_types::RvAddr;
use tock_registers::register_bitfields;

pub const INTR_STATE: RvAddr = 0x00;
pub const INTR_ENABLE: RvAddr = 0x04;
pub const INTR_TEST: RvAddr = 0x08;
pub const ALERT_TEST: RvAddr = 0x0c;
pub const STATUS: RvAddr = 0x10;
pub const ERR_CODE_0: RvAddr = 0x14;
pub const ERR_CODE_LAST: RvAddr = 0x70;
pub const DIRECT_ACCESS_REGWEN: RvAddr = 0x74;
pub const DIRECT_ACCESS_CMD: RvAddr = 0x78;
pub const DIRECT_ACCESS_ADDRESS: RvAddr = 0x7c;
pub const DIRECT_ACCESS_WDATA_0: RvAddr = 0x80;
pub const DIRECT_ACCESS_WDATA_1: RvAddr = 0x84;
pub const DIRECT_ACCESS_RDATA_0: RvAddr = 0x88;
pub const DIRECT_ACCESS_RDATA_1: RvAddr = 0x8c;
pub const CHECK_TRIGGER_REGWEN: RvAddr = 0x90;
pub const CHECK_TRIGGER: RvAddr = 0x94;
pub const CHECK_REGWEN: RvAddr = 0x98;
pub const CHECK_TIMEOUT: RvAddr = 0x9c;
pub const INTEGRITY_CHECK_PERIOD: RvAddr = 0xa0;
pub const CONSISTENCY_CHECK_PERIOD: RvAddr = 0xa4;
/// First of the READ_LOCK registers, one per partition 0..=14.
pub const READ_LOCK_0: RvAddr = 0xa8;
pub const READ_LOCK_LAST: RvAddr = 0xe0;
/// First of the DIGEST_0/DIGEST_1 pairs.
pub const DIGEST_0: RvAddr = 0xe4;
pub const DIGEST_LAST: RvAddr = 0x178;

/// Start of the read-only software config window.
pub const SW_CFG_WINDOW: RvAddr = 0x4000;
pub const SW_CFG_WINDOW_SIZE: RvAddr = 0x4000;

pub const DIRECT_ACCESS_ADDRESS_MASK: u32 = 0x3fff;
pub const INTR_MASK: u32 = 0x3;
pub const ALERT_TEST_MASK: u32 = 0x1f;

pub const NUM_ERROR_ENTRIES: usize = 24;
pub const DAI_ERROR_ENTRY: usize = 22;
pub const NUM_READ_LOCKS: usize = 15;

register_bitfields! [
    u32,

    /// Interrupt State, Enable and Test
    pub Intr [
        OTP_OPERATION_DONE OFFSET(0) NUMBITS(1) [],
        OTP_ERROR OFFSET(1) NUMBITS(1) [],
    ],

    /// Status
    pub Status [
        PARTITION_ERRORS OFFSET(0) NUMBITS(22) [],
        DAI_ERROR OFFSET(22) NUMBITS(1) [],
        LCI_ERROR OFFSET(23) NUMBITS(1) [],
        TIMEOUT_ERROR OFFSET(24) NUMBITS(1) [],
        LFSR_FSM_ERROR OFFSET(25) NUMBITS(1) [],
        SCRAMBLING_FSM_ERROR OFFSET(26) NUMBITS(1) [],
        KEY_DERIV_FSM_ERROR OFFSET(27) NUMBITS(1) [],
        BUS_INTEG_ERROR OFFSET(28) NUMBITS(1) [],
        DAI_IDLE OFFSET(29) NUMBITS(1) [],
        CHECK_PENDING OFFSET(30) NUMBITS(1) [],
    ],

    /// Direct Access Command
    pub DirectAccessCmd [
        RD OFFSET(0) NUMBITS(1) [],
        WR OFFSET(1) NUMBITS(1) [],
        DIGEST OFFSET(2) NUMBITS(1) [],
    ],

    /// Check Trigger
    pub CheckTrigger [
        INTEGRITY OFFSET(0) NUMBITS(1) [],
        CONSISTENCY OFFSET(1) NUMBITS(1) [],
    ],

    /// Register write enables and read locks
    pub RegWen [
        EN OFFSET(0) NUMBITS(1) [],
    ],
];

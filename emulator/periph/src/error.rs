/*++

Licensed under the Apache-2.0 license.

File Name:

    error.rs

Abstract:

    Error codes latched by the OTP controller and errors returned to callers.

--*/

use crate::partition::PartitionId;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// 3-bit code held in each ERR_CODE register.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum OtpErrorCode {
    #[default]
    NoError = 0,
    Macro = 1,
    MacroEccCorr = 2,
    MacroEccUncorr = 3,
    MacroWriteBlank = 4,
    Access = 5,
    CheckFail = 6,
    FsmState = 7,
}

/// Rejections of a life cycle programming request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LcProgramError {
    #[error("life cycle programming already in progress")]
    Busy,
    #[error("invalid life cycle state encoding {0:#010x}")]
    InvalidState(u32),
    #[error("invalid transition count {0}")]
    InvalidTransitionCount(u32),
}

/// Denied accesses to the software config window.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SwCfgError {
    #[error("address {0:#x} is not backed by a partition")]
    InvalidAddress(usize),
    #[error("partition {0} is only reachable through its hardware interface")]
    Buffered(PartitionId),
    #[error("partition {0} is read locked")]
    ReadLocked(PartitionId),
}

/// Failures loading or creating a backing image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("I/O error on OTP image: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad image magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported image version {0}")]
    UnsupportedVersion(u32),
    #[error("image header length {0} does not match its version")]
    BadHeaderLength(u32),
    #[error("image region size mismatch: data {data_len} bytes, ecc {ecc_len} bytes")]
    BadRegionSize { data_len: u32, ecc_len: u32 },
    #[error("image truncated: {actual} bytes, {expected} expected")]
    Truncated { expected: usize, actual: usize },
}

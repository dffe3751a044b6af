/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the OpenTitan Darjeeling OTP controller
    emulator library.

--*/

mod ecc;
mod error;
mod image;
mod keygen;
mod lc;
mod otp;
mod otp_digest;
mod partition;
mod prim;
pub mod regs;

pub use ecc::{ecc_u16, ecc_u32, ecc_u64, verify_u16, verify_u32, verify_u64, EccStatus};
pub use error::{ImageError, LcProgramError, OtpErrorCode, SwCfgError};
pub use image::{
    image_file_size, FileBackend, OtpBackend, OtpImage, DEFAULT_DIGEST_CONST, DEFAULT_DIGEST_IV,
    OTP_IMAGE_MAGIC,
};
pub use keygen::{EntropySource, OtpKey, OtpKeyType, RngEntropySource, ENTROPY_FIFO_WORDS};
pub use lc::{
    decode_lc_words, state_words, transition_count_words, LcState, LC_PARTITION_WORDS,
    LC_STATE_WORDS, LC_TRANSITION_CNT_WORDS, LC_TRANSITION_COUNT_MAX,
};
pub use otp::{
    DaiState, HwCfg, LcBroadcast, LcInfo, LcProgramAck, LcTokens, LciState, Otp, OtpArgs,
    OtpToken, PartitionState,
};
pub use otp_digest::{otp_digest, present_encrypt, Present};
pub use partition::{
    fields, PartitionDesc, PartitionId, OTP_DATA_SIZE, OTP_ECC_SIZE, PARTITIONS,
    PARTITION_COUNT,
};
pub use prim::PrimOtp;

/*++

Licensed under the Apache-2.0 license.

File Name:

    partition.rs

Abstract:

    Darjeeling OTP partition map and per-partition runtime state.

--*/

use num_enum::TryFromPrimitive;
use strum_macros::{Display, EnumCount, EnumIter};

/// OTP partitions, in storage order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumCount, EnumIter, TryFromPrimitive,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(usize)]
pub enum PartitionId {
    VendorTest,
    CreatorSwCfg,
    OwnerSwCfg,
    OwnershipSlotState,
    RotCreatorAuth,
    RotOwnerAuthSlot0,
    RotOwnerAuthSlot1,
    PlatIntegAuthSlot0,
    PlatIntegAuthSlot1,
    PlatOwnerAuthSlot0,
    PlatOwnerAuthSlot1,
    PlatOwnerAuthSlot2,
    PlatOwnerAuthSlot3,
    ExtNvm,
    RomPatch,
    HwCfg0,
    HwCfg1,
    Secret0,
    Secret1,
    Secret2,
    Secret3,
    LifeCycle,
}

pub const PARTITION_COUNT: usize = 22;

/// Static description of a partition.
#[derive(Clone, Copy, Debug)]
pub struct PartitionDesc {
    pub offset: usize,
    pub size: usize,
    pub digest_offset: Option<usize>,
    pub hw_digest: bool,
    pub sw_digest: bool,
    pub secret: bool,
    pub buffered: bool,
    pub read_lock: bool,
    pub read_lock_csr: bool,
    pub ecc_fatal_alert: bool,
    pub iskeymgr_creator: bool,
    pub iskeymgr_owner: bool,
}

impl PartitionDesc {
    const fn sw_cfg(offset: usize, size: usize, digest: bool) -> Self {
        Self {
            offset,
            size,
            digest_offset: if digest { Some(offset + size - 8) } else { None },
            hw_digest: false,
            sw_digest: digest,
            secret: false,
            buffered: false,
            read_lock: true,
            read_lock_csr: true,
            ecc_fatal_alert: true,
            iskeymgr_creator: false,
            iskeymgr_owner: false,
        }
    }

    const fn hw_cfg(offset: usize, size: usize) -> Self {
        Self {
            offset,
            size,
            digest_offset: Some(offset + size - 8),
            hw_digest: true,
            sw_digest: false,
            secret: false,
            buffered: true,
            read_lock: false,
            read_lock_csr: false,
            ecc_fatal_alert: true,
            iskeymgr_creator: false,
            iskeymgr_owner: false,
        }
    }

    const fn secret(offset: usize, size: usize) -> Self {
        Self {
            secret: true,
            read_lock: true,
            ..Self::hw_cfg(offset, size)
        }
    }

    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.offset && addr + 4 <= self.end()
    }

    /// Size of the digested data, which excludes the digest field itself.
    pub fn data_size(&self) -> usize {
        match self.digest_offset {
            Some(_) => self.size - 8,
            None => self.size,
        }
    }

    pub fn is_digest_address(&self, addr: usize) -> bool {
        self.digest_offset == Some(addr & !7)
    }

    /// Secret partitions and digest fields are accessed as 64-bit granules.
    pub fn is_wide_address(&self, addr: usize) -> bool {
        self.secret || self.is_digest_address(addr)
    }
}

pub const PARTITIONS: [PartitionDesc; PARTITION_COUNT] = [
    PartitionDesc {
        ecc_fatal_alert: false,
        ..PartitionDesc::sw_cfg(0, 64, true)
    },
    PartitionDesc::sw_cfg(64, 768, true),
    PartitionDesc::sw_cfg(832, 768, true),
    PartitionDesc::sw_cfg(1600, 48, false),
    PartitionDesc::sw_cfg(1648, 1424, true),
    PartitionDesc::sw_cfg(3072, 328, true),
    PartitionDesc::sw_cfg(3400, 328, true),
    PartitionDesc::sw_cfg(3728, 328, true),
    PartitionDesc::sw_cfg(4056, 328, true),
    PartitionDesc::sw_cfg(4384, 328, true),
    PartitionDesc::sw_cfg(4712, 328, true),
    PartitionDesc::sw_cfg(5040, 328, true),
    PartitionDesc::sw_cfg(5368, 328, true),
    PartitionDesc {
        ecc_fatal_alert: false,
        ..PartitionDesc::sw_cfg(5696, 1024, false)
    },
    PartitionDesc::sw_cfg(6720, 9200, true),
    PartitionDesc::hw_cfg(15920, 72),
    PartitionDesc::hw_cfg(15992, 16),
    PartitionDesc::secret(16008, 40),
    PartitionDesc::secret(16048, 88),
    PartitionDesc {
        iskeymgr_creator: true,
        ..PartitionDesc::secret(16136, 120)
    },
    PartitionDesc {
        iskeymgr_owner: true,
        ..PartitionDesc::secret(16256, 40)
    },
    PartitionDesc {
        offset: 16296,
        size: 88,
        digest_offset: None,
        hw_digest: false,
        sw_digest: false,
        secret: false,
        buffered: true,
        read_lock: false,
        read_lock_csr: false,
        ecc_fatal_alert: true,
        iskeymgr_creator: false,
        iskeymgr_owner: false,
    },
];

/// Size of the OTP data region in bytes.
pub const OTP_DATA_SIZE: usize = 16384;

/// Size of the OTP ECC region in bytes.
pub const OTP_ECC_SIZE: usize = OTP_DATA_SIZE / 2;

pub mod fields {
    //! Byte offsets of the fields the controller decodes.

    pub const HW_CFG0_DEVICE_ID: usize = 15920;
    pub const HW_CFG0_MANUF_STATE: usize = 15952;
    pub const HW_CFG1_SOC_DBG_STATE: usize = 15992;
    pub const HW_CFG1_EN_SRAM_IFETCH: usize = 15996;
    pub const SECRET0_TEST_UNLOCK_TOKEN: usize = 16008;
    pub const SECRET0_TEST_EXIT_TOKEN: usize = 16024;
    pub const SECRET1_SRAM_DATA_KEY_SEED: usize = 16112;
    pub const SECRET2_RMA_TOKEN: usize = 16136;
    pub const LC_TRANSITION_CNT: usize = 16296;
    pub const LC_STATE: usize = 16344;
}

impl PartitionId {
    pub fn desc(self) -> &'static PartitionDesc {
        &PARTITIONS[self as usize]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Finds the partition holding the 32-bit word at `addr`.
    pub fn from_address(addr: usize) -> Option<PartitionId> {
        PARTITIONS
            .iter()
            .position(|p| p.contains(addr))
            .and_then(|ix| PartitionId::try_from(ix).ok())
    }
}

/// Runtime state that only buffered partitions carry.
#[derive(Debug, Clone)]
pub enum PartitionCache {
    Buffered {
        data: Vec<u8>,
        digest: u64,
        next_digest: u64,
    },
    Unbuffered,
}

#[derive(Debug, Clone)]
pub struct PartitionCtrl {
    pub cache: PartitionCache,
    /// Digest committed, further writes are rejected.
    pub locked: bool,
    /// Integrity check failed at initialization.
    pub failed: bool,
    pub read_lock: bool,
    pub write_lock: bool,
}

impl PartitionCtrl {
    pub fn new(desc: &PartitionDesc) -> Self {
        let cache = if desc.buffered {
            PartitionCache::Buffered {
                data: vec![0; desc.size],
                digest: 0,
                next_digest: 0,
            }
        } else {
            PartitionCache::Unbuffered
        };
        Self {
            cache,
            locked: false,
            failed: false,
            read_lock: false,
            write_lock: false,
        }
    }

    pub fn buffered_digest(&self) -> Option<u64> {
        match &self.cache {
            PartitionCache::Buffered { digest, .. } => Some(*digest),
            PartitionCache::Unbuffered => None,
        }
    }

    pub fn buffer(&self) -> Option<&[u8]> {
        match &self.cache {
            PartitionCache::Buffered { data, .. } => Some(data),
            PartitionCache::Unbuffered => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::{EnumCount, IntoEnumIterator};

    #[test]
    fn test_layout_is_contiguous() {
        assert_eq!(PartitionId::COUNT, PARTITION_COUNT);
        let mut next = 0;
        for id in PartitionId::iter() {
            let desc = id.desc();
            assert_eq!(desc.offset, next, "{id}");
            assert_eq!(desc.size % 8, 0, "{id}");
            if let Some(digest) = desc.digest_offset {
                assert_eq!(digest, desc.end() - 8, "{id}");
            }
            next = desc.end();
        }
        assert_eq!(next, OTP_DATA_SIZE);
    }

    #[test]
    fn test_from_address() {
        assert_eq!(PartitionId::from_address(0), Some(PartitionId::VendorTest));
        assert_eq!(PartitionId::from_address(60), Some(PartitionId::VendorTest));
        assert_eq!(PartitionId::from_address(64), Some(PartitionId::CreatorSwCfg));
        assert_eq!(PartitionId::from_address(16112), Some(PartitionId::Secret1));
        assert_eq!(PartitionId::from_address(16380), Some(PartitionId::LifeCycle));
        assert_eq!(PartitionId::from_address(16384), None);
        assert_eq!(PartitionId::Secret2.to_string(), "SECRET2");
    }

    #[test]
    fn test_digest_address() {
        let desc = PartitionId::HwCfg0.desc();
        assert!(desc.is_digest_address(15984));
        assert!(desc.is_digest_address(15988));
        assert!(!desc.is_digest_address(15980));
        assert!(PartitionId::Secret0.desc().is_wide_address(16008));
        assert!(!PartitionId::OwnerSwCfg.desc().is_wide_address(840));
    }
}

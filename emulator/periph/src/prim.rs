/*++

Licensed under the Apache-2.0 license.

File Name:

    prim.rs

Abstract:

    OTP macro (prim) CSR block. Only holds register values; the macro itself
    is modeled by the OTP controller storage.

--*/

use caliptra_emu_bus::{Bus, BusError};
use caliptra_emu_types::{RvAddr, RvData, RvSize};

const CSR_COUNT: usize = 8;
const CSR7: usize = 7;

#[derive(Default)]
pub struct PrimOtp {
    csrs: [u32; CSR_COUNT],
}

impl PrimOtp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory map size.
    pub fn mmap_size(&self) -> RvAddr {
        (CSR_COUNT * 4) as RvAddr
    }

    /// The macro always stores ECC alongside the data.
    pub fn is_ecc_enabled(&self) -> bool {
        true
    }
}

impl Bus for PrimOtp {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            return Err(BusError::LoadAccessFault);
        }
        if addr & 3 != 0 {
            return Err(BusError::LoadAddrMisaligned);
        }
        match self.csrs.get(addr as usize / 4) {
            Some(val) => Ok(*val),
            None => {
                log::error!("prim otp: bad read offset {addr:#x}");
                Ok(0)
            }
        }
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word {
            return Err(BusError::StoreAccessFault);
        }
        if addr & 3 != 0 {
            return Err(BusError::StoreAddrMisaligned);
        }
        match addr as usize / 4 {
            CSR7 => log::error!("prim otp: CSR7 is read-only"),
            reg if reg < CSR_COUNT => self.csrs[reg] = val,
            _ => log::error!("prim otp: bad write offset {addr:#x}"),
        }
        Ok(())
    }

    fn warm_reset(&mut self) {
        self.csrs = [0; CSR_COUNT];
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_csrs() {
        let mut prim = PrimOtp::new();
        prim.write(RvSize::Word, 0x4, 0x1234).unwrap();
        assert_eq!(prim.read(RvSize::Word, 0x4).unwrap(), 0x1234);
        prim.write(RvSize::Word, 0x1c, 0xffff).unwrap();
        assert_eq!(prim.read(RvSize::Word, 0x1c).unwrap(), 0);
        assert_eq!(prim.read(RvSize::Word, 0x40).unwrap(), 0);
        assert_eq!(
            prim.read(RvSize::Word, 0x2),
            Err(BusError::LoadAddrMisaligned)
        );
        assert!(prim.is_ecc_enabled());
        prim.warm_reset();
        assert_eq!(prim.read(RvSize::Word, 0x4).unwrap(), 0);
    }
}

/*++

Licensed under the Apache-2.0 license.

File Name:

    image.rs

Abstract:

    OTP backing image: versioned header, data and ECC regions, and the
    backend used to persist every programmed word.

--*/

use crate::ecc::{ECC_BITS, ECC_GRANULE};
use crate::error::ImageError;
use crate::partition::{OTP_DATA_SIZE, OTP_ECC_SIZE};
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const OTP_IMAGE_MAGIC: [u8; 4] = *b"vOTP";
const HEADER_SIZE: usize = std::mem::size_of::<OtpImageHeader>();
/// Bytes covered by `magic` and `hlength`, which `hlength` does not count.
const HEADER_PREAMBLE: usize = 8;
const IMAGE_ALIGN: usize = 4096;

/// Digest IV default from otp_ctrl_part_pkg.sv
pub const DEFAULT_DIGEST_IV: u64 = 0x90C7F21F6224F027;
/// Digest finalization constant default from otp_ctrl_part_pkg.sv
pub const DEFAULT_DIGEST_CONST: u128 = 0xF98C48B1F93772844A22D4B78FE0266F;

/// On-disk image header. Version 1 images stop after `ecc_len`.
#[repr(C, packed)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Clone, Copy)]
pub struct OtpImageHeader {
    magic: [u8; 4],
    hlength: U32<LittleEndian>,
    version: U32<LittleEndian>,
    eccbits: U16<LittleEndian>,
    eccgran: U16<LittleEndian>,
    data_len: U32<LittleEndian>,
    ecc_len: U32<LittleEndian>,
    digest_iv: [u8; 8],
    digest_constant: [u8; 16],
}

impl OtpImageHeader {
    fn header_length(version: u32) -> Option<u32> {
        match version {
            1 => Some(16),
            2 => Some(40),
            _ => None,
        }
    }
}

/// Total size of an image file.
pub fn image_file_size() -> usize {
    (HEADER_SIZE + OTP_DATA_SIZE + OTP_ECC_SIZE).div_ceil(IMAGE_ALIGN) * IMAGE_ALIGN
}

/// Byte-addressed sink for programmed OTP words.
pub trait OtpBackend {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;
    fn is_writable(&self) -> bool;
}

/// Backend writing through to the image file.
pub struct FileBackend {
    file: File,
    writable: bool,
}

impl FileBackend {
    pub fn open(path: &Path, read_only: bool) -> io::Result<Self> {
        if !read_only {
            match File::options().read(true).write(true).open(path) {
                Ok(file) => {
                    return Ok(Self {
                        file,
                        writable: true,
                    })
                }
                Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                    log::warn!("OTP image {} is read-only", path.display());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Self {
            file: File::open(path)?,
            writable: false,
        })
    }
}

impl OtpBackend for FileBackend {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "OTP backend is read-only",
            ));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        self.file.flush()
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}

/// In-memory copy of the OTP array.
pub struct OtpImage {
    version: u32,
    ecc_bits: u16,
    ecc_granule: u16,
    digest_iv: u64,
    digest_constant: u128,
    data_offset: usize,
    ecc_offset: usize,
    data: Vec<u8>,
    ecc: Vec<u8>,
    backend: Option<Box<dyn OtpBackend>>,
}

impl OtpImage {
    /// Zeroed storage with no header: ECC disabled, zero digest parameters,
    /// nothing can be programmed.
    pub fn unbacked() -> Self {
        Self {
            version: 0,
            ecc_bits: 0,
            ecc_granule: 0,
            digest_iv: 0,
            digest_constant: 0,
            data_offset: HEADER_SIZE,
            ecc_offset: HEADER_SIZE + OTP_DATA_SIZE,
            data: vec![0; OTP_DATA_SIZE],
            ecc: vec![0; OTP_ECC_SIZE],
            backend: None,
        }
    }

    /// Blank version 1 image, digests use a zero IV and constant.
    pub fn blank_v1() -> Self {
        Self::blank(1, 0, 0)
    }

    /// Blank version 2 image carrying its digest parameters.
    pub fn blank_v2(digest_iv: u64, digest_constant: u128) -> Self {
        Self::blank(2, digest_iv, digest_constant)
    }

    fn blank(version: u32, digest_iv: u64, digest_constant: u128) -> Self {
        let hlength = OtpImageHeader::header_length(version).unwrap_or(40) as usize;
        let data_offset = hlength + HEADER_PREAMBLE;
        Self {
            version,
            ecc_bits: ECC_BITS,
            ecc_granule: ECC_GRANULE,
            digest_iv,
            digest_constant,
            data_offset,
            ecc_offset: data_offset + OTP_DATA_SIZE,
            ..Self::unbacked()
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        let expected = image_file_size();
        if bytes.len() < expected {
            return Err(ImageError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }
        let (header, _) = OtpImageHeader::read_from_prefix(bytes).map_err(|_| {
            ImageError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            }
        })?;
        if header.magic != OTP_IMAGE_MAGIC {
            return Err(ImageError::BadMagic(header.magic));
        }
        let version = header.version.get();
        let hlength = header.hlength.get();
        match OtpImageHeader::header_length(version) {
            None => return Err(ImageError::UnsupportedVersion(version)),
            Some(len) if len != hlength => return Err(ImageError::BadHeaderLength(hlength)),
            Some(_) => {}
        }
        let data_len = header.data_len.get();
        let ecc_len = header.ecc_len.get();
        if data_len as usize != OTP_DATA_SIZE || ecc_len as usize != OTP_ECC_SIZE {
            return Err(ImageError::BadRegionSize { data_len, ecc_len });
        }

        let data_offset = hlength as usize + HEADER_PREAMBLE;
        let ecc_offset = data_offset + OTP_DATA_SIZE;
        let ecc_bits = header.eccbits.get();
        let ecc_granule = header.eccgran.get();
        if ecc_bits != ECC_BITS || ecc_granule != ECC_GRANULE {
            log::warn!("OTP image ECC {ecc_granule}/{ecc_bits} not supported, ECC disabled");
        }
        let (digest_iv, digest_constant) = if version > 1 {
            (
                u64::from_le_bytes(header.digest_iv),
                u128::from_le_bytes(header.digest_constant),
            )
        } else {
            (0, 0)
        };
        log::debug!("loaded OTP image v{version}, ECC {ecc_granule}/{ecc_bits}");

        Ok(Self {
            version,
            ecc_bits,
            ecc_granule,
            digest_iv,
            digest_constant,
            data_offset,
            ecc_offset,
            data: bytes[data_offset..ecc_offset].to_vec(),
            ecc: bytes[ecc_offset..ecc_offset + OTP_ECC_SIZE].to_vec(),
            backend: None,
        })
    }

    /// Serializes the whole image file.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; image_file_size()];
        let header = OtpImageHeader {
            magic: OTP_IMAGE_MAGIC,
            hlength: ((self.data_offset - HEADER_PREAMBLE) as u32).into(),
            version: self.version.into(),
            eccbits: self.ecc_bits.into(),
            eccgran: self.ecc_granule.into(),
            data_len: (OTP_DATA_SIZE as u32).into(),
            ecc_len: (OTP_ECC_SIZE as u32).into(),
            digest_iv: self.digest_iv.to_le_bytes(),
            digest_constant: self.digest_constant.to_le_bytes(),
        };
        let header = header.as_bytes();
        let len = if self.version > 1 {
            header.len()
        } else {
            self.data_offset
        };
        out[..len].copy_from_slice(&header[..len]);
        out[self.data_offset..self.ecc_offset].copy_from_slice(&self.data);
        out[self.ecc_offset..self.ecc_offset + OTP_ECC_SIZE].copy_from_slice(&self.ecc);
        out
    }

    /// Loads an image file and writes programmed words back to it.
    pub fn load(path: &Path, read_only: bool) -> Result<Self, ImageError> {
        let bytes = std::fs::read(path)?;
        let mut image = Self::from_bytes(&bytes)?;
        image.backend = Some(Box::new(FileBackend::open(path, read_only)?));
        Ok(image)
    }

    pub fn save(&self, path: &Path) -> Result<(), ImageError> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn set_backend(&mut self, backend: Box<dyn OtpBackend>) {
        self.backend = Some(backend);
    }

    pub fn is_writable(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_writable())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// ECC is carried by the image only for 6-bit codes over 16-bit granules.
    pub fn has_ecc(&self) -> bool {
        self.ecc_bits == ECC_BITS && self.ecc_granule == ECC_GRANULE
    }

    pub fn digest_iv(&self) -> u64 {
        self.digest_iv
    }

    pub fn digest_constant(&self) -> u128 {
        self.digest_constant
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn ecc(&self) -> &[u8] {
        &self.ecc
    }

    pub fn ecc_mut(&mut self) -> &mut [u8] {
        &mut self.ecc
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[offset..offset + 4]);
        u32::from_le_bytes(buf)
    }

    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    /// ECC of the 32-bit data word at `offset`.
    pub fn read_ecc_u32(&self, offset: usize) -> u16 {
        let ix = offset / 2;
        u16::from_le_bytes([self.ecc[ix], self.ecc[ix + 1]])
    }

    /// ECC of the 64-bit data value at `offset`.
    pub fn read_ecc_u64(&self, offset: usize) -> u32 {
        let ix = offset / 2;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.ecc[ix..ix + 4]);
        u32::from_le_bytes(buf)
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_ecc_u32(&mut self, offset: usize, ecc: u16) {
        let ix = offset / 2;
        self.ecc[ix..ix + 2].copy_from_slice(&ecc.to_le_bytes());
    }

    pub fn write_ecc_u64(&mut self, offset: usize, ecc: u32) {
        let ix = offset / 2;
        self.ecc[ix..ix + 4].copy_from_slice(&ecc.to_le_bytes());
    }

    /// Writes `len` data bytes at `offset` and their ECC bytes to the backend.
    pub fn persist(&mut self, offset: usize, len: usize) -> io::Result<()> {
        let Some(backend) = self.backend.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no OTP backend attached",
            ));
        };
        backend.write_at(
            (self.data_offset + offset) as u64,
            &self.data[offset..offset + len],
        )?;
        let ecc_start = offset / 2;
        let ecc_end = (offset + len).div_ceil(2);
        backend.write_at(
            (self.ecc_offset + ecc_start) as u64,
            &self.ecc[ecc_start..ecc_end],
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER_SIZE, 48);
        assert_eq!(image_file_size(), 28672);
        let bytes = OtpImage::blank_v2(DEFAULT_DIGEST_IV, DEFAULT_DIGEST_CONST).to_bytes();
        assert_eq!(&bytes[..4], b"vOTP");
        assert_eq!(&bytes[4..8], &40u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &2u32.to_le_bytes());
        assert_eq!(&bytes[12..14], &6u16.to_le_bytes());
        assert_eq!(&bytes[14..16], &2u16.to_le_bytes());
        assert_eq!(&bytes[16..20], &16384u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &8192u32.to_le_bytes());
        assert_eq!(&bytes[24..32], &DEFAULT_DIGEST_IV.to_le_bytes());
    }

    #[test]
    fn test_v1_image() {
        let mut image = OtpImage::blank_v1();
        image.write_u32(0x40, 0xdead_beef);
        let bytes = image.to_bytes();
        assert_eq!(&bytes[4..8], &16u32.to_le_bytes());
        assert_eq!(&bytes[24 + 0x40..24 + 0x44], &0xdead_beefu32.to_le_bytes());

        let image = OtpImage::from_bytes(&bytes).unwrap();
        assert_eq!(image.version(), 1);
        assert_eq!(image.digest_iv(), 0);
        assert_eq!(image.digest_constant(), 0);
        assert_eq!(image.read_u32(0x40), 0xdead_beef);
        assert!(image.has_ecc());
        assert!(!image.is_writable());
    }

    #[test]
    fn test_bad_images() {
        let mut bytes = OtpImage::blank_v2(1, 2).to_bytes();
        assert!(matches!(
            OtpImage::from_bytes(&bytes[..100]),
            Err(ImageError::Truncated { .. })
        ));
        bytes[8] = 3;
        assert!(matches!(
            OtpImage::from_bytes(&bytes),
            Err(ImageError::UnsupportedVersion(3))
        ));
        bytes[0] = b'x';
        assert!(matches!(
            OtpImage::from_bytes(&bytes),
            Err(ImageError::BadMagic(_))
        ));
    }

    #[test]
    fn test_persist() {
        let file = NamedTempFile::new().unwrap();
        OtpImage::blank_v2(7, 9).save(file.path()).unwrap();

        let mut image = OtpImage::load(file.path(), false).unwrap();
        assert!(image.is_writable());
        assert_eq!(image.digest_iv(), 7);
        assert_eq!(image.digest_constant(), 9);
        image.write_u32(0x100, 0x1234_5678);
        image.write_ecc_u32(0x100, 0xabcd);
        image.persist(0x100, 4).unwrap();

        let image = OtpImage::load(file.path(), true).unwrap();
        assert!(!image.is_writable());
        assert_eq!(image.read_u32(0x100), 0x1234_5678);
        assert_eq!(image.read_ecc_u32(0x100), 0xabcd);
        assert_eq!(image.ecc()[0x80], 0xcd);
    }
}

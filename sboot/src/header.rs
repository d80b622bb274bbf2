//! The update image header
//!
//! The header occupies the first bytes of its own flash block and consists of four little-endian
//! words:
//!
//! | offset | field        |
//! |--------|--------------|
//! | 0x0    | `magic`      |
//! | 0x4    | `checksum`   |
//! | 0x8    | `image_size` |
//! | 0xc    | `flags`      |
//!
//! Bit 0 of `flags` is the `not_obsolete` bit. The image producer writes it set, the bootloader
//! clears it once the image has been installed and verified. All other bits are reserved and kept
//! as they are.

use byteorder::{ByteOrder, LittleEndian};

use crate::block::{self, Staging, BLOCK_SIZE};
use crate::config::{FlashLayout, Region};
use crate::{BootReason, BootResult, Flash};

pub const MAGIC: u32 = 0xdead_beef;

pub const HEADER_LEN: usize = 4 * size_of::<u32>();

const _: () = assert!(HEADER_LEN <= BLOCK_SIZE);

const FLAG_NOT_OBSOLETE: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub magic: u32,
    /// CRC32 of the installed image.
    pub checksum: u32,
    pub image_size: u32,
    pub flags: u32,
}

impl ImageHeader {
    /// A live header. Reserved flag bits are left erased.
    pub fn new(checksum: u32, image_size: u32) -> Self {
        Self {
            magic: MAGIC,
            checksum,
            image_size,
            flags: u32::MAX,
        }
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            magic: LittleEndian::read_u32(&bytes[0x0..0x4]),
            checksum: LittleEndian::read_u32(&bytes[0x4..0x8]),
            image_size: LittleEndian::read_u32(&bytes[0x8..0xc]),
            flags: LittleEndian::read_u32(&bytes[0xc..0x10]),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        LittleEndian::write_u32(&mut bytes[0x0..0x4], self.magic);
        LittleEndian::write_u32(&mut bytes[0x4..0x8], self.checksum);
        LittleEndian::write_u32(&mut bytes[0x8..0xc], self.image_size);
        LittleEndian::write_u32(&mut bytes[0xc..0x10], self.flags);
        bytes
    }

    pub fn not_obsolete(&self) -> bool {
        self.flags & FLAG_NOT_OBSOLETE != 0
    }

    pub fn reserved(&self) -> u32 {
        self.flags & !FLAG_NOT_OBSOLETE
    }

    pub fn obsoleted(&self) -> Self {
        Self {
            magic: MAGIC,
            flags: self.flags & !FLAG_NOT_OBSOLETE,
            ..*self
        }
    }

    pub fn is_live(&self) -> bool {
        self.magic == MAGIC && self.not_obsolete()
    }
}

pub fn read_header<F: Flash>(flash: &mut F, region: &Region) -> ImageHeader {
    let mut bytes = [0u8; HEADER_LEN];
    flash.read_bytes(region.base, &mut bytes);
    ImageHeader::from_bytes(&bytes)
}

pub fn is_candidate_valid(header: &ImageHeader) -> bool {
    if header.magic != MAGIC {
        log::info!("no valid upgrade image");
        return false;
    }

    if !header.not_obsolete() {
        log::info!("upgrade image obsoleted");
        return false;
    }

    log::info!("valid upgrade image found, size {}", header.image_size);
    true
}

pub fn check_image_size(header: &ImageHeader, layout: &FlashLayout) -> BootResult {
    if header.image_size > layout.max_image_size() {
        log::error!(
            "image size {} exceeds {} bytes",
            header.image_size,
            layout.max_image_size()
        );
        return Err(BootReason::ImageSizeInvalid);
    }
    crate::OK
}

/// Rewrite the header block with `not_obsolete` cleared.
///
/// Everything but the flag comes from `header`. The rest of the block is preserved. The caller is
/// responsible for unlocking the flash.
pub fn commit_obsolete<F: Flash>(
    flash: &mut F,
    staging: &mut Staging,
    region: &Region,
    header: &ImageHeader,
) -> BootResult {
    block::read_block(flash, region.base, staging);
    staging.block_mut()[..HEADER_LEN].copy_from_slice(&header.obsoleted().to_bytes());

    block::program_block(flash, region.base, staging.block()).map_err(|e| match e {
        BootReason::EraseFailed { address, fault }
        | BootReason::ProgramFailed { address, fault } => {
            BootReason::CommitFailed { address, fault }
        }
        other => other,
    })
}

/// Erase the header block, leaving no magic behind.
pub fn scrub<F: Flash>(flash: &mut F, region: &Region) -> BootResult {
    block::erase_block(flash, region.base)
}

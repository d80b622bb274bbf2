//! In-memory NOR flash with injectable faults

use std::collections::HashMap;
use std::vec::Vec;

use crate::block::BLOCK_SIZE;
use crate::config::{FlashLayout, Region};
use crate::header::ImageHeader;
use crate::{Flash, FlashFault};

const B: u32 = BLOCK_SIZE as u32;

pub const BASE: u32 = 0x0800_4000;

pub const LAYOUT: FlashLayout = FlashLayout {
    application: Region::new(BASE, 4 * B),
    header: Region::new(BASE + 4 * B, B),
    candidate: Region::new(BASE + 5 * B, 4 * B),
};

const SIZE: usize = 9 * BLOCK_SIZE;

pub struct MockFlash {
    data: Vec<u8>,
    locked: bool,
    erase_faults: HashMap<u32, usize>,
    program_faults: HashMap<u32, usize>,
    erase_attempts: HashMap<u32, usize>,
    program_attempts: HashMap<u32, usize>,
}

impl MockFlash {
    pub fn new() -> Self {
        Self {
            data: std::vec![0xff; SIZE],
            locked: false,
            erase_faults: HashMap::new(),
            program_faults: HashMap::new(),
            erase_attempts: HashMap::new(),
            program_attempts: HashMap::new(),
        }
    }

    fn offset(address: u32, len: usize) -> usize {
        let off = (address - BASE) as usize;
        assert!(off + len <= SIZE, "access outside mock flash at 0x{address:08x}");
        off
    }

    /// Write raw bytes, as an external programmer would.
    pub fn load(&mut self, address: u32, bytes: &[u8]) {
        let off = Self::offset(address, bytes.len());
        self.data[off..off + bytes.len()].copy_from_slice(bytes);
    }

    pub fn bytes(&self, address: u32, len: usize) -> &[u8] {
        let off = Self::offset(address, len);
        &self.data[off..off + len]
    }

    /// Fail the next `times` erases of the page at `address`.
    pub fn fail_erase(&mut self, address: u32, times: usize) {
        self.erase_faults.insert(address, times);
    }

    /// Fail the next `times` programs of the word at `address`.
    pub fn fail_program(&mut self, address: u32, times: usize) {
        self.program_faults.insert(address, times);
    }

    pub fn erase_attempts(&self, address: u32) -> usize {
        self.erase_attempts.get(&address).copied().unwrap_or(0)
    }

    pub fn program_attempts(&self, address: u32) -> usize {
        self.program_attempts.get(&address).copied().unwrap_or(0)
    }

    pub fn erase_attempts_total(&self) -> usize {
        self.erase_attempts.values().sum()
    }

    pub fn program_attempts_total(&self) -> usize {
        self.program_attempts.values().sum()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn inject(faults: &mut HashMap<u32, usize>, address: u32) -> Result<(), FlashFault> {
        match faults.get_mut(&address) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(FlashFault::Programming)
            }
            _ => Ok(()),
        }
    }
}

impl Flash for MockFlash {
    fn erase_page(&mut self, address: u32) -> Result<(), FlashFault> {
        *self.erase_attempts.entry(address).or_default() += 1;

        if self.locked {
            return Err(FlashFault::WriteProtect);
        }
        Self::inject(&mut self.erase_faults, address)?;

        assert!(address % B == 0, "unaligned erase at 0x{address:08x}");
        let off = Self::offset(address, BLOCK_SIZE);
        self.data[off..off + BLOCK_SIZE].fill(0xff);
        Ok(())
    }

    fn program_word(&mut self, address: u32, value: u32) -> Result<(), FlashFault> {
        *self.program_attempts.entry(address).or_default() += 1;

        if self.locked {
            return Err(FlashFault::WriteProtect);
        }
        Self::inject(&mut self.program_faults, address)?;

        assert!(address % 4 == 0, "unaligned program at 0x{address:08x}");
        let off = Self::offset(address, 4);
        // Programming only clears bits.
        for (byte, new) in self.data[off..off + 4].iter_mut().zip(value.to_le_bytes()) {
            *byte &= new;
        }
        Ok(())
    }

    fn read_bytes(&mut self, address: u32, buffer: &mut [u8]) {
        buffer.copy_from_slice(self.bytes(address, buffer.len()));
    }

    fn unlock(&mut self) {
        self.locked = false;
    }

    fn lock(&mut self) {
        self.locked = true;
    }
}

pub fn crc(data: &[u8]) -> u32 {
    crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC).checksum(data)
}

/// Put `payload` into the candidate region behind a live header.
pub fn stage_candidate(flash: &mut MockFlash, payload: &[u8], checksum: u32) {
    flash.load(LAYOUT.candidate.base, payload);
    let header = ImageHeader::new(checksum, payload.len() as u32);
    flash.load(LAYOUT.header.base, &header.to_bytes());
}

/// An image of `len` bytes starting with a vector table.
pub fn image_with_vectors(len: usize, stack_pointer: u32, reset_vector: u32) -> Vec<u8> {
    let mut image: Vec<u8> = (0..len).map(|i| (i % 241) as u8).collect();
    image[0..4].copy_from_slice(&stack_pointer.to_le_bytes());
    image[4..8].copy_from_slice(&reset_vector.to_le_bytes());
    image
}

//! CRC32 over flash, shared with the image producer

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::block::{Staging, BLOCK_SIZE};
use crate::Flash;

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC32 of `length` bytes of flash starting at `base`, read one block at a time.
pub fn checksum<F: Flash>(flash: &mut F, staging: &mut Staging, base: u32, length: u32) -> u32 {
    let mut digest = CRC32.digest();

    let mut address = base;
    let mut remaining = length as usize;
    while remaining > 0 {
        let n = remaining.min(BLOCK_SIZE);
        let chunk = staging.chunk_mut(n);
        flash.read_bytes(address, chunk);
        digest.update(chunk);

        address += n as u32;
        remaining -= n;
    }

    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, MockFlash};
    use std::vec::Vec;

    fn filled(flash: &mut MockFlash, len: usize) -> Vec<u8> {
        let data: Vec<u8> = (0..len).map(|i| (i * 31 + i / 251) as u8).collect();
        flash.load(mock::LAYOUT.candidate.base, &data);
        data
    }

    #[test]
    fn empty_range() {
        let mut flash = MockFlash::new();
        let mut staging = Staging::new();
        assert_eq!(checksum(&mut flash, &mut staging, mock::LAYOUT.candidate.base, 0), 0);
    }

    #[test]
    fn matches_reference_with_partial_tail() {
        let mut flash = MockFlash::new();
        let data = filled(&mut flash, 2 * BLOCK_SIZE + 317);
        let mut staging = Staging::new();

        let base = mock::LAYOUT.candidate.base;
        assert_eq!(
            checksum(&mut flash, &mut staging, base, data.len() as u32),
            CRC32.checksum(&data)
        );
        assert_eq!(checksum(&mut flash, &mut staging, base, 5), CRC32.checksum(&data[..5]));
    }

    #[test]
    fn full_blocks_equal_concatenation() {
        let mut flash = MockFlash::new();
        let data = filled(&mut flash, 3 * BLOCK_SIZE);
        let base = mock::LAYOUT.candidate.base;

        let mut concat = Vec::new();
        for k in 0..3 {
            let mut staging = Staging::new();
            let address = base + (k * BLOCK_SIZE) as u32;
            let block = crate::block::read_block(&mut flash, address, &mut staging);
            concat.extend_from_slice(block);
        }
        assert_eq!(concat, data);

        let mut staging = Staging::new();
        assert_eq!(
            checksum(&mut flash, &mut staging, base, concat.len() as u32),
            CRC32.checksum(&concat)
        );
    }

    #[test]
    fn ignores_staging_leftovers() {
        let mut flash = MockFlash::new();
        filled(&mut flash, BLOCK_SIZE + 10);
        let base = mock::LAYOUT.candidate.base;

        let mut staging = Staging::new();
        let first = checksum(&mut flash, &mut staging, base, 10);
        staging.block_mut().fill(0xa5);
        assert_eq!(checksum(&mut flash, &mut staging, base, 10), first);

        let len = BLOCK_SIZE as u32 + 10;
        let dirty = checksum(&mut flash, &mut staging, base, len);
        assert_eq!(dirty, checksum(&mut flash, &mut Staging::new(), base, len));
    }

    #[test]
    fn order_sensitive() {
        let mut flash = MockFlash::new();
        let base = mock::LAYOUT.candidate.base;
        let mut staging = Staging::new();

        flash.load(base, &[1, 2, 3, 4]);
        let forward = checksum(&mut flash, &mut staging, base, 4);
        flash.load(base, &[4, 3, 2, 1]);
        let reversed = checksum(&mut flash, &mut staging, base, 4);

        assert_ne!(forward, reversed);
        assert_eq!(forward, CRC32.checksum(&[1, 2, 3, 4]));
    }
}

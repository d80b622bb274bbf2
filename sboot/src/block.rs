//! Erase-then-program of single flash blocks

use byteorder::{ByteOrder, LittleEndian};
use pow2::Pow2;

use crate::{BootReason, BootResult, Flash, FlashFault};

/// Size of one erasable flash page.
pub const BLOCK_SIZE: usize = 2048;

/// Attempts per erase or word program before giving up.
pub const MAX_ATTEMPTS: usize = 3;

const WORD_SZ: Pow2 = Pow2::align_of::<u32>();

pub type Block = [u8; BLOCK_SIZE];

/// Scratch space for exactly one block.
///
/// Every operation that uses it overwrites what it reads, nothing is carried over between calls.
pub struct Staging {
    data: Block,
}

impl Staging {
    pub const fn new() -> Self {
        Self {
            data: [0xff; BLOCK_SIZE],
        }
    }

    pub fn block(&self) -> &Block {
        &self.data
    }

    pub fn block_mut(&mut self) -> &mut Block {
        &mut self.data
    }

    pub(crate) fn chunk_mut(&mut self, length: usize) -> &mut [u8] {
        &mut self.data[..length]
    }
}

impl Default for Staging {
    fn default() -> Self {
        Self::new()
    }
}

pub fn is_block_aligned(address: u32) -> bool {
    pow2::pow2_const!(BLOCK_SIZE).is_aligned(address)
}

fn with_retry<F>(address: u32, what: &str, mut op: F) -> Result<(), FlashFault>
where
    F: FnMut() -> Result<(), FlashFault>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(fault) => {
                attempt += 1;
                log::warn!(
                    "{} 0x{:08x} failed: {:?}, attempt {}/{}",
                    what,
                    address,
                    fault,
                    attempt,
                    MAX_ATTEMPTS
                );
                if attempt >= MAX_ATTEMPTS {
                    return Err(fault);
                }
            }
        }
    }
}

pub fn erase_block<F: Flash>(flash: &mut F, address: u32) -> BootResult {
    with_retry(address, "erase page", || flash.erase_page(address))
        .map_err(|fault| BootReason::EraseFailed { address, fault })
}

pub fn read_block<'s, F: Flash>(flash: &mut F, source: u32, staging: &'s mut Staging) -> &'s Block {
    flash.read_bytes(source, staging.block_mut());
    staging.block()
}

/// Erase the page at `destination` and program it word by word from `source`.
///
/// A failure leaves the page partially programmed.
pub fn program_block<F: Flash>(flash: &mut F, destination: u32, source: &Block) -> BootResult {
    debug_assert!(is_block_aligned(destination));

    erase_block(flash, destination)?;

    for (i, word) in source.chunks_exact(size_of::<u32>()).enumerate() {
        let address = destination + (i * size_of::<u32>()) as u32;
        debug_assert!(WORD_SZ.is_aligned(address));

        let value = LittleEndian::read_u32(word);
        with_retry(address, "write address", || flash.program_word(address, value))
            .map_err(|fault| BootReason::ProgramFailed { address, fault })?;
    }

    crate::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, MockFlash};

    fn pattern(seed: u8) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        for (i, b) in block.iter_mut().enumerate() {
            *b = seed.wrapping_add((i * 7) as u8);
        }
        block
    }

    #[test]
    fn programs_over_stale_contents() {
        let mut flash = MockFlash::new();
        let dest = mock::LAYOUT.application.base;
        flash.load(dest, &[0x00; BLOCK_SIZE]);

        let block = pattern(3);
        assert_eq!(program_block(&mut flash, dest, &block), Ok(()));
        assert_eq!(flash.bytes(dest, BLOCK_SIZE), &block[..]);
    }

    #[test]
    fn transient_erase_faults_are_retried() {
        let mut flash = MockFlash::new();
        let dest = mock::LAYOUT.application.base + BLOCK_SIZE as u32;
        flash.fail_erase(dest, 2);

        let block = pattern(9);
        assert_eq!(program_block(&mut flash, dest, &block), Ok(()));
        assert_eq!(flash.erase_attempts(dest), 3);
        assert_eq!(flash.bytes(dest, BLOCK_SIZE), &block[..]);
    }

    #[test]
    fn transient_program_faults_are_retried() {
        let mut flash = MockFlash::new();
        let dest = mock::LAYOUT.application.base;
        flash.fail_program(dest + 8, 1);
        flash.fail_program(dest + 12, 2);

        let block = pattern(1);
        assert_eq!(program_block(&mut flash, dest, &block), Ok(()));
        assert_eq!(flash.program_attempts(dest + 8), 2);
        assert_eq!(flash.program_attempts(dest + 12), 3);
        assert_eq!(flash.bytes(dest, BLOCK_SIZE), &block[..]);
    }

    #[test]
    fn erase_gives_up_after_three_attempts() {
        let mut flash = MockFlash::new();
        let dest = mock::LAYOUT.application.base;
        flash.fail_erase(dest, 3);

        assert_eq!(
            program_block(&mut flash, dest, &pattern(0)),
            Err(BootReason::EraseFailed {
                address: dest,
                fault: FlashFault::Programming,
            })
        );
        assert_eq!(flash.erase_attempts(dest), MAX_ATTEMPTS);
        assert_eq!(flash.program_attempts_total(), 0);
    }

    #[test]
    fn word_failure_stops_the_block() {
        let mut flash = MockFlash::new();
        let dest = mock::LAYOUT.application.base;
        let bad = dest + 0x100;
        flash.fail_program(bad, 3);

        let block = pattern(5);
        assert_eq!(
            program_block(&mut flash, dest, &block),
            Err(BootReason::ProgramFailed {
                address: bad,
                fault: FlashFault::Programming,
            })
        );
        assert_eq!(flash.program_attempts(bad), MAX_ATTEMPTS);
        assert_eq!(flash.program_attempts(bad + 4), 0);

        // Words before the failure stay written, the rest stays erased.
        assert_eq!(flash.bytes(dest, 0x100), &block[..0x100]);
        assert!(flash.bytes(bad, BLOCK_SIZE - 0x100).iter().all(|b| *b == 0xff));
    }

    #[test]
    fn read_block_overwrites_staging() {
        let mut flash = MockFlash::new();
        let src = mock::LAYOUT.candidate.base;
        let block = pattern(42);
        flash.load(src, &block);

        let mut staging = Staging::new();
        staging.block_mut().fill(0x5a);
        assert_eq!(read_block(&mut flash, src, &mut staging), &block);
    }
}

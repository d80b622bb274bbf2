//! STM32F1 embedded flash controller (FPEC)

use sboot::{Flash, FlashFault};
use volatile_register::{RW, WO};

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xcdef_89ab;

const SR_BSY: u32 = 1 << 0;
const SR_PGERR: u32 = 1 << 2;
const SR_WRPRTERR: u32 = 1 << 4;
const SR_EOP: u32 = 1 << 5;

const CR_PG: u32 = 1 << 0;
const CR_PER: u32 = 1 << 1;
const CR_STRT: u32 = 1 << 6;
const CR_LOCK: u32 = 1 << 7;

// Busy-wait bounds, in polls of SR.
const ERASE_TIMEOUT: u32 = 0x000b_0000;
const PROGRAM_TIMEOUT: u32 = 0x0000_2000;

#[repr(C)]
struct FlashController {
    _acr: RW<u32>,
    keyr: WO<u32>,
    _optkeyr: WO<u32>,
    sr: RW<u32>,
    cr: RW<u32>,
    ar: WO<u32>,
}

pub struct Stm32Flash {
    _private: (),
}

impl Stm32Flash {
    const FPEC: *const FlashController = 0x4002_2000 as *const FlashController;

    /// # Safety
    ///
    /// There must be only one instance, nothing else may touch the flash controller.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn regs(&self) -> &FlashController {
        // SAFETY: The FPEC is always mapped, and `new` guarantees exclusive use.
        unsafe { &*Self::FPEC }
    }

    fn wait_ready(&self, mut spins: u32) -> Result<(), FlashFault> {
        let regs = self.regs();

        while regs.sr.read() & SR_BSY != 0 {
            if spins == 0 {
                return Err(FlashFault::Timeout);
            }
            spins -= 1;
        }

        let sr = regs.sr.read();
        // SAFETY: Writing ones clears the status flags.
        unsafe { regs.sr.write(SR_EOP | SR_PGERR | SR_WRPRTERR) };

        if sr & SR_WRPRTERR != 0 {
            Err(FlashFault::WriteProtect)
        } else if sr & SR_PGERR != 0 {
            Err(FlashFault::Programming)
        } else {
            Ok(())
        }
    }

    fn program_half_word(&mut self, address: u32, value: u16) -> Result<(), FlashFault> {
        self.wait_ready(PROGRAM_TIMEOUT)?;

        let regs = self.regs();
        // SAFETY: The controller is idle, the address lies in flash and is half-word aligned.
        let result = unsafe {
            regs.cr.modify(|cr| cr | CR_PG);
            core::ptr::write_volatile(address as *mut u16, value);
            self.wait_ready(PROGRAM_TIMEOUT)
        };
        // SAFETY: Clearing PG ends the programming sequence.
        unsafe { regs.cr.modify(|cr| cr & !CR_PG) };

        result
    }
}

impl Flash for Stm32Flash {
    fn erase_page(&mut self, address: u32) -> Result<(), FlashFault> {
        if self.regs().sr.read() & SR_BSY != 0 {
            return Err(FlashFault::Busy);
        }

        let regs = self.regs();
        // SAFETY: Standard page erase sequence on an idle controller.
        let result = unsafe {
            regs.cr.modify(|cr| cr | CR_PER);
            regs.ar.write(address);
            regs.cr.modify(|cr| cr | CR_STRT);
            self.wait_ready(ERASE_TIMEOUT)
        };
        // SAFETY: Clearing PER ends the erase sequence.
        unsafe { regs.cr.modify(|cr| cr & !CR_PER) };

        result
    }

    fn program_word(&mut self, address: u32, value: u32) -> Result<(), FlashFault> {
        // The FPEC programs 16 bits at a time, low half first.
        self.program_half_word(address, value as u16)?;
        self.program_half_word(address + 2, (value >> 16) as u16)
    }

    fn read_bytes(&mut self, address: u32, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            // SAFETY: Flash is memory mapped and always readable.
            *byte = unsafe { core::ptr::read_volatile((address as usize + i) as *const u8) };
        }
    }

    fn unlock(&mut self) {
        let regs = self.regs();
        if regs.cr.read() & CR_LOCK != 0 {
            // SAFETY: The key sequence only enables FPEC writes.
            unsafe {
                regs.keyr.write(KEY1);
                regs.keyr.write(KEY2);
            }
        }
    }

    fn lock(&mut self) {
        // SAFETY: Setting LOCK only disables FPEC writes.
        unsafe { self.regs().cr.modify(|cr| cr | CR_LOCK) };
    }
}

#![no_main]
#![no_std]

use cortex_m_semihosting::hprintln;
use log::{Level, Log, Metadata, Record};

use sboot::{
    AppEntry, BootConfig, BootHal, BootReason, FlashLayout, Ignore, Region, StackCheck,
    UpgradePolicy, BLOCK_SIZE,
};

mod flash;

use flash::Stm32Flash;

struct Logger {}
impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        hprintln!("[SB] {} - {}", record.level(), record.args());
    }

    fn flush(&self) {}
}
static LOGGER: Logger = Logger {};

#[cortex_m_rt::entry]
fn main() -> ! {
    unsafe {
        log::set_logger_racy(&LOGGER).ignore_result();
        log::set_max_level_racy(Level::Info.to_level_filter());
    }

    log::info!("sboot starting");

    let hal = Stm32F1Hal {
        // SAFETY: This is the only instance, created before anything else runs.
        flash: unsafe { Stm32Flash::new() },
    };

    sboot::boot::<_>(hal);
}

#[panic_handler]
fn panic(_panic: &core::panic::PanicInfo<'_>) -> ! {
    Stm32F1Hal::abort(HalErr::Panic.into())
}

const B: u32 = BLOCK_SIZE as u32;

/// STM32F103xE, 512K of flash: bootloader, application, then header and candidate.
const LAYOUT: FlashLayout = FlashLayout {
    application: Region::new(0x0800_4000, 0x0003_e000),
    header: Region::new(0x0804_2000, B),
    candidate: Region::new(0x0804_2000 + B, 0x0003_e000 - B),
};

#[repr(u16)]
enum HalErr {
    Panic,
}

impl From<HalErr> for BootReason {
    fn from(item: HalErr) -> Self {
        BootReason::HalError(item as u16)
    }
}

struct Stm32F1Hal {
    flash: Stm32Flash,
}

impl BootHal for Stm32F1Hal {
    const CONFIG: BootConfig = BootConfig {
        layout: LAYOUT,
        stack: StackCheck::CORTEX_M_SRAM,
        policy: UpgradePolicy::DEFAULT,
    };

    type Flash = Stm32Flash;

    fn flash(&mut self) -> &mut Stm32Flash {
        &mut self.flash
    }

    fn reset() -> ! {
        log::info!("rebooting...");
        cortex_m::peripheral::SCB::sys_reset();
    }

    unsafe fn start(entry: AppEntry) -> ! {
        log::info!(
            "starting app at 0x{:08x} (sp 0x{:08x})",
            entry.reset_vector,
            entry.stack_pointer
        );

        cortex_m::interrupt::disable();

        // SAFETY: Writing to VTOR is always safe.
        unsafe { (*cortex_m::peripheral::SCB::PTR).vtor.write(entry.vector_table) };

        // SAFETY: The caller has checked the vector table.
        unsafe { cortex_m::asm::bootload(entry.vector_table as *const u32) }
    }

    fn abort(reason: BootReason) -> ! {
        hprintln!("[SB] ABORT - {:?}", reason);
        loop {
            cortex_m::asm::wfi();
        }
    }
}

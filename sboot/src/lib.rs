#![no_std]

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod mock;

pub mod block;
pub mod checksum;
pub mod config;
pub mod header;
pub mod upgrade;

use byteorder::ByteOrder;

pub use block::{Block, Staging, BLOCK_SIZE};
pub use config::{BootConfig, CommitFailurePolicy, FlashLayout, Region, StackCheck, UpgradePolicy};
pub use header::ImageHeader;
pub use upgrade::{Outcome, State, Upgrade};

/// Status reported by a failed flash primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashFault {
    Busy,
    Programming,
    WriteProtect,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootReason {
    HeaderInvalid,
    ImageSizeInvalid,
    CandidateCorrupt { expected: u32, actual: u32 },
    EraseFailed { address: u32, fault: FlashFault },
    ProgramFailed { address: u32, fault: FlashFault },
    ChecksumMismatch { expected: u32, actual: u32 },
    CommitFailed { address: u32, fault: FlashFault },
    LayoutInvalid,
    StackPointerInvalid(u32),
    HalError(u16),
}

pub type BootResult<T = ()> = Result<T, BootReason>;

pub const OK: BootResult = Ok(());

/// Explicitly discard the outcome of a best-effort operation.
pub trait Ignore {
    fn ignore_result(self);
}

impl<T, E> Ignore for Result<T, E> {
    fn ignore_result(self) {}
}

/// Raw flash primitives of the target's flash controller.
///
/// Erase and program may fail for electrical reasons and are safe to retry. Reads never fail.
pub trait Flash {
    fn erase_page(&mut self, address: u32) -> Result<(), FlashFault>;

    fn program_word(&mut self, address: u32, value: u32) -> Result<(), FlashFault>;

    fn read_bytes(&mut self, address: u32, buffer: &mut [u8]);

    fn unlock(&mut self) {}

    fn lock(&mut self) {}
}

pub trait BootHal {
    const CONFIG: BootConfig;

    type Flash: Flash;

    fn flash(&mut self) -> &mut Self::Flash;

    fn reset() -> !;

    /// Transfer control to the application.
    ///
    /// # Safety
    ///
    /// `entry` must describe a vector table that passed [`application_entry`]. The board must
    /// disable interrupts before it switches stacks.
    unsafe fn start(entry: AppEntry) -> !;

    fn abort(reason: BootReason) -> !;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPath {
    /// A live candidate, with the header as it was read.
    RunUpgrade(ImageHeader),
    RunApplication,
}

/// Vector table of the application about to be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppEntry {
    pub vector_table: u32,
    pub stack_pointer: u32,
    pub reset_vector: u32,
}

/// What the board has to do once the boot pass is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    Reset,
    Start(AppEntry),
    Halt(BootReason),
}

pub fn decide_boot_path<F: Flash>(flash: &mut F, layout: &FlashLayout) -> BootPath {
    let header = header::read_header(flash, &layout.header);

    if header::is_candidate_valid(&header) {
        BootPath::RunUpgrade(header)
    } else {
        BootPath::RunApplication
    }
}

pub fn application_entry<F: Flash>(flash: &mut F, config: &BootConfig) -> BootResult<AppEntry> {
    let base = config.layout.application.base;

    let mut vectors = [0u8; 8];
    flash.read_bytes(base, &mut vectors);

    let stack_pointer = byteorder::LittleEndian::read_u32(&vectors[0..4]);
    let reset_vector = byteorder::LittleEndian::read_u32(&vectors[4..8]);

    if !config.stack.accepts(stack_pointer) {
        log::error!("invalid app image at 0x{:08x}: sp 0x{:08x}", base, stack_pointer);
        return Err(BootReason::StackPointerInvalid(stack_pointer));
    }

    Ok(AppEntry {
        vector_table: base,
        stack_pointer,
        reset_vector,
    })
}

/// One complete boot pass, without the final transfer of control.
pub fn dispatch<F: Flash>(flash: &mut F, staging: &mut Staging, config: &BootConfig) -> Handoff {
    if let BootPath::RunUpgrade(header) = decide_boot_path(flash, &config.layout) {
        let outcome = Upgrade::new(flash, staging, &config.layout, config.policy, header).run();

        match outcome {
            Outcome::Done => {
                log::info!("rebooting into new application");
                return Handoff::Reset;
            }
            Outcome::Aborted(reason) => {
                log::warn!("upgrade aborted ({:?}), running resident application", reason);
            }
            Outcome::Idle => (),
        }
    }

    log::info!("run app...");
    match application_entry(flash, config) {
        Ok(entry) => Handoff::Start(entry),
        Err(reason) => Handoff::Halt(reason),
    }
}

pub fn boot<HAL: BootHal>(mut hal: HAL) -> ! {
    if HAL::CONFIG.validate().is_err() {
        HAL::abort(BootReason::LayoutInvalid);
    }

    let mut staging = Staging::new();

    match dispatch(hal.flash(), &mut staging, &HAL::CONFIG) {
        Handoff::Reset => HAL::reset(),
        // SAFETY: The vector table has passed the stack pointer check.
        Handoff::Start(entry) => unsafe { HAL::start(entry) },
        Handoff::Halt(reason) => HAL::abort(reason),
    }
}

//! Flash map and upgrade policy, fixed at build time by the board

use crate::block::{is_block_aligned, BLOCK_SIZE};
use crate::{BootReason, BootResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: u32,
    pub size: u32,
}

impl Region {
    pub const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    /// First address past the region, `None` if it wraps the address space.
    pub fn end(&self) -> Option<u32> {
        self.base.checked_add(self.size)
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.base && self.end().is_some_and(|end| address < end)
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        match (self.end(), other.end()) {
            (Some(a_end), Some(b_end)) => self.base < b_end && other.base < a_end,
            _ => true,
        }
    }

    pub fn block_count(&self) -> u32 {
        self.size / BLOCK_SIZE as u32
    }

    fn check(&self) -> BootResult {
        if self.size == 0
            || !is_block_aligned(self.base)
            || !is_block_aligned(self.size)
            || self.end().is_none()
        {
            return Err(BootReason::LayoutInvalid);
        }
        crate::OK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayout {
    /// One block holding the image header.
    pub header: Region,
    pub candidate: Region,
    pub application: Region,
}

impl FlashLayout {
    /// Largest image that fits both the candidate and the application region.
    pub fn max_image_size(&self) -> u32 {
        self.candidate.size.min(self.application.size)
    }

    pub fn validate(&self) -> BootResult {
        self.header.check()?;
        self.candidate.check()?;
        self.application.check()?;

        if self.header.block_count() != 1 {
            return Err(BootReason::LayoutInvalid);
        }

        if self.header.overlaps(&self.candidate)
            || self.header.overlaps(&self.application)
            || self.candidate.overlaps(&self.application)
        {
            return Err(BootReason::LayoutInvalid);
        }

        crate::OK
    }
}

/// Rule for the initial stack pointer of a plausible application vector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackCheck {
    pub mask: u32,
    pub base: u32,
}

impl StackCheck {
    /// Anywhere in the first 128K of the Cortex-M SRAM region.
    pub const CORTEX_M_SRAM: StackCheck = StackCheck {
        mask: 0x2ffe_0000,
        base: 0x2000_0000,
    };

    pub fn accepts(&self, stack_pointer: u32) -> bool {
        stack_pointer & self.mask == self.base
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFailurePolicy {
    /// Leave the header as the failed commit left it. A still-live candidate is applied again on
    /// the next boot.
    Retain,
    /// Erase the header block so that the candidate is never applied again.
    Scrub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradePolicy {
    /// Check the candidate region against the header checksum before anything is erased.
    pub verify_candidate: bool,
    pub on_commit_failure: CommitFailurePolicy,
}

impl UpgradePolicy {
    pub const DEFAULT: UpgradePolicy = UpgradePolicy {
        verify_candidate: false,
        on_commit_failure: CommitFailurePolicy::Retain,
    };
}

impl Default for UpgradePolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    pub layout: FlashLayout,
    pub stack: StackCheck,
    pub policy: UpgradePolicy,
}

impl BootConfig {
    pub fn validate(&self) -> BootResult {
        self.layout.validate()
    }
}

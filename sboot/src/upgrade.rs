//! Installation of a staged update image
//!
//! The upgrade runs strictly forward through
//! `Validating -> Copying(0..n) -> Verifying -> Committing -> Done`. Any failure ends in
//! `Aborted`, a header that is not live ends in `Idle`. Nothing is recorded while copying: when
//! power is lost the next boot finds the header still live and starts over at block 0, which
//! yields the same application region because the candidate region is never written.

use crate::block::{self, Staging, BLOCK_SIZE};
use crate::checksum::checksum;
use crate::config::{CommitFailurePolicy, FlashLayout, UpgradePolicy};
use crate::header::{self, ImageHeader};
use crate::{BootReason, Flash, Ignore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Validating,
    Copying(u32),
    Verifying,
    Committing,
    Done,
    Aborted(BootReason),
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Idle | State::Done | State::Aborted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No live candidate, nothing was touched.
    Idle,
    /// The new image is installed and the header committed.
    Done,
    Aborted(BootReason),
}

pub struct Upgrade<'a, F: Flash> {
    flash: &'a mut F,
    staging: &'a mut Staging,
    layout: &'a FlashLayout,
    policy: UpgradePolicy,
    header: ImageHeader,
    state: State,
}

impl<'a, F: Flash> Upgrade<'a, F> {
    pub fn new(
        flash: &'a mut F,
        staging: &'a mut Staging,
        layout: &'a FlashLayout,
        policy: UpgradePolicy,
        header: ImageHeader,
    ) -> Self {
        Self {
            flash,
            staging,
            layout,
            policy,
            header,
            state: State::Validating,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Header snapshot the upgrade works from, as read by [`crate::decide_boot_path`].
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    /// Perform the work of the current state and move on to the next one.
    pub fn step(&mut self) -> State {
        self.state = match self.state {
            State::Validating => self.validate(),
            State::Copying(index) => self.copy_block(index),
            State::Verifying => self.verify(),
            State::Committing => self.commit(),
            terminal => terminal,
        };

        if let State::Aborted(reason) = self.state {
            log::error!("upgrade image failed: {:?}", reason);
        }

        self.state
    }

    pub fn run(mut self) -> Outcome {
        while !self.step().is_terminal() {}

        match self.state {
            State::Done => Outcome::Done,
            State::Aborted(reason) => Outcome::Aborted(reason),
            _ => Outcome::Idle,
        }
    }

    fn block_count(&self) -> u32 {
        self.header.image_size.div_ceil(BLOCK_SIZE as u32)
    }

    fn validate(&mut self) -> State {
        if !self.header.is_live() {
            return State::Idle;
        }

        if let Err(reason) = header::check_image_size(&self.header, self.layout) {
            return State::Aborted(reason);
        }

        if self.policy.verify_candidate {
            let actual = checksum(
                self.flash,
                self.staging,
                self.layout.candidate.base,
                self.header.image_size,
            );
            if actual != self.header.checksum {
                return State::Aborted(BootReason::CandidateCorrupt {
                    expected: self.header.checksum,
                    actual,
                });
            }
        }

        log::info!("upgrading {} blocks...", self.block_count());
        self.flash.unlock();
        State::Copying(0)
    }

    fn copy_block(&mut self, index: u32) -> State {
        if index >= self.block_count() {
            self.flash.lock();
            return State::Verifying;
        }

        let offset = index * BLOCK_SIZE as u32;
        let source = self.layout.candidate.base + offset;
        let destination = self.layout.application.base + offset;

        log::debug!("upgrading block {}, address 0x{:08x}...", index, destination);

        let data = block::read_block(self.flash, source, self.staging);
        if let Err(reason) = block::program_block(self.flash, destination, data) {
            log::error!("write block {} failed", index);
            self.flash.lock();
            return State::Aborted(reason);
        }

        if index + 1 < self.block_count() {
            State::Copying(index + 1)
        } else {
            self.flash.lock();
            State::Verifying
        }
    }

    fn verify(&mut self) -> State {
        let actual = checksum(
            self.flash,
            self.staging,
            self.layout.application.base,
            self.header.image_size,
        );

        if actual != self.header.checksum {
            log::error!(
                "checksum not matched: 0x{:08x}-0x{:08x}",
                actual,
                self.header.checksum
            );
            return State::Aborted(BootReason::ChecksumMismatch {
                expected: self.header.checksum,
                actual,
            });
        }

        State::Committing
    }

    fn commit(&mut self) -> State {
        let region = self.layout.header;

        self.flash.unlock();
        let result = header::commit_obsolete(self.flash, self.staging, &region, &self.header);

        let state = match result {
            Ok(()) => {
                log::info!("upgrade image success");
                State::Done
            }
            Err(reason) => {
                if self.policy.on_commit_failure == CommitFailurePolicy::Scrub {
                    log::warn!("scrubbing header at 0x{:08x}", region.base);
                    header::scrub(self.flash, &region).ignore_result();
                }
                State::Aborted(reason)
            }
        };
        self.flash.lock();

        state
    }
}

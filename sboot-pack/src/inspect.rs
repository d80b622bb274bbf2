//! Decoding a header and candidate from a flash dump

use byteorder::{ByteOrder, LittleEndian};

use sboot::checksum::CRC32;
use sboot::header::HEADER_LEN;
use sboot::{ImageHeader, Region, StackCheck};

use crate::image::{read_range, Segment};
use crate::layout::Layout;

#[derive(Debug, PartialEq, Eq)]
pub enum Payload {
    /// The dump does not hold all of the candidate bytes
    Missing,
    Checked {
        actual: u32,
        stack_ok: bool,
        /// Reset vector points into the application region
        reset_ok: bool,
    },
}

#[derive(Debug)]
pub struct Report {
    pub header: ImageHeader,
    pub size_ok: bool,
    pub payload: Payload,
}

impl Report {
    /// Whether the bootloader would install this candidate.
    pub fn installable(&self) -> bool {
        let crc_ok = matches!(
            self.payload,
            Payload::Checked { actual, .. } if actual == self.header.checksum
        );
        self.header.is_live() && self.size_ok && crc_ok
    }
}

fn stack_ok(payload: &[u8], stack: &StackCheck) -> bool {
    payload.len() >= 4 && stack.accepts(LittleEndian::read_u32(&payload[..4]))
}

fn reset_ok(payload: &[u8], application: &Region) -> bool {
    // Thumb bit set in the vector
    payload.len() >= 8 && application.contains(LittleEndian::read_u32(&payload[4..8]) & !1)
}

pub fn inspect(segments: &[Segment], layout: &Layout) -> Result<Report, String> {
    let base = layout.flash.header.base as usize;
    let bytes = read_range(segments, base, HEADER_LEN)
        .ok_or_else(|| format!("Dump does not cover the header at 0x{base:08x}"))?;

    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&bytes);
    let header = ImageHeader::from_bytes(&raw);

    let size_ok = header.image_size <= layout.flash.max_image_size();

    let payload = match size_ok
        .then(|| {
            read_range(
                segments,
                layout.flash.candidate.base as usize,
                header.image_size as usize,
            )
        })
        .flatten()
    {
        Some(data) => Payload::Checked {
            actual: CRC32.checksum(&data),
            stack_ok: stack_ok(&data, &layout.stack),
            reset_ok: reset_ok(&data, &layout.flash.application),
        },
        None => Payload::Missing,
    };

    Ok(Report {
        header,
        size_ok,
        payload,
    })
}

pub fn log_report(report: &Report) {
    let h = &report.header;
    log::info!(
        "Header: magic 0x{:08x}, checksum 0x{:08x}, size {}, flags 0x{:08x}",
        h.magic,
        h.checksum,
        h.image_size,
        h.flags
    );
    log::info!(
        "Candidate is {}",
        if h.is_live() { "live" } else { "not live" }
    );
    if h.reserved() != !1 {
        log::warn!("Reserved flag bits 0x{:08x} are not erased", h.reserved());
    }
    if !report.size_ok {
        log::warn!("Image size {} does not fit the layout", h.image_size);
    }
    match report.payload {
        Payload::Missing => log::warn!("Payload not present in dump"),
        Payload::Checked {
            actual,
            stack_ok,
            reset_ok,
        } => {
            if actual == h.checksum {
                log::info!("Payload crc32 0x{actual:08x} matches");
            } else {
                log::warn!("Payload crc32 0x{actual:08x} does not match header");
            }
            if !stack_ok {
                log::warn!("Initial stack pointer is outside SRAM");
            }
            if !reset_ok {
                log::warn!("Reset vector is outside the application region");
            }
        }
    }
    if report.installable() {
        log::info!("Candidate will be installed on next boot");
    }
}

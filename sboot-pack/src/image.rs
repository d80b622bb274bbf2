//! Loading application images

use sboot::Region;

#[derive(Debug)]
pub struct Segment {
    pub address: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Guess from the file contents
    Auto,
    Elf,
    Ihex,
    /// Raw binary, placed at the start of the target region
    Bin,
}

fn detect(data: &[u8]) -> Format {
    if data.starts_with(b"\x7fELF") {
        Format::Elf
    } else if data.first() == Some(&b':') {
        Format::Ihex
    } else {
        Format::Bin
    }
}

pub fn load(data: &[u8], format: Format, bin_base: u32) -> Result<Vec<Segment>, String> {
    let format = match format {
        Format::Auto => detect(data),
        f => f,
    };
    log::debug!("Loading {} bytes as {:?}", data.len(), format);

    match format {
        Format::Elf => elf_segments(data),
        Format::Ihex => ihex_segments(data),
        _ => Ok(vec![Segment {
            address: bin_base as usize,
            data: data.to_vec(),
        }]),
    }
}

pub fn elf_segments(elfdata: &[u8]) -> Result<Vec<Segment>, String> {
    let elffile = elf::ElfBytes::<elf::endian::LittleEndian>::minimal_parse(elfdata)
        .or_else(|e| Err(format!("{e}")))?;

    let Some(table) = elffile.segments() else {
        return Err(String::from("No segments found in ELF file"));
    };

    let mut segments = Vec::<Segment>::new();
    for phdr in table
        .iter()
        .filter(|phdr| phdr.p_type == elf::abi::PT_LOAD && phdr.p_filesz > 0)
    {
        let data = elffile
            .segment_data(&phdr)
            .or_else(|e| Err(format!("Could not read segment at 0x{:08x} ({e})", phdr.p_paddr)))?;

        segments.push(Segment {
            address: phdr.p_paddr as usize,
            data: data.to_vec(),
        });
    }
    Ok(segments)
}

/// Segments of an Intel HEX file, sorted by address with adjacent records merged.
pub fn ihex_segments(hexdata: &[u8]) -> Result<Vec<Segment>, String> {
    let text =
        core::str::from_utf8(hexdata).or_else(|e| Err(format!("Invalid UTF-8 string ({e:?})")))?;

    let mut upper = 0_usize;
    let mut pieces = Vec::<Segment>::new();
    let mut terminated = false;

    for record in ihex::Reader::new(text) {
        match record.or_else(|e| Err(format!("Invalid record: {e}")))? {
            ihex::Record::Data { offset, value } => pieces.push(Segment {
                address: upper + offset as usize,
                data: value,
            }),
            ihex::Record::ExtendedSegmentAddress(esa) => upper = (esa as usize) << 4,
            ihex::Record::ExtendedLinearAddress(ela) => upper = (ela as usize) << 16,
            ihex::Record::EndOfFile => {
                terminated = true;
                break;
            }
            _ => (),
        }
    }
    if !terminated {
        return Err(String::from("Unexpected end of file"));
    }

    pieces.sort_by_key(|p| p.address);

    let mut segments = Vec::<Segment>::new();
    for piece in pieces.into_iter().filter(|p| !p.data.is_empty()) {
        if let Some(last) = segments.last_mut() {
            let last_end = last.address + last.data.len();
            if piece.address < last_end {
                return Err(format!("Overlapping data at 0x{:08x}", piece.address));
            }
            if piece.address == last_end {
                last.data.extend_from_slice(&piece.data);
                continue;
            }
        }
        segments.push(piece);
    }
    Ok(segments)
}

/// Lay out all segments as one contiguous image starting at the region base.
///
/// Gaps between segments read as erased flash.
pub fn flatten(segments: &[Segment], region: &Region) -> Result<Vec<u8>, String> {
    let base = region.base as usize;
    let end = base + region.size as usize;

    let mut image = Vec::<u8>::new();

    for s in segments {
        let s_end = s.address + s.data.len();
        if s.address < base || s_end > end {
            return Err(format!(
                "Segment 0x{:08x}..0x{:08x} is outside the application region 0x{:08x}..0x{:08x}",
                s.address, s_end, base, end
            ));
        }

        let off = s.address - base;
        if image.len() < off + s.data.len() {
            image.resize(off + s.data.len(), 0xff);
        }
        image[off..off + s.data.len()].copy_from_slice(&s.data);
    }

    if image.is_empty() {
        return Err(String::from("Image is empty"));
    }
    if segments.iter().all(|s| s.address != base) {
        log::warn!("Nothing placed at the application base 0x{base:08x}");
    }

    Ok(image)
}

/// Bytes at `address`, if every one of them is covered by a segment.
pub fn read_range(segments: &[Segment], address: usize, length: usize) -> Option<Vec<u8>> {
    let mut out = vec![0u8; length];
    let mut covered = vec![false; length];

    for s in segments {
        let lo = s.address.max(address);
        let hi = (s.address + s.data.len()).min(address + length);
        for a in lo..hi {
            out[a - address] = s.data[a - s.address];
            covered[a - address] = true;
        }
    }

    covered.iter().all(|c| *c).then_some(out)
}

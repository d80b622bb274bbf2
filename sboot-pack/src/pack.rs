//! Building the header and candidate image

use ihex::Record;

use sboot::checksum::CRC32;
use sboot::{FlashLayout, ImageHeader, BLOCK_SIZE};

pub struct Package {
    pub header: ImageHeader,
    pub payload: Vec<u8>,
}

impl Package {
    pub fn new(payload: Vec<u8>, layout: &FlashLayout) -> Result<Self, String> {
        let max = layout.max_image_size() as usize;
        if payload.len() > max {
            return Err(format!(
                "Image is {} bytes, only {} fit the candidate and application regions",
                payload.len(),
                max
            ));
        }

        let header = ImageHeader::new(CRC32.checksum(&payload), payload.len() as u32);
        log::info!(
            "Image: {} bytes, crc32 0x{:08x}",
            header.image_size,
            header.checksum
        );

        Ok(Self { header, payload })
    }
}

const RECORD_LEN: usize = 16;

fn push_data(records: &mut Vec<Record>, address: u32, data: &[u8]) {
    let mut upper: Option<u16> = None;
    let mut address = address;

    for chunk in data.chunks(RECORD_LEN) {
        // Records must not cross a 64K boundary.
        let room = 0x1_0000 - (address & 0xffff) as usize;
        let (first, rest) = chunk.split_at(chunk.len().min(room));

        for part in [first, rest] {
            if part.is_empty() {
                continue;
            }
            let ela = (address >> 16) as u16;
            if upper != Some(ela) {
                records.push(Record::ExtendedLinearAddress(ela));
                upper = Some(ela);
            }
            records.push(Record::Data {
                offset: address as u16,
                value: part.to_vec(),
            });
            address += part.len() as u32;
        }
    }
}

/// A single Intel HEX file holding header and payload at their flash addresses.
pub fn to_ihex(package: &Package, layout: &FlashLayout) -> Result<String, String> {
    let mut records = Vec::<Record>::new();

    push_data(&mut records, layout.header.base, &package.header.to_bytes());
    push_data(&mut records, layout.candidate.base, &package.payload);
    records.push(Record::EndOfFile);

    ihex::create_object_file_representation(&records)
        .or_else(|e| Err(format!("Could not encode Intel HEX ({e:?})")))
}

/// The header block followed by the payload, to be written at the header base.
pub fn to_bin(package: &Package, layout: &FlashLayout) -> Result<Vec<u8>, String> {
    if layout.header.end() != Some(layout.candidate.base) {
        return Err(format!(
            "Binary output needs the candidate right after the header, found it at 0x{:08x}",
            layout.candidate.base
        ));
    }

    let mut out = vec![0xff; BLOCK_SIZE];
    out[..sboot::header::HEADER_LEN].copy_from_slice(&package.header.to_bytes());
    out.extend_from_slice(&package.payload);
    Ok(out)
}

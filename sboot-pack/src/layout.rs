//! Flash map description files

use serde::Deserialize;

use sboot::{FlashLayout, Region, StackCheck};

#[derive(Debug, Deserialize)]
struct RegionSpec {
    base: u32,
    size: u32,
}

#[derive(Debug, Deserialize)]
struct StackSpec {
    mask: u32,
    base: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayoutFile {
    header: RegionSpec,
    candidate: RegionSpec,
    application: RegionSpec,
    stack: Option<StackSpec>,
}

impl From<RegionSpec> for Region {
    fn from(r: RegionSpec) -> Self {
        Region::new(r.base, r.size)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub flash: FlashLayout,
    pub stack: StackCheck,
}

pub fn parse(text: &str) -> Result<Layout, String> {
    let file: LayoutFile = toml::from_str(text).or_else(|e| Err(format!("Invalid layout ({e})")))?;

    let flash = FlashLayout {
        header: file.header.into(),
        candidate: file.candidate.into(),
        application: file.application.into(),
    };

    flash
        .validate()
        .or_else(|e| Err(format!("Unusable layout ({e:?}): {flash:x?}")))?;

    let stack = file
        .stack
        .map(|s| StackCheck {
            mask: s.mask,
            base: s.base,
        })
        .unwrap_or(StackCheck::CORTEX_M_SRAM);

    log::debug!("Layout: {flash:x?}");

    Ok(Layout { flash, stack })
}

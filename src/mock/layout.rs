//! Two slots of three areas each, followed by a single scratch area.

use std::{vec, vec::Vec};

use crate::{
    AreaIndex, FlashArea, ImageHeader, ImageVersion, Slot, SlotAreas,
    image::HEADER_SIZE,
    layout::BootRequest,
    mock::MockFlash,
};

pub const AREA_SIZE: u32 = 2048;

pub const PRIMARY: SlotAreas = SlotAreas {
    first: AreaIndex(0),
    count: 3,
};
pub const SECONDARY: SlotAreas = SlotAreas {
    first: AreaIndex(3),
    count: 3,
};
pub const SCRATCH: AreaIndex = AreaIndex(6);

pub const VERSION_A: ImageVersion = ImageVersion::new(1, 0, 0, 0);
pub const VERSION_B: ImageVersion = ImageVersion::new(2, 0, 0, 0);

pub fn request() -> BootRequest {
    BootRequest {
        areas: (0..7)
            .map(|i| FlashArea {
                offset: i * AREA_SIZE,
                length: AREA_SIZE,
            })
            .collect(),
        slots: [PRIMARY, SECONDARY],
        scratch: SCRATCH,
    }
}

/// Complete image of `size` bytes including its header, filled with a pattern unique to `seed`.
pub fn image(version: ImageVersion, size: usize, seed: u8) -> Vec<u8> {
    let header = ImageHeader::new(version, (size - HEADER_SIZE) as u32);
    let mut bytes = vec![0u8; size];
    bytes[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    for (i, byte) in bytes.iter_mut().enumerate().skip(HEADER_SIZE) {
        *byte = seed.wrapping_add((i % 251) as u8);
    }
    bytes
}

/// Program an image into a slot, returning its contents.
pub fn install(
    flash: &mut MockFlash,
    slot: Slot,
    version: ImageVersion,
    size: usize,
    seed: u8,
) -> Vec<u8> {
    let bytes = image(version, size, seed);
    let offset = request().image_addr(slot).unwrap_or(0);
    flash.program(offset, &bytes);
    bytes
}

/// Contents of a slot, truncated to `length` bytes.
pub fn slot_contents(flash: &MockFlash, slot: Slot, length: usize) -> Vec<u8> {
    let offset = request().image_addr(slot).unwrap_or(0);
    flash.contents(offset, length).to_vec()
}

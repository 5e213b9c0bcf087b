//! Static flash geometry: the areas, how they group into the two slots, and the scratch area.

use alloc::vec::Vec;

use crate::{AreaIndex, Invariant, Slot};

/// An erase-and-write granule of flash.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashArea {
    pub offset: u32,
    pub length: u32,
}

impl FlashArea {
    pub const fn end(&self) -> u32 {
        self.offset + self.length
    }
}

/// The areas making up a single slot.
///
/// The areas are consecutive in the area table and are expected to be in address order,
/// part `n` of an image being stored in `first + n`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotAreas {
    pub first: AreaIndex,
    pub count: u8,
}

impl SlotAreas {
    pub fn iter(&self) -> impl Iterator<Item = AreaIndex> + use<> {
        let first = self.first.0;
        (0..self.count).map(move |n| AreaIndex(first + n))
    }

    pub fn contains(&self, area: AreaIndex) -> bool {
        area.0 >= self.first.0 && area.0 - self.first.0 < self.count
    }
}

/// Description of the flash as supplied by the caller, immutable for a single boot attempt.
#[derive(Clone, Debug)]
pub struct BootRequest {
    /// All areas known to the bootloader.
    pub areas: Vec<FlashArea>,
    /// The areas of the primary and secondary slot.
    pub slots: [SlotAreas; 2],
    /// Spare area used as temporary storage while rotating two areas.
    pub scratch: AreaIndex,
}

impl BootRequest {
    /// Check the geometry before anything is read from or written to flash.
    pub fn validate(&self) -> Result<(), Invariant> {
        for slot in &self.slots {
            let end = slot.first.index() + slot.count as usize;
            if end > self.areas.len() || end > u8::MAX as usize {
                return Err(Invariant::AreaOutOfRange { area: slot.first });
            }
        }
        let scratch = self.area(self.scratch)?;

        let [primary, secondary] = &self.slots;
        if primary.iter().any(|area| secondary.contains(area))
            || primary.contains(self.scratch)
            || secondary.contains(self.scratch)
        {
            return Err(Invariant::SlotOverlap);
        }

        // Parts are copied 1:1 between the slots, so both need identical layouts.
        if primary.count != secondary.count {
            return Err(Invariant::SlotGeometryMismatch {
                primary: primary.first,
                secondary: secondary.first,
            });
        }
        for (a, b) in primary.iter().zip(secondary.iter()) {
            let length = self.area(a)?.length;
            if length != self.area(b)?.length {
                return Err(Invariant::SlotGeometryMismatch {
                    primary: a,
                    secondary: b,
                });
            }
            if length > scratch.length {
                return Err(Invariant::ScratchTooSmall { area: a });
            }
        }

        let image_areas = self.image_areas();
        let mut spans = Vec::with_capacity(image_areas.len());
        for &area in &image_areas {
            let desc = self.area(area)?;
            let end = desc
                .offset
                .checked_add(desc.length)
                .ok_or(Invariant::AreaOutOfRange { area })?;
            spans.push((area, desc.offset, end));
        }
        for (i, &(a, a_start, a_end)) in spans.iter().enumerate() {
            for &(b, b_start, b_end) in &spans[i + 1..] {
                if a_start < b_end && b_start < a_end {
                    return Err(Invariant::AreaOverlap { a, b });
                }
            }
        }

        Ok(())
    }

    pub fn area(&self, index: AreaIndex) -> Result<FlashArea, Invariant> {
        self.areas
            .get(index.index())
            .copied()
            .ok_or(Invariant::AreaOutOfRange { area: index })
    }

    pub fn slot_areas(&self, slot: Slot) -> SlotAreas {
        self.slots[slot.index()]
    }

    pub fn first_area(&self, slot: Slot) -> AreaIndex {
        self.slot_areas(slot).first
    }

    /// Address at which the image of a slot starts.
    pub fn image_addr(&self, slot: Slot) -> Result<u32, Invariant> {
        Ok(self.area(self.first_area(slot))?.offset)
    }

    /// Total number of bytes a slot can hold.
    pub fn slot_capacity(&self, slot: Slot) -> Result<u32, Invariant> {
        self.slot_areas(slot)
            .iter()
            .map(|area| self.area(area).map(|a| a.length))
            .sum()
    }

    /// The areas that take part in image storage, in journal order:
    /// the primary slot, the secondary slot, and finally the scratch area.
    pub fn image_areas(&self) -> Vec<AreaIndex> {
        self.slots
            .iter()
            .flat_map(SlotAreas::iter)
            .chain(core::iter::once(self.scratch))
            .collect()
    }

    pub fn image_area_count(&self) -> usize {
        self.slots.iter().map(|slot| slot.count as usize).sum::<usize>() + 1
    }

    /// Position of an area in the journal.
    pub fn journal_index(&self, area: AreaIndex) -> Option<usize> {
        let mut base = 0;
        for slot in &self.slots {
            if slot.contains(area) {
                return Some(base + (area.0 - slot.first.0) as usize);
            }
            base += slot.count as usize;
        }
        (area == self.scratch).then_some(base)
    }
}

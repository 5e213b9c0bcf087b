//! Swap journal, the persistent record of which image part lives in which flash area.
//!
//! The journal is the single source of truth for resuming an interrupted swap. It exists in storage
//! only while a swap is in progress: it is first stored when the first area changes owner, rewritten
//! after every single area mutation, and deleted once both slots hold complete images again.
//!
//! Any relocation must respect the following order:
//!
//! 1. erase and fill the destination area,
//! 2. update the journal in memory and store it,
//! 3. only then erase the source area.
//!
//! After a reset the contents of each area are therefore consistent with the last stored journal entry.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::{
    AreaIndex, Error, ImageNum, ImagePart, ImageVersion, Invariant, Slot, layout::BootRequest,
};

#[cfg(feature = "simple_state")]
pub mod simple;

/// Which image part currently occupies an area, if any.
pub type AreaAssignment = Option<ImagePart>;

/// State as stored by the bootloader while a swap is in progress.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SwapJournal {
    /// Total length in bytes of image 0 and image 1.
    pub lengths: [u32; 2],
    /// One entry per image area, in the order of [`BootRequest::image_areas`].
    pub entries: Vec<AreaAssignment>,
}

impl SwapJournal {
    /// Journal for flash where every slot holds its own image, with the given lengths.
    ///
    /// The areas of each slot are assigned increasing part numbers until the image length is covered,
    /// any remaining area is unassigned. An image of length 0 is absent.
    pub fn rebuild(request: &BootRequest, lengths: [u32; 2]) -> Result<Self, Invariant> {
        let mut journal = SwapJournal {
            lengths,
            entries: alloc::vec![None; request.image_area_count()],
        };

        for image in [ImageNum::ZERO, ImageNum::ONE] {
            let length = lengths[image.index()];
            let mut covered = 0u32;
            let mut areas = request.slot_areas(image.home()).iter();
            let mut part = 0u8;

            while covered < length {
                let area = areas.next().ok_or(Invariant::ImageTooLarge { image, length })?;
                journal.set(request, area, Some(ImagePart { image, part }))?;
                covered = covered.saturating_add(request.area(area)?.length);
                part += 1;
            }
        }

        Ok(journal)
    }

    pub fn length(&self, image: ImageNum) -> u32 {
        self.lengths[image.index()]
    }

    /// Image part currently stored in an area.
    pub fn assignment(
        &self,
        request: &BootRequest,
        area: AreaIndex,
    ) -> Result<AreaAssignment, Invariant> {
        request
            .journal_index(area)
            .and_then(|i| self.entries.get(i).copied())
            .ok_or(Invariant::AreaNotTracked { area })
    }

    pub fn set(
        &mut self,
        request: &BootRequest,
        area: AreaIndex,
        assignment: AreaAssignment,
    ) -> Result<(), Invariant> {
        let entry = request
            .journal_index(area)
            .and_then(|i| self.entries.get_mut(i))
            .ok_or(Invariant::AreaNotTracked { area })?;
        *entry = assignment;
        Ok(())
    }

    /// Area currently holding the given image part.
    pub fn find_part(&self, request: &BootRequest, part: ImagePart) -> Option<AreaIndex> {
        request
            .image_areas()
            .into_iter()
            .zip(self.entries.iter())
            .find(|(_, entry)| **entry == Some(part))
            .map(|(area, _)| area)
    }

    /// Number of parts image `image` is split into when stored in `slot`.
    pub fn part_count(&self, request: &BootRequest, image: ImageNum, slot: Slot) -> Result<u8, Invariant> {
        let length = self.length(image);
        let mut covered = 0u32;
        let mut count = 0u8;

        for area in request.slot_areas(slot).iter() {
            if covered >= length {
                break;
            }
            covered = covered.saturating_add(request.area(area)?.length);
            count += 1;
        }

        if covered < length {
            return Err(Invariant::ImageTooLarge { image, length });
        }

        Ok(count)
    }

    /// Check that the journal fits the geometry it is about to be used with.
    ///
    /// Every entry must name an image part that fits a slot, and no part may be assigned twice.
    pub fn check(&self, request: &BootRequest) -> Result<(), Invariant> {
        let expected = request.image_area_count();
        if self.entries.len() != expected {
            return Err(Invariant::JournalMismatch {
                stored: self.entries.len(),
                expected,
            });
        }

        for (i, (area, entry)) in request.image_areas().into_iter().zip(&self.entries).enumerate() {
            let Some(part) = *entry else {
                continue;
            };
            if part.image.index() > ImageNum::ONE.index()
                || part.part >= request.slot_areas(part.image.other().home()).count
            {
                return Err(Invariant::InvalidEntry { area, part });
            }
            if self.entries[..i].contains(entry) {
                return Err(Invariant::DuplicatePart { area, part });
            }
        }

        Ok(())
    }
}

/// Persistent storage for the swap journal, outside of the image areas.
///
/// Every call must be durable once it returns.
#[allow(async_fn_in_trait)]
pub trait JournalStore {
    async fn load_journal(&mut self) -> Result<Option<SwapJournal>, Error>;

    async fn store_journal(&mut self, journal: &SwapJournal) -> Result<(), Error>;

    async fn delete_journal(&mut self) -> Result<(), Error>;
}

/// Persistent preference for the image version the next boot should run.
///
/// The test entry is one-shot and consumed by the bootloader.
/// The main entry persists until it is found to be stale.
#[allow(async_fn_in_trait)]
pub trait BootVector {
    async fn read_test(&mut self) -> Result<Option<ImageVersion>, Error>;

    async fn delete_test(&mut self) -> Result<(), Error>;

    async fn read_main(&mut self) -> Result<Option<ImageVersion>, Error>;

    async fn delete_main(&mut self) -> Result<(), Error>;
}

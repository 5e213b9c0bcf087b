//! Relocation of image parts between flash areas, journalled at every step.
//!
//! A full swap fills the primary slot with image 1, part by part, and then the secondary slot with image 0.
//! Every part is either already in place, moved into a free area, or exchanged with the part occupying its
//! destination by rotating through the scratch area.
//!
//! The procedure only consults the journal to find where each part lives, so it can be started over
//! from any durably stored journal and will skip whatever was already done.

use embedded_storage_async::nor_flash::NorFlash;

use crate::{
    AreaIndex, Error, ImageNum, ImagePart, Invariant, Slot, layout::BootRequest, log,
    state::{JournalStore, SwapJournal},
};

pub mod copy;
pub mod swap_sabs;

/// Everything a relocation needs: the geometry, the flash, and the journal with its storage.
pub struct Swapper<'a, F, S> {
    request: &'a BootRequest,
    flash: &'a mut F,
    store: &'a mut S,
    journal: SwapJournal,
}

impl<'a, F: NorFlash, S: JournalStore> Swapper<'a, F, S> {
    pub fn new(
        request: &'a BootRequest,
        flash: &'a mut F,
        store: &'a mut S,
        journal: SwapJournal,
    ) -> Self {
        Self {
            request,
            flash,
            store,
            journal,
        }
    }

    pub fn journal(&self) -> &SwapJournal {
        &self.journal
    }

    pub fn into_journal(self) -> SwapJournal {
        self.journal
    }

    /// Make the in-memory journal durable. Must complete before the next erase.
    async fn persist(&mut self) -> Result<(), Error> {
        log::debug!("Storing journal");
        self.store.store_journal(&self.journal).await
    }

    /// Exchange the two images: image 1 ends up in the primary slot, image 0 in the secondary slot.
    ///
    /// Completes an interrupted swap when started from the journal that was stored last.
    pub async fn swap_images(&mut self) -> Result<(), Error> {
        log::info!(
            "Swapping images of {} and {} bytes",
            self.journal.length(ImageNum::ZERO),
            self.journal.length(ImageNum::ONE)
        );

        self.settle_scratch().await?;
        self.fill_slot(ImageNum::ONE, Slot::PRIMARY).await?;
        self.fill_slot(ImageNum::ZERO, Slot::SECONDARY).await?;

        log::info!("Swap complete");
        Ok(())
    }

    /// Place every part of `image` in the corresponding area of `slot`.
    pub async fn fill_slot(&mut self, image: ImageNum, slot: Slot) -> Result<(), Error> {
        let parts = self.journal.part_count(self.request, image, slot)?;
        let destinations = self.request.slot_areas(slot);

        for (part, dst) in (0..parts).zip(destinations.iter()) {
            let wanted = ImagePart { image, part };
            let src = self
                .journal
                .find_part(self.request, wanted)
                .ok_or(Error::BadImage(wanted))?;

            if src != dst {
                match self.journal.assignment(self.request, dst)? {
                    None => self.move_area(src, dst, wanted).await?,
                    Some(_) => self.rotate(src, dst).await?,
                }
            }

            self.settle_scratch().await?;
        }

        Ok(())
    }

    /// Area a part, currently held in `area`, occupies once the swap is complete.
    fn final_area(&self, area: AreaIndex, part: ImagePart) -> Result<AreaIndex, Invariant> {
        self.request
            .slots
            .get(part.image.other().home().index())
            .and_then(|slot| {
                slot.first
                    .0
                    .checked_add(part.part)
                    .map(AreaIndex)
                    .filter(|dst| slot.contains(*dst))
            })
            .ok_or(Invariant::InvalidEntry { area, part })
    }

    /// Finish the last phase of a rotate that was interrupted after its displaced part reached the scratch area.
    ///
    /// The displaced part can only leave the scratch area once the part that replaced it has vacated
    /// its own area, which is where the displaced part belongs.
    async fn settle_scratch(&mut self) -> Result<(), Error> {
        let scratch = self.request.scratch;
        let Some(part) = self.journal.assignment(self.request, scratch)? else {
            return Ok(());
        };

        let dst = self.final_area(scratch, part)?;
        if self.journal.assignment(self.request, dst)?.is_none() {
            log::info!("Completing interrupted rotate of {} into {}", part, dst);
            self.move_area(scratch, dst, part).await?;
        }

        Ok(())
    }

    fn check_tracked(&self, area: AreaIndex) -> Result<(), Invariant> {
        self.journal.assignment(self.request, area).map(|_| ())
    }
}

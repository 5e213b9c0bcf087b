//! Exchange the contents of two areas using 'S <- B, B <- A, A <- S'.
//!
//! In other bootloaders also called 'swap scratch'.
//! It employs the scratch area as temporary storage for the part displaced from `B`,
//! so that only a single spare area is needed regardless of the size of the images.
//!
//! Each of the three phases copies one area, records the new owner in the journal, and then erases the area it vacated.
//! This results in `A` and `B` enduring a single erasure each, whilst the scratch area endures two.
//!
//! A rotate interrupted after any phase is finished by the slot fill on the next boot:
//! after the first phase the part in `A` is simply moved into the now free `B`,
//! and after the second phase the part in the scratch area is moved into the now free `A`.

use embedded_storage_async::nor_flash::NorFlash;

use crate::{
    AreaIndex, Error, Invariant, log,
    state::JournalStore,
    strategies::Swapper,
};

impl<F: NorFlash, S: JournalStore> Swapper<'_, F, S> {
    /// Swap the parts held by `a` and `b`, both of which must be assigned.
    pub async fn rotate(&mut self, a: AreaIndex, b: AreaIndex) -> Result<(), Error> {
        let scratch = self.request.scratch;

        if a == b || a == scratch || b == scratch {
            return Err(Invariant::RotateOverlap { a, b }.into());
        }
        if let Some(occupant) = self.journal.assignment(self.request, scratch)? {
            log::error!("Cannot rotate {} and {}, scratch holds {}", a, b, occupant);
            return Err(Invariant::ScratchInUse { occupant }.into());
        }
        let part_a = self.journal.assignment(self.request, a)?;
        let part_b = self.journal.assignment(self.request, b)?;

        log::debug!("Rotating {} and {}", a, b);

        // S <- B. The scratch area is erased even when it is known to be blank,
        // a reset may have left a partial copy behind that the journal does not know about.
        log::debug!("Phase 1: {} to scratch", b);
        self.erase_area(scratch).await?;
        self.copy_area(b, scratch).await?;
        self.journal.set(self.request, scratch, part_b)?;
        self.journal.set(self.request, b, None)?;
        self.persist().await?;
        self.erase_area(b).await?;

        // B <- A. The destination was erased at the end of the previous phase.
        log::debug!("Phase 2: {} to {}", a, b);
        self.copy_area(a, b).await?;
        self.journal.set(self.request, b, part_a)?;
        self.journal.set(self.request, a, None)?;
        self.persist().await?;
        self.erase_area(a).await?;

        // A <- S.
        log::debug!("Phase 3: scratch to {}", a);
        self.copy_area(scratch, a).await?;
        self.journal.set(self.request, a, part_b)?;
        self.journal.set(self.request, scratch, None)?;
        self.persist().await?;
        self.erase_area(scratch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ImageNum, ImagePart, Slot,
        mock::{
            MockFlash,
            layout::{AREA_SIZE, VERSION_A, VERSION_B, install, request},
            store::MemoryStore,
        },
        state::SwapJournal,
    };

    const A: AreaIndex = AreaIndex(0);
    const B: AreaIndex = AreaIndex(3);

    #[test]
    fn rotate() {
        let request = request();
        let mut flash = MockFlash::new();
        let mut store = MemoryStore::default();
        let image_a = install(&mut flash, Slot::PRIMARY, VERSION_A, AREA_SIZE as usize, 0x01);
        let image_b = install(&mut flash, Slot::SECONDARY, VERSION_B, AREA_SIZE as usize, 0x02);
        let journal = SwapJournal::rebuild(&request, [AREA_SIZE, AREA_SIZE]).unwrap();

        let journal = embassy_futures::block_on(async {
            let mut swapper = Swapper::new(&request, &mut flash, &mut store, journal);
            swapper.rotate(A, B).await.unwrap();
            swapper.into_journal()
        });

        let part_a = Some(ImagePart {
            image: ImageNum::ZERO,
            part: 0,
        });
        let part_b = Some(ImagePart {
            image: ImageNum::ONE,
            part: 0,
        });

        assert_eq!(flash.contents(0, AREA_SIZE as usize), &image_b[..]);
        assert_eq!(flash.contents(3 * AREA_SIZE, AREA_SIZE as usize), &image_a[..]);
        assert_eq!(journal.assignment(&request, A), Ok(part_b));
        assert_eq!(journal.assignment(&request, B), Ok(part_a));
        assert_eq!(journal.assignment(&request, request.scratch), Ok(None));

        // One journal write per phase, never leaving both areas empty or holding the same part.
        assert_eq!(store.history.len(), 3);
        for journal in &store.history {
            let a = journal.assignment(&request, A).unwrap();
            let b = journal.assignment(&request, B).unwrap();
            assert!(a.is_some() || b.is_some());
            assert_ne!(a, b);
        }

        // Each area erased once, scratch twice.
        assert_eq!(flash.wear.get(0), 1);
        assert_eq!(flash.wear.get(3 * AREA_SIZE), 1);
        assert_eq!(flash.wear.get(6 * AREA_SIZE), 2);
        assert!(
            flash
                .contents(6 * AREA_SIZE, AREA_SIZE as usize)
                .iter()
                .all(|b| *b == 0xff)
        );
    }

    #[test]
    fn overlap() {
        let request = request();
        let mut flash = MockFlash::new();
        let mut store = MemoryStore::default();
        let journal = SwapJournal::rebuild(&request, [AREA_SIZE, AREA_SIZE]).unwrap();

        embassy_futures::block_on(async {
            let mut swapper = Swapper::new(&request, &mut flash, &mut store, journal);
            assert_eq!(
                swapper.rotate(A, A).await,
                Err(Error::Invariant(Invariant::RotateOverlap { a: A, b: A }))
            );
            assert_eq!(
                swapper.rotate(A, request.scratch).await,
                Err(Error::Invariant(Invariant::RotateOverlap {
                    a: A,
                    b: request.scratch
                }))
            );
        });
    }

    #[test]
    fn scratch_in_use() {
        let request = request();
        let mut flash = MockFlash::new();
        let mut store = MemoryStore::default();
        let mut journal = SwapJournal::rebuild(&request, [AREA_SIZE, 2 * AREA_SIZE]).unwrap();
        let displaced = ImagePart {
            image: ImageNum::ONE,
            part: 1,
        };
        journal.set(&request, AreaIndex(4), None).unwrap();
        journal.set(&request, request.scratch, Some(displaced)).unwrap();

        let result = embassy_futures::block_on(async {
            Swapper::new(&request, &mut flash, &mut store, journal)
                .rotate(A, B)
                .await
        });

        assert_eq!(
            result,
            Err(Error::Invariant(Invariant::ScratchInUse {
                occupant: displaced
            }))
        );
        assert_eq!(flash.wear.get(6 * AREA_SIZE), 0);
    }
}

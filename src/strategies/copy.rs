//! Moving a single image part into a free area.
//!
//! The destination is erased and filled first, then the journal records the part at its new location,
//! and only then the source is erased. If power is lost before the source is erased, the journal already
//! shows the part at its destination and the stale copy left in the source is never looked at again.

use embedded_storage_async::nor_flash::NorFlash;

use crate::{
    AreaIndex, Error, ImagePart, Invariant, log,
    state::JournalStore,
    strategies::Swapper,
};

/// Size of the buffer used for copying between areas, independent of the area size.
pub const COPY_BUFFER_SIZE: usize = 1024;

impl<F: NorFlash, S: JournalStore> Swapper<'_, F, S> {
    pub(crate) async fn erase_area(&mut self, area: AreaIndex) -> Result<(), Error> {
        let desc = self.request.area(area)?;
        self.flash
            .erase(desc.offset, desc.end())
            .await
            .map_err(Error::flash)
    }

    /// Copy the part held in `from` into `to`, which must have been erased.
    ///
    /// The scratch area may be larger than the part it holds, in which case only the length of the
    /// destination is copied back.
    pub(crate) async fn copy_area(&mut self, from: AreaIndex, to: AreaIndex) -> Result<(), Error> {
        let src = self.request.area(from)?;
        let dst = self.request.area(to)?;

        let length = if from == self.request.scratch {
            dst.length
        } else {
            src.length
        };
        if dst.length < length {
            return Err(Invariant::AreaTooSmall { from, to }.into());
        }

        let mut buf = [0u8; COPY_BUFFER_SIZE];
        let mut off = 0;
        while off < length {
            let chunk = (length - off).min(COPY_BUFFER_SIZE as u32);
            let buf = &mut buf[..chunk as usize];

            self.flash
                .read(src.offset + off, buf)
                .await
                .map_err(Error::flash)?;
            self.flash
                .write(dst.offset + off, buf)
                .await
                .map_err(Error::flash)?;

            off += chunk;
        }

        Ok(())
    }

    /// Move `part` from `src` into the unassigned area `dst`.
    pub async fn move_area(
        &mut self,
        src: AreaIndex,
        dst: AreaIndex,
        part: ImagePart,
    ) -> Result<(), Error> {
        self.check_tracked(src)?;
        if let Some(occupant) = self.journal.assignment(self.request, dst)? {
            log::error!("Cannot move {} into {}, holding {}", part, dst, occupant);
            return Err(Invariant::DestinationOccupied { area: dst, occupant }.into());
        }

        log::debug!("Moving {} from {} to {}", part, src, dst);

        self.erase_area(dst).await?;
        self.copy_area(src, dst).await?;

        self.journal.set(self.request, dst, Some(part))?;
        self.journal.set(self.request, src, None)?;
        self.persist().await?;

        self.erase_area(src).await
    }
}

//! Boot sequence: resume, inspect the slots, select an image, and bring it into the primary slot.
//!
//! ```text
//! Init -> ResumeCheck -> HeaderRead -> StatusBuild -> SlotSelect -> (FullSwap) -> Finalize -> Done
//! ```
//!
//! Any error returned leaves flash and journal in a state the next boot can resume from.

use embedded_storage_async::nor_flash::NorFlash;

use crate::{
    Error, Slot,
    boot::Boot,
    image::{ImageHeader, ImageVersion, read_header},
    layout::BootRequest,
    log,
    state::{BootVector, JournalStore, SwapJournal},
    strategies::Swapper,
};

/// Outcome of a successful boot attempt.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootResponse {
    /// Header of the image now stored in the primary slot.
    pub header: ImageHeader,
    /// Address to execute, the start of the primary slot.
    pub image_addr: u32,
}

impl BootResponse {
    /// Hand over control to the selected image.
    ///
    /// # Safety
    /// The primary slot must contain a valid image for the platform, which does not return.
    pub unsafe fn jump<B: Boot>(&self) -> ! {
        unsafe { B::boot(self.image_addr as *const u32) }
    }
}

/// Usable images found in each slot.
type Headers = [Option<ImageHeader>; 2];

/// Decide which image to run and move it into the primary slot.
///
/// Completes any swap interrupted by a reset before looking at the slots.
pub async fn boot_go<F, S>(
    request: &BootRequest,
    flash: &mut F,
    store: &mut S,
) -> Result<BootResponse, Error>
where
    F: NorFlash,
    S: JournalStore + BootVector,
{
    request.validate().inspect_err(|_e| {
        log::error!("Invalid flash geometry: {}", _e);
    })?;

    resume(request, flash, store).await?;

    let headers = read_headers(request, flash).await?;
    let lengths = headers.map(|h| h.map_or(0, |h| h.total_size()));
    let journal = SwapJournal::rebuild(request, lengths)?;

    let slot = select_slot(store, &headers).await?;
    let header = headers[slot.index()].ok_or(Error::NoImage)?;
    log::info!("Booting {} from {}", header.version, slot);

    if slot == Slot::SECONDARY {
        Swapper::new(request, flash, store, journal)
            .swap_images()
            .await?;
    }

    store.delete_journal().await?;

    Ok(BootResponse {
        header,
        image_addr: request.image_addr(Slot::PRIMARY)?,
    })
}

/// Finish a swap that was in progress when power was lost.
///
/// When an image part named by the journal cannot be found, the swap is abandoned and the
/// headers found on flash decide what is bootable.
async fn resume<F, S>(request: &BootRequest, flash: &mut F, store: &mut S) -> Result<(), Error>
where
    F: NorFlash,
    S: JournalStore,
{
    let Some(journal) = store.load_journal().await? else {
        return Ok(());
    };
    journal.check(request)?;

    log::info!("Resuming interrupted swap");
    match Swapper::new(request, flash, store, journal)
        .swap_images()
        .await
    {
        Err(Error::BadImage(_part)) => {
            log::warn!("Abandoning interrupted swap, {} is missing", _part);
            Ok(())
        }
        result => result.inspect_err(|_e| {
            log::error!("Failed to resume swap: {}", _e);
        }),
    }
}

/// Read the headers of both slots from flash.
///
/// A slot without a valid image, or with an image too large for the slots, is considered empty.
async fn read_headers<F: NorFlash>(request: &BootRequest, flash: &mut F) -> Result<Headers, Error> {
    let mut headers = [None; 2];

    for slot in [Slot::PRIMARY, Slot::SECONDARY] {
        let header = read_header(flash, request.image_addr(slot)?).await?;
        if !header.is_valid() {
            log::debug!("No image in {}", slot);
            continue;
        }
        if header.total_size() > request.slot_capacity(slot)? {
            log::warn!(
                "Image {} in {} does not fit, ignoring",
                header.version,
                slot
            );
            continue;
        }
        headers[slot.index()] = Some(header);
    }

    Ok(headers)
}

fn find_slot(headers: &Headers, version: &ImageVersion) -> Option<Slot> {
    [Slot::PRIMARY, Slot::SECONDARY]
        .into_iter()
        .find(|slot| headers[slot.index()].is_some_and(|h| h.version == *version))
}

/// Select the slot to boot, based on the boot vector.
///
/// The test vector is consumed whether or not it names an available image.
/// A main vector naming an unavailable image is stale and removed.
/// Without a usable vector the primary slot is preferred.
async fn select_slot<S: BootVector>(store: &mut S, headers: &Headers) -> Result<Slot, Error> {
    if let Some(version) = store.read_test().await? {
        store.delete_test().await?;
        match find_slot(headers, &version) {
            Some(slot) => return Ok(slot),
            None => log::warn!("Test image {} not found", version),
        }
    }

    if let Some(version) = store.read_main().await? {
        match find_slot(headers, &version) {
            Some(slot) => return Ok(slot),
            None => {
                log::warn!("Main image {} not found, removing", version);
                store.delete_main().await?;
            }
        }
    }

    [Slot::PRIMARY, Slot::SECONDARY]
        .into_iter()
        .find(|slot| headers[slot.index()].is_some())
        .ok_or_else(|| {
            log::error!("No image to boot");
            Error::NoImage
        })
}

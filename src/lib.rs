//! Power-fail safe image swapping for bootloaders with two image slots and a scratch area.
//!
//! The primary slot is the only place an image is executed from. When the secondary image is requested,
//! its contents are physically exchanged with the primary image one flash area at a time, using a single
//! scratch area as temporary storage. Every step of the exchange is recorded in a persistent journal,
//! so that a reset at any moment can be resumed on the next boot.
#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

use core::fmt;

use embedded_storage_async::nor_flash::{NorFlashError, NorFlashErrorKind};
use serde::{Deserialize, Serialize};

pub mod boot;
pub mod image;
pub mod layout;
pub mod loader;
pub mod state;
pub mod strategies;

#[cfg(test)]
mod mock;

pub use image::{ImageHeader, ImageVersion};
pub use layout::{BootRequest, FlashArea, SlotAreas};
pub use loader::{BootResponse, boot_go};
pub use state::{AreaAssignment, BootVector, JournalStore, SwapJournal};

#[cfg(feature = "defmt")]
pub(crate) use defmt as log;

#[cfg(feature = "log")]
pub(crate) use logger_crate as log;

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("The `defmt` and `log` features are mutually exclusive.");

#[cfg(not(any(feature = "log", feature = "defmt")))]
pub(crate) mod log {
    macro_rules! info {
        ( $( $x:expr ),* ) => {{}};
    }
    pub(crate) use info;
    macro_rules! debug {
        ( $( $x:expr ),* ) => {{}};
    }
    pub(crate) use debug;
    macro_rules! error {
        ( $( $x:expr ),* ) => {{}};
    }
    pub(crate) use error;
    macro_rules! warner {
        ( $( $x:expr ),* ) => {{}};
    }
    pub(crate) use warner as warn;
}

/// Index of a flash area in the area table of a [`BootRequest`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AreaIndex(pub u8);

impl AreaIndex {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Image slot with regards to the bootloader.
///
/// Only two slots exist. The primary slot is the one that is executed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Slot(pub(crate) u8);

impl Slot {
    pub const PRIMARY: Slot = Slot(0);
    pub const SECONDARY: Slot = Slot(1);

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of an image while it is being moved around.
///
/// Images are numbered after the slot they occupied when the swap started,
/// so image 1 is the image that is being brought into the primary slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageNum(pub(crate) u8);

impl ImageNum {
    pub const ZERO: ImageNum = ImageNum(0);
    pub const ONE: ImageNum = ImageNum(1);

    /// The image the swap exchanges this one with.
    pub const fn other(self) -> ImageNum {
        ImageNum(self.0 ^ 1)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The slot this image is stored in when no swap is in progress.
    pub const fn home(self) -> Slot {
        Slot(self.0)
    }
}

/// Segment of an image stored in exactly one flash area.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImagePart {
    pub image: ImageNum,
    pub part: u8,
}

/// Invariant that was found broken.
///
/// These indicate flash corruption or a mismatch between the caller's geometry and what is on flash.
/// No relocation is attempted after one of these is detected.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Invariant {
    /// An area index points outside the area table.
    AreaOutOfRange { area: AreaIndex },
    /// Two areas of the geometry share flash.
    AreaOverlap { a: AreaIndex, b: AreaIndex },
    /// The slots share an area, or a slot contains the scratch area.
    SlotOverlap,
    /// The slots differ in area count or area lengths.
    SlotGeometryMismatch { primary: AreaIndex, secondary: AreaIndex },
    /// The scratch area cannot hold the given slot area.
    ScratchTooSmall { area: AreaIndex },
    /// The area does not take part in image storage.
    AreaNotTracked { area: AreaIndex },
    /// A move destination still holds a live image part.
    DestinationOccupied { area: AreaIndex, occupant: ImagePart },
    /// A rotate was requested while the scratch area holds a live image part.
    ScratchInUse { occupant: ImagePart },
    /// A rotate was requested between an area and itself, or with the scratch area.
    RotateOverlap { a: AreaIndex, b: AreaIndex },
    /// The destination of a copy is shorter than the source.
    AreaTooSmall { from: AreaIndex, to: AreaIndex },
    /// An image does not fit the slot it should be placed in.
    ImageTooLarge { image: ImageNum, length: u32 },
    /// The stored journal does not match the number of areas in the geometry.
    JournalMismatch { stored: usize, expected: usize },
    /// A journal entry names an image or part that cannot exist in this geometry.
    InvalidEntry { area: AreaIndex, part: ImagePart },
    /// A journal entry names a part already assigned to an earlier area.
    DuplicatePart { area: AreaIndex, part: ImagePart },
}

/// Boot failure, surfaced to the embedding firmware instead of halting.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// The flash driver failed an erase, read or write.
    Flash(NorFlashErrorKind),
    /// The journal or boot vector storage failed.
    Storage,
    /// A part of an image could not be found in any area.
    BadImage(ImagePart),
    Invariant(Invariant),
    /// Neither slot holds a bootable image.
    NoImage,
}

impl Error {
    /// Convert the driver specific error into our error type.
    pub fn flash<E: NorFlashError>(e: E) -> Self {
        Error::Flash(e.kind())
    }
}

// `NorFlashErrorKind` has no `Format` implementation of its own.
#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", defmt::Display2Format(self))
    }
}

impl From<Invariant> for Error {
    fn from(invariant: Invariant) -> Self {
        Error::Invariant(invariant)
    }
}

impl fmt::Display for AreaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "area {}", self.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

impl fmt::Display for ImageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image {}", self.0)
    }
}

impl fmt::Display for ImagePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} part {}", self.image, self.part)
    }
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invariant::AreaOutOfRange { area } => write!(f, "{area} is not in the area table"),
            Invariant::AreaOverlap { a, b } => write!(f, "{a} overlaps {b}"),
            Invariant::SlotOverlap => write!(f, "slots overlap each other or the scratch area"),
            Invariant::SlotGeometryMismatch { primary, secondary } => {
                write!(f, "{primary} and {secondary} differ in length")
            }
            Invariant::ScratchTooSmall { area } => write!(f, "scratch is smaller than {area}"),
            Invariant::AreaNotTracked { area } => write!(f, "{area} is not an image area"),
            Invariant::DestinationOccupied { area, occupant } => {
                write!(f, "{area} still holds {occupant}")
            }
            Invariant::ScratchInUse { occupant } => write!(f, "scratch still holds {occupant}"),
            Invariant::RotateOverlap { a, b } => write!(f, "cannot rotate {a} with {b}"),
            Invariant::AreaTooSmall { from, to } => write!(f, "{to} cannot hold {from}"),
            Invariant::ImageTooLarge { image, length } => {
                write!(f, "{image} of {length} bytes does not fit its slot")
            }
            Invariant::JournalMismatch { stored, expected } => {
                write!(f, "journal has {stored} entries, expected {expected}")
            }
            Invariant::InvalidEntry { area, part } => {
                write!(f, "{area} is journalled to hold nonexistent {part}")
            }
            Invariant::DuplicatePart { area, part } => {
                write!(f, "{area} is journalled to hold {part} a second time")
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Flash(kind) => write!(f, "flash error: {kind:?}"),
            Error::Storage => write!(f, "journal storage error"),
            Error::BadImage(part) => write!(f, "{part} is missing"),
            Error::Invariant(invariant) => write!(f, "invariant violated: {invariant}"),
            Error::NoImage => write!(f, "no bootable image"),
        }
    }
}

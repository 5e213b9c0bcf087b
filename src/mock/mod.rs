pub mod layout;
pub mod store;

use core::cell::Cell;
use std::{collections::BTreeMap, rc::Rc, vec, vec::Vec};

use embedded_storage_async::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

#[derive(Debug)]
pub struct WearTracker(BTreeMap<u32, usize>);

impl WearTracker {
    pub const fn new() -> Self {
        WearTracker(BTreeMap::new())
    }

    pub fn increase(&mut self, page: u32) {
        if let Some(wear) = self.0.get_mut(&page) {
            *wear += 1;
        } else {
            self.0.insert(page, 1);
        }
    }

    /// Number of erasures endured by the page starting at `offset`.
    pub fn get(&self, offset: u32) -> usize {
        self.0
            .get(&(offset / MockFlash::PAGE_SIZE as u32))
            .copied()
            .unwrap_or(0)
    }
}

/// Shared budget of operations before the power is cut.
///
/// Flash and journal storage share a single budget, so that a power cut can land
/// between any two operations of a swap. Once exhausted every operation fails.
#[derive(Clone, Default, Debug)]
pub struct Power(Rc<Cell<Option<usize>>>);

impl Power {
    pub fn cut_after(&self, operations: usize) {
        self.0.set(Some(operations));
    }

    pub fn restore(&self) {
        self.0.set(None);
    }

    /// Account for a single operation, returning whether it may take place.
    pub fn consume(&self) -> bool {
        match self.0.get() {
            None => true,
            Some(0) => false,
            Some(n) => {
                self.0.set(Some(n - 1));
                true
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockError {
    NotAligned,
    OutOfBounds,
    PowerLoss,
}

impl NorFlashError for MockError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            MockError::NotAligned => NorFlashErrorKind::NotAligned,
            MockError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            MockError::PowerLoss => NorFlashErrorKind::Other,
        }
    }
}

/// NOR flash in memory: erasing sets all bits, writing can only clear them.
pub struct MockFlash {
    pub memory: Vec<u8>,
    pub wear: WearTracker,
    power: Power,
}

impl MockFlash {
    pub const PAGE_SIZE: usize = 1024;
    pub const CAPACITY: usize = 7 * layout::AREA_SIZE as usize;

    pub fn new() -> Self {
        Self::with_power(Power::default())
    }

    pub fn with_power(power: Power) -> Self {
        MockFlash {
            memory: vec![0xff; Self::CAPACITY],
            wear: WearTracker::new(),
            power,
        }
    }

    /// Put data on flash directly, as a programmer would.
    pub fn program(&mut self, offset: u32, bytes: &[u8]) {
        let offset = offset as usize;
        self.memory[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn contents(&self, offset: u32, length: usize) -> &[u8] {
        let offset = offset as usize;
        &self.memory[offset..offset + length]
    }

    fn check(&self, offset: u32, length: usize, align: usize) -> Result<(), MockError> {
        let offset = offset as usize;
        if length > Self::CAPACITY || offset > Self::CAPACITY - length {
            return Err(MockError::OutOfBounds);
        }
        if offset % align != 0 || length % align != 0 {
            return Err(MockError::NotAligned);
        }
        if !self.power.consume() {
            return Err(MockError::PowerLoss);
        }
        Ok(())
    }
}

impl ErrorType for MockFlash {
    type Error = MockError;
}

impl ReadNorFlash for MockFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check(offset, bytes.len(), Self::READ_SIZE)?;
        bytes.copy_from_slice(self.contents(offset, bytes.len()));
        Ok(())
    }

    fn capacity(&self) -> usize {
        Self::CAPACITY
    }
}

impl NorFlash for MockFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = Self::PAGE_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to {
            return Err(MockError::OutOfBounds);
        }
        self.check(from, (to - from) as usize, Self::ERASE_SIZE)?;

        for page in (from..to).step_by(Self::ERASE_SIZE) {
            self.wear.increase(page / Self::ERASE_SIZE as u32);
        }
        self.memory[from as usize..to as usize].fill(0xff);
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check(offset, bytes.len(), Self::WRITE_SIZE)?;

        let offset = offset as usize;
        for (cell, byte) in self.memory[offset..offset + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}

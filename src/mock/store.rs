use std::vec::Vec;

use crate::{
    Error, ImageVersion,
    mock::Power,
    state::{BootVector, JournalStore, SwapJournal},
};

/// Journal and boot vectors kept in memory, surviving simulated resets.
#[derive(Default, Debug)]
pub struct MemoryStore {
    pub journal: Option<SwapJournal>,
    pub test: Option<ImageVersion>,
    pub main: Option<ImageVersion>,
    /// Every journal that was durably stored, in order.
    pub history: Vec<SwapJournal>,
    power: Power,
}

impl MemoryStore {
    pub fn with_power(power: Power) -> Self {
        MemoryStore {
            power,
            ..Default::default()
        }
    }

    fn operate(&self) -> Result<(), Error> {
        if self.power.consume() {
            Ok(())
        } else {
            Err(Error::Storage)
        }
    }
}

impl JournalStore for MemoryStore {
    async fn load_journal(&mut self) -> Result<Option<SwapJournal>, Error> {
        self.operate()?;
        Ok(self.journal.clone())
    }

    async fn store_journal(&mut self, journal: &SwapJournal) -> Result<(), Error> {
        self.operate()?;
        self.journal = Some(journal.clone());
        self.history.push(journal.clone());
        Ok(())
    }

    async fn delete_journal(&mut self) -> Result<(), Error> {
        self.operate()?;
        self.journal = None;
        Ok(())
    }
}

impl BootVector for MemoryStore {
    async fn read_test(&mut self) -> Result<Option<ImageVersion>, Error> {
        self.operate()?;
        Ok(self.test)
    }

    async fn delete_test(&mut self) -> Result<(), Error> {
        self.operate()?;
        self.test = None;
        Ok(())
    }

    async fn read_main(&mut self) -> Result<Option<ImageVersion>, Error> {
        self.operate()?;
        Ok(self.main)
    }

    async fn delete_main(&mut self) -> Result<(), Error> {
        self.operate()?;
        self.main = None;
        Ok(())
    }
}

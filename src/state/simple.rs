//! Simple straightforward implementation of keeping the state.
//!
//! This implementation focusses on correctness and ease, contrary to efficiency and code size.
//! Leverages `sequential-storage` and `postcard` to store and serialize/deserialize the journal and the boot vectors.
//! Removing an item is done by storing a tombstone over it, hence no multiwrite support is required of the flash.

use core::ops::Range;

use alloc::{vec, vec::Vec};

use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::{
    cache::KeyPointerCache,
    map::{SerializationError, Value},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Error, ImageVersion, log,
    state::{BootVector, JournalStore, SwapJournal},
};

/// Keys of the items kept in the map.
mod key {
    pub const JOURNAL: u8 = 0;
    pub const TEST: u8 = 1;
    pub const MAIN: u8 = 2;

    pub const COUNT: usize = 3;
}

/// Bytes needed for the fixed part of a serialized journal and record, excluding the entries.
const JOURNAL_OVERHEAD: usize = 32;

/// Worst case serialized size of a single journal entry.
const ENTRY_SIZE: usize = 3;

/// An item as stored in the map.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
enum Record<T> {
    Cleared,
    Present(T),
}

impl<T> Record<T> {
    fn into_option(self) -> Option<T> {
        match self {
            Record::Cleared => None,
            Record::Present(value) => Some(value),
        }
    }
}

impl<'a, T: Serialize + DeserializeOwned> Value<'a> for Record<T> {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        let buffer = postcard::to_slice(self, buffer).map_err(|e| match e {
            postcard::Error::SerializeBufferFull => SerializationError::BufferTooSmall,
            // Unmapped error.
            _ => SerializationError::Custom(0),
        })?;

        Ok(buffer.len())
    }

    fn deserialize_from(buffer: &'a [u8]) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        postcard::from_bytes(buffer).map_err(|e| match e {
            // Provided buffer is too small.
            postcard::Error::DeserializeUnexpectedEnd => SerializationError::BufferTooSmall,
            // Data type mismatch between Value and what is stored on disk.
            postcard::Error::DeserializeBadVarint
            | postcard::Error::DeserializeBadBool
            | postcard::Error::DeserializeBadChar
            | postcard::Error::DeserializeBadUtf8
            | postcard::Error::DeserializeBadOption
            | postcard::Error::DeserializeBadEnum
            | postcard::Error::DeserializeBadEncoding => SerializationError::InvalidFormat,
            // Unmapped error.
            _ => SerializationError::Custom(0),
        })
    }
}

/// Journal and boot vector storage in a dedicated NOR flash partition.
///
/// `PAGES` is the number of erase pages in the partition.
pub struct SequentialStore<NVM: NorFlash, const PAGES: usize> {
    nvm: NVM,
    range: Range<u32>,
    cache: KeyPointerCache<PAGES, u8, { key::COUNT }>,
    buffer: Vec<u8>,
}

impl<NVM: NorFlash, const PAGES: usize> SequentialStore<NVM, PAGES> {
    /// Use the whole of `nvm` for storage, sized for a geometry with `image_areas` areas taking part in swaps.
    pub fn new(nvm: NVM, image_areas: usize) -> Self {
        let range = 0..nvm.capacity() as u32;
        // Items are padded up to the write size by the map.
        let size = (JOURNAL_OVERHEAD + image_areas * ENTRY_SIZE).next_multiple_of(NVM::WRITE_SIZE.max(1))
            + NVM::WRITE_SIZE;

        Self {
            nvm,
            range,
            cache: KeyPointerCache::new(),
            buffer: vec![0u8; size],
        }
    }

    /// Give back the underlying flash.
    pub fn release(self) -> NVM {
        self.nvm
    }

    async fn fetch<T: Serialize + DeserializeOwned>(&mut self, key: u8) -> Result<Option<T>, Error> {
        let record = sequential_storage::map::fetch_item::<u8, Record<T>, _>(
            &mut self.nvm,
            self.range.clone(),
            &mut self.cache,
            &mut self.buffer,
            &key,
        )
        .await
        .map_err(|_| {
            log::error!("Failed to fetch item {}", key);
            Error::Storage
        })?;

        Ok(record.and_then(Record::into_option))
    }

    async fn store<T: Serialize + DeserializeOwned>(
        &mut self,
        key: u8,
        record: &Record<T>,
    ) -> Result<(), Error> {
        sequential_storage::map::store_item::<u8, Record<T>, _>(
            &mut self.nvm,
            self.range.clone(),
            &mut self.cache,
            &mut self.buffer,
            &key,
            record,
        )
        .await
        .map_err(|_| {
            log::error!("Failed to store item {}", key);
            Error::Storage
        })
    }

    /// Remove an item, unless it is already absent, avoiding needless wear.
    async fn clear<T: Serialize + DeserializeOwned>(&mut self, key: u8) -> Result<(), Error> {
        if self.fetch::<T>(key).await?.is_some() {
            self.store::<T>(key, &Record::Cleared).await?;
        }
        Ok(())
    }

    /// Request a single boot of the image with `version`.
    pub async fn write_test(&mut self, version: ImageVersion) -> Result<(), Error> {
        log::debug!("Storing test vector {}", version);
        self.store(key::TEST, &Record::Present(version)).await
    }

    /// Request every following boot to run the image with `version`.
    pub async fn write_main(&mut self, version: ImageVersion) -> Result<(), Error> {
        log::debug!("Storing main vector {}", version);
        self.store(key::MAIN, &Record::Present(version)).await
    }
}

impl<NVM: NorFlash, const PAGES: usize> JournalStore for SequentialStore<NVM, PAGES> {
    async fn load_journal(&mut self) -> Result<Option<SwapJournal>, Error> {
        self.fetch(key::JOURNAL).await
    }

    async fn store_journal(&mut self, journal: &SwapJournal) -> Result<(), Error> {
        let record = Record::Present(journal.clone());
        self.store(key::JOURNAL, &record).await
    }

    async fn delete_journal(&mut self) -> Result<(), Error> {
        self.clear::<SwapJournal>(key::JOURNAL).await
    }
}

impl<NVM: NorFlash, const PAGES: usize> BootVector for SequentialStore<NVM, PAGES> {
    async fn read_test(&mut self) -> Result<Option<ImageVersion>, Error> {
        self.fetch(key::TEST).await
    }

    async fn delete_test(&mut self) -> Result<(), Error> {
        self.clear::<ImageVersion>(key::TEST).await
    }

    async fn read_main(&mut self) -> Result<Option<ImageVersion>, Error> {
        self.fetch(key::MAIN).await
    }

    async fn delete_main(&mut self) -> Result<(), Error> {
        self.clear::<ImageVersion>(key::MAIN).await
    }
}

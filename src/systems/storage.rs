//! Key/value persistence for the configuration, on top of `sequential-storage`.

use core::ops::Range;

use derive_more::From;
use embassy_embedded_hal::adapter::BlockingAsync;
use embassy_futures::block_on;
use embedded_storage::nor_flash::NorFlash;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use sequential_storage::{cache::NoCache, map::SerializationError};
use serde::{Deserialize, Serialize};

const BUFFER_SIZE: usize = 160;
type Cache = NoCache;

/// Bumped whenever [`crate::systems::config::Settings`] changes shape.
pub const CONFIG_VERSION: u8 = 0x21;

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug)]
struct Marker {
    version: u8,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum StorageKey {
    Marker = 0x01,
    Settings = 0x02,
}

pub trait StorageEntry: Serialize + for<'a> Deserialize<'a> {
    const KEY: StorageKey;
}

impl StorageEntry for Marker {
    const KEY: StorageKey = StorageKey::Marker;
}

impl sequential_storage::map::Key for StorageKey {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        if buffer.is_empty() {
            return Err(SerializationError::BufferTooSmall);
        }

        buffer[0] = u8::from(*self);
        Ok(1)
    }

    fn deserialize_from(buffer: &[u8]) -> Result<(Self, usize), SerializationError> {
        let Some(&determinator) = buffer.first() else {
            return Err(SerializationError::InvalidFormat);
        };

        let key = StorageKey::try_from_primitive(determinator)
            .map_err(|_| SerializationError::InvalidData)?;
        Ok((key, 1))
    }
}

struct Wrapper<T: StorageEntry>(T);

impl<'a, T: StorageEntry> sequential_storage::map::Value<'a> for Wrapper<T> {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        let buffer =
            postcard::to_slice(&self.0, buffer).map_err(|_| SerializationError::BufferTooSmall)?;
        Ok(buffer.len())
    }

    fn deserialize_from(buffer: &'_ [u8]) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        let inner = postcard::from_bytes(buffer).map_err(|_| SerializationError::InvalidData)?;
        Ok(Wrapper(inner))
    }
}

#[derive(From, Debug)]
pub enum Error<E> {
    Serialization(SerializationError),
    Flash(sequential_storage::Error<E>),
}

/// A flash region holding versioned entries. Writes rotate through the
/// region's slots, so repeated stores of the same key wear it evenly.
pub struct Storage<S: NorFlash> {
    flash: BlockingAsync<S>,
    range: Range<u32>,
    cache: Cache,
}

impl<S: NorFlash> Storage<S> {
    pub fn new(flash: S, range: Range<u32>) -> Self {
        Self {
            flash: BlockingAsync::new(flash),
            range,
            cache: Cache::new(),
        }
    }

    /// Check the version marker, erasing the region and writing a fresh
    /// marker if it is missing or stale. Returns `true` if the region was reset.
    pub fn ensure_initialized(&mut self) -> Result<bool, Error<S::Error>> {
        match self.fetch::<Marker>() {
            Ok(Some(Marker { version })) if version == CONFIG_VERSION => {
                log::debug!("Marker detected");
                return Ok(false);
            }
            Ok(Some(Marker { version })) => {
                log::warn!("Config version {:#x} is stale, migrating", version);
            }
            Ok(None) => {
                log::warn!("No marker detected");
            }
            Err(e) => {
                log::error!("Failed to ensure storage: {:?}", e);
            }
        }

        self.erase()?;

        log::debug!("Storing marker");
        self.store(Marker {
            version: CONFIG_VERSION,
        })?;

        log::info!("Storage initialized");

        Ok(true)
    }

    pub fn erase(&mut self) -> Result<(), Error<S::Error>> {
        log::debug!("Erasing storage");
        block_on(sequential_storage::erase_all(
            &mut self.flash,
            self.range.clone(),
        ))?;
        Ok(())
    }

    pub fn fetch<T: StorageEntry>(&mut self) -> Result<Option<T>, Error<S::Error>> {
        let mut buffer = [0u8; BUFFER_SIZE];
        let res: Result<Option<Wrapper<T>>, sequential_storage::Error<S::Error>> =
            block_on(sequential_storage::map::fetch_item(
                &mut self.flash,
                self.range.clone(),
                &mut self.cache,
                &mut buffer,
                T::KEY,
            ));
        let res = res?;

        Ok(res.map(|x| x.0))
    }

    pub fn store<T: StorageEntry>(&mut self, value: T) -> Result<(), Error<S::Error>> {
        let mut buffer = [0u8; BUFFER_SIZE];
        block_on(sequential_storage::map::store_item(
            &mut self.flash,
            self.range.clone(),
            &mut self.cache,
            &mut buffer,
            T::KEY,
            &Wrapper(value),
        ))?;
        Ok(())
    }
}

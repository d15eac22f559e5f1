use super::{memory::MemoryStorage, StorageAdapters, StorageError};
use crate::context::Context;

/// Test-only adapter: behaves like the memory backend until the
/// configured read, then fails. URI form: `faulty://<n>` fails the n-th
/// read (1-based, defaulting to the first).
#[derive(Debug)]
pub struct FaultyStorage {
    inner: MemoryStorage,
    fail_on_read: u64,
    reads: u64,
}

impl FaultyStorage {
    pub fn open(location: &str) -> Self {
        Self {
            inner: MemoryStorage::open(),
            fail_on_read: location.parse().unwrap_or(1),
            reads: 0,
        }
    }

    pub fn write(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        self.inner.write(key, context)
    }

    pub fn read(&mut self, key: &str) -> Result<Context, StorageError> {
        self.reads += 1;
        if self.reads == self.fail_on_read {
            return Err(StorageError::Malformed("injected read failure".to_owned()));
        }

        self.inner.read(key)
    }

    pub fn update(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        self.inner.update(key, context)
    }

    pub fn close(self) -> Result<(), StorageError> {
        self.inner.close()
    }
}

pub fn faulty_factory(uri: &str) -> Result<StorageAdapters, StorageError> {
    let location = uri.split_once("://").map(|(_, rest)| rest).unwrap_or("1");

    Ok(StorageAdapters::Faulty(FaultyStorage::open(location)))
}

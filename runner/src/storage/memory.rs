use super::StorageError;
use crate::context::Context;
use std::collections::BTreeMap;

/// In-process map, the baseline every persistent backend is compared
/// against.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    contexts: BTreeMap<String, Context>,
}

impl MemoryStorage {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn write(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        self.contexts.insert(key.to_owned(), context.clone());

        Ok(())
    }

    pub fn read(&mut self, key: &str) -> Result<Context, StorageError> {
        self.contexts
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::MissingContext(key.to_owned()))
    }

    pub fn update(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        if !self.contexts.contains_key(key) {
            return Err(StorageError::MissingContext(key.to_owned()));
        }
        self.contexts.insert(key.to_owned(), context.clone());

        Ok(())
    }

    pub fn close(self) -> Result<(), StorageError> {
        Ok(())
    }
}

use super::StorageError;
use crate::context::Context;
use std::{
    fs,
    io::ErrorKind,
    path::PathBuf,
};
use tracing::debug;

/// One JSON file per context key inside the configured directory. Flat
/// files cannot be updated in place, so `update` rewrites the whole
/// record.
#[derive(Debug)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    pub fn open(directory: &str) -> Result<Self, StorageError> {
        let directory = PathBuf::from(directory);
        fs::create_dir_all(&directory)?;
        debug!(directory = %directory.display(), "Opened file storage");

        Ok(Self { directory })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.json"))
    }

    pub fn write(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        let body = serde_json::to_vec(context)?;
        fs::write(self.path(key), body)?;

        Ok(())
    }

    pub fn read(&mut self, key: &str) -> Result<Context, StorageError> {
        let body = match fs::read(self.path(key)) {
            Ok(body) => body,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(StorageError::MissingContext(key.to_owned()))
            }
            Err(error) => return Err(error.into()),
        };

        Ok(serde_json::from_slice(&body)?)
    }

    pub fn update(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        if !self.path(key).is_file() {
            return Err(StorageError::MissingContext(key.to_owned()));
        }

        self.write(key, context)
    }

    pub fn close(self) -> Result<(), StorageError> {
        Ok(())
    }
}

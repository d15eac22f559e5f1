#[cfg(feature = "clickhouse")]
pub mod clickhouse;
#[cfg(test)]
pub mod faulty;
pub mod file;
pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::context::Context;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Unknown storage scheme in '{0}'")]
    UnknownScheme(String),
    #[error("No storage factory registered for {module}::{name}")]
    UnknownFactory { module: String, name: String },
    #[error("No context stored under '{0}'")]
    MissingContext(String),
    #[error("Stored context is malformed: {0}")]
    Malformed(String),
    #[error("Failed to serialize context: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Storage IO failed: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[cfg(feature = "clickhouse")]
    #[error("ClickHouse error: {0}")]
    ClickHouse(#[from] ::clickhouse::error::Error),
}

/// Whether two adapter instances over the same URI may be driven
/// concurrently without contending on a shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// Same-URI instances share state (a file, an embedded database);
    /// benchmarks over that URI must run back to back.
    Exclusive,
    /// Same-URI instances are independent, or a server serializes access
    /// for us.
    Shared,
}

/// All storage adapter variants, one per backend family. Backend choice
/// happens at construction time, so a closed enum is enough and keeps
/// dispatch free of trait objects.
#[derive(Debug)]
pub enum StorageAdapters {
    Memory(memory::MemoryStorage),
    File(file::FileStorage),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteStorage),
    #[cfg(feature = "mongodb")]
    Mongo(mongo::MongoStorage),
    #[cfg(feature = "clickhouse")]
    ClickHouse(clickhouse::ClickHouseStorage),
    #[cfg(test)]
    Faulty(faulty::FaultyStorage),
}

impl StorageAdapters {
    /// Create or overwrite the record under `key`.
    pub fn write(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        match self {
            Self::Memory(storage) => storage.write(key, context),
            Self::File(storage) => storage.write(key, context),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(storage) => storage.write(key, context),
            #[cfg(feature = "mongodb")]
            Self::Mongo(storage) => storage.write(key, context),
            #[cfg(feature = "clickhouse")]
            Self::ClickHouse(storage) => storage.write(key, context),
            #[cfg(test)]
            Self::Faulty(storage) => storage.write(key, context),
        }
    }

    /// Return a context equal in content to the last successful
    /// write/update under `key`.
    pub fn read(&mut self, key: &str) -> Result<Context, StorageError> {
        match self {
            Self::Memory(storage) => storage.read(key),
            Self::File(storage) => storage.read(key),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(storage) => storage.read(key),
            #[cfg(feature = "mongodb")]
            Self::Mongo(storage) => storage.read(key),
            #[cfg(feature = "clickhouse")]
            Self::ClickHouse(storage) => storage.read(key),
            #[cfg(test)]
            Self::Faulty(storage) => storage.read(key),
        }
    }

    /// Bring the existing record under `key` up to date with `context`,
    /// appending new dialog turns instead of rewriting where the backend
    /// allows it.
    pub fn update(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        match self {
            Self::Memory(storage) => storage.update(key, context),
            Self::File(storage) => storage.update(key, context),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(storage) => storage.update(key, context),
            #[cfg(feature = "mongodb")]
            Self::Mongo(storage) => storage.update(key, context),
            #[cfg(feature = "clickhouse")]
            Self::ClickHouse(storage) => storage.update(key, context),
            #[cfg(test)]
            Self::Faulty(storage) => storage.update(key, context),
        }
    }

    /// Release all connections and resources. Consumes the adapter, so it
    /// is called exactly once.
    pub fn close(self) -> Result<(), StorageError> {
        match self {
            Self::Memory(storage) => storage.close(),
            Self::File(storage) => storage.close(),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(storage) => storage.close(),
            #[cfg(feature = "mongodb")]
            Self::Mongo(storage) => storage.close(),
            #[cfg(feature = "clickhouse")]
            Self::ClickHouse(storage) => storage.close(),
            #[cfg(test)]
            Self::Faulty(storage) => storage.close(),
        }
    }

    pub fn concurrency(&self) -> Concurrency {
        match self {
            Self::Memory(_) => Concurrency::Shared,
            Self::File(_) => Concurrency::Exclusive,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => Concurrency::Exclusive,
            #[cfg(feature = "mongodb")]
            Self::Mongo(_) => Concurrency::Shared,
            #[cfg(feature = "clickhouse")]
            Self::ClickHouse(_) => Concurrency::Shared,
            #[cfg(test)]
            Self::Faulty(_) => Concurrency::Shared,
        }
    }
}

/// Concurrency safety by URI scheme, available before an adapter is
/// constructed; the set executor uses this to group benchmarks.
pub fn uri_concurrency(uri: &str) -> Concurrency {
    match split_uri(uri).map(|(scheme, _)| scheme) {
        Some("file") | Some("sqlite") => Concurrency::Exclusive,
        _ => Concurrency::Shared,
    }
}

fn split_uri(uri: &str) -> Option<(&str, &str)> {
    uri.split_once("://")
}

/// Build an adapter from a URI, dispatching on its scheme. This is the
/// factory the registry seeds itself with.
pub fn storage_factory(uri: &str) -> Result<StorageAdapters, StorageError> {
    let (scheme, location) =
        split_uri(uri).ok_or_else(|| StorageError::UnknownScheme(uri.to_owned()))?;

    match scheme {
        "memory" => Ok(StorageAdapters::Memory(memory::MemoryStorage::open())),
        "file" => Ok(StorageAdapters::File(file::FileStorage::open(location)?)),
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(StorageAdapters::Sqlite(sqlite::SqliteStorage::open(
            location,
        )?)),
        #[cfg(feature = "mongodb")]
        // the driver wants the full URI, scheme included
        "mongodb" | "mongodb+srv" => {
            Ok(StorageAdapters::Mongo(mongo::MongoStorage::open(uri)?))
        }
        #[cfg(feature = "clickhouse")]
        "clickhouse" => Ok(StorageAdapters::ClickHouse(
            clickhouse::ClickHouseStorage::open(location)?,
        )),
        _ => Err(StorageError::UnknownScheme(uri.to_owned())),
    }
}

pub type StorageFactory = fn(&str) -> Result<StorageAdapters, StorageError>;

static FACTORIES: Lazy<RwLock<BTreeMap<(String, String), StorageFactory>>> = Lazy::new(|| {
    let mut factories = BTreeMap::new();
    factories.insert(
        (
            DEFAULT_FACTORY_MODULE.to_owned(),
            DEFAULT_FACTORY.to_owned(),
        ),
        storage_factory as StorageFactory,
    );

    RwLock::new(factories)
});

pub use ctxbench_analysis::report::{DEFAULT_FACTORY, DEFAULT_FACTORY_MODULE};

/// Make an additional adapter factory available under a module/name pair.
/// Meant to be called at process start, before any benchmark references
/// the entry.
pub fn register(module: &str, name: &str, factory: StorageFactory) {
    FACTORIES
        .write()
        .insert((module.to_owned(), name.to_owned()), factory);
}

/// Look up the factory a `db_factory` config refers to.
pub fn resolve(module: &str, name: &str) -> Result<StorageFactory, StorageError> {
    FACTORIES
        .read()
        .get(&(module.to_owned(), name.to_owned()))
        .copied()
        .ok_or_else(|| StorageError::UnknownFactory {
            module: module.to_owned(),
            name: name.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn roundtrip(adapter: &mut StorageAdapters) {
        let mut context = Context::generate(2, &[2, 2], &[1]);

        adapter.write("ctx", &context).unwrap();
        assert_eq!(adapter.read("ctx").unwrap(), context);

        context.grow_to(4, &[2, 2]);
        adapter.update("ctx", &context).unwrap();
        let stored = adapter.read("ctx").unwrap();
        assert_eq!(stored.dialog_len(), 4);
        assert_eq!(stored, context);
    }

    #[test]
    fn memory_adapter_roundtrips() {
        let mut adapter = storage_factory("memory://").unwrap();
        assert_eq!(adapter.concurrency(), Concurrency::Shared);
        roundtrip(&mut adapter);
        adapter.close().unwrap();
    }

    #[test]
    fn file_adapter_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file://{}", dir.path().join("contexts").display());

        let mut adapter = storage_factory(&uri).unwrap();
        assert_eq!(adapter.concurrency(), uri_concurrency(&uri));
        roundtrip(&mut adapter);
        adapter.close().unwrap();
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_adapter_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("sqlite://{}", dir.path().join("bench.db").display());

        let mut adapter = storage_factory(&uri).unwrap();
        roundtrip(&mut adapter);
        adapter.close().unwrap();
    }

    #[test]
    fn reading_an_unknown_key_is_a_missing_context() {
        let mut adapter = storage_factory("memory://").unwrap();

        assert!(matches!(
            adapter.read("nope"),
            Err(StorageError::MissingContext(_))
        ));
    }

    #[test]
    fn updating_an_unknown_key_is_a_missing_context() {
        let mut adapter = storage_factory("memory://").unwrap();
        let context = Context::generate(1, &[], &[]);

        assert!(matches!(
            adapter.update("nope", &context),
            Err(StorageError::MissingContext(_))
        ));
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        assert!(matches!(
            storage_factory("carrier-pigeon://coop"),
            Err(StorageError::UnknownScheme(_))
        ));
        assert!(matches!(
            storage_factory("no-scheme-at-all"),
            Err(StorageError::UnknownScheme(_))
        ));
    }

    #[test]
    fn registry_resolves_the_default_factory() {
        let factory = resolve(DEFAULT_FACTORY_MODULE, DEFAULT_FACTORY).unwrap();
        let adapter = factory("memory://").unwrap();

        assert!(matches!(adapter, StorageAdapters::Memory(_)));
    }

    #[test]
    fn registry_rejects_unknown_entries() {
        assert!(matches!(
            resolve("somewhere::else", "build"),
            Err(StorageError::UnknownFactory { .. })
        ));
    }

    #[test]
    fn registered_factories_take_part_in_resolution() {
        register("ctxbench_tests::storage", "faulty_factory", faulty::faulty_factory);

        let factory = resolve("ctxbench_tests::storage", "faulty_factory").unwrap();
        let adapter = factory("faulty://1").unwrap();
        assert!(matches!(adapter, StorageAdapters::Faulty(_)));
    }

    #[test]
    fn scheme_concurrency_guards_shared_resources() {
        assert_eq!(uri_concurrency("file:///tmp/ctx"), Concurrency::Exclusive);
        assert_eq!(uri_concurrency("sqlite:///tmp/b.db"), Concurrency::Exclusive);
        assert_eq!(uri_concurrency("memory://"), Concurrency::Shared);
        assert_eq!(uri_concurrency("mongodb://localhost"), Concurrency::Shared);
    }
}

use super::StorageError;
use crate::context::Context;
use ::clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

const TABLE: &str = "ctxbench_contexts";

#[derive(Row, Serialize, Deserialize)]
struct ContextRow {
    id: String,
    rev: u32,
    body: String,
}

/// Distributed table backend over the ClickHouse HTTP interface. The
/// table is append-only, so writes and updates insert a new revision and
/// reads fetch the highest one.
pub struct ClickHouseStorage {
    client: Client,
    // the crate's client is async; a current-thread runtime drives it
    // from the runner's synchronous call sites
    runtime: Runtime,
    revisions: BTreeMap<String, u32>,
}

impl fmt::Debug for ClickHouseStorage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClickHouseStorage")
            .field("table", &TABLE)
            .finish_non_exhaustive()
    }
}

impl ClickHouseStorage {
    /// `location` is the URI with its scheme stripped: `host:port` or
    /// `host:port/database`.
    pub fn open(location: &str) -> Result<Self, StorageError> {
        let (address, database) = match location.split_once('/') {
            Some((address, database)) if !database.is_empty() => (address, database),
            _ => (location.trim_end_matches('/'), "default"),
        };

        let runtime = Builder::new_current_thread().enable_all().build()?;
        let client = Client::default()
            .with_url(format!("http://{address}"))
            .with_database(database);

        runtime.block_on(
            client
                .query(
                    "create table if not exists ctxbench_contexts
                     (id String, rev UInt32, body String)
                     engine = MergeTree order by (id, rev)",
                )
                .execute(),
        )?;
        debug!(address = address, database = database, "Connected to ClickHouse");

        Ok(Self {
            client,
            runtime,
            revisions: BTreeMap::new(),
        })
    }

    fn insert(&self, row: &ContextRow) -> Result<(), StorageError> {
        self.runtime.block_on(async {
            let mut insert = self.client.insert(TABLE)?;
            insert.write(row).await?;
            insert.end().await
        })?;

        Ok(())
    }

    pub fn write(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        let row = ContextRow {
            id: key.to_owned(),
            rev: 0,
            body: serde_json::to_string(context)?,
        };
        self.insert(&row)?;
        self.revisions.insert(key.to_owned(), 0);

        Ok(())
    }

    pub fn read(&mut self, key: &str) -> Result<Context, StorageError> {
        let row = self.runtime.block_on(
            self.client
                .query(
                    "select ?fields from ctxbench_contexts
                     where id = ? order by rev desc limit 1",
                )
                .bind(key)
                .fetch_one::<ContextRow>(),
        );

        let row = match row {
            Ok(row) => row,
            Err(::clickhouse::error::Error::RowNotFound) => {
                return Err(StorageError::MissingContext(key.to_owned()))
            }
            Err(error) => return Err(error.into()),
        };

        Ok(serde_json::from_str(&row.body)?)
    }

    pub fn update(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        let rev = self
            .revisions
            .get(key)
            .copied()
            .ok_or_else(|| StorageError::MissingContext(key.to_owned()))?
            + 1;

        let row = ContextRow {
            id: key.to_owned(),
            rev,
            body: serde_json::to_string(context)?,
        };
        self.insert(&row)?;
        self.revisions.insert(key.to_owned(), rev);

        Ok(())
    }

    pub fn close(self) -> Result<(), StorageError> {
        drop(self.client);
        self.runtime.shutdown_background();
        debug!("Closed ClickHouse client");

        Ok(())
    }
}

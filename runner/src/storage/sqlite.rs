use super::StorageError;
use crate::context::Context;
use rusqlite::{params, Connection, Transaction};
use tracing::{debug, error};

pub const SQL_SCHEMA: [&str; 2] = [
    "create table if not exists contexts (
    id text primary key,
    misc text not null
);",
    "create table if not exists turns (
    ctx_id text not null references contexts (id),
    turn integer not null,
    flow text not null,
    node text not null,
    request text not null,
    response text not null,
    primary key (ctx_id, turn)
);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();

/// Relational backend: one `contexts` row per key plus one `turns` row
/// per dialog turn, so an update only inserts the turns added since the
/// last write.
#[derive(Debug)]
pub struct SqliteStorage {
    connection: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let connection = Connection::open(path)?;

        let mut counter = 1;
        for table in SQL_SCHEMA {
            match connection.execute(table, []) {
                Ok(_) => debug!("Applied SQL schema ({counter}/{SQL_SCHEMA_NUMBER})"),
                Err(error) => {
                    error!(error = ?error, table = table, "Failed to apply SQL schema ({counter}/{SQL_SCHEMA_NUMBER}): {error}");

                    return Err(StorageError::Sqlite(error));
                }
            };

            counter += 1;
        }

        Ok(Self { connection })
    }

    pub fn write(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        let misc = serde_json::to_string(&context.misc)?;

        let tx = self.connection.transaction()?;
        tx.execute("delete from turns where ctx_id = ?", params![key])?;
        tx.execute(
            "insert or replace into contexts (id, misc) values (?, ?)",
            params![key, misc],
        )?;
        insert_turns(&tx, key, context, -1)?;
        tx.commit()?;

        Ok(())
    }

    pub fn read(&mut self, key: &str) -> Result<Context, StorageError> {
        let misc: String = match self
            .connection
            .prepare_cached("select misc from contexts where id = ?")?
            .query_row(params![key], |row| row.get(0))
        {
            Ok(misc) => misc,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(StorageError::MissingContext(key.to_owned()))
            }
            Err(error) => return Err(error.into()),
        };

        let mut context = Context::with_misc(serde_json::from_str(&misc)?);

        let mut statement = self.connection.prepare_cached(
            "select turn, flow, node, request, response from turns
             where ctx_id = ? order by turn",
        )?;
        let turns = statement.query_map(params![key], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        for turn in turns {
            let (turn, flow, node, request, response) = turn?;
            context.insert_turn(
                turn as u64,
                (flow, node),
                serde_json::from_str(&request)?,
                serde_json::from_str(&response)?,
            );
        }

        Ok(context)
    }

    pub fn update(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        let tx = self.connection.transaction()?;

        let known: i64 = tx
            .prepare_cached("select count(*) from contexts where id = ?")?
            .query_row(params![key], |row| row.get(0))?;
        if known == 0 {
            return Err(StorageError::MissingContext(key.to_owned()));
        }

        // only turns beyond the stored high-water mark are inserted; the
        // misc payload never changes after the initial write
        let stored: i64 = tx
            .prepare_cached("select coalesce(max(turn), -1) from turns where ctx_id = ?")?
            .query_row(params![key], |row| row.get(0))?;
        insert_turns(&tx, key, context, stored)?;
        tx.commit()?;

        Ok(())
    }

    pub fn close(mut self) -> Result<(), StorageError> {
        let mut counter = 0;
        while let Err((connection, error)) = self.connection.close() {
            counter += 1;
            self.connection = connection;
            error!(error = ?error, "Failed to close SQLite connection: {error}, trying again {counter}/3");

            if counter == 3 {
                return Err(StorageError::Sqlite(error));
            }
        }

        debug!("Closed SQLite connection");

        Ok(())
    }
}

fn insert_turns(
    tx: &Transaction,
    key: &str,
    context: &Context,
    after: i64,
) -> Result<(), StorageError> {
    let mut statement = tx.prepare_cached(
        "insert into turns (ctx_id, turn, flow, node, request, response)
         values (?, ?, ?, ?, ?, ?)",
    )?;

    for (turn, label, request, response) in context.turns() {
        if (turn as i64) <= after {
            continue;
        }

        statement.execute(params![
            key,
            turn as i64,
            label.0,
            label.1,
            serde_json::to_string(request)?,
            serde_json::to_string(response)?,
        ])?;
    }

    Ok(())
}

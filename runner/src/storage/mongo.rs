use super::StorageError;
use crate::context::{Context, Message};
use mongodb::{
    bson::{doc, Bson, Document},
    options::ReplaceOptions,
    sync::{Client, Collection},
};
use std::{collections::BTreeMap, fmt};
use tracing::debug;

const COLLECTION: &str = "contexts";

/// Document backend: one document per context with the dialog turns in an
/// embedded array, so an update is a `$push` of only the new turns.
pub struct MongoStorage {
    collection: Collection<Document>,
    // dialog lengths this adapter has already written, per key; lets an
    // update push the tail without a server round trip first
    turns_written: BTreeMap<String, u64>,
}

impl fmt::Debug for MongoStorage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MongoStorage")
            .field("namespace", &self.collection.namespace())
            .finish_non_exhaustive()
    }
}

impl MongoStorage {
    pub fn open(uri: &str) -> Result<Self, StorageError> {
        let client = Client::with_uri_str(uri)?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database("ctxbench"));
        let collection = database.collection::<Document>(COLLECTION);

        // the driver connects lazily; touch the collection so a dead
        // server fails construction instead of the first timed write
        collection.estimated_document_count(None)?;
        debug!(namespace = %collection.namespace(), "Connected to MongoDB");

        Ok(Self {
            collection,
            turns_written: BTreeMap::new(),
        })
    }

    pub fn write(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        let mut turns = Vec::new();
        for (turn, label, request, response) in context.turns() {
            turns.push(Bson::Document(turn_document(turn, label, request, response)?));
        }

        let document = doc! {
            "_id": key,
            "misc": serde_json::to_string(&context.misc)?,
            "turns": turns,
        };
        let options = ReplaceOptions::builder().upsert(true).build();
        self.collection
            .replace_one(doc! { "_id": key }, document, options)?;
        self.turns_written
            .insert(key.to_owned(), context.dialog_len());

        Ok(())
    }

    pub fn read(&mut self, key: &str) -> Result<Context, StorageError> {
        let document = self
            .collection
            .find_one(doc! { "_id": key }, None)?
            .ok_or_else(|| StorageError::MissingContext(key.to_owned()))?;

        let misc = document
            .get_str("misc")
            .map_err(|_| StorageError::Malformed("document misses 'misc'".to_owned()))?;
        let mut context = Context::with_misc(serde_json::from_str(misc)?);

        let turns = document
            .get_array("turns")
            .map_err(|_| StorageError::Malformed("document misses 'turns'".to_owned()))?;
        for entry in turns {
            let turn = entry
                .as_document()
                .ok_or_else(|| StorageError::Malformed("turn entry is not a document".to_owned()))?;

            let index = turn
                .get_i64("turn")
                .map_err(|_| StorageError::Malformed("turn misses its index".to_owned()))?;
            let flow = turn
                .get_str("flow")
                .map_err(|_| StorageError::Malformed("turn misses 'flow'".to_owned()))?;
            let node = turn
                .get_str("node")
                .map_err(|_| StorageError::Malformed("turn misses 'node'".to_owned()))?;
            let request: Message = serde_json::from_str(
                turn.get_str("request")
                    .map_err(|_| StorageError::Malformed("turn misses 'request'".to_owned()))?,
            )?;
            let response: Message = serde_json::from_str(
                turn.get_str("response")
                    .map_err(|_| StorageError::Malformed("turn misses 'response'".to_owned()))?,
            )?;

            context.insert_turn(
                index as u64,
                (flow.to_owned(), node.to_owned()),
                request,
                response,
            );
        }

        Ok(context)
    }

    pub fn update(&mut self, key: &str, context: &Context) -> Result<(), StorageError> {
        let written = *self
            .turns_written
            .get(key)
            .ok_or_else(|| StorageError::MissingContext(key.to_owned()))?;

        let mut new_turns = Vec::new();
        for (turn, label, request, response) in context.turns() {
            if turn < written {
                continue;
            }
            new_turns.push(Bson::Document(turn_document(turn, label, request, response)?));
        }

        if !new_turns.is_empty() {
            let update = doc! { "$push": { "turns": { "$each": new_turns } } };
            let result = self.collection.update_one(doc! { "_id": key }, update, None)?;
            if result.matched_count == 0 {
                return Err(StorageError::MissingContext(key.to_owned()));
            }
        }
        self.turns_written
            .insert(key.to_owned(), context.dialog_len());

        Ok(())
    }

    pub fn close(self) -> Result<(), StorageError> {
        // the sync client has no explicit shutdown; dropping it tears the
        // connection pool down
        debug!("Closed MongoDB client");

        Ok(())
    }
}

fn turn_document(
    turn: u64,
    label: &(String, String),
    request: &Message,
    response: &Message,
) -> Result<Document, StorageError> {
    Ok(doc! {
        "turn": turn as i64,
        "flow": label.0.as_str(),
        "node": label.1.as_str(),
        "request": serde_json::to_string(request)?,
        "response": serde_json::to_string(response)?,
    })
}

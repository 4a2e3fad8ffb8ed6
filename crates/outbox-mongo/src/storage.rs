//! `outbox-core` storage adapter contract (§4.1) backed by the official
//! `mongodb` driver.
//!
//! There is no row-level lock in a document store, so the lock-skip read is
//! an atomic `findOneAndUpdate` that only matches documents not currently
//! held by another worker's lease, stamping a fresh `lock_token`/
//! `locked_until` in the same update (§3.1). `update_event` clears the lease
//! again once the handler run is recorded.

use crate::row::{CandidateDoc, EventDoc};
use async_trait::async_trait;
use bson::{doc, Bson, DateTime as BsonDateTime, Document};
use chrono::Utc;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, ClientSession, Collection, IndexModel};
use outbox_core::{BoxError, CandidateEvent, Event, ReadSide, TransactionalWriteSide, WriteTransaction};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const DEFAULT_BATCH_SIZE: i64 = 200;
/// How long a claim holds before another worker is allowed to steal it back,
/// covering a worker that crashes mid-transaction (§3.1).
const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct MongoStorage {
    client: Client,
    collection: Collection<Document>,
    batch_size: i64,
    lock_lease: Duration,
}

impl MongoStorage {
    pub fn new(client: Client, collection: Collection<Document>) -> Self {
        Self {
            client,
            collection,
            batch_size: DEFAULT_BATCH_SIZE,
            lock_lease: DEFAULT_LOCK_LEASE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_lock_lease(mut self, lock_lease: Duration) -> Self {
        self.lock_lease = lock_lease;
        self
    }

    fn not_backed_off(now: BsonDateTime) -> Document {
        doc! { "$or": [ { "backoff_until": Bson::Null }, { "backoff_until": { "$lt": now } } ] }
    }
}

#[async_trait]
impl ReadSide for MongoStorage {
    async fn get_events_to_process(
        &self,
        max_errors: u32,
        _cancel: &CancellationToken,
    ) -> Result<Vec<CandidateEvent>, BoxError> {
        let now = BsonDateTime::from_chrono(Utc::now());
        let filter = doc! {
            "$and": [
                { "processed_at": Bson::Null },
                { "errors": { "$lt": max_errors as i32 } },
                Self::not_backed_off(now),
            ]
        };
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": 1 })
            .limit(self.batch_size)
            .projection(doc! { "_id": 1, "errors": 1 })
            .build();

        let typed: Collection<CandidateDoc> = self.collection.clone_with_type();
        let mut cursor = typed.find(filter).with_options(options).await.map_err(box_err)?;

        let mut candidates = Vec::new();
        while cursor.advance().await.map_err(box_err)? {
            let doc = cursor.deserialize_current().map_err(box_err)?;
            candidates.push(CandidateEvent::from(doc));
        }
        Ok(candidates)
    }
}

#[async_trait]
impl TransactionalWriteSide for MongoStorage {
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>, BoxError> {
        let mut session = self.client.start_session().await.map_err(box_err)?;
        session.start_transaction().await.map_err(box_err)?;
        Ok(Box::new(MongoTransaction {
            session,
            collection: self.collection.clone(),
            lock_lease: self.lock_lease,
        }))
    }
}

pub struct MongoTransaction {
    session: ClientSession,
    collection: Collection<Document>,
    lock_lease: Duration,
}

#[async_trait]
impl WriteTransaction for MongoTransaction {
    async fn get_event_by_id_for_update_skip_locked(
        &mut self,
        id: &str,
        max_errors: u32,
        _cancel: &CancellationToken,
    ) -> Result<Option<Event>, BoxError> {
        let now = Utc::now();
        let now_bson = BsonDateTime::from_chrono(now);
        let claimed_until = BsonDateTime::from_chrono(now + chrono::Duration::from_std(self.lock_lease).unwrap());

        let filter = doc! {
            "$and": [
                { "_id": id },
                { "processed_at": Bson::Null },
                { "errors": { "$lt": max_errors as i32 } },
                MongoStorage::not_backed_off(now_bson),
                { "$or": [ { "lock_token": Bson::Null }, { "locked_until": { "$lt": now_bson } } ] },
            ]
        };
        let update = doc! {
            "$set": { "lock_token": Uuid::new_v4().to_string(), "locked_until": claimed_until },
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let typed: Collection<EventDoc> = self.collection.clone_with_type();
        let found = typed
            .find_one_and_update(filter, update)
            .with_options(options)
            .session(&mut self.session)
            .await
            .map_err(box_err)?;

        match found {
            Some(doc) => Ok(Some(doc.into_event().map_err(box_err)?)),
            None => Ok(None),
        }
    }

    async fn update_event(&mut self, event: &Event) -> Result<(), BoxError> {
        let doc = EventDoc::from_event(event).map_err(box_err)?;
        let filter = doc! { "_id": &event.id };
        let update = doc! {
            "$set": {
                "handler_results": doc.handler_results,
                "errors": doc.errors,
                "backoff_until": doc.backoff_until,
                "processed_at": doc.processed_at,
            },
            "$unset": { "lock_token": "", "locked_until": "" },
        };

        self.collection
            .update_one(filter, update)
            .session(&mut self.session)
            .await
            .map_err(box_err)?;
        Ok(())
    }

    async fn create_event(&mut self, event: &Event) -> Result<(), BoxError> {
        let doc = EventDoc::from_event(event).map_err(box_err)?;
        let bson_doc = bson::to_document(&doc).map_err(box_err)?;

        self.collection
            .insert_one(bson_doc)
            .session(&mut self.session)
            .await
            .map_err(box_err)?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), BoxError> {
        self.session.commit_transaction().await.map_err(box_err)
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), BoxError> {
        self.session.abort_transaction().await.map_err(box_err)
    }
}

fn box_err<E>(err: E) -> BoxError
where
    E: std::error::Error + Send + Sync + 'static,
{
    Box::new(err)
}

/// Creates the index backing the poll read's performance contract (§6): a
/// partial index over unprocessed documents only, the document-store
/// equivalent of `outbox-postgres`'s `events_unprocessed_idx`.
pub async fn ensure_indexes(collection: &Collection<Document>) -> Result<(), BoxError> {
    let index = IndexModel::builder()
        .keys(doc! { "timestamp": 1 })
        .options(
            IndexOptions::builder()
                .partial_filter_expression(doc! { "processed_at": Bson::Null })
                .build(),
        )
        .build();
    collection.create_index(index).await.map_err(box_err)?;
    Ok(())
}

//! Mirror Writer
//!
//! Applies translated operations to the target collection. Never returns
//! an error: failures are logged, counted and dropped. Nothing is retried
//! beyond the insert → replace fallback, and nothing is queued.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bson::{doc, Document};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::db::filter::strip_undefined;
use crate::db::store::{DocumentStore, ID_FIELD};
use crate::types::{MirrorError, Result};

/// Unit of work handed to the writer
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOperation {
    /// Insert, or replace by identity when the document already exists
    Upsert(Document),
    /// Delete at most one matching target document
    DeleteOne(Document),
    /// Delete every matching target document
    DeleteMany(Document),
}

impl MirrorOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upsert(_) => "upsert",
            Self::DeleteOne(_) => "delete_one",
            Self::DeleteMany(_) => "delete_many",
        }
    }
}

impl fmt::Display for MirrorOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upsert(doc) | Self::DeleteOne(doc) | Self::DeleteMany(doc) => {
                write!(f, "{} {}", self.kind(), doc)
            }
        }
    }
}

/// What the writer ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// Upsert created the target document
    Inserted,
    /// Upsert replaced an existing target document
    Replaced,
    /// Delete completed, possibly removing nothing
    Deleted(u64),
    /// Operation was logged and dropped
    Failed,
}

/// Counters for mirror activity
#[derive(Debug, Default)]
pub struct MirrorStats {
    inserted: AtomicU64,
    replaced: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
}

impl MirrorStats {
    fn record(&self, outcome: MirrorOutcome) {
        match outcome {
            MirrorOutcome::Inserted => self.inserted.fetch_add(1, Ordering::Relaxed),
            MirrorOutcome::Replaced => self.replaced.fetch_add(1, Ordering::Relaxed),
            MirrorOutcome::Deleted(n) => self.deleted.fetch_add(n, Ordering::Relaxed),
            MirrorOutcome::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Count a failure raised before an operation reached the writer
    pub(crate) fn record_failure(&self) {
        self.record(MirrorOutcome::Failed);
    }

    pub fn snapshot(&self) -> MirrorStatsSnapshot {
        MirrorStatsSnapshot {
            inserted: self.inserted.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MirrorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStatsSnapshot {
    pub inserted: u64,
    pub replaced: u64,
    pub deleted: u64,
    pub failed: u64,
}

/// Applies mirror operations to the target collection
#[derive(Clone)]
pub struct MirrorWriter {
    target: Arc<dyn DocumentStore>,
    stats: Arc<MirrorStats>,
}

impl MirrorWriter {
    pub fn new(target: Arc<dyn DocumentStore>) -> Self {
        Self::with_stats(target, Arc::new(MirrorStats::default()))
    }

    pub(crate) fn with_stats(target: Arc<dyn DocumentStore>, stats: Arc<MirrorStats>) -> Self {
        Self { target, stats }
    }

    pub fn target(&self) -> &Arc<dyn DocumentStore> {
        &self.target
    }

    pub fn stats(&self) -> MirrorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Apply an operation, logging instead of failing
    pub async fn mirror(&self, operation: MirrorOperation) -> MirrorOutcome {
        let kind = operation.kind();

        let outcome = match self.apply(operation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    collection = self.target.name(),
                    operation = kind,
                    error = %e,
                    "error migrating document"
                );
                MirrorOutcome::Failed
            }
        };

        self.stats.record(outcome);
        outcome
    }

    async fn apply(&self, operation: MirrorOperation) -> Result<MirrorOutcome> {
        match operation {
            MirrorOperation::Upsert(doc) => self.upsert(strip_undefined(doc)).await,
            MirrorOperation::DeleteOne(filter) => {
                let deleted = self.target.delete_one(filter.clone()).await?;
                debug!(collection = self.target.name(), filter = %filter, deleted, "mirrored delete_one");
                Ok(MirrorOutcome::Deleted(deleted))
            }
            MirrorOperation::DeleteMany(filter) => {
                let deleted = self.target.delete_many(filter.clone()).await?;
                debug!(collection = self.target.name(), filter = %filter, deleted, "mirrored delete_many");
                Ok(MirrorOutcome::Deleted(deleted))
            }
        }
    }

    async fn upsert(&self, doc: Document) -> Result<MirrorOutcome> {
        let id = doc
            .get(ID_FIELD)
            .cloned()
            .ok_or_else(|| MirrorError::InvalidShape(format!("upsert without {}: {}", ID_FIELD, doc)))?;

        let insert_error = match self.target.insert_one(doc.clone()).await {
            Ok(_) => {
                debug!(collection = self.target.name(), id = %id, "mirrored insert");
                return Ok(MirrorOutcome::Inserted);
            }
            Err(e) => e,
        };

        debug!(
            collection = self.target.name(),
            id = %id,
            error = %insert_error,
            "cannot save new document, trying to update..."
        );

        let outcome = self
            .target
            .replace_one(doc! { ID_FIELD: id.clone() }, doc, false)
            .await?;

        if outcome.matched == 0 {
            warn!(
                collection = self.target.name(),
                id = %id,
                "fallback update matched no target document"
            );
            return Err(insert_error);
        }

        Ok(MirrorOutcome::Replaced)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::memory::MemoryCollection;
    use crate::db::store::{ReturnDocument, UpdateOutcome};
    use crate::mirror::unique::UniqueIndexes;
    use async_trait::async_trait;
    use bson::Bson;

    /// Target that refuses every operation
    pub(crate) struct BrokenStore;

    #[async_trait]
    impl DocumentStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        async fn insert_one(&self, _doc: Document) -> Result<Bson> {
            Err(MirrorError::Database("connection refused".into()))
        }
        async fn find_one(&self, _filter: Document) -> Result<Option<Document>> {
            Err(MirrorError::Database("connection refused".into()))
        }
        async fn find(&self, _filter: Document) -> Result<Vec<Document>> {
            Err(MirrorError::Database("connection refused".into()))
        }
        async fn update_one(&self, _filter: Document, _update: Document) -> Result<UpdateOutcome> {
            Err(MirrorError::Database("connection refused".into()))
        }
        async fn replace_one(&self, _filter: Document, _doc: Document, _upsert: bool) -> Result<UpdateOutcome> {
            Err(MirrorError::Database("connection refused".into()))
        }
        async fn delete_one(&self, _filter: Document) -> Result<u64> {
            Err(MirrorError::Database("connection refused".into()))
        }
        async fn delete_many(&self, _filter: Document) -> Result<u64> {
            Err(MirrorError::Database("connection refused".into()))
        }
        async fn find_one_and_update(
            &self,
            _filter: Document,
            _update: Document,
            _return_document: ReturnDocument,
        ) -> Result<Option<Document>> {
            Err(MirrorError::Database("connection refused".into()))
        }
        async fn find_one_and_delete(&self, _filter: Document) -> Result<Option<Document>> {
            Err(MirrorError::Database("connection refused".into()))
        }
    }

    fn target() -> Arc<MemoryCollection> {
        Arc::new(MemoryCollection::new("users_v2", UniqueIndexes::new([["username"]])))
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let target = target();
        let writer = MirrorWriter::new(target.clone());
        let doc = doc! { "_id": 1, "username": "haha", "name": "John Sun" };

        assert_eq!(writer.mirror(MirrorOperation::Upsert(doc.clone())).await, MirrorOutcome::Inserted);
        let once = target.find(doc! {}).await.unwrap();

        assert_eq!(writer.mirror(MirrorOperation::Upsert(doc.clone())).await, MirrorOutcome::Replaced);
        let twice = target.find(doc! {}).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice, vec![doc]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_changed_document() {
        let target = target();
        let writer = MirrorWriter::new(target.clone());

        writer
            .mirror(MirrorOperation::Upsert(doc! { "_id": 1, "username": "haha", "name": "John Sun" }))
            .await;
        writer
            .mirror(MirrorOperation::Upsert(doc! { "_id": 1, "username": "haha", "name": "Yu-Jen Sun" }))
            .await;

        let stored = target.find_one(doc! { "_id": 1 }).await.unwrap().unwrap();
        assert_eq!(stored.get_str("name").unwrap(), "Yu-Jen Sun");
        assert_eq!(target.len().await, 1);
        assert_eq!(
            writer.stats(),
            MirrorStatsSnapshot { inserted: 1, replaced: 1, deleted: 0, failed: 0 }
        );
    }

    #[tokio::test]
    async fn test_upsert_strips_undefined_fields() {
        let target = target();
        let writer = MirrorWriter::new(target.clone());

        writer
            .mirror(MirrorOperation::Upsert(doc! {
                "_id": 1,
                "username": "haha",
                "name": Bson::Undefined,
                "profile": { "email": Bson::Undefined, "city": "Taipei" },
            }))
            .await;

        let stored = target.find_one(doc! { "_id": 1 }).await.unwrap().unwrap();
        assert!(!stored.contains_key("name"));
        assert_eq!(stored.get_document("profile").unwrap(), &doc! { "city": "Taipei" });
    }

    #[tokio::test]
    async fn test_conflicting_upsert_is_dropped() {
        let target = target();
        let writer = MirrorWriter::new(target.clone());

        writer
            .mirror(MirrorOperation::Upsert(doc! { "_id": 1, "username": "haha" }))
            .await;

        // Different identity, same unique username: insert fails, fallback matches nothing
        let outcome = writer
            .mirror(MirrorOperation::Upsert(doc! { "_id": 2, "username": "haha" }))
            .await;
        assert_eq!(outcome, MirrorOutcome::Failed);
        assert_eq!(target.len().await, 1);
        assert_eq!(writer.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_deletes_tolerate_no_match() {
        let target = target();
        let writer = MirrorWriter::new(target.clone());

        assert_eq!(
            writer.mirror(MirrorOperation::DeleteOne(doc! { "username": "ghost" })).await,
            MirrorOutcome::Deleted(0)
        );
        assert_eq!(
            writer.mirror(MirrorOperation::DeleteMany(doc! { "name": "ghost" })).await,
            MirrorOutcome::Deleted(0)
        );
        assert_eq!(writer.stats().failed, 0);
    }

    #[tokio::test]
    async fn test_broken_target_never_errors() {
        let writer = MirrorWriter::new(Arc::new(BrokenStore));

        for operation in [
            MirrorOperation::Upsert(doc! { "_id": 1, "username": "haha" }),
            MirrorOperation::DeleteOne(doc! { "_id": 1 }),
            MirrorOperation::DeleteMany(doc! { "name": "n" }),
        ] {
            assert_eq!(writer.mirror(operation).await, MirrorOutcome::Failed);
        }
        assert_eq!(writer.stats().failed, 3);
    }

    #[test]
    fn test_operation_display() {
        let op = MirrorOperation::DeleteMany(doc! { "name": "n" });
        assert_eq!(op.kind(), "delete_many");
        assert!(op.to_string().starts_with("delete_many"));
    }
}

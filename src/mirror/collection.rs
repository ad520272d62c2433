//! Legacy collection adapter
//!
//! `MirroredCollection` is what application code writes through. Every
//! mutation calls the engine's gate first, runs on the legacy collection,
//! then hands the committed result to the engine. Legacy errors and
//! uniqueness rejections propagate; mirror failures never do.

use std::sync::Arc;

use bson::{doc, oid::ObjectId, Document};
use tracing::debug;

use crate::db::store::{DocumentStore, ReturnDocument, UpdateOutcome, ID_FIELD};
use crate::mirror::interceptor::{MirrorEngine, Mutation};
use crate::types::{MirrorError, Result};

/// Legacy collection with write-path mirroring attached
#[derive(Clone)]
pub struct MirroredCollection {
    legacy: Arc<dyn DocumentStore>,
    engine: Arc<MirrorEngine>,
}

impl MirroredCollection {
    pub fn new(legacy: Arc<dyn DocumentStore>, engine: Arc<MirrorEngine>) -> Self {
        Self { legacy, engine }
    }

    pub fn legacy(&self) -> &Arc<dyn DocumentStore> {
        &self.legacy
    }

    pub fn engine(&self) -> &Arc<MirrorEngine> {
        &self.engine
    }

    /// Create or fully rewrite a document
    ///
    /// A document without `_id` gets a fresh `ObjectId`. Returns the saved
    /// document.
    pub async fn save(&self, mut doc: Document) -> Result<Document> {
        if !doc.contains_key(ID_FIELD) {
            doc.insert(ID_FIELD, ObjectId::new());
        }
        let id = doc.get(ID_FIELD).cloned().unwrap_or_default();

        self.legacy
            .replace_one(doc! { ID_FIELD: id }, doc.clone(), true)
            .await?;

        self.engine.after(self.legacy.as_ref(), Mutation::Save(doc.clone())).await;
        Ok(doc)
    }

    /// Save several documents, stopping at the first legacy failure
    pub async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let mut saved = Vec::with_capacity(docs.len());
        for doc in docs {
            saved.push(self.save(doc).await?);
        }
        Ok(saved)
    }

    /// `updateOne` keyed by a filter that must certify unique
    pub async fn update_one(&self, filter: Document, update: Document) -> Result<UpdateOutcome> {
        self.engine.before(&Mutation::QueryUpdate(filter.clone()))?;

        let outcome = self.legacy.update_one(filter.clone(), update).await?;
        if outcome.matched == 0 {
            debug!(collection = self.legacy.name(), filter = %filter, "updateOne matched nothing");
            return Ok(outcome);
        }

        self.engine.after(self.legacy.as_ref(), Mutation::QueryUpdate(filter)).await;
        Ok(outcome)
    }

    /// `deleteOne` keyed by a filter that must certify unique
    pub async fn delete_one(&self, filter: Document) -> Result<u64> {
        self.engine.before(&Mutation::QueryDelete(filter.clone()))?;

        let deleted = self.legacy.delete_one(filter.clone()).await?;
        self.engine.after(self.legacy.as_ref(), Mutation::QueryDelete(filter)).await;
        Ok(deleted)
    }

    /// `deleteMany` keyed by any filter
    pub async fn delete_many(&self, filter: Document) -> Result<u64> {
        let deleted = self.legacy.delete_many(filter.clone()).await?;
        self.engine.after(self.legacy.as_ref(), Mutation::BulkDelete(filter)).await;
        Ok(deleted)
    }

    /// Delete a loaded document by its identity
    pub async fn delete_document(&self, doc: &Document) -> Result<u64> {
        let id = doc
            .get(ID_FIELD)
            .cloned()
            .ok_or_else(|| MirrorError::InvalidShape(format!("document has no {}", ID_FIELD)))?;

        let deleted = self.legacy.delete_one(doc! { ID_FIELD: id.clone() }).await?;
        self.engine.after(self.legacy.as_ref(), Mutation::IdentityDelete(id)).await;
        Ok(deleted)
    }

    /// `findOneAndUpdate`; the returned image follows `return_document`
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        return_document: ReturnDocument,
    ) -> Result<Option<Document>> {
        let found = self
            .legacy
            .find_one_and_update(filter, update, return_document)
            .await?;

        if let Some(ref doc) = found {
            self.engine
                .after(self.legacy.as_ref(), Mutation::FindAndUpdate(doc.clone()))
                .await;
        }
        Ok(found)
    }

    /// `findOneAndDelete` / `findOneAndRemove`
    pub async fn find_one_and_delete(&self, filter: Document) -> Result<Option<Document>> {
        let removed = self.legacy.find_one_and_delete(filter).await?;

        if let Some(ref doc) = removed {
            self.engine
                .after(self.legacy.as_ref(), Mutation::FindAndDelete(doc.clone()))
                .await;
        }
        Ok(removed)
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<Document>> {
        self.legacy.find_one(filter).await
    }

    pub async fn find(&self, filter: Document) -> Result<Vec<Document>> {
        self.legacy.find(filter).await
    }
}

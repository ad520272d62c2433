//! Collection driver seam
//!
//! Both sides of a migration are reached through `DocumentStore`. The
//! legacy side is re-queried by the interceptor, the target side receives
//! mirror writes.

use async_trait::async_trait;
use bson::{Bson, Document};
use mongodb::options::IndexOptions;

use crate::types::Result;

/// Identity field shared by legacy and target documents
pub const ID_FIELD: &str = "_id";

/// Index declaration: key document plus driver options
pub type IndexSpec = (Document, Option<IndexOptions>);

/// Which image `find_one_and_update` hands back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    /// Document as it was before the update
    #[default]
    Before,
    /// Document as it is after the update
    After,
}

/// Result of an update or replace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter
    pub matched: u64,
    /// Documents actually changed
    pub modified: u64,
    /// Identity of a document created by an upsert
    pub upserted_id: Option<Bson>,
}

/// A document collection driver
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Collection name, used for log context
    fn name(&self) -> &str;

    /// Insert a document, returning its identity
    async fn insert_one(&self, doc: Document) -> Result<Bson>;

    /// First document matching the filter
    async fn find_one(&self, filter: Document) -> Result<Option<Document>>;

    /// All documents matching the filter
    async fn find(&self, filter: Document) -> Result<Vec<Document>>;

    /// Update the first matching document
    ///
    /// A payload without `$` operators is applied as `$set` of its fields.
    async fn update_one(&self, filter: Document, update: Document) -> Result<UpdateOutcome>;

    /// Replace the first matching document, optionally inserting it
    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome>;

    /// Delete at most one matching document
    async fn delete_one(&self, filter: Document) -> Result<u64>;

    /// Delete every matching document
    async fn delete_many(&self, filter: Document) -> Result<u64>;

    /// Update the first matching document and return the requested image
    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        return_document: ReturnDocument,
    ) -> Result<Option<Document>>;

    /// Delete the first matching document and return it
    async fn find_one_and_delete(&self, filter: Document) -> Result<Option<Document>>;
}

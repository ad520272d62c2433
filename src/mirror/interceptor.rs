//! Mutation Interceptor
//!
//! One entry point per legacy mutation pathway. `before` gates query-based
//! single-document mutations on filter uniqueness and is the only place an
//! error leaves this module. The `on_*` handlers run after the legacy write
//! has committed: each one does at most one extra legacy read, maps through
//! the Field Mapper, and issues exactly one target write. Their failures are
//! logged and swallowed.

use std::fmt;
use std::sync::Arc;

use bson::{doc, Bson, Document};
use tracing::{debug, warn};

use crate::config::MirrorOptions;
use crate::db::filter::strip_undefined;
use crate::db::store::{DocumentStore, ID_FIELD};
use crate::mirror::mapper::FieldMapper;
use crate::mirror::unique::UniqueIndexes;
use crate::mirror::writer::{MirrorOperation, MirrorOutcome, MirrorStats, MirrorStatsSnapshot, MirrorWriter};
use crate::types::{MirrorError, Result};

/// A committed (or about to be committed) legacy mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Document created or fully rewritten; carries the saved document
    Save(Document),
    /// `updateOne` keyed by a filter
    QueryUpdate(Document),
    /// `deleteOne` keyed by a filter
    QueryDelete(Document),
    /// `deleteMany` keyed by a filter
    BulkDelete(Document),
    /// Delete of a loaded document instance; carries its identity
    IdentityDelete(Bson),
    /// `findOneAndUpdate`; carries the returned document (either image)
    FindAndUpdate(Document),
    /// `findOneAndDelete` / `findOneAndRemove`; carries the removed document
    FindAndDelete(Document),
}

impl Mutation {
    /// Name of the legacy operation, for logs and rejections
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Save(_) => "save",
            Self::QueryUpdate(_) => "updateOne",
            Self::QueryDelete(_) => "deleteOne",
            Self::BulkDelete(_) => "deleteMany",
            Self::IdentityDelete(_) => "remove",
            Self::FindAndUpdate(_) => "findOneAndUpdate",
            Self::FindAndDelete(_) => "findOneAndDelete",
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentityDelete(id) => write!(f, "{} {}", self.operation(), id),
            Self::Save(doc)
            | Self::QueryUpdate(doc)
            | Self::QueryDelete(doc)
            | Self::BulkDelete(doc)
            | Self::FindAndUpdate(doc)
            | Self::FindAndDelete(doc) => write!(f, "{} {}", self.operation(), doc),
        }
    }
}

/// Write-path mirroring engine
pub struct MirrorEngine {
    writer: MirrorWriter,
    mapper: Arc<dyn FieldMapper>,
    unique: UniqueIndexes,
    stats: Arc<MirrorStats>,
}

impl MirrorEngine {
    /// Create an engine for one legacy collection
    ///
    /// `unique` describes the legacy collection's unique indexes and is
    /// fixed for the engine's lifetime.
    pub fn new(options: MirrorOptions, unique: UniqueIndexes) -> Self {
        let stats = Arc::new(MirrorStats::default());
        Self {
            writer: MirrorWriter::with_stats(options.target, stats.clone()),
            mapper: options.mapper,
            unique,
            stats,
        }
    }

    pub fn unique_indexes(&self) -> &UniqueIndexes {
        &self.unique
    }

    pub fn target(&self) -> &Arc<dyn DocumentStore> {
        self.writer.target()
    }

    pub fn stats(&self) -> MirrorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Gate a mutation before it runs on the legacy side
    ///
    /// Single-document query mutations whose filter cannot be certified
    /// unique are rejected; everything else passes.
    pub fn before(&self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::QueryUpdate(filter) | Mutation::QueryDelete(filter) => {
                if self.unique.certify(filter) {
                    Ok(())
                } else {
                    warn!(
                        mutation = %mutation,
                        "rejecting mutation: filter does not cover a unique index"
                    );
                    Err(MirrorError::AmbiguousFilter {
                        operation: mutation.operation().to_string(),
                        filter: filter.to_string(),
                    })
                }
            }
            _ => Ok(()),
        }
    }

    /// Mirror a committed legacy mutation
    ///
    /// `legacy` is the collection the mutation ran against, used for
    /// re-fetching post-images.
    pub async fn after(&self, legacy: &dyn DocumentStore, mutation: Mutation) -> MirrorOutcome {
        match mutation {
            Mutation::Save(doc) => self.on_save(&doc).await,
            Mutation::QueryUpdate(filter) => self.on_query_update(legacy, &filter).await,
            Mutation::QueryDelete(filter) => self.on_query_delete(&filter).await,
            Mutation::BulkDelete(filter) => self.on_bulk_delete(&filter).await,
            Mutation::IdentityDelete(id) => self.on_identity_delete(&id).await,
            Mutation::FindAndUpdate(doc) => self.on_find_and_update(legacy, &doc).await,
            Mutation::FindAndDelete(doc) => self.on_find_and_delete(&doc).await,
        }
    }

    /// Document saved: map it and upsert
    pub async fn on_save(&self, doc: &Document) -> MirrorOutcome {
        let planned = self.upsert_for(doc);
        self.run("save", planned).await
    }

    /// Query update committed: re-fetch by the same filter, map, upsert
    pub async fn on_query_update(&self, legacy: &dyn DocumentStore, filter: &Document) -> MirrorOutcome {
        let planned = match legacy.find_one(filter.clone()).await {
            Ok(Some(doc)) => self.upsert_for(&doc),
            Ok(None) => Err(MirrorError::Database(format!(
                "updated document no longer matches {}",
                filter
            ))),
            Err(e) => Err(e),
        };
        self.run("updateOne", planned).await
    }

    /// Query delete committed: map the filter itself and delete one
    pub async fn on_query_delete(&self, filter: &Document) -> MirrorOutcome {
        let planned = self.target_filter(filter).map(MirrorOperation::DeleteOne);
        self.run("deleteOne", planned).await
    }

    /// Bulk delete committed: map the filter itself and delete many
    pub async fn on_bulk_delete(&self, filter: &Document) -> MirrorOutcome {
        let planned = self.target_filter(filter).map(MirrorOperation::DeleteMany);
        self.run("deleteMany", planned).await
    }

    /// Loaded document deleted: delete by identity, no mapping involved
    pub async fn on_identity_delete(&self, id: &Bson) -> MirrorOutcome {
        self.run("remove", Ok(MirrorOperation::DeleteOne(doc! { ID_FIELD: id.clone() })))
            .await
    }

    /// Find-and-delete returned the removed document: delete by its identity
    pub async fn on_find_and_delete(&self, doc: &Document) -> MirrorOutcome {
        let planned = identity_of(doc).map(|id| MirrorOperation::DeleteOne(doc! { ID_FIELD: id }));
        self.run("findOneAndDelete", planned).await
    }

    /// Find-and-update returned some image: re-fetch the post-image by identity
    pub async fn on_find_and_update(&self, legacy: &dyn DocumentStore, doc: &Document) -> MirrorOutcome {
        let planned = match identity_of(doc) {
            Ok(id) => match legacy.find_one(doc! { ID_FIELD: id.clone() }).await {
                Ok(Some(current)) => self.upsert_for(&current),
                Ok(None) => Err(MirrorError::Database(format!(
                    "updated document {} vanished before it could be mirrored",
                    id
                ))),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.run("findOneAndUpdate", planned).await
    }

    /// Map a full legacy document into an upsert, checking identity survives
    fn upsert_for(&self, doc: &Document) -> Result<MirrorOperation> {
        let id = identity_of(doc)?;
        let mapped = self.mapper.map(doc)?;

        match mapped.get(ID_FIELD) {
            Some(mapped_id) if *mapped_id == id => Ok(MirrorOperation::Upsert(mapped)),
            Some(mapped_id) => Err(MirrorError::InvalidShape(format!(
                "mapper changed {} from {} to {}",
                ID_FIELD, id, mapped_id
            ))),
            None => Err(MirrorError::InvalidShape(format!(
                "mapper dropped {} of {}",
                ID_FIELD, id
            ))),
        }
    }

    /// Translate a legacy filter into a clean target filter
    fn target_filter(&self, filter: &Document) -> Result<Document> {
        let mapped = strip_undefined(self.mapper.map(filter)?);

        // An emptied filter would delete the whole target collection
        if mapped.is_empty() && !filter.is_empty() {
            return Err(MirrorError::InvalidShape(format!(
                "filter {} maps to an empty target filter",
                filter
            )));
        }

        debug!(filter = %filter, target_filter = %mapped, "mapped legacy filter");
        Ok(mapped)
    }

    /// Hand a planned operation to the writer, or log why there is none
    async fn run(&self, operation: &'static str, planned: Result<MirrorOperation>) -> MirrorOutcome {
        match planned {
            Ok(op) => {
                debug!(operation, mirror = %op, "mirroring");
                self.writer.mirror(op).await
            }
            Err(e) => {
                warn!(
                    operation,
                    collection = self.writer.target().name(),
                    error = %e,
                    "mirror skipped"
                );
                self.stats.record_failure();
                MirrorOutcome::Failed
            }
        }
    }
}

fn identity_of(doc: &Document) -> Result<Bson> {
    match doc.get(ID_FIELD) {
        Some(Bson::Undefined) | None => Err(MirrorError::InvalidShape(format!(
            "legacy document has no {}: {}",
            ID_FIELD, doc
        ))),
        Some(id) => Ok(id.clone()),
    }
}

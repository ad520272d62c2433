//! migrate-onwrite - keep a migrated collection in step with its legacy one
//!
//! During a live schema migration every write to the legacy collection is
//! mirrored into the target collection through a caller-supplied field
//! mapper. No application changes, no backfill window.
//!
//! ## Pieces
//!
//! - **Uniqueness Resolver**: certifies that a filter can match at most one
//!   legacy document before `updateOne`/`deleteOne` may run
//! - **Mutation Interceptor**: `MirrorEngine`, one handler per mutation
//!   pathway, re-fetching or re-deriving what changed
//! - **Mirror Writer**: insert-or-replace for writes, filtered deletes for
//!   removals, never failing the legacy write
//! - **MirroredCollection**: the legacy driver adapter application code
//!   writes through
//!
//! ## Usage
//!
//! ```ignore
//! let engine = Arc::new(MirrorEngine::new(
//!     MirrorOptions::new(target, RenameMapper::new(renames)?),
//!     UniqueIndexes::from_indices(&legacy_indices),
//! ));
//! let users = MirroredCollection::new(legacy, engine);
//!
//! users.save(doc! { "u": "haha", "n": "John Sun" }).await?;
//! users.update_one(doc! { "u": "haha" }, doc! { "n": "Yu-Jen Sun" }).await?;
//! users.delete_many(doc! { "n": "someName" }).await?;
//! ```

pub mod config;
pub mod db;
pub mod logging;
pub mod mirror;
pub mod types;

pub use config::{Args, MirrorOptions};
pub use db::{DocumentStore, MemoryCollection, MongoClient, MongoCollection, ReturnDocument, ID_FIELD};
pub use mirror::{
    certify_unique, detect_drift, DriftReport, FieldMapper, FieldRename, MirrorEngine, MirrorOperation,
    MirrorOutcome, MirrorWriter, MirroredCollection, Mutation, RenameMapper, UniqueIndexes,
};
pub use types::{MirrorError, Result};

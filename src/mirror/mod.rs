//! Write-path mirroring
//!
//! ```text
//! legacy mutation ──► MirrorEngine::before ──► legacy write commits
//!                                                    │
//!                      MirrorEngine::after ◄─────────┘
//!                            │  re-fetch / map / clean filter
//!                            ▼
//!                      MirrorWriter ──► target collection
//! ```
//!
//! Only the uniqueness gate can fail a legacy mutation. Everything after
//! the commit is best effort and logged.

pub mod collection;
pub mod drift;
pub mod interceptor;
pub mod mapper;
pub mod unique;
pub mod writer;

pub use collection::MirroredCollection;
pub use drift::{detect_drift, DriftReport};
pub use interceptor::{MirrorEngine, Mutation};
pub use mapper::{FieldMapper, FieldRename, RenameMapper};
pub use unique::{certify_unique, UniqueIndexes};
pub use writer::{MirrorOperation, MirrorOutcome, MirrorStatsSnapshot, MirrorWriter};

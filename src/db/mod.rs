//! Collection drivers
//!
//! `DocumentStore` is the seam both collections are reached through.
//! `MongoCollection` talks to a live server, `MemoryCollection` keeps
//! everything in process.

pub mod filter;
pub mod memory;
pub mod mongo;
pub mod store;

pub use memory::MemoryCollection;
pub use mongo::{MongoClient, MongoCollection};
pub use store::{DocumentStore, IndexSpec, ReturnDocument, UpdateOutcome, ID_FIELD};

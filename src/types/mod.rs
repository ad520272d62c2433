//! Shared types for migrate-onwrite

pub mod error;

pub use error::{MirrorError, Result};

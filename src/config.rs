//! Configuration for migrate-onwrite
//!
//! `MirrorOptions` is everything the engine needs: the target collection
//! and the field mapper. `Args` is the CLI/environment surface of the
//! drift-report binary.

use std::sync::Arc;

use clap::Parser;

use crate::db::store::DocumentStore;
use crate::mirror::mapper::{FieldMapper, FieldRename};

/// The two options the mirroring engine requires
#[derive(Clone)]
pub struct MirrorOptions {
    /// Collection receiving mirror writes
    pub target: Arc<dyn DocumentStore>,
    /// Legacy → target transform
    pub mapper: Arc<dyn FieldMapper>,
}

impl MirrorOptions {
    pub fn new(target: Arc<dyn DocumentStore>, mapper: impl FieldMapper + 'static) -> Self {
        Self {
            target,
            mapper: Arc::new(mapper),
        }
    }
}

/// migrate-onwrite - report drift between a legacy collection and its
/// migrated target
#[derive(Parser, Debug, Clone)]
#[command(name = "migrate-onwrite")]
#[command(about = "Compare a legacy MongoDB collection with its mirrored target")]
pub struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB")]
    pub mongodb_db: String,

    /// Collection being migrated away from
    #[arg(long, env = "LEGACY_COLLECTION")]
    pub legacy_collection: String,

    /// Collection being migrated to
    #[arg(long, env = "TARGET_COLLECTION")]
    pub target_collection: String,

    /// Field renames from legacy to target shape, as `from=to`
    /// (repeatable or comma-separated)
    #[arg(long = "rename", env = "FIELD_RENAMES", value_delimiter = ',')]
    pub renames: Vec<FieldRename>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.legacy_collection == self.target_collection {
            return Err("LEGACY_COLLECTION and TARGET_COLLECTION must differ".to_string());
        }

        if self.renames.is_empty() {
            return Err("at least one --rename is required".to_string());
        }

        Ok(())
    }
}

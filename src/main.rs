//! migrate-onwrite - drift report between a legacy collection and its target
//!
//! Reads both collections, maps each legacy document with the configured
//! renames and prints what is missing, stale or orphaned on the target.
//! Exits with status 2 when drift is found.

use clap::Parser;
use tracing::{error, info};

use migrate_onwrite::{config::Args, detect_drift, logging, MongoClient, RenameMapper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_json)?;

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let mapper = RenameMapper::new(args.renames.clone())?;

    info!("MongoDB: {}", args.mongodb_uri);
    info!("Legacy collection: {}", args.legacy_collection);
    info!("Target collection: {}", args.target_collection);
    for rename in mapper.renames() {
        info!("  {} -> {}", rename.from, rename.to);
    }

    let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
    info!("Using database '{}'", mongo.db_name());

    // Indexes are owned by the application; open both collections as-is
    let legacy = mongo.collection(&args.legacy_collection, Vec::new()).await?;
    let target = mongo.collection(&args.target_collection, Vec::new()).await?;

    let report = detect_drift(&legacy, &target, &mapper).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_clean() {
        std::process::exit(2);
    }

    Ok(())
}

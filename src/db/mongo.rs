//! MongoDB client and collection driver
//!
//! Pattern adapted from holo-host/rust/util_libs/db/src/mongodb

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures_util::StreamExt;
use mongodb::{
    options::{FindOneAndUpdateOptions, ReplaceOptions},
    Client, Collection, IndexModel,
};
use tracing::{error, info};

use crate::db::filter::normalize_update;
use crate::db::store::{DocumentStore, IndexSpec, ReturnDocument, UpdateOutcome};
use crate::types::{MirrorError, Result};

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| MirrorError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| MirrorError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Open a collection, applying its index declarations
    pub async fn collection(&self, name: &str, indices: Vec<IndexSpec>) -> Result<MongoCollection> {
        MongoCollection::new(&self.client, &self.db_name, name, indices).await
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Untyped MongoDB collection
#[derive(Debug, Clone)]
pub struct MongoCollection {
    inner: Collection<Document>,
    name: String,
}

impl MongoCollection {
    /// Open a collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
        indices: Vec<IndexSpec>,
    ) -> Result<Self> {
        let collection = MongoCollection {
            inner: client.database(db_name).collection::<Document>(collection_name),
            name: collection_name.to_string(),
        };

        collection.apply_indexes(indices).await?;

        Ok(collection)
    }

    async fn apply_indexes(&self, indices: Vec<IndexSpec>) -> Result<()> {
        if indices.is_empty() {
            return Ok(());
        }

        let models: Vec<IndexModel> = indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(models)
            .await
            .map_err(|e| MirrorError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }
}

fn return_document_option(return_document: ReturnDocument) -> mongodb::options::ReturnDocument {
    match return_document {
        ReturnDocument::Before => mongodb::options::ReturnDocument::Before,
        ReturnDocument::After => mongodb::options::ReturnDocument::After,
    }
}

#[async_trait]
impl DocumentStore for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, doc: Document) -> Result<Bson> {
        let result = self.inner.insert_one(doc).await?;
        Ok(result.inserted_id)
    }

    async fn find_one(&self, filter: Document) -> Result<Option<Document>> {
        Ok(self.inner.find_one(filter).await?)
    }

    async fn find(&self, filter: Document) -> Result<Vec<Document>> {
        let cursor = self.inner.find(filter).await?;

        let results: Vec<Document> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    async fn update_one(&self, filter: Document, update: Document) -> Result<UpdateOutcome> {
        let result = self.inner.update_one(filter, normalize_update(update)).await?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let options = ReplaceOptions::builder().upsert(upsert).build();

        let result = self
            .inner
            .replace_one(filter, replacement)
            .with_options(options)
            .await?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, filter: Document) -> Result<u64> {
        Ok(self.inner.delete_one(filter).await?.deleted_count)
    }

    async fn delete_many(&self, filter: Document) -> Result<u64> {
        Ok(self.inner.delete_many(filter).await?.deleted_count)
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        return_document: ReturnDocument,
    ) -> Result<Option<Document>> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(return_document_option(return_document))
            .build();

        Ok(self
            .inner
            .find_one_and_update(filter, normalize_update(update))
            .with_options(options)
            .await?)
    }

    async fn find_one_and_delete(&self, filter: Document) -> Result<Option<Document>> {
        Ok(self.inner.find_one_and_delete(filter).await?)
    }
}

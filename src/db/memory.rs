//! In-memory collection driver
//!
//! Used in memory-only mode and by the test-suite. Documents keep insertion
//! order, so "first match" is deterministic. Unique field sets are enforced
//! the way Mongo enforces unique indexes, with missing values comparing as
//! null.

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use tokio::sync::RwLock;
use tracing::debug;

use crate::db::filter::{apply_update, lookup, matches, normalize_update};
use crate::db::store::{DocumentStore, IndexSpec, ReturnDocument, UpdateOutcome, ID_FIELD};
use crate::mirror::unique::UniqueIndexes;
use crate::types::{MirrorError, Result};

/// Collection held entirely in memory
pub struct MemoryCollection {
    name: String,
    unique: UniqueIndexes,
    docs: RwLock<Vec<Document>>,
}

impl MemoryCollection {
    /// Create an empty collection enforcing the given unique field sets
    pub fn new(name: impl Into<String>, unique: UniqueIndexes) -> Self {
        Self {
            name: name.into(),
            unique,
            docs: RwLock::new(Vec::new()),
        }
    }

    /// Create an empty collection from index declarations
    pub fn with_indices(name: impl Into<String>, indices: &[IndexSpec]) -> Self {
        Self::new(name, UniqueIndexes::from_indices(indices))
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    /// Whether the collection holds no documents
    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    fn position(docs: &[Document], filter: &Document) -> Result<Option<usize>> {
        for (index, doc) in docs.iter().enumerate() {
            if matches(doc, filter)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Reject `candidate` if it collides with any other stored document
    fn check_unique(&self, docs: &[Document], candidate: &Document, skip: Option<usize>) -> Result<()> {
        for (index, existing) in docs.iter().enumerate() {
            if Some(index) == skip {
                continue;
            }

            if existing.get(ID_FIELD) == candidate.get(ID_FIELD) {
                return Err(MirrorError::DuplicateKey(format!(
                    "{} index: {} dup key {}",
                    self.name,
                    ID_FIELD,
                    candidate.get(ID_FIELD).cloned().unwrap_or(Bson::Null)
                )));
            }

            for fields in self.unique.field_sets() {
                let collides = fields.iter().all(|field| {
                    let left = lookup(existing, field).unwrap_or(&Bson::Null);
                    let right = lookup(candidate, field).unwrap_or(&Bson::Null);
                    left == right
                });

                if collides {
                    return Err(MirrorError::DuplicateKey(format!(
                        "{} index: {} dup key",
                        self.name,
                        fields.join("_")
                    )));
                }
            }
        }

        Ok(())
    }

    /// Apply an update to the document at `index`, honouring unique sets
    fn update_at(&self, docs: &mut [Document], index: usize, update: &Document) -> Result<bool> {
        let mut updated = docs[index].clone();
        let changed = apply_update(&mut updated, update)?;

        if changed {
            self.check_unique(docs, &updated, Some(index))?;
            docs[index] = updated;
        }

        Ok(changed)
    }
}

#[async_trait]
impl DocumentStore for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, mut doc: Document) -> Result<Bson> {
        if !doc.contains_key(ID_FIELD) {
            doc.insert(ID_FIELD, ObjectId::new());
        }

        let mut docs = self.docs.write().await;
        self.check_unique(&docs, &doc, None)?;

        let id = doc.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
        docs.push(doc);
        debug!(collection = %self.name, id = %id, "memory insert");
        Ok(id)
    }

    async fn find_one(&self, filter: Document) -> Result<Option<Document>> {
        let docs = self.docs.read().await;
        Ok(Self::position(&docs, &filter)?.map(|index| docs[index].clone()))
    }

    async fn find(&self, filter: Document) -> Result<Vec<Document>> {
        let docs = self.docs.read().await;
        let mut results = Vec::new();
        for doc in docs.iter() {
            if matches(doc, &filter)? {
                results.push(doc.clone());
            }
        }
        Ok(results)
    }

    async fn update_one(&self, filter: Document, update: Document) -> Result<UpdateOutcome> {
        let update = normalize_update(update);
        let mut docs = self.docs.write().await;

        let Some(index) = Self::position(&docs, &filter)? else {
            return Ok(UpdateOutcome::default());
        };

        let changed = self.update_at(&mut docs, index, &update)?;
        Ok(UpdateOutcome {
            matched: 1,
            modified: u64::from(changed),
            upserted_id: None,
        })
    }

    async fn replace_one(
        &self,
        filter: Document,
        mut replacement: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let mut docs = self.docs.write().await;

        match Self::position(&docs, &filter)? {
            Some(index) => {
                let current_id = docs[index].get(ID_FIELD).cloned();
                match (replacement.get(ID_FIELD), &current_id) {
                    (Some(new_id), Some(old_id)) if new_id != old_id => {
                        return Err(MirrorError::ImmutableField(ID_FIELD.to_string()));
                    }
                    (None, Some(old_id)) => {
                        replacement.insert(ID_FIELD, old_id.clone());
                    }
                    _ => {}
                }

                self.check_unique(&docs, &replacement, Some(index))?;
                let changed = docs[index] != replacement;
                docs[index] = replacement;

                Ok(UpdateOutcome {
                    matched: 1,
                    modified: u64::from(changed),
                    upserted_id: None,
                })
            }
            None if upsert => {
                if !replacement.contains_key(ID_FIELD) {
                    match filter.get(ID_FIELD) {
                        Some(id) => replacement.insert(ID_FIELD, id.clone()),
                        None => replacement.insert(ID_FIELD, ObjectId::new()),
                    };
                }

                self.check_unique(&docs, &replacement, None)?;
                let id = replacement.get(ID_FIELD).cloned();
                docs.push(replacement);

                Ok(UpdateOutcome {
                    matched: 0,
                    modified: 0,
                    upserted_id: id,
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }

    async fn delete_one(&self, filter: Document) -> Result<u64> {
        let mut docs = self.docs.write().await;

        match Self::position(&docs, &filter)? {
            Some(index) => {
                docs.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, filter: Document) -> Result<u64> {
        let mut docs = self.docs.write().await;

        // Evaluate the whole filter first so a bad operator deletes nothing
        let mut doomed = Vec::with_capacity(docs.len());
        for doc in docs.iter() {
            doomed.push(matches(doc, &filter)?);
        }

        let before = docs.len();
        let mut index = 0;
        docs.retain(|_| {
            let keep = !doomed[index];
            index += 1;
            keep
        });

        Ok((before - docs.len()) as u64)
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        return_document: ReturnDocument,
    ) -> Result<Option<Document>> {
        let update = normalize_update(update);
        let mut docs = self.docs.write().await;

        let Some(index) = Self::position(&docs, &filter)? else {
            return Ok(None);
        };

        let before = docs[index].clone();
        self.update_at(&mut docs, index, &update)?;

        Ok(Some(match return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => docs[index].clone(),
        }))
    }

    async fn find_one_and_delete(&self, filter: Document) -> Result<Option<Document>> {
        let mut docs = self.docs.write().await;

        Ok(Self::position(&docs, &filter)?.map(|index| docs.remove(index)))
    }
}

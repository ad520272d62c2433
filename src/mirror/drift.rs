//! Drift report
//!
//! Read-only comparison of a legacy collection with its target, for manual
//! reconciliation after mirror failures. Nothing here writes.

use std::collections::{HashMap, HashSet};

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::filter::strip_undefined;
use crate::db::store::{DocumentStore, ID_FIELD};
use crate::mirror::mapper::FieldMapper;
use crate::types::Result;

/// Differences between a legacy collection and its target
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub checked_at: DateTime<Utc>,
    pub legacy_collection: String,
    pub target_collection: String,
    pub legacy_count: usize,
    pub target_count: usize,
    /// Legacy identities with no target document
    pub missing: Vec<String>,
    /// Target documents that differ from their mapped legacy document
    pub stale: Vec<String>,
    /// Target identities with no legacy document
    pub orphaned: Vec<String>,
    /// Legacy identities the mapper could not translate
    pub unmappable: Vec<String>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
            && self.stale.is_empty()
            && self.orphaned.is_empty()
            && self.unmappable.is_empty()
    }
}

/// Compare every legacy document with its target counterpart
pub async fn detect_drift(
    legacy: &dyn DocumentStore,
    target: &dyn DocumentStore,
    mapper: &dyn FieldMapper,
) -> Result<DriftReport> {
    let legacy_docs = legacy.find(Document::new()).await?;
    let target_docs = target.find(Document::new()).await?;

    let mut report = DriftReport {
        checked_at: Utc::now(),
        legacy_collection: legacy.name().to_string(),
        target_collection: target.name().to_string(),
        legacy_count: legacy_docs.len(),
        target_count: target_docs.len(),
        missing: Vec::new(),
        stale: Vec::new(),
        orphaned: Vec::new(),
        unmappable: Vec::new(),
    };

    let target_by_id: HashMap<String, &Document> = target_docs
        .iter()
        .map(|doc| (doc.get(ID_FIELD).cloned().unwrap_or(Bson::Null).to_string(), doc))
        .collect();
    let mut legacy_ids: HashSet<String> = HashSet::with_capacity(legacy_docs.len());

    for doc in &legacy_docs {
        let id = doc.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
        let key = id.to_string();
        legacy_ids.insert(key.clone());

        let expected = match mapper.map(doc) {
            Ok(mapped) => strip_undefined(mapped),
            Err(e) => {
                warn!(id = %id, error = %e, "cannot map legacy document");
                report.unmappable.push(key);
                continue;
            }
        };

        match target_by_id.get(&key) {
            None => report.missing.push(key),
            Some(current) => {
                let differs = expected
                    .iter()
                    .any(|(field, value)| current.get(field) != Some(value));
                if differs {
                    report.stale.push(key);
                }
            }
        }
    }

    for doc in &target_docs {
        let key = doc.get(ID_FIELD).cloned().unwrap_or(Bson::Null).to_string();
        if !legacy_ids.contains(&key) {
            report.orphaned.push(key);
        }
    }

    info!(
        legacy = %report.legacy_collection,
        target = %report.target_collection,
        missing = report.missing.len(),
        stale = report.stale.len(),
        orphaned = report.orphaned.len(),
        unmappable = report.unmappable.len(),
        "drift check complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryCollection;
    use crate::mirror::mapper::{FieldRename, RenameMapper};
    use crate::mirror::unique::UniqueIndexes;
    use bson::doc;

    #[tokio::test]
    async fn test_drift_categories() {
        let legacy = MemoryCollection::new("users", UniqueIndexes::default());
        let target = MemoryCollection::new("users_v2", UniqueIndexes::default());
        let mapper =
            RenameMapper::new([FieldRename::new("u", "username"), FieldRename::new("n", "name")]).unwrap();

        legacy.insert_one(doc! { "_id": 1, "u": "in-sync", "n": "A" }).await.unwrap();
        legacy.insert_one(doc! { "_id": 2, "u": "missing", "n": "B" }).await.unwrap();
        legacy.insert_one(doc! { "_id": 3, "u": "stale", "n": "C" }).await.unwrap();

        target.insert_one(doc! { "_id": 1, "username": "in-sync", "name": "A" }).await.unwrap();
        target.insert_one(doc! { "_id": 3, "username": "stale", "name": "old" }).await.unwrap();
        target.insert_one(doc! { "_id": 4, "username": "orphan", "name": "D" }).await.unwrap();

        let report = detect_drift(&legacy, &target, &mapper).await.unwrap();

        assert_eq!(report.legacy_count, 3);
        assert_eq!(report.target_count, 3);
        assert_eq!(report.missing, vec!["2".to_string()]);
        assert_eq!(report.stale, vec!["3".to_string()]);
        assert_eq!(report.orphaned, vec!["4".to_string()]);
        assert!(report.unmappable.is_empty());
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_targets_matched_by_identity_not_position() {
        let legacy = MemoryCollection::new("users", UniqueIndexes::default());
        let target = MemoryCollection::new("users_v2", UniqueIndexes::default());
        let mapper = RenameMapper::new([FieldRename::new("u", "username")]).unwrap();

        let ids: Vec<bson::oid::ObjectId> = (0..50).map(|_| bson::oid::ObjectId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            legacy.insert_one(doc! { "_id": *id, "u": format!("user{}", i) }).await.unwrap();
        }
        // Target written in reverse order, one document stale
        for (i, id) in ids.iter().enumerate().rev() {
            let username = if i == 7 { "renamed".to_string() } else { format!("user{}", i) };
            target.insert_one(doc! { "_id": *id, "username": username }).await.unwrap();
        }

        let report = detect_drift(&legacy, &target, &mapper).await.unwrap();
        assert!(report.missing.is_empty());
        assert!(report.orphaned.is_empty());
        assert_eq!(report.stale, vec![Bson::ObjectId(ids[7]).to_string()]);
    }

    #[tokio::test]
    async fn test_clean_collections() {
        let legacy = MemoryCollection::new("users", UniqueIndexes::default());
        let target = MemoryCollection::new("users_v2", UniqueIndexes::default());
        let mapper = RenameMapper::new([FieldRename::new("u", "username")]).unwrap();

        legacy.insert_one(doc! { "_id": 1, "u": "haha" }).await.unwrap();
        target.insert_one(doc! { "_id": 1, "username": "haha", "extra": true }).await.unwrap();

        let report = detect_drift(&legacy, &target, &mapper).await.unwrap();
        assert!(report.is_clean());
        assert!(serde_json::to_string(&report).unwrap().contains("\"missing\":[]"));
    }
}

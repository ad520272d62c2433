//! Uniqueness Resolver
//!
//! Decides whether a filter is guaranteed to match at most one legacy
//! document. The check is structural: a filter naming every field of a
//! declared unique index is trusted to be unique, whatever the values or
//! their types.

use bson::Document;

use crate::db::store::{IndexSpec, ID_FIELD};

/// Immutable set of unique field sets declared on a collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniqueIndexes {
    sets: Vec<Vec<String>>,
}

impl UniqueIndexes {
    /// Build from explicit field sets; empty sets are ignored
    pub fn new<I, S, F>(sets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let sets = sets
            .into_iter()
            .map(|set| set.into_iter().map(Into::into).collect::<Vec<String>>())
            .filter(|set| !set.is_empty())
            .collect();

        Self { sets }
    }

    /// Keep the unique entries of a collection's index declarations
    pub fn from_indices(indices: &[IndexSpec]) -> Self {
        Self::new(
            indices
                .iter()
                .filter(|(_, options)| {
                    options
                        .as_ref()
                        .and_then(|options| options.unique)
                        .unwrap_or(false)
                })
                .map(|(keys, _)| keys.keys().cloned().collect::<Vec<String>>()),
        )
    }

    /// Declared unique field sets, in declaration order
    pub fn field_sets(&self) -> impl Iterator<Item = &[String]> {
        self.sets.iter().map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// See [`certify_unique`]
    pub fn certify(&self, filter: &Document) -> bool {
        certify_unique(self, filter)
    }
}

/// Whether `filter` can match at most one document
///
/// True when the filter names the identity field, or when its keys cover
/// every field of at least one declared unique set.
pub fn certify_unique(indexes: &UniqueIndexes, filter: &Document) -> bool {
    if filter.contains_key(ID_FIELD) {
        return true;
    }

    indexes
        .field_sets()
        .any(|fields| fields.iter().all(|field| filter.contains_key(field)))
}

//! Field Mapper contract
//!
//! A mapper turns a legacy document, or a legacy filter, into its target
//! shape. It must carry the identity field over unchanged. Fields it cannot
//! produce may be emitted as `Bson::Undefined`, at any depth of nested
//! sub-documents; they are stripped before a target filter or document is
//! written.

use std::str::FromStr;

use bson::Document;

use crate::db::store::ID_FIELD;
use crate::types::{MirrorError, Result};

/// Caller-supplied legacy → target transform
pub trait FieldMapper: Send + Sync {
    fn map(&self, source: &Document) -> Result<Document>;
}

impl<F> FieldMapper for F
where
    F: Fn(&Document) -> Result<Document> + Send + Sync,
{
    fn map(&self, source: &Document) -> Result<Document> {
        self(source)
    }
}

/// One `from=to` field rename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRename {
    pub from: String,
    pub to: String,
}

impl FieldRename {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl FromStr for FieldRename {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (from, to) = s
            .split_once('=')
            .ok_or_else(|| format!("expected 'from=to', got '{}'", s))?;
        let (from, to) = (from.trim(), to.trim());

        if from.is_empty() || to.is_empty() {
            return Err(format!("empty field name in rename '{}'", s));
        }
        if from == ID_FIELD || to == ID_FIELD {
            return Err(format!("{} is carried over and cannot be renamed", ID_FIELD));
        }

        Ok(Self::new(from, to))
    }
}

/// Declarative mapper that renames a fixed set of fields
///
/// The identity field is always carried over. Fields without a rename are
/// dropped, and renamed fields absent from the source are simply omitted,
/// so mapped filters never constrain on a field the legacy filter did not
/// name.
#[derive(Debug, Clone, Default)]
pub struct RenameMapper {
    renames: Vec<FieldRename>,
}

impl RenameMapper {
    pub fn new(renames: impl IntoIterator<Item = FieldRename>) -> Result<Self> {
        let renames: Vec<FieldRename> = renames.into_iter().collect();

        for (i, rename) in renames.iter().enumerate() {
            let clash = renames[..i]
                .iter()
                .any(|earlier| earlier.from == rename.from || earlier.to == rename.to);
            if clash {
                return Err(MirrorError::Config(format!(
                    "field '{}' renamed twice",
                    rename.from
                )));
            }
        }

        Ok(Self { renames })
    }

    pub fn renames(&self) -> &[FieldRename] {
        &self.renames
    }
}

impl FieldMapper for RenameMapper {
    fn map(&self, source: &Document) -> Result<Document> {
        let mut mapped = Document::new();

        if let Some(id) = source.get(ID_FIELD) {
            mapped.insert(ID_FIELD, id.clone());
        }

        for rename in &self.renames {
            if let Some(value) = source.get(&rename.from) {
                mapped.insert(rename.to.clone(), value.clone());
            }
        }

        Ok(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, Bson};

    fn users_v2() -> RenameMapper {
        RenameMapper::new([FieldRename::new("u", "username"), FieldRename::new("n", "name")]).unwrap()
    }

    #[test]
    fn test_parse_rename() {
        assert_eq!(
            "u=username".parse::<FieldRename>().unwrap(),
            FieldRename::new("u", "username")
        );
        assert_eq!(
            " n = name ".parse::<FieldRename>().unwrap(),
            FieldRename::new("n", "name")
        );
        assert!("username".parse::<FieldRename>().is_err());
        assert!("=name".parse::<FieldRename>().is_err());
        assert!("_id=id".parse::<FieldRename>().is_err());
    }

    #[test]
    fn test_duplicate_renames_rejected() {
        let err = RenameMapper::new([FieldRename::new("u", "username"), FieldRename::new("u", "login")])
            .unwrap_err();
        assert!(matches!(err, MirrorError::Config(_)));
    }

    #[test]
    fn test_rename_mapper_documents_and_filters() {
        let mapper = users_v2();

        let mapped = mapper
            .map(&doc! { "_id": 5, "u": "haha", "n": "John Sun", "legacy_only": true })
            .unwrap();
        assert_eq!(mapped, doc! { "_id": 5, "username": "haha", "name": "John Sun" });

        // Partial filters stay partial
        let filter = mapper.map(&doc! { "u": "haha" }).unwrap();
        assert_eq!(filter, doc! { "username": "haha" });
    }

    #[test]
    fn test_closure_mapper() {
        let up = |old: &Document| -> Result<Document> {
            Ok(doc! {
                "_id": old.get("_id").cloned().unwrap_or(Bson::Undefined),
                "username": old.get("u").cloned().unwrap_or(Bson::Undefined),
            })
        };

        let mapped = up.map(&doc! { "u": "haha" }).unwrap();
        assert_eq!(mapped.get("_id"), Some(&Bson::Undefined));
        assert_eq!(mapped.get_str("username").unwrap(), "haha");
    }
}

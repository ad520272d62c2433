//! Filter and update helpers over BSON documents
//!
//! Implements the subset of MongoDB query and update semantics the memory
//! driver needs, plus the normalisation shared with the Mongo driver.

use bson::{doc, Bson, Document};

use crate::db::store::ID_FIELD;
use crate::types::{MirrorError, Result};

/// Whether any top-level key is a `$` operator
pub fn has_operators(doc: &Document) -> bool {
    doc.keys().any(|key| key.starts_with('$'))
}

/// Turn a plain field payload into a `$set` update
///
/// Payloads that already use operators are returned unchanged.
pub fn normalize_update(update: Document) -> Document {
    if update.is_empty() || has_operators(&update) {
        update
    } else {
        doc! { "$set": update }
    }
}

/// Drop every field whose value is `Bson::Undefined`, at any depth
///
/// An undefined value left in a filter would become an equality constraint
/// on undefined, which matches nothing or everything depending on the store.
/// Sub-documents are cleaned in place; array elements are left alone.
pub fn strip_undefined(doc: Document) -> Document {
    doc.into_iter()
        .filter_map(|(key, value)| match value {
            Bson::Undefined => None,
            Bson::Document(inner) => Some((key, Bson::Document(strip_undefined(inner)))),
            other => Some((key, other)),
        })
        .collect()
}

/// Resolve a dotted path inside a document
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((head, rest)) => match doc.get(head) {
            Some(Bson::Document(inner)) => lookup(inner, rest),
            _ => None,
        },
    }
}

fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

/// Check whether a document satisfies a filter
pub fn matches(doc: &Document, filter: &Document) -> Result<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => all_clauses(doc, condition, key)?
                .into_iter()
                .all(|clause| clause),
            "$or" => all_clauses(doc, condition, key)?
                .into_iter()
                .any(|clause| clause),
            op if op.starts_with('$') => {
                return Err(MirrorError::UnsupportedOperator(op.to_string()));
            }
            path => matches_condition(lookup(doc, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn all_clauses(doc: &Document, clauses: &Bson, op: &str) -> Result<Vec<bool>> {
    let Bson::Array(clauses) = clauses else {
        return Err(MirrorError::UnsupportedOperator(format!("{} expects an array", op)));
    };

    clauses
        .iter()
        .map(|clause| match clause {
            Bson::Document(clause) => matches(doc, clause),
            _ => Err(MirrorError::UnsupportedOperator(format!(
                "{} clauses must be documents",
                op
            ))),
        })
        .collect()
}

/// Operator document such as `{ "$in": [...] }`
fn operator_doc(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(inner) if !inner.is_empty() && has_operators(inner) => Some(inner),
        _ => None,
    }
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> Result<bool> {
    let Some(operators) = operator_doc(condition) else {
        return Ok(equals(value, condition));
    };

    for (op, operand) in operators {
        let matched = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$in" => in_array(value, operand, op)?,
            "$nin" => !in_array(value, operand, op)?,
            "$exists" => {
                let wanted = !matches!(operand, Bson::Boolean(false) | Bson::Null);
                value.is_some() == wanted
            }
            other => return Err(MirrorError::UnsupportedOperator(other.to_string())),
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Equality with Mongo's rule that a missing field equals null
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        Some(actual) => actual == expected,
        None => matches!(expected, Bson::Null),
    }
}

fn in_array(value: Option<&Bson>, operand: &Bson, op: &str) -> Result<bool> {
    let Bson::Array(candidates) = operand else {
        return Err(MirrorError::UnsupportedOperator(format!("{} expects an array", op)));
    };
    Ok(candidates.iter().any(|candidate| equals(value, candidate)))
}

/// Apply a normalised update to a document in place
///
/// Returns whether the document changed. The identity field can be set to
/// its current value but never altered or removed.
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool> {
    let before = doc.clone();

    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(MirrorError::UnsupportedOperator(format!(
                "{} expects a document of fields",
                op
            )));
        };

        for (path, value) in fields {
            if path == ID_FIELD && !(op == "$set" && before.get(ID_FIELD) == Some(value)) {
                return Err(MirrorError::ImmutableField(ID_FIELD.to_string()));
            }

            match op.as_str() {
                "$set" => set_path(doc, path, value.clone()),
                "$unset" => unset_path(doc, path),
                "$inc" => {
                    let current = lookup(doc, path).cloned();
                    set_path(doc, path, increment(current, value, path)?);
                }
                other => return Err(MirrorError::UnsupportedOperator(other.to_string())),
            }
        }
    }

    Ok(*doc != before)
}

fn increment(current: Option<Bson>, by: &Bson, path: &str) -> Result<Bson> {
    let sum = match (current.unwrap_or(Bson::Int32(0)), by) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(
            a.checked_add(*b)
                .map(Bson::Int32)
                .unwrap_or(Bson::Int64(i64::from(a) + i64::from(*b))),
        ),
        (Bson::Int32(a), Bson::Int64(b)) => i64::from(a).checked_add(*b).map(Bson::Int64),
        (Bson::Int64(a), Bson::Int32(b)) => a.checked_add(i64::from(*b)).map(Bson::Int64),
        (Bson::Int64(a), Bson::Int64(b)) => a.checked_add(*b).map(Bson::Int64),
        (Bson::Double(a), Bson::Double(b)) => Some(Bson::Double(a + b)),
        (Bson::Double(a), Bson::Int32(b)) => Some(Bson::Double(a + f64::from(*b))),
        (Bson::Int32(a), Bson::Double(b)) => Some(Bson::Double(f64::from(a) + b)),
        _ => {
            return Err(MirrorError::UnsupportedOperator(format!(
                "$inc on non-numeric field '{}'",
                path
            )))
        }
    };

    sum.ok_or_else(|| MirrorError::UnsupportedOperator(format!("$inc overflows field '{}'", path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_update_wraps_plain_fields() {
        assert_eq!(
            normalize_update(doc! { "n": "Yu-Jen Sun" }),
            doc! { "$set": { "n": "Yu-Jen Sun" } }
        );

        let already = doc! { "$unset": { "n": "" } };
        assert_eq!(normalize_update(already.clone()), already);
    }

    #[test]
    fn test_strip_undefined_keeps_null() {
        let stripped = strip_undefined(doc! {
            "_id": Bson::Undefined,
            "username": "haha",
            "name": Bson::Null,
        });
        assert_eq!(stripped, doc! { "username": "haha", "name": Bson::Null });
    }

    #[test]
    fn test_strip_undefined_recurses_into_subdocuments() {
        let stripped = strip_undefined(doc! {
            "_id": 1,
            "profile": { "email": Bson::Undefined, "city": "Taipei" },
        });
        assert_eq!(stripped, doc! { "_id": 1, "profile": { "city": "Taipei" } });
    }

    #[test]
    fn test_equality_and_missing_fields() {
        let user = doc! { "u": "haha", "n": "John Sun" };

        assert!(matches(&user, &doc! { "u": "haha" }).unwrap());
        assert!(!matches(&user, &doc! { "u": "hoho" }).unwrap());
        assert!(matches(&user, &doc! { "missing": Bson::Null }).unwrap());
        assert!(matches(&user, &Document::new()).unwrap());
        // Undefined never equals a stored value
        assert!(!matches(&user, &doc! { "u": Bson::Undefined }).unwrap());
    }

    #[test]
    fn test_operators() {
        let user = doc! { "u": "u1", "profile": { "age": 30 } };

        assert!(matches(&user, &doc! { "u": { "$in": ["u1", "u2"] } }).unwrap());
        assert!(matches(&user, &doc! { "u": { "$nin": ["u3"] } }).unwrap());
        assert!(matches(&user, &doc! { "u": { "$ne": "u2" } }).unwrap());
        assert!(matches(&user, &doc! { "n": { "$exists": false } }).unwrap());
        assert!(matches(&user, &doc! { "profile.age": 30 }).unwrap());
        assert!(matches(
            &user,
            &doc! { "$or": [ { "u": "nobody" }, { "profile.age": 30 } ] }
        )
        .unwrap());
        assert!(!matches(
            &user,
            &doc! { "$and": [ { "u": "u1" }, { "profile.age": 31 } ] }
        )
        .unwrap());

        let err = matches(&user, &doc! { "u": { "$regex": "u" } }).unwrap_err();
        assert!(matches!(err, MirrorError::UnsupportedOperator(_)));
    }

    #[test]
    fn test_apply_update_operators() {
        let mut user = doc! { "_id": 1, "u": "haha", "n": "John Sun", "logins": 1 };

        let changed = apply_update(
            &mut user,
            &doc! {
                "$set": { "n": "Yu-Jen Sun", "profile.city": "Taipei" },
                "$inc": { "logins": 2 },
                "$unset": { "u": "" },
            },
        )
        .unwrap();

        assert!(changed);
        assert_eq!(
            user,
            doc! { "_id": 1, "n": "Yu-Jen Sun", "logins": 3, "profile": { "city": "Taipei" } }
        );

        let unchanged = apply_update(&mut user, &doc! { "$set": { "n": "Yu-Jen Sun" } }).unwrap();
        assert!(!unchanged);
    }

    #[test]
    fn test_inc_overflow_is_an_error() {
        let mut counter = doc! { "_id": 1, "n": i64::MAX };

        let err = apply_update(&mut counter, &doc! { "$inc": { "n": 1i64 } }).unwrap_err();
        assert!(matches!(err, MirrorError::UnsupportedOperator(_)));
        let err = apply_update(&mut counter, &doc! { "$inc": { "n": 1 } }).unwrap_err();
        assert!(matches!(err, MirrorError::UnsupportedOperator(_)));
        assert_eq!(counter.get_i64("n").unwrap(), i64::MAX);

        // Int32 overflow widens instead
        let mut small = doc! { "_id": 2, "n": i32::MAX };
        apply_update(&mut small, &doc! { "$inc": { "n": 1 } }).unwrap();
        assert_eq!(small.get_i64("n").unwrap(), i64::from(i32::MAX) + 1);
    }

    #[test]
    fn test_identity_is_immutable() {
        let mut user = doc! { "_id": 1, "u": "haha" };

        assert!(apply_update(&mut user, &doc! { "$set": { "_id": 1 } }).is_ok());

        let err = apply_update(&mut user, &doc! { "$set": { "_id": 2 } }).unwrap_err();
        assert!(matches!(err, MirrorError::ImmutableField(_)));

        let err = apply_update(&mut user, &doc! { "$unset": { "_id": "" } }).unwrap_err();
        assert!(matches!(err, MirrorError::ImmutableField(_)));
        assert_eq!(user.get("_id"), Some(&Bson::Int32(1)));
    }
}

//! Index declarations and live index records.
//!
//! An [`IndexDeclaration`] describes an index a model wants: an ordered key pattern and
//! a set of options. A [`LiveIndex`] is an index as reported by the database. The two are
//! compared with [`indexes_equal`], which the reconciler uses to decide whether a live
//! index can be kept as-is.
//!
//! # Example
//!
//! ```ignore
//! use mongomodel::index::IndexDeclaration;
//! use bson::doc;
//!
//! let by_name = IndexDeclaration::ascending("name").unique(true);
//! let by_owner = IndexDeclaration::new(doc! { "owner": 1, "created_at": -1 })
//!     .name("owner_recent");
//! ```

use bson::{Bson, Document, doc};
use std::time::Duration;

use crate::error::{ModelError, ModelResult};

/// Name the server gives the mandatory primary key index.
pub const DEFAULT_ID_INDEX: &str = "_id_";

/// Live-record fields that are server metadata rather than part of an index definition.
const INTERNAL_FIELDS: [&str; 2] = ["v", "ns"];

/// A declared index: key pattern plus options.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDeclaration {
    keys: Document,
    options: Document,
}

impl IndexDeclaration {
    /// Creates a declaration for the given key pattern, e.g. `{"a": 1, "b": -1}`.
    pub fn new(keys: Document) -> Self {
        Self { keys, options: Document::new() }
    }

    /// Creates an ascending single-field declaration.
    pub fn ascending(field: impl Into<String>) -> Self {
        let field: String = field.into();
        Self::new(doc! { field: 1 })
    }

    /// Creates a descending single-field declaration.
    pub fn descending(field: impl Into<String>) -> Self {
        let field: String = field.into();
        Self::new(doc! { field: -1 })
    }

    /// Appends a field to the key pattern.
    pub fn key(mut self, field: impl Into<String>, direction: impl Into<Bson>) -> Self {
        self.keys.insert(field.into(), direction.into());
        self
    }

    /// Sets an explicit index name instead of the generated one.
    pub fn name(self, name: impl Into<String>) -> Self {
        self.option("name", name.into())
    }

    /// Enforces uniqueness of the indexed values.
    pub fn unique(self, unique: bool) -> Self {
        self.option("unique", unique)
    }

    /// Skips documents that lack the indexed fields.
    pub fn sparse(self, sparse: bool) -> Self {
        self.option("sparse", sparse)
    }

    /// Requests a background build on servers that still honour the flag.
    pub fn background(self, background: bool) -> Self {
        self.option("background", background)
    }

    /// Restricts the index to documents matching the filter.
    pub fn partial_filter(self, filter: impl Into<Document>) -> Self {
        self.option("partialFilterExpression", filter.into())
    }

    /// Turns the index into a TTL index.
    ///
    /// Durations beyond `i64::MAX` seconds are clamped to it.
    pub fn expire_after(self, ttl: Duration) -> Self {
        self.option("expireAfterSeconds", i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
    }

    /// Sets the collation used by the index.
    pub fn collation(self, collation: Document) -> Self {
        self.option("collation", collation)
    }

    /// Sets an arbitrary index option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Returns the key pattern.
    pub fn keys(&self) -> &Document {
        &self.keys
    }

    /// Returns the options, without the key pattern.
    pub fn options(&self) -> &Document {
        &self.options
    }

    /// Returns the explicit name, or the name the server will derive from the keys.
    pub fn index_name(&self) -> String {
        match self.options.get_str("name") {
            Ok(name) => name.to_string(),
            Err(_) => default_index_name(&self.keys),
        }
    }

    /// Returns the full specification, `{key, name, ...options}`.
    ///
    /// This is the shape a live index record has once server metadata is removed.
    pub fn document(&self) -> Document {
        let mut document = doc! {
            "key": self.keys.clone(),
            "name": self.index_name(),
        };

        for (key, value) in self.options.iter() {
            if key != "name" {
                document.insert(key.clone(), value.clone());
            }
        }

        document
    }
}

/// Derives an index name from a key pattern the way the drivers do: `a_1_b_-1`.
pub fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| {
            let direction = match direction {
                Bson::String(kind) => kind.clone(),
                other => other.to_string(),
            };
            format!("{field}_{direction}")
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// An index as reported by the database.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveIndex {
    name: String,
    keys: Document,
    record: Document,
}

impl LiveIndex {
    /// Returns the server-assigned name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key pattern.
    pub fn keys(&self) -> &Document {
        &self.keys
    }

    /// Returns the raw record, including server metadata such as `v`.
    pub fn document(&self) -> &Document {
        &self.record
    }
}

impl TryFrom<Document> for LiveIndex {
    type Error = ModelError;

    fn try_from(record: Document) -> ModelResult<Self> {
        let name = record
            .get_str("name")
            .map_err(|_| ModelError::InvalidDocument("index record has no name".to_string()))?
            .to_string();
        let keys = record
            .get_document("key")
            .map_err(|_| ModelError::InvalidDocument(format!("index {name} has no key pattern")))?
            .clone();

        Ok(Self { name, keys, record })
    }
}

/// Compares a declaration against a live index.
///
/// Server metadata (`v`, `ns`) is stripped from the live record, then the remainder is
/// compared field-for-field with [`IndexDeclaration::document`]. The key pattern is
/// compared in order; other fields ignore ordering.
pub fn indexes_equal(declared: &IndexDeclaration, live: &LiveIndex) -> bool {
    let mut record = live.document().clone();
    for field in INTERNAL_FIELDS {
        record.remove(field);
    }

    let expected = declared.document();
    if record.len() != expected.len() || !key_patterns_equal(declared.keys(), live.keys()) {
        return false;
    }

    expected
        .iter()
        .filter(|(field, _)| field.as_str() != "key")
        .all(|(field, value)| {
            record
                .get(field)
                .is_some_and(|actual| values_equal(value, actual))
        })
}

/// Compares two key patterns; field order and directions must match.
pub fn key_patterns_equal(left: &Document, right: &Document) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right.iter())
            .all(|((lk, lv), (rk, rv))| lk == rk && values_equal(lv, rv))
}

/// Structural equality where numbers compare by value (`1 == 1.0`) and documents
/// ignore field order.
fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (left, right) {
        (Bson::Document(l), Bson::Document(r)) => {
            l.len() == r.len()
                && l.iter()
                    .all(|(key, value)| r.get(key).is_some_and(|other| values_equal(value, other)))
        }
        (Bson::Array(l), Bson::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r.iter()).all(|(a, b)| values_equal(a, b))
        }
        _ => match (as_number(left), as_number(right)) {
            (Some(l), Some(r)) => l == r,
            _ => left == right,
        },
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(record: Document) -> LiveIndex {
        LiveIndex::try_from(record).unwrap()
    }

    #[test]
    fn test_default_names() {
        assert_eq!(IndexDeclaration::ascending("name").index_name(), "name_1");
        assert_eq!(
            IndexDeclaration::new(doc! { "a": 1, "b": -1, "body": "text" }).index_name(),
            "a_1_b_-1_body_text"
        );
        assert_eq!(IndexDeclaration::ascending("name").name("Extra").index_name(), "Extra");
    }

    #[test]
    fn test_document_form() {
        let declared = IndexDeclaration::descending("age")
            .unique(true)
            .expire_after(Duration::from_secs(60));

        assert_eq!(
            declared.document(),
            doc! { "key": { "age": -1 }, "name": "age_-1", "unique": true, "expireAfterSeconds": 60_i64 }
        );
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let declared = IndexDeclaration::ascending("at").expire_after(Duration::MAX);
        assert_eq!(declared.options().get_i64("expireAfterSeconds").unwrap(), i64::MAX);
    }

    #[test]
    fn test_equal_ignores_server_metadata() {
        let declared = IndexDeclaration::ascending("name");
        let record = live(doc! { "v": 2, "key": { "name": 1 }, "name": "name_1", "ns": "test.users" });

        assert!(indexes_equal(&declared, &record));
    }

    #[test]
    fn test_option_mismatch() {
        let record = live(doc! { "v": 2, "key": { "name": 1 }, "name": "name_1" });

        assert!(!indexes_equal(&IndexDeclaration::ascending("name").unique(true), &record));
        assert!(!indexes_equal(&IndexDeclaration::ascending("name").name("Extra"), &record));
    }

    #[test]
    fn test_key_order_matters() {
        let declared = IndexDeclaration::new(doc! { "a": 1, "b": 1 }).name("ab");
        let record = live(doc! { "v": 2, "key": { "b": 1, "a": 1 }, "name": "ab" });

        assert!(!key_patterns_equal(declared.keys(), record.keys()));
        assert!(!indexes_equal(&declared, &record));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let declared = IndexDeclaration::ascending("created")
            .expire_after(Duration::from_secs(3600));
        let record = live(doc! {
            "v": 2,
            "key": { "created": 1.0 },
            "name": "created_1",
            "expireAfterSeconds": 3600,
        });

        assert!(indexes_equal(&declared, &record));
    }

    #[test]
    fn test_invalid_live_record() {
        assert!(LiveIndex::try_from(doc! { "key": { "a": 1 } }).is_err());
        assert!(LiveIndex::try_from(doc! { "name": "a_1" }).is_err());
    }
}

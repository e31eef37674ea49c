//! Filter and update evaluation for in-memory documents.
//!
//! Filters are plain MongoDB filter documents. The evaluator understands the comparison
//! operators (`$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`), the element and
//! array operators (`$exists`, `$all`, `$size`), negation (`$not`), the logical
//! combinators (`$and`, `$or`, `$nor`) and `$comment`. Fields may be dotted paths; a
//! path step over an array visits every element. Any other operator is reported as
//! [`ModelError::Unsupported`] rather than silently treated as a mismatch.
//!
//! Updates support `$set`, `$unset` and `$inc`.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use mongomodel_core::error::{ModelError, ModelResult};

/// Comparable view of a BSON value.
///
/// Numbers are normalized to `f64` so `1`, `1_i64` and `1.0` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Any other value; compared by plain BSON equality and never ordered.
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Returns `true` if two values are equal under numeric normalization.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Returns every value reachable through a dotted path.
///
/// An empty result means the field is missing.
pub(crate) fn resolve<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut current = vec![];
    let mut segments = path.split('.');

    match segments.next().and_then(|first| document.get(first)) {
        Some(value) => current.push(value),
        None => return current,
    }

    for segment in segments {
        let mut next = vec![];
        for value in current {
            match value {
                Bson::Document(inner) => next.extend(inner.get(segment)),
                Bson::Array(items) => match segment.parse::<usize>() {
                    Ok(position) => next.extend(items.get(position)),
                    Err(_) => next.extend(
                        items
                            .iter()
                            .filter_map(|item| item.as_document())
                            .filter_map(|inner| inner.get(segment)),
                    ),
                },
                _ => {}
            }
        }
        current = next;
    }

    current
}

/// Orders two optional values the way a sort does: missing and null values first,
/// incomparable values as equal.
pub(crate) fn sort_order(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);

    match (&left, &right) {
        (Comparable::Null, Comparable::Null) => Ordering::Equal,
        (Comparable::Null, _) => Ordering::Less,
        (_, Comparable::Null) => Ordering::Greater,
        _ => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

/// Evaluates filter documents against one stored document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Returns `true` if the document satisfies every top-level clause of `filter`.
    pub fn evaluate(&self, filter: &Document) -> ModelResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => self.all(clauses(key, condition)?)?,
                "$or" => self.any(clauses(key, condition)?)?,
                "$nor" => !self.any(clauses(key, condition)?)?,
                "$comment" => true,
                other if other.starts_with('$') => {
                    return Err(ModelError::Unsupported(format!("top-level operator {other}")));
                }
                field => self.matches_field(field, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Returns the documents among `documents` that satisfy `filter`.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> ModelResult<Vec<&'a Document>> {
        let mut matched = vec![];
        for document in documents {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                matched.push(document);
            }
        }
        Ok(matched)
    }

    fn all(&self, filters: Vec<&Document>) -> ModelResult<bool> {
        for filter in filters {
            if !self.evaluate(filter)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn any(&self, filters: Vec<&Document>) -> ModelResult<bool> {
        for filter in filters {
            if self.evaluate(filter)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn matches_field(&self, field: &str, condition: &Bson) -> ModelResult<bool> {
        let values = resolve(self.document, field);

        match operator_map(condition) {
            Some(operators) => matches_operators(&values, operators),
            None => Ok(equals_any(&values, condition)),
        }
    }
}

fn clauses<'b>(operator: &str, condition: &'b Bson) -> ModelResult<Vec<&'b Document>> {
    let invalid = || ModelError::InvalidDocument(format!("{operator} expects an array of documents"));

    condition
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|clause| clause.as_document().ok_or_else(invalid))
        .collect()
}

/// Returns the condition as an operator map if all its keys are operators.
fn operator_map(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(doc) if !doc.is_empty() && doc.keys().all(|key| key.starts_with('$')) => {
            Some(doc)
        }
        _ => None,
    }
}

fn matches_operators(values: &[&Bson], operators: &Document) -> ModelResult<bool> {
    for (operator, operand) in operators {
        if !matches_operator(values, operator, operand)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_operator(values: &[&Bson], operator: &str, operand: &Bson) -> ModelResult<bool> {
    let matched = match operator {
        "$eq" => equals_any(values, operand),
        "$ne" => !equals_any(values, operand),
        "$gt" => compares_any(values, operand, |ord| ord == Ordering::Greater),
        "$gte" => compares_any(values, operand, |ord| ord != Ordering::Less),
        "$lt" => compares_any(values, operand, |ord| ord == Ordering::Less),
        "$lte" => compares_any(values, operand, |ord| ord != Ordering::Greater),
        "$in" => array_operand(operator, operand)?
            .iter()
            .any(|candidate| equals_any(values, candidate)),
        "$nin" => !array_operand(operator, operand)?
            .iter()
            .any(|candidate| equals_any(values, candidate)),
        "$exists" => !values.is_empty() == truthy(operand),
        "$all" => {
            let required = array_operand(operator, operand)?;
            !required.is_empty() && required.iter().all(|item| equals_any(values, item))
        }
        "$size" => {
            let size = as_size(operand)
                .ok_or_else(|| ModelError::InvalidDocument("$size expects a number".to_string()))?;
            values
                .iter()
                .any(|value| matches!(value, Bson::Array(items) if items.len() as f64 == size))
        }
        "$not" => match operand {
            Bson::Document(inner) => !matches_operators(values, inner)?,
            _ => {
                return Err(ModelError::InvalidDocument(
                    "$not expects an operator document".to_string(),
                ));
            }
        },
        other => return Err(ModelError::Unsupported(format!("operator {other}"))),
    };

    Ok(matched)
}

/// Equality with array membership: an array field matches when it equals the operand
/// or contains it. A missing field equals `null`.
fn equals_any(values: &[&Bson], operand: &Bson) -> bool {
    if values.is_empty() {
        return matches!(operand, Bson::Null);
    }

    let expected = Comparable::from(operand);
    values.iter().any(|value| {
        Comparable::from(*value) == expected
            || matches!(value, Bson::Array(items) if items.iter().any(|item| Comparable::from(item) == expected))
    })
}

fn compares_any(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let expected = Comparable::from(operand);
    let accepts = |value: &Bson| {
        Comparable::from(value)
            .partial_cmp(&expected)
            .is_some_and(&accept)
    };

    values.iter().any(|value| match value {
        Bson::Array(items) => items.iter().any(|item| accepts(item)),
        single => accepts(*single),
    })
}

fn array_operand<'b>(operator: &str, operand: &'b Bson) -> ModelResult<&'b Vec<Bson>> {
    operand
        .as_array()
        .ok_or_else(|| ModelError::InvalidDocument(format!("{operator} expects an array")))
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Null => false,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}

fn as_size(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Applies an update document made of `$set`, `$unset` and `$inc` to `document`.
///
/// # Errors
///
/// Returns [`ModelError::InvalidDocument`] for replacement-style updates, updates that
/// touch `_id` or `$inc` on non-numeric values, and [`ModelError::Unsupported`] for any
/// other update operator.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> ModelResult<()> {
    if update.is_empty() || !update.keys().all(|key| key.starts_with('$')) {
        return Err(ModelError::InvalidDocument(
            "update document must contain only update operators".to_string(),
        ));
    }

    for (operator, fields) in update {
        let fields = fields.as_document().ok_or_else(|| {
            ModelError::InvalidDocument(format!("{operator} expects a document"))
        })?;

        for (path, value) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err(ModelError::InvalidDocument(
                    "the _id field cannot be updated".to_string(),
                ));
            }

            match operator.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$unset" => unset_path(document, path),
                "$inc" => {
                    let current = resolve(document, path).first().map(|value| (*value).clone());
                    let next = increment(current.as_ref(), value).ok_or_else(|| {
                        ModelError::InvalidDocument(format!("cannot increment non-numeric field {path}"))
                    })?;
                    set_path(document, path, next)?;
                }
                other => return Err(ModelError::Unsupported(format!("update operator {other}"))),
            }
        }
    }

    Ok(())
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> ModelResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }
            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(ModelError::InvalidDocument(format!(
                    "cannot create field {rest} inside non-document {head}"
                ))),
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

fn increment(current: Option<&Bson>, by: &Bson) -> Option<Bson> {
    match (current.unwrap_or(&Bson::Int32(0)), by) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(
            a.checked_add(*b)
                .map(Bson::Int32)
                .unwrap_or(Bson::Int64(*a as i64 + *b as i64)),
        ),
        (Bson::Int32(a), Bson::Int64(b)) => Some(Bson::Int64(*a as i64 + b)),
        (Bson::Int64(a), Bson::Int32(b)) => Some(Bson::Int64(a + *b as i64)),
        (Bson::Int64(a), Bson::Int64(b)) => Some(Bson::Int64(a + b)),
        (a, b) => match (as_size(a), as_size(b)) {
            (Some(a), Some(b)) => Some(Bson::Double(a + b)),
            _ => None,
        },
    }
}

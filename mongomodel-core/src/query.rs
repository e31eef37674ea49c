//! Filter construction for MongoDB collections.
//!
//! A [`Filter`] is a MongoDB filter document built from identifiers and per-field
//! [`Constraint`]s. Adding a constraint never silently overwrites an existing one:
//! constraints on the same field are merged, and two different values for the same
//! field and operator are reported as [`ModelError::ValueConflict`].
//!
//! # Building filters
//!
//! ```ignore
//! use mongomodel::query::{Filter, Constraint, Op};
//!
//! // {"name": "Alice", "age": {"$gt": 20, "$lt": 65}}
//! let filter = Filter::new()
//!     .eq("name", "Alice")?
//!     .gt("age", 20)?
//!     .lt("age", 65)?;
//!
//! // The same filter from `field__op` keys.
//! let filter = Filter::build(
//!     Vec::<bson::Bson>::new(),
//!     [
//!         Constraint::parse("name", "Alice"),
//!         Constraint::parse("age__gt", 20),
//!         Constraint::parse("age__lt", 65),
//!     ],
//! )?;
//! ```
//!
//! # Identifiers
//!
//! - One identifier `v` filters on `{"_id": v}`.
//! - Several identifiers filter on `{"_id": {"$in": [...]}}`, skipping nulls.
//! - A single null identifier produces `{"_id": {"$in": []}}`, which matches no document.
//!
//! # Composition
//!
//! Filters combine structurally with [`Filter::and`], [`Filter::or`] and [`Filter::nor`],
//! or with the `&` and `|` operators: `(a & b) | c` is `{"$or": [{"$and": [a, b]}, c]}`.

use bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    ops::{BitAnd, BitOr},
};

use crate::error::{ModelError, ModelResult};

/// Name of the primary key field in every MongoDB collection.
pub const ID_FIELD: &str = "_id";

/// Query operator tags.
///
/// Each variant maps to a `$`-prefixed MongoDB operator. Operators without a
/// dedicated variant are carried by [`Op::Custom`] with their full tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    /// `$eq`
    Eq,
    /// `$ne`
    Ne,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$in`
    In,
    /// `$nin`
    Nin,
    /// `$exists`
    Exists,
    /// `$type`
    Type,
    /// `$regex`
    Regex,
    /// `$mod`
    Mod,
    /// `$all`
    All,
    /// `$size`
    Size,
    /// `$elemMatch`
    ElemMatch,
    /// `$not`
    Not,
    /// `$bitsAllSet`
    BitsAllSet,
    /// `$bitsAllClear`
    BitsAllClear,
    /// `$bitsAnySet`
    BitsAnySet,
    /// `$bitsAnyClear`
    BitsAnyClear,
    /// Any other operator, stored with its `$` prefix.
    Custom(String),
}

impl Op {
    /// Returns the MongoDB operator tag, including the `$` prefix.
    pub fn tag(&self) -> &str {
        match self {
            Op::Eq => "$eq",
            Op::Ne => "$ne",
            Op::Gt => "$gt",
            Op::Gte => "$gte",
            Op::Lt => "$lt",
            Op::Lte => "$lte",
            Op::In => "$in",
            Op::Nin => "$nin",
            Op::Exists => "$exists",
            Op::Type => "$type",
            Op::Regex => "$regex",
            Op::Mod => "$mod",
            Op::All => "$all",
            Op::Size => "$size",
            Op::ElemMatch => "$elemMatch",
            Op::Not => "$not",
            Op::BitsAllSet => "$bitsAllSet",
            Op::BitsAllClear => "$bitsAllClear",
            Op::BitsAnySet => "$bitsAnySet",
            Op::BitsAnyClear => "$bitsAnyClear",
            Op::Custom(tag) => tag,
        }
    }

    /// Parses a snake_case operator name such as `gt` or `bits_all_set`.
    ///
    /// Names without a dedicated variant are converted to camelCase and become
    /// [`Op::Custom`], so `near_sphere` yields `$nearSphere`.
    pub fn from_snake(name: &str) -> Self {
        match name {
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "in" => Op::In,
            "nin" => Op::Nin,
            "exists" => Op::Exists,
            "type" => Op::Type,
            "regex" => Op::Regex,
            "mod" => Op::Mod,
            "all" => Op::All,
            "size" => Op::Size,
            "elem_match" => Op::ElemMatch,
            "not" => Op::Not,
            "bits_all_set" => Op::BitsAllSet,
            "bits_all_clear" => Op::BitsAllClear,
            "bits_any_set" => Op::BitsAnySet,
            "bits_any_clear" => Op::BitsAnyClear,
            other => Op::from_tag(&format!("${}", snake_to_camel(other))),
        }
    }

    /// Parses a full operator tag such as `$gt`.
    ///
    /// Tags with a dedicated variant map to it, so `Op::from_tag("$eq")` is [`Op::Eq`].
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "$eq" => Op::Eq,
            "$ne" => Op::Ne,
            "$gt" => Op::Gt,
            "$gte" => Op::Gte,
            "$lt" => Op::Lt,
            "$lte" => Op::Lte,
            "$in" => Op::In,
            "$nin" => Op::Nin,
            "$exists" => Op::Exists,
            "$type" => Op::Type,
            "$regex" => Op::Regex,
            "$mod" => Op::Mod,
            "$all" => Op::All,
            "$size" => Op::Size,
            "$elemMatch" => Op::ElemMatch,
            "$not" => Op::Not,
            "$bitsAllSet" => Op::BitsAllSet,
            "$bitsAllClear" => Op::BitsAllClear,
            "$bitsAnySet" => Op::BitsAnySet,
            "$bitsAnyClear" => Op::BitsAnyClear,
            other => Op::Custom(other.to_string()),
        }
    }

    /// Replaces a custom tag that names a dedicated variant with that variant.
    fn normalize(self) -> Self {
        match self {
            Op::Custom(tag) => Op::from_tag(&tag),
            op => op,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

fn snake_to_camel(name: &str) -> String {
    let mut parts = name.split('_').filter(|part| !part.is_empty());
    let mut camel = parts.next().unwrap_or_default().to_string();

    for part in parts {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            camel.extend(first.to_uppercase());
            camel.push_str(chars.as_str());
        }
    }

    camel
}

/// A single `(field, operator, value)` constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// The constrained field. Dotted paths address embedded documents.
    pub field: String,
    /// The operator applied to the field.
    pub op: Op,
    /// The operand, passed through verbatim.
    pub value: Bson,
}

impl Constraint {
    /// Creates a constraint from its parts.
    ///
    /// A custom operator whose tag has a dedicated variant is stored as that variant.
    pub fn new(field: impl Into<String>, op: Op, value: impl Into<Bson>) -> Self {
        Self { field: field.into(), op: op.normalize(), value: value.into() }
    }

    /// Parses a `field__op` key.
    ///
    /// The operator is the part after the last double underscore (`age__gt`,
    /// `mask__bits_all_set`). A key without one is an equality constraint.
    pub fn parse(key: &str, value: impl Into<Bson>) -> Self {
        match key.rsplit_once("__") {
            Some((field, op)) if !field.is_empty() && !op.is_empty() => {
                Self::new(field, Op::from_snake(op), value)
            }
            _ => Self::new(key, Op::Eq, value),
        }
    }
}

/// Arguments of a `$text` query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSearch {
    search: String,
    language: Option<String>,
    case_sensitive: Option<bool>,
    diacritic_sensitive: Option<bool>,
}

impl TextSearch {
    /// Creates a text search for the given terms.
    pub fn new(search: impl Into<String>) -> Self {
        Self { search: search.into(), ..Default::default() }
    }

    /// Sets the language that determines stop words and stemming.
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Enables or disables case sensitive matching.
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = Some(case_sensitive);
        self
    }

    /// Enables or disables diacritic sensitive matching.
    pub fn diacritic_sensitive(mut self, diacritic_sensitive: bool) -> Self {
        self.diacritic_sensitive = Some(diacritic_sensitive);
        self
    }

    fn to_document(&self) -> Document {
        let mut text = doc! { "$search": self.search.as_str() };

        if let Some(language) = &self.language {
            text.insert("$language", language.as_str());
        }
        if let Some(case_sensitive) = self.case_sensitive {
            text.insert("$caseSensitive", case_sensitive);
        }
        if let Some(diacritic_sensitive) = self.diacritic_sensitive {
            text.insert("$diacriticSensitive", diacritic_sensitive);
        }

        text
    }
}

impl From<&str> for TextSearch {
    fn from(search: &str) -> Self {
        TextSearch::new(search)
    }
}

impl From<String> for TextSearch {
    fn from(search: String) -> Self {
        TextSearch::new(search)
    }
}

/// A MongoDB filter document.
///
/// Created fresh for every query and handed to a backend by value. The only
/// mutating operations are [`Filter::extend`] and [`Filter::comment`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Document);

impl Filter {
    /// Creates an empty filter that matches every document.
    pub fn new() -> Self {
        Filter(Document::new())
    }

    /// Builds a filter from identifiers and constraints.
    ///
    /// Identifiers are applied first (see the [module documentation](self)), then
    /// each constraint in order through [`Filter::extend`].
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ValueConflict`] if two constraints assign different
    /// values to the same field and operator.
    pub fn build<I, V, C>(identifiers: I, constraints: C) -> ModelResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
        C: IntoIterator<Item = Constraint>,
    {
        let mut filter = Filter::new();

        if let Some(constraint) = identifier_constraint(identifiers) {
            filter.extend(constraint)?;
        }
        filter.extend_all(constraints)?;

        Ok(filter)
    }

    /// Builds a filter from constraints only.
    pub fn from_constraints(constraints: impl IntoIterator<Item = Constraint>) -> ModelResult<Self> {
        Self::build(Vec::<Bson>::new(), constraints)
    }

    /// Creates a filter matching a single identifier.
    ///
    /// A null identifier yields a filter that matches nothing.
    pub fn by_id(id: impl Into<Bson>) -> Self {
        Self::by_ids([id])
    }

    /// Creates a filter matching any of the given identifiers.
    pub fn by_ids<V: Into<Bson>>(ids: impl IntoIterator<Item = V>) -> Self {
        let mut filter = Filter::new();

        if let Some(Constraint { field, op, value }) = identifier_constraint(ids) {
            filter.0.insert(field, constrained_value(&op, value));
        }

        filter
    }

    /// Adds a constraint to this filter.
    ///
    /// - A field without constraints stores an equality value bare and any other
    ///   operator as `{op: value}`. An equality value that is itself a document of
    ///   `$` keys is stored as `{"$eq": value}` so it is not read as operators.
    /// - A bare value followed by another operator is promoted to
    ///   `{"$eq": bare, op: value}`.
    /// - Repeating a field and operator with an equal value is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ValueConflict`] if the field already carries a different
    /// value for the same operator. The filter is left unchanged in that case.
    pub fn extend(&mut self, constraint: Constraint) -> ModelResult<&mut Self> {
        let Constraint { field, op, value } = constraint;
        let op = op.normalize();

        let Some(current) = self.0.get_mut(&field) else {
            self.0.insert(field, constrained_value(&op, value));
            return Ok(self);
        };

        if let Some(operators) = as_operator_map_mut(current) {
            match operators.get(op.tag()) {
                Some(existing) if *existing == value => {}
                Some(existing) => return Err(conflict(&field, &op, existing.clone(), value)),
                None => {
                    operators.insert(op.tag(), value);
                }
            }
        } else if op == Op::Eq {
            if *current != value {
                return Err(conflict(&field, &op, current.clone(), value));
            }
        } else {
            let bare = current.clone();
            *current = Bson::Document(doc! { "$eq": bare, op.tag(): value });
        }

        Ok(self)
    }

    /// Adds several constraints in order, stopping at the first conflict.
    pub fn extend_all(
        &mut self,
        constraints: impl IntoIterator<Item = Constraint>,
    ) -> ModelResult<&mut Self> {
        for constraint in constraints {
            self.extend(constraint)?;
        }

        Ok(self)
    }

    /// Adds a constraint and returns the filter, for chained construction.
    pub fn with(mut self, field: impl Into<String>, op: Op, value: impl Into<Bson>) -> ModelResult<Self> {
        self.extend(Constraint::new(field, op, value))?;
        Ok(self)
    }

    /// Adds an equality constraint.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Bson>) -> ModelResult<Self> {
        self.with(field, Op::Eq, value)
    }

    /// Adds a `$ne` constraint.
    pub fn ne(self, field: impl Into<String>, value: impl Into<Bson>) -> ModelResult<Self> {
        self.with(field, Op::Ne, value)
    }

    /// Adds a `$gt` constraint.
    pub fn gt(self, field: impl Into<String>, value: impl Into<Bson>) -> ModelResult<Self> {
        self.with(field, Op::Gt, value)
    }

    /// Adds a `$gte` constraint.
    pub fn gte(self, field: impl Into<String>, value: impl Into<Bson>) -> ModelResult<Self> {
        self.with(field, Op::Gte, value)
    }

    /// Adds a `$lt` constraint.
    pub fn lt(self, field: impl Into<String>, value: impl Into<Bson>) -> ModelResult<Self> {
        self.with(field, Op::Lt, value)
    }

    /// Adds a `$lte` constraint.
    pub fn lte(self, field: impl Into<String>, value: impl Into<Bson>) -> ModelResult<Self> {
        self.with(field, Op::Lte, value)
    }

    /// Adds an `$in` constraint.
    pub fn in_<V: Into<Bson>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> ModelResult<Self> {
        self.with(field, Op::In, values.into_iter().map(Into::into).collect::<Vec<Bson>>())
    }

    /// Adds a `$nin` constraint.
    pub fn nin<V: Into<Bson>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> ModelResult<Self> {
        self.with(field, Op::Nin, values.into_iter().map(Into::into).collect::<Vec<Bson>>())
    }

    /// Adds an `$exists` constraint.
    pub fn exists(self, field: impl Into<String>, exists: bool) -> ModelResult<Self> {
        self.with(field, Op::Exists, exists)
    }

    /// Combines two filters with `$and`.
    pub fn and(self, other: impl Into<Filter>) -> Filter {
        self.combine("$and", other.into())
    }

    /// Combines two filters with `$or`.
    pub fn or(self, other: impl Into<Filter>) -> Filter {
        self.combine("$or", other.into())
    }

    /// Combines two filters with `$nor`.
    pub fn nor(self, other: impl Into<Filter>) -> Filter {
        self.combine("$nor", other.into())
    }

    fn combine(self, operator: &str, other: Filter) -> Filter {
        let (left, right) = (self.0, other.0);
        Filter(doc! { operator: [left, right] })
    }

    /// Attaches a `$comment` to the filter.
    pub fn comment(&mut self, text: impl Into<String>) -> &mut Self {
        self.0.insert("$comment", text.into());
        self
    }

    /// Creates a `$jsonSchema` filter.
    pub fn schema(json_schema: Document) -> Filter {
        Filter(doc! { "$jsonSchema": json_schema })
    }

    /// Creates an `$expr` filter from an aggregation expression.
    pub fn expr(expression: impl Into<Bson>) -> Filter {
        Filter(doc! { "$expr": expression.into() })
    }

    /// Creates a `$text` filter.
    pub fn text(search: impl Into<TextSearch>) -> Filter {
        Filter(doc! { "$text": search.into().to_document() })
    }

    /// Creates a `$where` filter from a JavaScript expression.
    pub fn where_(javascript: impl Into<Bson>) -> Filter {
        Filter(doc! { "$where": javascript.into() })
    }

    /// Returns the value stored for a field, if any.
    pub fn get(&self, field: &str) -> Option<&Bson> {
        self.0.get(field)
    }

    /// Returns `true` if the filter has no constraints.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying filter document.
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Consumes the filter and returns the filter document.
    pub fn into_document(self) -> Document {
        self.0
    }
}

/// Resolves identifiers to the `_id` constraint they imply.
fn identifier_constraint<V: Into<Bson>>(ids: impl IntoIterator<Item = V>) -> Option<Constraint> {
    let mut ids = ids.into_iter().map(Into::into).collect::<Vec<Bson>>();

    match ids.len() {
        0 => None,
        1 => match ids.remove(0) {
            Bson::Null => Some(Constraint::new(ID_FIELD, Op::In, Bson::Array(vec![]))),
            id => Some(Constraint::new(ID_FIELD, Op::Eq, id)),
        },
        _ => Some(Constraint::new(
            ID_FIELD,
            Op::In,
            ids.into_iter()
                .filter(|id| !matches!(id, Bson::Null))
                .collect::<Vec<Bson>>(),
        )),
    }
}

fn constrained_value(op: &Op, value: Bson) -> Bson {
    match (op, value) {
        (Op::Eq, Bson::Document(document)) if is_operator_map(&document) => {
            Bson::Document(doc! { "$eq": document })
        }
        (Op::Eq, value) => value,
        (op, value) => Bson::Document(doc! { op.tag(): value }),
    }
}

/// An operator map is a non-empty document whose keys are all operator tags.
fn is_operator_map(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|key| key.starts_with('$'))
}

fn as_operator_map_mut(value: &mut Bson) -> Option<&mut Document> {
    match value {
        Bson::Document(document) => {
            if is_operator_map(document) {
                Some(document)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn conflict(field: &str, op: &Op, existing: Bson, requested: Bson) -> ModelError {
    ModelError::ValueConflict {
        field: field.to_string(),
        operator: op.tag().to_string(),
        existing,
        requested,
    }
}

impl From<Document> for Filter {
    fn from(document: Document) -> Self {
        Filter(document)
    }
}

impl From<Filter> for Document {
    fn from(filter: Filter) -> Self {
        filter.0
    }
}

impl From<Filter> for Bson {
    fn from(filter: Filter) -> Self {
        Bson::Document(filter.0)
    }
}

impl PartialEq<Document> for Filter {
    fn eq(&self, other: &Document) -> bool {
        &self.0 == other
    }
}

impl BitAnd for Filter {
    type Output = Filter;

    fn bitand(self, rhs: Filter) -> Filter {
        self.and(rhs)
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        self.or(rhs)
    }
}

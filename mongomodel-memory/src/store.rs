//! In-memory collections with index metadata.
//!
//! [`InMemoryStore`] is a database of named collections kept behind one async-aware
//! read-write lock. [`MemoryCollection`] is a handle to one of them and implements both
//! backend traits, so it can serve a [`ModelCollection`] and an [`IndexReconciler`].
//!
//! Index handling mirrors what a server does:
//!
//! - every collection starts with the `_id_` index, which cannot be dropped;
//! - index records carry a `v: 2` version field next to `key`, `name` and the options;
//! - creating an index whose name or key pattern is taken by a different index fails
//!   with [`ModelError::IndexConflict`], re-creating an identical index is a no-op;
//! - dropping an unknown index fails with [`ModelError::IndexNotFound`];
//! - unique indexes (honouring `sparse` and `partialFilterExpression`) reject duplicate
//!   writes with [`ModelError::DuplicateKey`].
//!
//! Every index change is appended to a per-collection event log, readable through
//! [`MemoryCollection::index_events`].
//!
//! [`ModelCollection`]: mongomodel_core::collection::ModelCollection
//! [`IndexReconciler`]: mongomodel_core::reconcile::IndexReconciler

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, Uuid, doc, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::debug;

use mongomodel_core::{
    backend::{CallOptions, DocumentBackend, FindOptions, IndexBackend, ReturnDocument, UpdateOutcome},
    document::Model,
    error::{ModelError, ModelResult},
    index::{DEFAULT_ID_INDEX, IndexDeclaration, LiveIndex, indexes_equal, key_patterns_equal},
    query::ID_FIELD,
};

use crate::evaluator::{DocumentEvaluator, apply_update, resolve, sort_order, values_equal};

type StoreMap = HashMap<String, CollectionData>;

/// An index change recorded by a [`MemoryCollection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    Created(String),
    Dropped(String),
}

#[derive(Debug, Clone)]
struct CollectionData {
    /// Documents in insertion order.
    documents: Vec<Document>,
    /// Index records in creation order, `_id_` first.
    indexes: Vec<Document>,
    events: Vec<IndexEvent>,
}

impl Default for CollectionData {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![doc! { "v": 2, "key": { "_id": 1 }, "name": DEFAULT_ID_INDEX }],
            events: Vec::new(),
        }
    }
}

/// Thread-safe in-memory database.
///
/// `InMemoryStore` is cloneable; clones share the same underlying collections, as do
/// all [`MemoryCollection`] handles obtained from them.
///
/// # Example
///
/// ```ignore
/// use mongomodel_memory::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// let users = store.collection("users");
/// users.insert_one(doc! { "name": "Alice" }).await?;
/// assert_eq!(store.list_collections().await, vec!["users"]);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the named collection.
    ///
    /// The collection itself is created by its first write or index creation.
    pub fn collection(&self, name: impl Into<String>) -> MemoryCollection {
        MemoryCollection {
            name: name.into(),
            store: Arc::clone(&self.store),
        }
    }

    /// Returns a handle to the collection configured for model `M`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Configuration`] if the model has no usable collection name.
    pub fn collection_for<M: Model>(&self) -> ModelResult<MemoryCollection> {
        let config = M::config()?;
        Ok(self.collection(config.collection_name()?))
    }

    /// Creates an empty collection if it does not exist yet.
    pub async fn create_collection(&self, name: &str) {
        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_default();
    }

    /// Drops a collection with all its documents and indexes.
    ///
    /// # Returns
    ///
    /// `false` if the collection did not exist.
    pub async fn drop_collection(&self, name: &str) -> bool {
        self.store.write().await.remove(name).is_some()
    }

    /// Returns the names of all existing collections, sorted.
    pub async fn list_collections(&self) -> Vec<String> {
        let mut names = self
            .store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

/// Handle to one collection of an [`InMemoryStore`].
#[derive(Clone, Debug)]
pub struct MemoryCollection {
    name: String,
    store: Arc<RwLock<StoreMap>>,
}

impl MemoryCollection {
    /// Returns the index changes applied to this collection so far.
    pub async fn index_events(&self) -> Vec<IndexEvent> {
        self.store
            .read()
            .await
            .get(&self.name)
            .map(|data| data.events.clone())
            .unwrap_or_default()
    }

    /// Inserts documents as-is, bypassing unique checks.
    ///
    /// Intended for seeding fixtures, including states a server would reject.
    pub async fn seed(&self, documents: impl IntoIterator<Item = Document>) {
        let mut store = self.store.write().await;
        store
            .entry(self.name.clone())
            .or_default()
            .documents
            .extend(documents);
    }

    async fn read_documents<T>(&self, f: impl FnOnce(&[Document]) -> ModelResult<T>) -> ModelResult<T> {
        let store = self.store.read().await;
        match store.get(&self.name) {
            Some(data) => f(&data.documents),
            None => f(&[]),
        }
    }
}

/// Session handle for [`MemoryCollection`].
///
/// The in-memory store has no transactions; the session only counts the calls it was
/// passed to, so tests can assert that a session is forwarded.
#[derive(Debug, Clone)]
pub struct MemorySession {
    id: Uuid,
    calls: u64,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    pub fn new() -> Self {
        Self { id: Uuid::new(), calls: 0 }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of backend calls this session was forwarded to.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn record(session: Option<&mut Self>) {
        if let Some(session) = session {
            session.calls += 1;
        }
    }
}

#[async_trait]
impl IndexBackend for MemoryCollection {
    type Session = MemorySession;

    async fn list_indexes(
        &self,
        _options: &CallOptions,
        session: Option<&mut MemorySession>,
    ) -> ModelResult<Vec<Document>> {
        MemorySession::record(session);

        Ok(self
            .store
            .read()
            .await
            .get(&self.name)
            .map(|data| data.indexes.clone())
            .unwrap_or_default())
    }

    async fn create_indexes(
        &self,
        indexes: Vec<IndexDeclaration>,
        options: &CallOptions,
        session: Option<&mut MemorySession>,
    ) -> ModelResult<()> {
        MemorySession::record(session);

        let mut store = self.store.write().await;
        let data = store.entry(self.name.clone()).or_default();

        let mut records = data.indexes.clone();
        let mut created = vec![];

        for index in &indexes {
            if index.keys().is_empty() {
                return Err(ModelError::InvalidDocument(
                    "index key pattern must not be empty".to_string(),
                ));
            }

            let mut record = doc! { "v": 2 };
            record.extend(index.document());

            match find_existing(&records, index)? {
                Some(_) => continue,
                None => {
                    check_unique(&self.name, &data.documents, &record)?;
                    created.push(index.index_name());
                    records.push(record);
                }
            }
        }

        data.indexes = records;
        for name in created {
            debug!(collection = %self.name, index = %name, comment = ?options.comment, "Created index");
            data.events.push(IndexEvent::Created(name));
        }

        Ok(())
    }

    async fn drop_index(
        &self,
        name: &str,
        options: &CallOptions,
        session: Option<&mut MemorySession>,
    ) -> ModelResult<()> {
        MemorySession::record(session);

        if name == DEFAULT_ID_INDEX {
            return Err(ModelError::Unsupported("cannot drop the _id index".to_string()));
        }

        let mut store = self.store.write().await;
        let data = store
            .get_mut(&self.name)
            .ok_or_else(|| ModelError::IndexNotFound(name.to_string()))?;

        let position = data
            .indexes
            .iter()
            .position(|record| record.get_str("name").is_ok_and(|n| n == name))
            .ok_or_else(|| ModelError::IndexNotFound(name.to_string()))?;

        data.indexes.remove(position);
        data.events.push(IndexEvent::Dropped(name.to_string()));
        debug!(collection = %self.name, index = %name, comment = ?options.comment, "Dropped index");

        Ok(())
    }
}

#[async_trait]
impl DocumentBackend for MemoryCollection {
    fn collection_name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: Document, options: FindOptions) -> ModelResult<Vec<Document>> {
        self.read_documents(|documents| {
            let mut matched = DocumentEvaluator::filter_documents(documents, &filter)?;

            if let Some(sort) = &options.sort {
                matched.sort_by(|a, b| {
                    sort.iter()
                        .map(|(field, direction)| {
                            let ordering = sort_order(
                                resolve(a, field).first().copied(),
                                resolve(b, field).first().copied(),
                            );
                            if is_descending(direction) { ordering.reverse() } else { ordering }
                        })
                        .find(|ordering| ordering.is_ne())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }

            let skip = options.skip.unwrap_or(0) as usize;
            let limit = match options.limit {
                Some(limit) if limit != 0 => limit.unsigned_abs() as usize,
                _ => usize::MAX,
            };

            Ok(matched.into_iter().skip(skip).take(limit).cloned().collect())
        })
        .await
    }

    async fn find_one(&self, filter: Document) -> ModelResult<Option<Document>> {
        self.read_documents(|documents| {
            Ok(DocumentEvaluator::filter_documents(documents, &filter)?
                .first()
                .map(|document| (*document).clone()))
        })
        .await
    }

    async fn count_documents(&self, filter: Document) -> ModelResult<u64> {
        self.read_documents(|documents| {
            Ok(DocumentEvaluator::filter_documents(documents, &filter)?.len() as u64)
        })
        .await
    }

    async fn estimated_document_count(&self) -> ModelResult<u64> {
        self.read_documents(|documents| Ok(documents.len() as u64)).await
    }

    async fn insert_one(&self, document: Document) -> ModelResult<Bson> {
        let mut store = self.store.write().await;
        let data = store.entry(self.name.clone()).or_default();

        insert_into(&self.name, data, document)
    }

    async fn insert_many(&self, documents: Vec<Document>) -> ModelResult<Vec<Bson>> {
        let mut store = self.store.write().await;
        let data = store.entry(self.name.clone()).or_default();

        documents
            .into_iter()
            .map(|document| insert_into(&self.name, data, document))
            .collect()
    }

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> ModelResult<UpdateOutcome> {
        let mut store = self.store.write().await;
        let data = store.entry(self.name.clone()).or_default();

        match first_match(&data.documents, &filter)? {
            Some(position) => {
                let modified = replace_at(&self.name, data, position, replacement)?;
                Ok(UpdateOutcome {
                    matched_count: 1,
                    modified_count: u64::from(modified),
                    upserted_id: None,
                })
            }
            None if upsert => {
                let mut document = replacement;
                if !document.contains_key(ID_FIELD) {
                    if let Some(id) = equality_id(&filter) {
                        document.insert(ID_FIELD, id);
                    }
                }
                let id = insert_into(&self.name, data, document)?;
                Ok(UpdateOutcome {
                    upserted_id: Some(id),
                    ..Default::default()
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }

    async fn delete_one(&self, filter: Document) -> ModelResult<u64> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(&self.name) else {
            return Ok(0);
        };

        match first_match(&data.documents, &filter)? {
            Some(position) => {
                data.documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, filter: Document) -> ModelResult<u64> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(&self.name) else {
            return Ok(0);
        };

        let mut keep = Vec::with_capacity(data.documents.len());
        for document in &data.documents {
            keep.push(!DocumentEvaluator::new(document).evaluate(&filter)?);
        }

        let before = data.documents.len();
        let mut flags = keep.into_iter();
        data.documents.retain(|_| flags.next().unwrap_or(true));

        Ok((before - data.documents.len()) as u64)
    }

    async fn find_one_and_delete(&self, filter: Document) -> ModelResult<Option<Document>> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(&self.name) else {
            return Ok(None);
        };

        Ok(first_match(&data.documents, &filter)?.map(|position| data.documents.remove(position)))
    }

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        return_document: ReturnDocument,
    ) -> ModelResult<Option<Document>> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(&self.name) else {
            return Ok(None);
        };
        let Some(position) = first_match(&data.documents, &filter)? else {
            return Ok(None);
        };

        let before = data.documents[position].clone();
        replace_at(&self.name, data, position, replacement)?;

        Ok(Some(match return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => data.documents[position].clone(),
        }))
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        return_document: ReturnDocument,
    ) -> ModelResult<Option<Document>> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(&self.name) else {
            return Ok(None);
        };
        let Some(position) = first_match(&data.documents, &filter)? else {
            return Ok(None);
        };

        let before = data.documents[position].clone();
        let mut updated = before.clone();
        apply_update(&mut updated, &update)?;
        replace_at(&self.name, data, position, updated)?;

        Ok(Some(match return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => data.documents[position].clone(),
        }))
    }
}

fn first_match(documents: &[Document], filter: &Document) -> ModelResult<Option<usize>> {
    for (position, document) in documents.iter().enumerate() {
        if DocumentEvaluator::new(document).evaluate(filter)? {
            return Ok(Some(position));
        }
    }
    Ok(None)
}

fn is_descending(direction: &Bson) -> bool {
    match direction {
        Bson::Int32(n) => *n < 0,
        Bson::Int64(n) => *n < 0,
        Bson::Double(n) => *n < 0.0,
        _ => false,
    }
}

/// Returns the `_id` of an equality filter such as `{"_id": 5}` or `{"_id": {"$eq": 5}}`.
fn equality_id(filter: &Document) -> Option<Bson> {
    match filter.get(ID_FIELD)? {
        Bson::Document(operators) if operators.keys().any(|key| key.starts_with('$')) => {
            operators.get("$eq").cloned()
        }
        value => Some(value.clone()),
    }
}

/// Stores a new document, assigning an `ObjectId` when it has no `_id`.
fn insert_into(collection: &str, data: &mut CollectionData, document: Document) -> ModelResult<Bson> {
    let document = match document.get(ID_FIELD) {
        Some(_) => document,
        None => {
            let mut with_id = doc! { ID_FIELD: ObjectId::new() };
            with_id.extend(document);
            with_id
        }
    };
    let id = document.get(ID_FIELD).cloned().unwrap_or(Bson::Null);

    check_all_unique(collection, data, &document, None)?;
    data.documents.push(document);

    Ok(id)
}

/// Replaces the document at `position`, keeping its `_id`.
///
/// Returns whether the stored document changed.
fn replace_at(
    collection: &str,
    data: &mut CollectionData,
    position: usize,
    replacement: Document,
) -> ModelResult<bool> {
    let current = &data.documents[position];
    let id = current.get(ID_FIELD).cloned().unwrap_or(Bson::Null);

    if let Some(new_id) = replacement.get(ID_FIELD) {
        if !values_equal(new_id, &id) {
            return Err(ModelError::InvalidDocument(
                "the _id field cannot be changed by a replacement".to_string(),
            ));
        }
    }

    let mut document = doc! { ID_FIELD: id };
    for (key, value) in replacement {
        if key != ID_FIELD {
            document.insert(key, value);
        }
    }

    if &document == current {
        return Ok(false);
    }

    check_all_unique(collection, data, &document, Some(position))?;
    data.documents[position] = document;

    Ok(true)
}

fn check_all_unique(
    collection: &str,
    data: &CollectionData,
    document: &Document,
    skip: Option<usize>,
) -> ModelResult<()> {
    for record in &data.indexes {
        let unique = record.get_str("name").is_ok_and(|name| name == DEFAULT_ID_INDEX)
            || record.get_bool("unique").unwrap_or(false);
        if !unique {
            continue;
        }

        let others = data
            .documents
            .iter()
            .enumerate()
            .filter(|(position, _)| Some(*position) != skip)
            .map(|(_, other)| other);

        check_unique_against(collection, others, record, document)?;
    }
    Ok(())
}

/// Verifies that existing documents do not violate a new unique index.
fn check_unique(collection: &str, documents: &[Document], record: &Document) -> ModelResult<()> {
    if !record.get_bool("unique").unwrap_or(false) {
        return Ok(());
    }

    for (position, document) in documents.iter().enumerate() {
        check_unique_against(collection, documents[..position].iter(), record, document)?;
    }
    Ok(())
}

fn check_unique_against<'a>(
    collection: &str,
    others: impl Iterator<Item = &'a Document>,
    record: &Document,
    document: &Document,
) -> ModelResult<()> {
    let Some(key) = index_key(record, document)? else {
        return Ok(());
    };

    for other in others {
        let Some(other_key) = index_key(record, other)? else {
            continue;
        };

        let duplicate = key.len() == other_key.len()
            && key.iter().zip(&other_key).all(|(a, b)| values_equal(a, b));
        if duplicate {
            let name = record.get_str("name").unwrap_or_default();
            let shown = key.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            return Err(ModelError::DuplicateKey(format!(
                "{collection} index: {name} dup key: {{ {shown} }}"
            )));
        }
    }
    Ok(())
}

/// Extracts the values a document contributes to an index, or `None` when a sparse or
/// partial index skips the document.
fn index_key(record: &Document, document: &Document) -> ModelResult<Option<Vec<Bson>>> {
    let keys = record
        .get_document("key")
        .map_err(|_| ModelError::InvalidDocument("index record has no key pattern".to_string()))?;

    if let Ok(partial) = record.get_document("partialFilterExpression") {
        if !DocumentEvaluator::new(document).evaluate(partial)? {
            return Ok(None);
        }
    }

    let values = keys
        .keys()
        .map(|field| resolve(document, field).first().map(|value| (*value).clone()))
        .collect::<Vec<_>>();

    if record.get_bool("sparse").unwrap_or(false) && values.iter().all(Option::is_none) {
        return Ok(None);
    }

    Ok(Some(values.into_iter().map(|value| value.unwrap_or(Bson::Null)).collect()))
}

/// Looks for an index occupying the declaration's name or key pattern.
///
/// Returns the existing record when it is identical to the declaration, and an
/// [`ModelError::IndexConflict`] when it differs.
fn find_existing<'a>(records: &'a [Document], index: &IndexDeclaration) -> ModelResult<Option<&'a Document>> {
    let name = index.index_name();

    for record in records {
        let same_name = record.get_str("name").is_ok_and(|n| n == name);
        let same_keys = record
            .get_document("key")
            .is_ok_and(|keys| key_patterns_equal(keys, index.keys()));
        if !same_name && !same_keys {
            continue;
        }

        if same_name && same_keys && indexes_equal(index, &LiveIndex::try_from(record.clone())?) {
            return Ok(Some(record));
        }

        let existing = record.get_str("name").unwrap_or_default();
        return Err(ModelError::IndexConflict(if same_name {
            format!("an index named {name} already exists with different options")
        } else {
            format!("index {existing} already exists with the same key pattern as {name}")
        }));
    }

    Ok(None)
}

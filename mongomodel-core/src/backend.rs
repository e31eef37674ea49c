//! Collection backend abstraction.
//!
//! The model layer never talks to a database driver directly. Instead it calls the two
//! traits defined here, which concrete backends (the MongoDB driver, the in-memory store)
//! implement for a single collection.
//!
//! # Traits
//!
//! - [`IndexBackend`]: list, create and drop indexes. This is all the
//!   [`IndexReconciler`](crate::reconcile::IndexReconciler) needs.
//! - [`DocumentBackend`]: raw document reads and writes used by
//!   [`ModelCollection`](crate::collection::ModelCollection).
//!
//! # Sessions and options
//!
//! Index calls accept an optional backend-specific session and a [`CallOptions`] value.
//! Both are forwarded verbatim to the driver; backends never start, commit or abort
//! transactions on their own.
//!
//! # Error Handling
//!
//! Driver failures are returned as [`ModelError::Driver`](crate::error::ModelError::Driver)
//! with the original error attached. Backends do not retry.

use async_trait::async_trait;
use bson::{Bson, Document};
use std::{fmt::Debug, time::Duration};

use crate::{error::ModelResult, index::IndexDeclaration};

/// Options passed through to every driver call of an operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    /// Server-side time limit for the operation.
    pub max_time: Option<Duration>,
    /// Comment attached to the operation in server logs and profiler output.
    pub comment: Option<Bson>,
}

impl CallOptions {
    /// Creates empty call options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server-side time limit.
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// Sets the operation comment.
    pub fn comment(mut self, comment: impl Into<Bson>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Sort, skip and limit options for [`DocumentBackend::find`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort specification, e.g. `{"created_at": -1}`.
    pub sort: Option<Document>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<i64>,
}

impl FindOptions {
    /// Creates empty find options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sort specification.
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Sets the number of documents to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Which version of a document a `find_one_and_*` call returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    /// The document as it was before the write.
    #[default]
    Before,
    /// The document as it is after the write.
    After,
}

/// Result of a replace operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Number of documents that matched the filter.
    pub matched_count: u64,
    /// Number of documents that were changed.
    pub modified_count: u64,
    /// Identifier of the inserted document when the write was an upsert.
    pub upserted_id: Option<Bson>,
}

/// Index management for one collection.
#[async_trait]
pub trait IndexBackend: Send + Sync + Debug {
    /// Session or transaction handle understood by this backend.
    type Session: Send;

    /// Lists every index record of the collection, including the `_id_` index.
    async fn list_indexes(
        &self,
        options: &CallOptions,
        session: Option<&mut Self::Session>,
    ) -> ModelResult<Vec<Document>>;

    /// Creates all given indexes in a single call.
    async fn create_indexes(
        &self,
        indexes: Vec<IndexDeclaration>,
        options: &CallOptions,
        session: Option<&mut Self::Session>,
    ) -> ModelResult<()>;

    /// Drops the index with the given name.
    async fn drop_index(
        &self,
        name: &str,
        options: &CallOptions,
        session: Option<&mut Self::Session>,
    ) -> ModelResult<()>;
}

/// Raw document access for one collection.
#[async_trait]
pub trait DocumentBackend: IndexBackend {
    /// Returns the name of the collection.
    fn collection_name(&self) -> &str;

    /// Returns all documents matching the filter.
    async fn find(&self, filter: Document, options: FindOptions) -> ModelResult<Vec<Document>>;

    /// Returns the first document matching the filter.
    async fn find_one(&self, filter: Document) -> ModelResult<Option<Document>>;

    /// Counts the documents matching the filter.
    async fn count_documents(&self, filter: Document) -> ModelResult<u64>;

    /// Returns an estimate of the collection size from metadata.
    async fn estimated_document_count(&self) -> ModelResult<u64>;

    /// Inserts a document and returns its identifier.
    ///
    /// A document without `_id` gets one assigned by the backend.
    async fn insert_one(&self, document: Document) -> ModelResult<Bson>;

    /// Inserts several documents and returns their identifiers in input order.
    async fn insert_many(&self, documents: Vec<Document>) -> ModelResult<Vec<Bson>>;

    /// Replaces the first document matching the filter.
    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> ModelResult<UpdateOutcome>;

    /// Deletes the first document matching the filter and returns the deleted count.
    async fn delete_one(&self, filter: Document) -> ModelResult<u64>;

    /// Deletes every document matching the filter and returns the deleted count.
    async fn delete_many(&self, filter: Document) -> ModelResult<u64>;

    /// Deletes the first matching document and returns it.
    async fn find_one_and_delete(&self, filter: Document) -> ModelResult<Option<Document>>;

    /// Replaces the first matching document and returns the requested version of it.
    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        return_document: ReturnDocument,
    ) -> ModelResult<Option<Document>>;

    /// Applies an update document to the first match and returns the requested version.
    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        return_document: ReturnDocument,
    ) -> ModelResult<Option<Document>>;
}

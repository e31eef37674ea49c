//! Typed access to the collection of one model.
//!
//! [`ModelCollection`] pairs a validated [`ModelConfig`] with a [`DocumentBackend`] for
//! the model's collection. Reads return models, writes take models, and the declared
//! indexes can be synchronized with [`ModelCollection::ensure_indexes`].
//!
//! # Example
//!
//! ```ignore
//! use mongomodel::prelude::*;
//!
//! # async fn example<B: DocumentBackend>(backend: &B) -> ModelResult<()> {
//! let users = ModelCollection::<_, User>::new(backend)?;
//! users.ensure_indexes(true).await?;
//!
//! let mut alice = User { id: None, name: "Alice".to_string() };
//! users.insert(&mut alice).await?;
//!
//! let adults = users
//!     .find(Filter::new().gte("age", 18)?, FindOptions::new().limit(10))
//!     .await?;
//! # Ok(()) }
//! ```

use bson::Document;
use std::marker::PhantomData;
use tracing::debug;

use crate::{
    backend::{CallOptions, DocumentBackend, FindOptions, ReturnDocument},
    config::ModelConfig,
    document::{Model, ModelExt},
    error::{ModelError, ModelResult},
    query::{Filter, ID_FIELD},
    reconcile::{IndexDiff, IndexPlan, IndexReconciler},
};

/// The collection of model `M`, accessed through backend `B`.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the backend reference
/// * `B` - The collection backend
/// * `M` - The model stored in the collection
#[derive(Debug)]
pub struct ModelCollection<'a, B: DocumentBackend, M: Model> {
    config: ModelConfig,
    backend: &'a B,
    _marker: PhantomData<M>,
}

impl<'a, B: DocumentBackend, M: Model> ModelCollection<'a, B, M> {
    /// Opens the collection of `M` on `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Configuration`] if the model is abstract, has no collection
    /// name, or `backend` serves a different collection.
    pub fn new(backend: &'a B) -> ModelResult<Self> {
        let config = M::config()?;
        let name = config.collection_name()?;

        if name != backend.collection_name() {
            return Err(ModelError::Configuration(format!(
                "model collection {name} does not match backend collection {}",
                backend.collection_name()
            )));
        }

        Ok(Self { config, backend, _marker: PhantomData })
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        self.backend.collection_name()
    }

    /// Returns the model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &'a B {
        self.backend
    }

    /// Returns every model matching `filter`.
    pub async fn find(&self, filter: impl Into<Filter>, options: FindOptions) -> ModelResult<Vec<M>> {
        self.backend
            .find(filter.into().into_document(), options)
            .await?
            .into_iter()
            .map(M::from_document)
            .collect()
    }

    /// Returns the first model matching `filter`.
    pub async fn find_one(&self, filter: impl Into<Filter>) -> ModelResult<Option<M>> {
        self.backend
            .find_one(filter.into().into_document())
            .await?
            .map(M::from_document)
            .transpose()
    }

    /// Counts the models matching `filter`.
    pub async fn count_documents(&self, filter: impl Into<Filter>) -> ModelResult<u64> {
        self.backend
            .count_documents(filter.into().into_document())
            .await
    }

    /// Returns the collection size estimate from metadata.
    pub async fn estimated_document_count(&self) -> ModelResult<u64> {
        self.backend.estimated_document_count().await
    }

    /// Inserts `model` as a new document and stores the assigned id on it.
    ///
    /// # Returns
    ///
    /// `false` if a document with the same unique key already exists.
    ///
    /// # Errors
    ///
    /// Returns any other backend error unchanged.
    pub async fn insert(&self, model: &mut M) -> ModelResult<bool> {
        match self.backend.insert_one(model.to_document()?).await {
            Ok(id) => {
                model.set_id(id)?;
                Ok(true)
            }
            Err(ModelError::DuplicateKey(key)) => {
                debug!(collection = %self.name(), key = %key, "Insert rejected as duplicate");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Inserts all `models` in one call and stores the assigned ids on them.
    pub async fn insert_many(&self, models: &mut [M]) -> ModelResult<()> {
        let documents = models
            .iter()
            .map(ModelExt::to_document)
            .collect::<ModelResult<Vec<_>>>()?;

        let ids = self.backend.insert_many(documents).await?;
        for (model, id) in models.iter_mut().zip(ids) {
            model.set_id(id)?;
        }

        Ok(())
    }

    /// Replaces the stored document of `model`, inserting it if `upsert` is set and
    /// nothing matches.
    ///
    /// # Returns
    ///
    /// `true` if a document was inserted or changed. An unchanged document yields `false`.
    ///
    /// A model without id matches nothing, so it is only stored when `upsert` is set.
    pub async fn save(&self, model: &mut M, upsert: bool) -> ModelResult<bool> {
        let filter = match model.id() {
            Some(id) => Filter::by_id(id),
            None => Filter::new().exists(ID_FIELD, false)?,
        };
        let outcome = self
            .backend
            .replace_one(filter.into_document(), model.to_document()?, upsert)
            .await?;

        match outcome.upserted_id {
            Some(id) => {
                model.set_id(id)?;
                Ok(true)
            }
            None => Ok(outcome.modified_count == 1),
        }
    }

    /// Overwrites `model` with its stored version.
    ///
    /// # Returns
    ///
    /// `false` if the document no longer exists; `model` is left unchanged then.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidDocument`] if `model` has no id.
    pub async fn reload(&self, model: &mut M) -> ModelResult<bool> {
        let id = model
            .id()
            .ok_or_else(|| ModelError::InvalidDocument("cannot reload a model without id".to_string()))?;

        match self.backend.find_one(Filter::by_id(id).into_document()).await? {
            Some(document) => {
                *model = M::from_document(document)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Deletes the stored document of `model`. The model itself is left untouched.
    ///
    /// A model without id is matched by its full contents.
    pub async fn delete(&self, model: &M) -> ModelResult<bool> {
        let filter = match model.id() {
            Some(id) => Filter::by_id(id).into_document(),
            None => model.to_document()?,
        };

        Ok(self.backend.delete_one(filter).await? == 1)
    }

    /// Deletes the stored documents of all `models` and returns how many were removed.
    pub async fn delete_many(&self, models: &[M]) -> ModelResult<u64> {
        let ids = models.iter().filter_map(Model::id).collect::<Vec<_>>();
        let filter = Filter::new().in_(ID_FIELD, ids)?;

        self.backend.delete_many(filter.into_document()).await
    }

    /// Deletes the first model matching `filter` and returns it.
    pub async fn find_one_and_delete(&self, filter: impl Into<Filter>) -> ModelResult<Option<M>> {
        self.backend
            .find_one_and_delete(filter.into().into_document())
            .await?
            .map(M::from_document)
            .transpose()
    }

    /// Replaces the first model matching `filter` with `replacement`.
    ///
    /// With [`ReturnDocument::After`] the stored result is also written back into
    /// `replacement`, so it picks up the id of the replaced document.
    pub async fn find_one_and_replace(
        &self,
        filter: impl Into<Filter>,
        replacement: &mut M,
        return_document: ReturnDocument,
    ) -> ModelResult<Option<M>> {
        let result = self
            .backend
            .find_one_and_replace(
                filter.into().into_document(),
                replacement.to_document()?,
                return_document,
            )
            .await?;

        let Some(document) = result else {
            return Ok(None);
        };

        if return_document == ReturnDocument::After {
            *replacement = M::from_document(document.clone())?;
        }

        Ok(Some(M::from_document(document)?))
    }

    /// Applies `update` to the first model matching `filter`.
    pub async fn find_one_and_update(
        &self,
        filter: impl Into<Filter>,
        update: Document,
        return_document: ReturnDocument,
    ) -> ModelResult<Option<M>> {
        self.backend
            .find_one_and_update(filter.into().into_document(), update, return_document)
            .await?
            .map(M::from_document)
            .transpose()
    }

    /// Makes the collection's indexes match the model configuration.
    ///
    /// Indexes the configuration does not declare are dropped when `drop_unmanaged` is
    /// `true`.
    pub async fn ensure_indexes(&self, drop_unmanaged: bool) -> ModelResult<IndexPlan> {
        self.ensure_indexes_with(None, CallOptions::default(), drop_unmanaged)
            .await
    }

    /// Like [`ensure_indexes`](Self::ensure_indexes), forwarding `session` and `options`
    /// to every backend call.
    pub async fn ensure_indexes_with(
        &self,
        session: Option<&mut B::Session>,
        options: CallOptions,
        drop_unmanaged: bool,
    ) -> ModelResult<IndexPlan> {
        IndexReconciler::new(self.backend)
            .with_session(session)
            .with_options(options)
            .reconcile(&self.config.indexes, drop_unmanaged)
            .await
    }

    /// Reports what [`ensure_indexes`](Self::ensure_indexes) would change.
    pub async fn index_diff(&self, drop_unmanaged: bool) -> ModelResult<IndexDiff> {
        IndexReconciler::new(self.backend)
            .diff(&self.config.indexes, drop_unmanaged)
            .await
    }
}

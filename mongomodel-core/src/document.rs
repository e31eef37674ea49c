//! The model trait and document conversion helpers.
//!
//! A model is any serde type stored as one document of a collection. The model supplies
//! its [`ModelConfig`] and access to its `_id`; [`ModelExt`] adds the conversions to and
//! from BSON documents that the typed collection relies on.
//!
//! # Example
//!
//! ```ignore
//! use mongomodel::prelude::*;
//! use bson::{Bson, oid::ObjectId};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//! }
//!
//! impl Model for User {
//!     fn config() -> ModelResult<ModelConfig> {
//!         ModelConfig::builder()
//!             .collection("users")
//!             .index(IndexDeclaration::ascending("name").unique(true))
//!             .build()
//!     }
//!
//!     fn id(&self) -> Option<Bson> {
//!         self.id.map(Bson::ObjectId)
//!     }
//!
//!     fn set_id(&mut self, id: Bson) -> ModelResult<()> {
//!         self.id = Some(into_object_id(id)?);
//!         Ok(())
//!     }
//! }
//! ```

use bson::{
    Bson, Document, de::deserialize_from_document, oid::ObjectId, ser::serialize_to_document,
};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    config::ModelConfig,
    error::{ModelError, ModelResult},
    query::ID_FIELD,
};

/// A type stored as a document in its own collection.
pub trait Model: Serialize + DeserializeOwned + Send + Sync {
    /// Returns the collection configuration of this model.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Configuration`] if the configuration cannot be built.
    fn config() -> ModelResult<ModelConfig>;

    /// Returns the document id, or `None` if the model has not been stored yet.
    fn id(&self) -> Option<Bson>;

    /// Stores the id assigned by the database.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidDocument`] if `id` has the wrong type for this model.
    fn set_id(&mut self, id: Bson) -> ModelResult<()>;
}

/// Document conversions for every [`Model`].
pub trait ModelExt: Model {
    /// Serializes the model into a document.
    ///
    /// A null `_id` is removed so the database assigns one on insert.
    fn to_document(&self) -> ModelResult<Document>;

    /// Deserializes a model from a stored document.
    fn from_document(document: Document) -> ModelResult<Self>;
}

impl<M: Model> ModelExt for M {
    fn to_document(&self) -> ModelResult<Document> {
        let mut document = serialize_to_document(self)?;
        if matches!(document.get(ID_FIELD), Some(Bson::Null)) {
            document.remove(ID_FIELD);
        }
        Ok(document)
    }

    fn from_document(document: Document) -> ModelResult<Self> {
        Ok(deserialize_from_document(document)?)
    }
}

/// Converts an id value into an [`ObjectId`], accepting its hex form as well.
///
/// # Errors
///
/// Returns [`ModelError::InvalidDocument`] for any other value.
pub fn into_object_id(id: Bson) -> ModelResult<ObjectId> {
    match id {
        Bson::ObjectId(oid) => Ok(oid),
        Bson::String(hex) => ObjectId::parse_str(&hex)
            .map_err(|_| ModelError::InvalidDocument(format!("invalid object id: {hex}"))),
        other => Err(ModelError::InvalidDocument(format!(
            "expected an object id, got {other}"
        ))),
    }
}

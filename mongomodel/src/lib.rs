//! Typed MongoDB models with declarative index management.
//!
//! This crate is the primary entry point of mongomodel. It re-exports the core types
//! from `mongomodel-core` and gives access to the available collection backends.
//!
//! # Features
//!
//! - **Typed models** - Serde types bound to a collection through a [`ModelConfig`](config::ModelConfig)
//! - **Configuration inheritance** - Child configurations extend or merge their parent's
//! - **Filter building** - Compose MongoDB filter documents with conflict detection
//! - **Index reconciliation** - Create, replace and drop indexes until the collection matches
//!   its declaration
//!
//! # Quick Start
//!
//! ```ignore
//! use mongomodel::{prelude::*, memory::InMemoryStore};
//! use bson::{Bson, oid::ObjectId};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//!     pub email: String,
//! }
//!
//! impl Model for User {
//!     fn config() -> ModelResult<ModelConfig> {
//!         ModelConfig::builder()
//!             .collection("users")
//!             .index(IndexDeclaration::ascending("name").unique(true))
//!             .index(IndexDeclaration::ascending("email"))
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
//!
//! #[tokio::main]
//! async fn main() -> ModelResult<()> {
//!     let store = InMemoryStore::new();
//!     let backend = store.collection_for::<User>()?;
//!     let users = ModelCollection::<_, User>::new(&backend)?;
//!
//!     // Bring the live indexes in line with the declaration
//!     let plan = users.ensure_indexes(true).await?;
//!     println!("Created indexes: {:?}", plan.created);
//!
//!     let mut alice = User {
//!         id: None,
//!         name: "Alice".to_string(),
//!         email: "alice@example.com".to_string(),
//!     };
//!     users.insert(&mut alice).await?;
//!
//!     let found = users
//!         .find(Filter::new().eq("name", "Alice")?, FindOptions::new())
//!         .await?;
//!     println!("Found users: {found:?}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory collections for development and testing
//! - `mongodb` - MongoDB through the official driver (requires the `mongodb` feature)

pub mod prelude;

pub use mongomodel_core::{
    backend, codec, collection, config, document, error, index, query, reconcile,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory backend.
pub mod memory {
    pub use mongomodel_memory::{InMemoryStore, IndexEvent, MemoryCollection, MemorySession};
}

/// MongoDB backend.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use mongomodel_mongodb::{MongoDbCollection, MongoDbStore, MongoDbStoreBuilder, PoolConfig};
}

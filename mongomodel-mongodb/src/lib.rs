//! MongoDB backend for mongomodel.
//!
//! This crate implements the index and document backend traits on top of the official
//! async MongoDB driver. Sessions are the driver's [`ClientSession`](mongodb::ClientSession),
//! so index reconciliation can run inside a caller's transaction.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! mongomodel = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use mongomodel::{prelude::*, mongodb::{MongoDbStore, PoolConfig}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .pool(PoolConfig { max_pool_size: Some(20), ..Default::default() })
//!         .build()
//!         .await?;
//!
//!     let backend = store.collection_for::<User>()?;
//!     let users = ModelCollection::<_, User>::new(&backend)?;
//!     users.ensure_indexes(true).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as mongomodel_mongodb;

pub mod store;

pub use store::{MongoDbCollection, MongoDbStore, MongoDbStoreBuilder, PoolConfig};

//! In-memory collection backend for mongomodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! [`DocumentBackend`](mongomodel_core::backend::DocumentBackend) and
//! [`IndexBackend`](mongomodel_core::backend::IndexBackend) traits. It keeps documents
//! and index metadata for each collection behind an async-aware read-write lock and is
//! meant for development and tests.
//!
//! # Features
//!
//! - **Filter evaluation** - Comparison, membership, element and logical operators with dotted paths
//! - **Index metadata** - `_id_` index, server-like conflicts and unique enforcement
//! - **Index event log** - Every create and drop is recorded for assertions
//! - **Sessions** - A counting session type to check session forwarding
//!
//! # Quick Start
//!
//! ```ignore
//! use mongomodel::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryStore::new();
//!     let backend = store.collection_for::<User>()?;
//!     let users = ModelCollection::<_, User>::new(&backend)?;
//!
//!     users.ensure_indexes(true).await?;
//!
//!     let mut alice = User { id: None, name: "Alice".to_string() };
//!     users.insert(&mut alice).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, IndexEvent, MemoryCollection, MemorySession};

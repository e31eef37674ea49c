//! Typed models, filter building and index reconciliation for MongoDB collections.
//!
//! This crate is the core of the mongomodel project and provides:
//!
//! - **Filter building** ([`query`]) - Conflict-checked filter documents and boolean composition
//! - **Index declarations** ([`index`]) - Declared and live index records and their comparison
//! - **Index reconciliation** ([`reconcile`]) - Minimal create/drop plans against a live collection
//! - **Model configuration** ([`config`]) - Explicit per-model collection settings with inheritance
//! - **Model traits** ([`document`]) - The [`Model`](document::Model) trait and document conversion
//! - **Typed collections** ([`collection`]) - CRUD and index synchronization for one model
//! - **Backend abstraction** ([`backend`]) - Traits implemented by the driver and in-memory backends
//! - **Serde adapters** ([`codec`]) - Opt-in field encoders for ids and sets
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use mongomodel_core::query::Filter;
//! use bson::doc;
//!
//! let filter = Filter::new().eq("name", "Alice")?.lt("age", 40)?;
//! let either = filter | Filter::by_id(42);
//!
//! assert_eq!(
//!     either,
//!     doc! { "$or": [{ "name": "Alice", "age": { "$lt": 40 } }, { "_id": 42 }] }
//! );
//! ```

pub mod backend;
pub mod codec;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod query;
pub mod reconcile;

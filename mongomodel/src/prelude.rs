//! Convenient re-exports of commonly used types from mongomodel.
//!
//! ```ignore
//! use mongomodel::prelude::*;
//! ```

pub use mongomodel_core::{
    backend::{CallOptions, DocumentBackend, FindOptions, IndexBackend, ReturnDocument, UpdateOutcome},
    collection::ModelCollection,
    config::{Acknowledgment, ConfigField, ModelConfig, ReadConcern, ReadPreference, WriteConcern},
    document::{Model, ModelExt, into_object_id},
    error::{ModelError, ModelResult},
    index::{IndexDeclaration, LiveIndex},
    query::{Constraint, Filter, ID_FIELD, Op, TextSearch},
    reconcile::{IndexDiff, IndexPlan, IndexReconciler},
};

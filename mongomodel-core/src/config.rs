//! Per-model collection configuration.
//!
//! Every model describes its collection with a [`ModelConfig`]: the collection name,
//! declared indexes and the read/write settings applied when the collection is opened.
//! Configurations are plain values assembled with [`ModelConfigBuilder`]. A child model
//! reuses a parent's configuration explicitly through [`ModelConfig::inherit`]:
//!
//! - fields the child leaves unset are copied from the parent;
//! - fields the child sets replace the parent's value;
//! - fields listed in the parent's mergeable set are merged instead of replaced.
//!
//! Only list-valued fields ([`ConfigField::Indexes`]) can be merged. Lists are merged by
//! appending the child's entries to the parent's. Mergeable sets are themselves unioned,
//! so a field that is mergeable once stays mergeable for every descendant.
//!
//! # Example
//!
//! ```ignore
//! use mongomodel::config::{ModelConfig, ReadPreference};
//! use mongomodel::index::IndexDeclaration;
//!
//! let base = ModelConfig::builder()
//!     .abstract_model(true)
//!     .index(IndexDeclaration::descending("created_at"))
//!     .build()?;
//!
//! let users = ModelConfig::inherit(&base)
//!     .collection("users")
//!     .index(IndexDeclaration::ascending("email").unique(true))
//!     .read_preference(ReadPreference::SecondaryPreferred)
//!     .build()?;
//!
//! assert_eq!(users.indexes.len(), 2);
//! ```

use std::{collections::BTreeSet, fmt, time::Duration};

use crate::{
    error::{ModelError, ModelResult},
    index::IndexDeclaration,
};

/// Names the inheritable fields of a [`ModelConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigField {
    Collection,
    Indexes,
    ReadPreference,
    ReadConcern,
    WriteConcern,
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigField::Collection => "collection",
            ConfigField::Indexes => "indexes",
            ConfigField::ReadPreference => "read_preference",
            ConfigField::ReadConcern => "read_concern",
            ConfigField::WriteConcern => "write_concern",
        };
        f.write_str(name)
    }
}

/// Which replica set members reads are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreference {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// Consistency level of reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConcern {
    Local,
    Majority,
    Linearizable,
    Available,
    Snapshot,
}

/// How many members must acknowledge a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgment {
    /// A fixed number of members.
    Nodes(u32),
    /// A majority of voting members.
    Majority,
    /// A custom tag set defined on the replica set.
    Custom(String),
}

/// Acknowledgment requirements for writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteConcern {
    pub w: Option<Acknowledgment>,
    pub journal: Option<bool>,
    pub w_timeout: Option<Duration>,
}

impl WriteConcern {
    /// Requires acknowledgment from a majority of members.
    pub fn majority() -> Self {
        Self {
            w: Some(Acknowledgment::Majority),
            ..Default::default()
        }
    }

    /// Requires acknowledgment from `nodes` members.
    pub fn nodes(nodes: u32) -> Self {
        Self {
            w: Some(Acknowledgment::Nodes(nodes)),
            ..Default::default()
        }
    }

    /// Requires the write to reach the on-disk journal.
    pub fn journal(mut self, journal: bool) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Limits how long the server waits for acknowledgment.
    pub fn w_timeout(mut self, timeout: Duration) -> Self {
        self.w_timeout = Some(timeout);
        self
    }
}

/// Collection settings for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Collection name. Required unless the model is abstract.
    pub collection: Option<String>,
    /// Abstract models only provide configuration to other models.
    pub abstract_model: bool,
    /// Indexes the collection should carry.
    pub indexes: Vec<IndexDeclaration>,
    pub read_preference: Option<ReadPreference>,
    pub read_concern: Option<ReadConcern>,
    pub write_concern: Option<WriteConcern>,
    /// Fields that descendants merge rather than replace.
    pub mergeable: BTreeSet<ConfigField>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            collection: None,
            abstract_model: false,
            indexes: Vec::new(),
            read_preference: None,
            read_concern: None,
            write_concern: None,
            mergeable: BTreeSet::from([ConfigField::Indexes]),
        }
    }
}

impl ModelConfig {
    /// Starts a configuration from the defaults.
    pub fn builder() -> ModelConfigBuilder {
        ModelConfigBuilder::default()
    }

    /// Starts a configuration seeded from `parent`.
    pub fn inherit(parent: &ModelConfig) -> ModelConfigBuilder {
        ModelConfigBuilder {
            parent: Some(parent.clone()),
            ..Default::default()
        }
    }

    /// Returns the collection name of a concrete model.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Configuration`] for abstract models and for configurations
    /// without a collection name.
    pub fn collection_name(&self) -> ModelResult<&str> {
        if self.abstract_model {
            return Err(ModelError::Configuration(
                "abstract models have no collection".to_string(),
            ));
        }

        self.collection
            .as_deref()
            .ok_or_else(|| ModelError::Configuration("no collection name configured".to_string()))
    }

    /// Checks that a concrete model names its collection.
    pub fn validate(&self) -> ModelResult<()> {
        if !self.abstract_model && self.collection.is_none() {
            return Err(ModelError::Configuration(
                "model is not abstract and does not define a collection".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ModelConfig`].
#[derive(Debug, Clone, Default)]
pub struct ModelConfigBuilder {
    parent: Option<ModelConfig>,
    collection: Option<String>,
    abstract_model: bool,
    indexes: Option<Vec<IndexDeclaration>>,
    read_preference: Option<ReadPreference>,
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
    mergeable: BTreeSet<ConfigField>,
}

impl ModelConfigBuilder {
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Marks the model as abstract. This flag is never inherited.
    pub fn abstract_model(mut self, abstract_model: bool) -> Self {
        self.abstract_model = abstract_model;
        self
    }

    /// Adds one index declaration.
    pub fn index(mut self, index: IndexDeclaration) -> Self {
        self.indexes.get_or_insert_with(Vec::new).push(index);
        self
    }

    /// Sets the index declarations, discarding earlier calls to [`index`](Self::index).
    pub fn indexes(mut self, indexes: impl IntoIterator<Item = IndexDeclaration>) -> Self {
        self.indexes = Some(indexes.into_iter().collect());
        self
    }

    pub fn read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = Some(read_preference);
        self
    }

    pub fn read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = Some(read_concern);
        self
    }

    pub fn write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = Some(write_concern);
        self
    }

    /// Makes descendants merge `field` instead of replacing it.
    pub fn merge(mut self, field: ConfigField) -> Self {
        self.mergeable.insert(field);
        self
    }

    /// Resolves inheritance and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Configuration`] if the child sets a field the parent marks
    /// mergeable but the field holds a single value, or if a concrete model ends up
    /// without a collection name.
    pub fn build(self) -> ModelResult<ModelConfig> {
        let base = self.parent.unwrap_or_default();
        let merging = |field: ConfigField| base.mergeable.contains(&field);

        let collection = resolve_scalar(
            ConfigField::Collection,
            merging(ConfigField::Collection),
            self.collection,
            base.collection.clone(),
        )?;
        let read_preference = resolve_scalar(
            ConfigField::ReadPreference,
            merging(ConfigField::ReadPreference),
            self.read_preference,
            base.read_preference,
        )?;
        let read_concern = resolve_scalar(
            ConfigField::ReadConcern,
            merging(ConfigField::ReadConcern),
            self.read_concern,
            base.read_concern,
        )?;
        let write_concern = resolve_scalar(
            ConfigField::WriteConcern,
            merging(ConfigField::WriteConcern),
            self.write_concern,
            base.write_concern.clone(),
        )?;

        let indexes = match self.indexes {
            Some(own) if merging(ConfigField::Indexes) => {
                let mut merged = base.indexes.clone();
                merged.extend(own);
                merged
            }
            Some(own) => own,
            None => base.indexes.clone(),
        };

        let mut mergeable = base.mergeable.clone();
        mergeable.extend(self.mergeable);

        let config = ModelConfig {
            collection,
            abstract_model: self.abstract_model,
            indexes,
            read_preference,
            read_concern,
            write_concern,
            mergeable,
        };
        config.validate()?;

        Ok(config)
    }
}

fn resolve_scalar<T>(
    field: ConfigField,
    mergeable: bool,
    own: Option<T>,
    inherited: Option<T>,
) -> ModelResult<Option<T>> {
    match own {
        Some(_) if mergeable && inherited.is_some() => Err(ModelError::Configuration(format!(
            "cannot merge single-valued field {field}"
        ))),
        Some(value) => Ok(Some(value)),
        None => Ok(inherited),
    }
}

//! Converges the live indexes of a collection to a declared set.
//!
//! [`IndexReconciler`] loads the live indexes once, pairs each declaration with the live
//! index that has the same key pattern and then issues the smallest set of drop and
//! create calls that makes the two agree. The primary key index `_id_` is never touched.
//!
//! Call order within one [`IndexReconciler::reconcile`] run:
//!
//! 1. one `list_indexes` call;
//! 2. one `drop_index` call per live index whose options differ from its declaration;
//! 3. at most one `create_indexes` call carrying every missing or replaced index;
//! 4. one `drop_index` call per unclaimed live index, if unmanaged indexes are dropped.
//!
//! Any backend error aborts the run at the failing step. Nothing is retried and nothing
//! that already happened is undone; running the reconciliation again converges.
//!
//! A reconciler carries a mutable cache, so one instance serves one reconciliation at a
//! time. Create a new one per call.

use bson::Document;
use tracing::{debug, info};

use crate::{
    backend::{CallOptions, IndexBackend},
    error::ModelResult,
    index::{DEFAULT_ID_INDEX, IndexDeclaration, LiveIndex, indexes_equal, key_patterns_equal},
};

/// What a reconciliation did, by index name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPlan {
    /// Indexes created in the batched create call, including replacements.
    pub created: Vec<String>,
    /// Live indexes dropped because their options differed from the declaration.
    pub replaced: Vec<String>,
    /// Live indexes dropped because nothing declared them.
    pub dropped: Vec<String>,
    /// Live indexes that already matched a declaration.
    pub kept: Vec<String>,
}

impl IndexPlan {
    /// Returns `true` if no index was created or dropped.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.replaced.is_empty() && self.dropped.is_empty()
    }
}

/// The difference between declared and live indexes, computed without writing anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexDiff {
    /// Declarations that are missing from the collection or whose live index differs.
    pub to_create: Vec<IndexDeclaration>,
    /// Live index names that a reconciliation would drop.
    pub to_drop: Vec<String>,
    /// Live index names that already match a declaration.
    pub untouched: Vec<String>,
}

impl IndexDiff {
    /// Returns `true` if a reconciliation would not change anything.
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_drop.is_empty()
    }
}

/// Reconciles declared indexes against one collection.
pub struct IndexReconciler<'a, B>
where
    B: IndexBackend,
{
    backend: &'a B,
    session: Option<&'a mut B::Session>,
    options: CallOptions,
    live: Option<Vec<LiveIndex>>,
}

impl<'a, B> IndexReconciler<'a, B>
where
    B: IndexBackend,
{
    /// Creates a reconciler without a session and with default call options.
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            session: None,
            options: CallOptions::default(),
            live: None,
        }
    }

    /// Forwards the given session to every backend call.
    pub fn with_session(mut self, session: Option<&'a mut B::Session>) -> Self {
        self.session = session;
        self
    }

    /// Forwards the given options to every backend call.
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the cached live indexes in listing order, if they have been loaded.
    pub fn live_indexes(&self) -> Option<&[LiveIndex]> {
        self.live.as_deref()
    }

    /// Fetches the live indexes into the cache, replacing any earlier contents.
    ///
    /// The primary key index is left out.
    pub async fn load_live_indexes(&mut self) -> ModelResult<()> {
        let records = self
            .backend
            .list_indexes(&self.options, self.session.as_deref_mut())
            .await?;

        let mut live = Vec::new();
        for record in records {
            let index = LiveIndex::try_from(record)?;
            if index.name() == DEFAULT_ID_INDEX {
                continue;
            }
            debug!(index = %index.name(), "Loaded live index");
            live.push(index);
        }

        self.live = Some(live);
        Ok(())
    }

    /// Returns the first cached live index, in listing order, whose key pattern equals
    /// `keys`.
    ///
    /// Field order and directions must match. Returns `None` if the cache has not been
    /// loaded yet.
    pub fn find_live_index(&self, keys: &Document) -> Option<&LiveIndex> {
        self.live
            .as_ref()?
            .iter()
            .find(|index| key_patterns_equal(index.keys(), keys))
    }

    /// Returns `true` if the live index satisfies the declaration as-is.
    pub fn equal(&self, declared: &IndexDeclaration, live: &LiveIndex) -> bool {
        indexes_equal(declared, live)
    }

    /// Makes the collection's indexes match `declared`.
    ///
    /// Live indexes nothing declares are dropped when `drop_unmanaged` is `true` and
    /// left alone otherwise.
    pub async fn reconcile(
        &mut self,
        declared: &[IndexDeclaration],
        drop_unmanaged: bool,
    ) -> ModelResult<IndexPlan> {
        self.load_live_indexes().await?;

        let mut plan = IndexPlan::default();
        let mut queued = Vec::new();

        for index in declared {
            let matched = self
                .find_live_index(index.keys())
                .map(|live| (live.name().to_string(), self.equal(index, live)));

            match matched {
                None => {
                    debug!(index = %index.index_name(), "Queued missing index");
                    queued.push(index.clone());
                }
                Some((name, true)) => {
                    debug!(index = %name, "Live index matches declaration");
                    self.claim(&name);
                    plan.kept.push(name);
                }
                Some((name, false)) => {
                    debug!(index = %name, "Dropping mismatched index");
                    self.backend
                        .drop_index(&name, &self.options, self.session.as_deref_mut())
                        .await?;
                    self.claim(&name);
                    plan.replaced.push(name);
                    queued.push(index.clone());
                }
            }
        }

        if !queued.is_empty() {
            plan.created = queued.iter().map(IndexDeclaration::index_name).collect();
            debug!(count = queued.len(), "Creating indexes");
            self.backend
                .create_indexes(queued, &self.options, self.session.as_deref_mut())
                .await?;
        }

        if drop_unmanaged {
            let unmanaged = self
                .live
                .as_mut()
                .map(std::mem::take)
                .unwrap_or_default();

            for name in unmanaged.into_iter().map(|index| index.name().to_string()) {
                debug!(index = %name, "Dropping unmanaged index");
                self.backend
                    .drop_index(&name, &self.options, self.session.as_deref_mut())
                    .await?;
                plan.dropped.push(name);
            }
        }

        info!(
            created = plan.created.len(),
            replaced = plan.replaced.len(),
            dropped = plan.dropped.len(),
            kept = plan.kept.len(),
            "Reconciled indexes"
        );

        Ok(plan)
    }

    /// Computes what [`reconcile`](Self::reconcile) would do without issuing any write.
    ///
    /// Only `list_indexes` is called. The cache is refreshed but not consumed, so the
    /// same reconciler can still run the reconciliation afterwards.
    pub async fn diff(
        &mut self,
        declared: &[IndexDeclaration],
        drop_unmanaged: bool,
    ) -> ModelResult<IndexDiff> {
        self.load_live_indexes().await?;

        let mut pool = self.live.clone().unwrap_or_default();
        let mut diff = IndexDiff::default();

        for index in declared {
            let matched = pool
                .iter()
                .find(|live| key_patterns_equal(live.keys(), index.keys()))
                .map(|live| (live.name().to_string(), indexes_equal(index, live)));

            match matched {
                None => diff.to_create.push(index.clone()),
                Some((name, true)) => {
                    pool.retain(|live| live.name() != name);
                    diff.untouched.push(name);
                }
                Some((name, false)) => {
                    pool.retain(|live| live.name() != name);
                    diff.to_drop.push(name);
                    diff.to_create.push(index.clone());
                }
            }
        }

        if drop_unmanaged {
            diff.to_drop
                .extend(pool.into_iter().map(|live| live.name().to_string()));
        }

        Ok(diff)
    }

    /// Removes a live index from the drop candidates.
    fn claim(&mut self, name: &str) {
        if let Some(live) = self.live.as_mut() {
            live.retain(|index| index.name() != name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use async_trait::async_trait;
    use bson::doc;
    use std::sync::Mutex;

    /// Records every call and serves a fixed index listing.
    #[derive(Debug, Default)]
    struct Recording {
        records: Vec<Document>,
        calls: Mutex<Vec<String>>,
        fail_create: bool,
    }

    impl Recording {
        fn with(records: Vec<Document>) -> Self {
            Self { records, ..Default::default() }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IndexBackend for Recording {
        type Session = u32;

        async fn list_indexes(
            &self,
            _options: &CallOptions,
            session: Option<&mut u32>,
        ) -> ModelResult<Vec<Document>> {
            if let Some(count) = session {
                *count += 1;
            }
            self.calls.lock().unwrap().push("list".to_string());
            Ok(self.records.clone())
        }

        async fn create_indexes(
            &self,
            indexes: Vec<IndexDeclaration>,
            _options: &CallOptions,
            session: Option<&mut u32>,
        ) -> ModelResult<()> {
            if let Some(count) = session {
                *count += 1;
            }
            if self.fail_create {
                return Err(ModelError::driver(std::io::Error::other("create failed")));
            }
            let names = indexes.iter().map(IndexDeclaration::index_name).collect::<Vec<_>>();
            self.calls.lock().unwrap().push(format!("create {}", names.join(",")));
            Ok(())
        }

        async fn drop_index(
            &self,
            name: &str,
            _options: &CallOptions,
            session: Option<&mut u32>,
        ) -> ModelResult<()> {
            if let Some(count) = session {
                *count += 1;
            }
            self.calls.lock().unwrap().push(format!("drop {name}"));
            Ok(())
        }
    }

    fn id_index() -> Document {
        doc! { "v": 2, "key": { "_id": 1 }, "name": "_id_" }
    }

    #[tokio::test]
    async fn test_mismatch_drop_precedes_create_and_unmanaged_drop_follows() {
        let backend = Recording::with(vec![
            id_index(),
            doc! { "v": 2, "key": { "name": 1 }, "name": "name_1" },
            doc! { "v": 2, "key": { "age": 1 }, "name": "age_1" },
        ]);
        let declared = [
            IndexDeclaration::ascending("name").unique(true),
            IndexDeclaration::ascending("email"),
        ];

        let plan = IndexReconciler::new(&backend)
            .reconcile(&declared, true)
            .await
            .unwrap();

        assert_eq!(
            backend.calls(),
            vec!["list", "drop name_1", "create name_1,email_1", "drop age_1"]
        );
        assert_eq!(plan.replaced, vec!["name_1"]);
        assert_eq!(plan.created, vec!["name_1", "email_1"]);
        assert_eq!(plan.dropped, vec!["age_1"]);
        assert!(plan.kept.is_empty());
    }

    #[tokio::test]
    async fn test_matching_indexes_cause_no_writes() {
        let backend = Recording::with(vec![
            id_index(),
            doc! { "v": 2, "key": { "name": 1 }, "name": "name_1", "unique": true },
        ]);
        let declared = [IndexDeclaration::ascending("name").unique(true)];

        let plan = IndexReconciler::new(&backend)
            .reconcile(&declared, true)
            .await
            .unwrap();

        assert!(plan.is_noop());
        assert_eq!(plan.kept, vec!["name_1"]);
        assert_eq!(backend.calls(), vec!["list"]);
    }

    #[tokio::test]
    async fn test_id_index_is_never_dropped() {
        let backend = Recording::with(vec![id_index()]);

        let plan = IndexReconciler::new(&backend).reconcile(&[], true).await.unwrap();

        assert!(plan.is_noop());
        assert_eq!(backend.calls(), vec!["list"]);
    }

    #[tokio::test]
    async fn test_session_reaches_every_call() {
        let backend = Recording::with(vec![
            id_index(),
            doc! { "v": 2, "key": { "name": 1 }, "name": "name_1" },
            doc! { "v": 2, "key": { "age": 1 }, "name": "age_1" },
        ]);
        let declared = [
            IndexDeclaration::ascending("name").unique(true),
            IndexDeclaration::ascending("email"),
        ];
        let mut session = 0_u32;

        IndexReconciler::new(&backend)
            .with_session(Some(&mut session))
            .reconcile(&declared, true)
            .await
            .unwrap();

        assert_eq!(session, 4);
    }

    #[tokio::test]
    async fn test_create_failure_aborts_remaining_steps() {
        let backend = Recording {
            records: vec![
                id_index(),
                doc! { "v": 2, "key": { "name": 1 }, "name": "name_1" },
                doc! { "v": 2, "key": { "age": 1 }, "name": "age_1" },
            ],
            fail_create: true,
            ..Default::default()
        };
        let declared = [IndexDeclaration::ascending("name").unique(true)];

        let err = IndexReconciler::new(&backend)
            .reconcile(&declared, true)
            .await
            .unwrap_err();

        assert!(matches!(err, ModelError::Driver(_)));
        assert_eq!(backend.calls(), vec!["list", "drop name_1"]);
    }

    #[tokio::test]
    async fn test_diff_issues_no_writes() {
        let backend = Recording::with(vec![
            id_index(),
            doc! { "v": 2, "key": { "name": 1 }, "name": "name_1" },
            doc! { "v": 2, "key": { "age": 1 }, "name": "age_1" },
            doc! { "v": 2, "key": { "created": -1 }, "name": "created_-1" },
        ]);
        let declared = [
            IndexDeclaration::ascending("name").unique(true),
            IndexDeclaration::descending("created"),
            IndexDeclaration::ascending("email"),
        ];
        let mut reconciler = IndexReconciler::new(&backend);

        let diff = reconciler.diff(&declared, true).await.unwrap();

        assert_eq!(
            diff.to_create.iter().map(IndexDeclaration::index_name).collect::<Vec<_>>(),
            vec!["name_1", "email_1"]
        );
        assert_eq!(diff.to_drop, vec!["name_1", "age_1"]);
        assert_eq!(diff.untouched, vec!["created_-1"]);
        assert_eq!(reconciler.live_indexes().map(<[LiveIndex]>::len), Some(3));
        assert_eq!(backend.calls(), vec!["list"]);

        let kept = reconciler.diff(&declared, false).await.unwrap();
        assert_eq!(kept.to_drop, vec!["name_1"]);
    }

    #[tokio::test]
    async fn test_find_live_index_compares_key_patterns() {
        let backend = Recording::with(vec![
            id_index(),
            doc! { "v": 2, "key": { "a": 1, "b": -1 }, "name": "custom" },
        ]);
        let mut reconciler = IndexReconciler::new(&backend);

        assert!(reconciler.find_live_index(&doc! { "a": 1, "b": -1 }).is_none());

        reconciler.load_live_indexes().await.unwrap();

        assert_eq!(
            reconciler.find_live_index(&doc! { "a": 1, "b": -1 }).map(LiveIndex::name),
            Some("custom")
        );
        assert!(reconciler.find_live_index(&doc! { "b": -1, "a": 1 }).is_none());
        assert!(reconciler.find_live_index(&doc! { "_id": 1 }).is_none());
    }

    #[tokio::test]
    async fn test_listing_order_decides_between_shared_key_patterns() {
        let backend = Recording::with(vec![
            id_index(),
            doc! { "v": 2, "key": { "title": 1 }, "name": "title_fr", "collation": { "locale": "fr" } },
            doc! { "v": 2, "key": { "title": 1 }, "name": "title_de", "collation": { "locale": "de" } },
            doc! { "v": 2, "key": { "zeta": 1 }, "name": "zeta_1" },
            doc! { "v": 2, "key": { "alpha": 1 }, "name": "alpha_1" },
        ]);
        let mut reconciler = IndexReconciler::new(&backend);
        reconciler.load_live_indexes().await.unwrap();

        assert_eq!(
            reconciler.find_live_index(&doc! { "title": 1 }).map(LiveIndex::name),
            Some("title_fr")
        );

        let declared = [IndexDeclaration::ascending("title")
            .name("title_fr")
            .collation(doc! { "locale": "fr" })];
        let plan = reconciler.reconcile(&declared, true).await.unwrap();

        assert_eq!(plan.kept, vec!["title_fr"]);
        assert_eq!(plan.dropped, vec!["title_de", "zeta_1", "alpha_1"]);
    }
}

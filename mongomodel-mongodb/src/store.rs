use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document, de::deserialize_from_document, ser::serialize_to_document};
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Collection, IndexModel,
    error::{Error as DriverError, ErrorKind, WriteFailure},
    options::{
        Acknowledgment as DriverAcknowledgment, ClientOptions, CollectionOptions,
        CreateIndexOptions, DropIndexOptions, FindOptions as DriverFindOptions, IndexOptions,
        ListIndexesOptions, ReadConcern as DriverReadConcern,
        ReadPreference as DriverReadPreference, ReturnDocument as DriverReturnDocument,
        SelectionCriteria, WriteConcern as DriverWriteConcern,
    },
};
use tracing::debug;

use mongomodel_core::{
    backend::{CallOptions, DocumentBackend, FindOptions, IndexBackend, ReturnDocument, UpdateOutcome},
    config::{Acknowledgment, ModelConfig, ReadConcern, ReadPreference, WriteConcern},
    document::Model,
    error::{ModelError, ModelResult},
    index::IndexDeclaration,
};

/// Server error code for a unique index violation.
const DUPLICATE_KEY: i32 = 11000;
/// Server error code for an operation on a collection that does not exist.
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Connection pool configuration.
///
/// Unset fields keep the driver defaults.
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool.
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool.
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed.
    pub max_idle_time: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs.
    pub app_name: Option<String>,
}

impl PoolConfig {
    fn apply(self, options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            options.connect_timeout = Some(connect);
        }
        if let Some(selection) = self.server_selection_timeout {
            options.server_selection_timeout = Some(selection);
        }
        if let Some(app) = self.app_name {
            options.app_name = Some(app);
        }
    }
}

/// A MongoDB database reached through the official async driver.
#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: impl Into<String>) -> Self {
        Self { client, database: database.into() }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Returns the named collection with the database's default options.
    pub fn collection(&self, name: &str) -> MongoDbCollection {
        MongoDbCollection {
            collection: self.client.database(&self.database).collection(name),
        }
    }

    /// Returns the collection of model `M`, opened with the read preference, read
    /// concern and write concern of its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Configuration`] if the model has no usable collection name.
    pub fn collection_for<M: Model>(&self) -> ModelResult<MongoDbCollection> {
        let config = M::config()?;
        let name = config.collection_name()?;

        Ok(MongoDbCollection {
            collection: self
                .client
                .database(&self.database)
                .collection_with_options(name, collection_options(&config)),
        })
    }

    /// Starts a session that can be passed to index operations.
    pub async fn start_session(&self) -> ModelResult<ClientSession> {
        self.client.start_session().await.map_err(ModelError::driver)
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

/// Builder for [`MongoDbStore`].
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    pool: PoolConfig,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            pool: PoolConfig::default(),
        }
    }

    /// Sets the connection pool configuration.
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Parses the connection string and creates the client.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Driver`] if the connection string is invalid.
    pub async fn build(self) -> ModelResult<MongoDbStore> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(ModelError::driver)?;
        self.pool.apply(&mut options);

        let client = Client::with_options(options).map_err(ModelError::driver)?;
        debug!(database = %self.database, "Created MongoDB client");

        Ok(MongoDbStore::new(client, self.database))
    }
}

/// One MongoDB collection.
#[derive(Debug, Clone)]
pub struct MongoDbCollection {
    collection: Collection<Document>,
}

impl MongoDbCollection {
    /// Wraps a driver collection.
    pub fn new(collection: Collection<Document>) -> Self {
        Self { collection }
    }

    pub fn inner(&self) -> &Collection<Document> {
        &self.collection
    }
}

#[async_trait]
impl IndexBackend for MongoDbCollection {
    type Session = ClientSession;

    async fn list_indexes(
        &self,
        options: &CallOptions,
        session: Option<&mut ClientSession>,
    ) -> ModelResult<Vec<Document>> {
        let mut list_options = ListIndexesOptions::default();
        list_options.max_time = options.max_time;
        list_options.comment = options.comment.clone();

        let action = self.collection.list_indexes().with_options(list_options);
        let listed = match session {
            Some(session) => match action.session(&mut *session).await {
                Ok(cursor) => {
                    cursor
                        .with_type::<Document>()
                        .stream(session)
                        .try_collect::<Vec<_>>()
                        .await
                }
                Err(err) => Err(err),
            },
            None => match action.await {
                Ok(cursor) => cursor.with_type::<Document>().try_collect::<Vec<_>>().await,
                Err(err) => Err(err),
            },
        };

        match listed {
            Ok(indexes) => Ok(indexes),
            Err(err) if error_code(&err) == Some(NAMESPACE_NOT_FOUND) => Ok(vec![]),
            Err(err) => Err(driver_error(err)),
        }
    }

    async fn create_indexes(
        &self,
        indexes: Vec<IndexDeclaration>,
        options: &CallOptions,
        session: Option<&mut ClientSession>,
    ) -> ModelResult<()> {
        let names = indexes.iter().map(IndexDeclaration::index_name).collect::<Vec<_>>();
        let models = indexes
            .iter()
            .map(index_model)
            .collect::<ModelResult<Vec<_>>>()?;

        let mut create_options = CreateIndexOptions::default();
        create_options.max_time = options.max_time;
        create_options.comment = options.comment.clone();

        let action = self.collection.create_indexes(models).with_options(create_options);
        match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(driver_error)?;

        debug!(collection = %self.collection.name(), indexes = ?names, "Created indexes");
        Ok(())
    }

    async fn drop_index(
        &self,
        name: &str,
        options: &CallOptions,
        session: Option<&mut ClientSession>,
    ) -> ModelResult<()> {
        let mut drop_options = DropIndexOptions::default();
        drop_options.max_time = options.max_time;
        drop_options.comment = options.comment.clone();

        let action = self.collection.drop_index(name).with_options(drop_options);
        match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(driver_error)?;

        debug!(collection = %self.collection.name(), index = %name, "Dropped index");
        Ok(())
    }
}

#[async_trait]
impl DocumentBackend for MongoDbCollection {
    fn collection_name(&self) -> &str {
        self.collection.name()
    }

    async fn find(&self, filter: Document, options: FindOptions) -> ModelResult<Vec<Document>> {
        let mut find_options = DriverFindOptions::default();
        find_options.sort = options.sort;
        find_options.skip = options.skip;
        find_options.limit = options.limit;

        self.collection
            .find(filter)
            .with_options(find_options)
            .await
            .map_err(driver_error)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(driver_error)
    }

    async fn find_one(&self, filter: Document) -> ModelResult<Option<Document>> {
        self.collection.find_one(filter).await.map_err(driver_error)
    }

    async fn count_documents(&self, filter: Document) -> ModelResult<u64> {
        self.collection
            .count_documents(filter)
            .await
            .map_err(driver_error)
    }

    async fn estimated_document_count(&self) -> ModelResult<u64> {
        self.collection
            .estimated_document_count()
            .await
            .map_err(driver_error)
    }

    async fn insert_one(&self, document: Document) -> ModelResult<Bson> {
        Ok(self
            .collection
            .insert_one(document)
            .await
            .map_err(driver_error)?
            .inserted_id)
    }

    async fn insert_many(&self, documents: Vec<Document>) -> ModelResult<Vec<Bson>> {
        let mut inserted = self
            .collection
            .insert_many(documents)
            .await
            .map_err(driver_error)?
            .inserted_ids
            .into_iter()
            .collect::<Vec<_>>();
        inserted.sort_by_key(|(position, _)| *position);

        Ok(inserted.into_iter().map(|(_, id)| id).collect())
    }

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> ModelResult<UpdateOutcome> {
        let result = self
            .collection
            .replace_one(filter, replacement)
            .upsert(upsert)
            .await
            .map_err(driver_error)?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, filter: Document) -> ModelResult<u64> {
        Ok(self
            .collection
            .delete_one(filter)
            .await
            .map_err(driver_error)?
            .deleted_count)
    }

    async fn delete_many(&self, filter: Document) -> ModelResult<u64> {
        Ok(self
            .collection
            .delete_many(filter)
            .await
            .map_err(driver_error)?
            .deleted_count)
    }

    async fn find_one_and_delete(&self, filter: Document) -> ModelResult<Option<Document>> {
        self.collection
            .find_one_and_delete(filter)
            .await
            .map_err(driver_error)
    }

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        return_document: ReturnDocument,
    ) -> ModelResult<Option<Document>> {
        self.collection
            .find_one_and_replace(filter, replacement)
            .return_document(driver_return_document(return_document))
            .await
            .map_err(driver_error)
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        return_document: ReturnDocument,
    ) -> ModelResult<Option<Document>> {
        self.collection
            .find_one_and_update(filter, update)
            .return_document(driver_return_document(return_document))
            .await
            .map_err(driver_error)
    }
}

/// Translates a declaration into the driver's index model.
///
/// The explicit or derived name is always sent, so the server and
/// [`IndexDeclaration::index_name`] agree on it.
///
/// # Errors
///
/// Returns [`ModelError::InvalidDocument`] naming every declared option the driver's
/// [`IndexOptions`] cannot carry. Such an option would never reach the server, and the
/// live index would never compare equal to its declaration.
fn index_model(index: &IndexDeclaration) -> ModelResult<IndexModel> {
    let mut options = index.options().clone();
    options.insert("name", index.index_name());
    let options = deserialize_from_document::<IndexOptions>(options)?;

    let sent = serialize_to_document(&options)?;
    let unsupported = index
        .options()
        .keys()
        .filter(|key| !sent.contains_key(key.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>();
    if !unsupported.is_empty() {
        return Err(ModelError::InvalidDocument(format!(
            "index {} declares unsupported options: {}",
            index.index_name(),
            unsupported.join(", ")
        )));
    }

    Ok(IndexModel::builder()
        .keys(index.keys().clone())
        .options(options)
        .build())
}

/// Builds the collection options carried by a model configuration.
pub(crate) fn collection_options(config: &ModelConfig) -> CollectionOptions {
    let mut options = CollectionOptions::default();
    options.selection_criteria = config
        .read_preference
        .map(|preference| SelectionCriteria::ReadPreference(driver_read_preference(preference)));
    options.read_concern = config.read_concern.map(driver_read_concern);
    options.write_concern = config.write_concern.as_ref().map(driver_write_concern);
    options
}

fn driver_read_preference(preference: ReadPreference) -> DriverReadPreference {
    match preference {
        ReadPreference::Primary => DriverReadPreference::Primary,
        ReadPreference::PrimaryPreferred => DriverReadPreference::PrimaryPreferred {
            options: Default::default(),
        },
        ReadPreference::Secondary => DriverReadPreference::Secondary {
            options: Default::default(),
        },
        ReadPreference::SecondaryPreferred => DriverReadPreference::SecondaryPreferred {
            options: Default::default(),
        },
        ReadPreference::Nearest => DriverReadPreference::Nearest {
            options: Default::default(),
        },
    }
}

fn driver_read_concern(concern: ReadConcern) -> DriverReadConcern {
    match concern {
        ReadConcern::Local => DriverReadConcern::local(),
        ReadConcern::Majority => DriverReadConcern::majority(),
        ReadConcern::Linearizable => DriverReadConcern::linearizable(),
        ReadConcern::Available => DriverReadConcern::available(),
        ReadConcern::Snapshot => DriverReadConcern::snapshot(),
    }
}

fn driver_write_concern(concern: &WriteConcern) -> DriverWriteConcern {
    let mut driver = DriverWriteConcern::default();
    driver.w = concern.w.as_ref().map(|w| match w {
        Acknowledgment::Nodes(nodes) => DriverAcknowledgment::Nodes(*nodes),
        Acknowledgment::Majority => DriverAcknowledgment::Majority,
        Acknowledgment::Custom(tag) => DriverAcknowledgment::Custom(tag.clone()),
    });
    driver.journal = concern.journal;
    driver.w_timeout = concern.w_timeout;
    driver
}

fn driver_return_document(return_document: ReturnDocument) -> DriverReturnDocument {
    match return_document {
        ReturnDocument::Before => DriverReturnDocument::Before,
        ReturnDocument::After => DriverReturnDocument::After,
    }
}

/// Returns the server error code of a command or write failure.
fn error_code(err: &DriverError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|write| write.code),
        _ => None,
    }
}

/// Maps unique index violations to [`ModelError::DuplicateKey`] and passes every other
/// driver error through unchanged.
fn driver_error(err: DriverError) -> ModelError {
    if error_code(&err) == Some(DUPLICATE_KEY) {
        return ModelError::DuplicateKey(err.to_string());
    }
    ModelError::driver(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use mongodb::options::ReadConcernLevel;

    #[test]
    fn test_collection_options_follow_config() {
        let config = ModelConfig::builder()
            .collection("users")
            .read_preference(ReadPreference::Nearest)
            .read_concern(ReadConcern::Majority)
            .write_concern(WriteConcern::majority().journal(true))
            .build()
            .unwrap();

        let options = collection_options(&config);

        assert!(matches!(
            options.selection_criteria,
            Some(SelectionCriteria::ReadPreference(DriverReadPreference::Nearest { .. }))
        ));
        assert_eq!(
            options.read_concern.map(|concern| concern.level),
            Some(ReadConcernLevel::Majority)
        );
        let write = options.write_concern.unwrap();
        assert_eq!(write.w, Some(DriverAcknowledgment::Majority));
        assert_eq!(write.journal, Some(true));
    }

    #[test]
    fn test_default_collection_options_are_empty() {
        let config = ModelConfig::builder().collection("users").build().unwrap();
        let options = collection_options(&config);

        assert!(options.selection_criteria.is_none());
        assert!(options.read_concern.is_none());
        assert!(options.write_concern.is_none());
    }

    #[test]
    fn test_index_model_carries_name_and_options() {
        let declared = IndexDeclaration::new(doc! { "owner": 1, "created_at": -1 })
            .unique(true)
            .expire_after(Duration::from_secs(60));

        let model = index_model(&declared).unwrap();
        let options = model.options.unwrap();

        assert_eq!(model.keys, doc! { "owner": 1, "created_at": -1 });
        assert_eq!(options.name.as_deref(), Some("owner_1_created_at_-1"));
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.expire_after, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_unknown_index_option_is_rejected() {
        let declared = IndexDeclaration::ascending("a")
            .option("uniqe", true)
            .option("colation", doc! { "locale": "fr" });

        match index_model(&declared).unwrap_err() {
            ModelError::InvalidDocument(message) => {
                assert!(message.contains("a_1"));
                assert!(message.contains("uniqe"));
                assert!(message.contains("colation"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_known_index_options_are_kept() {
        let declared = IndexDeclaration::ascending("email")
            .name("by_email")
            .sparse(true)
            .partial_filter(doc! { "email": { "$exists": true } });

        let options = index_model(&declared).unwrap().options.unwrap();

        assert_eq!(options.name.as_deref(), Some("by_email"));
        assert_eq!(options.sparse, Some(true));
        assert_eq!(
            options.partial_filter_expression,
            Some(doc! { "email": { "$exists": true } })
        );
    }
}

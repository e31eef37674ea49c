use bson::{Bson, doc, oid::ObjectId};
use mongomodel::{memory::InMemoryStore, prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    name: String,
    age: i32,
}

impl User {
    fn new(name: &str, age: i32) -> Self {
        Self { id: None, name: name.to_string(), age }
    }
}

impl Model for User {
    fn config() -> ModelResult<ModelConfig> {
        ModelConfig::builder()
            .collection("users")
            .index(IndexDeclaration::ascending("name").unique(true))
            .build()
    }

    fn id(&self) -> Option<Bson> {
        self.id.map(Bson::ObjectId)
    }

    fn set_id(&mut self, id: Bson) -> ModelResult<()> {
        self.id = Some(into_object_id(id)?);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Base {
    name: String,
}

impl Model for Base {
    fn config() -> ModelResult<ModelConfig> {
        ModelConfig::builder().abstract_model(true).build()
    }

    fn id(&self) -> Option<Bson> {
        None
    }

    fn set_id(&mut self, _id: Bson) -> ModelResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_insert_assigns_id_and_rejects_duplicates() {
    let store = InMemoryStore::new();
    let backend = store.collection_for::<User>().unwrap();
    let users = ModelCollection::<_, User>::new(&backend).unwrap();
    users.ensure_indexes(true).await.unwrap();

    let mut alice = User::new("Alice", 30);
    assert!(users.insert(&mut alice).await.unwrap());
    assert!(alice.id.is_some());

    let mut other = User::new("Alice", 41);
    assert!(!users.insert(&mut other).await.unwrap());
    assert!(other.id.is_none());
    assert_eq!(users.count_documents(Filter::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_insert_many_assigns_ids_in_order() {
    let store = InMemoryStore::new();
    let backend = store.collection_for::<User>().unwrap();
    let users = ModelCollection::<_, User>::new(&backend).unwrap();

    let mut batch = vec![User::new("Alice", 30), User::new("Bob", 25), User::new("Carol", 35)];
    users.insert_many(&mut batch).await.unwrap();

    for user in &batch {
        let stored = users.find_one(Filter::by_id(user.id().unwrap())).await.unwrap();
        assert_eq!(stored.as_ref(), Some(user));
    }
    assert_eq!(users.estimated_document_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_save_upserts_then_modifies() {
    let store = InMemoryStore::new();
    let backend = store.collection_for::<User>().unwrap();
    let users = ModelCollection::<_, User>::new(&backend).unwrap();

    let mut bob = User::new("Bob", 25);
    assert!(!users.save(&mut bob, false).await.unwrap());
    assert_eq!(users.count_documents(Filter::new()).await.unwrap(), 0);

    assert!(users.save(&mut bob, true).await.unwrap());
    assert!(bob.id.is_some());

    assert!(!users.save(&mut bob, true).await.unwrap());

    bob.age = 26;
    assert!(users.save(&mut bob, true).await.unwrap());

    let stored = users.find_one(Filter::new().eq("name", "Bob").unwrap()).await.unwrap();
    assert_eq!(stored.map(|user| user.age), Some(26));
    assert_eq!(users.count_documents(Filter::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_reload_and_delete() {
    let store = InMemoryStore::new();
    let backend = store.collection_for::<User>().unwrap();
    let users = ModelCollection::<_, User>::new(&backend).unwrap();

    let mut carol = User::new("Carol", 35);
    users.insert(&mut carol).await.unwrap();

    carol.age = 99;
    assert!(users.reload(&mut carol).await.unwrap());
    assert_eq!(carol.age, 35);

    assert!(users.delete(&carol).await.unwrap());
    assert!(!users.delete(&carol).await.unwrap());
    assert!(!users.reload(&mut carol).await.unwrap());

    let err = users.reload(&mut User::new("Dave", 1)).await.unwrap_err();
    assert!(matches!(err, ModelError::InvalidDocument(_)));
}

#[tokio::test]
async fn test_delete_many_by_ids() {
    let store = InMemoryStore::new();
    let backend = store.collection_for::<User>().unwrap();
    let users = ModelCollection::<_, User>::new(&backend).unwrap();

    let mut batch = vec![User::new("Alice", 30), User::new("Bob", 25), User::new("Carol", 35)];
    users.insert_many(&mut batch).await.unwrap();

    assert_eq!(users.delete_many(&batch[..2]).await.unwrap(), 2);
    assert_eq!(users.delete_many(&[]).await.unwrap(), 0);

    let remaining = users.find(Filter::new(), FindOptions::new()).await.unwrap();
    assert_eq!(remaining, vec![batch[2].clone()]);
}

#[tokio::test]
async fn test_find_with_sort_and_limit() {
    let store = InMemoryStore::new();
    let backend = store.collection_for::<User>().unwrap();
    let users = ModelCollection::<_, User>::new(&backend).unwrap();

    let mut batch = vec![User::new("Alice", 30), User::new("Bob", 25), User::new("Carol", 35)];
    users.insert_many(&mut batch).await.unwrap();

    let found = users
        .find(
            Filter::new().gte("age", 26).unwrap(),
            FindOptions::new().sort(doc! { "age": -1 }).limit(1),
        )
        .await
        .unwrap();

    assert_eq!(found.iter().map(|user| user.name.as_str()).collect::<Vec<_>>(), vec!["Carol"]);
}

#[tokio::test]
async fn test_find_one_and_modify() {
    let store = InMemoryStore::new();
    let backend = store.collection_for::<User>().unwrap();
    let users = ModelCollection::<_, User>::new(&backend).unwrap();

    let mut alice = User::new("Alice", 30);
    users.insert(&mut alice).await.unwrap();

    let before = users
        .find_one_and_update(
            Filter::by_id(alice.id().unwrap()),
            doc! { "$inc": { "age": 1 } },
            ReturnDocument::Before,
        )
        .await
        .unwrap();
    assert_eq!(before.map(|user| user.age), Some(30));

    let mut replacement = User::new("Alicia", 40);
    let after = users
        .find_one_and_replace(Filter::new().eq("name", "Alice").unwrap(), &mut replacement, ReturnDocument::After)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.name, "Alicia");
    assert_eq!(replacement.id, alice.id);

    let deleted = users
        .find_one_and_delete(Filter::new().eq("name", "Alicia").unwrap())
        .await
        .unwrap();
    assert_eq!(deleted.map(|user| user.age), Some(40));
    assert_eq!(users.count_documents(Filter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_collection_must_match_config() {
    let store = InMemoryStore::new();
    let other = store.collection("accounts");

    let err = ModelCollection::<_, User>::new(&other).unwrap_err();
    assert!(matches!(err, ModelError::Configuration(_)));

    let err = ModelCollection::<_, Base>::new(&other).unwrap_err();
    assert!(matches!(err, ModelError::Configuration(_)));
    assert!(store.collection_for::<Base>().is_err());
}

#[tokio::test]
async fn test_ensure_indexes_with_session() {
    let store = InMemoryStore::new();
    let backend = store.collection_for::<User>().unwrap();
    let users = ModelCollection::<_, User>::new(&backend).unwrap();
    let mut session = mongomodel::memory::MemorySession::new();

    let diff = users.index_diff(true).await.unwrap();
    assert_eq!(diff.to_create.len(), 1);

    let plan = users
        .ensure_indexes_with(Some(&mut session), CallOptions::new(), true)
        .await
        .unwrap();

    assert_eq!(plan.created, vec!["name_1"]);
    assert_eq!(session.calls(), 2);
    assert!(users.index_diff(true).await.unwrap().is_empty());
}

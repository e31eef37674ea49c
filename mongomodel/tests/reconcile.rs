use bson::doc;
use mongomodel::{
    memory::{InMemoryStore, IndexEvent, MemoryCollection, MemorySession},
    prelude::*,
};

fn name_unique() -> IndexDeclaration {
    IndexDeclaration::ascending("name").unique(true)
}

fn email() -> IndexDeclaration {
    IndexDeclaration::ascending("email")
}

async fn seeded_indexes(store: &InMemoryStore, indexes: Vec<IndexDeclaration>) -> MemoryCollection {
    let users = store.collection("users");
    users
        .create_indexes(indexes, &CallOptions::default(), None)
        .await
        .unwrap();
    users
}

#[tokio::test]
async fn test_missing_indexes_are_created() {
    let store = InMemoryStore::new();
    let users = store.collection("users");

    let plan = IndexReconciler::new(&users)
        .reconcile(&[name_unique(), email()], true)
        .await
        .unwrap();

    assert_eq!(plan.created, vec!["name_1", "email_1"]);
    assert!(plan.replaced.is_empty());
    assert!(plan.dropped.is_empty());

    let names = users
        .list_indexes(&CallOptions::default(), None)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.get_str("name").unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["_id_", "name_1", "email_1"]);
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let store = InMemoryStore::new();
    let users = store.collection("users");
    let declared = [name_unique(), email()];

    IndexReconciler::new(&users).reconcile(&declared, true).await.unwrap();
    let events = users.index_events().await;

    let plan = IndexReconciler::new(&users).reconcile(&declared, true).await.unwrap();

    assert!(plan.is_noop());
    assert_eq!(plan.kept, vec!["name_1", "email_1"]);
    assert_eq!(users.index_events().await, events);
}

#[tokio::test]
async fn test_option_mismatch_replaces_index() {
    let store = InMemoryStore::new();
    let users = seeded_indexes(&store, vec![IndexDeclaration::ascending("name")]).await;

    let plan = IndexReconciler::new(&users)
        .reconcile(&[name_unique()], true)
        .await
        .unwrap();

    assert_eq!(plan.replaced, vec!["name_1"]);
    assert_eq!(plan.created, vec!["name_1"]);
    assert_eq!(
        users.index_events().await,
        vec![
            IndexEvent::Created("name_1".to_string()),
            IndexEvent::Dropped("name_1".to_string()),
            IndexEvent::Created("name_1".to_string()),
        ]
    );

    let live = users.list_indexes(&CallOptions::default(), None).await.unwrap();
    assert!(live[1].get_bool("unique").unwrap());
}

#[tokio::test]
async fn test_unmanaged_indexes_kept_without_drop() {
    let store = InMemoryStore::new();
    let users = seeded_indexes(&store, vec![IndexDeclaration::ascending("age")]).await;

    let plan = IndexReconciler::new(&users)
        .reconcile(&[email()], false)
        .await
        .unwrap();

    assert_eq!(plan.created, vec!["email_1"]);
    assert!(plan.dropped.is_empty());
    assert_eq!(users.list_indexes(&CallOptions::default(), None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_full_reconciliation_order() {
    let store = InMemoryStore::new();
    let users = seeded_indexes(
        &store,
        vec![IndexDeclaration::ascending("name"), IndexDeclaration::ascending("age")],
    )
    .await;

    let plan = IndexReconciler::new(&users)
        .reconcile(&[name_unique(), email()], true)
        .await
        .unwrap();

    assert_eq!(
        plan,
        IndexPlan {
            created: vec!["name_1".to_string(), "email_1".to_string()],
            replaced: vec!["name_1".to_string()],
            dropped: vec!["age_1".to_string()],
            kept: vec![],
        }
    );
    assert_eq!(
        users.index_events().await[2..],
        [
            IndexEvent::Dropped("name_1".to_string()),
            IndexEvent::Created("name_1".to_string()),
            IndexEvent::Created("email_1".to_string()),
            IndexEvent::Dropped("age_1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_session_forwarded_to_every_call() {
    let store = InMemoryStore::new();
    let users = seeded_indexes(
        &store,
        vec![IndexDeclaration::ascending("name"), IndexDeclaration::ascending("age")],
    )
    .await;
    let mut session = MemorySession::new();

    IndexReconciler::new(&users)
        .with_session(Some(&mut session))
        .with_options(CallOptions::new().comment("sync users"))
        .reconcile(&[name_unique(), email()], true)
        .await
        .unwrap();

    // list, drop name_1, create, drop age_1
    assert_eq!(session.calls(), 4);
}

#[tokio::test]
async fn test_diff_reports_without_writing() {
    let store = InMemoryStore::new();
    let users = seeded_indexes(
        &store,
        vec![IndexDeclaration::ascending("name"), IndexDeclaration::ascending("age"), email()],
    )
    .await;
    let events = users.index_events().await;

    let diff = IndexReconciler::new(&users)
        .diff(&[name_unique(), email()], true)
        .await
        .unwrap();

    assert_eq!(diff.to_create, vec![name_unique()]);
    assert_eq!(diff.to_drop, vec!["name_1", "age_1"]);
    assert_eq!(diff.untouched, vec!["email_1"]);
    assert_eq!(users.index_events().await, events);
}

#[tokio::test]
async fn test_unique_index_on_duplicates_fails() {
    let store = InMemoryStore::new();
    let users = store.collection("users");
    users
        .seed([doc! { "name": "Alice" }, doc! { "name": "Alice" }])
        .await;

    let err = IndexReconciler::new(&users)
        .reconcile(&[name_unique()], true)
        .await
        .unwrap_err();

    assert!(matches!(err, ModelError::DuplicateKey(_)));
    assert!(users.index_events().await.is_empty());
}

use std::sync::Arc;

use serde_json::json;
use trellis_core::ObjectHolder;
use trellis_store::{
    BatchOptions, ObserveListOptions, ObserveObjectOptions, OptimisticId, Status, Store,
};
use trellis_test_utils::{
    InterfaceMetadataBuilder, MockOntology, MockTransport, ObjectMetadataBuilder,
};

fn make_store(transport: &MockTransport) -> Arc<Store> {
    let ontology = MockOntology::new();
    ontology.add_object(ObjectMetadataBuilder::new("Employee", "id").build());
    ontology.add_object(
        ObjectMetadataBuilder::new("Bar", "id")
            .implements("Foo")
            .build(),
    );
    ontology.add_interface(
        InterfaceMetadataBuilder::new("Foo")
            .implemented_by("Bar")
            .build(),
    );
    Store::new(Arc::new(transport.clone()), Arc::new(ontology))
}

fn employee(pk: &str, name: &str) -> ObjectHolder {
    ObjectHolder::new("Employee", pk).with_property("name", json!(name))
}

/// Let spawned post-batch revalidation tasks run to completion. The mock
/// transport never blocks, so a bounded number of yields drains them.
async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn optimistic_write_is_visible_then_rolls_back_atomically() {
    let transport = MockTransport::new();
    transport.add_object(employee("emp1", "A"));
    let store = make_store(&transport);

    let query = store.object_query(ObserveObjectOptions::new("Employee", "emp1".into()));
    query.revalidate(false).await;

    let mut sub = store.subscribe(query.cache_key());
    let initial = sub.recv().await.expect("replayed current state");
    assert_eq!(initial.entry.status, Status::Loaded);
    assert!(!initial.is_optimistic);

    // Apply a local mutation optimistically, as an action response would.
    let id = OptimisticId::new();
    store.batch(BatchOptions::optimistic(id), |batch| {
        query.write_to_store(Arc::new(employee("emp1", "B")), Status::Loaded, batch);
    });

    let optimistic = sub.try_recv().expect("optimistic payload");
    assert!(optimistic.is_optimistic);
    let object = optimistic.entry.value.as_ref().unwrap().as_object().unwrap();
    assert_eq!(object.property("name"), Some(&json!("B")));

    // Rollback restores truth and clears the flag.
    store.remove_layer(id);
    let restored = sub.try_recv().expect("rollback payload");
    assert!(!restored.is_optimistic);
    let object = restored.entry.value.as_ref().unwrap().as_object().unwrap();
    assert_eq!(object.property("name"), Some(&json!("A")));

    settle().await;
}

#[tokio::test]
async fn type_invalidation_reaches_only_dependent_queries() {
    let transport = MockTransport::new();
    transport.add_object(employee("emp1", "A"));
    let store = make_store(&transport);

    // Warm the object so later refetches report it as modified, not added.
    let object_query =
        store.object_query(ObserveObjectOptions::new("Employee", "emp1".into()));
    store.invalidate_object("Employee", "emp1".into()).await;
    settle().await;
    assert_eq!(transport.fetch_object_calls(), 1);

    let list_query = store.list_query(ObserveListOptions::new("Employee"));
    let interface_query = store.interface_list_query(ObserveListOptions::new("Foo"));

    // Invalidate the concrete type: the object and list queries refetch,
    // the interface list does not (Employee does not implement Foo).
    transport.add_page(vec![employee("emp1", "A")], None);
    let changes = store.invalidate_object_type("Employee", None).await;
    settle().await;

    assert_eq!(transport.fetch_object_calls(), 2);
    assert_eq!(transport.fetch_page_calls(), 1);
    assert!(changes.is_modified(object_query.cache_key()));
    assert!(changes.is_modified(list_query.cache_key()));
    assert!(!changes.is_modified(interface_query.cache_key()));

    // Invalidate the implementing type: only the interface list refetches
    // (one page plus one grouped upgrade request).
    transport.add_page(
        vec![ObjectHolder::new("Bar", "bar1").with_property("label", json!("b"))],
        None,
    );
    transport.add_page(
        vec![ObjectHolder::new("Bar", "bar1")
            .with_property("label", json!("b"))
            .with_property("secret", json!(7))],
        None,
    );
    let changes = store.invalidate_object_type("Bar", None).await;
    settle().await;

    assert_eq!(transport.fetch_object_calls(), 2);
    assert_eq!(transport.fetch_page_calls(), 3);
    assert!(changes.is_modified(interface_query.cache_key()));
    assert!(!changes.is_modified(list_query.cache_key()));
}

#[tokio::test]
async fn batch_adding_new_object_refreshes_lists_off_critical_path() {
    let transport = MockTransport::new();
    transport.add_page(vec![], None);
    let store = make_store(&transport);

    let list_query = store.list_query(ObserveListOptions::new("Employee"));
    list_query.revalidate(false).await;
    assert_eq!(transport.fetch_page_calls(), 1);

    // A batch writes a never-seen object; the list must refetch, but only
    // after the batch itself has returned.
    transport.add_page(vec![employee("emp9", "New")], None);
    let object_query =
        store.object_query(ObserveObjectOptions::new("Employee", "emp9".into()));
    store.batch(BatchOptions::default(), |batch| {
        object_query.write_to_store(Arc::new(employee("emp9", "New")), Status::Loaded, batch);
    });
    assert_eq!(transport.fetch_page_calls(), 1, "refetch is asynchronous");

    settle().await;
    assert_eq!(transport.fetch_page_calls(), 2);

    let entry = store.get_value(list_query.cache_key()).expect("list entry");
    let list = entry.value.as_ref().unwrap().as_list().unwrap().clone();
    assert_eq!(list.items.len(), 1);
}

#[tokio::test]
async fn concurrent_subscribers_share_one_fetch() {
    let transport = MockTransport::new();
    transport.add_object(employee("emp1", "A"));
    let store = make_store(&transport);

    let query = store.object_query(ObserveObjectOptions::new("Employee", "emp1".into()));
    tokio::join!(query.revalidate(false), query.revalidate(false));

    assert_eq!(transport.fetch_object_calls(), 1);
    assert_eq!(query.status(), Status::Loaded);
    settle().await;
}

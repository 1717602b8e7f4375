//! Client start/stop and primitive cache tests

use crate::common::*;

// ============================================================================
// Start / Stop
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn restart_after_stop() {
    let t = TestClient::new(1);
    let counter = t.client.atomic_counter_builder("hits").unwrap().get_async().await.unwrap();
    counter.add_and_get(5).await.unwrap();

    t.client.stop().await.unwrap();
    assert!(!t.client.is_running());
    assert_eq!(counter.state(), PrimitiveState::Closed);

    t.client.start().unwrap();
    let again = t.client.atomic_counter_builder("hits").unwrap().get_async().await.unwrap();
    assert_eq!(again.get().await.unwrap(), 5);
    assert_eq!(t.stats().opens, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_is_idempotent() {
    let t = TestClient::new(1);
    t.client.stop().await.unwrap();
    t.client.stop().await.unwrap();
    assert!(matches!(
        t.client.map_builder::<String>("m"),
        Err(Error::NotRunning)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_releases_cached_sessions() {
    let t = TestClient::new(3);
    t.client.map_builder::<String>("users").unwrap().get_async().await.unwrap();
    t.client.atomic_counter_builder("hits").unwrap().get_async().await.unwrap();
    assert_eq!(t.stats().opens, 4);

    t.client.stop().await.unwrap();
    assert_eq!(t.stats().closes, 4);
    for partition in t.cluster.partitions(GROUP) {
        assert_eq!(partition.session_count(), 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn config_from_toml() {
    let config = ClientConfig::from_toml_str(
        r#"
        namespace = "it"
        context_threads = 2
        session_timeout_ms = 1000
        cache_size = 16
        "#,
    )
    .unwrap();
    let t = TestClient::with_config(1, config);
    assert_eq!(t.client.namespace(), "it");

    let value = t.client.atomic_value_builder::<String>("leader").unwrap().build_async().await.unwrap();
    assert_eq!(value.name().to_string(), "it/leader");
}

// ============================================================================
// Primitive cache
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn one_session_per_name_across_tasks() {
    let t = TestClient::new(1);
    let client = Arc::new(t.client);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let counter = client
                    .atomic_counter_builder("shared")
                    .unwrap()
                    .get_async()
                    .await
                    .unwrap();
                counter.increment_and_get().await.unwrap()
            })
        })
        .collect();
    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    results.sort_unstable();
    assert_eq!(results, (1..=16).collect::<Vec<i64>>());
    assert_eq!(t.cluster.stats(GROUP).opens, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn get_ignores_options_of_later_builders() {
    let t = TestClient::new(1);
    let writable = t.client.atomic_counter_builder("hits").unwrap().get_async().await.unwrap();
    let same = t
        .client
        .atomic_counter_builder("hits")
        .unwrap()
        .with_read_only(true)
        .get_async()
        .await
        .unwrap();

    assert_eq!(same.add_and_get(2).await.unwrap(), 2);
    assert_eq!(writable.get().await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn deleted_primitive_is_rebuilt_empty() {
    let t = TestClient::new(2);
    let builder = t.client.set_builder("tags").unwrap();

    let set = builder.get_async().await.unwrap();
    set.add("rust").await.unwrap();
    set.delete().await.unwrap();

    let management = t.client.management().unwrap();
    let name = set.name().clone();
    eventually(|| !management.primitive_cache().contains(&name)).await;

    let fresh = builder.get_async().await.unwrap();
    assert!(fresh.is_empty().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_build_surfaces_cause_and_retries() {
    let t = TestClient::new(1);
    t.partition(0).set_down(true);

    let builder = t.client.atomic_counter_builder("hits").unwrap();
    let err = builder.get_async().await.err().unwrap();
    assert!(matches!(err, Error::Transport { .. }));

    t.partition(0).set_down(false);
    let counter = builder.get_async().await.unwrap();
    assert_eq!(counter.get().await.unwrap(), 0);
}

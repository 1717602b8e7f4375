//! Builder option tests

use crate::common::*;

// ============================================================================
// Read-only
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn read_only_kinds_never_send_mutations() {
    let t = TestClient::new(2);
    let value = t
        .client
        .atomic_value_builder::<String>("leader")
        .unwrap()
        .with_read_only(true)
        .build_async()
        .await
        .unwrap();
    let set = t.client.set_builder("tags").unwrap().with_read_only(true).build_async().await.unwrap();
    let log = t
        .client
        .log_builder::<u32>("audit")
        .unwrap()
        .with_read_only(true)
        .build_async()
        .await
        .unwrap();
    let counter = t
        .client
        .atomic_counter_builder("hits")
        .unwrap()
        .with_read_only(true)
        .build_async()
        .await
        .unwrap();

    let before = t.stats().commands;
    assert!(matches!(value.set(&"me".to_string()).await, Err(Error::Unsupported { .. })));
    assert!(matches!(set.add("x").await, Err(Error::Unsupported { .. })));
    assert!(matches!(set.retain_all(&[]).await, Err(Error::Unsupported { .. })));
    assert!(matches!(log.append(&1).await, Err(Error::Unsupported { .. })));
    assert!(matches!(counter.increment_and_get().await, Err(Error::Unsupported { .. })));
    assert!(matches!(set.delete().await, Err(Error::Unsupported { .. })));
    assert_eq!(t.stats().commands, before);

    assert_eq!(value.get().await.unwrap(), None);
    assert_eq!(log.size().await.unwrap(), 0);
    assert_eq!(counter.get().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn read_only_view_sees_writers_changes() {
    let t = TestClient::new(2);
    let writer = t.client.map_builder::<u64>("scores").unwrap().build_async().await.unwrap();
    let reader = t
        .client
        .map_builder::<u64>("scores")
        .unwrap()
        .with_read_only(true)
        .build_async()
        .await
        .unwrap();

    writer.put("alice", &3).await.unwrap();
    assert_eq!(reader.get("alice").await.unwrap().unwrap().value, 3);
    assert!(matches!(reader.remove("alice").await, Err(Error::Unsupported { .. })));
}

// ============================================================================
// Groups, partitioners, serializers
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn with_group_targets_named_group() {
    let t = TestClient::new(1);
    t.cluster.add_group("memory", 4).unwrap();

    let map = t
        .client
        .map_builder::<String>("sessions")
        .unwrap()
        .with_group("memory")
        .build_async()
        .await
        .unwrap();
    map.put("k", &"v".to_string()).await.unwrap();

    assert_eq!(t.cluster.stats("memory").opens, 4);
    assert_eq!(t.cluster.stats(GROUP).opens, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn name_routed_kinds_follow_the_partitioner() {
    let t = TestClient::new(3);
    let counter = t
        .client
        .atomic_counter_builder("backlog")
        .unwrap()
        .with_partitioner(letter_partitioner())
        .build_async()
        .await
        .unwrap();
    counter.increment_and_get().await.unwrap();

    assert_eq!(t.partition(2).stats().opens, 1);
    assert_eq!(t.partition(2).stats().commands, 1);
    assert_eq!(t.partition(0).stats().opens + t.partition(1).stats().opens, 0);
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Profile {
    name: String,
    admin: bool,
}

#[tokio::test(flavor = "multi_thread")]
async fn same_serializer_round_trips_across_instances() {
    let t = TestClient::new(2);
    for serializer in [Serializer::MsgPack, Serializer::Json] {
        let name = format!("profiles-{:?}", serializer);
        let writer = t
            .client
            .map_builder::<Profile>(&name)
            .unwrap()
            .with_serializer(serializer)
            .build_async()
            .await
            .unwrap();
        let reader = t
            .client
            .map_builder::<Profile>(&name)
            .unwrap()
            .with_serializer(serializer)
            .build_async()
            .await
            .unwrap();

        let alice = Profile {
            name: "alice".to_string(),
            admin: true,
        };
        writer.put("alice", &alice).await.unwrap();
        assert_eq!(reader.get("alice").await.unwrap().unwrap().value, alice);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn mismatched_serializer_reports_serialization_error() {
    let t = TestClient::new(1);
    let json = t
        .client
        .atomic_value_builder::<Profile>("owner")
        .unwrap()
        .with_serializer(Serializer::Json)
        .build_async()
        .await
        .unwrap();
    let msgpack = t.client.atomic_value_builder::<Profile>("owner").unwrap().build_async().await.unwrap();

    json.set(&Profile {
        name: "bob".to_string(),
        admin: false,
    })
    .await
    .unwrap();
    assert!(matches!(msgpack.get().await, Err(Error::Serialization { .. })));
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn cached_reads_skip_the_partition() {
    let t = TestClient::new(1);
    let map = t
        .client
        .map_builder::<String>("config")
        .unwrap()
        .with_cache(true)
        .with_cache_size(8)
        .build_async()
        .await
        .unwrap();
    map.put("mode", &"fast".to_string()).await.unwrap();
    // Let the put's own change event invalidate before warming the cache
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(map.get("mode").await.unwrap().unwrap().value, "fast");
    let queries = t.stats().queries;
    for _ in 0..5 {
        assert_eq!(map.get("mode").await.unwrap().unwrap().value, "fast");
    }
    assert_eq!(t.stats().queries, queries);
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_cache_size_fails_the_build() {
    let t = TestClient::new(1);
    let result = t
        .client
        .set_builder("tags")
        .unwrap()
        .with_cache(true)
        .with_cache_size(0)
        .build_async()
        .await;
    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    // The partially built primitive released its session
    assert_eq!(t.partition(0).session_count(), 0);
}

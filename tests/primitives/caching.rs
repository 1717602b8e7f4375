//! Cache coherence between independent clients

use crate::common::*;

async fn read_with_timeout<F, Fut, T>(read: F, expected: T)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = T>,
    T: PartialEq + std::fmt::Debug,
{
    for _ in 0..400 {
        if read().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(read().await, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_write_invalidates_cached_entry() {
    let t = TestClient::new(2);
    let peer = t.peer();

    let cached = t
        .client
        .map_builder::<u64>("inventory")
        .unwrap()
        .with_cache(true)
        .get_async()
        .await
        .unwrap();
    let writer = peer.map_builder::<u64>("inventory").unwrap().get_async().await.unwrap();

    writer.put("widgets", &10).await.unwrap();
    read_with_timeout(
        || async { cached.get("widgets").await.unwrap().map(|v| v.value) },
        Some(10),
    )
    .await;

    writer.put("widgets", &11).await.unwrap();
    read_with_timeout(
        || async { cached.get("widgets").await.unwrap().map(|v| v.value) },
        Some(11),
    )
    .await;

    writer.remove("widgets").await.unwrap();
    read_with_timeout(|| async { cached.get("widgets").await.unwrap().is_some() }, false).await;

    peer.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_clear_invalidates_everything() {
    let t = TestClient::new(3);
    let peer = t.peer();
    let cached = t
        .client
        .set_builder("online")
        .unwrap()
        .with_cache(true)
        .build_async()
        .await
        .unwrap();
    let writer = peer.set_builder("online").unwrap().build_async().await.unwrap();

    for user in ["ann", "bo", "cy"] {
        writer.add(user).await.unwrap();
    }
    read_with_timeout(|| async { cached.contains("bo").await.unwrap() }, true).await;

    writer.clear().await.unwrap();
    for user in ["ann", "bo", "cy"] {
        read_with_timeout(|| async { cached.contains(user).await.unwrap() }, false).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cached_value_follows_compare_and_set() {
    let t = TestClient::new(1);
    let peer = t.peer();
    let cached = t
        .client
        .atomic_value_builder::<String>("leader")
        .unwrap()
        .with_cache(true)
        .build_async()
        .await
        .unwrap();
    let other = peer.atomic_value_builder::<String>("leader").unwrap().build_async().await.unwrap();

    assert!(other.compare_and_set(None, Some(&"node-1".to_string())).await.unwrap());
    read_with_timeout(
        || async { cached.get().await.unwrap().map(|v| v.value) },
        Some("node-1".to_string()),
    )
    .await;

    assert!(!cached.compare_and_set(None, Some(&"node-2".to_string())).await.unwrap());
    assert!(cached
        .compare_and_set(Some(&"node-1".to_string()), Some(&"node-2".to_string()))
        .await
        .unwrap());
    assert_eq!(cached.get().await.unwrap().unwrap().value, "node-2");
}

#[tokio::test(flavor = "multi_thread")]
async fn suspension_drops_cached_entries() {
    let t = TestClient::new(1);
    let cached = t
        .client
        .map_builder::<String>("config")
        .unwrap()
        .with_cache(true)
        .build_async()
        .await
        .unwrap();
    cached.put("mode", &"fast".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    cached.get("mode").await.unwrap();

    t.partition(0).fail_keep_alives(true);
    eventually(|| cached.state() == PrimitiveState::Suspended).await;
    t.partition(0).fail_keep_alives(false);
    eventually(|| cached.state() == PrimitiveState::Connected).await;

    let queries = t.stats().queries;
    assert_eq!(cached.get("mode").await.unwrap().unwrap().value, "fast");
    assert_eq!(t.stats().queries, queries + 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_event_stream_does_not_leave_stale_entries() {
    // Long enough that no keep-alive runs during the outage
    let config = ClientConfig {
        session_timeout_ms: 30_000,
        ..test_config()
    };
    let t = TestClient::with_config(1, config);
    let cached = t
        .client
        .map_builder::<u64>("stock")
        .unwrap()
        .with_cache(true)
        .build_async()
        .await
        .unwrap();
    cached.put("a", &1).await.unwrap();
    assert_eq!(cached.get("a").await.unwrap().map(|v| v.value), Some(1));

    t.partition(0).set_down(true);
    t.partition(0).end_streams();
    tokio::time::sleep(Duration::from_millis(500)).await;
    t.partition(0).set_down(false);
    assert_eq!(cached.state(), PrimitiveState::Connected);

    let peer = t.peer();
    let writer = peer.map_builder::<u64>("stock").unwrap().build_async().await.unwrap();
    writer.put("a", &9).await.unwrap();
    assert_eq!(cached.get("a").await.unwrap().map(|v| v.value), Some(9));

    // The read above restarted the stream; caching and invalidation resume
    eventually(|| t.partition(0).stream_count() == 1).await;
    writer.put("a", &10).await.unwrap();
    read_with_timeout(
        || async { cached.get("a").await.unwrap().map(|v| v.value) },
        Some(10),
    )
    .await;

    peer.stop().await.unwrap();
}

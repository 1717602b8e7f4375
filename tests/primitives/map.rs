//! Partitioned map tests
//!
//! Keys are routed with `letter_partitioner`: 'a' and 'c' on partition 0,
//! 'b' on partition 2, anything else on partition 1.

use crate::common::*;
use futures::TryStreamExt;

async fn letter_map(t: &TestClient, name: &str) -> tessera::DistributedMap<String> {
    t.client
        .map_builder::<String>(name)
        .unwrap()
        .with_partitioner(letter_partitioner())
        .build_async()
        .await
        .unwrap()
}

fn commands(t: &TestClient) -> [u64; 3] {
    [0, 1, 2].map(|id| t.partition(id).stats().commands)
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn keyed_writes_touch_one_partition() {
    let t = TestClient::new(3);
    let map = letter_map(&t, "users").await;
    assert_eq!(t.stats().opens, 3);

    map.put("a", &"alice".to_string()).await.unwrap();
    assert_eq!(commands(&t), [1, 0, 0]);

    map.put("b", &"bob".to_string()).await.unwrap();
    assert_eq!(commands(&t), [1, 0, 1]);

    map.put("c", &"carol".to_string()).await.unwrap();
    assert_eq!(commands(&t), [2, 0, 1]);

    assert!(t.partition(0).contains_primitive(map.name()));
    assert_eq!(map.get("b").await.unwrap().unwrap().value, "bob");
}

#[tokio::test(flavor = "multi_thread")]
async fn aggregates_span_every_partition() {
    let t = TestClient::new(3);
    let map = letter_map(&t, "users").await;
    for (key, value) in [("a", "1"), ("b", "2"), ("c", "3"), ("x", "4")] {
        map.put(key, &value.to_string()).await.unwrap();
    }

    assert_eq!(map.size().await.unwrap(), 4);
    assert!(map.contains_value(&"4".to_string()).await.unwrap());
    assert!(!map.contains_value(&"5".to_string()).await.unwrap());

    let before = commands(&t);
    map.clear().await.unwrap();
    let after = commands(&t);
    for i in 0..3 {
        assert_eq!(after[i], before[i] + 1, "partition {} not cleared", i);
    }
    assert!(map.is_empty().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_waits_for_every_partition() {
    let t = TestClient::new(3);
    let map = letter_map(&t, "users").await;
    for (key, value) in [("a", "1"), ("b", "2"), ("x", "3")] {
        map.put(key, &value.to_string()).await.unwrap();
    }

    t.partition(1).stall_commands(true);
    let clearing = tokio::spawn({
        let map = map.clone();
        async move { map.clear().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!clearing.is_finished());
    assert_eq!(map.get("a").await.unwrap(), None);
    assert_eq!(map.get("b").await.unwrap(), None);

    t.partition(1).stall_commands(false);
    tokio::time::timeout(Duration::from_secs(2), clearing)
        .await
        .expect("clear should complete once partition 1 answers")
        .unwrap()
        .unwrap();
    assert!(map.is_empty().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn iteration_is_partition_major() {
    let t = TestClient::new(3);
    let map = letter_map(&t, "users").await;
    for key in ["b", "x", "c", "a", "y"] {
        map.put(key, &key.to_uppercase()).await.unwrap();
    }

    let keys: Vec<String> = map.key_stream().try_collect().await.unwrap();
    assert_eq!(keys, vec!["a", "c", "x", "y", "b"]);

    let entries = map.entries().await.unwrap();
    let values: Vec<&str> = entries.iter().map(|(_, v)| v.value.as_str()).collect();
    assert_eq!(values, vec!["A", "C", "X", "Y", "B"]);
}

// ============================================================================
// Versions
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn conditional_operations() {
    let t = TestClient::new(3);
    let map = letter_map(&t, "leases").await;

    assert_eq!(map.put_if_absent("a", &"one".to_string()).await.unwrap(), None);
    let existing = map.put_if_absent("a", &"two".to_string()).await.unwrap().unwrap();
    assert_eq!(existing.value, "one");

    assert_eq!(map.replace("missing", &"x".to_string()).await.unwrap(), None);
    assert!(!map.contains_key("missing").await.unwrap());

    let current = map.get("a").await.unwrap().unwrap();
    assert!(!map.remove_if_version("a", current.version + 1).await.unwrap());
    assert!(map.remove_if_version("a", current.version).await.unwrap());
    assert_eq!(map.get("a").await.unwrap(), None);
}

// ============================================================================
// Partition failure
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_partition_fails_only_its_keys() {
    let t = TestClient::new(3);
    let map = letter_map(&t, "users").await;
    map.put("a", &"alice".to_string()).await.unwrap();

    t.partition(2).set_down(true);
    assert!(map.put("b", &"bob".to_string()).await.is_err());
    assert_eq!(map.get("a").await.unwrap().unwrap().value, "alice");
    assert!(map.size().await.is_err());

    t.partition(2).set_down(false);
    assert_eq!(map.size().await.unwrap(), 1);
}

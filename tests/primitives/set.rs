//! Partitioned set tests

use crate::common::*;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn bulk_operations_group_by_partition() {
    let t = TestClient::new(3);
    let set = t
        .client
        .set_builder("tags")
        .unwrap()
        .with_partitioner(letter_partitioner())
        .build_async()
        .await
        .unwrap();

    assert!(set.add_all(&strings(&["a", "b", "x"])).await.unwrap());
    assert!(!set.add_all(&strings(&["a", "b"])).await.unwrap());
    assert_eq!(set.size().await.unwrap(), 3);

    assert!(set.contains_all(&strings(&["a", "x"])).await.unwrap());
    assert!(!set.contains_all(&strings(&["a", "zz"])).await.unwrap());

    assert!(set.remove_all(&strings(&["b", "nope"])).await.unwrap());
    assert_eq!(set.elements().await.unwrap(), strings(&["a", "x"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn retain_all_empties_partitions_without_survivors() {
    let t = TestClient::new(3);
    let set = t
        .client
        .set_builder("tags")
        .unwrap()
        .with_partitioner(letter_partitioner())
        .build_async()
        .await
        .unwrap();
    set.add_all(&strings(&["a", "c", "b", "x"])).await.unwrap();

    assert!(set.retain_all(&strings(&["c"])).await.unwrap());
    assert_eq!(set.elements().await.unwrap(), strings(&["c"]));
    assert!(!set.retain_all(&strings(&["c"])).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn default_partitioner_spreads_elements() {
    let t = TestClient::new(4);
    let set = t.client.set_builder("ids").unwrap().build_async().await.unwrap();
    let elements: Vec<String> = (0..64).map(|i| format!("id-{}", i)).collect();
    set.add_all(&elements).await.unwrap();

    assert_eq!(set.size().await.unwrap(), 64);
    let used = t
        .cluster
        .partitions(GROUP)
        .iter()
        .filter(|p| p.stats().commands > 0)
        .count();
    assert!(used > 1, "all elements routed to one partition");
}

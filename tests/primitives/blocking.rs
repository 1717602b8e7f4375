//! Blocking facade tests
//!
//! These run on the test thread against a runtime owned by the test, the way
//! a synchronous application would use the client.

use crate::common::*;

fn blocking_client(partitions: u32, operation_timeout_ms: u64) -> (tokio::runtime::Runtime, TestClient) {
    let runtime = multi_thread_runtime();
    let config = ClientConfig {
        operation_timeout_ms,
        ..test_config()
    };
    let t = TestClient::on_runtime(partitions, config, &runtime);
    (runtime, t)
}

#[test]
fn blocking_map_round_trip() {
    let (runtime, t) = blocking_client(3, 2000);
    let map = t
        .client
        .map_builder::<String>("users")
        .unwrap()
        .with_partitioner(letter_partitioner())
        .get()
        .unwrap();

    assert_eq!(map.put("b", "bob".to_string()).unwrap(), None);
    assert_eq!(map.put("a", "alice".to_string()).unwrap(), None);
    assert_eq!(map.size().unwrap(), 2);

    let keys: Vec<String> = map.keys().collect::<Result<_, _>>().unwrap();
    assert_eq!(keys, vec!["a", "b"]);

    let entries: Vec<(String, String)> = map
        .entries()
        .map(|entry| entry.map(|(k, v)| (k, v.value)))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(entries[1], ("b".to_string(), "bob".to_string()));

    runtime.block_on(t.client.stop()).unwrap();
}

#[test]
fn blocking_timeout_leaves_operation_running() {
    let (runtime, t) = blocking_client(1, 100);
    let counter = t.client.atomic_counter_builder("hits").unwrap().build().unwrap();
    assert_eq!(counter.increment_and_get().unwrap(), 1);

    t.partition(0).stall_commands(true);
    let err = counter.add_and_get(5).err().unwrap();
    assert_eq!(
        err,
        Error::Timeout {
            operation: "counter.add_and_get".to_string(),
            timeout_ms: 100,
        }
    );
    // The stalled command was sent; reads are unaffected
    assert_eq!(t.partition(0).stats().commands, 2);
    assert_eq!(counter.get().unwrap(), 1);

    drop(counter);
    drop(t);
    runtime.shutdown_background();
}

#[test]
fn blocking_errors_keep_their_kind() {
    let (runtime, t) = blocking_client(2, 2000);

    let err = t
        .client
        .set_builder("tags")
        .unwrap()
        .with_group("missing")
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, Error::PartitionGroupNotFound { .. }));

    let set = t.client.set_builder("tags").unwrap().with_read_only(true).get().unwrap();
    assert!(matches!(set.add("x"), Err(Error::Unsupported { .. })));

    let log = t.client.log_builder::<u64>("audit").unwrap().build().unwrap();
    assert_eq!(log.append(7).unwrap(), 0);
    log.close().unwrap();
    assert!(matches!(log.append(8), Err(Error::Closed { .. })));

    runtime.block_on(t.client.stop()).unwrap();
}

#[test]
fn blocking_value_compare_and_set() {
    let (runtime, t) = blocking_client(1, 2000);
    let value = t.client.atomic_value_builder::<u32>("epoch").unwrap().with_cache(true).get().unwrap();

    assert!(value.compare_and_set(None, Some(1)).unwrap());
    assert!(!value.compare_and_set(None, Some(2)).unwrap());
    let current = value.get().unwrap().unwrap();
    assert_eq!(current.value, 1);
    assert!(value.compare_and_set_version(current.version, Some(2)).unwrap());
    assert_eq!(value.get().unwrap().unwrap().value, 2);

    runtime.block_on(t.client.stop()).unwrap();
}

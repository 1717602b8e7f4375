//! Change event delivery tests

use crate::common::*;
use tessera::LogEntry;

fn collector<E: Clone + Send + 'static>() -> (Arc<Mutex<Vec<E>>>, Arc<dyn Fn(&E) + Send + Sync>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, Arc::new(move |event: &E| sink.lock().push(event.clone())))
}

#[tokio::test(flavor = "multi_thread")]
async fn map_listener_sees_every_partition() {
    let t = TestClient::new(3);
    let map = t
        .client
        .map_builder::<u32>("stock")
        .unwrap()
        .with_partitioner(letter_partitioner())
        .build_async()
        .await
        .unwrap();
    let (events, listener) = collector::<MapEvent<u32>>();
    let id = map.add_listener(listener).await.unwrap();
    assert_eq!(t.stats().subscribes, 3);

    map.put("a", &1).await.unwrap();
    map.put("b", &2).await.unwrap();
    map.put("a", &3).await.unwrap();
    map.remove("b").await.unwrap();
    eventually(|| events.lock().len() == 4).await;

    let events = events.lock().clone();
    let on_a: Vec<_> = events.iter().filter(|e| e.key == "a").collect();
    assert_eq!(on_a[0].event_type, MapEventType::Insert);
    assert_eq!(on_a[1].event_type, MapEventType::Update);
    assert_eq!(on_a[1].old_value.as_ref().unwrap().value, 1);
    assert_eq!(on_a[1].new_value.as_ref().unwrap().value, 3);

    let on_b: Vec<_> = events.iter().filter(|e| e.key == "b").collect();
    assert_eq!(on_b[1].event_type, MapEventType::Remove);
    assert_eq!(on_b[1].new_value, None);

    assert!(map.remove_listener(id));
    let partitions = t.cluster.partitions(GROUP);
    eventually(|| partitions.iter().all(|p| p.stream_count() == 0)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn listeners_on_other_clients_observe_writes() {
    let t = TestClient::new(2);
    let peer = t.peer();

    let watched = t.client.set_builder("online").unwrap().build_async().await.unwrap();
    let (events, listener) = collector::<SetEvent>();
    watched.add_listener(listener).await.unwrap();

    let writer = peer.set_builder("online").unwrap().build_async().await.unwrap();
    writer.add("ann").await.unwrap();
    writer.remove("ann").await.unwrap();
    eventually(|| events.lock().len() == 2).await;

    let events = events.lock().clone();
    assert_eq!(events[0].event_type, SetEventType::Add);
    assert_eq!(events[1].event_type, SetEventType::Remove);
    assert!(events.iter().all(|e| e.element == "ann"));
}

#[tokio::test(flavor = "multi_thread")]
async fn value_and_log_events_decode() {
    let t = TestClient::new(1);
    let value = t.client.atomic_value_builder::<String>("leader").unwrap().build_async().await.unwrap();
    let log = t.client.log_builder::<String>("audit").unwrap().build_async().await.unwrap();

    let (changes, listener) = collector::<ValueEvent<String>>();
    value.add_listener(listener).await.unwrap();
    let (entries, listener) = collector::<LogEntry<String>>();
    log.add_listener(listener).await.unwrap();

    value.set(&"node-1".to_string()).await.unwrap();
    value.set(&"node-2".to_string()).await.unwrap();
    log.append(&"started".to_string()).await.unwrap();
    log.append(&"elected".to_string()).await.unwrap();
    eventually(|| changes.lock().len() == 2 && entries.lock().len() == 2).await;

    let last = changes.lock()[1].clone();
    assert_eq!(last.old_value.unwrap().value, "node-1");
    assert_eq!(last.new_value.unwrap().value, "node-2");

    let entries = entries.lock().clone();
    assert_eq!(entries[0].index, 0);
    assert_eq!(entries[1].value, "elected");
}

#[tokio::test(flavor = "multi_thread")]
async fn subscription_survives_stream_termination() {
    let t = TestClient::new(1);
    let map = t.client.map_builder::<u32>("stock").unwrap().build_async().await.unwrap();
    let (events, listener) = collector::<MapEvent<u32>>();
    map.add_listener(listener).await.unwrap();

    t.partition(0).end_streams();
    eventually(|| t.stats().subscribes >= 2).await;
    eventually(|| t.partition(0).stream_count() == 1).await;

    map.put("x", &9).await.unwrap();
    eventually(|| events.lock().len() == 1).await;
    assert_eq!(events.lock()[0].key, "x");
}

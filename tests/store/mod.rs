use std::collections::HashMap;
use std::sync::Arc;

use futures::TryStreamExt;
use rand::seq::SliceRandom;
use rand::Rng;

use esrs::projection::{poll_batch, Batch};
use esrs::store::{EventStore, ExpectedVersion, InMemoryStore};
use esrs::types::{GlobalPosition, SequenceNumber, StreamId};
use esrs::{NewEvent, RecordedEvent};

fn batch(stream_id: &str, size: usize) -> Vec<NewEvent> {
    (0..size)
        .map(|_| NewEvent::new("Added", format!("{{\"stream\":\"{}\"}}", stream_id).into_bytes()))
        .collect()
}

#[tokio::test]
async fn interleaved_appends_are_read_in_global_order_test() {
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let mut rng = rand::thread_rng();

    let mut appends: Vec<(&str, usize)> = (0..20).map(|_| ("X", rng.gen_range(1..=3))).collect();
    appends.extend((0..20).map(|_| ("Y", rng.gen_range(1..=3))));
    appends.shuffle(&mut rng);

    let tasks: Vec<_> = appends
        .iter()
        .map(|(stream, size)| {
            let store = store.clone();
            let stream_id = StreamId::new(*stream);
            let events = batch(stream, *size);
            tokio::spawn(async move { store.append(&stream_id, ExpectedVersion::Any, events).await })
        })
        .collect();

    for task in tasks {
        let _ = task.await.unwrap().unwrap();
    }

    let total: usize = appends.iter().map(|(_, size)| size).sum();
    let all: Vec<RecordedEvent> = store.read_all(0, usize::MAX).try_collect().await.unwrap();

    assert_eq!(all.len(), total);
    assert_eq!(store.head_position().await.unwrap(), total as GlobalPosition);

    let positions: Vec<GlobalPosition> = all.iter().map(|event| event.global_position).collect();
    let expected: Vec<GlobalPosition> = (1..=total as GlobalPosition).collect();
    assert_eq!(positions, expected);

    // Within each stream the global order agrees with the sequence numbers.
    let mut versions: HashMap<&str, SequenceNumber> = HashMap::new();
    for event in &all {
        let version = versions.entry(event.stream_id.as_str()).or_default();
        *version += 1;
        assert_eq!(event.sequence_number, *version);
    }
}

#[tokio::test]
async fn poll_batch_pages_through_the_log_test() {
    let store = InMemoryStore::new();

    for (stream, size) in [("X", 3), ("Y", 2), ("X", 4)] {
        let _ = store
            .append(&StreamId::new(stream), ExpectedVersion::Any, batch(stream, size))
            .await
            .unwrap();
    }

    let mut checkpoint: GlobalPosition = 0;
    let mut pages: Vec<usize> = vec![];
    loop {
        let page: Batch = poll_batch(&store, checkpoint, 3).await.unwrap();
        if page.is_empty() {
            assert_eq!(page.next, checkpoint);
            break;
        }
        assert_eq!(page.events[0].global_position, checkpoint + 1);
        pages.push(page.events.len());
        checkpoint = page.next;
    }

    assert_eq!(pages, vec![3, 3, 3]);
    assert_eq!(checkpoint, 9);
}

#[tokio::test]
async fn expected_version_variants_test() {
    let store = InMemoryStore::new();
    let stream_id = StreamId::new("X");

    assert_eq!(
        store
            .append(&stream_id, ExpectedVersion::NoStream, batch("X", 2))
            .await
            .unwrap(),
        2
    );
    assert!(store
        .append(&stream_id, ExpectedVersion::NoStream, batch("X", 1))
        .await
        .is_err());
    assert!(store
        .append(&stream_id, ExpectedVersion::Exact(1), batch("X", 1))
        .await
        .is_err());
    assert_eq!(
        store
            .append(&stream_id, ExpectedVersion::Any, batch("X", 1))
            .await
            .unwrap(),
        3
    );
    assert_eq!(
        store
            .append(&stream_id, ExpectedVersion::Exact(3), batch("X", 1))
            .await
            .unwrap(),
        4
    );
}

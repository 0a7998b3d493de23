use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;

use esrs::snapshot::{InMemorySnapshotStore, Snapshot, SnapshotStore};
use esrs::store::{EventStore, ExpectedVersion, InMemoryStore};
use esrs::types::StreamId;
use esrs::{AggregateManager, AggregateState, ManagerError, NewEvent, RecordedEvent, SnapshotPolicy};

use crate::aggregate::{InventoryAggregate, InventoryCommand, InventoryError, InventoryEvent, InventoryState};

type Manager = AggregateManager<InventoryAggregate, InMemoryStore>;

async fn created(manager: &Manager, id: &str, quantity: u32) -> AggregateState<InventoryAggregate> {
    let state = manager.load(id).await.unwrap();
    manager
        .handle_command(&state, InventoryCommand::Create { quantity })
        .await
        .unwrap()
}

#[tokio::test]
async fn created_then_removed_reconstructs_quantity_test() {
    let manager: Manager = AggregateManager::new(InMemoryStore::new());

    let state = created(&manager, "X", 10).await;
    assert_eq!(state.version(), 1);

    let state = manager
        .handle_command(&state, InventoryCommand::Remove { quantity: 3 })
        .await
        .unwrap();
    assert_eq!(state.version(), 2);
    assert!(state.uncommitted().is_empty());

    let loaded = manager.load("X").await.unwrap();
    assert_eq!(loaded.version(), 2);
    assert_eq!(loaded.inner().quantity, 7);
    assert_eq!(loaded.stream_id().as_str(), "inventory-X");

    let events: Vec<RecordedEvent> = manager
        .event_store()
        .read(loaded.stream_id(), 0, None)
        .try_collect()
        .await
        .unwrap();
    let types: Vec<&str> = events.iter().map(|event| event.event_type.as_str()).collect();
    assert_eq!(types, vec!["Created", "Removed"]);
}

#[tokio::test]
async fn saving_a_stale_state_is_a_conflict_test() {
    let manager: Manager = AggregateManager::new(InMemoryStore::new());
    let state = created(&manager, "X", 10).await;
    let _ = manager
        .handle_command(&state, InventoryCommand::Add { quantity: 1 })
        .await
        .unwrap();

    let first = manager.load("X").await.unwrap();
    let second = manager.load("X").await.unwrap();
    assert_eq!(first.version(), 2);
    assert_eq!(second.version(), 2);

    let first = first.handle(InventoryCommand::Add { quantity: 5 }).unwrap();
    let second = second.handle(InventoryCommand::Remove { quantity: 2 }).unwrap();

    let saved = manager.save(&first).await.unwrap();
    assert_eq!(saved.version(), 3);

    let error = manager.save(&second).await.unwrap_err();
    assert!(error.is_concurrency_conflict());
    assert!(matches!(
        error,
        ManagerError::Concurrency {
            expected: ExpectedVersion::Exact(2),
            actual: 3,
            ..
        }
    ));

    // The rejected state still holds its events, the store doesn't.
    assert_eq!(second.uncommitted(), &[InventoryEvent::Removed { quantity: 2 }]);
    assert_eq!(manager.load("X").await.unwrap().inner().quantity, 16);

    let retried = manager.load("X").await.unwrap();
    let retried = manager
        .handle_command(&retried, InventoryCommand::Remove { quantity: 2 })
        .await
        .unwrap();
    assert_eq!(retried.version(), 4);
    assert_eq!(retried.inner().quantity, 14);
}

#[tokio::test]
async fn concurrent_saves_have_exactly_one_winner_test() {
    let manager: Arc<Manager> = Arc::new(AggregateManager::new(InMemoryStore::new()));
    let state = created(&manager, "X", 10).await;

    let tasks: Vec<_> = (1..=16)
        .map(|quantity| {
            let manager = manager.clone();
            let state = state.clone();
            tokio::spawn(async move {
                manager
                    .handle_command(&state, InventoryCommand::Add { quantity })
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(saved) => {
                assert_eq!(saved.version(), 2);
                winners += 1;
            }
            Err(error) => {
                assert!(error.is_concurrency_conflict());
                conflicts += 1;
            }
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(manager.event_store().stream_version(state.stream_id()).await.unwrap(), 2);
}

#[tokio::test]
async fn saving_without_events_is_a_no_op_test() {
    let store = InMemoryStore::new();
    let manager: AggregateManager<InventoryAggregate, &InMemoryStore> = AggregateManager::new(&store);

    let fresh = manager.load("nothing").await.unwrap();
    assert!(fresh.is_new());
    let saved = manager.save(&fresh).await.unwrap();
    assert_eq!(saved.version(), 0);
    assert_eq!(store.head_position().await.unwrap(), 0);

    let state = manager.load("X").await.unwrap();
    let state = manager
        .handle_command(&state, InventoryCommand::Create { quantity: 4 })
        .await
        .unwrap();

    let loaded = manager.load("X").await.unwrap();
    let saved = manager.save(&loaded).await.unwrap();
    assert_eq!(saved.version(), state.version());
    assert_eq!(saved.inner(), state.inner());
    assert_eq!(store.head_position().await.unwrap(), 1);

    // A stale state with nothing to save doesn't conflict either.
    let _ = manager
        .handle_command(&loaded, InventoryCommand::Add { quantity: 1 })
        .await
        .unwrap();
    assert!(manager.save(&loaded).await.is_ok());
}

#[tokio::test]
async fn rejected_command_is_not_persisted_test() {
    let manager: Manager = AggregateManager::new(InMemoryStore::new());
    let state = created(&manager, "X", 2).await;

    let error = manager
        .handle_command(&state, InventoryCommand::Remove { quantity: 3 })
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        ManagerError::Command(InventoryError::OutOfStock {
            available: 2,
            requested: 3
        })
    ));
    assert_eq!(manager.load("X").await.unwrap().version(), 1);
}

#[tokio::test]
async fn unknown_event_type_corrupts_the_stream_test() {
    let store = InMemoryStore::new();
    let manager: AggregateManager<InventoryAggregate, &InMemoryStore> = AggregateManager::new(&store);
    let stream_id: StreamId = StreamId::for_aggregate::<InventoryAggregate>("X");

    let state = manager.load("X").await.unwrap();
    let _ = manager
        .handle_command(&state, InventoryCommand::Create { quantity: 1 })
        .await
        .unwrap();

    let _ = store
        .append(
            &stream_id,
            ExpectedVersion::Exact(1),
            vec![NewEvent::new("Exploded", b"{\"type\":\"Exploded\"}".to_vec())],
        )
        .await
        .unwrap();

    match manager.load("X").await {
        Err(ManagerError::StreamCorruption {
            stream_id: corrupt,
            sequence_number,
            ..
        }) => {
            assert_eq!(corrupt, stream_id);
            assert_eq!(sequence_number, 2);
        }
        other => panic!("expected a stream corruption, got {:?}", other.map(|state| state.version())),
    }
}

#[tokio::test]
async fn event_type_must_match_the_payload_test() {
    let store = InMemoryStore::new();
    let manager: AggregateManager<InventoryAggregate, &InMemoryStore> = AggregateManager::new(&store);
    let stream_id: StreamId = StreamId::for_aggregate::<InventoryAggregate>("X");

    let _ = store
        .append(
            &stream_id,
            ExpectedVersion::NoStream,
            vec![NewEvent::new("Created", b"{\"type\":\"Added\",\"quantity\":1}".to_vec())],
        )
        .await
        .unwrap();

    assert!(matches!(
        manager.load("X").await,
        Err(ManagerError::StreamCorruption { sequence_number: 1, .. })
    ));
}

async fn wait_for_snapshot(snapshots: &InMemorySnapshotStore, stream_id: &StreamId, version: i64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let latest = snapshots.get_latest(stream_id).await.unwrap();
            if latest.map_or(false, |snapshot| snapshot.version == version) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn snapshot_replay_equals_full_replay_test() {
    let store = InMemoryStore::new();
    let snapshots = InMemorySnapshotStore::new();
    let with_snapshots: AggregateManager<InventoryAggregate, InMemoryStore> =
        AggregateManager::new(store.clone()).with_snapshots(snapshots.clone(), SnapshotPolicy::every(3));
    let without_snapshots: Manager = AggregateManager::new(store.clone());

    let mut state = with_snapshots.load("X").await.unwrap();
    state = with_snapshots
        .handle_command(&state, InventoryCommand::Create { quantity: 1 })
        .await
        .unwrap();
    for quantity in 1..=6 {
        state = with_snapshots
            .handle_command(&state, InventoryCommand::Add { quantity })
            .await
            .unwrap();
    }
    assert_eq!(state.version(), 7);

    wait_for_snapshot(&snapshots, state.stream_id(), 6).await;

    // Two more events after the snapshot, committed in a single batch crossing the next boundary.
    state = with_snapshots
        .handle_command(&state, InventoryCommand::Restock { times: 2, quantity: 10 })
        .await
        .unwrap();
    wait_for_snapshot(&snapshots, state.stream_id(), 9).await;
    state = with_snapshots
        .handle_command(&state, InventoryCommand::Remove { quantity: 4 })
        .await
        .unwrap();

    let from_snapshot = with_snapshots.load("X").await.unwrap();
    let from_scratch = without_snapshots.load("X").await.unwrap();

    assert_eq!(from_snapshot.version(), 10);
    assert_eq!(from_snapshot.version(), from_scratch.version());
    assert_eq!(
        serde_json::to_vec(from_snapshot.inner()).unwrap(),
        serde_json::to_vec(from_scratch.inner()).unwrap()
    );
    assert_eq!(from_scratch.inner(), &InventoryState { created: true, quantity: 38 });
}

#[tokio::test]
async fn undecodable_snapshot_falls_back_to_full_replay_test() {
    let store = InMemoryStore::new();
    let snapshots = InMemorySnapshotStore::new();
    let manager: AggregateManager<InventoryAggregate, InMemoryStore> =
        AggregateManager::new(store.clone()).with_snapshots(snapshots.clone(), SnapshotPolicy::never());

    let state = manager.load("X").await.unwrap();
    let state = manager
        .handle_command(&state, InventoryCommand::Create { quantity: 5 })
        .await
        .unwrap();

    snapshots
        .save(Snapshot::new(state.stream_id().clone(), 1, b"not json".to_vec()))
        .await
        .unwrap();

    let loaded = manager.load("X").await.unwrap();
    assert_eq!(loaded.version(), 1);
    assert_eq!(loaded.inner().quantity, 5);
}

#[tokio::test]
async fn snapshot_ahead_of_the_stream_is_ignored_test() {
    let store = InMemoryStore::new();
    let snapshots = InMemorySnapshotStore::new();
    let manager: AggregateManager<InventoryAggregate, InMemoryStore> =
        AggregateManager::new(store.clone()).with_snapshots(snapshots.clone(), SnapshotPolicy::never());

    let state = created(&manager, "X", 5).await;
    assert_eq!(state.version(), 1);

    // Left over from a store that had more events for this stream.
    let stale = InventoryState {
        created: true,
        quantity: 99,
    };
    snapshots
        .save(Snapshot::new(state.stream_id().clone(), 5, serde_json::to_vec(&stale).unwrap()))
        .await
        .unwrap();

    let loaded = manager.load("X").await.unwrap();
    assert_eq!(loaded.version(), 1);
    assert_eq!(loaded.inner().quantity, 5);

    let saved = manager
        .handle_command(&loaded, InventoryCommand::Add { quantity: 1 })
        .await
        .unwrap();
    assert_eq!(saved.version(), 2);
    assert_eq!(manager.load("X").await.unwrap().inner().quantity, 6);
}

#[tokio::test]
async fn wiped_snapshot_store_loses_nothing_test() {
    let store = InMemoryStore::new();
    let snapshots = InMemorySnapshotStore::new();
    let manager: AggregateManager<InventoryAggregate, InMemoryStore> =
        AggregateManager::new(store.clone()).with_snapshots(snapshots.clone(), SnapshotPolicy::every(2));

    let mut state = created(&manager, "X", 1).await;
    for quantity in 1..=3 {
        state = manager
            .handle_command(&state, InventoryCommand::Add { quantity })
            .await
            .unwrap();
    }
    wait_for_snapshot(&snapshots, state.stream_id(), 4).await;

    snapshots.clear().await;
    assert!(snapshots.is_empty().await);

    let loaded = manager.load("X").await.unwrap();
    let from_scratch = AggregateManager::<InventoryAggregate, InMemoryStore>::new(store.clone())
        .load("X")
        .await
        .unwrap();

    assert_eq!(loaded.version(), 4);
    assert_eq!(loaded.version(), from_scratch.version());
    assert_eq!(loaded.inner(), from_scratch.inner());
    assert_eq!(loaded.inner().quantity, 7);
}

#[test]
fn saving_outside_a_tokio_runtime_skips_the_snapshot_test() {
    let snapshots = InMemorySnapshotStore::new();
    let manager: AggregateManager<InventoryAggregate, InMemoryStore> =
        AggregateManager::new(InMemoryStore::new()).with_snapshots(snapshots.clone(), SnapshotPolicy::every(1));

    let saved = futures::executor::block_on(async {
        let state = manager.load("X").await.unwrap();
        manager
            .handle_command(&state, InventoryCommand::Create { quantity: 3 })
            .await
            .unwrap()
    });

    assert_eq!(saved.version(), 1);
    assert!(futures::executor::block_on(snapshots.is_empty()));
}

//! Stock keeping on top of the in-memory stores: commands go through the aggregate manager, a
//! projector keeps the stock level of every item.
//!
//! Run with `RUST_LOG=debug cargo run --example inventory` to see the store and projector spans.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use esrs::projection::{HandlerTable, InMemoryCheckpointStore, ProjectionEngine};
use esrs::read_model::InMemoryReadModel;
use esrs::snapshot::InMemorySnapshotStore;
use esrs::store::{EventStore, InMemoryStore};
use esrs::{Aggregate, AggregateManager, Event, ManagerError, RecordedEvent, SnapshotPolicy};

struct Item;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ItemState {
    stock: u32,
}

enum ItemCommand {
    Receive(u32),
    Ship(u32),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum ItemEvent {
    Received { quantity: u32 },
    Shipped { quantity: u32 },
}

impl Event for ItemEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Received { .. } => "Received",
            Self::Shipped { .. } => "Shipped",
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("cannot ship {requested} items, only {available} in stock")]
struct OutOfStock {
    available: u32,
    requested: u32,
}

impl Aggregate for Item {
    const NAME: &'static str = "item";
    type State = ItemState;
    type Command = ItemCommand;
    type Event = ItemEvent;
    type Error = OutOfStock;

    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ItemCommand::Receive(quantity) => Ok(vec![ItemEvent::Received { quantity }]),
            ItemCommand::Ship(quantity) if quantity > state.stock => Err(OutOfStock {
                available: state.stock,
                requested: quantity,
            }),
            ItemCommand::Ship(quantity) => Ok(vec![ItemEvent::Shipped { quantity }]),
        }
    }

    fn apply_event(state: Self::State, event: Self::Event) -> Self::State {
        match event {
            ItemEvent::Received { quantity } => ItemState {
                stock: state.stock + quantity,
            },
            ItemEvent::Shipped { quantity } => ItemState {
                stock: state.stock - quantity,
            },
        }
    }
}

/// Loads, handles and saves, reloading on concurrency conflicts.
async fn execute(
    manager: &AggregateManager<Item, InMemoryStore>,
    id: Uuid,
    command: impl Fn() -> ItemCommand,
) -> Result<(), ManagerError<OutOfStock>> {
    loop {
        let state = manager.load(id).await?;
        match manager.handle_command(&state, command()).await {
            Err(error) if error.is_concurrency_conflict() => {
                tracing::warn!(%id, "concurrency conflict, retrying");
            }
            outcome => return outcome.map(|_| ()),
        }
    }
}

fn stock_table(stock: InMemoryReadModel<String, u32>) -> HandlerTable {
    let received = stock.clone();
    let shipped = stock.clone();

    HandlerTable::new()
        .on_fn("Received", move |event: RecordedEvent| {
            let stock = received.clone();
            async move {
                if let ItemEvent::Received { quantity } = event.decode()? {
                    let key = event.stream_id.to_string();
                    let current = stock.get(&key).await.unwrap_or_default();
                    let _ = stock.upsert(key, current + quantity).await;
                }
                Ok(())
            }
        })
        .on_fn("Shipped", move |event: RecordedEvent| {
            let stock = shipped.clone();
            async move {
                if let ItemEvent::Shipped { quantity } = event.decode()? {
                    let _ = stock
                        .update(&event.stream_id.to_string(), |current| *current -= quantity)
                        .await;
                }
                Ok(())
            }
        })
        .on_reset(move || {
            let stock = stock.clone();
            async move {
                stock.clear().await;
                Ok(())
            }
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,esrs=debug")))
        .init();

    let store = InMemoryStore::new();
    let manager: AggregateManager<Item, InMemoryStore> =
        AggregateManager::new(store.clone()).with_snapshots(InMemorySnapshotStore::new(), SnapshotPolicy::every(5));

    let stock: InMemoryReadModel<String, u32> = InMemoryReadModel::new();
    let mut engine = ProjectionEngine::new(store.clone(), InMemoryCheckpointStore::new());
    engine.register("stock", stock_table(stock.clone()))?;
    engine.start();

    let hammer = Uuid::new_v4();
    let nails = Uuid::new_v4();

    execute(&manager, hammer, || ItemCommand::Receive(10)).await?;
    execute(&manager, nails, || ItemCommand::Receive(500)).await?;

    for _ in 0..4 {
        execute(&manager, hammer, || ItemCommand::Ship(2)).await?;
        execute(&manager, nails, || ItemCommand::Ship(120)).await?;
    }

    if let Err(error) = execute(&manager, hammer, || ItemCommand::Ship(5)).await {
        tracing::info!(%error, "command rejected");
    }

    let head = store.head_position().await?;
    while engine.checkpoint("stock").await? < head {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for (item, quantity) in stock.snapshot().await {
        tracing::info!(item = %item, quantity, "stock level");
    }

    for (projector_id, outcome) in engine.stop().await {
        tracing::info!(projector_id = %projector_id, ok = outcome.is_ok(), "projector stopped");
    }

    Ok(())
}

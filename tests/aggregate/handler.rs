use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use esrs::projection::{EventHandler, HandlerError, HandlerTable};
use esrs::read_model::InMemoryReadModel;
use esrs::types::GlobalPosition;
use esrs::RecordedEvent;

use crate::aggregate::InventoryEvent;

/// Keeps the quantity of every inventory stream, recording each global position it handled.
#[derive(Clone, Default)]
pub struct QuantityProjection {
    pub quantities: InMemoryReadModel<String, u32>,
    pub handled: Arc<Mutex<Vec<GlobalPosition>>>,
    fail_at: Arc<Mutex<Option<GlobalPosition>>>,
}

impl QuantityProjection {
    /// Makes the handler fail once, on the event at `global_position`.
    pub fn fail_once_at(&self, global_position: GlobalPosition) {
        *self.fail_at.lock().unwrap() = Some(global_position);
    }

    pub fn handled(&self) -> Vec<GlobalPosition> {
        self.handled.lock().unwrap().clone()
    }

    pub fn table(&self) -> HandlerTable {
        let projection = self.clone();

        HandlerTable::new()
            .on("Created", self.clone())
            .on("Added", self.clone())
            .on("Removed", self.clone())
            .on_reset(move || {
                let projection = projection.clone();
                async move {
                    projection.quantities.clear().await;
                    projection.handled.lock().unwrap().clear();
                    Ok(())
                }
            })
    }
}

#[async_trait]
impl EventHandler for QuantityProjection {
    async fn handle(&self, event: &RecordedEvent) -> Result<(), HandlerError> {
        {
            let mut fail_at = self.fail_at.lock().unwrap();
            if *fail_at == Some(event.global_position) {
                *fail_at = None;
                return Err("simulated crash".into());
            }
        }

        let key: String = event.stream_id.to_string();

        match event.decode::<InventoryEvent>()? {
            InventoryEvent::Created { quantity } => {
                let _ = self.quantities.upsert(key, quantity).await;
            }
            InventoryEvent::Added { quantity } => {
                let _ = self.quantities.update(&key, |current| *current += quantity).await;
            }
            InventoryEvent::Removed { quantity } => {
                let _ = self
                    .quantities
                    .update(&key, |current| *current = current.saturating_sub(quantity))
                    .await;
            }
        }

        self.handled.lock().unwrap().push(event.global_position);
        Ok(())
    }
}

use esrs::Aggregate;

pub use handler::*;
pub use structs::*;

mod handler;

pub struct InventoryAggregate;

impl Aggregate for InventoryAggregate {
    const NAME: &'static str = "inventory";
    type State = InventoryState;
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = InventoryError;

    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::Create { .. } if state.created => Err(InventoryError::AlreadyCreated),
            InventoryCommand::Create { quantity } => Ok(vec![InventoryEvent::Created { quantity }]),
            _ if !state.created => Err(InventoryError::NotCreated),
            InventoryCommand::Add { quantity } => Ok(vec![InventoryEvent::Added { quantity }]),
            InventoryCommand::Remove { quantity } if quantity > state.quantity => Err(InventoryError::OutOfStock {
                available: state.quantity,
                requested: quantity,
            }),
            InventoryCommand::Remove { quantity } => Ok(vec![InventoryEvent::Removed { quantity }]),
            InventoryCommand::Restock { times, quantity } => {
                Ok((0..times).map(|_| InventoryEvent::Added { quantity }).collect())
            }
        }
    }

    fn apply_event(state: Self::State, event: Self::Event) -> Self::State {
        match event {
            InventoryEvent::Created { quantity } => InventoryState {
                created: true,
                quantity,
            },
            InventoryEvent::Added { quantity } => InventoryState {
                quantity: state.quantity + quantity,
                ..state
            },
            InventoryEvent::Removed { quantity } => InventoryState {
                quantity: state.quantity.saturating_sub(quantity),
                ..state
            },
        }
    }
}

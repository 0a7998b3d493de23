use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::event::Event;

/// The Aggregate trait is responsible for validating commands, mapping commands to events, and applying
/// events onto the state.
///
/// An Aggregate should be able to derive its own state from nothing but its initial configuration, and its
/// event stream. Applying the same events, in the same order, to the same aggregate, should always yield an
/// identical aggregate state.
///
/// This trait is purposefully _synchronous_. If you are implementing this trait, your aggregate
/// should not have any side effects. If you need side effects, register a projector instead.
pub trait Aggregate {
    /// The `NAME` const is used as the prefix of every stream id of this aggregate type, so it must
    /// be unique among aggregate types sharing a store.
    const NAME: &'static str;

    /// Internal aggregate state. It is serialized when a snapshot is taken.
    type State: Default + Clone + Serialize + DeserializeOwned + Send + Sync;

    /// A command is an action that the caller can execute over an aggregate in order to let it emit
    /// events.
    type Command: Send;

    /// An event represents a fact that took place in the domain. They are the source of truth;
    /// your current state is derived from the events.
    type Event: Event + Clone + Send + Sync;

    /// This associated type is used to get domain errors while handling a command.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Handles, validate a command and emits events.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the user of this library set up command validations. Every error here
    /// could be just a "domain error". No technical errors.
    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Updates the aggregate state using the new event. This assumes that the event can be correctly applied
    /// to the state.
    ///
    /// If this is not the case, this function is allowed to panic.
    fn apply_event(state: Self::State, payload: Self::Event) -> Self::State;
}

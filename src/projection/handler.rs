use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::event::RecordedEvent;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// This trait is used to implement an `EventHandler`. An event handler mutates the read model owned
/// by its projector for one event type.
///
/// Delivery is at-least-once: after a crash the event following the last checkpoint is handled
/// again, so the mutation must be idempotent for the same event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &RecordedEvent) -> Result<(), HandlerError>;

    /// The name of the event handler. By default, this is the type name of the event handler,
    /// but it can be overridden to provide a custom name. This name is used as
    /// part of tracing spans, to identify the event handler being run.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// [`EventHandler`] built from an async closure, see [`HandlerTable::on_fn`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(RecordedEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: &RecordedEvent) -> Result<(), HandlerError> {
        (self.0)(event.clone()).await
    }
}

type ResetHook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// The handlers of one projector, keyed by the event type they handle. Events of any other type are
/// skipped by the projector.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    reset: Option<ResetHook>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of type `event_type`, replacing any previous one.
    #[must_use]
    pub fn on(mut self, event_type: impl Into<String>, handler: impl EventHandler + 'static) -> Self {
        let _ = self.handlers.insert(event_type.into(), Arc::new(handler));
        self
    }

    /// Registers an async closure for events of type `event_type`.
    #[must_use]
    pub fn on_fn<F, Fut>(self, event_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RecordedEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on(event_type, FnHandler(handler))
    }

    /// Sets the hook clearing the read model before a rebuild.
    #[must_use]
    pub fn on_reset<F, Fut>(mut self, reset: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let hook: ResetHook = Arc::new(move || -> BoxFuture<'static, Result<(), HandlerError>> { Box::pin(reset()) });
        self.reset = Some(hook);
        self
    }

    pub fn handler(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub(crate) async fn reset(&self) -> Result<(), HandlerError> {
        match &self.reset {
            Some(reset) => reset().await,
            None => Ok(()),
        }
    }
}

//! Derives read models from the event log.
//!
//! Every registered projector runs in its own task. It first catches up from its checkpoint by
//! reading the global log in batches, then stays live, waiting for the store's notifications (or
//! polling) for new events. Each event is dispatched to the handler registered for its type, and only
//! once that handler succeeded the projector checkpoint is moved to the event's global position.
//!
//! A failing handler stops its own projector only, leaving its checkpoint on the last event handled
//! successfully: starting the engine again retries the failed event first.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, TryStreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;
use typed_builder::TypedBuilder;

use crate::event::RecordedEvent;
use crate::store::{EventStore, StoreError};
use crate::types::GlobalPosition;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use handler::{EventHandler, FnHandler, HandlerError, HandlerTable};
#[cfg(feature = "postgres")]
pub use postgres::PgCheckpointStore;

mod checkpoint;
mod handler;
#[cfg(feature = "postgres")]
mod postgres;

/// Tuning of the projection engine. Every field has a default.
#[derive(Clone, Debug, TypedBuilder)]
pub struct ProjectionConfig {
    /// Maximum number of events read from the log at once. `0` reads one event at a time.
    #[builder(default = 256)]
    pub batch_size: usize,
    /// How long a live projector waits for new events before polling the store again.
    #[builder(default = Duration::from_millis(100))]
    pub poll_interval: Duration,
    /// Delay before the first retry of a failed read. Doubled on every retry.
    #[builder(default = Duration::from_millis(50))]
    pub retry_backoff: Duration,
    #[builder(default = Duration::from_secs(5))]
    pub max_retry_backoff: Duration,
    /// Retries of a retryable read failure before the projector fails.
    #[builder(default = 5)]
    pub max_read_retries: u32,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProjectorStatus {
    Stopped,
    CatchingUp,
    Live,
    Failed(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ProjectionError {
    /// A handler failed. The checkpoint was left on the previous event.
    #[error("projector {projector_id} failed to handle the event at global position {global_position}: {source}")]
    Handler {
        projector_id: String,
        global_position: GlobalPosition,
        #[source]
        source: HandlerError,
    },
    #[error("checkpoint store failed for projector {projector_id}: {source}")]
    Checkpoint {
        projector_id: String,
        #[source]
        source: StoreError,
    },
    #[error("projector {projector_id} failed to read the event log: {source}")]
    Store {
        projector_id: String,
        #[source]
        source: StoreError,
    },
    #[error("projector {projector_id} failed to reset its read model: {source}")]
    Reset {
        projector_id: String,
        #[source]
        source: HandlerError,
    },
    #[error("no projector registered as {0}")]
    UnknownProjector(String),
    #[error("a projector is already registered as {0}")]
    DuplicateProjector(String),
    #[error("projector {0} is running")]
    ProjectorRunning(String),
    #[error("projector {0} panicked")]
    TaskPanicked(String),
}

/// Events read from the log after a checkpoint, with the checkpoint to read from next.
#[derive(Clone, Debug)]
pub struct Batch {
    pub events: Vec<RecordedEvent>,
    pub next: GlobalPosition,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Reads at most `limit` events following `from`. The returned [`Batch::next`] is the position of the
/// last event read, or `from` when there was nothing to read.
///
/// # Errors
///
/// Will return an `Err` if reading the log fails.
pub async fn poll_batch<E>(event_store: &E, from: GlobalPosition, limit: usize) -> Result<Batch, StoreError>
where
    E: EventStore + ?Sized,
{
    let events: Vec<RecordedEvent> = event_store.read_all(from, limit).try_collect().await?;
    let next: GlobalPosition = events.last().map_or(from, |event| event.global_position);
    Ok(Batch { events, next })
}

struct Projector {
    table: HandlerTable,
    status: Arc<watch::Sender<ProjectorStatus>>,
}

/// Runs the registered projectors against an [`EventStore`], tracking their progress in a
/// [`CheckpointStore`].
pub struct ProjectionEngine<E, C>
where
    E: EventStore + Clone + 'static,
    C: CheckpointStore + Clone + 'static,
{
    event_store: E,
    checkpoint_store: C,
    config: ProjectionConfig,
    projectors: BTreeMap<String, Projector>,
    tasks: HashMap<String, JoinHandle<Result<(), ProjectionError>>>,
    stop: watch::Sender<bool>,
}

impl<E, C> ProjectionEngine<E, C>
where
    E: EventStore + Clone + 'static,
    C: CheckpointStore + Clone + 'static,
{
    pub fn new(event_store: E, checkpoint_store: C) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            event_store,
            checkpoint_store,
            config: ProjectionConfig::default(),
            projectors: BTreeMap::new(),
            tasks: HashMap::new(),
            stop,
        }
    }

    pub fn with_config(self, config: ProjectionConfig) -> Self {
        Self { config, ..self }
    }

    /// Registers a projector. It starts processing events on the next [`ProjectionEngine::start`].
    ///
    /// # Errors
    ///
    /// Will return [`ProjectionError::DuplicateProjector`] if `projector_id` is already taken.
    pub fn register(&mut self, projector_id: impl Into<String>, table: HandlerTable) -> Result<(), ProjectionError> {
        let projector_id: String = projector_id.into();

        if self.projectors.contains_key(&projector_id) {
            return Err(ProjectionError::DuplicateProjector(projector_id));
        }

        let (status, _) = watch::channel(ProjectorStatus::Stopped);
        let _ = self.projectors.insert(
            projector_id,
            Projector {
                table,
                status: Arc::new(status),
            },
        );

        Ok(())
    }

    /// Spawns a task for every registered projector that is not running, including failed ones.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        self.stop.send_replace(false);

        for (projector_id, projector) in &self.projectors {
            if self.tasks.get(projector_id).map_or(false, |task| !task.is_finished()) {
                continue;
            }

            let worker: Worker<E, C> = Worker {
                projector_id: projector_id.clone(),
                table: projector.table.clone(),
                event_store: self.event_store.clone(),
                checkpoint_store: self.checkpoint_store.clone(),
                config: self.config.clone(),
                status: projector.status.clone(),
                stop: self.stop.subscribe(),
            };

            let span = tracing::info_span!("esrs.projector", projector_id = %projector_id);
            let task = tokio::spawn(worker.run().instrument(span));

            // A finished task being replaced already reported its outcome through its status.
            let _ = self.tasks.insert(projector_id.clone(), task);
        }
    }

    /// Asks every projector to stop once the event in flight is checkpointed, and waits for them.
    /// Returns the outcome of each projector task, by projector id.
    pub async fn stop(&mut self) -> Vec<(String, Result<(), ProjectionError>)> {
        self.stop.send_replace(true);

        let mut outcomes: Vec<(String, Result<(), ProjectionError>)> = vec![];
        for (projector_id, task) in self.tasks.drain() {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::error!(%projector_id, ?error, "projector task aborted");
                    if let Some(projector) = self.projectors.get(&projector_id) {
                        projector
                            .status
                            .send_replace(ProjectorStatus::Failed(error.to_string()));
                    }
                    Err(ProjectionError::TaskPanicked(projector_id.clone()))
                }
            };
            outcomes.push((projector_id, outcome));
        }

        outcomes.sort_by(|(a, _), (b, _)| a.cmp(b));
        outcomes
    }

    /// Resets the checkpoint of a stopped projector to the beginning of time, after running the reset
    /// hook of its [`HandlerTable`]. The read model is rebuilt from scratch on the next start.
    ///
    /// # Errors
    ///
    /// Will return [`ProjectionError::ProjectorRunning`] if the projector is running.
    pub async fn rebuild(&self, projector_id: &str) -> Result<(), ProjectionError> {
        let projector = self
            .projectors
            .get(projector_id)
            .ok_or_else(|| ProjectionError::UnknownProjector(projector_id.to_string()))?;

        if self.is_running(projector_id) {
            return Err(ProjectionError::ProjectorRunning(projector_id.to_string()));
        }

        projector.table.reset().await.map_err(|source| ProjectionError::Reset {
            projector_id: projector_id.to_string(),
            source,
        })?;

        self.checkpoint_store
            .reset(projector_id)
            .await
            .map_err(|source| ProjectionError::Checkpoint {
                projector_id: projector_id.to_string(),
                source,
            })?;

        projector.status.send_replace(ProjectorStatus::Stopped);
        tracing::info!(projector_id, "projector checkpoint reset");

        Ok(())
    }

    /// Returns `true` if the projector task is alive.
    pub fn is_running(&self, projector_id: &str) -> bool {
        self.tasks
            .get(projector_id)
            .map_or(false, |task| !task.is_finished())
    }

    pub fn status(&self, projector_id: &str) -> Option<ProjectorStatus> {
        self.projectors
            .get(projector_id)
            .map(|projector| projector.status.borrow().clone())
    }

    /// Returns a receiver observing every status change of the projector.
    pub fn watch_status(&self, projector_id: &str) -> Option<watch::Receiver<ProjectorStatus>> {
        self.projectors
            .get(projector_id)
            .map(|projector| projector.status.subscribe())
    }

    /// Returns the persisted checkpoint of the projector.
    ///
    /// # Errors
    ///
    /// Will return an `Err` if the checkpoint store fails.
    pub async fn checkpoint(&self, projector_id: &str) -> Result<GlobalPosition, ProjectionError> {
        self.checkpoint_store
            .load(projector_id)
            .await
            .map_err(|source| ProjectionError::Checkpoint {
                projector_id: projector_id.to_string(),
                source,
            })
    }

    pub fn projector_ids(&self) -> impl Iterator<Item = &str> {
        self.projectors.keys().map(String::as_str)
    }

    pub fn event_store(&self) -> &E {
        &self.event_store
    }
}

struct Worker<E, C> {
    projector_id: String,
    table: HandlerTable,
    event_store: E,
    checkpoint_store: C,
    config: ProjectionConfig,
    status: Arc<watch::Sender<ProjectorStatus>>,
    stop: watch::Receiver<bool>,
}

impl<E, C> Worker<E, C>
where
    E: EventStore,
    C: CheckpointStore,
{
    async fn run(mut self) -> Result<(), ProjectionError> {
        // A panicking handler fails its projector like an erroring one.
        let caught = AssertUnwindSafe(self.process()).catch_unwind().await;
        let outcome: Result<(), ProjectionError> =
            caught.unwrap_or_else(|_| Err(ProjectionError::TaskPanicked(self.projector_id.clone())));

        match &outcome {
            Ok(()) => {
                self.status.send_replace(ProjectorStatus::Stopped);
                tracing::info!("projector stopped");
            }
            Err(error) => {
                self.status.send_replace(ProjectorStatus::Failed(error.to_string()));
                tracing::error!(error = %error, "projector failed");
            }
        }

        outcome
    }

    async fn process(&mut self) -> Result<(), ProjectionError> {
        let mut position: GlobalPosition = self
            .checkpoint_store
            .load(&self.projector_id)
            .await
            .map_err(|source| ProjectionError::Checkpoint {
                projector_id: self.projector_id.clone(),
                source,
            })?;

        self.status.send_replace(ProjectorStatus::CatchingUp);
        tracing::info!(position, "projector catching up");

        let mut head: Option<watch::Receiver<GlobalPosition>> = self.event_store.subscribe();

        loop {
            if stop_requested(&self.stop) {
                return Ok(());
            }

            let batch: Batch = self.next_batch(position).await?;

            if batch.is_empty() {
                let catching_up: bool = matches!(*self.status.borrow(), ProjectorStatus::CatchingUp);
                if catching_up {
                    self.status.send_replace(ProjectorStatus::Live);
                    tracing::info!(position, "projector live");
                }

                self.wait_for_events(&mut head, position).await;
                continue;
            }

            for event in &batch.events {
                // Stopping is only honoured between two events.
                if stop_requested(&self.stop) {
                    return Ok(());
                }

                self.dispatch(event).await?;

                self.checkpoint_store
                    .save(&self.projector_id, event.global_position)
                    .await
                    .map_err(|source| ProjectionError::Checkpoint {
                        projector_id: self.projector_id.clone(),
                        source,
                    })?;

                position = event.global_position;
            }
        }
    }

    async fn dispatch(&self, event: &RecordedEvent) -> Result<(), ProjectionError> {
        let Some(handler) = self.table.handler(&event.event_type) else {
            tracing::trace!(global_position = event.global_position, event_type = %event.event_type, "no handler, skipping");
            return Ok(());
        };

        let span = tracing::debug_span!(
            "esrs.event_handler",
            global_position = event.global_position,
            stream_id = %event.stream_id,
            event_type = %event.event_type,
            event_handler = handler.name()
        );

        handler
            .handle(event)
            .instrument(span)
            .await
            .map_err(|source| ProjectionError::Handler {
                projector_id: self.projector_id.clone(),
                global_position: event.global_position,
                source,
            })
    }

    /// Reads the next batch, retrying retryable failures with exponential backoff.
    async fn next_batch(&self, position: GlobalPosition) -> Result<Batch, ProjectionError> {
        let mut backoff: Duration = self.config.retry_backoff;
        let mut attempt: u32 = 0;

        loop {
            match poll_batch(&self.event_store, position, self.config.batch_size.max(1)).await {
                Ok(batch) => return Ok(batch),
                Err(error) if error.is_retryable() && attempt < self.config.max_read_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, ?error, "failed to read the event log, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_retry_backoff);
                }
                Err(source) => {
                    return Err(ProjectionError::Store {
                        projector_id: self.projector_id.clone(),
                        source,
                    })
                }
            }
        }
    }

    async fn wait_for_events(&mut self, head: &mut Option<watch::Receiver<GlobalPosition>>, position: GlobalPosition) {
        let poll_interval: Duration = self.config.poll_interval;

        match head {
            Some(head) => {
                let latest: GlobalPosition = *head.borrow_and_update();
                if latest > position {
                    return;
                }

                tokio::select! {
                    _ = head.changed() => {}
                    _ = self.stop.changed() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            None => {
                tokio::select! {
                    _ = self.stop.changed() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
}

/// A dropped engine counts as a stop request.
fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

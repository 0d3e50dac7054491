//! The event loop that owns the consensus core.

use crate::backend::Backend;
use crate::config::Config;
use crate::core::Core;
use crate::events::{CoreEvent, EventSender};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Builds the event channel and spawns the task that drives a [`Core`].
///
/// The backend side gets an [`EventSender`] (from [`Engine::event_sender`])
/// before the loop starts; that handle is its only way in.
pub struct Engine {
    config: Config,
    backend: Arc<dyn Backend>,
    event_tx: mpsc::Sender<CoreEvent>,
    event_rx: mpsc::Receiver<CoreEvent>,
}

impl Engine {
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        Self {
            config,
            backend,
            event_tx,
            event_rx,
        }
    }

    /// The enqueue-only handle for the backend side.
    pub fn event_sender(&self) -> EventSender {
        EventSender::new(self.event_tx.clone())
    }

    /// Spawn the event loop. The core enters round 0 of the next sequence
    /// before consuming any event.
    pub fn start(self) -> EngineHandle {
        let Engine {
            config,
            backend,
            event_tx,
            mut event_rx,
        } = self;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut core = Core::new(config, backend, event_tx);
            core.start();
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    event = event_rx.recv() => match event {
                        Some(event) => core.handle_event(event),
                        None => break,
                    },
                }
            }
            core.stop();
            debug!("Consensus event loop stopped");
        });

        EngineHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Handle for a running engine. Dropping it signals shutdown.
pub struct EngineHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Stop the loop and wait for it to exit. Outstanding timers are
    /// cancelled; queued events are dropped.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

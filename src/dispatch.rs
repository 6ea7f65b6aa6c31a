//! Dispatch of decoded commands and orchestrator state transitions to the
//! visual collaborator.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::response::CommandEnvelope;
use crate::visual::{VisualState, VisualStateController};

/// Bounded queue depth for outstanding visual updates.
const QUEUE_CAPACITY: usize = 16;

/// Applies side effects without blocking the response-handling path.
///
/// Updates are pushed onto a bounded queue consumed by one tracked worker,
/// so they apply in submission order and [`shutdown`](Self::shutdown) can
/// drain them deterministically instead of leaking detached tasks.
pub struct CommandDispatcher {
    queue: mpsc::Sender<String>,
    stop: CancellationToken,
    tracker: TaskTracker,
}

impl CommandDispatcher {
    pub fn new(visual: Arc<dyn VisualStateController>) -> Self {
        let (queue, rx) = mpsc::channel(QUEUE_CAPACITY);
        let stop = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(run_worker(visual, rx, stop.clone()));
        Self {
            queue,
            stop,
            tracker,
        }
    }

    /// Apply a decoded command. Exactly one shape is recognized:
    /// `set_status` with a non-empty `parameters.status`; everything else
    /// is a warn-level no-op.
    pub fn dispatch(&self, command: &CommandEnvelope) {
        if command.tool_name != "set_status" {
            tracing::warn!("ignoring unrecognized command '{}'", command.tool_name);
            return;
        }
        let status = command
            .parameters
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if status.is_empty() {
            tracing::warn!("'set_status' command without a 'status' parameter");
            return;
        }
        tracing::info!("command requests visual state '{status}'");
        self.enqueue(status.to_owned());
    }

    /// Queue one of the orchestrator's own state transitions.
    pub fn set_visual_state(&self, state: VisualState) {
        self.enqueue(state.as_str().to_owned());
    }

    fn enqueue(&self, status: String) {
        if self.queue.try_send(status).is_err() {
            tracing::warn!("visual update queue full; dropping update");
        }
    }

    /// Drain queued updates and wait for the worker to finish.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn run_worker(
    visual: Arc<dyn VisualStateController>,
    mut rx: mpsc::Receiver<String>,
    stop: CancellationToken,
) {
    let apply = |status: String| {
        let visual = Arc::clone(&visual);
        async move {
            if let Err(e) = visual.set_state(&status).await {
                tracing::warn!("visual state update failed: {e}");
            }
        }
    };
    loop {
        tokio::select! {
            biased;
            status = rx.recv() => match status {
                Some(status) => apply(status).await,
                None => return,
            },
            () = stop.cancelled() => {
                // Drain what was already queued, then exit.
                while let Ok(status) = rx.try_recv() {
                    apply(status).await;
                }
                return;
            }
        }
    }
}

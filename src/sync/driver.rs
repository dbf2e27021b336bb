//! Event loop driving a [`SyncController`] on a single task.
//!
//! All inputs are serialized through one `select!`: commands from a
//! [`SyncHandle`], live events, and completions of the fetches the controller
//! issued. Each input runs to completion before the next is taken, so the
//! store is never mutated concurrently.

use super::{PendingFetch, SyncController};
use crate::error::SyncError;
use crate::live::LiveEvent;
use crate::shared::SeriesKey;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::mpsc;

/// Input to the sync loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncCommand {
    SwitchKey(SeriesKey),
    NearOlderEdge(i64),
    NearNewerEdge(i64),
    Shutdown,
}

/// Cloneable sender side of the sync loop. This is the viewport signal
/// interface: callers debounce edge events themselves.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    pub fn new(tx: mpsc::Sender<SyncCommand>) -> Self {
        Self { tx }
    }

    /// Make `key` the active series (starts the engine on first call).
    pub async fn switch_key(&self, key: SeriesKey) -> Result<(), SyncError> {
        self.send(SyncCommand::SwitchKey(key)).await
    }

    /// Non-blocking; an edge event is dropped with [`SyncError::Busy`] if the
    /// loop is saturated.
    pub fn on_viewport_near_older_edge(&self, requested_time: i64) -> Result<(), SyncError> {
        self.try_send(SyncCommand::NearOlderEdge(requested_time))
    }

    /// Non-blocking; an edge event is dropped if the loop is saturated.
    pub fn on_viewport_near_newer_edge(&self, requested_time: i64) -> Result<(), SyncError> {
        self.try_send(SyncCommand::NearNewerEdge(requested_time))
    }

    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.send(SyncCommand::Shutdown).await
    }

    async fn send(&self, cmd: SyncCommand) -> Result<(), SyncError> {
        self.tx.send(cmd).await.map_err(|_| SyncError::Stopped)
    }

    fn try_send(&self, cmd: SyncCommand) -> Result<(), SyncError> {
        self.tx.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(cmd) => {
                tracing::debug!(command = ?cmd, "Sync loop busy, dropping edge event");
                SyncError::Busy
            }
            mpsc::error::TrySendError::Closed(_) => SyncError::Stopped,
        })
    }
}

/// Run the loop until a `Shutdown` command arrives or every handle is
/// dropped. Returns the controller for inspection.
pub async fn run(
    mut controller: SyncController,
    mut commands: mpsc::Receiver<SyncCommand>,
    mut live_events: mpsc::Receiver<LiveEvent>,
) -> SyncController {
    let mut fetches: FuturesUnordered<PendingFetch> = FuturesUnordered::new();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let pending = match cmd {
                    Some(SyncCommand::SwitchKey(key)) => controller.switch_key(key),
                    Some(SyncCommand::NearOlderEdge(t)) => controller.on_viewport_near_older_edge(t),
                    Some(SyncCommand::NearNewerEdge(t)) => controller.on_viewport_near_newer_edge(t),
                    Some(SyncCommand::Shutdown) | None => {
                        controller.shutdown();
                        break;
                    }
                };
                if let Some(fetch) = pending {
                    fetches.push(fetch);
                }
            }

            Some(event) = live_events.recv() => {
                controller.on_live_event(event);
            }

            Some(done) = fetches.next(), if !fetches.is_empty() => {
                controller.on_fetch_completed(done);
            }
        }
    }

    // In-flight fetches are dropped here; their results would be stale.
    drop(fetches);
    controller
}

/// Ingest module
///
/// This module groups the connection lifecycle of the ingestion socket:
/// - Binding the Unix domain listener
/// - Accepting connections into the connection registry
/// - Spawning one reader task per connection
/// - Closing connections flagged by their reader
///
/// ```text
/// listener -> ConnectionRegistry -> watcher -> reader task -> InboundQueue
///                                                  |
///                                                  v
///                                           ClosureRegistry -> closer
/// ```
///
/// Message handling does NOT live here. Readers only forward raw
/// payloads to the `InboundQueue`.
pub mod runner;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::UnixListener;

use crate::{
    queue::InboundQueue,
    registry::{ClosureRegistry, ConnectionRegistry},
};

/// Binds the ingestion listener at `path`.
///
/// A stale socket file left behind by a previous process is removed
/// first.
pub fn bind(path: &Path) -> anyhow::Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("removed stale socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to remove stale socket {}", path.display()));
        }
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind ingestion socket {}", path.display()))?;
    log::info!("listening for connections on {}", path.display());
    Ok(listener)
}

/// Starts the watcher and closer tasks, then runs the accept loop.
///
/// Resolves only when accepting fails; the watcher, closer and reader
/// tasks keep running in the background.
pub async fn serve(listener: UnixListener, queue: InboundQueue) -> anyhow::Result<()> {
    let connections = Arc::new(ConnectionRegistry::new());
    let closures = Arc::new(ClosureRegistry::new());

    tokio::spawn(runner::run_watcher(
        connections.clone(),
        closures.clone(),
        queue,
    ));
    tokio::spawn(runner::run_closer(closures));

    runner::run_listener(listener, connections).await
}

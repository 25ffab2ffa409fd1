use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of one accepted connection.
///
/// ```text
/// Pending --watcher--> Watched --sentinel--> PendingClose --closer--> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, waiting in the connection registry
    Pending,

    /// Owned by a reader task
    Watched,

    /// Waiting in the closure registry
    PendingClose,

    /// Socket shut down
    Closed,
}

/// An accepted ingestion socket.
///
/// Owned by exactly one registry or reader task at a time. Moving it
/// between stages is a move of the value itself.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    state: ConnectionState,
    stream: BufReader<UnixStream>,
}

impl Connection {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            state: ConnectionState::Pending,
            stream: BufReader::new(stream),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Buffered read half used by the reader task.
    pub(crate) fn reader(&mut self) -> &mut BufReader<UnixStream> {
        &mut self.stream
    }

    /// Shuts the socket down.
    ///
    /// Closing an already closed connection is a no-op. A peer that
    /// already went away (`NotConnected`) counts as closed.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }

        let result = match self.stream.get_mut().shutdown().await {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        };
        self.state = ConnectionState::Closed;
        result
    }
}

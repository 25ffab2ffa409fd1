use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tokio::io::AsyncBufReadExt;
use tokio::net::UnixListener;

use crate::{
    connection::{Connection, ConnectionState},
    metrics::METRICS,
    queue::InboundQueue,
    registry::{ClosureRegistry, ConnectionRegistry},
};

/// Accepts connections forever and publishes them as `Pending`.
///
/// CONTRACT:
/// - Never returns `Ok`
/// - An accept error ends the loop and is returned to the caller;
///   restarting is left to whoever supervises the process
///
pub async fn run_listener(
    listener: UnixListener,
    connections: Arc<ConnectionRegistry>,
) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("failed to accept ingestion connection")?;

        let conn = Connection::new(stream);
        log::debug!("accepted connection #{}", conn.id());

        METRICS.connections_accepted.fetch_add(1, Ordering::Relaxed);
        METRICS.connections_active.fetch_add(1, Ordering::Relaxed);

        connections.publish(conn);
    }
}

/// Spawns one reader task per pending connection.
///
/// Waits for the registry to become non-empty, pops connections one at
/// a time until it is empty again, then goes back to waiting. Never
/// exits.
pub async fn run_watcher(
    connections: Arc<ConnectionRegistry>,
    closures: Arc<ClosureRegistry>,
    queue: InboundQueue,
) {
    loop {
        connections.wait_non_empty().await;

        while let Some(mut conn) = connections.pop() {
            conn.set_state(ConnectionState::Watched);
            tokio::spawn(read_connection(conn, queue.clone(), closures.clone()));
        }
    }
}

/// Reads one connection until its termination sentinel.
///
/// Each non-empty line is pushed to the queue unmodified, minus its line
/// terminator. An empty line, end-of-stream or any read error ends the
/// task and hands the connection to the closer exactly once.
pub async fn read_connection(
    mut conn: Connection,
    queue: InboundQueue,
    closures: Arc<ClosureRegistry>,
) {
    let mut line = String::new();

    loop {
        line.clear();

        match conn.reader().read_line(&mut line).await {
            // end-of-stream
            Ok(0) => break,
            Ok(_) => {
                let payload = trim_line_ending(&line);
                if payload.is_empty() {
                    break;
                }

                METRICS.messages_received.fetch_add(1, Ordering::Relaxed);
                if !queue.push(payload.to_owned()) {
                    log::warn!(
                        "inbound queue closed, dropping connection #{}",
                        conn.id()
                    );
                    break;
                }
            }
            Err(e) => {
                METRICS.read_errors.fetch_add(1, Ordering::Relaxed);
                log::debug!("read error on connection #{}: {}", conn.id(), e);
                break;
            }
        }
    }

    conn.set_state(ConnectionState::PendingClose);
    closures.publish(conn);
}

/// Closes every connection published to the closure registry.
///
/// Never exits. Close errors are logged and otherwise ignored.
pub async fn run_closer(closures: Arc<ClosureRegistry>) {
    loop {
        closures.wait_non_empty().await;

        for mut conn in closures.take_all() {
            log::debug!("closing connection #{} ({:?})", conn.id(), conn.state());
            if let Err(e) = conn.close().await {
                log::debug!("error closing connection #{}: {}", conn.id(), e);
            }

            METRICS.connections_active.fetch_sub(1, Ordering::Relaxed);
            METRICS.connections_closed.fetch_add(1, Ordering::Relaxed);
            log::debug!("closed connection #{}", conn.id());
        }
    }
}

fn trim_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::inbound_queue;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    async fn read_all(payload: &[u8]) -> (Vec<String>, Arc<ClosureRegistry>) {
        let (local, mut peer) = UnixStream::pair().unwrap();
        let (queue, mut dispatcher) = inbound_queue();
        let closures = Arc::new(ClosureRegistry::new());

        peer.write_all(payload).await.unwrap();
        read_connection(Connection::new(local), queue, closures.clone()).await;

        let mut seen = Vec::new();
        dispatcher.drain(|m| seen.push(m));
        (seen, closures)
    }

    #[test]
    fn trims_only_the_line_terminator() {
        assert_eq!(trim_line_ending("abc\n"), "abc");
        assert_eq!(trim_line_ending("abc\r\n"), "abc");
        assert_eq!(trim_line_ending(" abc \n"), " abc ");
        assert_eq!(trim_line_ending("\n"), "");
        assert_eq!(trim_line_ending("abc"), "abc");
    }

    #[tokio::test]
    async fn forwards_lines_until_empty_line() {
        let (seen, closures) = read_all(b"u1\nu2\r\nu1\n\nafter-sentinel\n").await;

        assert_eq!(seen, vec!["u1", "u2", "u1"]);

        let closed = closures.take_all();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].state(), ConnectionState::PendingClose);
    }

    #[tokio::test]
    async fn end_of_stream_flags_connection_once() {
        let (local, mut peer) = UnixStream::pair().unwrap();
        let (queue, mut dispatcher) = inbound_queue();
        let closures = Arc::new(ClosureRegistry::new());

        peer.write_all(b"only\n").await.unwrap();
        drop(peer);
        read_connection(Connection::new(local), queue, closures.clone()).await;

        let mut seen = Vec::new();
        dispatcher.drain(|m| seen.push(m));
        assert_eq!(seen, vec!["only"]);
        assert_eq!(closures.len(), 1);
    }

    #[tokio::test]
    async fn invalid_utf8_is_treated_as_close() {
        let (seen, closures) = read_all(b"ok\n\xff\xfe\nnever\n").await;
        assert_eq!(seen, vec!["ok"]);
        assert_eq!(closures.len(), 1);
    }

    #[tokio::test]
    async fn closer_shuts_down_flagged_connections() {
        let closures = Arc::new(ClosureRegistry::new());
        tokio::spawn(run_closer(closures.clone()));

        let mut peers = Vec::new();
        for _ in 0..2 {
            let (local, peer) = UnixStream::pair().unwrap();
            let mut conn = Connection::new(local);
            conn.set_state(ConnectionState::PendingClose);
            closures.publish(conn);
            peers.push(peer);
        }

        for mut peer in peers {
            let mut buf = [0u8; 4];
            let n = tokio::time::timeout(Duration::from_secs(1), peer.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(n, 0);
        }
        assert!(closures.is_empty());
    }

    #[tokio::test]
    async fn watcher_keeps_serving_later_batches() {
        let connections = Arc::new(ConnectionRegistry::new());
        let closures = Arc::new(ClosureRegistry::new());
        let (queue, mut dispatcher) = inbound_queue();

        tokio::spawn(run_watcher(connections.clone(), closures.clone(), queue));

        let mut peers = Vec::new();
        for batch in 0..3 {
            let (local, mut peer) = UnixStream::pair().unwrap();
            peer.write_all(format!("batch-{batch}\n").as_bytes())
                .await
                .unwrap();
            connections.publish(Connection::new(local));
            peers.push(peer);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.len() < 3 {
                dispatcher.drain(|m| seen.push(m));
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["batch-0", "batch-1", "batch-2"]);
        assert!(connections.is_empty());
        assert!(closures.is_empty());
    }

    #[tokio::test]
    async fn listener_publishes_accepted_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listener.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let connections = Arc::new(ConnectionRegistry::new());

        tokio::spawn(run_listener(listener, connections.clone()));
        let _client = UnixStream::connect(&path).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), connections.wait_non_empty())
            .await
            .unwrap();
        let conn = connections.pop().unwrap();
        assert_eq!(conn.state(), ConnectionState::Pending);
    }
}

use std::sync::atomic::Ordering;

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::metrics::METRICS;

/// Producer side of the inbound message queue.
///
/// Unbounded FIFO of raw payloads. Cloned into every reader task.
/// No backpressure: if the dispatcher stalls the queue keeps growing.
#[derive(Debug, Clone)]
pub struct InboundQueue {
    tx: mpsc::UnboundedSender<String>,
}

/// Single consumer of the inbound queue.
#[derive(Debug)]
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<String>,
}

/// Creates a connected queue / dispatcher pair.
pub fn inbound_queue() -> (InboundQueue, Dispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InboundQueue { tx }, Dispatcher { rx })
}

impl InboundQueue {
    /// Enqueues one payload.
    ///
    /// Returns `false` once the dispatcher has been dropped.
    pub fn push(&self, message: String) -> bool {
        self.tx.send(message).is_ok()
    }
}

impl Dispatcher {
    /// Hands every message currently queued to `handler`, oldest first,
    /// then returns how many were handled.
    ///
    /// Does not wait for new messages. Each call to `handler` completes
    /// before the next message is popped.
    pub fn drain<F>(&mut self, mut handler: F) -> usize
    where
        F: FnMut(String),
    {
        let mut handled = 0;
        loop {
            match self.rx.try_recv() {
                Ok(message) => {
                    handler(message);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if handled > 0 {
            METRICS.messages_dispatched.fetch_add(handled, Ordering::Relaxed);
        }
        handled
    }

    /// Persistent dispatch loop around `drain`.
    ///
    /// Suspends until the queue is non-empty, handles that message and
    /// drains the rest, then waits again. Returns once every
    /// `InboundQueue` handle has been dropped and the queue is empty.
    pub async fn run<F>(mut self, mut handler: F)
    where
        F: FnMut(String),
    {
        while let Some(first) = self.rx.recv().await {
            handler(first);
            METRICS.messages_dispatched.fetch_add(1, Ordering::Relaxed);
            self.drain(&mut handler);
        }
        log::debug!("inbound queue closed, dispatcher exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn drain_is_fifo_and_returns() {
        let (queue, mut dispatcher) = inbound_queue();
        for id in ["a", "b", "c"] {
            assert!(queue.push(id.to_string()));
        }

        let mut seen = Vec::new();
        assert_eq!(dispatcher.drain(|m| seen.push(m)), 3);
        assert_eq!(seen, vec!["a", "b", "c"]);

        // nothing left: returns without blocking
        assert_eq!(dispatcher.drain(|m| seen.push(m)), 0);
    }

    #[test]
    fn push_fails_after_dispatcher_drop() {
        let (queue, dispatcher) = inbound_queue();
        drop(dispatcher);
        assert!(!queue.push("lost".to_string()));
    }

    #[tokio::test]
    async fn run_delivers_every_message_once_per_producer_order() {
        let (queue, dispatcher) = inbound_queue();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let runner = tokio::spawn({
            let seen = seen.clone();
            dispatcher.run(move |m| seen.lock().unwrap().push(m))
        });

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        queue.push(format!("{p}:{i}"));
                        if i % 10 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        drop(queue);
        runner.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 200);
        for p in 0..4 {
            let ours: Vec<usize> = seen
                .iter()
                .filter_map(|m| m.strip_prefix(&format!("{p}:")))
                .map(|i| i.parse().unwrap())
                .collect();
            assert_eq!(ours, (0..50).collect::<Vec<_>>());
        }
    }
}

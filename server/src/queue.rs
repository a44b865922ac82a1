//! Bounded FIFO between the collector and the worker pool.
//!
//! One producer, many consumers. When the queue is full the producer waits;
//! with [`OverflowPolicy::DropAfter`] it gives up after the timeout, drops the
//! datagram and counts it in [`ServerStats`].

use crate::stats::ServerStats;
use log::debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// One received datagram, exactly as it came off the socket.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDatagram {
    pub origin: SocketAddr,
    payload: Vec<u8>,
}

impl RawDatagram {
    pub fn new(origin: SocketAddr, payload: &[u8]) -> Self {
        Self {
            origin,
            payload: payload.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for space as long as it takes.
    Block,
    /// Wait up to the timeout, then drop the datagram.
    DropAfter(Duration),
}

impl OverflowPolicy {
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) => OverflowPolicy::DropAfter(timeout),
            None => OverflowPolicy::Block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("packet queue closed")]
pub struct QueueClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    Dropped,
}

/// Creates a queue holding at most `capacity` datagrams.
pub fn packet_queue(
    capacity: usize,
    policy: OverflowPolicy,
    stats: Arc<ServerStats>,
) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueSender { tx, policy, stats },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer half, owned by the collector.
#[derive(Debug)]
pub struct QueueSender {
    tx: mpsc::Sender<RawDatagram>,
    policy: OverflowPolicy,
    stats: Arc<ServerStats>,
}

impl QueueSender {
    pub async fn push(&self, datagram: RawDatagram) -> Result<Enqueued, QueueClosed> {
        match self.policy {
            OverflowPolicy::Block => {
                self.tx.send(datagram).await.map_err(|_| QueueClosed)?;
                Ok(Enqueued::Queued)
            }
            OverflowPolicy::DropAfter(timeout) => {
                match tokio::time::timeout(timeout, self.tx.send(datagram)).await {
                    Ok(Ok(())) => Ok(Enqueued::Queued),
                    Ok(Err(_)) => Err(QueueClosed),
                    Err(_) => {
                        self.stats.record_dropped();
                        debug!("Packet queue full for {:?}, datagram dropped", timeout);
                        Ok(Enqueued::Dropped)
                    }
                }
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Datagrams currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer half. Clones share the same underlying queue.
#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<RawDatagram>>>,
}

impl QueueReceiver {
    /// Waits for the next datagram. `None` once the sender is gone and the
    /// queue is empty.
    pub async fn pop(&self) -> Option<RawDatagram> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}

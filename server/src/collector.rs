//! Datagram collector: the only reader of the bound socket.

use crate::queue::{QueueSender, RawDatagram};
use crate::stats::ServerStats;
use log::{debug, error, info, warn};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// Why the collector loop returned.
#[derive(Debug)]
pub enum CollectorExit {
    /// Shutdown was requested.
    Shutdown,
    /// Every consumer is gone.
    QueueClosed,
    /// The socket itself failed and needs replacing.
    Failed(io::Error),
}

/// Receive errors that concern one datagram or one peer, not the socket.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Reads datagrams into the queue until shutdown or a fatal socket error
///
/// The buffer is one byte larger than `max_datagram_size` so oversized
/// datagrams can be told apart and dropped.
pub async fn run_collector(
    socket: Arc<UdpSocket>,
    queue: &QueueSender,
    max_datagram_size: usize,
    stats: &ServerStats,
    shutdown: &mut watch::Receiver<bool>,
) -> CollectorExit {
    let mut buffer = vec![0u8; max_datagram_size + 1];

    loop {
        if *shutdown.borrow() {
            return CollectorExit::Shutdown;
        }

        let received = tokio::select! {
            result = socket.recv_from(&mut buffer) => result,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return CollectorExit::Shutdown;
                }
                continue;
            }
        };

        match received {
            Ok((len, origin)) => {
                stats.record_received();
                if len > max_datagram_size {
                    warn!("Dropping {} byte datagram from {}", len, origin);
                    stats.record_decode_failure();
                    continue;
                }
                if queue.push(RawDatagram::new(origin, &buffer[..len])).await.is_err() {
                    info!("Packet queue closed, collector stopping");
                    return CollectorExit::QueueClosed;
                }
            }
            Err(e) if is_transient(&e) => {
                debug!("Transient receive error: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => {
                error!("Socket receive failed: {}", e);
                return CollectorExit::Failed(e);
            }
        }
    }
}

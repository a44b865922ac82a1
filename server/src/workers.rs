//! Worker pool consuming the packet queue.

use crate::dispatch::{dispatch, RouteTable, ServerContext};
use crate::queue::QueueReceiver;
use log::{debug, info};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Spawns `count` workers sharing one queue
///
/// Each worker exits once the queue is closed and empty, so dropping the
/// producer drains the pool.
pub fn spawn_workers(
    count: usize,
    ctx: Arc<ServerContext>,
    routes: Arc<RouteTable>,
    queue: QueueReceiver,
) -> Vec<JoinHandle<()>> {
    info!("Starting {} packet workers", count);
    (0..count)
        .map(|id| {
            let ctx = Arc::clone(&ctx);
            let routes = Arc::clone(&routes);
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut processed: u64 = 0;
                while let Some(datagram) = queue.pop().await {
                    dispatch(&ctx, &routes, datagram).await;
                    processed += 1;
                }
                debug!("Worker {} stopped after {} datagrams", id, processed);
            })
        })
        .collect()
}

//! Server network layer: socket ownership and task supervision

use crate::collector::{run_collector, CollectorExit};
use crate::config::ServerConfig;
use crate::dispatch::{RouteTable, ServerContext};
use crate::error::ServerError;
use crate::queue::{packet_queue, OverflowPolicy, QueueSender};
use crate::registry::SessionRegistry;
use crate::reply::OutboundReceiver;
use crate::stats::ServerStats;
use crate::store::{GameStore, StoreGateway, WorldData};
use crate::workers::spawn_workers;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Current socket shared with the outbound task. `None` while the collector
/// is being restarted on a fresh socket.
type SocketSlot = watch::Sender<Option<Arc<UdpSocket>>>;

/// Asks a running [`Server`] to stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// The dedicated server: one UDP socket, one collector, a worker pool and
/// the background tasks around them.
pub struct Server {
    config: ServerConfig,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    routes: Arc<RouteTable>,
    outbound_rx: OutboundReceiver,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Validates the configuration, loads reference data from `store` and
    /// binds the socket. Any failure here is a boot failure.
    pub async fn bind(config: ServerConfig, store: Arc<dyn GameStore>) -> Result<Self, ServerError> {
        config.validate()?;

        let world = WorldData::load(store.as_ref())?;

        let socket = UdpSocket::bind(&config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        let local_addr = socket.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let ctx = ServerContext {
            registry: SessionRegistry::new(outbound_tx),
            store: StoreGateway::new(store, config.store_pool_size, config.store_timeout),
            world,
            stats: Arc::new(ServerStats::new()),
            rebind_policy: config.rebind_policy,
            max_character_slots: config.max_character_slots,
        };
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            socket: Arc::new(socket),
            local_addr,
            ctx: Arc::new(ctx),
            routes: Arc::new(RouteTable::standard()),
            outbound_rx,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handler state, for inspecting a running server.
    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.ctx.stats)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    /// Spawns task that sends queued replies through the current socket
    fn spawn_network_sender(
        mut outbound_rx: OutboundReceiver,
        socket: watch::Receiver<Option<Arc<UdpSocket>>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(outgoing) = outbound_rx.recv().await {
                let current = socket.borrow().clone();
                match current {
                    Some(socket) => {
                        if let Err(e) = socket.send_to(&outgoing.payload, outgoing.addr).await {
                            error!("Failed to send to {}: {}", outgoing.addr, e);
                        }
                    }
                    None => debug!("No socket, dropping reply to {}", outgoing.addr),
                }
            }
        })
    }

    /// Spawns task that disconnects sessions gone quiet and drops sessions
    /// that never bound a character
    fn spawn_timeout_checker(
        ctx: Arc<ServerContext>,
        idle_timeout: Option<Duration>,
        unbound_grace: Option<Duration>,
    ) -> JoinHandle<()> {
        let period = [idle_timeout, unbound_grace]
            .into_iter()
            .flatten()
            .chain(std::iter::once(Duration::from_secs(1)))
            .min()
            .unwrap_or(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                if let Some(timeout) = idle_timeout {
                    let reaped = ctx.registry.reap_idle(timeout).await;
                    if !reaped.is_empty() {
                        info!("Reaped {} idle sessions", reaped.len());
                    }
                }
                if let Some(grace) = unbound_grace {
                    let dropped = ctx.registry.reap_unbound(grace).await;
                    if !dropped.is_empty() {
                        info!("Dropped {} sessions without a character", dropped.len());
                    }
                }
            }
        })
    }

    /// Spawns task that logs counters periodically
    fn spawn_stats_reporter(ctx: Arc<ServerContext>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;
                let s = ctx.stats.snapshot();
                info!(
                    "{} sessions ({} players) | received {} dropped {} malformed {} unrouted {} rejected {} handled {} failed {}",
                    ctx.registry.len().await,
                    ctx.registry.player_count().await,
                    s.received,
                    s.dropped,
                    s.decode_failures,
                    s.unrouted,
                    s.rejected,
                    s.handled,
                    s.failed
                );
            }
        })
    }

    /// Runs until shutdown is triggered or the collector cannot be restarted.
    pub async fn run(self) -> Result<(), ServerError> {
        let Server {
            config,
            socket,
            local_addr,
            ctx,
            routes,
            outbound_rx,
            shutdown,
        } = self;

        let (socket_slot, socket_watch) = watch::channel(Some(Arc::clone(&socket)));
        let sender = Self::spawn_network_sender(outbound_rx, socket_watch);

        let (queue_tx, queue_rx) = packet_queue(
            config.queue_capacity,
            OverflowPolicy::from_timeout(config.enqueue_timeout),
            Arc::clone(&ctx.stats),
        );
        let mut workers = spawn_workers(config.workers, Arc::clone(&ctx), routes, queue_rx);

        let mut background = vec![sender];
        if config.idle_timeout.is_some() || config.unbound_grace.is_some() {
            background.push(Self::spawn_timeout_checker(
                Arc::clone(&ctx),
                config.idle_timeout,
                config.unbound_grace,
            ));
        }
        if let Some(period) = config.stats_interval {
            background.push(Self::spawn_stats_reporter(Arc::clone(&ctx), period));
        }

        info!("Server started successfully");

        let result = supervise_collector(
            socket,
            local_addr,
            &config,
            queue_tx,
            &ctx.stats,
            &socket_slot,
            shutdown.subscribe(),
        )
        .await;

        // The collector dropped the producer, so workers finish once the
        // queue is empty.
        let drained = tokio::time::timeout(config.drain_timeout, async {
            for worker in workers.iter_mut() {
                if let Err(e) = worker.await {
                    error!("Worker task failed: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "Workers did not drain within {:?}, aborting",
                config.drain_timeout
            );
        }
        for worker in &workers {
            worker.abort();
        }
        for task in &background {
            task.abort();
        }

        info!("Server stopped");
        result
    }
}

/// Runs the collector, replacing the socket after fatal receive errors
///
/// The new socket is bound to the same local address. Each bind attempt
/// counts as one restart; once `max_collector_restarts` is used up the
/// server gives up.
async fn supervise_collector(
    mut socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    config: &ServerConfig,
    queue: QueueSender,
    stats: &ServerStats,
    slot: &SocketSlot,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let mut restarts: u32 = 0;

    loop {
        let exit = run_collector(
            Arc::clone(&socket),
            &queue,
            config.max_datagram_size,
            stats,
            &mut shutdown,
        )
        .await;

        match exit {
            CollectorExit::Shutdown => {
                info!("Shutdown requested, collector stopped");
                return Ok(());
            }
            CollectorExit::QueueClosed => return Ok(()),
            CollectorExit::Failed(e) => {
                warn!("Collector failed: {}", e);
                slot.send_replace(None);
                drop(socket);

                socket = loop {
                    if restarts >= config.max_collector_restarts {
                        error!("Collector restarted {} times, giving up", restarts);
                        return Err(ServerError::CollectorExhausted(restarts));
                    }
                    restarts += 1;
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(restarts))).await;

                    match UdpSocket::bind(local_addr).await {
                        Ok(fresh) => {
                            info!("Collector restarted on {} (attempt {})", local_addr, restarts);
                            break Arc::new(fresh);
                        }
                        Err(e) => warn!("Rebinding {} failed: {}", local_addr, e),
                    }
                };
                slot.send_replace(Some(Arc::clone(&socket)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::world_seed;
    use crate::store::MemoryStore;
    use shared::*;

    fn config() -> ServerConfig {
        ServerConfig {
            workers: 2,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ServerConfig {
            queue_capacity: 0,
            ..config()
        };
        let result = Server::bind(config, Arc::new(MemoryStore::new(world_seed()))).await;
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let first = Server::bind(config(), Arc::new(MemoryStore::new(world_seed())))
            .await
            .unwrap();
        let taken = ServerConfig {
            bind_addr: first.local_addr().to_string(),
            ..config()
        };
        let result = Server::bind(taken, Arc::new(MemoryStore::new(world_seed()))).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let server = Server::bind(config(), Arc::new(MemoryStore::new(world_seed())))
            .await
            .unwrap();
        let addr = server.local_addr();
        let ctx = server.context();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(server.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&encode(&ConnectPacket::new(42, "Joe")).unwrap(), addr)
            .await
            .unwrap();

        let mut buf = [0u8; 4096];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply: SendPlayerPacket = decode(&buf[..len]).unwrap();
        assert_eq!(reply.pc.firstname, "Joe");
        assert!(ctx.registry.contains(42).await);

        shutdown.trigger();
        assert!(shutdown.is_triggered());
        let result = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_idle_sessions_are_reaped() {
        let config = ServerConfig {
            idle_timeout: Some(Duration::from_millis(200)),
            ..config()
        };
        let server = Server::bind(config, Arc::new(MemoryStore::new(world_seed())))
            .await
            .unwrap();
        let addr = server.local_addr();
        let ctx = server.context();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(server.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&encode(&ConnectPacket::new(7, "Ann")).unwrap(), addr)
            .await
            .unwrap();

        let mut buf = [0u8; 4096];
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        assert!(decode::<SendPlayerPacket>(&buf[..len]).is_ok());

        let (len, _) = tokio::time::timeout(Duration::from_secs(3), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let notice: DisconnectPacket = decode(&buf[..len]).unwrap();
        assert_eq!(notice.session_id, 7);
        assert!(!ctx.registry.contains(7).await);

        shutdown.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_sessions_without_character_are_dropped() {
        let config = ServerConfig {
            unbound_grace: Some(Duration::from_millis(200)),
            ..config()
        };
        let server = Server::bind(config, Arc::new(MemoryStore::new(world_seed())))
            .await
            .unwrap();
        let addr = server.local_addr();
        let ctx = server.context();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(server.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for session in 1..=20u64 {
            client
                .send_to(&encode(&ReqClistPacket::new(session, "test")).unwrap(), addr)
                .await
                .unwrap();
        }
        client
            .send_to(&encode(&ConnectPacket::new(99, "Ann")).unwrap(), addr)
            .await
            .unwrap();

        let mut buf = [0u8; 4096];
        let mut dropped = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if ctx.registry.len().await == 1 {
                dropped = true;
                break;
            }
        }
        assert!(dropped);
        assert!(ctx.registry.contains(99).await);
        assert_eq!(ctx.registry.player_name(99).await.as_deref(), Some("Ann"));

        // Only the list replies and Ann's record came back; no disconnects.
        while let Ok(Ok((len, _))) =
            tokio::time::timeout(Duration::from_millis(100), client.recv_from(&mut buf)).await
        {
            assert_ne!(peek_known_opcode(&buf[..len]).unwrap(), Opcode::Disconnect);
        }

        shutdown.trigger();
        handle.await.unwrap().unwrap();
    }
}

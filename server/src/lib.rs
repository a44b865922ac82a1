//! # Dedicated Realm Server Library
//!
//! This library provides the dedicated server for the multiplayer role-playing
//! game. Clients talk to it over UDP using the opcode-tagged MessagePack
//! records defined in the `shared` crate. The server tracks sessions, binds
//! characters to them, keeps each connected character's live position and
//! relays chat.
//!
//! ## Core Responsibilities
//!
//! ### Session Tracking
//! A session is keyed by the id the client presents. The first packet
//! carrying an unseen id pins the session to its source address; from then
//! on any packet for that id from another address is dropped as a hijack
//! attempt. Sessions end through DISCONNECT, a forced disconnect, or the
//! optional idle timeout.
//!
//! ### Protocol Dispatch
//! Every client opcode has a route in a table built at startup. A route
//! decodes its record, checks the session according to its access rule and
//! runs its handler. Unknown opcodes and opcodes clients never send are
//! ignored, so older servers tolerate newer clients.
//!
//! ### Character Management
//! Character lists, character creation and CONNECT go through the game
//! state store. Store calls run on the blocking pool with a concurrency cap
//! and a deadline; a failing store fails the request, not the server.
//!
//! ## Architecture Design
//!
//! ### Collector, Queue and Workers
//! One task reads the socket and pushes raw datagrams onto a bounded queue.
//! A pool of workers (one per core by default) pops from it. When the queue
//! is full the collector waits, or, with an enqueue timeout configured,
//! drops the datagram and counts it.
//!
//! ### Shared State
//! All session state sits behind a single registry-wide lock. Workers may
//! handle two packets of the same session at once; the lock makes each
//! update atomic.
//!
//! ### Replies
//! Replies leave through the same socket they arrived on. Handlers queue
//! addressed datagrams onto a channel drained by one sender task.
//!
//! ## Module Organization
//!
//! - `config`: command line flags and validated configuration
//! - `collector`, `queue`, `workers`: ingestion pipeline
//! - `dispatch`: route table and per-datagram processing
//! - `handlers`, `chat`: opcode handlers
//! - `registry`: sessions, bound characters and the hijack guard
//! - `store`: game state store interface and the in-memory implementation
//! - `reply`: outbound path
//! - `stats`: packet counters
//! - `network`: the [`network::Server`] tying it all together
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::from_json_file("data/world.json")?;
//!     let config = ServerConfig {
//!         bind_addr: "0.0.0.0:1337".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     let server = Server::bind(config, Arc::new(store)).await?;
//!     let shutdown = server.shutdown_handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.trigger();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod collector;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod network;
pub mod queue;
pub mod registry;
pub mod reply;
pub mod stats;
pub mod store;
pub mod workers;

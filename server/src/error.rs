//! Error types for the dedicated server.

use shared::{CodecError, SessionId};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Violations of the session state machine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("hijack attempt on session {session_id}: bound to {expected}, packet came from {actual}")]
    HijackAttempt {
        session_id: SessionId,
        expected: SocketAddr,
        actual: SocketAddr,
    },

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("session {session_id} already has {bound} connected")]
    AlreadyBound { session_id: SessionId, bound: String },

    #[error("{name} is already connected on another session")]
    DuplicateLogin { name: String, other: SessionId },

    #[error("no character named {0}")]
    PlayerNotFound(String),

    #[error("session {0} has no character connected")]
    NoPlayerBound(SessionId),
}

impl SessionError {
    /// True for failures of the address check itself. These are dropped
    /// without telling the sender anything.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            SessionError::HijackAttempt { .. } | SessionError::UnknownSession(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read world file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid world file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("character name {0} is taken")]
    NameTaken(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Anything that stops a datagram from being handled.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A request the client can fix, such as a taken character name.
    #[error("request denied: {0}")]
    Denied(String),
}

impl DispatchError {
    /// Text to send back in an error packet, if the failure should be
    /// reported to the client at all.
    pub fn client_message(&self) -> Option<String> {
        match self {
            DispatchError::Codec(_) => None,
            DispatchError::Session(e) if e.is_verification_failure() => None,
            DispatchError::Session(e) => Some(e.to_string()),
            DispatchError::Store(StoreError::NameTaken(name)) => {
                Some(format!("character name {} is taken", name))
            }
            DispatchError::Store(_) => Some("request failed, try again later".to_string()),
            DispatchError::Denied(reason) => Some(reason.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,

    #[error("max datagram size {0} is outside 1..=65507")]
    DatagramSize(usize),

    #[error("store pool size must be at least 1")]
    ZeroStorePool,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("socket failure: {0}")]
    Socket(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("collector stopped after {0} restarts")]
    CollectorExhausted(u32),
}

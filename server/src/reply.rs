//! Outbound path from handlers back to clients.
//!
//! All replies leave through the one bound socket. A [`ReplyHandle`] only
//! remembers where to send and queues encoded records for the outbound task.

use shared::{encode, CodecError, Record};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc;

/// An encoded datagram waiting to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub addr: SocketAddr,
    pub payload: Vec<u8>,
}

pub type OutboundSender = mpsc::UnboundedSender<Outgoing>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outgoing>;

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("outbound channel closed")]
    Closed,
}

/// Addressed sender for one session.
#[derive(Debug, Clone)]
pub struct ReplyHandle {
    addr: SocketAddr,
    outbound: OutboundSender,
}

impl ReplyHandle {
    pub fn new(addr: SocketAddr, outbound: OutboundSender) -> Self {
        Self { addr, outbound }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn send<R: Record>(&self, record: &R) -> Result<(), ReplyError> {
        let payload = encode(record)?;
        self.outbound
            .send(Outgoing {
                addr: self.addr,
                payload,
            })
            .map_err(|_| ReplyError::Closed)
    }
}

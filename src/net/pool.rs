//! Connection Pool
//!
//! Caches one outbound connection per peer address. Connections are dialed
//! lazily on first send and reused until they fail or the reactor reports
//! the peer gone. A failed send evicts the cached connection and retries
//! once on a fresh dial; the second failure is the caller's problem,
//! reported as an outcome rather than an error so coordinators can decide
//! how to account the peer.
//!
//! Replies arriving on a pooled connection flow into the reactor tagged
//! with the peer's address; correlating them to requests is the
//! coordinator's responsibility.

use crate::error::Result;
use crate::net::protocol::Event;
use crate::net::reactor::{attach, EventQueue, EventSink};
use crate::topology::NodeInfo;
use dashmap::DashMap;
use tokio::net::TcpStream;

/// What happened to an outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered to a cached or freshly dialed connection.
    Sent,
    /// The cached connection was dead; delivered on the retry dial.
    Retried,
    /// Both attempts failed.
    Failed,
}

impl SendOutcome {
    pub fn delivered(&self) -> bool {
        !matches!(self, SendOutcome::Failed)
    }
}

pub struct ConnectionPool {
    queue: EventQueue,
    connections: DashMap<String, EventSink>,
}

impl ConnectionPool {
    pub fn new(queue: EventQueue) -> Self {
        Self {
            queue,
            connections: DashMap::new(),
        }
    }

    pub async fn send(&self, node: &NodeInfo, event: Event) -> SendOutcome {
        let addr = node.address();

        if let Some(sink) = self.connections.get(&addr).map(|e| e.value().clone()) {
            if sink.send(event.clone()) {
                return SendOutcome::Sent;
            }
            self.connections.remove(&addr);
            tracing::debug!("evicted dead connection to {}", addr);
        } else {
            match self.dial(&addr).await {
                Ok(sink) => {
                    if sink.send(event.clone()) {
                        self.connections.insert(addr, sink);
                        return SendOutcome::Sent;
                    }
                }
                Err(e) => tracing::warn!("dial {} failed: {}", addr, e),
            }
        }

        match self.dial(&addr).await {
            Ok(sink) => {
                if sink.send(event) {
                    self.connections.insert(addr, sink);
                    SendOutcome::Retried
                } else {
                    SendOutcome::Failed
                }
            }
            Err(e) => {
                tracing::warn!("retry dial {} failed: {}", addr, e);
                SendOutcome::Failed
            }
        }
    }

    /// Drop the cached connection to a peer, typically after the reactor
    /// saw its socket close.
    pub fn evict(&self, addr: &str) {
        self.connections.remove(addr);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Drop every cached connection; their write tasks drain and exit.
    pub fn drain(&self) {
        self.connections.clear();
    }

    async fn dial(&self, addr: &str) -> Result<EventSink> {
        let stream = TcpStream::connect(addr).await?;
        Ok(attach(stream, addr.to_string(), self.queue.clone()))
    }
}

//! Event Reactor
//!
//! One unbounded queue feeds the node's single dispatch loop. Every
//! connection, inbound or outbound, gets a read task that decodes frames
//! into queue envelopes and a write task that drains a per-connection
//! sink. Handler failures are logged by the dispatcher; nothing here can
//! kill the loop.

use crate::error::NodeError;
use crate::net::protocol::{read_frame, write_frame, Event};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle for writing events back down one connection. Sends enqueue onto
/// the connection's write task; a `false` return means the connection is
/// gone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    /// A detached sink and its receiving end, for tests and in-process
    /// replies.
    pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, rx)
    }

    pub fn send(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Where an event came from.
#[derive(Debug, Clone)]
pub enum EventSource {
    /// A live connection; `reply` writes back down the same socket.
    Connection { peer: String, reply: EventSink },
    /// Synthesized inside the node (deadlines, shutdown plumbing).
    Local,
}

impl EventSource {
    pub fn reply(&self, event: Event) -> bool {
        match self {
            EventSource::Connection { reply, .. } => reply.send(event),
            EventSource::Local => false,
        }
    }
}

/// An envelope on the reactor queue.
#[derive(Debug)]
pub enum NodeEvent {
    Wire { event: Event, source: EventSource },
    /// A coordinator's deadline fired.
    Deadline { request_id: String },
    /// A connection closed; clients get their coordinators cancelled and
    /// pooled peers get evicted.
    Disconnected { peer: String },
}

#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<NodeEvent>,
}

impl EventQueue {
    /// Enqueue for the node loop. `false` means the loop has shut down;
    /// connection readers use that to close their sockets so peers see the
    /// node as gone instead of as a black hole.
    pub fn send(&self, event: NodeEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

pub fn event_queue() -> (EventQueue, mpsc::UnboundedReceiver<NodeEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventQueue { tx }, rx)
}

/// Wire a connection into the reactor: spawn its read and write tasks and
/// return the sink for sending down it. `peer` labels the connection in
/// envelopes and logs; for pooled outbound connections it is the peer's
/// listen address, which is what reply routing keys on.
pub fn attach(stream: TcpStream, peer: String, queue: EventQueue) -> EventSink {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = EventSink { tx };
    tokio::spawn(write_loop(write_half, rx, peer.clone()));
    tokio::spawn(read_loop(read_half, queue, peer, sink.clone()));
    sink
}

/// Accept inbound connections forever, attaching each to the reactor.
pub fn spawn_listener(listener: TcpListener, queue: EventQueue) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    attach(stream, addr.to_string(), queue.clone());
                }
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    })
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Event>,
    peer: String,
) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &event).await {
            tracing::warn!("write to {} failed: {}", peer, e);
            break;
        }
    }
}

async fn read_loop(mut reader: OwnedReadHalf, queue: EventQueue, peer: String, reply: EventSink) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(event)) => {
                let delivered = queue.send(NodeEvent::Wire {
                    event,
                    source: EventSource::Connection {
                        peer: peer.clone(),
                        reply: reply.clone(),
                    },
                });
                if !delivered {
                    break;
                }
            }
            Ok(None) => break,
            Err(NodeError::Serialization(e)) => {
                // Framing is intact, only the body was bad.
                tracing::warn!("dropping malformed frame from {}: {}", peer, e);
            }
            Err(e) => {
                tracing::warn!("read from {} failed: {}", peer, e);
                break;
            }
        }
    }
    queue.send(NodeEvent::Disconnected { peer });
}

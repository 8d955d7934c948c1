//! Wire Protocol
//!
//! The event set exchanged between clients, nodes, and peers, serialized
//! with bincode inside u32 big-endian length-prefixed frames. Request
//! correlation rides inside the events (`query_id` / `request_id`), never
//! on the transport.

use crate::error::{NodeError, Result};
use crate::filesystem::types::FilesystemConfig;
use crate::model::{Block, Coordinates, Predicate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame; anything larger is treated as a
/// serialization fault rather than an allocation request.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Admin action applied to a filesystem on every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilesystemAction {
    Create,
    Delete,
}

/// What a metadata request asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataKind {
    Filesystem,
    Features,
    Overview,
}

/// Descriptor of a spooled result file on one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoolInfo {
    pub host: String,
    pub path: String,
    pub size: u64,
    pub elapsed_ms: u64,
}

/// One peer's contribution to a query, or the final aggregate sent to the
/// client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryPayload {
    /// Interactive results: in-memory rows with their schema header.
    Rows {
        host: String,
        features: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    /// Non-interactive results: a spooled JSON file descriptor.
    Spool {
        host: String,
        file: Option<SpoolInfo>,
        result_size: u64,
    },
    /// Dry run: identifiers of the blocks that would have been scanned.
    Blocks {
        host: String,
        blocks: BTreeMap<String, Vec<String>>,
    },
    Error {
        host: String,
        message: String,
    },
    Aggregate(QueryAggregate),
}

impl QueryPayload {
    /// The contributing host, for coordinator bookkeeping. Aggregates have
    /// none.
    pub fn host(&self) -> Option<&str> {
        match self {
            QueryPayload::Rows { host, .. } => Some(host),
            QueryPayload::Spool { host, .. } => Some(host),
            QueryPayload::Blocks { host, .. } => Some(host),
            QueryPayload::Error { host, .. } => Some(host),
            QueryPayload::Aggregate(_) => None,
        }
    }
}

/// The merged response a coordinator hands back to the client. Peers that
/// never answered are listed in `missing`; per-peer failures land in
/// `errors` keyed by host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryAggregate {
    pub features: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub files: Vec<SpoolInfo>,
    pub blocks: BTreeMap<String, Vec<String>>,
    pub host_result_sizes: BTreeMap<String, u64>,
    pub total_result_size: u64,
    pub errors: BTreeMap<String, String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Client write: route the block to its owner.
    StorageRequest { block: Block },
    /// Peer write: store the block locally.
    StorageEvent { block: Block },

    /// Client query. `time` is a `yyyy-MM-dd-HH` expression.
    QueryRequest {
        filesystem: String,
        polygon: Option<Vec<Coordinates>>,
        time: Option<String>,
        feature_predicate: Option<Predicate>,
        metadata_predicate: Option<Predicate>,
        interactive: bool,
        dry_run: bool,
    },
    /// Subquery fanned out to one peer. The time expression is already
    /// resolved into a half-open millisecond window.
    QueryEvent {
        query_id: String,
        filesystem: String,
        polygon: Option<Vec<Coordinates>>,
        time_window: Option<(i64, i64)>,
        feature_predicate: Option<Predicate>,
        metadata_predicate: Option<Predicate>,
        interactive: bool,
        dry_run: bool,
    },
    QueryResponse {
        query_id: String,
        payload: QueryPayload,
    },

    MetadataRequest {
        kind: MetadataKind,
        filesystems: Vec<String>,
    },
    MetadataEvent {
        request_id: String,
        kind: MetadataKind,
        filesystems: Vec<String>,
    },
    /// `result_json` carries a serialized JSON array so the frame codec
    /// stays schema-driven end to end.
    MetadataResponse {
        request_id: String,
        kind: MetadataKind,
        host: String,
        result_json: Option<String>,
        error: Option<String>,
        missing: Vec<String>,
    },

    FilesystemRequest {
        action: FilesystemAction,
        config: FilesystemConfig,
    },
    FilesystemEvent {
        action: FilesystemAction,
        config: FilesystemConfig,
    },
}

pub async fn write_frame<W>(writer: &mut W, event: &Event) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = bincode::serialize(event).map_err(|e| NodeError::Serialization(e.to_string()))?;
    if bytes.len() > MAX_FRAME_BYTES as usize {
        return Err(NodeError::Serialization(format!(
            "frame of {} bytes exceeds limit",
            bytes.len()
        )));
    }
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` is a clean end of stream at a frame
/// boundary; a malformed body is a `Serialization` error with the stream
/// still positioned at the next frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Event>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(NodeError::Serialization(format!(
            "oversized frame of {} bytes",
            len
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    let event = bincode::deserialize(&buf).map_err(|e| NodeError::Serialization(e.to_string()))?;
    Ok(Some(event))
}

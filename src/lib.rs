//! Distributed Geospatial-Temporal Storage Fabric
//!
//! Producers submit blocks (coordinates + timestamp + typed features +
//! opaque payload) to any node; consumers submit queries combining a
//! polygon, a time window, and feature predicates, and get back matching
//! rows or spooled result files merged from across the cluster.
//!
//! ## Architecture Modules
//! The node is composed of small subsystems glued together by `node`:
//!
//! - **`geohash`**: the bit-level encoding that indexes records and drives
//!   partitioning, neighbor enumeration, and polygon covering.
//! - **`topology`**: the static cluster description, parsed into ordered
//!   groups of nodes.
//! - **`partition`**: deterministic placement of records on nodes using
//!   geohash prefixes and temporal bucketing.
//! - **`filesystem`**: named logical filesystems, each with its own
//!   precision and schema, persisted across restarts.
//! - **`net`**: the wire event protocol, the reactor loop, and the
//!   outbound connection pool.
//! - **`query`**: the per-request coordinator that fans subqueries out and
//!   merges partial replies, tolerating peer failure.
//! - **`node`**: the storage-node orchestrator binding all of the above.

pub mod error;
pub mod filesystem;
pub mod geohash;
pub mod model;
pub mod net;
pub mod node;
pub mod partition;
pub mod query;
pub mod topology;

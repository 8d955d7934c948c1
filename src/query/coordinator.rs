//! Request Coordinator
//!
//! One coordinator per inflight client request. It fans the subquery out
//! to its destinations, merges partial responses as they arrive, and sends
//! exactly one reply to the client when the last peer answers, the
//! deadline fires, or the client goes away.
//!
//! ## State machine
//!
//! ```text
//! Created --dispatch--> Waiting --response(n>1)--> Waiting
//!                          |
//!                          +--response(last) | deadline | cancel--> Complete
//! ```
//!
//! Peers that fail dispatch or miss the deadline contribute nothing and
//! are listed in the reply's `missing`. The coordinator runs entirely on
//! the node loop, so merges are serialized for free.

use crate::net::pool::{ConnectionPool, SendOutcome};
use crate::net::protocol::{Event, MetadataKind, QueryAggregate, QueryPayload};
use crate::net::reactor::EventSink;
use crate::topology::NodeInfo;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Created,
    Waiting,
    Complete,
}

enum Accumulator {
    Query(QueryAggregate),
    Metadata {
        kind: MetadataKind,
        results: Vec<serde_json::Value>,
        errors: BTreeMap<String, String>,
    },
}

pub struct RequestCoordinator {
    id: String,
    host: String,
    client: EventSink,
    accumulator: Accumulator,
    outstanding: HashSet<String>,
    missing: Vec<String>,
    state: CoordinatorState,
    deadline: Option<Duration>,
}

impl RequestCoordinator {
    /// Coordinator for a client query. `host` is the local node's address,
    /// stamped on the final reply.
    pub fn query(
        id: String,
        host: String,
        client: EventSink,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            id,
            host,
            client,
            accumulator: Accumulator::Query(QueryAggregate::default()),
            outstanding: HashSet::new(),
            missing: Vec::new(),
            state: CoordinatorState::Created,
            deadline,
        }
    }

    /// Coordinator for a metadata fan-out. Admin operations carry no
    /// deadline.
    pub fn metadata(id: String, host: String, client: EventSink, kind: MetadataKind) -> Self {
        Self {
            id,
            host,
            client,
            accumulator: Accumulator::Metadata {
                kind,
                results: Vec::new(),
                errors: BTreeMap::new(),
            },
            outstanding: HashSet::new(),
            missing: Vec::new(),
            state: CoordinatorState::Created,
            deadline: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn is_complete(&self) -> bool {
        self.state == CoordinatorState::Complete
    }

    pub fn client_gone(&self) -> bool {
        self.client.is_closed()
    }

    /// Send the wrapped subquery to every destination. Peers that cannot
    /// be reached at all go straight onto the missing list; the rest are
    /// awaited.
    pub async fn dispatch(
        &mut self,
        pool: &ConnectionPool,
        destinations: &[NodeInfo],
        event: Event,
    ) {
        for dest in destinations {
            let outcome = pool.send(dest, event.clone()).await;
            self.record_outcome(dest.address(), outcome);
        }
        self.finish_dispatch();
    }

    pub fn record_outcome(&mut self, addr: String, outcome: SendOutcome) {
        if outcome.delivered() {
            self.outstanding.insert(addr);
        } else {
            tracing::warn!("{}: could not reach {}", self.id, addr);
            self.missing.push(addr);
        }
    }

    /// Settle the post-dispatch state: if nobody was reachable the request
    /// completes immediately with whatever it has.
    pub fn finish_dispatch(&mut self) {
        if self.outstanding.is_empty() {
            self.complete();
        } else {
            self.state = CoordinatorState::Waiting;
        }
    }

    /// Merge one peer's reply. Returns true when this was the last
    /// expected reply and the final response has been sent.
    pub fn on_response(&mut self, event: &Event) -> bool {
        if self.state == CoordinatorState::Complete {
            return true;
        }
        let host = match event {
            Event::QueryResponse { payload, .. } => {
                let host = payload.host().map(str::to_owned);
                if let Accumulator::Query(agg) = &mut self.accumulator {
                    merge_query(agg, payload);
                }
                host
            }
            Event::MetadataResponse {
                host,
                result_json,
                error,
                ..
            } => {
                if let Accumulator::Metadata {
                    results, errors, ..
                } = &mut self.accumulator
                {
                    merge_metadata(results, errors, host, result_json, error);
                }
                Some(host.clone())
            }
            other => {
                tracing::warn!("{}: unmergeable reply {:?}", self.id, other);
                None
            }
        };
        if let Some(host) = host {
            self.outstanding.remove(&host);
        }
        if self.outstanding.is_empty() {
            self.complete();
        }
        self.is_complete()
    }

    /// A peer's connection dropped; a reply from it can no longer arrive,
    /// so it counts as missing right away. Returns true when that was the
    /// last peer and the final response has been sent.
    pub fn on_peer_gone(&mut self, peer: &str) -> bool {
        if self.state == CoordinatorState::Complete {
            return true;
        }
        if self.outstanding.remove(peer) {
            tracing::warn!("{}: {} disconnected before replying", self.id, peer);
            self.missing.push(peer.to_owned());
            if self.outstanding.is_empty() {
                self.complete();
            }
        }
        self.is_complete()
    }

    /// The deadline fired: every peer still outstanding counts as an empty
    /// reply and lands in `missing`.
    pub fn on_deadline(&mut self) {
        if self.state == CoordinatorState::Complete {
            return;
        }
        let mut late: Vec<String> = self.outstanding.drain().collect();
        late.sort();
        for host in late {
            tracing::warn!("{}: no reply from {} before deadline", self.id, host);
            self.missing.push(host);
        }
        self.complete();
    }

    /// Client disconnect: complete without sending anything.
    pub fn cancel(&mut self) {
        self.state = CoordinatorState::Complete;
    }

    fn complete(&mut self) {
        if self.state == CoordinatorState::Complete {
            return;
        }
        self.state = CoordinatorState::Complete;
        let reply = self.final_reply();
        if !self.client.send(reply) {
            tracing::warn!("{}: client gone before the final reply", self.id);
        }
    }

    fn final_reply(&mut self) -> Event {
        match &mut self.accumulator {
            Accumulator::Query(agg) => {
                agg.missing = self.missing.clone();
                Event::QueryResponse {
                    query_id: self.id.clone(),
                    payload: QueryPayload::Aggregate(agg.clone()),
                }
            }
            Accumulator::Metadata {
                kind,
                results,
                errors,
            } => {
                let result_json =
                    serde_json::to_string(&serde_json::Value::Array(results.clone())).ok();
                let error = if errors.is_empty() {
                    None
                } else {
                    let joined: Vec<String> = errors
                        .iter()
                        .map(|(host, e)| format!("{}: {}", host, e))
                        .collect();
                    Some(joined.join("; "))
                };
                Event::MetadataResponse {
                    request_id: self.id.clone(),
                    kind: *kind,
                    host: self.host.clone(),
                    result_json,
                    error,
                    missing: self.missing.clone(),
                }
            }
        }
    }
}

fn merge_query(agg: &mut QueryAggregate, payload: &QueryPayload) {
    match payload {
        QueryPayload::Rows {
            host,
            features,
            rows,
        } => {
            if agg.features.is_empty() {
                agg.features = features.clone();
            }
            agg.host_result_sizes
                .insert(host.clone(), rows.len() as u64);
            agg.total_result_size += rows.len() as u64;
            agg.rows.extend(rows.iter().cloned());
        }
        QueryPayload::Spool {
            host,
            file,
            result_size,
        } => {
            if let Some(file) = file {
                agg.files.push(file.clone());
            }
            agg.host_result_sizes.insert(host.clone(), *result_size);
            agg.total_result_size += result_size;
        }
        QueryPayload::Blocks { host, blocks } => {
            let mut count = 0u64;
            for (cell, paths) in blocks {
                count += paths.len() as u64;
                agg.blocks
                    .entry(cell.clone())
                    .or_default()
                    .extend(paths.iter().cloned());
            }
            agg.host_result_sizes.insert(host.clone(), count);
            agg.total_result_size += count;
        }
        QueryPayload::Error { host, message } => {
            agg.errors.insert(host.clone(), message.clone());
        }
        QueryPayload::Aggregate(_) => {}
    }
}

fn merge_metadata(
    results: &mut Vec<serde_json::Value>,
    errors: &mut BTreeMap<String, String>,
    host: &str,
    result_json: &Option<String>,
    error: &Option<String>,
) {
    if let Some(error) = error {
        errors.insert(host.to_owned(), error.clone());
    }
    if let Some(text) = result_json {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Array(items)) => results.extend(items),
            Ok(other) => results.push(other),
            Err(e) => {
                errors.insert(host.to_owned(), format!("unparseable result: {}", e));
            }
        }
    }
}

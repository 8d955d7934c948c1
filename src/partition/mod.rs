//! Partitioner
//!
//! Maps record metadata to cluster nodes: a single deterministic owner for
//! writes, and the set of every possibly-matching node for queries.
//!
//! ## Mechanism
//! - **Group**: geohash of the record's point at the filesystem's spatial
//!   precision, `hash_to_long`, modulo the group count. A polygon selects
//!   the union of groups its cover touches.
//! - **Node within group**: temporal bucket ordinal modulo the
//!   filesystem's `nodes_per_group` (clamped to the group size).
//!
//! Identical `(metadata, topology)` always yields identical destinations;
//! all nodes compute placement independently and agree.

pub mod hash;


use crate::error::{NodeError, Result};
use crate::geohash::cover::covered_groups;
use crate::model::{Metadata, SpatialProperties, TemporalType};
use crate::topology::{NetworkInfo, NodeInfo};
use self::hash::{spatial_group, temporal_slot};
use std::collections::HashSet;
use std::sync::Arc;

pub struct Partitioner {
    network: Arc<NetworkInfo>,
    spatial_precision: usize,
    temporal_type: TemporalType,
    nodes_per_group: usize,
}

impl Partitioner {
    pub fn new(
        network: Arc<NetworkInfo>,
        spatial_precision: usize,
        temporal_type: TemporalType,
        nodes_per_group: usize,
    ) -> Self {
        Self {
            network,
            spatial_precision,
            temporal_type,
            nodes_per_group,
        }
    }

    /// The one node a block is written to. Requires both the spatial and
    /// temporal metadata components.
    pub fn locate_data(&self, meta: &Metadata) -> Result<NodeInfo> {
        let groups = self.network.groups();
        if groups.is_empty() {
            return Err(NodeError::Partition("network has zero groups".into()));
        }
        let group = spatial_group(meta, self.spatial_precision, groups.len())?;
        let nodes = &groups[group].nodes;
        if nodes.is_empty() {
            return Err(NodeError::Partition(format!(
                "group {} has zero nodes",
                group
            )));
        }
        let slot = temporal_slot(meta, self.temporal_type, self.effective_nodes(nodes.len()))?;
        Ok(nodes[slot].clone())
    }

    /// Every node whose records could match a query carrying any subset of
    /// the metadata components. Order is stable: groups in topology order,
    /// nodes in group order, duplicates removed.
    pub fn find_destinations(&self, meta: &Metadata) -> Result<Vec<NodeInfo>> {
        let groups = self.network.groups();
        if groups.is_empty() {
            return Err(NodeError::Partition("network has zero groups".into()));
        }

        let group_indexes: Vec<usize> = match &meta.spatial {
            None => (0..groups.len()).collect(),
            Some(SpatialProperties::Point(_)) => {
                vec![spatial_group(meta, self.spatial_precision, groups.len())?]
            }
            Some(SpatialProperties::Polygon(vertices)) => {
                covered_groups(vertices, self.spatial_precision, groups.len())?
                    .into_iter()
                    .collect()
            }
        };

        let mut destinations = Vec::new();
        let mut seen = HashSet::new();
        for gi in group_indexes {
            let nodes = &groups[gi].nodes;
            if nodes.is_empty() {
                return Err(NodeError::Partition(format!("group {} has zero nodes", gi)));
            }
            if meta.timestamp_ms.is_some() {
                let slot =
                    temporal_slot(meta, self.temporal_type, self.effective_nodes(nodes.len()))?;
                let node = nodes[slot].clone();
                if seen.insert(node.clone()) {
                    destinations.push(node);
                }
            } else {
                for node in nodes {
                    if seen.insert(node.clone()) {
                        destinations.push(node.clone());
                    }
                }
            }
        }
        Ok(destinations)
    }

    fn effective_nodes(&self, group_size: usize) -> usize {
        self.nodes_per_group.min(group_size).max(1)
    }
}

//! Network Topology
//!
//! Parses the cluster description into ordered groups of nodes.
//!
//! ## Format
//! A topology directory holds one file per group; every non-blank,
//! non-`#` line names a member as `hostname:port`. Group order (sorted
//! file names) and node order (line order) both feed the placement hash,
//! so editing either repartitions data. The structure is immutable after
//! load.

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// A single cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    pub hostname: String,
    pub port: u16,
}

impl NodeInfo {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// The dialable `host:port` form, also used as the node's identity in
    /// coordinator bookkeeping.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// An ordered set of nodes sharing a geohash-prefix bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub nodes: Vec<NodeInfo>,
}

/// The cluster layout: ordered groups of ordered nodes.
#[derive(Debug, Clone, Default)]
pub struct NetworkInfo {
    groups: Vec<Group>,
}

impl NetworkInfo {
    pub fn from_groups(groups: Vec<Group>) -> Self {
        Self { groups }
    }

    /// Load the topology from a directory of group files. Fails when the
    /// directory yields no groups or a line is not `hostname:port`.
    pub fn load(dir: &Path) -> Result<NetworkInfo> {
        let mut entries: Vec<_> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        // Directory iteration order is platform-dependent; sorted file
        // names keep group indexes stable across nodes.
        entries.sort_by_key(|e| e.file_name());

        let mut groups = Vec::new();
        for entry in entries {
            let path = entry.path();
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let contents = fs::read_to_string(&path)?;
            let mut nodes = Vec::new();
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                nodes.push(parse_node(line)?);
            }
            if !nodes.is_empty() {
                groups.push(Group { name, nodes });
            }
        }
        if groups.is_empty() {
            return Err(NodeError::Partition(format!(
                "no groups found under {}",
                dir.display()
            )));
        }
        Ok(NetworkInfo { groups })
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn all_nodes(&self) -> Vec<NodeInfo> {
        self.groups
            .iter()
            .flat_map(|g| g.nodes.iter().cloned())
            .collect()
    }

    /// Index of the group containing `node`, if any.
    pub fn group_of(&self, node: &NodeInfo) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.nodes.iter().any(|n| n == node))
    }

    /// The member whose hostname matches `host`, tolerating short vs.
    /// fully-qualified names on either side. `port` disambiguates several
    /// members on one machine.
    pub fn find_node(&self, host: &str, port: u16) -> Option<NodeInfo> {
        self.all_nodes()
            .into_iter()
            .find(|n| n.port == port && hostnames_match(&n.hostname, host))
    }

    pub fn contains_host(&self, host: &str) -> bool {
        self.all_nodes()
            .iter()
            .any(|n| hostnames_match(&n.hostname, host))
    }
}

fn hostnames_match(a: &str, b: &str) -> bool {
    let a = a.to_ascii_lowercase();
    let b = b.to_ascii_lowercase();
    if a == b {
        return true;
    }
    let short_a = a.split('.').next().unwrap_or(&a);
    let short_b = b.split('.').next().unwrap_or(&b);
    short_a == short_b
}

fn parse_node(line: &str) -> Result<NodeInfo> {
    let (host, port) = line.rsplit_once(':').ok_or_else(|| {
        NodeError::Partition(format!("malformed topology line '{}'", line))
    })?;
    let port: u16 = port.parse().map_err(|_| {
        NodeError::Partition(format!("invalid port in topology line '{}'", line))
    })?;
    if host.is_empty() {
        return Err(NodeError::Partition(format!(
            "missing hostname in topology line '{}'",
            line
        )));
    }
    Ok(NodeInfo::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_group(dir: &Path, name: &str, lines: &[&str]) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
    }

    #[test]
    fn test_load_preserves_group_and_node_order() {
        let dir = tempdir().unwrap();
        write_group(dir.path(), "alpha", &["node1:5000", "node2:5000"]);
        write_group(dir.path(), "beta", &["node3:5000", "node4:5000"]);

        let network = NetworkInfo::load(dir.path()).unwrap();
        assert_eq!(network.groups().len(), 2);
        assert_eq!(network.groups()[0].name, "alpha");
        assert_eq!(network.groups()[0].nodes[1], NodeInfo::new("node2", 5000));
        assert_eq!(network.groups()[1].nodes[0], NodeInfo::new("node3", 5000));
        assert_eq!(network.all_nodes().len(), 4);
    }

    #[test]
    fn test_load_skips_comments_and_blanks() {
        let dir = tempdir().unwrap();
        write_group(
            dir.path(),
            "alpha",
            &["# seed machines", "", "node1:5000", "  ", "node2:5001"],
        );
        let network = NetworkInfo::load(dir.path()).unwrap();
        assert_eq!(network.groups()[0].nodes.len(), 2);
    }

    #[test]
    fn test_load_rejects_empty_directory() {
        let dir = tempdir().unwrap();
        let err = NetworkInfo::load(dir.path()).unwrap_err();
        assert!(matches!(err, NodeError::Partition(_)));
    }

    #[test]
    fn test_load_rejects_malformed_line() {
        let dir = tempdir().unwrap();
        write_group(dir.path(), "alpha", &["node1"]);
        assert!(NetworkInfo::load(dir.path()).is_err());
    }

    #[test]
    fn test_find_node_tolerates_fqdn() {
        let groups = vec![Group {
            name: "alpha".into(),
            nodes: vec![NodeInfo::new("storage1.cluster.local", 5000)],
        }];
        let network = NetworkInfo::from_groups(groups);
        assert!(network.contains_host("storage1"));
        assert!(network.contains_host("STORAGE1.cluster.local"));
        assert!(!network.contains_host("storage2"));
        let found = network.find_node("storage1", 5000).unwrap();
        assert_eq!(found.hostname, "storage1.cluster.local");
        assert!(network.find_node("storage1", 5001).is_none());
    }

    #[test]
    fn test_group_of() {
        let groups = vec![
            Group {
                name: "a".into(),
                nodes: vec![NodeInfo::new("n1", 5000)],
            },
            Group {
                name: "b".into(),
                nodes: vec![NodeInfo::new("n2", 5000)],
            },
        ];
        let network = NetworkInfo::from_groups(groups);
        assert_eq!(network.group_of(&NodeInfo::new("n2", 5000)), Some(1));
        assert_eq!(network.group_of(&NodeInfo::new("n3", 5000)), None);
    }
}

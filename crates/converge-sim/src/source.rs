use std::collections::HashMap;

use anyhow::Context as _;
use converge_core::{NeighborSource, PeerRecord};
use tracing::trace;

use crate::neighbors::parse_neighbor_table;
use crate::topology::Namespace;

const NEIGHBOR_QUERY: &str = "show ipv6 ospf6 neighbor";

/// Reads neighbor tables by running `vtysh` inside each node's namespace.
pub struct VtyshNeighborSource {
    nodes: HashMap<String, Namespace>,
}

impl VtyshNeighborSource {
    /// Attaches to already-running nodes, one namespace per name.
    pub fn attach<S: AsRef<str>>(nodes: &[S]) -> Self {
        let nodes = nodes
            .iter()
            .map(|name| {
                let name = name.as_ref();
                (name.to_string(), Namespace::attach(name))
            })
            .collect();
        Self { nodes }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl NeighborSource for VtyshNeighborSource {
    fn neighbors(&self, node: &str) -> anyhow::Result<Vec<PeerRecord>> {
        let ns = self
            .nodes
            .get(node)
            .with_context(|| format!("unknown node {node}"))?;
        let output = ns.exec_checked("vtysh", &["-c", NEIGHBOR_QUERY])?;
        let peers = parse_neighbor_table(&output)
            .with_context(|| format!("parsing neighbor table of {node}"))?;
        trace!("{}: {} neighbors", node, peers.len());
        Ok(peers)
    }
}

use std::fmt;
use std::net::SocketAddr;

/// A unique ID for a given node in the grid.
pub type NodeId = u64;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GridMember {
    /// A unique ID for the given node in the grid.
    pub node_id: NodeId,
    /// The public address of the node.
    pub public_addr: SocketAddr,
}

impl GridMember {
    pub fn new(node_id: NodeId, public_addr: SocketAddr) -> Self {
        Self {
            node_id,
            public_addr,
        }
    }
}

impl fmt::Display for GridMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}@{}", self.node_id, self.public_addr)
    }
}

//! Node identity and cluster topology types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stats::PerfSample;

/// Role of a member within the measured cluster.
///
/// The wire representation is the integer under the `NodeType` key; the
/// numbering is part of the protocol and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum NodeKind {
    /// The local process, always the first roster entry
    SelfNode,
    /// The node other members attach to (mesh)
    Coordinator,
    /// A registered mesh member
    Peer,
    /// Traffic source in a client-server topology
    Client,
    /// Traffic destination in a client-server topology
    Server,
}

impl From<NodeKind> for u8 {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::SelfNode => 0,
            NodeKind::Coordinator => 1,
            NodeKind::Peer => 2,
            NodeKind::Client => 3,
            NodeKind::Server => 4,
        }
    }
}

impl TryFrom<u8> for NodeKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::SelfNode),
            1 => Ok(Self::Coordinator),
            2 => Ok(Self::Peer),
            3 => Ok(Self::Client),
            4 => Ok(Self::Server),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfNode => write!(f, "self"),
            Self::Coordinator => write!(f, "coordinator"),
            Self::Peer => write!(f, "peer"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Shape of the cluster, fixed at coordinator startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    /// Every pair of nodes measures every other pair
    Mesh,
    /// Only client-to-server edges are measured
    ClientServer,
}

impl ClusterKind {
    /// Whether a joining peer of the given kind belongs in this cluster.
    pub fn accepts(self, kind: NodeKind) -> bool {
        match self {
            Self::Mesh => kind == NodeKind::Peer,
            Self::ClientServer => matches!(kind, NodeKind::Client | NodeKind::Server),
        }
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mesh => write!(f, "mesh"),
            Self::ClientServer => write!(f, "client-server"),
        }
    }
}

/// A cluster member together with the measurements recorded against it.
///
/// `perf` maps a remote address to the sample observed on the edge toward
/// that address. On the wire an *annotated remote* carries exactly one
/// entry, keyed by its own address: the sample the measuring node produced
/// by flooding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Member role, serialized as an integer
    #[serde(rename = "NodeType")]
    pub kind: NodeKind,
    /// `host:port` the member listens on
    #[serde(rename = "Addr")]
    pub addr: String,
    /// Measurements keyed by remote address; empty until a round ran
    #[serde(rename = "Perf", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub perf: BTreeMap<String, PerfSample>,
}

impl Node {
    /// A node with no measurements attached.
    pub fn new(kind: NodeKind, addr: impl Into<String>) -> Self {
        Self {
            kind,
            addr: addr.into(),
            perf: BTreeMap::new(),
        }
    }

    /// Identity-only copy, used when building dispatch plans.
    pub fn stripped(&self) -> Self {
        Self::new(self.kind, self.addr.clone())
    }

    /// Copy of this node annotated with the sample measured toward it.
    pub fn annotated(&self, sample: PerfSample) -> Self {
        let mut node = self.stripped();
        node.perf.insert(self.addr.clone(), sample);
        node
    }
}

//! Cluster error types and result definitions.

use bottlenet_core::{ClusterKind, NodeKind};
use thiserror::Error;

/// Result type for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Cluster-specific errors.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Joining node carried no address
    #[error("peer addr cannot be empty")]
    EmptyPeerAddr,

    /// Joining node does not belong in this cluster shape
    #[error("kind mismatch: {kind} node cannot join a {cluster} cluster")]
    KindMismatch {
        /// Kind the joining node announced
        kind: NodeKind,
        /// Shape the roster was created with
        cluster: ClusterKind,
    },

    /// Address is already present in the roster
    #[error("peer {0} already registered")]
    DuplicatePeer(String),

    /// Too many requests in a flood step exceeded the latency budget
    #[error("network overloaded")]
    NetworkOverloaded,

    /// A flood writer ran past its hard deadline
    #[error("flood writer deadline exceeded")]
    DeadlineExceeded,

    /// The surrounding round context was cancelled
    #[error("round cancelled")]
    Cancelled,

    /// Transport failure talking to a remote
    #[error("request to {addr} failed: {source}")]
    Transport {
        /// Remote the request was addressed to
        addr: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// A remote endpoint answered with a non-success status
    #[error("{addr} returned HTTP {status}: {body}")]
    RemoteFailed {
        /// Remote that produced the response
        addr: String,
        /// HTTP status code
        status: u16,
        /// Plain-text error body
        body: String,
    },

    /// The perf sink reported an incomplete or failed body read
    #[error("perf sink at {addr} reported: {status}")]
    SinkStatus {
        /// Sink the flood was writing to
        addr: String,
        /// Value of the sink's final status
        status: String,
    },

    /// Dispatching a probe assignment to a node failed
    #[error("dispatch to {addr} failed: {source}")]
    Dispatch {
        /// Node that received the assignment
        addr: String,
        /// Failure that ended the dispatch
        #[source]
        source: Box<ClusterError>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal cluster error
    #[error("internal cluster error: {0}")]
    Internal(String),
}

impl ClusterError {
    /// Whether a flood step that failed with this error should fall
    /// through to the next rung of the ladder.
    pub fn downgrades_step(&self) -> bool {
        matches!(
            self,
            Self::NetworkOverloaded | Self::DeadlineExceeded | Self::Cancelled
        )
    }
}

//! Cluster membership roster.
//!
//! The roster is the process-wide ordered list of known members. The first
//! entry is always the local node and is never removed; peers are appended
//! when their `/join` registration is accepted and removed when their
//! liveness stream closes.

use std::sync::{Arc, Mutex, MutexGuard};

use bottlenet_core::{ClusterKind, Node, NodeKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ClusterError, ClusterResult};

/// Ordered membership list guarded by a mutex.
#[derive(Debug)]
pub struct Roster {
    kind: ClusterKind,
    members: Mutex<Vec<Node>>,
}

impl Roster {
    /// A roster holding only the local node.
    pub fn new(kind: ClusterKind, self_node: Node) -> Self {
        Self {
            kind,
            members: Mutex::new(vec![self_node]),
        }
    }

    /// Shape of the cluster this roster was created for.
    pub fn cluster_kind(&self) -> ClusterKind {
        self.kind
    }

    /// Address of the local node.
    pub fn self_addr(&self) -> String {
        self.lock()[0].addr.clone()
    }

    /// Kind the local node was started with.
    pub fn self_kind(&self) -> NodeKind {
        self.lock()[0].kind
    }

    /// Validate and append a joining peer.
    pub fn add_peer(&self, peer: Node) -> ClusterResult<()> {
        if peer.addr.is_empty() {
            return Err(ClusterError::EmptyPeerAddr);
        }
        if !self.kind.accepts(peer.kind) {
            return Err(ClusterError::KindMismatch {
                kind: peer.kind,
                cluster: self.kind,
            });
        }
        let mut members = self.lock();
        if members.iter().any(|m| m.addr == peer.addr) {
            return Err(ClusterError::DuplicatePeer(peer.addr));
        }
        info!(peer = %peer.addr, kind = %peer.kind, total = members.len() + 1, "peer joined");
        members.push(peer);
        Ok(())
    }

    /// Remove a peer by address. The local node is never removed.
    pub fn remove_peer(&self, addr: &str) {
        let mut members = self.lock();
        let before = members.len();
        let self_addr = members[0].addr.clone();
        members.retain(|m| m.addr != addr || m.addr == self_addr);
        if members.len() < before {
            info!(peer = %addr, total = members.len(), "peer removed");
        }
    }

    /// Cloned view of the current membership.
    pub fn snapshot(&self) -> Vec<Node> {
        self.lock().clone()
    }

    /// Number of registered peers, excluding the local node.
    pub fn peer_count(&self) -> usize {
        self.lock().len() - 1
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Node>> {
        match self.members.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // membership mutations cannot leave the list half-written
                warn!("roster mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Removes its peer from the roster when dropped.
///
/// Held by the open `/join` response; releasing the response for any
/// reason, client disconnect or server shutdown, takes the peer out of the
/// roster.
#[derive(Debug)]
pub struct LivenessGuard {
    roster: Arc<Roster>,
    addr: String,
}

impl LivenessGuard {
    /// Tie the registered peer's lifetime to this guard.
    pub fn new(roster: Arc<Roster>, addr: String) -> Self {
        Self { roster, addr }
    }
}

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        self.roster.remove_peer(&self.addr);
    }
}

/// Single-flight holder for the in-progress measurement round.
///
/// Beginning a round cancels whatever round was running before and
/// installs a fresh child of the root token under the same lock, so at
/// most one round is in flight per process.
#[derive(Debug)]
pub struct RoundSlot {
    root: CancellationToken,
    current: Mutex<CancellationToken>,
}

impl RoundSlot {
    /// A slot whose rounds are children of `root`.
    pub fn new(root: CancellationToken) -> Self {
        let current = root.child_token();
        Self {
            root,
            current: Mutex::new(current),
        }
    }

    /// Cancel the previous round and hand out the token for a new one.
    pub fn begin(&self) -> CancellationToken {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        current.cancel();
        *current = self.root.child_token();
        current.clone()
    }

    /// Cancel the round currently in flight, if any.
    pub fn cancel_current(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_roster() -> Arc<Roster> {
        Arc::new(Roster::new(
            ClusterKind::Mesh,
            Node::new(NodeKind::SelfNode, "10.0.0.1:7007"),
        ))
    }

    #[test]
    fn join_appends_in_order() {
        let roster = mesh_roster();
        roster
            .add_peer(Node::new(NodeKind::Peer, "10.0.0.2:7007"))
            .unwrap();
        roster
            .add_peer(Node::new(NodeKind::Peer, "10.0.0.3:7007"))
            .unwrap();
        let members: Vec<String> = roster.snapshot().into_iter().map(|n| n.addr).collect();
        assert_eq!(members, ["10.0.0.1:7007", "10.0.0.2:7007", "10.0.0.3:7007"]);
        assert_eq!(roster.peer_count(), 2);
    }

    #[test]
    fn empty_addr_is_rejected() {
        let roster = mesh_roster();
        let err = roster.add_peer(Node::new(NodeKind::Peer, "")).unwrap_err();
        assert!(matches!(err, ClusterError::EmptyPeerAddr));
        assert_eq!(roster.peer_count(), 0);
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let roster = mesh_roster();
        let err = roster
            .add_peer(Node::new(NodeKind::Client, "10.0.0.2:7007"))
            .unwrap_err();
        assert!(matches!(err, ClusterError::KindMismatch { .. }));

        let cs = Roster::new(
            ClusterKind::ClientServer,
            Node::new(NodeKind::Server, "10.0.0.1:7007"),
        );
        let err = cs
            .add_peer(Node::new(NodeKind::Peer, "10.0.0.2:7007"))
            .unwrap_err();
        assert!(matches!(err, ClusterError::KindMismatch { .. }));
        cs.add_peer(Node::new(NodeKind::Client, "10.0.0.2:7007"))
            .unwrap();
    }

    #[test]
    fn duplicate_addr_is_rejected() {
        let roster = mesh_roster();
        roster
            .add_peer(Node::new(NodeKind::Peer, "10.0.0.2:7007"))
            .unwrap();
        let err = roster
            .add_peer(Node::new(NodeKind::Peer, "10.0.0.2:7007"))
            .unwrap_err();
        assert!(matches!(err, ClusterError::DuplicatePeer(_)));
        assert_eq!(roster.peer_count(), 1);
    }

    #[test]
    fn self_entry_survives_removal() {
        let roster = mesh_roster();
        roster.remove_peer("10.0.0.1:7007");
        assert_eq!(roster.snapshot().len(), 1);
        assert_eq!(roster.self_addr(), "10.0.0.1:7007");
    }

    #[test]
    fn remove_matches_by_address() {
        let roster = mesh_roster();
        roster
            .add_peer(Node::new(NodeKind::Peer, "10.0.0.2:7007"))
            .unwrap();
        roster.remove_peer("10.0.0.2:7007");
        assert_eq!(roster.peer_count(), 0);
        // removing an unknown address is a no-op
        roster.remove_peer("10.0.0.9:7007");
        assert_eq!(roster.snapshot().len(), 1);
    }

    #[test]
    fn liveness_guard_removes_on_drop() {
        let roster = mesh_roster();
        roster
            .add_peer(Node::new(NodeKind::Peer, "10.0.0.2:7007"))
            .unwrap();
        let guard = LivenessGuard::new(Arc::clone(&roster), "10.0.0.2:7007".into());
        assert_eq!(roster.peer_count(), 1);
        drop(guard);
        assert_eq!(roster.peer_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_joins_neither_lose_nor_duplicate() {
        let roster = mesh_roster();
        let mut handles = Vec::new();
        for i in 0..50 {
            let roster = Arc::clone(&roster);
            handles.push(tokio::spawn(async move {
                roster.add_peer(Node::new(NodeKind::Peer, format!("10.0.1.{i}:7007")))
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(roster.snapshot().len(), 51);
        assert_eq!(roster.peer_count(), 50);
    }

    #[test]
    fn new_round_cancels_the_previous_one() {
        let slot = RoundSlot::new(CancellationToken::new());
        let first = slot.begin();
        assert!(!first.is_cancelled());
        let second = slot.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        slot.cancel_current();
        assert!(second.is_cancelled());
    }

    #[test]
    fn rounds_inherit_root_cancellation() {
        let root = CancellationToken::new();
        let slot = RoundSlot::new(root.clone());
        let round = slot.begin();
        root.cancel();
        assert!(round.is_cancelled());
    }
}

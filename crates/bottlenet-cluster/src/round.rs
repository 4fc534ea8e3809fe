//! Round orchestration and dispatch planning.
//!
//! A round is one `/start` invocation on the coordinator. The coordinator
//! measures its own edges first, then hands every other member the list of
//! remotes it must probe. The plan is a triangular decomposition in mesh
//! mode, so each unordered edge is assigned to exactly one prober; in
//! client-server mode every member receives the full roster and filters it
//! locally.

use bottlenet_core::{ClusterKind, Node, NodeKind, RoundResults};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{self, http_client};
use crate::error::{ClusterError, ClusterResult};
use crate::flood::{FloodProfile, Flooder};
use crate::roster::{Roster, RoundSlot};
use std::sync::Arc;

/// Probe assignments for one round, in roster order.
pub type DispatchPlan = Vec<(String, Vec<Node>)>;

/// Build the dispatch plan for the given membership snapshot.
pub fn build_plan(roster: &[Node], kind: ClusterKind) -> DispatchPlan {
    match kind {
        // member i probes members 0..i, so every pair lands on exactly
        // one side; index 0 (the coordinator) gets the empty list
        ClusterKind::Mesh => roster
            .iter()
            .enumerate()
            .map(|(i, member)| {
                let remotes = roster[..i].iter().map(Node::stripped).collect();
                (member.addr.clone(), remotes)
            })
            .collect(),
        // receivers filter by kind, so everyone sees the whole roster
        ClusterKind::ClientServer => roster
            .iter()
            .map(|member| {
                let remotes = roster.iter().map(Node::stripped).collect();
                (member.addr.clone(), remotes)
            })
            .collect(),
    }
}

/// One bottlenet process: its roster, its flooder and its round slot.
#[derive(Debug)]
pub struct ClusterNode {
    roster: Arc<Roster>,
    flooder: Flooder,
    client: reqwest::Client,
    rounds: RoundSlot,
    root: CancellationToken,
}

impl ClusterNode {
    /// Assemble the engine for a process with the given identity.
    pub fn new(
        kind: ClusterKind,
        self_node: Node,
        profile: FloodProfile,
        root: CancellationToken,
    ) -> ClusterResult<Self> {
        let client = http_client()?;
        Ok(Self {
            roster: Arc::new(Roster::new(kind, self_node)),
            flooder: Flooder::new(client.clone(), profile),
            client,
            rounds: RoundSlot::new(root.clone()),
            root,
        })
    }

    /// Membership list of this process.
    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    /// The shared control-plane HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Flood one remote and return its annotated copy.
    async fn probe(&self, round: &CancellationToken, remote: &Node) -> ClusterResult<Node> {
        debug!(remote = %remote.addr, "probing");
        let sample = self.flooder.flood(round, &remote.addr).await?;
        Ok(remote.annotated(sample))
    }

    /// Execute a full measurement round. Coordinator side of `/start`.
    pub async fn run_round(&self) -> ClusterResult<RoundResults> {
        let round = self.rounds.begin();
        let kind = self.roster.cluster_kind();
        let members = self.roster.snapshot();
        let self_addr = members[0].addr.clone();
        info!(members = members.len(), cluster = %kind, "starting measurement round");

        let mut results = RoundResults::new();

        // the coordinator measures first so its self-originated edges are
        // carried by its own result entry; in client-server mode it is not
        // a traffic endpoint and the plan covers everything
        let mut own = Vec::with_capacity(members.len().saturating_sub(1));
        if kind == ClusterKind::Mesh {
            for peer in members.iter().skip(1) {
                own.push(self.probe(&round, peer).await?);
            }
        }
        results.insert(self_addr.clone(), own);

        for (addr, remotes) in build_plan(&members, kind) {
            if kind == ClusterKind::Mesh && addr == self_addr {
                continue;
            }
            // a restarted round cancels this one; stop fanning out
            let dispatched = tokio::select! {
                _ = round.cancelled() => return Err(ClusterError::Cancelled),
                dispatched = client::do_dispatch(&self.client, &addr, &remotes) => dispatched,
            };
            let annotated = dispatched.map_err(|err| ClusterError::Dispatch {
                addr: addr.clone(),
                source: Box::new(err),
            })?;
            results.insert(addr, annotated);
        }

        info!(entries = results.len(), "round complete");
        round.cancel();
        Ok(results)
    }

    /// Probe the assigned remotes and annotate them. Receiver side of
    /// `/dispatch`.
    ///
    /// The probes run under a fresh child of the root token rather than
    /// the round slot: the slot belongs to the coordinator role, and a
    /// coordinator dispatching to its own address must not cancel the
    /// round it is running. Abandoned dispatches unwind with their
    /// request future.
    pub async fn run_dispatch(&self, remotes: Vec<Node>) -> ClusterResult<Vec<Node>> {
        let self_kind = self.roster.self_kind();
        let self_addr = self.roster.self_addr();

        // servers are probed, they never probe
        if self_kind == NodeKind::Server {
            return Ok(Vec::new());
        }

        let token = self.root.child_token();
        let mut annotated = Vec::with_capacity(remotes.len());
        for remote in remotes {
            if remote.addr == self_addr {
                continue;
            }
            if self_kind == NodeKind::Client && remote.kind != NodeKind::Server {
                continue;
            }
            annotated.push(self.probe(&token, &remote).await?);
        }
        Ok(annotated)
    }
}

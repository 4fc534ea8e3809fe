//! Per-node bottleneck ranking over a completed round.
//!
//! The score of a node is the highest `Throughput.max` seen on any edge
//! incident to it, in either direction. Under the assumption that a node's
//! inbound and outbound capacity are symmetric, a node whose best edge is
//! slow is slow itself; sorting ascending puts the bottlenecks first.

use std::collections::BTreeMap;

use crate::node::Node;

/// Result map of one round: measuring address to its annotated remotes.
pub type RoundResults = BTreeMap<String, Vec<Node>>;

/// One node's position in the ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RankEntry {
    /// Node address
    pub addr: String,
    /// Best incident `Throughput.max`, in bytes per second
    pub score: f64,
    /// Score normalized by the number of potential edges (`nodes - 1`)
    pub normalized: f64,
}

/// Ranking of every node that took part in a round, slowest first.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    /// Entries sorted ascending by score
    pub entries: Vec<RankEntry>,
    /// Highest normalized score across the cluster
    pub max: f64,
    /// Mean normalized score across the cluster
    pub avg: f64,
}

impl Ranking {
    /// Derive the ranking from a round's result map.
    ///
    /// Returns an empty ranking when fewer than two nodes are present;
    /// there are no edges to score in that case.
    pub fn from_results(results: &RoundResults) -> Self {
        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        let mut bump = |addr: &str, value: f64| {
            let entry = scores.entry(addr.to_string()).or_insert(0.0);
            if value > *entry {
                *entry = value;
            }
        };

        for (measurer, remotes) in results {
            bump(measurer, 0.0);
            for remote in remotes {
                for (probed, sample) in &remote.perf {
                    // every edge counts toward both of its endpoints
                    bump(measurer, sample.throughput.max);
                    bump(probed, sample.throughput.max);
                }
            }
        }

        if scores.len() < 2 {
            return Self::default();
        }

        let edges = (scores.len() - 1) as f64;
        let mut entries: Vec<RankEntry> = scores
            .into_iter()
            .map(|(addr, score)| RankEntry {
                addr,
                score,
                normalized: score / edges,
            })
            .collect();
        entries.sort_by(|a, b| a.score.total_cmp(&b.score));

        let max = entries
            .iter()
            .map(|e| e.normalized)
            .fold(f64::NEG_INFINITY, f64::max);
        let avg = entries.iter().map(|e| e.normalized).sum::<f64>() / entries.len() as f64;

        Self { entries, max, avg }
    }
}

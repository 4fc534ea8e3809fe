//! # Bottlenet Core
//!
//! Data model shared by every bottlenet process: node identity, the wire
//! representation of measurement results, the statistical summaries produced
//! by a flood, and the per-node ranking derived from a completed round.
//!
//! This crate is deliberately free of any I/O. The cluster protocol and the
//! measurement engine live in `bottlenet-cluster`; the HTTP surface lives in
//! `bottlenet-api`.

pub mod node;
pub mod ranking;
pub mod stats;

pub use node::{ClusterKind, Node, NodeKind};
pub use ranking::{RankEntry, Ranking, RoundResults};
pub use stats::{compute_perf, Latency, PerfSample, Throughput};

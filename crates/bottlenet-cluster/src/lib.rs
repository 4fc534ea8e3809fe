//! # Bottlenet Cluster
//!
//! The distributed measurement engine behind bottlenet: cluster membership,
//! the dispatch protocol that assigns probing duties, and the
//! saturation-aware flood loop that produces throughput samples.
//!
//! ## Architecture Overview
//!
//! ```text
//!   peers ──POST /join──► coordinator roster (held-open liveness stream)
//!   operator ──POST /start──► coordinator
//!   coordinator ──POST /dispatch──► every member (its probe assignment)
//!   member ──POST /perf (flood)──► each assigned remote
//! ```
//!
//! The HTTP endpoints themselves are mounted by `bottlenet-api`; this crate
//! owns everything that happens behind them.

pub mod client;
pub mod error;
pub mod flood;
pub mod roster;
pub mod round;

pub use client::{do_dispatch, do_join, do_start, http_client};
pub use error::{ClusterError, ClusterResult};
pub use flood::{FloodProfile, FloodStep, Flooder, FINAL_STATUS_HEADER, SINK_SUCCESS};
pub use roster::{LivenessGuard, Roster, RoundSlot};
pub use round::{build_plan, ClusterNode, DispatchPlan};

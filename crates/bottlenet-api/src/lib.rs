//! # Bottlenet API
//!
//! The HTTP surface of a bottlenet process. Every node, coordinator or
//! peer, serves the same four control routes:
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /join` | peer registration; the open response is the liveness channel |
//! | `POST /start` | trigger a measurement round (coordinator) |
//! | `POST /dispatch` | receive a probe assignment, return annotated remotes |
//! | `POST /perf` | the flood sink |
//!
//! The binary entry point, CLI and operator loop live here too; the
//! measurement engine itself is `bottlenet-cluster`.

pub mod cli;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod report;

use std::io;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use bottlenet_cluster::{ClusterNode, ClusterResult, FloodProfile};
use bottlenet_core::{ClusterKind, Node};
use tokio_util::sync::CancellationToken;

pub use error::ApiError;

/// Shared per-process state handed to every handler.
#[derive(Debug)]
pub struct AppState {
    /// Cluster engine for this process
    pub node: ClusterNode,
    /// Root shutdown token; cancelling it drains the server and closes
    /// every held-open liveness stream
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Assemble the state for a process with the given identity.
    pub fn new(
        kind: ClusterKind,
        self_node: Node,
        profile: FloodProfile,
        shutdown: CancellationToken,
    ) -> ClusterResult<Self> {
        Ok(Self {
            node: ClusterNode::new(kind, self_node, profile, shutdown.clone())?,
            shutdown,
        })
    }
}

/// Mount the control routes on the listener and serve until the shutdown
/// token fires.
pub async fn serve(state: Arc<AppState>, listener: std::net::TcpListener) -> io::Result<()> {
    listener.set_nonblocking(true)?;
    let data = web::Data::from(Arc::clone(&state));
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/join", web::post().to(handlers::join))
            .route("/start", web::post().to(handlers::start))
            .route("/dispatch", web::post().to(handlers::dispatch))
            .route("/perf", web::post().to(handlers::perf))
    })
    .disable_signals()
    .listen(listener)?
    .run();

    let handle = server.handle();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        handle.stop(true).await;
    });

    server.await
}

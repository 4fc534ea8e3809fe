//! Process lifecycle: the coordinator and peer runtimes.

use std::sync::Arc;

use anyhow::{Context, Result};
use bottlenet_cluster::{do_join, do_start, FloodProfile};
use bottlenet_core::Node;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::NodeConfig;
use crate::report;
use crate::{serve, AppState};

const COORDINATOR_MESSAGE: &str = "
Run the following command on each of the other nodes.
  $>_ bottlenet THIS-SERVER-ADDR
";

const CLIENT_SERVER_MESSAGE: &str = "
Run the following command on each of the server nodes.
  $>_ bottlenet --server THIS-SERVER-ADDR

Run the following command on each of the client nodes.
  $>_ bottlenet --client THIS-SERVER-ADDR
";

/// Run as the coordinator: serve the control routes and drive rounds from
/// the operator's keyboard.
pub async fn run_coordinator(config: NodeConfig, shutdown: CancellationToken) -> Result<()> {
    print_instructions(&config);

    let state = Arc::new(AppState::new(
        config.cluster_kind,
        Node::new(config.self_kind, config.advertise.clone()),
        FloodProfile::default(),
        shutdown,
    )?);
    let listener = bind_listener(&config.bind)?;

    tokio::spawn(operator_loop(Arc::clone(&state), config.advertise));
    serve(state, listener).await.context("control server failed")
}

/// Run as a peer: register with the coordinator, then serve `/dispatch`
/// and `/perf` until the liveness stream closes or the process is told to
/// stop.
pub async fn run_peer(
    config: NodeConfig,
    coordinator: String,
    shutdown: CancellationToken,
) -> Result<()> {
    println!("Connecting to {coordinator}...");

    let state = Arc::new(AppState::new(
        config.cluster_kind,
        Node::new(config.self_kind, config.advertise.clone()),
        FloodProfile::default(),
        shutdown.clone(),
    )?);

    let join_node = Node::new(config.join_kind, config.advertise);
    let response = do_join(state.node.http(), &coordinator, &join_node)
        .await
        .with_context(|| format!("could not join coordinator at {coordinator}"))?;
    info!(coordinator = %coordinator, "registered with coordinator");

    tokio::spawn(async move {
        watch_liveness(response).await;
        info!("coordinator connection closed, shutting down");
        shutdown.cancel();
    });

    let listener = bind_listener(&config.bind)?;
    serve(state, listener).await.context("control server failed")
}

/// Block on the held-open registration response. Returns when the
/// coordinator goes away, however it goes away.
async fn watch_liveness(mut response: reqwest::Response) {
    loop {
        match response.chunk().await {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return,
        }
    }
}

/// Read the operator's keyboard: any plain enter starts a round, `y`
/// reruns one.
async fn operator_loop(state: Arc<AppState>, self_addr: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("press enter to begin the tests once all nodes have joined...");

    loop {
        let line = tokio::select! {
            _ = state.shutdown.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            // stdin closed: stay up for remote /start calls only
            _ => return,
        };
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("y") {
            continue;
        }
        if state.node.roster().peer_count() == 0 {
            println!("no peers have joined yet...");
            continue;
        }

        println!("running bottlenet tests...");
        match do_start(state.node.http(), &self_addr).await {
            Ok(results) => {
                report::print_results(&results);
                match report::save_results(&results) {
                    Ok(path) => println!("Bottlenet results saved to {}", path.display()),
                    Err(err) => warn!(error = %err, "could not persist results"),
                }
            }
            Err(err) => eprintln!("bottlenet round failed: {err}"),
        }
        println!();
        println!("press Ctrl+C to exit, 'y' + enter to rerun...");
    }
}

fn print_instructions(config: &NodeConfig) {
    let template = match config.cluster_kind {
        bottlenet_core::ClusterKind::Mesh => COORDINATOR_MESSAGE,
        bottlenet_core::ClusterKind::ClientServer => CLIENT_SERVER_MESSAGE,
    };
    println!("{}", template.replace("THIS-SERVER-ADDR", &config.advertise));
}

fn bind_listener(bind: &str) -> Result<std::net::TcpListener> {
    std::net::TcpListener::bind(bind).with_context(|| format!("could not listen on {bind}"))
}

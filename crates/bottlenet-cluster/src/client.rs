//! HTTP client plumbing for the control plane.
//!
//! Control calls (`/join`, `/start`, `/dispatch`) share one tuned client.
//! None of them carry a request timeout: a `/dispatch` blocks for as long
//! as the remote's whole flood takes, and a `/join` response is held open
//! for the lifetime of the registration. Flood writers add their own hard
//! deadline per request.

use std::time::Duration;

use bottlenet_core::{Node, RoundResults};
use reqwest::Client;

use crate::error::{ClusterError, ClusterResult};

/// Build the shared control/flood HTTP client.
pub fn http_client() -> ClusterResult<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .tcp_keepalive(Some(Duration::from_secs(10)))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(100)
        .build()
        .map_err(|err| ClusterError::Internal(format!("http client: {err}")))
}

fn transport(addr: &str, source: reqwest::Error) -> ClusterError {
    ClusterError::Transport {
        addr: addr.to_string(),
        source,
    }
}

async fn check_status(addr: &str, response: reqwest::Response) -> ClusterResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|err| format!("<unreadable body: {err}>"));
    Err(ClusterError::RemoteFailed {
        addr: addr.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// Register with the coordinator.
///
/// On success the response is returned still open; the caller must keep
/// reading it, since the connection is the liveness channel.
pub async fn do_join(
    client: &Client,
    coordinator: &str,
    node: &Node,
) -> ClusterResult<reqwest::Response> {
    let response = client
        .post(format!("http://{coordinator}/join"))
        .json(node)
        .send()
        .await
        .map_err(|err| transport(coordinator, err))?;
    check_status(coordinator, response).await
}

/// Hand a node its probe assignment and await the annotated remotes.
pub async fn do_dispatch(
    client: &Client,
    addr: &str,
    remotes: &[Node],
) -> ClusterResult<Vec<Node>> {
    let response = client
        .post(format!("http://{addr}/dispatch"))
        .json(remotes)
        .send()
        .await
        .map_err(|err| transport(addr, err))?;
    check_status(addr, response)
        .await?
        .json::<Vec<Node>>()
        .await
        .map_err(|err| transport(addr, err))
}

/// Trigger a measurement round on the coordinator and fetch the result map.
pub async fn do_start(client: &Client, coordinator: &str) -> ClusterResult<RoundResults> {
    let response = client
        .post(format!("http://{coordinator}/start"))
        .send()
        .await
        .map_err(|err| transport(coordinator, err))?;
    check_status(coordinator, response)
        .await?
        .json::<RoundResults>()
        .await
        .map_err(|err| transport(coordinator, err))
}

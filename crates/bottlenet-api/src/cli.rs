//! Command-line surface and runtime configuration.

use anyhow::{bail, Context, Result};
use bottlenet_core::{ClusterKind, NodeKind};
use clap::Parser;
use tracing::warn;

/// Measure pairwise network throughput across a cluster of nodes and rank
/// the ones that bottleneck it.
#[derive(Debug, Parser)]
#[command(
    name = "bottlenet",
    version,
    about = "Find network bottlenecks across a cluster of nodes"
)]
pub struct Cli {
    /// Coordinator address to attach to; omit to run as the coordinator
    pub coordinator: Option<String>,

    /// Address to listen on
    #[arg(short, long, default_value = ":7007")]
    pub address: String,

    /// Run as a client node in a client-server topology
    #[arg(short, long, conflicts_with = "server")]
    pub client: bool,

    /// Run as a server node in a client-server topology
    #[arg(short, long)]
    pub server: bool,
}

/// Validated runtime configuration for one process.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address the HTTP server binds
    pub bind: String,
    /// Address advertised to the rest of the cluster
    pub advertise: String,
    /// Coordinator to attach to; `None` makes this process the coordinator
    pub coordinator: Option<String>,
    /// Shape of the cluster
    pub cluster_kind: ClusterKind,
    /// Kind of the local roster entry
    pub self_kind: NodeKind,
    /// Kind announced in this process's `/join` registration
    pub join_kind: NodeKind,
}

impl Cli {
    /// Validate the arguments into a runnable configuration.
    pub fn into_config(self) -> Result<NodeConfig> {
        if self.client && self.coordinator.is_none() {
            bail!("client nodes must provide a coordinator address");
        }
        if let Some(coordinator) = &self.coordinator {
            split_host_port(coordinator)
                .with_context(|| format!("invalid coordinator address '{coordinator}'"))?;
        }

        let cluster_kind = if self.client || self.server {
            ClusterKind::ClientServer
        } else {
            ClusterKind::Mesh
        };
        let (self_kind, join_kind) = if self.client {
            (NodeKind::Client, NodeKind::Client)
        } else if self.server {
            (NodeKind::Server, NodeKind::Server)
        } else {
            (NodeKind::SelfNode, NodeKind::Peer)
        };

        Ok(NodeConfig {
            bind: bind_addr(&self.address)?,
            advertise: advertised_addr(&self.address, self.coordinator.as_deref())?,
            coordinator: self.coordinator,
            cluster_kind,
            self_kind,
            join_kind,
        })
    }
}

fn split_host_port(addr: &str) -> Result<(&str, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .with_context(|| format!("address '{addr}' is not host:port"))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in '{addr}'"))?;
    if port == 0 {
        bail!("port '0' out of range (0, 65535]");
    }
    Ok((host, port))
}

fn bind_addr(address: &str) -> Result<String> {
    let (host, port) = split_host_port(address)?;
    if host.is_empty() {
        Ok(format!("0.0.0.0:{port}"))
    } else {
        Ok(format!("{host}:{port}"))
    }
}

/// The address other members use to reach this process.
///
/// An explicit listen host wins. For the bare `:port` default, a UDP
/// connect (which sends nothing) picks the local interface that routes
/// toward the coordinator, or toward a public address when this process
/// is the coordinator itself.
fn advertised_addr(address: &str, coordinator: Option<&str>) -> Result<String> {
    let (host, port) = split_host_port(address)?;
    if !host.is_empty() {
        return Ok(format!("{host}:{port}"));
    }
    let probe = coordinator.unwrap_or("8.8.8.8:80");
    match route_source_ip(probe) {
        Ok(ip) => Ok(format!("{ip}:{port}")),
        Err(err) => {
            warn!(error = %err, "could not derive a routable address, advertising loopback");
            Ok(format!("127.0.0.1:{port}"))
        }
    }
}

fn route_source_ip(probe: &str) -> std::io::Result<std::net::IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(probe)?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("bottlenet").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn bare_invocation_is_a_mesh_coordinator() {
        let config = parse(&[]).into_config().unwrap();
        assert_eq!(config.cluster_kind, ClusterKind::Mesh);
        assert_eq!(config.self_kind, NodeKind::SelfNode);
        assert!(config.coordinator.is_none());
        assert!(config.bind.ends_with(":7007"));
    }

    #[test]
    fn positional_argument_makes_a_peer() {
        let config = parse(&["10.0.0.1:7007"]).into_config().unwrap();
        assert_eq!(config.coordinator.as_deref(), Some("10.0.0.1:7007"));
        assert_eq!(config.join_kind, NodeKind::Peer);
    }

    #[test]
    fn client_and_server_flags_conflict() {
        let result =
            Cli::try_parse_from(["bottlenet", "-c", "-s", "10.0.0.1:7007"]);
        assert!(result.is_err());
    }

    #[test]
    fn client_without_coordinator_is_rejected() {
        let err = parse(&["-c"]).into_config().unwrap_err().to_string();
        assert!(err.contains("coordinator"), "unexpected error: {err}");
    }

    #[test]
    fn server_may_run_standalone_as_coordinator() {
        let config = parse(&["-s"]).into_config().unwrap();
        assert_eq!(config.cluster_kind, ClusterKind::ClientServer);
        assert_eq!(config.self_kind, NodeKind::Server);
        assert!(config.coordinator.is_none());
    }

    #[test]
    fn malformed_coordinator_address_is_rejected() {
        assert!(parse(&["not-an-address"]).into_config().is_err());
        assert!(parse(&["host:notaport"]).into_config().is_err());
        assert!(parse(&["host:0"]).into_config().is_err());
    }

    #[test]
    fn explicit_listen_host_is_advertised_verbatim() {
        let cli = Cli {
            coordinator: None,
            address: "192.168.1.5:9000".into(),
            client: false,
            server: false,
        };
        let config = cli.into_config().unwrap();
        assert_eq!(config.advertise, "192.168.1.5:9000");
        assert_eq!(config.bind, "192.168.1.5:9000");
    }
}

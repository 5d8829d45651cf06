//! Helpers shared by networks running tendermint consensus.

use crate::{
    genesis::{keys, Document},
    node::Node,
    Error,
};
use ibctest_runtime::{Http, Runtime};
use tracing::debug;

pub const P2P_PORT: u16 = 26656;
pub const RPC_PORT: u16 = 26657;
pub const ABCI_PORT: u16 = 26658;
pub const GRPC_PORT: u16 = 9090;

/// Block interval used by test networks.
const BLOCK_TIME: &str = "1s";

/// Peer address in `{node id}@{host}:{p2p port}` form.
pub fn peer_address(node_id: &str, hostname: &str) -> String {
    format!("{node_id}@{hostname}:{P2P_PORT}")
}

/// Comma-separated peers for node `index`, excluding itself.
pub fn peer_string(peers: &[String], index: usize) -> String {
    peers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, peer)| peer.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Ask the node's binary for its p2p node id.
pub async fn node_id<E: Runtime>(node: &Node<E>, cmd: Vec<String>) -> Result<String, Error> {
    let command = cmd.join(" ");
    let output = node.run_job("node-id", cmd).await?;
    let id = output.stdout.trim();
    if id.is_empty() {
        return Err(Error::UnexpectedOutput {
            command,
            output: output.stderr,
        });
    }
    Ok(id.to_string())
}

/// Rewrite `config/config.toml` so the node dials `peers`, serves RPC on
/// every interface, and produces blocks quickly.
pub fn configure<E: Runtime>(node: &Node<E>, peers: &str) -> Result<(), Error> {
    let path = node.path("config/config.toml");
    let raw = std::fs::read_to_string(&path)?;
    let mut doc = Document::from_toml(&raw)?;
    doc.set(&keys(["p2p", "persistent_peers"]), peers)?;
    doc.set(&keys(["p2p", "allow_duplicate_ip"]), true)?;
    doc.set(&keys(["p2p", "addr_book_strict"]), false)?;
    doc.set(&keys(["rpc", "laddr"]), format!("tcp://0.0.0.0:{RPC_PORT}"))?;
    doc.set(&keys(["rpc", "cors_allowed_origins"]), vec!["*"])?;
    doc.set(&keys(["consensus", "timeout_commit"]), BLOCK_TIME)?;
    doc.set(&keys(["consensus", "timeout_propose"]), BLOCK_TIME)?;
    std::fs::write(&path, doc.to_toml()?)?;
    debug!(node = node.name(), peers, "configured tendermint");
    Ok(())
}

/// Latest block height reported by the RPC endpoint at `host` (`ip:port`).
pub async fn height<H: Http>(http: &H, host: &str) -> Result<u64, Error> {
    let url = format!("http://{host}/status");
    let status = http
        .get(&url)
        .await
        .map_err(crate::node::runtime(host, "status"))?;
    let status = Document::new(status);
    let raw = status.require(&keys(["result", "sync_info", "latest_block_height"]))?;
    raw.as_str()
        .and_then(|height| height.parse().ok())
        .ok_or_else(|| Error::UnexpectedOutput {
            command: url,
            output: raw.to_string(),
        })
}

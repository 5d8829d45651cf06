//! Parachain collators.

use super::{multiaddr, AUTHORITIES, P2P_PORT, PROMETHEUS_PORT, RPC_PORT, WS_PORT};
use crate::{
    command,
    genesis::{keys, Document},
    node::Node,
    Error, ParachainConfig,
};
use ibctest_cryptography::identity::node_key;
use ibctest_runtime::Runtime;

/// Values a relay chain needs to register a parachain at genesis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Export {
    pub id: u64,
    pub genesis_head: String,
    pub validation_code: String,
}

/// A collator of one parachain.
pub struct ParachainNode<E: Runtime> {
    pub node: Node<E>,
    config: ParachainConfig,
    node_key: String,
    peer_id: String,
}

impl<E: Runtime> ParachainNode<E> {
    pub fn new(node: Node<E>, config: ParachainConfig) -> Result<Self, Error> {
        let (node_key, peer_id) = node_key(&node.name())?;
        Ok(Self {
            node,
            config,
            node_key,
            peer_id,
        })
    }

    pub fn config(&self) -> &ParachainConfig {
        &self.config
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn multiaddr(&self) -> String {
        multiaddr(&self.node.hostname(), &self.peer_id)
    }

    async fn trimmed(&self, label: &str, subcommand: &str) -> Result<String, Error> {
        let output = self
            .node
            .run_job(
                label,
                command![
                    self.config.bin,
                    subcommand,
                    format!("--chain={}", self.config.chain_id)
                ],
            )
            .await?;
        let value = output.stdout.trim();
        if value.is_empty() {
            return Err(Error::UnexpectedOutput {
                command: format!("{} {subcommand}", self.config.bin),
                output: output.stderr,
            });
        }
        Ok(value.to_string())
    }

    /// Read the parachain id, genesis head, and validation code from the binary.
    pub async fn export(&self) -> Result<Export, Error> {
        let spec = self.trimmed("para-id", "build-spec").await?;
        let spec = Document::parse(spec.as_bytes())?;
        let id = spec
            .require(&keys(["para_id"]))?
            .as_u64()
            .ok_or_else(|| Error::UnexpectedOutput {
                command: format!("{} build-spec", self.config.bin),
                output: spec.root().to_string(),
            })?;
        let genesis_head = self.trimmed("genesis-state", "export-genesis-state").await?;
        let validation_code = self.trimmed("genesis-wasm", "export-genesis-wasm").await?;
        Ok(Export {
            id,
            genesis_head,
            validation_code,
        })
    }

    /// Collator command line, embedding a relay chain node that reads `relay_spec`.
    pub fn command(&self, relay_spec: &str) -> Vec<String> {
        let home = self.node.home();
        let mut cmd = command![
            self.config.bin,
            format!("--ws-port={WS_PORT}"),
            "--collator",
            format!("--node-key={}", self.node_key),
            format!("--{}", AUTHORITIES[self.node.index()]),
            "--unsafe-ws-external",
            "--unsafe-rpc-external",
            "--prometheus-external",
            "--rpc-cors=all",
            format!("--prometheus-port={PROMETHEUS_PORT}"),
            format!("--listen-addr=/ip4/0.0.0.0/tcp/{P2P_PORT}"),
            format!("--public-addr={}", self.multiaddr()),
            format!("--rpc-port={RPC_PORT}"),
            "--base-path",
            home,
            format!("--chain={}", self.config.chain_id)
        ];
        cmd.extend(self.config.flags.iter().cloned());
        cmd.push("--".to_string());
        cmd.push(format!("--chain={relay_spec}"));
        cmd.extend(self.config.relay_chain_flags.iter().cloned());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DockerImage,
        mocks,
        node::{Scope, Template},
    };
    use ibctest_runtime::{deterministic, Runner as _};
    use std::path::Path;

    fn composable() -> ParachainConfig {
        ParachainConfig {
            chain_id: "dali-dev".to_string(),
            bin: "composable".to_string(),
            image: DockerImage::new("ghcr.io/strangelove-ventures/heighliner/composable"),
            nodes: 1,
            flags: vec!["--execution=wasm".to_string()],
            relay_chain_flags: vec!["--execution=wasm".to_string()],
        }
    }

    fn node<E: Runtime>(context: E, home: &Path) -> ParachainNode<E> {
        let config = composable();
        let template = Template {
            prefix: config.bin.clone(),
            chain_id: config.chain_id.clone(),
            chain_name: "polkadot".to_string(),
            image: config.image.clone(),
            ports: vec![WS_PORT, P2P_PORT, PROMETHEUS_PORT, RPC_PORT],
        };
        let scope = Scope::new("para", home, "ibctest");
        ParachainNode::new(Node::new(context, scope, template, 0), config).unwrap()
    }

    #[test]
    fn test_command() {
        deterministic::Runner::default().start(|context| async move {
            let para = node(context, Path::new("/tmp"));
            assert_eq!(para.node.name(), "composable-0-dali-dev-para");
            let cmd = para.command("/home/.polkadot/rococo-local-raw.json");
            assert_eq!(cmd[0], "composable");
            assert!(cmd.contains(&"--alice".to_string()));
            assert!(!cmd.iter().any(|arg| arg == "--home"));
            let separator = cmd.iter().position(|arg| arg == "--").unwrap();
            assert_eq!(cmd[separator - 1], "--execution=wasm");
            assert_eq!(cmd[separator - 2], "--chain=dali-dev");
            assert_eq!(
                cmd[separator + 1..],
                [
                    "--chain=/home/.polkadot/rococo-local-raw.json".to_string(),
                    "--execution=wasm".to_string()
                ]
            );
            assert!(para.multiaddr().starts_with(
                "/dns4/composable-0-dali-dev-para/tcp/27452/p2p/12D3KooW"
            ));
        });
    }

    #[test]
    fn test_export() {
        deterministic::Runner::new(mocks::config()).start(|context| async move {
            let home = tempfile::tempdir().unwrap();
            let para = node(context.clone(), home.path());
            para.node.mkdir().unwrap();
            let export = para.export().await.unwrap();
            assert_eq!(export.id, 2000);
            assert!(export.genesis_head.starts_with("0x"));
            assert_eq!(export.validation_code, "0x0061736d");
            assert!(context.container_names().is_empty());
        });
    }
}

//! Polkadot relay chains with parachains.
//!
//! Every parachain group exports its id, genesis head, and validation code
//! while the first relay node emits a chain spec template. The template is
//! filled with authorities, balances, and the parachain table, converted to a
//! raw spec, and copied to every relay and parachain node. Relay validators
//! are fully started before any collator container is created.

use crate::{
    command,
    genesis::{keys, Document},
    lifecycle::{Lifecycle, Stage},
    liveness::{self, Budget},
    node::{distribute, pull_images, Node, Scope, Template},
    phase, ChainConfig, Error, Network, ParachainConfig, WalletAmount, BLOCKS_UNTIL_LIVE,
};
use ibctest_runtime::{Http, Output, Runtime};
use serde_json::json;
use std::path::Path;
use tracing::info;

pub mod parachain;
use parachain::ParachainNode;
pub mod relay;
use relay::RelayNode;

pub const WS_PORT: u16 = 27451;
pub const P2P_PORT: u16 = 27452;
pub const PROMETHEUS_PORT: u16 = 27453;
pub const RPC_PORT: u16 = 27454;

/// Well-known development authorities, in validator order.
pub const AUTHORITIES: [&str; 5] = ["alice", "bob", "charlie", "dave", "ferdie"];

/// SS58 address format of the generic substrate network.
pub const SS58_NETWORK: u16 = 42;

const RELAY_PREFIX: &str = "relaychain";

/// libp2p address of a node reachable by hostname.
pub fn multiaddr(host: &str, peer_id: &str) -> String {
    format!("/dns4/{host}/tcp/{P2P_PORT}/p2p/{peer_id}")
}

/// Latest block number reported by `chain_getHeader`.
pub async fn height<H: Http>(http: &H, host: &str) -> Result<u64, Error> {
    let url = format!("http://{host}");
    let body = json!({"jsonrpc": "2.0", "id": 1, "method": "chain_getHeader", "params": []});
    let response = http
        .post(&url, &body)
        .await
        .map_err(crate::node::runtime(host, "chain_getHeader"))?;
    let response = Document::new(response);
    let raw = response.require(&keys(["result", "number"]))?;
    raw.as_str()
        .and_then(|number| u64::from_str_radix(number.trim_start_matches("0x"), 16).ok())
        .ok_or_else(|| Error::UnexpectedOutput {
            command: "chain_getHeader".to_string(),
            output: raw.to_string(),
        })
}

/// A relay chain and the collators of its parachains.
pub struct PolkadotChain<E: Runtime> {
    context: E,
    config: ChainConfig,
    validators: usize,
    parachains: Vec<ParachainConfig>,
    budget: Budget,
    relay: Vec<RelayNode<E>>,
    parachain_nodes: Vec<Vec<ParachainNode<E>>>,
    lifecycle: Lifecycle,
}

impl<E: Runtime> PolkadotChain<E> {
    pub fn new(
        context: E,
        config: ChainConfig,
        validators: usize,
        parachains: Vec<ParachainConfig>,
    ) -> Self {
        let lifecycle = Lifecycle::new(&config.chain_id);
        Self {
            context,
            config,
            validators,
            parachains,
            budget: Budget::default(),
            relay: Vec::new(),
            parachain_nodes: Vec::new(),
            lifecycle,
        }
    }

    /// Override how long to wait for block production.
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn relay(&self) -> &[RelayNode<E>] {
        &self.relay
    }

    pub fn parachain_nodes(&self) -> &[Vec<ParachainNode<E>>] {
        &self.parachain_nodes
    }

    pub fn parachains(&self) -> &[ParachainConfig] {
        &self.parachains
    }

    fn spec_file(&self) -> String {
        format!("{}.json", self.config.chain_id)
    }

    fn raw_spec_file(&self) -> String {
        format!("{}-raw.json", self.config.chain_id)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.validators == 0 || self.validators > AUTHORITIES.len() {
            return Err(Error::InvalidConfig(format!(
                "relay chain needs between 1 and {} validators, got {}",
                AUTHORITIES.len(),
                self.validators
            )));
        }
        if let Some(para) = self
            .parachains
            .iter()
            .find(|para| para.nodes == 0 || para.nodes > AUTHORITIES.len())
        {
            return Err(Error::InvalidConfig(format!(
                "parachain {} needs between 1 and {} nodes, got {}",
                para.chain_id,
                AUTHORITIES.len(),
                para.nodes
            )));
        }
        Ok(())
    }

    fn build_nodes(&mut self, scope: &std::sync::Arc<Scope>) -> Result<(), Error> {
        let ports = vec![WS_PORT, P2P_PORT, PROMETHEUS_PORT, RPC_PORT];
        let template = Template {
            prefix: RELAY_PREFIX.to_string(),
            chain_id: self.config.chain_id.clone(),
            chain_name: self.config.name.clone(),
            image: self.config.images[0].clone(),
            ports: ports.clone(),
        };
        self.relay = (0..self.validators)
            .map(|i| {
                let node = Node::new(self.context.clone(), scope.clone(), template.clone(), i);
                RelayNode::new(node)
            })
            .collect::<Result<_, _>>()?;
        self.parachain_nodes = self
            .parachains
            .iter()
            .map(|para| {
                let template = Template {
                    prefix: para.bin.clone(),
                    chain_id: para.chain_id.clone(),
                    chain_name: self.config.name.clone(),
                    image: para.image.clone(),
                    ports: ports.clone(),
                };
                (0..para.nodes)
                    .map(|i| {
                        let node =
                            Node::new(self.context.clone(), scope.clone(), template.clone(), i);
                        ParachainNode::new(node, para.clone())
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<_, _>>()?;
        self.nodes().try_for_each(|node| node.mkdir())
    }

    /// Every relay and parachain node.
    fn nodes(&self) -> impl Iterator<Item = &Node<E>> {
        self.relay.iter().map(|relay| &relay.node).chain(
            self.parachain_nodes
                .iter()
                .flatten()
                .map(|para| &para.node),
        )
    }

    fn designated(&self) -> Option<&Node<E>> {
        self.relay.first().map(|relay| &relay.node)
    }

    async fn bootstrap(&mut self, extra: &[WalletAmount]) -> Result<(), Error> {
        let first = &self.relay[0].node;
        let (template, exports) = futures::try_join!(
            first.run_job(
                "chain-spec",
                command![
                    self.config.bin,
                    "build-spec",
                    format!("--chain={}", self.config.chain_id),
                    "--disable-default-bootnode"
                ],
            ),
            phase::join_indexed(self.parachain_nodes.len(), |i| {
                self.parachain_nodes[i][0].export()
            }),
        )?;
        let mut spec = Document::parse(template.stdout.trim().as_bytes())?;
        let boot_nodes: Vec<String> = self.relay.iter().map(RelayNode::multiaddr).collect();
        let authorities = self
            .relay
            .iter()
            .map(RelayNode::authority)
            .collect::<Result<Vec<_>, _>>()?;
        relay::assemble(&mut spec, &boot_nodes, &authorities, &exports, extra)?;

        first.write_file(&self.spec_file(), &spec.to_bytes()?)?;
        let raw = first
            .run_job(
                "raw-chain-spec",
                command![
                    self.config.bin,
                    "build-spec",
                    format!("--chain={}", first.container_path(&self.spec_file())),
                    "--raw",
                    "--disable-default-bootnode"
                ],
            )
            .await?;
        let raw = Document::parse(raw.stdout.trim().as_bytes())?;
        let bytes = raw.to_bytes()?;
        info!(
            chain = self.config.chain_id,
            sha256 = raw.sha256()?,
            parachains = exports.len(),
            "assembled chain spec"
        );
        distribute(self.nodes(), &self.raw_spec_file(), &bytes)?;
        let raw_spec = first.container_path(&self.raw_spec_file());
        self.lifecycle.advance(Stage::GenesisAssembled);

        let bin = self.config.bin.clone();
        phase::join(self.relay.iter_mut().map(|relay| {
            let cmd = relay.command(&bin, &raw_spec);
            async move { relay.node.create_and_start(cmd, &[]).await }
        }))
        .await?;
        info!(chain = self.config.chain_id, "relay chain started");
        phase::join(self.parachain_nodes.iter_mut().flatten().map(|para| {
            let cmd = para.command(&raw_spec);
            async move { para.node.create_and_start(cmd, &[]).await }
        }))
        .await?;
        self.lifecycle.advance(Stage::NodesLaunched);

        let node = self
            .designated()
            .ok_or_else(|| Error::InvalidConfig("network has no nodes".to_string()))?;
        let host = node
            .host_address(RPC_PORT)
            .ok_or_else(|| Error::MissingField(format!("{} rpc port", node.name())))?
            .to_string();
        liveness::wait_for_blocks(
            &self.context,
            &node.name(),
            BLOCKS_UNTIL_LIVE,
            self.budget,
            || height(&self.context, &host),
        )
        .await?;
        self.lifecycle.advance(Stage::Live);
        Ok(())
    }
}

impl<E: Runtime> Network for PolkadotChain<E> {
    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn stage(&self) -> Stage {
        self.lifecycle.stage()
    }

    async fn initialize(
        &mut self,
        test_name: &str,
        home_root: &Path,
        network_id: &str,
    ) -> Result<(), Error> {
        self.lifecycle.require(Stage::Uninitialized, "initialize")?;
        if let Err(err) = self.validate() {
            return self.lifecycle.settle(Err(err));
        }
        let mut images = self.config.images.clone();
        images.extend(self.parachains.iter().map(|para| para.image.clone()));
        pull_images(&self.context, &images).await;

        let scope = Scope::new(test_name, home_root, network_id);
        let result = self.build_nodes(&scope);
        self.lifecycle.settle(result)?;
        self.lifecycle.advance(Stage::Initialized);
        Ok(())
    }

    async fn start(&mut self, extra: &[WalletAmount]) -> Result<(), Error> {
        self.lifecycle.require(Stage::Initialized, "start")?;
        info!(
            chain = self.config.chain_id,
            validators = self.validators,
            parachains = self.parachains.len(),
            "starting network"
        );
        let result = self.bootstrap(extra).await;
        self.lifecycle.settle(result)
    }

    async fn cleanup(&mut self) -> Result<(), Error> {
        if self.lifecycle.stage() == Stage::Cleaned {
            return Ok(());
        }
        let relay = self.relay.iter_mut().map(|relay| &mut relay.node);
        let parachains = self
            .parachain_nodes
            .iter_mut()
            .flatten()
            .map(|para| &mut para.node);
        phase::join_settled(relay.chain(parachains).map(|node| async move {
            node.stop().await?;
            node.cleanup_home().await
        }))
        .await?;
        self.lifecycle.clean();
        Ok(())
    }

    fn rpc_address(&self) -> Option<String> {
        self.designated()
            .map(|node| format!("http://{}:{RPC_PORT}", node.hostname()))
    }

    fn grpc_address(&self) -> Option<String> {
        None
    }

    fn host_rpc_address(&self) -> Option<String> {
        let address = self.designated()?.host_address(RPC_PORT)?;
        Some(format!("http://{address}"))
    }

    fn host_grpc_address(&self) -> Option<String> {
        None
    }

    async fn height(&self) -> Result<u64, Error> {
        let host = self
            .designated()
            .and_then(|node| node.host_address(RPC_PORT))
            .ok_or(Error::InvalidStage {
                operation: "height",
                stage: self.lifecycle.stage(),
            })?;
        height(&self.context, host).await
    }

    async fn exec(&self, cmd: &[String], env: &[String]) -> Result<Output, Error> {
        let node = self.designated().ok_or(Error::InvalidStage {
            operation: "exec",
            stage: self.lifecycle.stage(),
        })?;
        node.exec(cmd, env).await
    }
}

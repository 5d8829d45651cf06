//! Cosmos SDK networks.
//!
//! Every validator initializes its home, creates a keyring wallet, funds it,
//! and signs a gentx. The first validator then funds every other validator
//! (and any extra wallets), collects all gentxs into the genesis document, and
//! applies the chain's genesis overrides. The resulting bytes are copied to
//! every node before any container is started.

use crate::{
    command,
    genesis::{keys, parse_path, Document},
    lifecycle::{Lifecycle, Stage},
    liveness::{self, Budget},
    node::{distribute, pull_images, Node, Scope, Template},
    phase, tendermint, ChainConfig, Error, Network, WalletAmount, BLOCKS_UNTIL_LIVE,
};
use ibctest_runtime::{Output, Runtime};
use std::path::Path;
use tracing::info;

/// Balance of every validator wallet at genesis.
pub const GENESIS_AMOUNT: u64 = 10_000_000_000_000;

/// Self-delegation of every validator.
pub const STAKE_AMOUNT: u64 = 1_000_000_000_000;

const VALIDATOR_PREFIX: &str = "val";
const FULL_NODE_PREFIX: &str = "fn";
const KEY_NAME: &str = "validator";
const KEYRING: &str = "test";
const GENESIS_FILE: &str = "config/genesis.json";
const GENTX_DIR: &str = "config/gentx";

/// What a node contributes to genesis.
struct Contribution {
    /// Validator wallet (absent for full nodes).
    address: Option<String>,
    peer: String,
}

/// A Cosmos SDK network of validators and full nodes.
pub struct CosmosChain<E: Runtime> {
    context: E,
    config: ChainConfig,
    validators: usize,
    full_nodes: usize,
    budget: Budget,
    nodes: Vec<Node<E>>,
    lifecycle: Lifecycle,
}

impl<E: Runtime> CosmosChain<E> {
    pub fn new(context: E, config: ChainConfig, validators: usize, full_nodes: usize) -> Self {
        let lifecycle = Lifecycle::new(&config.chain_id);
        Self {
            context,
            config,
            validators,
            full_nodes,
            budget: Budget::default(),
            nodes: Vec::new(),
            lifecycle,
        }
    }

    /// Override how long to wait for block production.
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn nodes(&self) -> &[Node<E>] {
        &self.nodes
    }

    pub fn validators(&self) -> &[Node<E>] {
        &self.nodes[..self.validators.min(self.nodes.len())]
    }

    pub fn full_nodes(&self) -> &[Node<E>] {
        &self.nodes[self.validators.min(self.nodes.len())..]
    }

    /// Node queried by [Network::height] and [Network::exec]: the first full
    /// node if there is one, otherwise the first validator.
    fn designated(&self) -> Option<&Node<E>> {
        self.full_nodes().first().or_else(|| self.validators().first())
    }

    fn template(&self, prefix: &str) -> Template {
        Template {
            prefix: prefix.to_string(),
            chain_id: self.config.chain_id.clone(),
            chain_name: self.config.name.clone(),
            image: self.config.images[0].clone(),
            ports: vec![
                tendermint::P2P_PORT,
                tendermint::RPC_PORT,
                tendermint::GRPC_PORT,
            ],
        }
    }

    async fn bootstrap(&mut self, extra: &[WalletAmount]) -> Result<(), Error> {
        let contributions = phase::join_indexed(self.nodes.len(), |i| {
            self.contribute(&self.nodes[i], i < self.validators)
        })
        .await?;
        self.assemble(&contributions, extra).await?;
        self.lifecycle.advance(Stage::GenesisAssembled);

        let peers: Vec<String> = contributions.into_iter().map(|c| c.peer).collect();
        let cmd = command![
            self.config.bin,
            "start",
            "--home",
            self.nodes[0].home(),
            "--x-crisis-skip-assert-invariants"
        ];
        phase::join(self.nodes.iter_mut().enumerate().map(|(i, node)| {
            let peers = tendermint::peer_string(&peers, i);
            let cmd = cmd.clone();
            async move {
                node.create(cmd, &[]).await?;
                tendermint::configure(node, &peers)?;
                node.start().await
            }
        }))
        .await?;
        self.lifecycle.advance(Stage::NodesLaunched);

        let node = self
            .designated()
            .ok_or_else(|| Error::InvalidConfig("network has no nodes".to_string()))?;
        let host = node
            .host_address(tendermint::RPC_PORT)
            .ok_or_else(|| Error::MissingField(format!("{} rpc port", node.name())))?
            .to_string();
        liveness::wait_for_blocks(
            &self.context,
            &node.name(),
            BLOCKS_UNTIL_LIVE,
            self.budget,
            || tendermint::height(&self.context, &host),
        )
        .await?;
        self.lifecycle.advance(Stage::Live);
        Ok(())
    }

    /// Initialize one node's home and (for validators) run its half of the key ceremony.
    async fn contribute(&self, node: &Node<E>, validator: bool) -> Result<Contribution, Error> {
        let bin = &self.config.bin;
        let home = node.home();
        node.run_job(
            "init",
            command![bin, "init", node.name(), "--chain-id", self.config.chain_id, "--home", home],
        )
        .await?;
        let address = if validator {
            let output = node
                .run_job(
                    "keys",
                    command![
                        bin,
                        "keys",
                        "add",
                        KEY_NAME,
                        "--keyring-backend",
                        KEYRING,
                        "--output",
                        "json",
                        "--home",
                        home
                    ],
                )
                .await?;
            let address = key_address(&output)?;
            self.fund(node, &address, GENESIS_AMOUNT, &self.config.denom)
                .await?;
            node.run_job(
                "gentx",
                command![
                    bin,
                    "gentx",
                    KEY_NAME,
                    format!("{STAKE_AMOUNT}{}", self.config.denom),
                    "--keyring-backend",
                    KEYRING,
                    "--chain-id",
                    self.config.chain_id,
                    "--home",
                    home
                ],
            )
            .await?;
            Some(address)
        } else {
            None
        };
        let id = tendermint::node_id(
            node,
            command![bin, "tendermint", "show-node-id", "--home", home],
        )
        .await?;
        Ok(Contribution {
            address,
            peer: tendermint::peer_address(&id, &node.hostname()),
        })
    }

    async fn fund(
        &self,
        node: &Node<E>,
        address: &str,
        amount: u64,
        denom: &str,
    ) -> Result<Output, Error> {
        node.run_job(
            "fund",
            command![
                self.config.bin,
                "add-genesis-account",
                address,
                format!("{amount}{denom}"),
                "--home",
                node.home()
            ],
        )
        .await
    }

    /// Build the final genesis on the first validator and copy it everywhere.
    async fn assemble(
        &self,
        contributions: &[Contribution],
        extra: &[WalletAmount],
    ) -> Result<(), Error> {
        let first = &self.nodes[0];
        for contribution in &contributions[1..self.validators] {
            if let Some(address) = &contribution.address {
                self.fund(first, address, GENESIS_AMOUNT, &self.config.denom)
                    .await?;
            }
        }
        for wallet in extra {
            self.fund(first, &wallet.address, wallet.amount, &wallet.denom)
                .await?;
        }
        for validator in &self.nodes[1..self.validators] {
            for entry in std::fs::read_dir(validator.path(GENTX_DIR))? {
                let entry = entry?;
                let target = first.path(GENTX_DIR).join(entry.file_name());
                std::fs::copy(entry.path(), target)?;
            }
        }
        first
            .run_job(
                "collect",
                command![self.config.bin, "collect-gentxs", "--home", first.home()],
            )
            .await?;

        let mut genesis = Document::parse(&first.read_file(GENESIS_FILE)?)?;
        for (path, value) in &self.config.genesis_overrides {
            genesis.set(&parse_path(path), value.clone())?;
        }
        let bytes = genesis.to_bytes()?;
        info!(
            chain = self.config.chain_id,
            sha256 = genesis.sha256()?,
            "assembled genesis"
        );
        distribute(&self.nodes, GENESIS_FILE, &bytes)
    }
}

/// Address of a key created with `keys add --output json`.
///
/// Depending on the SDK version the JSON is written to stdout or stderr.
fn key_address(output: &Output) -> Result<String, Error> {
    for stream in [&output.stdout, &output.stderr] {
        let Ok(value) = serde_json::from_str(stream.trim()) else {
            continue;
        };
        if let Some(address) = Document::new(value).get(&keys(["address"])) {
            if let Some(address) = address.as_str() {
                return Ok(address.to_string());
            }
        }
    }
    Err(Error::UnexpectedOutput {
        command: "keys add".to_string(),
        output: format!("{}{}", output.stdout, output.stderr),
    })
}

impl<E: Runtime> Network for CosmosChain<E> {
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
        if self.validators == 0 {
            let err = Error::InvalidConfig("at least one validator is required".to_string());
            return self.lifecycle.settle(Err(err));
        }
        pull_images(&self.context, &self.config.images).await;

        let scope = Scope::new(test_name, home_root, network_id);
        let validators = self.template(VALIDATOR_PREFIX);
        let full_nodes = self.template(FULL_NODE_PREFIX);
        let mut nodes = Vec::with_capacity(self.validators + self.full_nodes);
        for i in 0..self.validators {
            nodes.push(Node::new(
                self.context.clone(),
                scope.clone(),
                validators.clone(),
                i,
            ));
        }
        for i in 0..self.full_nodes {
            nodes.push(Node::new(
                self.context.clone(),
                scope.clone(),
                full_nodes.clone(),
                i,
            ));
        }
        let result = nodes.iter().try_for_each(|node| node.mkdir());
        self.nodes = nodes;
        self.lifecycle.settle(result)?;
        self.lifecycle.advance(Stage::Initialized);
        Ok(())
    }

    async fn start(&mut self, extra: &[WalletAmount]) -> Result<(), Error> {
        self.lifecycle.require(Stage::Initialized, "start")?;
        info!(
            chain = self.config.chain_id,
            validators = self.validators,
            full_nodes = self.full_nodes,
            "starting network"
        );
        let result = self.bootstrap(extra).await;
        self.lifecycle.settle(result)
    }

    async fn cleanup(&mut self) -> Result<(), Error> {
        if self.lifecycle.stage() == Stage::Cleaned {
            return Ok(());
        }
        phase::join_settled(self.nodes.iter_mut().map(|node| async move {
            node.stop().await?;
            node.cleanup_home().await
        }))
        .await?;
        self.lifecycle.clean();
        Ok(())
    }

    fn rpc_address(&self) -> Option<String> {
        self.designated()
            .map(|node| format!("http://{}:{}", node.hostname(), tendermint::RPC_PORT))
    }

    fn grpc_address(&self) -> Option<String> {
        self.designated()
            .map(|node| format!("{}:{}", node.hostname(), tendermint::GRPC_PORT))
    }

    fn host_rpc_address(&self) -> Option<String> {
        let address = self.designated()?.host_address(tendermint::RPC_PORT)?;
        Some(format!("http://{address}"))
    }

    fn host_grpc_address(&self) -> Option<String> {
        let address = self.designated()?.host_address(tendermint::GRPC_PORT)?;
        Some(address.to_string())
    }

    async fn height(&self) -> Result<u64, Error> {
        let host = self
            .designated()
            .and_then(|node| node.host_address(tendermint::RPC_PORT))
            .ok_or(Error::InvalidStage {
                operation: "height",
                stage: self.lifecycle.stage(),
            })?;
        tendermint::height(&self.context, host).await
    }

    async fn exec(&self, cmd: &[String], env: &[String]) -> Result<Output, Error> {
        let node = self.designated().ok_or(Error::InvalidStage {
            operation: "exec",
            stage: self.lifecycle.stage(),
        })?;
        node.exec(cmd, env).await
    }
}

//! Penumbra networks.
//!
//! Every slot is a pair of containers: a tendermint node for consensus and a
//! `pd` application node it proxies to. Validators generate a wallet and a
//! validator definition, which (together with one delegation and one liquid
//! allocation per validator) are fed to `pd testnet generate` on the first
//! validator.

use crate::{
    command,
    genesis::{keys, Document},
    lifecycle::{Lifecycle, Stage},
    liveness::{self, Budget},
    node::{distribute, pull_images, Node, Scope, Template},
    phase, tendermint, ChainConfig, Error, Network, WalletAmount, BLOCKS_UNTIL_LIVE,
};
use ibctest_runtime::{Output, Runtime};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// gRPC port served by `pd`.
pub const APP_GRPC_PORT: u16 = 8080;

/// Delegation tokens allocated to every validator.
pub const DELEGATION_AMOUNT: u64 = 100_000_000_000;

/// Liquid tokens allocated to every validator.
pub const LIQUID_AMOUNT: u64 = 1_000_000_000_000;

const TENDERMINT_PREFIX: &str = "tm";
const APP_PREFIX: &str = "pd";
const VALIDATOR_KEY: &str = "validator";
const DEFINITION_FILE: &str = "validator.json";
const VALIDATORS_FILE: &str = "validators.json";
const ALLOCATIONS_FILE: &str = "allocations.csv";
const PRIV_VALIDATOR_KEY: &str = "config/priv_validator_key.json";
const GENESIS_FILE: &str = "config/genesis.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingStream {
    pub address: String,
    pub rate_bps: i64,
}

/// Validator definition accepted by `pd testnet generate`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorDefinition {
    pub identity_key: String,
    pub consensus_key: String,
    pub name: String,
    pub website: String,
    pub description: String,
    pub funding_streams: Vec<FundingStream>,
    pub sequence_number: i64,
}

/// Tokens credited to an address at genesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub amount: u64,
    pub denom: String,
    pub address: String,
}

impl From<&WalletAmount> for Allocation {
    fn from(wallet: &WalletAmount) -> Self {
        Self {
            amount: wallet.amount,
            denom: wallet.denom.clone(),
            address: wallet.address.clone(),
        }
    }
}

/// Render allocations as the CSV read by `pd`.
pub fn allocations_csv(allocations: &[Allocation]) -> String {
    let mut csv = String::from("amount,denom,address\n");
    for allocation in allocations {
        csv.push_str(&format!(
            "{},{},{}\n",
            allocation.amount, allocation.denom, allocation.address
        ));
    }
    csv
}

/// The two allocations of validator `index`, placed at `2 * index` and `2 * index + 1`.
fn validator_allocations(definition: &ValidatorDefinition, denom: &str) -> Result<[Allocation; 2], Error> {
    let stream = definition
        .funding_streams
        .first()
        .ok_or_else(|| Error::MissingField(format!("{} funding_streams", definition.name)))?;
    Ok([
        Allocation {
            amount: DELEGATION_AMOUNT,
            denom: format!("udelegation_{}", definition.identity_key),
            address: stream.address.clone(),
        },
        Allocation {
            amount: LIQUID_AMOUNT,
            denom: denom.to_string(),
            address: stream.address.clone(),
        },
    ])
}

/// A tendermint node and the application node it proxies to.
pub struct PenumbraNode<E: Runtime> {
    pub tendermint: Node<E>,
    pub app: Node<E>,
}

struct Contribution {
    definition: Option<ValidatorDefinition>,
    peer: String,
}

/// A Penumbra network.
pub struct PenumbraChain<E: Runtime> {
    context: E,
    config: ChainConfig,
    validators: usize,
    full_nodes: usize,
    budget: Budget,
    nodes: Vec<PenumbraNode<E>>,
    lifecycle: Lifecycle,
}

impl<E: Runtime> PenumbraChain<E> {
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

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn nodes(&self) -> &[PenumbraNode<E>] {
        &self.nodes
    }

    /// Pair used for queries and key management: the first full node if
    /// there is one, otherwise the first validator.
    fn relayer(&self) -> Option<&PenumbraNode<E>> {
        self.nodes.get(self.validators).or_else(|| self.nodes.first())
    }

    fn template(&self, prefix: &str, image: usize, ports: Vec<u16>) -> Template {
        Template {
            prefix: prefix.to_string(),
            chain_id: self.config.chain_id.clone(),
            chain_name: self.config.name.clone(),
            image: self.config.images[image].clone(),
            ports,
        }
    }

    /// Generate a wallet named `name` on the relayer's application node.
    pub async fn create_key(&self, name: &str) -> Result<(), Error> {
        let pair = self.relayer().ok_or(Error::InvalidStage {
            operation: "create_key",
            stage: self.lifecycle.stage(),
        })?;
        let wallet = pair.app.container_path(&format!("keys/{name}"));
        pair.app
            .run_job("keys", command!["pcli", "-d", wallet, "keys", "generate"])
            .await?;
        Ok(())
    }

    /// First address of the wallet named `name`.
    pub async fn address(&self, name: &str) -> Result<String, Error> {
        let pair = self.relayer().ok_or(Error::InvalidStage {
            operation: "address",
            stage: self.lifecycle.stage(),
        })?;
        let wallet = pair.app.container_path(&format!("keys/{name}"));
        let output = pair
            .app
            .run_job("address", command!["pcli", "-d", wallet, "view", "address", "0"])
            .await?;
        let address = output.stdout.trim();
        if address.is_empty() {
            return Err(Error::UnexpectedOutput {
                command: "pcli view address".to_string(),
                output: output.stderr,
            });
        }
        Ok(address.to_string())
    }

    async fn contribute(
        &self,
        pair: &PenumbraNode<E>,
        index: usize,
        validator: bool,
    ) -> Result<Contribution, Error> {
        let tm = &pair.tendermint;
        let role = if validator { "validator" } else { "full" };
        tm.run_job(
            "init",
            command!["tendermint", "init", role, "--home", tm.home()],
        )
        .await?;
        let definition = if validator {
            Some(self.define(pair, index).await?)
        } else {
            None
        };
        let id = tendermint::node_id(
            tm,
            command!["tendermint", "show-node-id", "--home", tm.home()],
        )
        .await?;
        Ok(Contribution {
            definition,
            peer: tendermint::peer_address(&id, &tm.hostname()),
        })
    }

    /// Create the validator wallet and fill in its definition.
    async fn define(&self, pair: &PenumbraNode<E>, index: usize) -> Result<ValidatorDefinition, Error> {
        let key = Document::parse(&pair.tendermint.read_file(PRIV_VALIDATOR_KEY)?)?;
        let consensus_key = key
            .require(&keys(["pub_key", "value"]))?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::MissingField("pub_key.value".to_string()))?;

        let app = &pair.app;
        let wallet = app.container_path(&format!("keys/{VALIDATOR_KEY}"));
        app.run_job(
            "keys",
            command!["pcli", "-d", wallet, "keys", "generate"],
        )
        .await?;
        app.run_job(
            "template",
            command![
                "pcli",
                "-d",
                wallet,
                "validator",
                "definition",
                "template",
                "--file",
                app.container_path(DEFINITION_FILE)
            ],
        )
        .await?;
        let mut definition: ValidatorDefinition =
            serde_json::from_slice(&app.read_file(DEFINITION_FILE)?)?;
        definition.consensus_key = consensus_key;
        definition.name = format!("validator-{index}");
        definition.description = format!("validator-{index} description");
        definition.website = format!("https://validator-{index}");
        Ok(definition)
    }

    async fn bootstrap(&mut self, extra: &[WalletAmount]) -> Result<(), Error> {
        let contributions = phase::join_indexed(self.nodes.len(), |i| {
            self.contribute(&self.nodes[i], i, i < self.validators)
        })
        .await?;
        self.assemble(&contributions, extra).await?;
        self.lifecycle.advance(Stage::GenesisAssembled);

        let peers: Vec<String> = contributions.into_iter().map(|c| c.peer).collect();
        phase::join(self.nodes.iter_mut().enumerate().map(|(i, pair)| {
            let peers = tendermint::peer_string(&peers, i);
            async move {
                let PenumbraNode { tendermint: tm, app } = pair;
                let proxy = format!("--proxy-app=tcp://{}:{}", app.hostname(), tendermint::ABCI_PORT);
                let tm_cmd = command![
                    "tendermint",
                    "start",
                    "--home",
                    tm.home(),
                    proxy,
                    format!("--rpc.laddr=tcp://0.0.0.0:{}", tendermint::RPC_PORT)
                ];
                let app_cmd = command!["pd", "start", "--host", "0.0.0.0", "--home", app.home()];
                futures::try_join!(
                    async {
                        tm.create(tm_cmd, &[]).await?;
                        tendermint::configure(tm, &peers)?;
                        tm.start().await
                    },
                    app.create_and_start(app_cmd, &[]),
                )?;
                Ok::<_, Error>(())
            }
        }))
        .await?;
        self.lifecycle.advance(Stage::NodesLaunched);

        let pair = self
            .relayer()
            .ok_or_else(|| Error::InvalidConfig("network has no nodes".to_string()))?;
        let name = pair.tendermint.name();
        let host = pair
            .tendermint
            .host_address(tendermint::RPC_PORT)
            .ok_or_else(|| Error::MissingField(format!("{name} rpc port")))?
            .to_string();
        liveness::wait_for_blocks(&self.context, &name, BLOCKS_UNTIL_LIVE, self.budget, || {
            tendermint::height(&self.context, &host)
        })
        .await?;
        self.lifecycle.advance(Stage::Live);
        Ok(())
    }

    async fn assemble(
        &self,
        contributions: &[Contribution],
        extra: &[WalletAmount],
    ) -> Result<(), Error> {
        let mut definitions = Vec::with_capacity(self.validators);
        let mut allocations = Vec::with_capacity(2 * self.validators + extra.len());
        for contribution in &contributions[..self.validators] {
            let definition = contribution
                .definition
                .clone()
                .ok_or_else(|| Error::MissingField("validator definition".to_string()))?;
            allocations.extend(validator_allocations(&definition, &self.config.denom)?);
            definitions.push(definition);
        }
        allocations.extend(extra.iter().map(Allocation::from));

        let first = &self.nodes[0].app;
        first.write_file(VALIDATORS_FILE, &serde_json::to_vec_pretty(&definitions)?)?;
        first.write_file(ALLOCATIONS_FILE, allocations_csv(&allocations).as_bytes())?;
        first
            .run_job(
                "generate",
                command![
                    "pd",
                    "testnet",
                    "--testnet-dir",
                    first.home(),
                    "generate",
                    "--chain-id",
                    self.config.chain_id,
                    "--preserve-chain-id",
                    "--validators-input-file",
                    first.container_path(VALIDATORS_FILE),
                    "--allocations-input-file",
                    first.container_path(ALLOCATIONS_FILE)
                ],
            )
            .await?;

        // pd generates fresh consensus keys, so each validator must sign with
        // the one recorded in genesis rather than its own.
        // TODO: drop once `pd testnet generate` keeps the consensus keys from
        // the validators input file.
        for (i, pair) in self.nodes[..self.validators].iter().enumerate() {
            let generated = first.read_file(&format!("node{i}/tendermint/{PRIV_VALIDATOR_KEY}"))?;
            warn!(
                node = pair.tendermint.name(),
                "replacing validator key with the one generated by pd"
            );
            pair.tendermint.write_file(PRIV_VALIDATOR_KEY, &generated)?;
        }

        let genesis = first.read_file(&format!("node0/tendermint/{GENESIS_FILE}"))?;
        info!(
            chain = self.config.chain_id,
            validators = definitions.len(),
            allocations = allocations.len(),
            "generated genesis"
        );
        distribute(self.nodes.iter().map(|pair| &pair.tendermint), GENESIS_FILE, &genesis)
    }
}

impl<E: Runtime> Network for PenumbraChain<E> {
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
        if self.validators == 0 || self.config.images.len() < 2 {
            let err = Error::InvalidConfig(
                "penumbra needs a validator, a tendermint image, and a penumbra image".to_string(),
            );
            return self.lifecycle.settle(Err(err));
        }
        pull_images(&self.context, &self.config.images).await;

        let scope = Scope::new(test_name, home_root, network_id);
        let tm = self.template(
            TENDERMINT_PREFIX,
            0,
            vec![tendermint::P2P_PORT, tendermint::RPC_PORT],
        );
        let app = self.template(APP_PREFIX, 1, vec![tendermint::ABCI_PORT, APP_GRPC_PORT]);
        let nodes: Vec<_> = (0..self.validators + self.full_nodes)
            .map(|i| PenumbraNode {
                tendermint: Node::new(self.context.clone(), scope.clone(), tm.clone(), i),
                app: Node::new(self.context.clone(), scope.clone(), app.clone(), i),
            })
            .collect();
        let result = nodes
            .iter()
            .try_for_each(|pair| pair.tendermint.mkdir().and_then(|_| pair.app.mkdir()));
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
        phase::join_settled(
            self.nodes
                .iter_mut()
                .flat_map(|pair| [&mut pair.tendermint, &mut pair.app])
                .map(|node| async move {
                    node.stop().await?;
                    node.cleanup_home().await
                }),
        )
        .await?;
        self.lifecycle.clean();
        Ok(())
    }

    fn rpc_address(&self) -> Option<String> {
        self.relayer().map(|pair| {
            format!(
                "http://{}:{}",
                pair.tendermint.hostname(),
                tendermint::RPC_PORT
            )
        })
    }

    fn grpc_address(&self) -> Option<String> {
        self.relayer()
            .map(|pair| format!("{}:{}", pair.app.hostname(), APP_GRPC_PORT))
    }

    fn host_rpc_address(&self) -> Option<String> {
        let address = self.relayer()?.tendermint.host_address(tendermint::RPC_PORT)?;
        Some(format!("http://{address}"))
    }

    fn host_grpc_address(&self) -> Option<String> {
        let address = self.relayer()?.app.host_address(APP_GRPC_PORT)?;
        Some(address.to_string())
    }

    async fn height(&self) -> Result<u64, Error> {
        let host = self
            .relayer()
            .and_then(|pair| pair.tendermint.host_address(tendermint::RPC_PORT))
            .ok_or(Error::InvalidStage {
                operation: "height",
                stage: self.lifecycle.stage(),
            })?;
        tendermint::height(&self.context, host).await
    }

    async fn exec(&self, cmd: &[String], env: &[String]) -> Result<Output, Error> {
        let pair = self.relayer().ok_or(Error::InvalidStage {
            operation: "exec",
            stage: self.lifecycle.stage(),
        })?;
        pair.app.exec(cmd, env).await
    }
}

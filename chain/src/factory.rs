//! Resolve chain presets and version strings into networks.
//!
//! Resolution is pure: it never touches the container runtime or the
//! filesystem, so a bad entry fails before anything is created.

use crate::{
    cosmos::CosmosChain, liveness::Budget, penumbra::PenumbraChain, polkadot::PolkadotChain,
    ChainConfig, DockerImage, Error, Family, Network, ParachainConfig, Stage, WalletAmount,
};
use ibctest_runtime::{Output, Runtime};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};
use tracing::debug;

const HEIGHLINER: &str = "ghcr.io/strangelove-ventures/heighliner";

/// The only supported relay chain binary.
const RELAY_CHAIN: &str = "polkadot";

/// Selects a preset from a [Registry].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Preset name (for example `gaia`).
    pub name: String,
    /// Replaces the preset's name, to run two instances of the same chain.
    #[serde(default)]
    pub name_override: Option<String>,
    /// Version string, whose grammar depends on the family.
    pub version: String,
    pub chain_id: String,
    pub validators: usize,
    #[serde(default)]
    pub full_nodes: usize,
}

/// A chain described by a complete configuration instead of a preset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Custom {
    pub config: ChainConfig,
    pub validators: usize,
    #[serde(default)]
    pub full_nodes: usize,
}

/// A parachain binary known to the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParachainPreset {
    pub bin: String,
    pub chain_id: String,
    pub repository: String,
    pub flags: Vec<String>,
    pub relay_chain_flags: Vec<String>,
}

impl ParachainPreset {
    fn config(&self, image: DockerImage, nodes: usize) -> ParachainConfig {
        ParachainConfig {
            chain_id: self.chain_id.clone(),
            bin: self.bin.clone(),
            image,
            nodes,
            flags: self.flags.clone(),
            relay_chain_flags: self.relay_chain_flags.clone(),
        }
    }
}

fn heighliner(name: &str) -> DockerImage {
    DockerImage::new(&format!("{HEIGHLINER}/{name}"))
}

fn cosmos(
    name: &str,
    bin: &str,
    bech32_prefix: &str,
    denom: &str,
    gas_prices: &str,
    gas_adjustment: f64,
    trusting_period: &str,
) -> ChainConfig {
    ChainConfig {
        family: Family::Cosmos,
        name: name.to_string(),
        chain_id: String::new(),
        images: vec![heighliner(name)],
        bin: bin.to_string(),
        bech32_prefix: bech32_prefix.to_string(),
        denom: denom.to_string(),
        gas_prices: gas_prices.to_string(),
        gas_adjustment,
        trusting_period: trusting_period.to_string(),
        genesis_overrides: BTreeMap::new(),
    }
}

fn parachain(bin: &str, chain_id: &str) -> ParachainPreset {
    ParachainPreset {
        bin: bin.to_string(),
        chain_id: chain_id.to_string(),
        repository: format!("{HEIGHLINER}/{bin}"),
        flags: Vec::new(),
        relay_chain_flags: vec!["--execution=wasm".to_string()],
    }
}

/// Immutable table of chain and parachain presets.
#[derive(Clone, Debug)]
pub struct Registry {
    chains: BTreeMap<String, ChainConfig>,
    parachains: BTreeMap<String, ParachainPreset>,
}

impl Registry {
    /// Presets for every supported chain.
    pub fn builtin() -> Self {
        let mut chains = BTreeMap::new();
        for config in [
            cosmos("gaia", "gaiad", "cosmos", "uatom", "0.01uatom", 1.3, "504h"),
            cosmos("osmosis", "osmosisd", "osmo", "uosmo", "0.0uosmo", 1.3, "336h"),
            cosmos("juno", "junod", "juno", "ujuno", "0.0025ujuno", 1.3, "672h"),
            cosmos("agoric", "agd", "agoric", "urun", "0.01urun", 1.3, "672h"),
            cosmos("icad", "icad", "cosmos", "photon", "0.00photon", 1.2, "504h"),
            ChainConfig {
                family: Family::Penumbra,
                name: "penumbra".to_string(),
                chain_id: String::new(),
                images: vec![heighliner("tendermint"), heighliner("penumbra")],
                bin: "tendermint".to_string(),
                bech32_prefix: "penumbra".to_string(),
                denom: "upenumbra".to_string(),
                gas_prices: "0.0upenumbra".to_string(),
                gas_adjustment: 1.3,
                trusting_period: "672h".to_string(),
                genesis_overrides: BTreeMap::new(),
            },
            ChainConfig {
                family: Family::Polkadot,
                name: "polkadot".to_string(),
                chain_id: String::new(),
                images: vec![heighliner("polkadot")],
                bin: RELAY_CHAIN.to_string(),
                bech32_prefix: String::new(),
                denom: "uDOT".to_string(),
                gas_prices: String::new(),
                gas_adjustment: 0.0,
                trusting_period: String::new(),
                genesis_overrides: BTreeMap::new(),
            },
        ] {
            chains.insert(config.name.clone(), config);
        }
        let parachains = [parachain("composable", "dali-dev"), parachain("basilisk", "local")]
            .into_iter()
            .map(|preset| (preset.bin.clone(), preset))
            .collect();
        Self { chains, parachains }
    }

    /// Names of every chain preset, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.chains.keys().map(String::as_str).collect()
    }

    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.get(name)
    }

    pub fn parachain(&self, name: &str) -> Option<&ParachainPreset> {
        self.parachains.get(name)
    }

    /// Build the chain an [Entry] describes.
    pub fn resolve<E: Runtime>(
        &self,
        context: E,
        entry: &Entry,
        test_name: &str,
    ) -> Result<Chain<E>, Error> {
        let mut config = self
            .chains
            .get(&entry.name)
            .cloned()
            .ok_or_else(|| Error::UnknownChain {
                name: entry.name.clone(),
                available: self.names().join(", "),
            })?;
        config.chain_id = entry.chain_id.clone();
        if let Some(name) = &entry.name_override {
            config.name = name.clone();
        }
        debug!(
            test = test_name,
            chain = entry.name,
            version = entry.version,
            family = %config.family,
            "resolving chain"
        );

        let chain = match config.family {
            Family::Cosmos => {
                if entry.version.contains(',') {
                    return Err(invalid(&entry.version, "expected a single version"));
                }
                config.images[0].version = entry.version.clone();
                Chain::Cosmos(CosmosChain::new(
                    context,
                    config,
                    entry.validators,
                    entry.full_nodes,
                ))
            }
            Family::Penumbra => {
                let (penumbra, tendermint) = entry.version.split_once(',').ok_or_else(|| {
                    invalid(&entry.version, "expected penumbra_version,tendermint_version")
                })?;
                if penumbra.is_empty() || tendermint.is_empty() || tendermint.contains(',') {
                    return Err(invalid(
                        &entry.version,
                        "expected penumbra_version,tendermint_version",
                    ));
                }
                config.images[0].version = tendermint.to_string();
                config.images[1].version = penumbra.to_string();
                Chain::Penumbra(PenumbraChain::new(
                    context,
                    config,
                    entry.validators,
                    entry.full_nodes,
                ))
            }
            Family::Polkadot => {
                let (relay_version, parachains) =
                    self.parse_polkadot(&entry.version, entry.full_nodes)?;
                if entry.validators > crate::polkadot::AUTHORITIES.len() {
                    return Err(Error::InvalidConfig(format!(
                        "at most {} relay chain validators are supported, got {}",
                        crate::polkadot::AUTHORITIES.len(),
                        entry.validators
                    )));
                }
                config.images[0].version = relay_version;
                Chain::Polkadot(PolkadotChain::new(
                    context,
                    config,
                    entry.validators,
                    parachains,
                ))
            }
        };
        Ok(chain)
    }

    /// Parse `[polkadot:]relay_version{,parachain:version}`.
    fn parse_polkadot(
        &self,
        version: &str,
        nodes: usize,
    ) -> Result<(String, Vec<ParachainConfig>), Error> {
        let mut parts = version.split(',');
        let relay = parts.next().unwrap_or_default();
        let relay_version = match relay.split(':').collect::<Vec<_>>()[..] {
            [relay_version] | [RELAY_CHAIN, relay_version] => relay_version,
            [name, _] => return Err(Error::UnsupportedRelay(name.to_string())),
            _ => return Err(invalid(version, "expected [polkadot:]relay_version")),
        };
        let parachains = parts
            .map(|part| {
                let (name, para_version) = match part.split(':').collect::<Vec<_>>()[..] {
                    [name, para_version] => (name, para_version),
                    _ => {
                        return Err(invalid(
                            part,
                            "expected parachain_name:parachain_version",
                        ))
                    }
                };
                let preset = self
                    .parachains
                    .get(name)
                    .ok_or_else(|| Error::UnknownParachain(name.to_string()))?;
                let image = DockerImage {
                    repository: preset.repository.clone(),
                    version: para_version.to_string(),
                };
                Ok(preset.config(image, nodes))
            })
            .collect::<Result<_, Error>>()?;
        Ok((relay_version.to_string(), parachains))
    }

    /// Build the chain a [Custom] entry describes.
    ///
    /// For polkadot, every image after the first is a parachain whose preset
    /// is found by repository name.
    pub fn resolve_custom<E: Runtime>(&self, context: E, custom: &Custom) -> Result<Chain<E>, Error> {
        let config = custom.config.clone();
        let chain = match config.family {
            Family::Cosmos => Chain::Cosmos(CosmosChain::new(
                context,
                config,
                custom.validators,
                custom.full_nodes,
            )),
            Family::Penumbra => Chain::Penumbra(PenumbraChain::new(
                context,
                config,
                custom.validators,
                custom.full_nodes,
            )),
            Family::Polkadot => {
                let parachains = config
                    .images
                    .iter()
                    .skip(1)
                    .map(|image| {
                        let preset = self
                            .parachains
                            .values()
                            .find(|preset| image.repository.contains(&preset.bin))
                            .ok_or_else(|| Error::UnknownParachain(image.repository.clone()))?;
                        Ok(preset.config(image.clone(), custom.full_nodes))
                    })
                    .collect::<Result<_, Error>>()?;
                Chain::Polkadot(PolkadotChain::new(
                    context,
                    config,
                    custom.validators,
                    parachains,
                ))
            }
        };
        Ok(chain)
    }
}

fn invalid(version: &str, reason: &'static str) -> Error {
    Error::InvalidVersion {
        version: version.to_string(),
        reason,
    }
}

/// Where a [Factory] gets a chain from.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    Builtin(Entry),
    Custom(Custom),
}

impl Source {
    /// `name@version`
    fn label(&self) -> String {
        match self {
            Source::Builtin(entry) => format!("{}@{}", entry.name, entry.version),
            Source::Custom(custom) => {
                let version = custom
                    .config
                    .images
                    .first()
                    .map(|image| image.version.as_str())
                    .unwrap_or_default();
                format!("{}@{version}", custom.config.name)
            }
        }
    }
}

/// Produces the set of chains a test runs against.
#[derive(Clone, Debug)]
pub struct Factory {
    registry: Registry,
    sources: Vec<Source>,
}

impl Factory {
    pub fn new(registry: Registry, sources: Vec<Source>) -> Self {
        Self { registry, sources }
    }

    /// Factory over builtin presets.
    pub fn builtin(entries: Vec<Entry>) -> Self {
        Self::new(
            Registry::builtin(),
            entries.into_iter().map(Source::Builtin).collect(),
        )
    }

    /// Factory over complete configurations.
    pub fn custom(entries: Vec<Custom>) -> Self {
        Self::new(
            Registry::builtin(),
            entries.into_iter().map(Source::Custom).collect(),
        )
    }

    /// Number of chains [Factory::chains] returns.
    pub fn count(&self) -> usize {
        self.sources.len()
    }

    /// Every chain, joined with `+` (for example `gaia@v7.0.0+osmosis@v11.0.0`).
    pub fn name(&self) -> String {
        self.sources
            .iter()
            .map(Source::label)
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Resolve every chain. Fails on the first entry that does not resolve.
    pub fn chains<E: Runtime>(&self, context: &E, test_name: &str) -> Result<Vec<Chain<E>>, Error> {
        self.sources
            .iter()
            .map(|source| match source {
                Source::Builtin(entry) => self.registry.resolve(context.clone(), entry, test_name),
                Source::Custom(custom) => self.registry.resolve_custom(context.clone(), custom),
            })
            .collect()
    }
}

/// A network of any supported family.
pub enum Chain<E: Runtime> {
    Cosmos(CosmosChain<E>),
    Penumbra(PenumbraChain<E>),
    Polkadot(PolkadotChain<E>),
}

macro_rules! dispatch {
    ($chain:expr, $inner:ident => $body:expr) => {
        match $chain {
            Chain::Cosmos($inner) => $body,
            Chain::Penumbra($inner) => $body,
            Chain::Polkadot($inner) => $body,
        }
    };
}

impl<E: Runtime> Chain<E> {
    /// Override how long to wait for block production.
    pub fn with_budget(self, budget: Budget) -> Self {
        match self {
            Chain::Cosmos(chain) => Chain::Cosmos(chain.with_budget(budget)),
            Chain::Penumbra(chain) => Chain::Penumbra(chain.with_budget(budget)),
            Chain::Polkadot(chain) => Chain::Polkadot(chain.with_budget(budget)),
        }
    }

    pub fn family(&self) -> Family {
        self.config().family
    }
}

impl<E: Runtime> Network for Chain<E> {
    fn config(&self) -> &ChainConfig {
        dispatch!(self, chain => chain.config())
    }

    fn stage(&self) -> Stage {
        dispatch!(self, chain => chain.stage())
    }

    async fn initialize(
        &mut self,
        test_name: &str,
        home_root: &Path,
        network_id: &str,
    ) -> Result<(), Error> {
        dispatch!(self, chain => chain.initialize(test_name, home_root, network_id).await)
    }

    async fn start(&mut self, extra: &[WalletAmount]) -> Result<(), Error> {
        dispatch!(self, chain => chain.start(extra).await)
    }

    async fn cleanup(&mut self) -> Result<(), Error> {
        dispatch!(self, chain => chain.cleanup().await)
    }

    fn rpc_address(&self) -> Option<String> {
        dispatch!(self, chain => chain.rpc_address())
    }

    fn grpc_address(&self) -> Option<String> {
        dispatch!(self, chain => chain.grpc_address())
    }

    fn host_rpc_address(&self) -> Option<String> {
        dispatch!(self, chain => chain.host_rpc_address())
    }

    fn host_grpc_address(&self) -> Option<String> {
        dispatch!(self, chain => chain.host_grpc_address())
    }

    async fn height(&self) -> Result<u64, Error> {
        dispatch!(self, chain => chain.height().await)
    }

    async fn exec(&self, cmd: &[String], env: &[String]) -> Result<Output, Error> {
        dispatch!(self, chain => chain.exec(cmd, env).await)
    }
}

//! Chain and image configuration.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

/// Family of a chain, which decides how its network is bootstrapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Cosmos,
    Penumbra,
    Polkadot,
}

impl Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Cosmos => "cosmos",
            Family::Penumbra => "penumbra",
            Family::Polkadot => "polkadot",
        };
        f.write_str(name)
    }
}

/// A container image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerImage {
    pub repository: String,
    #[serde(default)]
    pub version: String,
}

impl DockerImage {
    pub fn new(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            version: String::new(),
        }
    }

    /// Reference accepted by the container engine. An empty version means `latest`.
    pub fn reference(&self) -> String {
        let version = if self.version.is_empty() {
            "latest"
        } else {
            &self.version
        };
        format!("{}:{}", self.repository, version)
    }
}

/// Everything needed to run a chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub family: Family,
    pub name: String,
    pub chain_id: String,
    pub images: Vec<DockerImage>,
    pub bin: String,
    #[serde(default)]
    pub bech32_prefix: String,
    pub denom: String,
    #[serde(default)]
    pub gas_prices: String,
    #[serde(default)]
    pub gas_adjustment: f64,
    #[serde(default)]
    pub trusting_period: String,
    /// Values written into the genesis document after it is assembled,
    /// keyed by dotted path (for example `consensus_params.block.max_gas`).
    #[serde(default)]
    pub genesis_overrides: BTreeMap<String, serde_json::Value>,
}

/// Configuration of a parachain attached to a relay chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParachainConfig {
    pub chain_id: String,
    pub bin: String,
    pub image: DockerImage,
    pub nodes: usize,
    pub flags: Vec<String>,
    pub relay_chain_flags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference() {
        let mut image = DockerImage::new("ghcr.io/strangelove-ventures/heighliner/gaia");
        assert_eq!(
            image.reference(),
            "ghcr.io/strangelove-ventures/heighliner/gaia:latest"
        );
        image.version = "v7.0.0".to_string();
        assert_eq!(
            image.reference(),
            "ghcr.io/strangelove-ventures/heighliner/gaia:v7.0.0"
        );
    }

    #[test]
    fn test_family_yaml() {
        let family: Family = serde_yaml::from_str("polkadot").unwrap();
        assert_eq!(family, Family::Polkadot);
        assert_eq!(family.to_string(), "polkadot");
    }
}

//! Bootstrap live, peered, block-producing test networks in containers.
//!
//! A [Network] owns a set of containerized nodes that together form one
//! blockchain. Bringing a network up happens in two steps:
//!
//! 1. [Network::initialize] pulls images, derives identities, and lays out a
//!    home directory per node. No container runs yet.
//! 2. [Network::start] runs the key ceremony, assembles a genesis document (or
//!    chain spec) from values exported by short-lived job containers, copies
//!    the identical bytes to every node, launches every node, and returns only
//!    once the network has produced [BLOCKS_UNTIL_LIVE] blocks.
//!
//! [Network::cleanup] stops every container and wipes every home directory. It
//! may be called from any stage, any number of times.
//!
//! Three families are supported: Cosmos SDK chains ([cosmos]), Penumbra
//! ([penumbra]), and a Polkadot relay chain with parachains ([polkadot]).
//! Chains are usually obtained from the [factory], which resolves a preset
//! name and version string into a ready-to-initialize [factory::Chain].
//!
//! # Example
//!
//! ```rust,no_run
//! use ibctest_chain::{factory::{Entry, Registry}, Network};
//! use ibctest_runtime::{docker, Runner};
//! use std::path::Path;
//!
//! docker::Runner::default().start(|context| async move {
//!     let entry = Entry {
//!         name: "gaia".to_string(),
//!         name_override: None,
//!         version: "v7.0.0".to_string(),
//!         chain_id: "gaia-1".to_string(),
//!         validators: 1,
//!         full_nodes: 1,
//!     };
//!     let mut chain = Registry::builtin().resolve(context, &entry, "example").unwrap();
//!     chain.initialize("example", Path::new("/tmp/ibctest"), "ibctest").await.unwrap();
//!     chain.start(&[]).await.unwrap();
//!     println!("height: {}", chain.height().await.unwrap());
//!     chain.cleanup().await.unwrap();
//! });
//! ```

use ibctest_runtime::Output;
use serde::{Deserialize, Serialize};
use std::{future::Future, path::Path};
use thiserror::Error;

pub mod config;
pub use config::{ChainConfig, DockerImage, Family, ParachainConfig};
pub mod cosmos;
pub mod factory;
pub mod genesis;
pub use genesis::PathError;
pub mod lifecycle;
pub use lifecycle::Stage;
pub mod liveness;
pub mod node;
pub mod penumbra;
pub mod phase;
pub mod polkadot;
pub mod tendermint;

#[cfg(test)]
mod mocks;

/// Number of blocks a network must produce before [Network::start] returns.
pub const BLOCKS_UNTIL_LIVE: u64 = 5;

/// Build a command line from string-like parts.
#[macro_export]
macro_rules! command {
    ($($arg:expr),* $(,)?) => {
        vec![$($arg.to_string()),*]
    };
}

/// Errors that can occur when bootstrapping a network.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no chain configuration for {name} (available chains are: {available})")]
    UnknownChain { name: String, available: String },
    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion {
        version: String,
        reason: &'static str,
    },
    #[error("unsupported parachain: {0}")]
    UnknownParachain(String),
    #[error("only polkadot is supported as the relay chain node, got: {0}")]
    UnsupportedRelay(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("crypto error: {0}")]
    Crypto(#[from] ibctest_cryptography::Error),
    #[error("{command} failed on {container}: {source}")]
    Runtime {
        container: String,
        command: &'static str,
        #[source]
        source: ibctest_runtime::Error,
    },
    #[error("job {container} exited with code {exit_code}: {stderr}")]
    Job {
        container: String,
        exit_code: i64,
        stdout: String,
        stderr: String,
    },
    #[error("{node} did not produce blocks in time (start={start}, reached={reached}, attempts={attempts})")]
    LivenessTimeout {
        node: String,
        start: u64,
        reached: u64,
        attempts: usize,
    },
    #[error("genesis error: {0}")]
    Genesis(#[from] PathError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(String),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{operation} not allowed in stage {stage}")]
    InvalidStage {
        operation: &'static str,
        stage: Stage,
    },
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("missing result for slot {0}")]
    MissingSlot(usize),
    #[error("unexpected output from {command}: {output}")]
    UnexpectedOutput { command: String, output: String },
}

/// Funds credited to an address at genesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAmount {
    pub address: String,
    pub denom: String,
    pub amount: u64,
}

/// A blockchain made of containerized nodes.
pub trait Network: Send {
    /// Configuration the network was resolved with.
    fn config(&self) -> &ChainConfig;

    /// Current lifecycle stage.
    fn stage(&self) -> Stage;

    /// Pull images, derive identities, and create a home directory per node.
    fn initialize(
        &mut self,
        test_name: &str,
        home_root: &Path,
        network_id: &str,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Assemble genesis, launch every node, and wait for [BLOCKS_UNTIL_LIVE] blocks.
    fn start(&mut self, extra: &[WalletAmount]) -> impl Future<Output = Result<(), Error>> + Send;

    /// Stop every container and wipe every home directory.
    fn cleanup(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// RPC address reachable from other containers on the network.
    fn rpc_address(&self) -> Option<String>;

    /// gRPC address reachable from other containers on the network.
    fn grpc_address(&self) -> Option<String>;

    /// RPC address reachable from the host. Only available once started.
    fn host_rpc_address(&self) -> Option<String>;

    /// gRPC address reachable from the host. Only available once started.
    fn host_grpc_address(&self) -> Option<String>;

    /// Latest block height of the designated node.
    fn height(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Run a command in the designated node's container.
    fn exec(
        &self,
        cmd: &[String],
        env: &[String],
    ) -> impl Future<Output = Result<Output, Error>> + Send;
}

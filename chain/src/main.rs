//! Bring up interchain test networks from the command line.

use clap::{Arg, ArgAction, Command};
use ibctest_chain::{
    factory::{Chain, Entry, Factory},
    node::runtime,
    phase, Error, Network,
};
use ibctest_runtime::{docker, Containers, Runner as _, CLEANUP_LABEL};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{error, info, warn};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

const UP_CMD: &str = "up";
const CLEAN_CMD: &str = "clean";

/// Contents of the file passed to `up --config`.
#[derive(Debug, Deserialize)]
struct Config {
    test_name: String,
    home: PathBuf,
    #[serde(default = "default_network")]
    network: String,
    chains: Vec<Entry>,
}

fn default_network() -> String {
    "ibctest".to_string()
}

/// Start every chain in the config, wait for Ctrl-C, and tear everything down.
async fn up(context: docker::Context, path: &Path) -> Result<(), Error> {
    let config: Config = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
    let factory = Factory::builtin(config.chains.clone());
    let mut chains = factory.chains(&context, &config.test_name)?;
    info!(
        test = config.test_name,
        chains = factory.name(),
        "resolved chains"
    );

    let labels = BTreeMap::from([(CLEANUP_LABEL.to_string(), config.test_name.clone())]);
    if let Err(err) = context.create_network(&config.network, &labels).await {
        warn!(network = config.network, ?err, "failed to create network");
    }
    std::fs::create_dir_all(&config.home)?;

    let result = run(&mut chains, &config).await;
    if let Err(err) = &result {
        error!(?err, "failed to bring up chains");
    }
    let cleanup = phase::join_settled(chains.iter_mut().map(|chain| chain.cleanup())).await;
    if let Err(err) = context.remove_network(&config.network).await {
        warn!(network = config.network, ?err, "failed to remove network");
    }
    result.and(cleanup)
}

async fn run(chains: &mut [Chain<docker::Context>], config: &Config) -> Result<(), Error> {
    for chain in chains.iter_mut() {
        chain
            .initialize(&config.test_name, &config.home, &config.network)
            .await?;
    }
    phase::join(chains.iter_mut().map(|chain| chain.start(&[]))).await?;
    for chain in chains.iter() {
        info!(
            chain = chain.config().chain_id,
            rpc = ?chain.host_rpc_address(),
            grpc = ?chain.host_grpc_address(),
            "chain live"
        );
    }
    info!("press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Remove every container and network labelled with `test_name`.
async fn clean(context: docker::Context, test_name: &str) -> Result<(), Error> {
    let containers = context
        .list(CLEANUP_LABEL, test_name)
        .await
        .map_err(runtime(test_name, "list"))?;
    for container in &containers {
        context
            .remove(&container.id)
            .await
            .map_err(runtime(&container.name, "remove"))?;
    }
    let networks = context
        .list_networks(CLEANUP_LABEL, test_name)
        .await
        .map_err(runtime(test_name, "list_networks"))?;
    for network in &networks {
        context
            .remove_network(network)
            .await
            .map_err(runtime(network, "remove_network"))?;
    }
    info!(
        test = test_name,
        containers = containers.len(),
        networks = networks.len(),
        "cleaned"
    );
    Ok(())
}

/// Entrypoint for the ibctest CLI
fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("ibctest")
        .version(crate_version())
        .about("Bring up live, peered, block-producing test networks in containers.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(UP_CMD)
                .about("Start every chain in a YAML configuration file and keep it running until interrupted.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to YAML config file")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(CLEAN_CMD)
                .about("Remove every container and network left behind by a test.")
                .arg(
                    Arg::new("test-name")
                        .long("test-name")
                        .required(true)
                        .help("Name of the test whose resources should be removed")
                        .value_parser(clap::value_parser!(String)),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse subcommands
    let runner = docker::Runner::default();
    match matches.subcommand() {
        Some((UP_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap().clone();
            if let Err(e) = runner.start(|context| async move { up(context, &config_path).await }) {
                error!(error=?e, "failed to run chains");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((CLEAN_CMD, matches)) => {
            let test_name = matches.get_one::<String>("test-name").unwrap().clone();
            if let Err(e) = runner.start(|context| async move { clean(context, &test_name).await }) {
                error!(error=?e, "failed to clean");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((cmd, _)) => {
            error!(cmd, "invalid subcommand");
        }
        None => {
            error!("no subcommand provided");
        }
    }
    std::process::ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let raw = r#"
test_name: demo
home: /tmp/ibctest
chains:
  - name: gaia
    version: v7.0.0
    chain_id: gaia-1
    validators: 1
    full_nodes: 1
  - name: polkadot
    name_override: relay
    version: polkadot:v0.9.19,composable:v2.1.9
    chain_id: rococo-local
    validators: 2
"#;
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.network, "ibctest");
        assert_eq!(config.chains.len(), 2);
        assert_eq!(config.chains[1].name_override.as_deref(), Some("relay"));
        assert_eq!(config.chains[1].full_nodes, 0);
        assert_eq!(
            Factory::builtin(config.chains).name(),
            "gaia@v7.0.0+polkadot@polkadot:v0.9.19,composable:v2.1.9"
        );
    }
}

//! Relay chain validators and chain spec assembly.

use super::{
    multiaddr, parachain::Export, AUTHORITIES, P2P_PORT, PROMETHEUS_PORT, RPC_PORT, SS58_NETWORK,
    WS_PORT,
};
use crate::{
    command,
    genesis::{keys, Document, Segment},
    node::Node,
    Error, WalletAmount,
};
use ibctest_cryptography::{identity::node_key, Encoding, Identity};
use ibctest_runtime::Runtime;
use serde_json::{json, Value};

/// Balance of every authority account and stash.
pub const AUTHORITY_BALANCE: u64 = 1_000_000_000_000_000_000;

/// Sessions a parachain validation code upgrade is delayed by.
pub const VALIDATION_UPGRADE_DELAY: u64 = 2;

/// Bridge pallets whose owner is set to the sudo account.
const BRIDGE_PALLETS: [&str; 4] = [
    "bridgeRococoGrandpa",
    "bridgeWococoGrandpa",
    "bridgeRococoMessages",
    "bridgeWococoMessages",
];

/// Path below `genesis.runtime.runtime_genesis_config`.
fn runtime_path(path: &[&str]) -> Vec<Segment> {
    let mut full = keys(["genesis", "runtime", "runtime_genesis_config"]);
    full.extend(path.iter().map(|key| Segment::from(*key)));
    full
}

/// SS58 addresses of one authority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authority {
    pub account: String,
    pub stash: String,
    pub grandpa: String,
    pub beefy: String,
}

impl Authority {
    pub fn new(identity: &Identity) -> Result<Self, Error> {
        let encoding = Encoding::Ss58 {
            network: SS58_NETWORK,
        };
        Ok(Self {
            account: identity.account_address(SS58_NETWORK)?,
            stash: identity.stash_address(SS58_NETWORK)?,
            grandpa: identity.grandpa.address(&encoding)?,
            beefy: identity.beefy.address(&encoding)?,
        })
    }

    /// Session keys entry: `[stash, stash, {keys}]`.
    fn session(&self) -> Value {
        json!([
            self.stash,
            self.stash,
            {
                "grandpa": self.grandpa,
                "babe": self.account,
                "im_online": self.account,
                "parachain_validator": self.account,
                "authority_discovery": self.account,
                "para_validator": self.account,
                "para_assignment": self.account,
                "beefy": self.beefy,
            }
        ])
    }
}

/// Fill a relay chain spec template with authorities, balances, and parachains.
pub fn assemble(
    spec: &mut Document,
    boot_nodes: &[String],
    authorities: &[Authority],
    parachains: &[Export],
    extra: &[WalletAmount],
) -> Result<(), Error> {
    let sudo = authorities
        .first()
        .ok_or_else(|| Error::InvalidConfig("relay chain needs an authority".to_string()))?;

    spec.set(&keys(["bootNodes"]), boot_nodes.to_vec())?;
    let sessions: Vec<Value> = authorities.iter().map(Authority::session).collect();
    spec.set(&runtime_path(&["session", "keys"]), sessions)?;

    let mut balances: Vec<Value> = authorities
        .iter()
        .flat_map(|a| {
            [
                json!([a.stash, AUTHORITY_BALANCE]),
                json!([a.account, AUTHORITY_BALANCE]),
            ]
        })
        .collect();
    balances.extend(extra.iter().map(|w| json!([w.address, w.amount])));
    spec.set(&runtime_path(&["balances", "balances"]), balances)?;

    spec.set(&runtime_path(&["sudo", "key"]), sudo.account.as_str())?;
    for pallet in BRIDGE_PALLETS {
        spec.set(&runtime_path(&[pallet, "owner"]), sudo.account.as_str())?;
    }
    spec.set(
        &runtime_path(&["configuration", "config", "validation_upgrade_delay"]),
        VALIDATION_UPGRADE_DELAY,
    )?;

    let paras: Vec<Value> = parachains
        .iter()
        .map(|para| {
            json!([para.id, {
                "genesis_head": para.genesis_head,
                "validation_code": para.validation_code,
                "parachain": true,
            }])
        })
        .collect();
    spec.set(&runtime_path(&["paras", "paras"]), paras)?;

    for path in [
        keys(["bootNodes"]),
        runtime_path(&["session", "keys"]),
        runtime_path(&["balances", "balances"]),
        runtime_path(&["sudo", "key"]),
        runtime_path(&["paras", "paras"]),
    ] {
        spec.require(&path)?;
    }
    Ok(())
}

/// A relay chain validator.
pub struct RelayNode<E: Runtime> {
    pub node: Node<E>,
    pub identity: Identity,
    node_key: String,
    peer_id: String,
}

impl<E: Runtime> RelayNode<E> {
    /// Wrap `node`, deriving the identity of the authority at its index.
    pub fn new(node: Node<E>) -> Result<Self, Error> {
        let name = AUTHORITIES.get(node.index()).ok_or_else(|| {
            Error::InvalidConfig(format!("at most {} relay nodes", AUTHORITIES.len()))
        })?;
        let identity = Identity::derive(&capitalize(name))?;
        let (node_key, peer_id) = node_key(&node.name())?;
        Ok(Self {
            node,
            identity,
            node_key,
            peer_id,
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn multiaddr(&self) -> String {
        multiaddr(&self.node.hostname(), &self.peer_id)
    }

    pub fn authority(&self) -> Result<Authority, Error> {
        Authority::new(&self.identity)
    }

    /// Validator command line reading the raw chain spec at `raw_spec`.
    pub fn command(&self, bin: &str, raw_spec: &str) -> Vec<String> {
        command![
            bin,
            format!("--chain={raw_spec}"),
            format!("--ws-port={WS_PORT}"),
            format!("--{}", AUTHORITIES[self.node.index()]),
            format!("--node-key={}", self.node_key),
            "--beefy",
            "--rpc-cors=all",
            "--unsafe-ws-external",
            "--unsafe-rpc-external",
            "--prometheus-external",
            format!("--prometheus-port={PROMETHEUS_PORT}"),
            format!("--listen-addr=/ip4/0.0.0.0/tcp/{P2P_PORT}"),
            format!("--public-addr={}", self.multiaddr()),
            format!("--rpc-port={RPC_PORT}"),
            "--base-path",
            self.node.home()
        ]
    }
}

/// `alice` -> `Alice`
fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DockerImage,
        node::{Scope, Template},
    };
    use ibctest_runtime::{deterministic, Runner as _};
    use std::path::Path;

    const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

    fn template() -> Value {
        json!({
            "name": "Rococo Local Testnet",
            "bootNodes": [],
            "genesis": {"runtime": {"runtime_genesis_config": {
                "session": {"keys": []},
                "configuration": {"config": {"validation_upgrade_delay": 10, "max_code_size": 1}},
            }}},
        })
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("alice"), "Alice");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_authority() {
        let alice = Authority::new(&Identity::derive("Alice").unwrap()).unwrap();
        assert_eq!(alice.account, ALICE);
        assert_ne!(alice.stash, alice.account);
        assert_ne!(alice.grandpa, alice.account);
        assert_ne!(alice.beefy, alice.account);
    }

    #[test]
    fn test_assemble() {
        let authorities: Vec<_> = ["Alice", "Bob"]
            .iter()
            .map(|name| Authority::new(&Identity::derive(name).unwrap()).unwrap())
            .collect();
        let parachains = vec![Export {
            id: 2000,
            genesis_head: "0x01".to_string(),
            validation_code: "0x0061736d".to_string(),
        }];
        let wallet = WalletAmount {
            address: "5Relayer".to_string(),
            denom: "uDOT".to_string(),
            amount: 7,
        };
        let mut spec = Document::new(template());
        assemble(
            &mut spec,
            &["/dns4/a".to_string(), "/dns4/b".to_string()],
            &authorities,
            &parachains,
            &[wallet],
        )
        .unwrap();

        assert_eq!(spec.get(&keys(["bootNodes"])), Some(&json!(["/dns4/a", "/dns4/b"])));
        let sessions = spec.require(&runtime_path(&["session", "keys"])).unwrap();
        assert_eq!(sessions[0][0], json!(authorities[0].stash));
        assert_eq!(sessions[0][2]["babe"], json!(ALICE));
        assert_eq!(sessions[1][2]["grandpa"], json!(authorities[1].grandpa));
        let balances = spec.require(&runtime_path(&["balances", "balances"])).unwrap();
        assert_eq!(balances.as_array().unwrap().len(), 5);
        assert_eq!(balances[4], json!(["5Relayer", 7]));
        assert_eq!(
            spec.get(&runtime_path(&["sudo", "key"])),
            Some(&json!(ALICE))
        );
        assert_eq!(
            spec.get(&runtime_path(&["bridgeWococoMessages", "owner"])),
            Some(&json!(ALICE))
        );
        assert_eq!(
            spec.get(&runtime_path(&["configuration", "config"])),
            Some(&json!({"validation_upgrade_delay": 2, "max_code_size": 1}))
        );
        assert_eq!(
            spec.get(&runtime_path(&["paras", "paras"])),
            Some(&json!([[2000, {"genesis_head": "0x01", "validation_code": "0x0061736d", "parachain": true}]]))
        );
    }

    #[test]
    fn test_assemble_requires_authority() {
        let mut spec = Document::new(template());
        assert!(matches!(
            assemble(&mut spec, &[], &[], &[], &[]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_command() {
        deterministic::Runner::default().start(|context| async move {
            let template = Template {
                prefix: "relaychain".to_string(),
                chain_id: "rococo-local".to_string(),
                chain_name: "polkadot".to_string(),
                image: DockerImage::new("parity/polkadot"),
                ports: vec![],
            };
            let scope = Scope::new("relay", Path::new("/tmp"), "ibctest");
            let relay = RelayNode::new(Node::new(context.clone(), scope.clone(), template.clone(), 1))
                .unwrap();
            assert_eq!(relay.identity.name, "Bob");
            let cmd = relay.command("polkadot", "/home/.polkadot/rococo-local-raw.json");
            assert_eq!(cmd[1], "--chain=/home/.polkadot/rococo-local-raw.json");
            assert_eq!(cmd[3], "--bob");
            assert_eq!(
                cmd[12],
                format!(
                    "--public-addr=/dns4/relaychain-1-rococo-local-relay/tcp/27452/p2p/{}",
                    relay.peer_id()
                )
            );
            assert_eq!(cmd[cmd.len() - 1], "/home/.polkadot");

            assert!(matches!(
                RelayNode::new(Node::new(context, scope, template, 5)),
                Err(Error::InvalidConfig(_))
            ));
        });
    }
}

//! Scripted chain binaries for the deterministic runtime.
//!
//! Each command reads and writes the host directory bind-mounted into its
//! container, mimicking the files the real binaries produce.

use crate::genesis::{keys, Document};
use ibctest_runtime::{
    deterministic::{Config, Process, Request},
    ContainerSpec,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Deterministic runtime config that answers every supported command.
pub fn config() -> Config {
    let height = Arc::new(AtomicU64::new(1));
    Config::default()
        .with_behavior(run)
        .with_http(move |request| Ok(respond(&height, request)))
}

/// Like [config], but any command containing the argument `fail` exits with code 1.
pub fn config_failing(fail: &'static str) -> Config {
    let cfg = config();
    let inner = cfg.behavior.clone();
    cfg.with_behavior(move |spec, cmd| {
        if cmd.iter().any(|arg| arg == fail) {
            return Process::exited(1, "", &format!("{fail} failed"));
        }
        inner(spec, cmd)
    })
}

fn respond(height: &AtomicU64, request: &Request) -> Value {
    let current = height.fetch_add(1, Ordering::SeqCst);
    match request.method {
        "POST" => json!({"jsonrpc": "2.0", "id": 1, "result": {"number": format!("{current:#x}")}}),
        _ => json!({"result": {"sync_info": {"latest_block_height": current.to_string()}}}),
    }
}

fn host_dir(spec: &ContainerSpec) -> PathBuf {
    let bind = &spec.binds[0];
    PathBuf::from(bind.split(':').next().unwrap())
}

/// Map a path inside the container to the host.
fn resolve(spec: &ContainerSpec, path: &str) -> PathBuf {
    let home = spec.binds[0].split(':').nth(1).unwrap();
    let relative = path.strip_prefix(home).unwrap_or(path).trim_start_matches('/');
    host_dir(spec).join(relative)
}

fn flag<'a>(cmd: &'a [String], name: &str) -> Option<&'a str> {
    let prefixed = format!("{name}=");
    cmd.iter().enumerate().find_map(|(i, arg)| {
        if arg == name {
            cmd.get(i + 1).map(String::as_str)
        } else {
            arg.strip_prefix(&prefixed)
        }
    })
}

/// Stable identifier of the node owning the mounted directory.
fn tag(spec: &ContainerSpec) -> String {
    let digest = Sha256::digest(host_dir(spec).to_string_lossy().as_bytes());
    hex::encode(&digest[..20])
}

fn read(path: &Path) -> Document {
    Document::parse(&std::fs::read(path).unwrap()).unwrap()
}

fn write(path: &Path, contents: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn ok(stdout: &str) -> Process {
    Process::exited(0, stdout, "")
}

fn run(spec: &ContainerSpec, cmd: &[String]) -> Process {
    let bin = cmd[0].as_str();
    let sub = cmd.get(1).map(String::as_str).unwrap_or_default();
    match (bin, sub) {
        ("find", _) => cleanup(spec),
        ("pcli", _) => pcli(spec, cmd),
        ("pd", "testnet") => pd_generate(spec, cmd),
        ("tendermint", "init") => tendermint_init(spec, cmd),
        ("tendermint", "show-node-id") | (_, "tendermint") => ok(&format!("{}\n", tag(spec))),
        ("polkadot", "build-spec") => relay_spec(spec, cmd),
        (_, "init") => cosmos_init(spec, cmd),
        (_, "keys") => Process::exited(
            0,
            "",
            &json!({"name": cmd[3], "type": "local", "address": format!("cosmos1{}", &tag(spec)[..20])})
                .to_string(),
        ),
        (_, "add-genesis-account") => {
            let path = host_dir(spec).join("config/genesis.json");
            let mut genesis = read(&path);
            let mut accounts = genesis
                .get(&keys(["app_state", "accounts"]))
                .cloned()
                .unwrap_or(json!([]));
            accounts
                .as_array_mut()
                .unwrap()
                .push(json!({"address": cmd[2], "coins": cmd[3]}));
            genesis.set(&keys(["app_state", "accounts"]), accounts).unwrap();
            write(&path, &genesis.to_bytes().unwrap());
            ok("")
        }
        (_, "gentx") => {
            let path = host_dir(spec).join(format!("config/gentx/gentx-{}.json", tag(spec)));
            write(&path, json!({"body": {"memo": tag(spec)}}).to_string().as_bytes());
            ok("")
        }
        (_, "collect-gentxs") => {
            let dir = host_dir(spec).join("config/gentx");
            let mut names: Vec<String> = std::fs::read_dir(dir)
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            let path = host_dir(spec).join("config/genesis.json");
            let mut genesis = read(&path);
            genesis
                .set(&keys(["app_state", "genutil", "gen_txs"]), names)
                .unwrap();
            write(&path, &genesis.to_bytes().unwrap());
            ok("")
        }
        (_, "build-spec") => ok(&json!({"name": bin, "para_id": 2000}).to_string()),
        (_, "export-genesis-state") => ok(&format!("0x{}\n", &tag(spec)[..16])),
        (_, "export-genesis-wasm") => ok("0x0061736d\n"),
        _ => Process::Running,
    }
}

fn cleanup(spec: &ContainerSpec) -> Process {
    for entry in std::fs::read_dir(host_dir(spec)).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            std::fs::remove_dir_all(path).unwrap();
        } else {
            std::fs::remove_file(path).unwrap();
        }
    }
    ok("")
}

const CONFIG_TOML: &str = "proxy_app = \"tcp://127.0.0.1:26658\"\n\n[p2p]\npersistent_peers = \"\"\n\n[rpc]\nladdr = \"tcp://127.0.0.1:26657\"\n\n[consensus]\ntimeout_commit = \"5s\"\n";

fn cosmos_init(spec: &ContainerSpec, cmd: &[String]) -> Process {
    let dir = host_dir(spec);
    write(&dir.join("config/config.toml"), CONFIG_TOML.as_bytes());
    let genesis = json!({
        "chain_id": flag(cmd, "--chain-id").unwrap(),
        "app_state": {"accounts": [], "genutil": {"gen_txs": []}},
    });
    write(&dir.join("config/genesis.json"), genesis.to_string().as_bytes());
    ok("")
}

fn tendermint_init(spec: &ContainerSpec, cmd: &[String]) -> Process {
    let dir = host_dir(spec);
    write(&dir.join("config/config.toml"), CONFIG_TOML.as_bytes());
    if cmd[2] == "validator" {
        let key = json!({
            "address": tag(spec).to_uppercase(),
            "pub_key": {"type": "tendermint/PubKeyEd25519", "value": format!("pub-{}", tag(spec))},
            "priv_key": {"type": "tendermint/PrivKeyEd25519", "value": "generated"},
        });
        write(
            &dir.join("config/priv_validator_key.json"),
            key.to_string().as_bytes(),
        );
    }
    ok("")
}

fn pcli(spec: &ContainerSpec, cmd: &[String]) -> Process {
    let wallet = flag(cmd, "-d").unwrap();
    let label = Path::new(wallet)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    let address = format!("penumbrav1t{}{}", label, &tag(spec)[..12]);
    match cmd[3].as_str() {
        "keys" => {
            write(&resolve(spec, wallet).join("custody.json"), b"{}");
            ok("")
        }
        "validator" => {
            let definition = json!({
                "identity_key": format!("penumbravalid{}", &tag(spec)[..12]),
                "consensus_key": "",
                "name": "",
                "website": "",
                "description": "",
                "funding_streams": [{"address": address, "rate_bps": 100}],
                "sequence_number": 0,
            });
            let file = resolve(spec, flag(cmd, "--file").unwrap());
            write(&file, definition.to_string().as_bytes());
            ok("")
        }
        "view" => ok(&format!("{address}\n")),
        _ => Process::exited(1, "", "unknown pcli command"),
    }
}

fn pd_generate(spec: &ContainerSpec, cmd: &[String]) -> Process {
    let testnet = resolve(spec, flag(cmd, "--testnet-dir").unwrap());
    let validators = read(&resolve(spec, flag(cmd, "--validators-input-file").unwrap()));
    let allocations =
        std::fs::read_to_string(resolve(spec, flag(cmd, "--allocations-input-file").unwrap()))
            .unwrap();
    let validators = validators.root().as_array().unwrap().clone();
    let genesis = json!({
        "chain_id": flag(cmd, "--chain-id").unwrap(),
        "app_state": {
            "validators": validators,
            "allocations": allocations.lines().skip(1).collect::<Vec<_>>(),
        },
    });
    for i in 0..validators.len() {
        let config = testnet.join(format!("node{i}/tendermint/config"));
        write(&config.join("genesis.json"), genesis.to_string().as_bytes());
        let key = json!({"pub_key": {"value": format!("generated-{i}")}});
        write(
            &config.join("priv_validator_key.json"),
            key.to_string().as_bytes(),
        );
    }
    ok("")
}

fn relay_spec(spec: &ContainerSpec, cmd: &[String]) -> Process {
    if cmd.iter().any(|arg| arg == "--raw") {
        let chain = resolve(spec, flag(cmd, "--chain").unwrap());
        let plain = read(&chain);
        return ok(&json!({"raw": true, "plain": plain.into_value()}).to_string());
    }
    let template = json!({
        "name": "Rococo Local Testnet",
        "id": flag(cmd, "--chain").unwrap(),
        "bootNodes": [],
        "genesis": {"runtime": {"runtime_genesis_config": {
            "session": {"keys": []},
            "balances": {"balances": []},
            "configuration": {"config": {"validation_upgrade_delay": 10}},
        }}},
    });
    ok(&template.to_string())
}

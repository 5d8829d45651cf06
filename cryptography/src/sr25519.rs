//! Sr25519 keys (account, stash, BABE, and session keys).

use crate::{hdkd, Curve, Error, KeyPair, DEV_SEED};
use schnorrkel::{derive::ChainCode, ExpansionMode, MiniSecretKey};

/// Derive an sr25519 key pair along `junctions`.
pub fn derive(junctions: &[&str]) -> Result<KeyPair, Error> {
    let mut mini =
        MiniSecretKey::from_bytes(&DEV_SEED).map_err(|e| Error::InvalidKey(e.to_string()))?;
    for junction in junctions {
        let secret = mini.expand(ExpansionMode::Ed25519);
        let code = ChainCode(hdkd::chain_code(junction));
        mini = secret.hard_derive_mini_secret_key(Some(code), b"").0;
    }
    let public = mini
        .expand(ExpansionMode::Ed25519)
        .to_public()
        .to_bytes()
        .to_vec();
    Ok(KeyPair::new(Curve::Sr25519, mini.to_bytes(), public))
}

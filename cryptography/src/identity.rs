//! Named validator identities.

use crate::{address, derive, Curve, Encoding, Error, KeyPair};

/// Role label of the stash account.
pub const STASH: &str = "stash";

/// Role label of libp2p node keys.
pub const NODE: &str = "node";

/// Every key a relay chain validator needs, derived from its name.
#[derive(Clone, Debug)]
pub struct Identity {
    pub name: String,
    pub account: KeyPair,
    pub stash: KeyPair,
    pub grandpa: KeyPair,
    pub beefy: KeyPair,
}

impl Identity {
    /// Derive the identity of `name` (for example `Alice`).
    pub fn derive(name: &str) -> Result<Self, Error> {
        Ok(Self {
            name: name.to_string(),
            account: derive(Curve::Sr25519, name, "")?,
            stash: derive(Curve::Sr25519, name, STASH)?,
            grandpa: derive(Curve::Ed25519, name, "")?,
            beefy: derive(Curve::Secp256k1, name, "")?,
        })
    }

    /// Account address in `network`'s SS58 format.
    pub fn account_address(&self, network: u16) -> Result<String, Error> {
        self.account.address(&Encoding::Ss58 { network })
    }

    /// Stash address in `network`'s SS58 format.
    pub fn stash_address(&self, network: u16) -> Result<String, Error> {
        self.stash.address(&Encoding::Ss58 { network })
    }
}

/// Deterministic libp2p node key for a container label.
///
/// Returns the hex-encoded secret (as accepted by `--node-key`) and the peer id.
pub fn node_key(label: &str) -> Result<(String, String), Error> {
    let pair = derive(Curve::Ed25519, label, NODE)?;
    let public: [u8; 32] = pair
        .public()
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("unexpected public key length for {label}")))?;
    Ok((hex::encode(pair.secret()), address::peer_id(&public)))
}

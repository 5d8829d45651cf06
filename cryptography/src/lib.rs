//! Derive deterministic validator identities and encode chain-specific addresses.
//!
//! Every key produced by this crate is a pure function of a seed (typically a
//! participant name such as `Alice`) and an optional role label (such as
//! `stash`). Deriving the same `(seed, role)` pair on any machine yields the
//! same key material, which lets independently-initialized nodes agree on a
//! genesis document without exchanging secrets.
//!
//! Derivation follows the hard-junction scheme used by Substrate (`//Alice`,
//! `//Alice//stash`), so the development identities match the well-known
//! development accounts.
//!
//! # Status
//!
//! `ibctest-cryptography` is intended for test networks only. The root secret
//! is public.

use std::fmt::{self, Debug, Display};
use thiserror::Error;
use zeroize::Zeroize;

pub mod address;
pub use address::Encoding;
pub mod ed25519;
mod hdkd;
pub use hdkd::DEV_SEED;
pub mod identity;
pub use identity::Identity;
pub mod secp256k1;
pub mod sr25519;

/// Errors that can occur when deriving keys or encoding addresses.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("seed must not be empty")]
    EmptySeed,
    #[error("derived scalar is not a valid {0} secret")]
    InvalidScalar(Curve),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid ss58 network: {0}")]
    InvalidNetwork(u16),
    #[error("invalid bech32 prefix: {0}")]
    InvalidPrefix(String),
}

/// Curves supported by [derive].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Curve {
    Ed25519,
    Sr25519,
    Secp256k1,
}

impl Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Curve::Ed25519 => "ed25519",
            Curve::Sr25519 => "sr25519",
            Curve::Secp256k1 => "secp256k1",
        };
        f.write_str(name)
    }
}

/// A derived secret and its public key.
///
/// The secret is the 32-byte seed of the curve's signing key (the mini secret
/// for sr25519) and is zeroized when the pair is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    curve: Curve,
    secret: [u8; 32],
    public: Vec<u8>,
}

impl KeyPair {
    pub(crate) fn new(curve: Curve, secret: [u8; 32], public: Vec<u8>) -> Self {
        Self {
            curve,
            secret,
            public,
        }
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    /// Public key bytes (32 bytes for ed25519/sr25519, 33-byte compressed SEC1 for secp256k1).
    pub fn public(&self) -> &[u8] {
        &self.public
    }

    /// Encode the public key as a human-readable address.
    pub fn address(&self, encoding: &Encoding) -> Result<String, Error> {
        address::encode(&self.public, encoding)
    }
}

impl Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("curve", &self.curve)
            .field("public", &hex::encode(&self.public))
            .finish_non_exhaustive()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Derive the key pair for `//seed` (and `//seed//role` when `role` is not empty).
pub fn derive(curve: Curve, seed: &str, role: &str) -> Result<KeyPair, Error> {
    if seed.is_empty() {
        return Err(Error::EmptySeed);
    }
    let mut junctions = vec![seed];
    if !role.is_empty() {
        junctions.push(role);
    }
    match curve {
        Curve::Ed25519 => ed25519::derive(&junctions),
        Curve::Sr25519 => sr25519::derive(&junctions),
        Curve::Secp256k1 => secp256k1::derive(&junctions),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Curve::Ed25519, 32)]
    #[test_case(Curve::Sr25519, 32)]
    #[test_case(Curve::Secp256k1, 33)]
    fn test_derive_deterministic(curve: Curve, public_len: usize) {
        for (seed, role) in [("Alice", ""), ("Alice", "stash"), ("Bob", ""), ("relay-0", "node")] {
            let a = derive(curve, seed, role).unwrap();
            let b = derive(curve, seed, role).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.public().len(), public_len);
            let encoding = Encoding::Ss58 { network: 42 };
            assert_eq!(a.address(&encoding).unwrap(), b.address(&encoding).unwrap());
        }
    }

    #[test_case(Curve::Ed25519)]
    #[test_case(Curve::Sr25519)]
    #[test_case(Curve::Secp256k1)]
    fn test_role_separates_keys(curve: Curve) {
        let plain = derive(curve, "Alice", "").unwrap();
        let stash = derive(curve, "Alice", "stash").unwrap();
        let bob = derive(curve, "Bob", "").unwrap();
        assert_ne!(plain.public(), stash.public());
        assert_ne!(plain.public(), bob.public());
    }

    #[test]
    fn test_empty_seed() {
        assert_eq!(derive(Curve::Sr25519, "", "stash"), Err(Error::EmptySeed));
    }

    #[test]
    fn test_debug_hides_secret() {
        let pair = derive(Curve::Ed25519, "Alice", "").unwrap();
        let debug = format!("{pair:?}");
        assert!(!debug.contains(&hex::encode(pair.secret())));
    }
}

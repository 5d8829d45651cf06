//! Ed25519 keys (GRANDPA finality keys and libp2p node keys).

use crate::{hdkd, Curve, Error, KeyPair};

const TAG: &str = "Ed25519HDKD";

/// Derive an ed25519 key pair along `junctions`.
pub fn derive(junctions: &[&str]) -> Result<KeyPair, Error> {
    let seed = hdkd::derive_hashed(TAG, junctions);
    let key = ed25519_consensus::SigningKey::from(seed);
    let public = key.verification_key().to_bytes().to_vec();
    Ok(KeyPair::new(Curve::Ed25519, key.to_bytes(), public))
}

/// Recover the public key for an existing 32-byte seed.
pub fn public_from_seed(seed: [u8; 32]) -> [u8; 32] {
    ed25519_consensus::SigningKey::from(seed)
        .verification_key()
        .to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alice() {
        let pair = derive(&["Alice"]).unwrap();
        assert_eq!(
            hex::encode(pair.public()),
            "88dc3417d5058ec4b4503e0c12ea1a0a89be200fe98922423d4334014fa6b0ee"
        );
    }

    #[test]
    fn test_public_from_seed() {
        let pair = derive(&["Bob"]).unwrap();
        assert_eq!(&public_from_seed(*pair.secret())[..], pair.public());
    }
}

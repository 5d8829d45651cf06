//! Secp256k1 keys (BEEFY keys and Cosmos accounts).

use crate::{hdkd, Curve, Error, KeyPair};
use k256::{elliptic_curve::sec1::ToEncodedPoint, SecretKey};

const TAG: &str = "Secp256k1HDKD";

/// Derive a secp256k1 key pair along `junctions`.
///
/// The public key is returned in compressed SEC1 form.
pub fn derive(junctions: &[&str]) -> Result<KeyPair, Error> {
    let seed = hdkd::derive_hashed(TAG, junctions);
    let secret = SecretKey::from_slice(&seed).map_err(|_| Error::InvalidScalar(Curve::Secp256k1))?;
    let public = secret
        .public_key()
        .to_encoded_point(true)
        .as_bytes()
        .to_vec();
    Ok(KeyPair::new(Curve::Secp256k1, seed, public))
}

//! Encode public keys as chain-specific addresses.

use crate::Error;
use bech32::{ToBase32, Variant};
use blake2::{Blake2b512, Digest};
use ripemd::Ripemd160;
use sha2::Sha256;

const SS58_PREFIX: &[u8] = b"SS58PRE";

/// Largest network identifier representable in SS58.
pub const MAX_SS58_NETWORK: u16 = 16383;

/// Human-readable encoding of a public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    Hex,
    Bech32 { hrp: String },
    Ss58 { network: u16 },
}

/// Encode `public` using `encoding`.
pub fn encode(public: &[u8], encoding: &Encoding) -> Result<String, Error> {
    match encoding {
        Encoding::Hex => Ok(format!("0x{}", hex::encode(public))),
        Encoding::Bech32 { hrp } => bech32(hrp, public),
        Encoding::Ss58 { network } => ss58(*network, public),
    }
}

fn bech32(hrp: &str, data: &[u8]) -> Result<String, Error> {
    bech32::encode(hrp, data.to_base32(), Variant::Bech32)
        .map_err(|_| Error::InvalidPrefix(hrp.to_string()))
}

fn ss58(network: u16, public: &[u8]) -> Result<String, Error> {
    let mut raw = match network {
        0..=63 => vec![network as u8],
        64..=MAX_SS58_NETWORK => {
            let first = (((network & 0b0000_0000_1111_1100) as u8) >> 2) | 0b0100_0000;
            let second = ((network >> 8) as u8) | (((network & 0b0000_0000_0000_0011) as u8) << 6);
            vec![first, second]
        }
        _ => return Err(Error::InvalidNetwork(network)),
    };
    raw.extend_from_slice(public);
    let mut hasher = Blake2b512::new();
    hasher.update(SS58_PREFIX);
    hasher.update(&raw);
    let checksum = hasher.finalize();
    raw.extend_from_slice(&checksum[..2]);
    Ok(bs58::encode(raw).into_string())
}

/// libp2p peer id of an ed25519 public key.
pub fn peer_id(public: &[u8; 32]) -> String {
    // identity multihash over the protobuf-encoded public key
    let mut raw = Vec::with_capacity(38);
    raw.extend_from_slice(&[0x00, 0x24, 0x08, 0x01, 0x12, 0x20]);
    raw.extend_from_slice(public);
    bs58::encode(raw).into_string()
}

/// Tendermint node id of an ed25519 public key (lowercase hex of the first 20 bytes of its sha256).
pub fn tendermint_address(public: &[u8]) -> String {
    hex::encode(&Sha256::digest(public)[..20])
}

/// Cosmos account address of a compressed secp256k1 public key.
pub fn cosmos_account(public: &[u8], hrp: &str) -> Result<String, Error> {
    if public.len() != 33 {
        return Err(Error::InvalidKey(format!(
            "expected 33-byte compressed key, got {} bytes",
            public.len()
        )));
    }
    let hash = Ripemd160::digest(Sha256::digest(public));
    bech32(hrp, &hash)
}

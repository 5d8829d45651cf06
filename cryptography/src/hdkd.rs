//! Hard-junction key derivation shared by all curves.

use blake2::{digest::consts::U32, Blake2b, Digest};

/// Root secret of the public development phrase (`bottom drive obey lake curtain smoke basket hold race lonely fit walk`).
pub const DEV_SEED: [u8; 32] = [
    0xfa, 0xc7, 0x95, 0x9d, 0xbf, 0xe7, 0x2f, 0x05, 0x2e, 0x5a, 0x0c, 0x3c, 0x8d, 0x65, 0x30, 0xf2,
    0x02, 0xb0, 0x2f, 0xd8, 0xf9, 0xf5, 0xca, 0x35, 0x80, 0xec, 0x8d, 0xeb, 0x77, 0x97, 0x47, 0x9e,
];

type Blake2b256 = Blake2b<U32>;

/// Compact-encode a length prefix.
fn compact(len: usize, out: &mut Vec<u8>) {
    match len {
        0..=0x3f => out.push((len as u8) << 2),
        0x40..=0x3fff => out.extend_from_slice(&(((len as u16) << 2) | 0b01).to_le_bytes()),
        0x4000..=0x3fff_ffff => out.extend_from_slice(&(((len as u32) << 2) | 0b10).to_le_bytes()),
        _ => {
            let bytes = (len as u64).to_le_bytes();
            let used = 8 - (len as u64).leading_zeros() as usize / 8;
            out.push((((used - 4) as u8) << 2) | 0b11);
            out.extend_from_slice(&bytes[..used]);
        }
    }
}

/// Length-prefixed encoding of a byte string.
pub(crate) fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 4);
    compact(bytes.len(), &mut out);
    out.extend_from_slice(bytes);
    out
}

/// Chain code of a junction.
///
/// Numeric junctions encode as a little-endian `u64`, others as a
/// length-prefixed string. The encoding is zero-padded to 32 bytes or hashed
/// when longer.
pub(crate) fn chain_code(junction: &str) -> [u8; 32] {
    let encoded = match junction.parse::<u64>() {
        Ok(n) => n.to_le_bytes().to_vec(),
        Err(_) => encode_bytes(junction.as_bytes()),
    };
    let mut code = [0u8; 32];
    if encoded.len() > 32 {
        code.copy_from_slice(&Blake2b256::digest(&encoded));
    } else {
        code[..encoded.len()].copy_from_slice(&encoded);
    }
    code
}

/// Walk `junctions` from [DEV_SEED], hashing `(tag, seed, chain code)` at each step.
pub(crate) fn derive_hashed(tag: &str, junctions: &[&str]) -> [u8; 32] {
    let tag = encode_bytes(tag.as_bytes());
    junctions.iter().fold(DEV_SEED, |seed, junction| {
        let mut hasher = Blake2b256::new();
        hasher.update(&tag);
        hasher.update(seed);
        hasher.update(chain_code(junction));
        let mut next = [0u8; 32];
        next.copy_from_slice(&hasher.finalize());
        next
    })
}

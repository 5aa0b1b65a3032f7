// Hashing utilities
//
// Every consensus digest (header, transaction, Merkle node, signing message)
// goes through `hash256`. Do not introduce a second construction.

use sha2::{Sha256, Digest};
use crate::core::Hash256;

/// SHA256 double hash
/// hash256 = SHA256(SHA256(data))
pub fn hash256(data: &[u8]) -> Hash256 {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(first_hash);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&second_hash);
    Hash256::new(bytes)
}

/// RIPEMD160(SHA256(data)) - used for recipient commitments
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::{Ripemd160, Digest as RipemdDigest};
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut result = [0u8; 20];
    result.copy_from_slice(&ripemd);
    result
}

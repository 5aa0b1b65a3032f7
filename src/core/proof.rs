// Spend proofs
//
// The ledger treats ownership proofs as opaque bytes and asks a pluggable
// `SpendVerifier` whether a proof authorises spending an output. The default
// verifier is a pay-to-pubkey-hash check over secp256k1 ECDSA:
//
//   proof      = <sig len> <DER signature> <pubkey len> <compressed pubkey>
//   commitment = hex(HASH160(pubkey)), stored as ASCII bytes
//
// so an address and its commitment are the same string.

use crate::core::{hash160, Hash256, Transaction};
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use rand::rngs::OsRng;

/// Verification capability used by transaction validation
pub trait SpendVerifier: Send + Sync {
    /// Does `proof` authorise spending an output committed to `commitment`
    /// for a transaction whose signing message is `message`?
    fn verify(&self, message: &Hash256, proof: &[u8], commitment: &[u8]) -> bool;
}

/// Default secp256k1 pay-to-pubkey-hash verifier
#[derive(Debug, Default, Clone, Copy)]
pub struct Secp256k1Verifier;

impl SpendVerifier for Secp256k1Verifier {
    fn verify(&self, message: &Hash256, proof: &[u8], commitment: &[u8]) -> bool {
        let Ok((signature, pubkey)) = parse_proof(proof) else {
            return false;
        };

        // Step 1: the pubkey must hash to the committed address
        if address_of(pubkey).as_bytes() != commitment {
            return false;
        }

        // Step 2: the signature must cover the message
        verify_signature(signature, pubkey, message).unwrap_or(false)
    }
}

/// Address (and commitment) for a serialized public key
pub fn address_of(pubkey: &[u8]) -> String {
    hex::encode(hash160(pubkey))
}

/// Split a proof into (signature, pubkey)
fn parse_proof(proof: &[u8]) -> Result<(&[u8], &[u8]), String> {
    let (&sig_len, rest) = proof.split_first().ok_or("Empty proof")?;
    let sig_len = sig_len as usize;
    if rest.len() < sig_len {
        return Err("Invalid signature length".to_string());
    }
    let (signature, rest) = rest.split_at(sig_len);

    let (&pubkey_len, rest) = rest.split_first().ok_or("Missing pubkey")?;
    if rest.len() != pubkey_len as usize {
        return Err("Invalid pubkey length".to_string());
    }

    Ok((signature, rest))
}

/// Verify ECDSA signature
fn verify_signature(signature: &[u8], pubkey: &[u8], message: &Hash256) -> Result<bool, String> {
    let secp = Secp256k1::verification_only();

    let pubkey = PublicKey::from_slice(pubkey)
        .map_err(|e| format!("Invalid public key: {}", e))?;
    let signature = Signature::from_der(signature)
        .map_err(|e| format!("Invalid signature: {}", e))?;
    let message = Message::from_digest(*message.as_bytes());

    Ok(secp.verify_ecdsa(&message, &signature, &pubkey).is_ok())
}

/// Key pair able to produce proofs for `Secp256k1Verifier`
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = secret_key.public_key(&secp);
        Self { secret_key, public_key }
    }

    /// Restore from a hex-encoded secret key
    pub fn from_secret_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s.trim()).map_err(|e| format!("Invalid hex: {}", e))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| format!("Invalid secret key: {}", e))?;
        let public_key = secret_key.public_key(&Secp256k1::new());
        Ok(Self { secret_key, public_key })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn address(&self) -> String {
        address_of(&self.public_key.serialize())
    }

    /// Build a proof over `message`
    pub fn prove(&self, message: &Hash256) -> Vec<u8> {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest(*message.as_bytes());
        let signature = secp.sign_ecdsa(&message, &self.secret_key).serialize_der();
        let pubkey = self.public_key.serialize();

        let mut proof = Vec::with_capacity(2 + signature.len() + pubkey.len());
        proof.push(signature.len() as u8);
        proof.extend_from_slice(&signature);
        proof.push(pubkey.len() as u8);
        proof.extend_from_slice(&pubkey);
        proof
    }

    /// Fill every input's proof. All inputs must spend outputs owned by this key.
    pub fn sign_all(&self, tx: &mut Transaction) {
        let message = tx.signing_message();
        let proof = self.prove(&message);
        for input in &mut tx.inputs {
            input.spend_proof = proof.clone();
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("address", &self.address()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TxInput, TxOutput};

    fn signed_tx(keys: &KeyPair) -> Transaction {
        let mut tx = Transaction::new(
            vec![TxInput::new(Hash256::new([1; 32]), 0)],
            vec![TxOutput::new(500, "bob")],
        );
        keys.sign_all(&mut tx);
        tx
    }

    #[test]
    fn test_valid_proof() {
        let keys = KeyPair::generate();
        let tx = signed_tx(&keys);
        let verifier = Secp256k1Verifier;
        assert!(verifier.verify(
            &tx.signing_message(),
            &tx.inputs[0].spend_proof,
            keys.address().as_bytes()
        ));
    }

    #[test]
    fn test_wrong_owner_rejected() {
        let keys = KeyPair::generate();
        let other = KeyPair::generate();
        let tx = signed_tx(&keys);
        assert!(!Secp256k1Verifier.verify(
            &tx.signing_message(),
            &tx.inputs[0].spend_proof,
            other.address().as_bytes()
        ));
    }

    #[test]
    fn test_modified_transaction_rejected() {
        let keys = KeyPair::generate();
        let mut tx = signed_tx(&keys);
        tx.outputs[0].amount += 1;
        assert!(!Secp256k1Verifier.verify(
            &tx.signing_message(),
            &tx.inputs[0].spend_proof,
            keys.address().as_bytes()
        ));
    }

    #[test]
    fn test_garbage_proof_rejected() {
        let keys = KeyPair::generate();
        let message = Hash256::new([5; 32]);
        for proof in [vec![], vec![0xff], vec![2, 1, 1, 33], vec![0, 0]] {
            assert!(!Secp256k1Verifier.verify(&message, &proof, keys.address().as_bytes()));
        }
    }

    #[test]
    fn test_secret_hex_round_trip() {
        let keys = KeyPair::generate();
        let restored = KeyPair::from_secret_hex(&keys.secret_hex()).unwrap();
        assert_eq!(restored.address(), keys.address());
        assert_eq!(keys.address().len(), 40);
    }
}

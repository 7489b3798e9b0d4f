use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, UnparsedPublicKey, ED25519};

use crate::error::{PeerError, Result};
use data_encoding::HEXLOWER;

/// Number of public key bytes shown in log lines
const SHORT_ID_LEN: usize = 8;

/// Generate a fresh Ed25519 key pair, returned as a PKCS#8 document
pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|e| PeerError::Crypto(format!("Failed to generate Ed25519 key pair: {e}")))?
        .as_ref()
        .to_vec();
    Ok(pkcs8)
}

pub fn ed25519_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let peer_public_key = UnparsedPublicKey::new(&ED25519, public_key);
    peer_public_key.verify(message, signature).is_ok()
}

/// Fill a buffer from the system randomness source
pub fn random_bytes(length: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; length];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|e| PeerError::Crypto(format!("Randomness source unavailable: {e}")))?;
    Ok(bytes)
}

pub fn hex_encode(data: &[u8]) -> String {
    HEXLOWER.encode(data)
}

pub fn hex_decode(data: &str) -> Result<Vec<u8>> {
    HEXLOWER
        .decode(data.as_bytes())
        .map_err(|e| PeerError::Serialization(format!("Invalid hex encoding: {e}")))
}

/// Short hex prefix of a key, for log lines
pub fn short_id(public_key: &[u8]) -> String {
    let len = public_key.len().min(SHORT_ID_LEN);
    HEXLOWER.encode(&public_key[..len])
}

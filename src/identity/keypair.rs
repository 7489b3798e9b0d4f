use crate::error::{PeerError, Result};
use crate::storage::encrypted::SecretBytes;
use ring::signature::{Ed25519KeyPair, KeyPair};

/// The node's Ed25519 signing key.
///
/// Holds the PKCS#8 document (zeroed on drop) so the key can be written to
/// a key store, plus the parsed key pair used for signing.
pub struct NodeKeypair {
    pkcs8: SecretBytes,
    key_pair: Ed25519KeyPair,
}

impl NodeKeypair {
    /// Generate a fresh key pair from the system randomness source
    pub fn generate() -> Result<NodeKeypair> {
        let pkcs8 = crate::utils::new_key_pair()?;
        Self::from_pkcs8(&pkcs8)
    }

    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<NodeKeypair> {
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|e| PeerError::Crypto(format!("Failed to parse Ed25519 PKCS8: {e}")))?;
        Ok(NodeKeypair {
            pkcs8: SecretBytes::new(pkcs8.to_vec()),
            key_pair,
        })
    }

    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key().as_ref()
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key_pair.sign(message).as_ref().to_vec()
    }

    pub fn pkcs8(&self) -> &[u8] {
        self.pkcs8.expose()
    }
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeypair")
            .field("public_key", &crate::utils::short_id(self.public_key()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkcs8_reload_keeps_public_key() {
        let keypair = NodeKeypair::generate().unwrap();
        let reloaded = NodeKeypair::from_pkcs8(keypair.pkcs8()).unwrap();
        assert_eq!(keypair.public_key(), reloaded.public_key());
        assert_eq!(keypair.public_key().len(), 32);
    }

    #[test]
    fn test_rejects_garbage_pkcs8() {
        assert!(NodeKeypair::from_pkcs8(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_debug_does_not_leak_private_key() {
        let keypair = NodeKeypair::generate().unwrap();
        let rendered = format!("{keypair:?}");
        assert!(rendered.starts_with("NodeKeypair"));
        assert!(!rendered.contains(&crate::utils::hex_encode(keypair.pkcs8())));
    }
}

use crate::error::{PeerError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use std::fmt;
use zeroize::ZeroizeOnDrop;

pub const NONCE_LEN: usize = 12;
pub const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;

// Argon2id cost: 64 MiB, 3 passes, 1 lane
const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_PASSES: u32 = 3;
const ARGON2_LANES: u32 = 1;

/// Bytes that must not outlive their use (key material, passphrases)
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        SecretBytes(bytes)
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes(<{} bytes>)", self.0.len())
    }
}

/// Ciphertext and the nonce it was sealed under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Seals secrets with AES-256-GCM under a passphrase-derived key.
///
/// The key is stretched from the passphrase and a per-file salt with
/// Argon2id, so the same passphrase seals different files under different
/// keys.
pub struct KeySealer {
    cipher: Aes256Gcm,
}

impl KeySealer {
    pub fn from_passphrase(passphrase: &[u8], salt: &[u8]) -> Result<KeySealer> {
        let key = stretch(passphrase, salt)?;
        let cipher = Aes256Gcm::new_from_slice(key.expose())
            .map_err(|e| PeerError::Encryption(format!("Invalid sealing key: {e}")))?;
        Ok(KeySealer { cipher })
    }

    /// Encrypt under a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed> {
        let nonce = crate::utils::random_bytes(NONCE_LEN)?;
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| PeerError::Encryption(format!("Sealing failed: {e}")))?;
        Ok(Sealed { nonce, ciphertext })
    }

    /// Decrypt and authenticate. A wrong passphrase and a tampered file
    /// look the same from here.
    pub fn open(&self, sealed: &Sealed) -> Result<SecretBytes> {
        if sealed.nonce.len() != NONCE_LEN {
            return Err(PeerError::Encryption(format!(
                "Expected a {NONCE_LEN}-byte nonce, got {}",
                sealed.nonce.len()
            )));
        }
        self.cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .map(SecretBytes::new)
            .map_err(|_| {
                PeerError::Encryption("Wrong passphrase or corrupted key file".to_string())
            })
    }
}

fn stretch(passphrase: &[u8], salt: &[u8]) -> Result<SecretBytes> {
    let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_PASSES, ARGON2_LANES, Some(KEY_LEN))
        .map_err(|e| PeerError::Encryption(format!("Invalid Argon2 parameters: {e}")))?;
    let mut key = SecretBytes::new(vec![0u8; KEY_LEN]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(passphrase, salt, &mut key.0)
        .map_err(|e| PeerError::Encryption(format!("Key derivation failed: {e}")))?;
    Ok(key)
}

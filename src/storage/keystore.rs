use crate::error::{PeerError, Result};
use crate::identity::NodeKeypair;
use crate::storage::encrypted::{KeySealer, Sealed, SecretBytes, SALT_LEN};
use crate::utils::{from_bytes, random_bytes, to_bytes};
use log::{info, warn};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const KEY_FILE_VERSION: u8 = 1;

/// On-disk layout of a stored node key
#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct KeyFile {
    version: u8,
    /// Empty when the key is stored in plaintext
    salt: Vec<u8>,
    nonce: Vec<u8>,
    /// PKCS#8 document, sealed with AES-256-GCM when `salt` is set
    payload: Vec<u8>,
}

impl KeyFile {
    fn is_sealed(&self) -> bool {
        !self.salt.is_empty()
    }
}

/// File-backed store for the node's signing key.
///
/// Keeps the node's identity stable across restarts. With a passphrase the
/// key is sealed under an Argon2id-derived AES-256-GCM key.
pub struct KeyStore {
    path: PathBuf,
    passphrase: Option<SecretBytes>,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: &str) -> Self {
        self.passphrase = Some(SecretBytes::new(passphrase.as_bytes().to_vec()));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored key, or generate and persist a new one if the file
    /// does not exist yet.
    pub fn load_or_generate(&self) -> Result<NodeKeypair> {
        if self.path.exists() {
            let keypair = self.load()?;
            info!(
                "Loaded node key {} from {}",
                crate::utils::short_id(keypair.public_key()),
                self.path.display()
            );
            return Ok(keypair);
        }

        let keypair = NodeKeypair::generate()?;
        self.save(&keypair)?;
        info!(
            "Generated node key {} and stored it in {}",
            crate::utils::short_id(keypair.public_key()),
            self.path.display()
        );
        Ok(keypair)
    }

    pub fn load(&self) -> Result<NodeKeypair> {
        let contents = fs::read(&self.path).map_err(|e| {
            PeerError::Keystore(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        let key_file: KeyFile = from_bytes(&contents)
            .map_err(|e| PeerError::Keystore(format!("Corrupt key file: {e}")))?;

        if key_file.version != KEY_FILE_VERSION {
            return Err(PeerError::Keystore(format!(
                "Unsupported key file version {}",
                key_file.version
            )));
        }

        if !key_file.is_sealed() {
            return NodeKeypair::from_pkcs8(&key_file.payload);
        }

        let passphrase = self.passphrase.as_ref().ok_or_else(|| {
            PeerError::Keystore("Key file is encrypted but no passphrase was given".to_string())
        })?;
        let pkcs8 = KeySealer::from_passphrase(passphrase.expose(), &key_file.salt)?.open(
            &Sealed {
                nonce: key_file.nonce,
                ciphertext: key_file.payload,
            },
        )?;
        NodeKeypair::from_pkcs8(pkcs8.expose())
    }

    pub fn save(&self, keypair: &NodeKeypair) -> Result<()> {
        let key_file = match &self.passphrase {
            Some(passphrase) => {
                let salt = random_bytes(SALT_LEN)?;
                let sealed =
                    KeySealer::from_passphrase(passphrase.expose(), &salt)?.seal(keypair.pkcs8())?;
                KeyFile {
                    version: KEY_FILE_VERSION,
                    salt,
                    nonce: sealed.nonce,
                    payload: sealed.ciphertext,
                }
            }
            None => {
                warn!(
                    "No key store passphrase set; writing {} unencrypted",
                    self.path.display()
                );
                KeyFile {
                    version: KEY_FILE_VERSION,
                    salt: vec![],
                    nonce: vec![],
                    payload: keypair.pkcs8().to_vec(),
                }
            }
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut options = OpenOptions::new();
        options.create(true).truncate(true).write(true);
        // Owner only, whether or not the payload is sealed
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&self.path).map_err(|e| {
            PeerError::Keystore(format!("Failed to create {}: {e}", self.path.display()))
        })?;
        // `mode` only applies to new files
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        let mut writer = BufWriter::new(file);
        writer.write_all(&to_bytes(&key_file)?)?;
        writer.flush()?;
        Ok(())
    }
}

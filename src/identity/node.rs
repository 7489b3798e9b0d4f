use crate::error::{PeerError, Result};
use crate::identity::NodeKeypair;
use crate::utils::{ed25519_verify, hex_encode, short_id};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// A node's public identity: its Ed25519 public key, a signature by that
/// key over itself, and the address the node claims to be reachable at.
///
/// The self-attestation only proves possession of the private key. It says
/// nothing about the address, which is an unauthenticated claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    #[serde(with = "crate::utils::hex_serde")]
    public_key: Vec<u8>,
    #[serde(with = "crate::utils::hex_serde")]
    signature: Vec<u8>,
    address: SocketAddr,
}

impl Identity {
    /// Generate a fresh key pair and the identity it attests
    pub fn generate(address: SocketAddr) -> Result<(Identity, NodeKeypair)> {
        let keypair = NodeKeypair::generate()?;
        let identity = Identity::attest(&keypair, address);
        Ok((identity, keypair))
    }

    /// Self-sign the key pair's public key for the given address.
    ///
    /// The same key may attest several addresses (primary and relay).
    pub fn attest(keypair: &NodeKeypair, address: SocketAddr) -> Identity {
        let public_key = keypair.public_key().to_vec();
        let signature = keypair.sign(&public_key);
        Identity {
            public_key,
            signature,
            address,
        }
    }

    /// Build an identity from received parts, rejecting it unless the
    /// self-attestation verifies.
    pub fn from_parts(
        public_key: Vec<u8>,
        signature: Vec<u8>,
        address: SocketAddr,
    ) -> Result<Identity> {
        let identity = Identity {
            public_key,
            signature,
            address,
        };
        identity.validate()?;
        Ok(identity)
    }

    pub fn verify_self_attestation(&self) -> bool {
        ed25519_verify(&self.public_key, &self.signature, &self.public_key)
    }

    pub fn validate(&self) -> Result<()> {
        if self.verify_self_attestation() {
            Ok(())
        } else {
            Err(PeerError::InvalidIdentity(format!(
                "self-attestation of {} does not verify",
                self.short_id()
            )))
        }
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Full hex encoding of the public key, the node's unique ID
    pub fn id_hex(&self) -> String {
        hex_encode(&self.public_key)
    }

    pub fn short_id(&self) -> String {
        short_id(&self.public_key)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.short_id(), self.address)
    }
}

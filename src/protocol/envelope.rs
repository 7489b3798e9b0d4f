use crate::identity::{Identity, NodeKeypair};
use crate::utils::ed25519_verify;
use serde::{Deserialize, Serialize};

/// A signed, addressed unit of application data.
///
/// `signature` covers `content` only. The topic is a routing hint and is
/// not authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    /// Absent or malformed senders never verify
    #[serde(default)]
    pub from: Option<Identity>,
    /// Set by a relay that forwarded this envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<Identity>,
    #[serde(with = "crate::utils::hex_serde")]
    pub content: Vec<u8>,
    #[serde(with = "crate::utils::hex_serde")]
    pub signature: Vec<u8>,
}

impl Envelope {
    /// Sign `content` as `sender`.
    ///
    /// The caller must pass the key pair that `sender` was attested with;
    /// the pairing is not checked here.
    pub fn sign(
        topic: &str,
        content: &[u8],
        sender: &Identity,
        keypair: &NodeKeypair,
    ) -> Envelope {
        Envelope {
            topic: topic.to_string(),
            from: Some(sender.clone()),
            relay: None,
            content: content.to_vec(),
            signature: keypair.sign(content),
        }
    }

    /// True iff the sender is present and self-attested, any relay stamp is
    /// self-attested, and the signature verifies over `content` under the
    /// sender's public key.
    pub fn verify(&self) -> bool {
        let Some(from) = &self.from else {
            return false;
        };
        if !from.verify_self_attestation() {
            return false;
        }
        if let Some(relay) = &self.relay {
            if !relay.verify_self_attestation() {
                return false;
            }
        }
        ed25519_verify(from.public_key(), &self.signature, &self.content)
    }

    /// Copy of this envelope stamped with the relay that forwards it
    pub fn relayed_by(&self, relay: &Identity) -> Envelope {
        Envelope {
            relay: Some(relay.clone()),
            ..self.clone()
        }
    }

    pub fn is_relayed(&self) -> bool {
        self.relay.is_some()
    }

    pub fn sender(&self) -> Option<&Identity> {
        self.from.as_ref()
    }

    /// Content as text for log lines; invalid UTF-8 is replaced
    pub fn content_lossy(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

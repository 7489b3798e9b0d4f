//! The application boundary for verified envelopes.
//!
//! Receive loops call a `MessageHandler` only after an envelope's signature
//! has been checked. Handlers run on the connection's own thread, so a slow
//! handler only delays that connection.

use crate::protocol::Envelope;
use log::info;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

pub trait MessageHandler: Send + Sync {
    /// Called once per verified envelope, in stream order per connection
    fn on_message(&self, envelope: &Envelope, peer: &str);
}

/// Prints `<sender-id>: <content>` for every verified envelope
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl MessageHandler for LogHandler {
    fn on_message(&self, envelope: &Envelope, peer: &str) {
        let sender = envelope
            .sender()
            .map(|identity| identity.id_hex())
            .unwrap_or_default();
        match &envelope.relay {
            Some(relay) => info!(
                "{}: {} [{} via relay {}, peer {}]",
                sender,
                envelope.content_lossy(),
                envelope.topic,
                relay,
                peer
            ),
            None => info!(
                "{}: {} [{}, peer {}]",
                sender,
                envelope.content_lossy(),
                envelope.topic,
                peer
            ),
        }
    }
}

/// A verified envelope together with the connection it arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub envelope: Envelope,
    pub peer: String,
}

/// Forwards verified envelopes into an mpsc channel
pub struct ChannelHandler {
    sender: Mutex<Sender<Delivered>>,
}

impl ChannelHandler {
    pub fn new() -> (ChannelHandler, Receiver<Delivered>) {
        let (sender, receiver) = mpsc::channel();
        (
            ChannelHandler {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl MessageHandler for ChannelHandler {
    fn on_message(&self, envelope: &Envelope, peer: &str) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // A dropped receiver just means nobody is listening any more
        let _ = sender.send(Delivered {
            envelope: envelope.clone(),
            peer: peer.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use std::net::SocketAddr;

    #[test]
    fn test_channel_handler_delivers_copy() {
        let (identity, keypair) =
            Identity::generate(SocketAddr::from(([127, 0, 0, 1], 14000))).unwrap();
        let envelope = Envelope::sign("general", b"hi", &identity, &keypair);

        let (handler, receiver) = ChannelHandler::new();
        handler.on_message(&envelope, "127.0.0.1:50000");

        let delivered = receiver.try_recv().unwrap();
        assert_eq!(delivered.envelope, envelope);
        assert_eq!(delivered.peer, "127.0.0.1:50000");
    }

    #[test]
    fn test_channel_handler_survives_dropped_receiver() {
        let (identity, keypair) =
            Identity::generate(SocketAddr::from(([127, 0, 0, 1], 14000))).unwrap();
        let envelope = Envelope::sign("general", b"hi", &identity, &keypair);

        let (handler, receiver) = ChannelHandler::new();
        drop(receiver);
        handler.on_message(&envelope, "127.0.0.1:50000");
    }
}
